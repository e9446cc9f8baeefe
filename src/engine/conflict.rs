use chrono::{Days, Local, NaiveDate};
use rust_decimal::Decimal;
use ulid::Ulid;

use crate::limits::*;
use crate::model::{Area, AreaBook, Booking, Slot, TimeWindow};

use super::EngineError;

/// Naive local calendar date; the advance-booking horizon counts from here.
pub(crate) fn today() -> NaiveDate {
    Local::now().date_naive()
}

/// The window itself must be non-empty.
pub(crate) fn validate_window(window: &TimeWindow) -> Result<(), EngineError> {
    if window.start >= window.end {
        return Err(EngineError::InvalidTimeRange);
    }
    Ok(())
}

/// Temporal policy checks, in order: duration bounds, operating hours,
/// advance-booking horizon.
pub(crate) fn check_policy(area: &Area, slot: &Slot, today: NaiveDate) -> Result<(), EngineError> {
    let minutes = slot.window.minutes();
    if minutes < area.min_minutes || minutes > area.max_minutes {
        return Err(EngineError::DurationOutOfBounds {
            minutes,
            min: area.min_minutes,
            max: area.max_minutes,
        });
    }
    if !slot.window.within(&area.hours()) {
        return Err(EngineError::OutsideOperatingHours);
    }
    let latest = today + Days::new(area.max_advance_days as u64);
    if slot.date < today || slot.date > latest {
        return Err(EngineError::OutsideBookingWindow {
            date: slot.date,
            latest,
        });
    }
    Ok(())
}

/// First non-cancelled booking occupying the slot, in (date, start) order.
/// `exclude` drops a booking's own prior record during updates.
pub(crate) fn first_conflict<'a>(
    book: &'a AreaBook,
    slot: &Slot,
    exclude: Option<Ulid>,
) -> Option<&'a Booking> {
    book.overlapping(slot)
        .find(|b| b.state.occupies_slot() && exclude != Some(b.id))
}

/// The slot must be free of non-cancelled bookings.
pub(crate) fn check_no_conflict(
    book: &AreaBook,
    slot: &Slot,
    exclude: Option<Ulid>,
) -> Result<(), EngineError> {
    match first_conflict(book, slot, exclude) {
        Some(existing) => Err(EngineError::Conflict(existing.id)),
        None => Ok(()),
    }
}

/// Area policy invariants, enforced on create and update.
pub(crate) fn validate_policy(area: &Area) -> Result<(), EngineError> {
    if area.name.is_empty() || area.name.len() > MAX_NAME_LEN {
        return Err(EngineError::LimitExceeded("area name length"));
    }
    if let Some(d) = &area.description
        && d.len() > MAX_TEXT_LEN {
            return Err(EngineError::LimitExceeded("area description too long"));
        }
    if area.capacity < 1 {
        return Err(EngineError::InvalidPolicy("capacity must be at least 1"));
    }
    validate_amount(&area.price, "price")?;
    if area.min_minutes <= 0 {
        return Err(EngineError::InvalidPolicy("minimum duration must be positive"));
    }
    if area.min_minutes > area.max_minutes {
        return Err(EngineError::InvalidPolicy("minimum duration exceeds maximum"));
    }
    if area.opening >= area.closing {
        return Err(EngineError::InvalidPolicy("opening time must be before closing time"));
    }
    if area.max_advance_days < 1 {
        return Err(EngineError::InvalidPolicy("advance window must be at least 1 day"));
    }
    if area.max_advance_days > MAX_ADVANCE_DAYS {
        return Err(EngineError::LimitExceeded("advance window too long"));
    }
    Ok(())
}

/// Currency fields carry at most 2 fractional digits and are never negative.
pub(crate) fn validate_amount(amount: &Decimal, what: &'static str) -> Result<(), EngineError> {
    if amount.is_sign_negative() {
        return Err(EngineError::InvalidAmount(what));
    }
    if amount.scale() > 2 {
        return Err(EngineError::InvalidAmount(what));
    }
    Ok(())
}

/// Non-cancelled bookings dated today or later.
pub(crate) fn future_bookings(book: &AreaBook, today: NaiveDate) -> usize {
    book.bookings
        .iter()
        .filter(|b| b.state.occupies_slot() && b.date >= today)
        .count()
}
