use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Whole minutes — the unit for duration policy.
pub type Minutes = i64;

/// Half-open time-of-day window `[start, end)` within a single day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl TimeWindow {
    pub fn new(start: NaiveTime, end: NaiveTime) -> Self {
        debug_assert!(start < end, "TimeWindow start must be before end");
        Self { start, end }
    }

    pub fn minutes(&self) -> Minutes {
        (self.end - self.start).num_minutes()
    }

    pub fn overlaps(&self, other: &TimeWindow) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// Returns true if `self` lies entirely inside `outer`.
    pub fn within(&self, outer: &TimeWindow) -> bool {
        outer.start <= self.start && self.end <= outer.end
    }
}

/// A time window pinned to a calendar date. Dates are naive local days;
/// no time-zone conversion is applied anywhere in the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slot {
    pub date: NaiveDate,
    pub window: TimeWindow,
}

impl Slot {
    pub fn new(date: NaiveDate, window: TimeWindow) -> Self {
        Self { date, window }
    }

    pub fn overlaps(&self, other: &Slot) -> bool {
        self.date == other.date && self.window.overlaps(&other.window)
    }
}

/// Booking lifecycle: pending → confirmed → completed, with cancelled
/// reachable from pending or confirmed. Completed and cancelled are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BookingState {
    Pending,
    Confirmed,
    Completed,
    Cancelled,
}

impl BookingState {
    pub fn can_transition_to(self, next: BookingState) -> bool {
        use BookingState::*;
        matches!(
            (self, next),
            (Pending, Confirmed) | (Pending, Cancelled) | (Confirmed, Cancelled) | (Confirmed, Completed)
        )
    }

    /// Cancelled bookings release their slot; every other state holds it.
    pub fn occupies_slot(self) -> bool {
        !matches!(self, BookingState::Cancelled)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BookingState::Pending => "pending",
            BookingState::Confirmed => "confirmed",
            BookingState::Completed => "completed",
            BookingState::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for BookingState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A bookable common area and its static operating policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Area {
    pub id: Ulid,
    pub name: String,
    pub description: Option<String>,
    /// Maximum occupancy, informational for the front desk.
    pub capacity: u32,
    /// Price of one reservation, 2-decimal currency.
    pub price: Decimal,
    pub min_minutes: Minutes,
    pub max_minutes: Minutes,
    pub opening: NaiveTime,
    pub closing: NaiveTime,
    /// Furthest future date accepting bookings, in days from today.
    pub max_advance_days: i64,
    pub active: bool,
}

impl Area {
    /// Operating hours as a half-open window.
    pub fn hours(&self) -> TimeWindow {
        TimeWindow {
            start: self.opening,
            end: self.closing,
        }
    }
}

/// A registered resident account able to reserve areas.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Requester {
    pub id: Ulid,
    pub name: String,
    /// Unit label shown on receipts, e.g. "4B".
    pub unit: Option<String>,
}

/// One reservation of an area by a requester.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Ulid,
    pub area_id: Ulid,
    pub requester_id: Ulid,
    pub date: NaiveDate,
    pub window: TimeWindow,
    pub state: BookingState,
    pub motive: Option<String>,
    pub cost: Option<Decimal>,
    pub paid: bool,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Booking {
    pub fn slot(&self) -> Slot {
        Slot {
            date: self.date,
            window: self.window,
        }
    }
}

/// An area plus its reservation book, sorted by `(date, window.start)`.
#[derive(Debug, Clone)]
pub struct AreaBook {
    pub area: Area,
    pub bookings: Vec<Booking>,
}

impl AreaBook {
    pub fn new(area: Area) -> Self {
        Self {
            area,
            bookings: Vec::new(),
        }
    }

    /// Insert a booking maintaining sort order by (date, start).
    pub fn insert_booking(&mut self, booking: Booking) {
        let key = (booking.date, booking.window.start);
        let pos = self
            .bookings
            .binary_search_by_key(&key, |b| (b.date, b.window.start))
            .unwrap_or_else(|e| e);
        self.bookings.insert(pos, booking);
    }

    /// Remove a booking by id.
    pub fn remove_booking(&mut self, id: Ulid) -> Option<Booking> {
        if let Some(pos) = self.bookings.iter().position(|b| b.id == id) {
            Some(self.bookings.remove(pos))
        } else {
            None
        }
    }

    pub fn booking(&self, id: Ulid) -> Option<&Booking> {
        self.bookings.iter().find(|b| b.id == id)
    }

    pub fn booking_mut(&mut self, id: Ulid) -> Option<&mut Booking> {
        self.bookings.iter_mut().find(|b| b.id == id)
    }

    /// Bookings on the slot's date whose window overlaps it, regardless of
    /// state. Binary search skips bookings keyed at or after the slot's end.
    pub fn overlapping(&self, slot: &Slot) -> impl Iterator<Item = &Booking> {
        let right_bound = self
            .bookings
            .partition_point(|b| (b.date, b.window.start) < (slot.date, slot.window.end));
        let slot = *slot;
        self.bookings[..right_bound]
            .iter()
            .filter(move |b| b.date == slot.date && b.window.end > slot.window.start)
    }
}

/// WAL record — one entry per committed mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    AreaCreated {
        area: Area,
    },
    AreaUpdated {
        area: Area,
    },
    AreaActiveSet {
        id: Ulid,
        active: bool,
    },
    AreaRemoved {
        id: Ulid,
    },
    RequesterRegistered {
        requester: Requester,
    },
    RequesterRemoved {
        id: Ulid,
    },
    BookingCreated {
        booking: Booking,
    },
    /// Full merged record after an update; replaces the stored booking.
    /// The previous area/requester ids drive index maintenance on replay.
    BookingUpdated {
        booking: Booking,
        prev_area_id: Ulid,
        prev_requester_id: Ulid,
    },
    BookingStateChanged {
        id: Ulid,
        area_id: Ulid,
        state: BookingState,
    },
    BookingRemoved {
        id: Ulid,
        area_id: Ulid,
    },
}

// ── Response projections ─────────────────────────────────────────

/// Read-only area projection embedded in responses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AreaSummary {
    pub id: Ulid,
    pub name: String,
    pub capacity: u32,
    pub price: Decimal,
}

impl From<&Area> for AreaSummary {
    fn from(area: &Area) -> Self {
        Self {
            id: area.id,
            name: area.name.clone(),
            capacity: area.capacity,
            price: area.price,
        }
    }
}

/// Read-only requester projection embedded in responses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RequesterSummary {
    pub id: Ulid,
    pub name: String,
    pub unit: Option<String>,
}

impl From<&Requester> for RequesterSummary {
    fn from(requester: &Requester) -> Self {
        Self {
            id: requester.id,
            name: requester.name.clone(),
            unit: requester.unit.clone(),
        }
    }
}

/// A booking together with its area and requester summaries. The requester
/// is absent only for historical bookings whose account was removed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BookingView {
    pub booking: Booking,
    pub area: AreaSummary,
    pub requester: Option<RequesterSummary>,
}
