use std::sync::Arc;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime, Utc};
use rust_decimal::Decimal;
use tokio::sync::{oneshot, OwnedRwLockWriteGuard, RwLock};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::observability;

use super::conflict::{
    check_no_conflict, check_policy, future_bookings, today, validate_amount, validate_policy,
    validate_window,
};
use super::{apply_to_book, Engine, EngineError, WalCommand};

/// Optional fields accepted on create.
#[derive(Debug, Clone, Default)]
pub struct BookingDetails {
    pub motive: Option<String>,
    pub cost: Option<Decimal>,
    pub notes: Option<String>,
    /// Initial state; Pending when absent, Confirmed also accepted for
    /// staff-entered bookings.
    pub state: Option<BookingState>,
}

/// Partial update; absent fields keep their stored value.
#[derive(Debug, Clone, Default)]
pub struct BookingPatch {
    pub area_id: Option<Ulid>,
    pub requester_id: Option<Ulid>,
    pub date: Option<NaiveDate>,
    pub start: Option<NaiveTime>,
    pub end: Option<NaiveTime>,
    pub state: Option<BookingState>,
    pub motive: Option<String>,
    pub cost: Option<Decimal>,
    pub paid: Option<bool>,
    pub notes: Option<String>,
}

impl BookingPatch {
    /// True when the patch changes the temporal footprint (area, date or
    /// window); only then do the scheduling checks re-run.
    pub fn reschedules(&self) -> bool {
        self.area_id.is_some() || self.date.is_some() || self.start.is_some() || self.end.is_some()
    }
}

fn validate_text(text: &Option<String>, what: &'static str) -> Result<(), EngineError> {
    if let Some(t) = text
        && t.len() > MAX_TEXT_LEN {
            return Err(EngineError::LimitExceeded(what));
        }
    Ok(())
}

/// Merge a patch over the current record. State changes are validated
/// against the transition table; setting the current state again is a no-op.
fn merge_patch(current: &Booking, patch: &BookingPatch, target_area: Ulid) -> Result<Booking, EngineError> {
    let mut next = current.clone();
    next.area_id = target_area;
    if let Some(r) = patch.requester_id {
        next.requester_id = r;
    }
    if let Some(d) = patch.date {
        next.date = d;
    }
    if let Some(s) = patch.start {
        next.window.start = s;
    }
    if let Some(e) = patch.end {
        next.window.end = e;
    }
    if let Some(state) = patch.state {
        if state != current.state && !current.state.can_transition_to(state) {
            return Err(EngineError::InvalidTransition {
                from: Some(current.state),
                to: state,
            });
        }
        next.state = state;
    }
    if let Some(m) = &patch.motive {
        next.motive = Some(m.clone());
    }
    if let Some(c) = patch.cost {
        next.cost = Some(c);
    }
    if let Some(p) = patch.paid {
        next.paid = p;
    }
    if let Some(n) = &patch.notes {
        next.notes = Some(n.clone());
    }
    Ok(next)
}

impl Engine {
    /// Create a booking. All checks and the insert run inside the area
    /// book's write-lock critical section; the first violated check wins
    /// and leaves nothing persisted.
    pub async fn create_booking(
        &self,
        id: Ulid,
        area_id: Ulid,
        requester_id: Ulid,
        date: NaiveDate,
        window: TimeWindow,
        details: BookingDetails,
    ) -> Result<BookingView, EngineError> {
        validate_text(&details.motive, "motive too long")?;
        validate_text(&details.notes, "notes too long")?;
        if let Some(cost) = &details.cost {
            validate_amount(cost, "cost")?;
        }
        let state = match details.state {
            None => BookingState::Pending,
            Some(s @ (BookingState::Pending | BookingState::Confirmed)) => s,
            Some(s) => {
                return Err(EngineError::InvalidTransition { from: None, to: s });
            }
        };
        // Area exists and is active. The lock is held through the insert so
        // the duplicate and conflict checks see a stable book.
        let mut guard = self.lock_book(area_id).await?;
        if self.booking_to_area.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }
        if !guard.area.active {
            return Err(EngineError::AreaInactive(area_id));
        }
        // Requester exists.
        if !self.requesters.contains_key(&requester_id) {
            return Err(EngineError::RequesterNotFound(requester_id));
        }
        if guard.bookings.len() >= MAX_BOOKINGS_PER_AREA {
            return Err(EngineError::LimitExceeded("too many bookings on area"));
        }

        // Window sanity, duration bounds, operating hours, advance horizon.
        validate_window(&window)?;
        let slot = Slot::new(date, window);
        check_policy(&guard.area, &slot, today())?;
        // The slot must be free.
        if let Err(e) = check_no_conflict(&guard, &slot, None) {
            metrics::counter!(observability::BOOKING_CONFLICTS_TOTAL).increment(1);
            return Err(e);
        }

        let booking = Booking {
            id,
            area_id,
            requester_id,
            date,
            window,
            state,
            motive: details.motive,
            cost: details.cost,
            paid: false,
            notes: details.notes,
            created_at: Utc::now(),
        };
        let event = Event::BookingCreated {
            booking: booking.clone(),
        };
        self.persist_and_apply(area_id, &mut guard, &event).await?;
        metrics::counter!(observability::BOOKINGS_CREATED_TOTAL).increment(1);
        Ok(self.view_with(&guard, booking))
    }

    /// Update a booking. Temporal changes re-run the scheduling checks
    /// against the merged record, excluding the booking's own prior slot;
    /// bookkeeping-only changes (motive, cost, paid, notes) commit without
    /// conflict re-validation.
    pub async fn update_booking(&self, id: Ulid, patch: BookingPatch) -> Result<BookingView, EngineError> {
        validate_text(&patch.motive, "motive too long")?;
        validate_text(&patch.notes, "notes too long")?;
        if let Some(cost) = &patch.cost {
            validate_amount(cost, "cost")?;
        }

        let (area_id, guard) = self.lock_booking_area(&id).await?;
        let current = guard
            .booking(id)
            .ok_or(EngineError::BookingNotFound(id))?
            .clone();

        let target_area = patch.area_id.unwrap_or(current.area_id);
        if target_area == area_id {
            self.update_in_place(area_id, guard, current, patch).await
        } else {
            // Moving to another area needs both books; release and relock
            // in sorted order.
            drop(guard);
            self.update_across(area_id, target_area, id, patch).await
        }
    }

    async fn update_in_place(
        &self,
        area_id: Ulid,
        mut guard: OwnedRwLockWriteGuard<AreaBook>,
        current: Booking,
        patch: BookingPatch,
    ) -> Result<BookingView, EngineError> {
        if let Some(r) = patch.requester_id
            && !self.requesters.contains_key(&r) {
                return Err(EngineError::RequesterNotFound(r));
            }
        let reschedules = patch.reschedules();
        let merged = merge_patch(&current, &patch, area_id)?;
        if reschedules {
            validate_window(&merged.window)?;
            let slot = merged.slot();
            check_policy(&guard.area, &slot, today())?;
            if let Err(e) = check_no_conflict(&guard, &slot, Some(current.id)) {
                metrics::counter!(observability::BOOKING_CONFLICTS_TOTAL).increment(1);
                return Err(e);
            }
        }
        let event = Event::BookingUpdated {
            booking: merged.clone(),
            prev_area_id: area_id,
            prev_requester_id: current.requester_id,
        };
        self.persist_and_apply(area_id, &mut guard, &event).await?;
        Ok(self.view_with(&guard, merged))
    }

    async fn update_across(
        &self,
        prev_area: Ulid,
        target_area: Ulid,
        id: Ulid,
        patch: BookingPatch,
    ) -> Result<BookingView, EngineError> {
        // Acquire write locks in sorted order to prevent deadlocks.
        let (first, second) = if prev_area < target_area {
            (prev_area, target_area)
        } else {
            (target_area, prev_area)
        };
        let mut first_guard = self.lock_book(first).await?;
        let mut second_guard = self.lock_book(second).await?;
        let (old_guard, new_guard) = if first == prev_area {
            (&mut first_guard, &mut second_guard)
        } else {
            (&mut second_guard, &mut first_guard)
        };

        let current = old_guard
            .booking(id)
            .ok_or(EngineError::BookingNotFound(id))?
            .clone();
        if !new_guard.area.active {
            return Err(EngineError::AreaInactive(target_area));
        }
        if let Some(r) = patch.requester_id
            && !self.requesters.contains_key(&r) {
                return Err(EngineError::RequesterNotFound(r));
            }
        if new_guard.bookings.len() >= MAX_BOOKINGS_PER_AREA {
            return Err(EngineError::LimitExceeded("too many bookings on area"));
        }

        // Moving area always changes the footprint: full re-validation
        // against the target book.
        let merged = merge_patch(&current, &patch, target_area)?;
        validate_window(&merged.window)?;
        let slot = merged.slot();
        check_policy(&new_guard.area, &slot, today())?;
        if let Err(e) = check_no_conflict(new_guard, &slot, Some(id)) {
            metrics::counter!(observability::BOOKING_CONFLICTS_TOTAL).increment(1);
            return Err(e);
        }

        let event = Event::BookingUpdated {
            booking: merged.clone(),
            prev_area_id: prev_area,
            prev_requester_id: current.requester_id,
        };
        self.wal_append(&event).await?;
        apply_to_book(old_guard, &event, &self.booking_to_area, &self.by_requester);
        apply_to_book(new_guard, &event, &self.booking_to_area, &self.by_requester);
        self.notify.send(prev_area, &event);
        self.notify.send(target_area, &event);
        Ok(self.view_with(new_guard, merged))
    }

    pub async fn confirm_booking(&self, id: Ulid) -> Result<BookingView, EngineError> {
        self.transition_booking(id, BookingState::Confirmed).await
    }

    /// Cancellation needs no scheduling re-validation: releasing a slot
    /// never creates a conflict.
    pub async fn cancel_booking(&self, id: Ulid) -> Result<BookingView, EngineError> {
        let view = self.transition_booking(id, BookingState::Cancelled).await?;
        metrics::counter!(observability::BOOKINGS_CANCELLED_TOTAL).increment(1);
        Ok(view)
    }

    pub async fn complete_booking(&self, id: Ulid) -> Result<BookingView, EngineError> {
        let view = self.transition_booking(id, BookingState::Completed).await?;
        metrics::counter!(observability::BOOKINGS_COMPLETED_TOTAL).increment(1);
        Ok(view)
    }

    async fn transition_booking(&self, id: Ulid, to: BookingState) -> Result<BookingView, EngineError> {
        let (area_id, mut guard) = self.lock_booking_area(&id).await?;
        let current = guard
            .booking(id)
            .ok_or(EngineError::BookingNotFound(id))?
            .clone();
        if !current.state.can_transition_to(to) {
            return Err(EngineError::InvalidTransition {
                from: Some(current.state),
                to,
            });
        }
        let event = Event::BookingStateChanged {
            id,
            area_id,
            state: to,
        };
        self.persist_and_apply(area_id, &mut guard, &event).await?;
        let mut booking = current;
        booking.state = to;
        Ok(self.view_with(&guard, booking))
    }

    /// Administrative hard delete. Prefer cancel_booking; removal loses
    /// history.
    pub async fn remove_booking(&self, id: Ulid) -> Result<Booking, EngineError> {
        let (area_id, mut guard) = self.lock_booking_area(&id).await?;
        let current = guard
            .booking(id)
            .ok_or(EngineError::BookingNotFound(id))?
            .clone();
        let event = Event::BookingRemoved { id, area_id };
        self.persist_and_apply(area_id, &mut guard, &event).await?;
        Ok(current)
    }

    // ── Area catalog ─────────────────────────────────────────

    pub async fn create_area(&self, area: Area) -> Result<(), EngineError> {
        validate_policy(&area)?;
        if self.state.len() >= MAX_AREAS {
            return Err(EngineError::LimitExceeded("too many areas"));
        }
        if self.state.contains_key(&area.id) {
            return Err(EngineError::AlreadyExists(area.id));
        }
        let id = area.id;
        let event = Event::AreaCreated { area: area.clone() };
        self.wal_append(&event).await?;
        self.state.insert(id, Arc::new(RwLock::new(AreaBook::new(area))));
        self.notify.send(id, &event);
        Ok(())
    }

    /// Replace an area's record. Policy edits are assumed serialized by the
    /// administrative workflow; existing bookings are not re-validated.
    pub async fn update_area(&self, area: Area) -> Result<(), EngineError> {
        validate_policy(&area)?;
        let id = area.id;
        let mut guard = self.lock_book(id).await?;
        let event = Event::AreaUpdated { area };
        self.persist_and_apply(id, &mut guard, &event).await
    }

    /// Flip the active flag. Deactivation is refused while future
    /// non-cancelled bookings exist unless `override_future` is set; the
    /// engine never auto-cancels them.
    pub async fn set_area_active(
        &self,
        id: Ulid,
        active: bool,
        override_future: bool,
    ) -> Result<(), EngineError> {
        let mut guard = self.lock_book(id).await?;
        if !active && !override_future {
            let count = future_bookings(&guard, today());
            if count > 0 {
                return Err(EngineError::HasFutureBookings { id, count });
            }
        }
        let event = Event::AreaActiveSet { id, active };
        self.persist_and_apply(id, &mut guard, &event).await
    }

    /// Remove an area and its booking history. Refused while any future
    /// non-cancelled booking exists.
    pub async fn remove_area(&self, id: Ulid) -> Result<(), EngineError> {
        let guard = self.lock_book(id).await?;
        let count = future_bookings(&guard, today());
        if count > 0 {
            return Err(EngineError::HasFutureBookings { id, count });
        }
        let event = Event::AreaRemoved { id };
        self.wal_append(&event).await?;
        for b in &guard.bookings {
            self.booking_to_area.remove(&b.id);
            if let Some(mut ids) = self.by_requester.get_mut(&b.requester_id) {
                ids.retain(|x| x != &b.id);
            }
        }
        drop(guard);
        self.state.remove(&id);
        self.notify.send(id, &event);
        Ok(())
    }

    // ── Requester directory ──────────────────────────────────

    pub async fn register_requester(&self, requester: Requester) -> Result<(), EngineError> {
        if requester.name.is_empty() || requester.name.len() > MAX_NAME_LEN {
            return Err(EngineError::LimitExceeded("requester name length"));
        }
        if let Some(u) = &requester.unit
            && u.len() > MAX_NAME_LEN {
                return Err(EngineError::LimitExceeded("unit label too long"));
            }
        if self.requesters.len() >= MAX_REQUESTERS {
            return Err(EngineError::LimitExceeded("too many requesters"));
        }
        if self.requesters.contains_key(&requester.id) {
            return Err(EngineError::AlreadyExists(requester.id));
        }
        let event = Event::RequesterRegistered {
            requester: requester.clone(),
        };
        self.wal_append(&event).await?;
        self.requesters.insert(requester.id, requester);
        Ok(())
    }

    /// Remove an account. Refused while the requester holds future
    /// non-cancelled bookings; historical bookings keep the dangling id.
    pub async fn remove_requester(&self, id: Ulid) -> Result<(), EngineError> {
        if !self.requesters.contains_key(&id) {
            return Err(EngineError::RequesterNotFound(id));
        }
        let today = today();
        let ids: Vec<Ulid> = self
            .by_requester
            .get(&id)
            .map(|v| v.clone())
            .unwrap_or_default();
        let mut future = 0usize;
        for bid in ids {
            if let Some(area_id) = self.area_of_booking(&bid)
                && let Some(book) = self.book(&area_id) {
                    let guard = book.read().await;
                    if let Some(b) = guard.booking(bid)
                        && b.state.occupies_slot()
                        && b.date >= today {
                            future += 1;
                        }
                }
        }
        if future > 0 {
            return Err(EngineError::HasFutureBookings { id, count: future });
        }
        let event = Event::RequesterRemoved { id };
        self.wal_append(&event).await?;
        self.requesters.remove(&id);
        Ok(())
    }

    // ── Maintenance ──────────────────────────────────────────

    /// Confirmed bookings whose end instant has passed, for the sweeper.
    pub fn collect_elapsed(&self, now: NaiveDateTime) -> Vec<Ulid> {
        let mut elapsed = Vec::new();
        for entry in self.state.iter() {
            let book = entry.value().clone();
            if let Ok(guard) = book.try_read() {
                for b in &guard.bookings {
                    if b.state == BookingState::Confirmed && b.date.and_time(b.window.end) <= now {
                        elapsed.push(b.id);
                    }
                }
            }
        }
        elapsed
    }

    /// Compact the WAL by rewriting it with only the events needed to
    /// recreate the current state.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let mut events = Vec::new();
        for r in self.requesters.iter() {
            events.push(Event::RequesterRegistered {
                requester: r.value().clone(),
            });
        }
        let area_ids: Vec<Ulid> = self.state.iter().map(|e| *e.key()).collect();
        for id in area_ids {
            let Some(book) = self.book(&id) else { continue };
            let guard = book.read().await;
            events.push(Event::AreaCreated {
                area: guard.area.clone(),
            });
            for b in &guard.bookings {
                events.push(Event::BookingCreated { booking: b.clone() });
            }
        }

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact {
                events,
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
