use ulid::Ulid;

use crate::model::*;

use super::{Engine, EngineError};

impl Engine {
    /// Attach the area and requester summaries to a booking record.
    pub(super) fn view_with(&self, book: &AreaBook, booking: Booking) -> BookingView {
        let requester = self
            .requesters
            .get(&booking.requester_id)
            .map(|r| RequesterSummary::from(r.value()));
        BookingView {
            area: AreaSummary::from(&book.area),
            requester,
            booking,
        }
    }

    pub async fn booking(&self, id: Ulid) -> Result<BookingView, EngineError> {
        let area_id = self
            .area_of_booking(&id)
            .ok_or(EngineError::BookingNotFound(id))?;
        let book = self.book(&area_id).ok_or(EngineError::BookingNotFound(id))?;
        let guard = book.read().await;
        let booking = guard
            .booking(id)
            .ok_or(EngineError::BookingNotFound(id))?
            .clone();
        Ok(self.view_with(&guard, booking))
    }

    /// All bookings for an area, date ascending then start time ascending
    /// (the book's natural order).
    pub async fn bookings_by_area(&self, area_id: Ulid) -> Result<Vec<BookingView>, EngineError> {
        let book = self.book(&area_id).ok_or(EngineError::AreaNotFound(area_id))?;
        let guard = book.read().await;
        Ok(guard
            .bookings
            .iter()
            .map(|b| self.view_with(&guard, b.clone()))
            .collect())
    }

    /// A requester's bookings, most recently created first.
    pub async fn bookings_by_requester(&self, requester_id: Ulid) -> Result<Vec<BookingView>, EngineError> {
        if !self.requesters.contains_key(&requester_id) {
            return Err(EngineError::RequesterNotFound(requester_id));
        }
        let ids: Vec<Ulid> = self
            .by_requester
            .get(&requester_id)
            .map(|v| v.clone())
            .unwrap_or_default();
        let mut views = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(area_id) = self.area_of_booking(&id)
                && let Some(book) = self.book(&area_id) {
                    let guard = book.read().await;
                    if let Some(b) = guard.booking(id) {
                        views.push(self.view_with(&guard, b.clone()));
                    }
                }
        }
        views.sort_by(|a, b| b.booking.created_at.cmp(&a.booking.created_at));
        Ok(views)
    }

    /// All bookings in a given state, most recently created first.
    pub async fn bookings_by_state(&self, state: BookingState) -> Vec<BookingView> {
        let area_ids: Vec<Ulid> = self.state.iter().map(|e| *e.key()).collect();
        let mut views = Vec::new();
        for id in area_ids {
            let Some(book) = self.book(&id) else { continue };
            let guard = book.read().await;
            for b in &guard.bookings {
                if b.state == state {
                    views.push(self.view_with(&guard, b.clone()));
                }
            }
        }
        views.sort_by(|a, b| b.booking.created_at.cmp(&a.booking.created_at));
        views
    }

    /// Catalog lookup contract: the area only if it exists and is active.
    pub async fn active_area(&self, id: Ulid) -> Result<Area, EngineError> {
        let book = self.book(&id).ok_or(EngineError::AreaNotFound(id))?;
        let guard = book.read().await;
        if !guard.area.active {
            return Err(EngineError::AreaInactive(id));
        }
        Ok(guard.area.clone())
    }

    pub async fn area(&self, id: Ulid) -> Result<Area, EngineError> {
        let book = self.book(&id).ok_or(EngineError::AreaNotFound(id))?;
        let guard = book.read().await;
        Ok(guard.area.clone())
    }

    pub async fn list_areas(&self) -> Vec<AreaSummary> {
        let ids: Vec<Ulid> = self.state.iter().map(|e| *e.key()).collect();
        let mut areas = Vec::with_capacity(ids.len());
        for id in ids {
            let Some(book) = self.book(&id) else { continue };
            let guard = book.read().await;
            areas.push(AreaSummary::from(&guard.area));
        }
        areas.sort_by(|a, b| a.name.cmp(&b.name));
        areas
    }

    pub fn requester(&self, id: Ulid) -> Option<Requester> {
        self.requesters.get(&id).map(|r| r.value().clone())
    }
}
