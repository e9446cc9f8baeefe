use chrono::NaiveDate;
use ulid::Ulid;

use crate::model::{BookingState, Minutes};

#[derive(Debug)]
pub enum EngineError {
    AreaNotFound(Ulid),
    AreaInactive(Ulid),
    RequesterNotFound(Ulid),
    BookingNotFound(Ulid),
    AlreadyExists(Ulid),
    InvalidTimeRange,
    DurationOutOfBounds {
        minutes: Minutes,
        min: Minutes,
        max: Minutes,
    },
    OutsideOperatingHours,
    OutsideBookingWindow {
        date: NaiveDate,
        latest: NaiveDate,
    },
    Conflict(Ulid),
    InvalidTransition {
        /// None for an invalid initial state on create.
        from: Option<BookingState>,
        to: BookingState,
    },
    Contended(Ulid),
    HasFutureBookings {
        id: Ulid,
        count: usize,
    },
    InvalidPolicy(&'static str),
    InvalidAmount(&'static str),
    LimitExceeded(&'static str),
    WalError(String),
}

impl EngineError {
    /// The only kind safe to retry without correcting the request.
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::Contended(_))
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::AreaNotFound(id) => write!(f, "area not found: {id}"),
            EngineError::AreaInactive(id) => write!(f, "area is inactive: {id}"),
            EngineError::RequesterNotFound(id) => write!(f, "requester not found: {id}"),
            EngineError::BookingNotFound(id) => write!(f, "booking not found: {id}"),
            EngineError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            EngineError::InvalidTimeRange => write!(f, "start time must be before end time"),
            EngineError::DurationOutOfBounds { minutes, min, max } => {
                write!(f, "duration {minutes}min outside [{min}min, {max}min]")
            }
            EngineError::OutsideOperatingHours => write!(f, "window outside operating hours"),
            EngineError::OutsideBookingWindow { date, latest } => {
                write!(f, "date {date} outside booking window (latest {latest})")
            }
            EngineError::Conflict(id) => write!(f, "conflicts with booking: {id}"),
            EngineError::InvalidTransition { from, to } => match from {
                Some(from) => write!(f, "invalid state transition: {from} -> {to}"),
                None => write!(f, "invalid initial state: {to}"),
            },
            EngineError::Contended(id) => write!(f, "area book contended: {id}"),
            EngineError::HasFutureBookings { id, count } => {
                write!(f, "{id} still has {count} future booking(s)")
            }
            EngineError::InvalidPolicy(msg) => write!(f, "invalid area policy: {msg}"),
            EngineError::InvalidAmount(msg) => write!(f, "invalid amount: {msg}"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
