pub mod engine;
pub mod limits;
pub mod model;
pub mod notify;
pub mod observability;
pub mod site;
pub mod sweeper;
pub mod wal;

pub use engine::{BookingDetails, BookingPatch, Engine, EngineError};
