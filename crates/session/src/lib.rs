//! Editing sessions: the concurrent store and its background sweeper.

pub mod store;
pub mod sweeper;

pub use store::{SessionSettings, SessionStore};
pub use sweeper::{DEFAULT_SWEEP_INTERVAL, SessionSweeper, SweeperHandle};
