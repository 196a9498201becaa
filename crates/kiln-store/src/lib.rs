//! Reactive state store for kiln.
//!
//! This crate holds the engine's single state tree (`EngineState`), the
//! `Action` events that are the only way to change it, the pure `reduce`
//! function, and the `Store`/`StoreLoop` pair that serializes reductions and
//! notifies `Subscriber`s after each one. It also defines the per-build
//! value types (`BuildState`, `BuildResult`) shared with the backends.

pub mod action;
pub mod build;
pub mod reducer;
pub mod state;
pub mod store;

pub use action::Action;
pub use build::{BuildResult, BuildState};
pub use reducer::reduce;
pub use state::{
    BuildReason, BuildRecord, EngineState, LogLine, LogStore, ManifestState, ManifestStatus,
    MAX_LOG_LINES,
};
pub use store::{panic_message, Store, StoreLoop, Subscriber};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("state invariant violated: {0}")]
    InvariantViolation(String),
    #[error("action queue is full")]
    Full,
    #[error("store loop has shut down")]
    Closed,
}
