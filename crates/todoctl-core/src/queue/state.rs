//! Per-key queue state, as seen from outside.

use serde::{Deserialize, Serialize};

/// Where a key currently sits in the work queue.
///
/// State transitions:
/// - (absent) -> Queued -> InFlight -> (absent)
/// - (absent) -> Delayed -> Queued
/// - InFlight -> InFlightDirty -> Queued (re-added while being processed)
///
/// A key that is InFlight may also have a delayed entry pending; the
/// in-flight state is reported since it is the one that blocks processing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeyState {
    /// Eligible now, waiting for a worker.
    Queued,

    /// Waiting for its not-before time.
    Delayed,

    /// Held by a worker.
    InFlight,

    /// Held by a worker and re-added; becomes Queued on `done`.
    InFlightDirty,
}

impl KeyState {
    pub fn is_in_flight(self) -> bool {
        matches!(self, KeyState::InFlight | KeyState::InFlightDirty)
    }
}
