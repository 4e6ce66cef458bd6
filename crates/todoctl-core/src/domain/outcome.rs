//! Outcome of a successful reconciliation.

use std::time::Duration;

/// What the dispatcher should do with a key after a successful reconcile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Reconcile again no earlier than the given delay.
    Requeue(Duration),

    /// Do not self-schedule; wait for the next external trigger.
    AwaitChange,
}

impl Action {
    pub fn requeue(after: Duration) -> Self {
        Action::Requeue(after)
    }

    pub fn await_change() -> Self {
        Action::AwaitChange
    }

    pub fn requeue_after(&self) -> Option<Duration> {
        match self {
            Action::Requeue(after) => Some(*after),
            Action::AwaitChange => None,
        }
    }
}
