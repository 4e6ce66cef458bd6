//! EventBus port - watch registration
//!
//! Delivery is at-least-once with no ordering guarantee across kinds. The
//! stream ends when the bus drops the sending half.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::domain::{ResourceKind, WatchError, WatchEvent};

pub type WatchStream = mpsc::Receiver<WatchEvent>;

#[async_trait]
pub trait EventBus: Send + Sync {
    /// Register a watch for `kind`.
    ///
    /// An error here means the controller cannot observe its inputs at all;
    /// callers surface it instead of retrying.
    async fn watch(&self, kind: ResourceKind) -> Result<WatchStream, WatchError>;
}
