//! Events - change notifications
//!
//! `WatchEvent` is what the bus delivers for a real observed change.
//! `Trigger` is what flows through the dispatcher's fan-in channel: either a
//! forwarded watch event or a synthetic tick from the periodic source.

use serde::{Deserialize, Serialize};

use super::{ObjectKey, ResourceKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChangeType {
    Added,
    Updated,
    Deleted,
}

/// One observed change to one object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchEvent {
    pub kind: ResourceKind,
    pub key: ObjectKey,
    pub change: ChangeType,
}

impl WatchEvent {
    pub fn new(kind: ResourceKind, key: ObjectKey, change: ChangeType) -> Self {
        Self { kind, key, change }
    }

    pub fn added(kind: ResourceKind, key: ObjectKey) -> Self {
        Self::new(kind, key, ChangeType::Added)
    }

    pub fn updated(kind: ResourceKind, key: ObjectKey) -> Self {
        Self::new(kind, key, ChangeType::Updated)
    }

    pub fn deleted(kind: ResourceKind, key: ObjectKey) -> Self {
        Self::new(kind, key, ChangeType::Deleted)
    }
}

/// Item carried by the fan-in channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Trigger {
    Watch(WatchEvent),

    /// Manufactured by the periodic source; always refers to a TodoList.
    Synthetic(ObjectKey),
}
