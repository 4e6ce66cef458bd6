//! InMemoryEventBus - 開発用の watch 配送
//!
//! Every `watch(kind)` call gets its own bounded channel. `publish` fans an
//! event out to all live subscribers of that kind and forgets the ones whose
//! receiver has been dropped.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use tokio::sync::{Mutex, mpsc};

use crate::domain::{ResourceKind, WatchError, WatchEvent};
use crate::ports::{EventBus, WatchStream};

const DEFAULT_CAPACITY: usize = 256;

#[derive(Default)]
struct BusState {
    subscribers: HashMap<ResourceKind, Vec<mpsc::Sender<WatchEvent>>>,
    refused: HashSet<ResourceKind>,
    closed: bool,
}

pub struct InMemoryEventBus {
    state: Mutex<BusState>,
    capacity: usize,
}

impl InMemoryEventBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            state: Mutex::new(BusState::default()),
            capacity: capacity.max(1),
        }
    }

    /// Make future `watch(kind)` calls fail (e.g. missing RBAC).
    pub async fn refuse(&self, kind: ResourceKind) {
        self.state.lock().await.refused.insert(kind);
    }

    /// Deliver `event` to every subscriber of its kind.
    ///
    /// Returns the number of subscribers that received it.
    pub async fn publish(&self, event: WatchEvent) -> usize {
        // ロック跨ぎ await しない: sender を clone してからロックを外す
        let senders = {
            let state = self.state.lock().await;
            state
                .subscribers
                .get(&event.kind)
                .cloned()
                .unwrap_or_default()
        };

        let mut delivered = 0;
        for tx in &senders {
            if tx.send(event.clone()).await.is_ok() {
                delivered += 1;
            }
        }

        if delivered < senders.len() {
            let mut state = self.state.lock().await;
            if let Some(list) = state.subscribers.get_mut(&event.kind) {
                list.retain(|tx| !tx.is_closed());
            }
        }
        delivered
    }

    pub async fn subscriber_count(&self, kind: ResourceKind) -> usize {
        let state = self.state.lock().await;
        state
            .subscribers
            .get(&kind)
            .map(|list| list.iter().filter(|tx| !tx.is_closed()).count())
            .unwrap_or(0)
    }

    /// Drop every subscriber; open streams end and new watches fail.
    pub async fn close(&self) {
        let mut state = self.state.lock().await;
        state.closed = true;
        state.subscribers.clear();
    }
}

impl Default for InMemoryEventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventBus for InMemoryEventBus {
    async fn watch(&self, kind: ResourceKind) -> Result<WatchStream, WatchError> {
        let mut state = self.state.lock().await;
        if state.closed {
            return Err(WatchError::Closed);
        }
        if state.refused.contains(&kind) {
            return Err(WatchError::Rejected(kind, "watch refused by bus".to_string()));
        }
        let (tx, rx) = mpsc::channel(self.capacity);
        state.subscribers.entry(kind).or_default().push(tx);
        Ok(rx)
    }
}
