//! Event sources feeding the dispatcher's fan-in channel.
//!
//! Each source runs as its own task and holds only a sender into the
//! channel. All of them stop on the shared shutdown signal.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::domain::{ObjectKey, ResourceKind, Trigger, WatchError};
use crate::ports::{EventBus, WatchStream};

#[async_trait]
pub trait EventSource: Send {
    fn name(&self) -> String;

    /// Forward triggers into `tx` until shutdown or exhaustion.
    async fn run(self: Box<Self>, tx: mpsc::Sender<Trigger>, shutdown: watch::Receiver<bool>);
}

/// Forwards a bus watch for one kind (primary: TodoList, secondary: Pod).
pub struct WatchSource {
    kind: ResourceKind,
    stream: WatchStream,
}

impl WatchSource {
    /// Register the watch now so failures surface at start-up.
    pub async fn subscribe(bus: &dyn EventBus, kind: ResourceKind) -> Result<Self, WatchError> {
        let stream = bus.watch(kind).await?;
        Ok(Self { kind, stream })
    }

    pub fn kind(&self) -> ResourceKind {
        self.kind
    }
}

#[async_trait]
impl EventSource for WatchSource {
    fn name(&self) -> String {
        format!("watch/{}", self.kind)
    }

    async fn run(self: Box<Self>, tx: mpsc::Sender<Trigger>, mut shutdown: watch::Receiver<bool>) {
        let WatchSource { kind, mut stream } = *self;
        loop {
            if *shutdown.borrow() {
                break;
            }
            let event = tokio::select! {
                changed = shutdown.changed() => {
                    // sender dropped counts as shutdown
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
                event = stream.recv() => event,
            };
            let Some(event) = event else {
                warn!(%kind, "watch stream ended");
                break;
            };
            debug!(%kind, key = %event.key, change = ?event.change, "observed change");
            if tx.send(Trigger::Watch(event)).await.is_err() {
                break;
            }
        }
        debug!(%kind, "watch source stopped");
    }
}

/// Emits a synthetic trigger for one fixed TodoList on every tick.
///
/// Stops after `max_ticks` ticks or on shutdown, whichever comes first.
pub struct PeriodicSource {
    interval: Duration,
    max_ticks: u64,
    target: ObjectKey,
}

impl PeriodicSource {
    pub fn new(interval: Duration, max_ticks: u64, target: ObjectKey) -> Self {
        Self {
            interval,
            max_ticks,
            target,
        }
    }
}

#[async_trait]
impl EventSource for PeriodicSource {
    fn name(&self) -> String {
        format!("periodic/{}", self.target)
    }

    async fn run(self: Box<Self>, tx: mpsc::Sender<Trigger>, mut shutdown: watch::Receiver<bool>) {
        // first tick one interval after start, like a plain ticker
        let mut ticker = tokio::time::interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut count: u64 = 0;
        while count < self.max_ticks {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
                _ = ticker.tick() => {}
            }
            if tx.send(Trigger::Synthetic(self.target.clone())).await.is_err() {
                break;
            }
            count += 1;
        }
        info!(target_key = %self.target, ticks = count, "periodic source stopped");
    }
}
