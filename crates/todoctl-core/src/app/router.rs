//! Router - fan-in された trigger を reconcile key に変換
//!
//! TodoList events enqueue their own key. Synthetic ticks enqueue the key
//! they carry. Pod events carry no TodoList identity, so they are mapped
//! according to `FanOut`.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};

use crate::config::FanOut;
use crate::domain::{ChangeType, ObjectKey, ResourceKind, Trigger, WatchEvent};
use crate::ports::ResourceStore;
use crate::queue::WorkQueue;

/// Reverse index from task name to the TodoLists waiting on it.
#[derive(Debug, Default)]
pub struct TaskIndex {
    by_task: HashMap<String, HashSet<ObjectKey>>,
    task_of: HashMap<ObjectKey, String>,
}

impl TaskIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `key` now waits on `task`, replacing any previous task.
    pub fn upsert(&mut self, key: ObjectKey, task: String) {
        if self.task_of.get(&key) == Some(&task) {
            return;
        }
        self.remove(&key);
        self.by_task
            .entry(task.clone())
            .or_default()
            .insert(key.clone());
        self.task_of.insert(key, task);
    }

    pub fn remove(&mut self, key: &ObjectKey) {
        let Some(task) = self.task_of.remove(key) else {
            return;
        };
        if let Some(keys) = self.by_task.get_mut(&task) {
            keys.remove(key);
            if keys.is_empty() {
                self.by_task.remove(&task);
            }
        }
    }

    /// TodoLists whose task equals `task`, in key order.
    pub fn keys_for(&self, task: &str) -> Vec<ObjectKey> {
        let mut keys: Vec<ObjectKey> = self
            .by_task
            .get(task)
            .map(|keys| keys.iter().cloned().collect())
            .unwrap_or_default();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.task_of.len()
    }

    pub fn is_empty(&self) -> bool {
        self.task_of.is_empty()
    }
}

pub struct Router {
    queue: Arc<WorkQueue>,
    store: Arc<dyn ResourceStore>,
    fan_out: FanOut,

    /// TodoLists seen on the primary source and not yet deleted.
    known: BTreeSet<ObjectKey>,

    /// Only maintained in `FanOut::Indexed` mode.
    index: TaskIndex,
}

impl Router {
    pub fn new(queue: Arc<WorkQueue>, store: Arc<dyn ResourceStore>, fan_out: FanOut) -> Self {
        Self {
            queue,
            store,
            fan_out,
            known: BTreeSet::new(),
            index: TaskIndex::new(),
        }
    }

    pub fn known(&self) -> impl Iterator<Item = &ObjectKey> {
        self.known.iter()
    }

    /// Seed known TodoLists from a full list and enqueue each of them.
    ///
    /// A failed list is not fatal: the primary watch fills in as objects
    /// change.
    pub async fn prime(&mut self) -> usize {
        let todos = match self.store.list_todo_lists().await {
            Ok(todos) => todos,
            Err(err) => {
                warn!(error = %err, "initial TodoList list failed; relying on watch events");
                return 0;
            }
        };
        let mut enqueued = 0;
        for todo in todos {
            let key = todo.metadata.key();
            self.known.insert(key.clone());
            if self.fan_out == FanOut::Indexed {
                self.index.upsert(key.clone(), todo.spec.task);
            }
            if self.queue.add(key).await {
                enqueued += 1;
            }
        }
        debug!(enqueued, "primed from initial list");
        enqueued
    }

    /// Map one trigger to keys and enqueue them. Returns the mapped keys.
    pub async fn route(&mut self, trigger: Trigger) -> Vec<ObjectKey> {
        let keys = match trigger {
            Trigger::Synthetic(key) => vec![key],
            Trigger::Watch(event) => match event.kind {
                ResourceKind::TodoList => self.on_todo_list(event).await,
                ResourceKind::Pod => self.on_pod(&event),
            },
        };
        for key in &keys {
            self.queue.add(key.clone()).await;
        }
        keys
    }

    async fn on_todo_list(&mut self, event: WatchEvent) -> Vec<ObjectKey> {
        let key = event.key;
        match event.change {
            ChangeType::Added | ChangeType::Updated => {
                self.known.insert(key.clone());
                if self.fan_out == FanOut::Indexed {
                    self.refresh_index(&key).await;
                }
            }
            ChangeType::Deleted => {
                self.known.remove(&key);
                self.index.remove(&key);
            }
        }
        vec![key]
    }

    async fn refresh_index(&mut self, key: &ObjectKey) {
        match self.store.get_todo_list(key).await {
            Ok(todo) => self.index.upsert(key.clone(), todo.spec.task),
            Err(err) if err.is_not_found() => self.index.remove(key),
            Err(err) => warn!(%key, error = %err, "could not refresh task index"),
        }
    }

    fn on_pod(&self, event: &WatchEvent) -> Vec<ObjectKey> {
        match self.fan_out {
            FanOut::Broadcast => self.known.iter().cloned().collect(),
            FanOut::Indexed => self.index.keys_for(event.key.name()),
        }
    }

    /// Consume triggers until shutdown or until every source is gone.
    pub async fn run(mut self, mut rx: mpsc::Receiver<Trigger>, mut shutdown: watch::Receiver<bool>) {
        loop {
            if *shutdown.borrow() {
                break;
            }
            let trigger = tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
                trigger = rx.recv() => trigger,
            };
            let Some(trigger) = trigger else {
                debug!("all event sources closed");
                break;
            };
            let keys = self.route(trigger).await;
            debug!(count = keys.len(), "trigger routed");
        }
    }
}
