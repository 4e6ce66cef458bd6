//! InMemoryResourceStore - テスト用の正本
//!
//! Holds TodoLists and Pods in maps keyed by `ObjectKey`. Every write bumps a
//! store-wide resource version and, when a bus is attached, publishes the
//! matching watch event after the lock is released.
//!
//! Status writes only publish `Updated` when the status value changed. This
//! mirrors a status-subresource watch filtered on generation/status and keeps
//! the controller from re-triggering itself forever.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::Mutex;
use ulid::Ulid;

use super::InMemoryEventBus;
use crate::domain::{
    ObjectKey, Pod, Resource, ResourceKind, StoreError, TodoList, TodoListStatus, WatchEvent,
};
use crate::ports::ResourceStore;

#[derive(Default)]
struct StoreState {
    todo_lists: HashMap<ObjectKey, TodoList>,
    pods: HashMap<ObjectKey, Pod>,
    next_version: u64,

    /// Injected failures, consumed front to back.
    list_pods_failures: VecDeque<StoreError>,
    status_update_failures: VecDeque<StoreError>,

    status_writes: HashMap<ObjectKey, usize>,
}

impl StoreState {
    fn bump_version(&mut self) -> u64 {
        self.next_version += 1;
        self.next_version
    }

    /// Stamp metadata on write; uid and timestamp survive updates.
    fn stamp<R: Resource>(&mut self, object: &mut R, previous: Option<&R>) {
        let version = self.bump_version();
        let meta = object.metadata_mut();
        meta.resource_version = version;
        match previous {
            Some(prev) => {
                meta.uid = prev.metadata().uid;
                meta.creation_timestamp = prev.metadata().creation_timestamp;
            }
            None => {
                meta.uid = Some(Ulid::new());
                meta.creation_timestamp = Some(Utc::now());
            }
        }
    }
}

pub struct InMemoryResourceStore {
    state: Mutex<StoreState>,
    bus: Option<Arc<InMemoryEventBus>>,
}

impl InMemoryResourceStore {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(StoreState::default()),
            bus: None,
        }
    }

    /// Publish every write to `bus`.
    pub fn with_bus(bus: Arc<InMemoryEventBus>) -> Self {
        Self {
            state: Mutex::new(StoreState::default()),
            bus: Some(bus),
        }
    }

    async fn publish(&self, event: WatchEvent) {
        if let Some(bus) = &self.bus {
            bus.publish(event).await;
        }
    }

    /// Create or replace a TodoList's metadata and spec.
    ///
    /// The status of an existing object is preserved: only the controller
    /// writes status.
    pub async fn apply_todo_list(&self, mut todo: TodoList) -> TodoList {
        let key = todo.key();
        let (stored, change) = {
            let mut state = self.state.lock().await;
            let previous = state.todo_lists.get(&key).cloned();
            if let Some(prev) = &previous {
                todo.status = prev.status;
            }
            state.stamp(&mut todo, previous.as_ref());
            state.todo_lists.insert(key.clone(), todo.clone());
            let change = if previous.is_some() {
                WatchEvent::updated(ResourceKind::TodoList, key)
            } else {
                WatchEvent::added(ResourceKind::TodoList, key)
            };
            (todo, change)
        };
        self.publish(change).await;
        stored
    }

    pub async fn delete_todo_list(&self, key: &ObjectKey) -> Option<TodoList> {
        let removed = self.state.lock().await.todo_lists.remove(key);
        if removed.is_some() {
            self.publish(WatchEvent::deleted(ResourceKind::TodoList, key.clone()))
                .await;
        }
        removed
    }

    pub async fn apply_pod(&self, mut pod: Pod) -> Pod {
        let key = pod.key();
        let (stored, change) = {
            let mut state = self.state.lock().await;
            let previous = state.pods.get(&key).cloned();
            state.stamp(&mut pod, previous.as_ref());
            state.pods.insert(key.clone(), pod.clone());
            let change = if previous.is_some() {
                WatchEvent::updated(ResourceKind::Pod, key)
            } else {
                WatchEvent::added(ResourceKind::Pod, key)
            };
            (pod, change)
        };
        self.publish(change).await;
        stored
    }

    pub async fn delete_pod(&self, key: &ObjectKey) -> Option<Pod> {
        let removed = self.state.lock().await.pods.remove(key);
        if removed.is_some() {
            self.publish(WatchEvent::deleted(ResourceKind::Pod, key.clone()))
                .await;
        }
        removed
    }

    /// Make the next `list_pods` call fail with `err`.
    pub async fn fail_next_list_pods(&self, err: StoreError) {
        self.state.lock().await.list_pods_failures.push_back(err);
    }

    /// Make the next `update_todo_list_status` call fail with `err`.
    pub async fn fail_next_status_update(&self, err: StoreError) {
        self.state.lock().await.status_update_failures.push_back(err);
    }

    /// Number of successful status writes for `key`.
    pub async fn status_writes(&self, key: &ObjectKey) -> usize {
        let state = self.state.lock().await;
        state.status_writes.get(key).copied().unwrap_or(0)
    }

    /// Bump a TodoList's version without changing it, as another writer would.
    pub async fn touch_todo_list(&self, key: &ObjectKey) -> Option<u64> {
        let mut state = self.state.lock().await;
        let version = state.bump_version();
        let todo = state.todo_lists.get_mut(key)?;
        todo.metadata.resource_version = version;
        Some(version)
    }
}

impl Default for InMemoryResourceStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ResourceStore for InMemoryResourceStore {
    async fn get_todo_list(&self, key: &ObjectKey) -> Result<TodoList, StoreError> {
        let state = self.state.lock().await;
        state
            .todo_lists
            .get(key)
            .cloned()
            .ok_or_else(|| StoreError::NotFound {
                kind: ResourceKind::TodoList,
                key: key.clone(),
            })
    }

    async fn list_todo_lists(&self) -> Result<Vec<TodoList>, StoreError> {
        let state = self.state.lock().await;
        Ok(state.todo_lists.values().cloned().collect())
    }

    async fn list_pods(&self) -> Result<Vec<Pod>, StoreError> {
        let mut state = self.state.lock().await;
        if let Some(err) = state.list_pods_failures.pop_front() {
            return Err(err);
        }
        Ok(state.pods.values().cloned().collect())
    }

    async fn update_todo_list_status(
        &self,
        key: &ObjectKey,
        status: TodoListStatus,
        expected_resource_version: Option<u64>,
    ) -> Result<TodoList, StoreError> {
        let (updated, changed) = {
            let mut state = self.state.lock().await;
            if let Some(err) = state.status_update_failures.pop_front() {
                return Err(err);
            }

            let current = state
                .todo_lists
                .get(key)
                .map(|todo| (todo.metadata.resource_version, todo.status))
                .ok_or_else(|| StoreError::NotFound {
                    kind: ResourceKind::TodoList,
                    key: key.clone(),
                })?;
            let (actual, previous_status) = current;

            if let Some(expected) = expected_resource_version
                && expected != actual
            {
                return Err(StoreError::Conflict {
                    key: key.clone(),
                    expected,
                    actual,
                });
            }

            let version = state.bump_version();
            *state.status_writes.entry(key.clone()).or_insert(0) += 1;
            let Some(todo) = state.todo_lists.get_mut(key) else {
                return Err(StoreError::NotFound {
                    kind: ResourceKind::TodoList,
                    key: key.clone(),
                });
            };
            todo.status = status;
            todo.metadata.resource_version = version;
            (todo.clone(), previous_status != status)
        };

        if changed {
            self.publish(WatchEvent::updated(ResourceKind::TodoList, key.clone()))
                .await;
        }
        Ok(updated)
    }
}
