//! Reconciler - key を受け取り status を収束させる
//!
//! One invocation runs Fetch → Correlate → Persist → Schedule and re-derives
//! everything from the store; the triggering event is never consulted.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{Instrument, debug, info, info_span};

use crate::domain::{Action, ObjectKey, Pod, ReconcileError, Resource, TodoListStatus};
use crate::ports::ResourceStore;

/// A reconciler for one resource kind.
///
/// Implementations must be idempotent: running twice against unchanged
/// inputs yields the same status.
#[async_trait]
pub trait Reconciler: Send + Sync {
    async fn reconcile(&self, key: &ObjectKey) -> Result<Action, ReconcileError>;
}

/// True iff some Pod is named exactly `task`.
pub fn correlate(task: &str, pods: &[Pod]) -> bool {
    pods.iter().any(|pod| pod.name() == task)
}

/// Drives `TodoList.status.isCompleted` from the set of Pods.
pub struct TodoListReconciler {
    store: Arc<dyn ResourceStore>,
    completed_requeue_after: Duration,
}

impl TodoListReconciler {
    pub const DEFAULT_COMPLETED_REQUEUE_AFTER: Duration = Duration::from_secs(120);

    pub fn new(store: Arc<dyn ResourceStore>) -> Self {
        Self {
            store,
            completed_requeue_after: Self::DEFAULT_COMPLETED_REQUEUE_AFTER,
        }
    }

    #[must_use]
    pub fn with_completed_requeue_after(mut self, after: Duration) -> Self {
        self.completed_requeue_after = after;
        self
    }

    async fn reconcile_inner(&self, key: &ObjectKey) -> Result<Action, ReconcileError> {
        info!("reconciling TodoList");

        // Fetch
        let todo = match self.store.get_todo_list(key).await {
            Ok(todo) => todo,
            Err(err) if err.is_not_found() => {
                debug!("TodoList no longer exists; nothing to do");
                return Ok(Action::await_change());
            }
            Err(source) => {
                return Err(ReconcileError::Fetch {
                    key: key.clone(),
                    source,
                });
            }
        };

        // Correlate. A failed list leaves the previous status untouched.
        let pods = self
            .store
            .list_pods()
            .await
            .map_err(|source| ReconcileError::ListPods {
                key: key.clone(),
                source,
            })?;
        let is_completed = correlate(todo.task(), &pods);
        if is_completed {
            info!(pod = todo.task(), "task pod is available");
        }

        // Persist, unconditionally
        let status = TodoListStatus::completed(is_completed);
        match self
            .store
            .update_todo_list_status(key, status, Some(todo.metadata.resource_version))
            .await
        {
            Ok(_) => {}
            Err(err) if err.is_not_found() => {
                debug!("TodoList deleted before status write");
                return Ok(Action::await_change());
            }
            Err(source) => {
                return Err(ReconcileError::UpdateStatus {
                    key: key.clone(),
                    source,
                });
            }
        }

        // Schedule
        if is_completed {
            debug!(after = ?self.completed_requeue_after, "requeueing completed TodoList");
            Ok(Action::requeue(self.completed_requeue_after))
        } else {
            Ok(Action::await_change())
        }
    }
}

#[async_trait]
impl Reconciler for TodoListReconciler {
    async fn reconcile(&self, key: &ObjectKey) -> Result<Action, ReconcileError> {
        let span = info_span!("reconcile", kind = "TodoList", key = %key);
        self.reconcile_inner(key).instrument(span).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ErrorKind, StoreError, TodoList};
    use crate::impls::InMemoryResourceStore;
    use rstest::rstest;

    fn key() -> ObjectKey {
        ObjectKey::new("default", "t1")
    }

    fn pods(names: &[&str]) -> Vec<Pod> {
        names.iter().map(|n| Pod::new("default", *n)).collect()
    }

    async fn setup(task: &str, pod_names: &[&str]) -> (Arc<InMemoryResourceStore>, TodoListReconciler) {
        let store = Arc::new(InMemoryResourceStore::new());
        store
            .apply_todo_list(TodoList::new("default", "t1", task))
            .await;
        for name in pod_names {
            store.apply_pod(Pod::new("default", *name)).await;
        }
        let reconciler = TodoListReconciler::new(store.clone());
        (store, reconciler)
    }

    #[rstest]
    #[case("worker-7", &["worker-3", "worker-7"], true)]
    #[case("worker-7", &["worker-3"], false)]
    #[case("worker-7", &[], false)]
    #[case("worker-7", &["Worker-7"], false)]
    #[case("worker-7", &["worker-70", "worker-"], false)]
    #[case("", &["worker-3"], false)]
    fn correlate_is_exact_match(#[case] task: &str, #[case] names: &[&str], #[case] expected: bool) {
        assert_eq!(correlate(task, &pods(names)), expected);
    }

    #[tokio::test]
    async fn matching_pod_completes_and_requeues_after_two_minutes() {
        let (store, reconciler) = setup("worker-7", &["worker-3", "worker-7"]).await;

        let action = reconciler.reconcile(&key()).await.unwrap();

        assert_eq!(action, Action::Requeue(Duration::from_secs(120)));
        assert!(store.get_todo_list(&key()).await.unwrap().status.is_completed);
    }

    #[tokio::test]
    async fn missing_pod_is_incomplete_without_requeue() {
        let (store, reconciler) = setup("worker-7", &["worker-3"]).await;

        let action = reconciler.reconcile(&key()).await.unwrap();

        assert_eq!(action, Action::AwaitChange);
        assert!(!store.get_todo_list(&key()).await.unwrap().status.is_completed);
    }

    #[tokio::test]
    async fn pod_deletion_flips_status_back() {
        let (store, reconciler) = setup("worker-7", &["worker-3", "worker-7"]).await;
        reconciler.reconcile(&key()).await.unwrap();

        store.delete_pod(&ObjectKey::new("default", "worker-7")).await;
        let action = reconciler.reconcile(&key()).await.unwrap();

        assert_eq!(action, Action::AwaitChange);
        assert!(!store.get_todo_list(&key()).await.unwrap().status.is_completed);
    }

    #[tokio::test]
    async fn reconcile_is_idempotent() {
        let (store, reconciler) = setup("worker-7", &["worker-7"]).await;

        let first = reconciler.reconcile(&key()).await.unwrap();
        let status_after_first = store.get_todo_list(&key()).await.unwrap().status;
        let second = reconciler.reconcile(&key()).await.unwrap();
        let status_after_second = store.get_todo_list(&key()).await.unwrap().status;

        assert_eq!(first, second);
        assert_eq!(status_after_first, status_after_second);
        // no dirty-check: the write is repeated
        assert_eq!(store.status_writes(&key()).await, 2);
    }

    #[tokio::test]
    async fn deleted_object_is_a_no_op() {
        let store = Arc::new(InMemoryResourceStore::new());
        let reconciler = TodoListReconciler::new(store.clone());

        let action = reconciler.reconcile(&key()).await.unwrap();

        assert_eq!(action, Action::AwaitChange);
        assert_eq!(store.status_writes(&key()).await, 0);
    }

    #[tokio::test]
    async fn list_failure_keeps_previous_status() {
        let (store, reconciler) = setup("worker-7", &["worker-7"]).await;
        reconciler.reconcile(&key()).await.unwrap();
        store
            .fail_next_list_pods(StoreError::Unavailable("timeout".into()))
            .await;

        let err = reconciler.reconcile(&key()).await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Transient);
        assert!(matches!(err, ReconcileError::ListPods { .. }));
        assert!(store.get_todo_list(&key()).await.unwrap().status.is_completed);
        assert_eq!(store.status_writes(&key()).await, 1);
    }

    #[tokio::test]
    async fn status_conflict_is_surfaced_as_conflict() {
        let (store, reconciler) = setup("worker-7", &[]).await;
        store
            .fail_next_status_update(StoreError::Conflict {
                key: key(),
                expected: 1,
                actual: 2,
            })
            .await;

        let err = reconciler.reconcile(&key()).await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Conflict);
    }

    #[tokio::test]
    async fn object_deleted_before_status_write_is_a_no_op() {
        let (store, reconciler) = setup("worker-7", &[]).await;
        store
            .fail_next_status_update(StoreError::NotFound {
                kind: crate::domain::ResourceKind::TodoList,
                key: key(),
            })
            .await;

        assert_eq!(reconciler.reconcile(&key()).await.unwrap(), Action::AwaitChange);
    }

    #[tokio::test]
    async fn requeue_interval_is_configurable() {
        let (_store, reconciler) = setup("worker-7", &["worker-7"]).await;
        let reconciler = reconciler.with_completed_requeue_after(Duration::from_secs(30));

        assert_eq!(
            reconciler.reconcile(&key()).await.unwrap(),
            Action::Requeue(Duration::from_secs(30))
        );
    }
}
