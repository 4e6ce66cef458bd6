//! End-to-end controller runs against the in-memory store and bus.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use rstest::rstest;
use tokio::time::{Instant, sleep};

use todoctl_core::config::{ControllerConfig, FanOut};
use todoctl_core::domain::{
    Action, ControllerError, ObjectKey, Pod, ReconcileError, ResourceKind, StoreError, TodoList,
};
use todoctl_core::impls::{InMemoryEventBus, InMemoryResourceStore};
use todoctl_core::ports::ResourceStore;
use todoctl_core::queue::KeyState;
use todoctl_core::{ControllerBuilder, ControllerHandle, Reconciler};

struct Cluster {
    bus: Arc<InMemoryEventBus>,
    store: Arc<InMemoryResourceStore>,
}

impl Cluster {
    async fn new(task: &str, pods: &[&str]) -> Self {
        let bus = Arc::new(InMemoryEventBus::new());
        let store = Arc::new(InMemoryResourceStore::with_bus(bus.clone()));
        for name in pods {
            store.apply_pod(Pod::new("default", *name)).await;
        }
        store
            .apply_todo_list(TodoList::new("default", "t1", task))
            .await;
        Self { bus, store }
    }

    async fn start(&self, config: ControllerConfig) -> ControllerHandle {
        ControllerBuilder::new()
            .store(self.store.clone())
            .event_bus(self.bus.clone())
            .config(config)
            .build()
            .unwrap()
            .start()
            .await
            .unwrap()
    }

    async fn is_completed(&self) -> bool {
        self.store
            .get_todo_list(&t1())
            .await
            .unwrap()
            .status
            .is_completed
    }

    async fn wait_for_status(&self, expected: bool) {
        for _ in 0..500 {
            if self.store.status_writes(&t1()).await > 0 && self.is_completed().await == expected {
                return;
            }
            sleep(Duration::from_millis(10)).await;
        }
        panic!("status never became isCompleted={expected}");
    }
}

fn t1() -> ObjectKey {
    ObjectKey::new("default", "t1")
}

fn config() -> ControllerConfig {
    let mut config = ControllerConfig::default();
    config.periodic.enabled = false;
    config
}

async fn settle() {
    sleep(Duration::from_secs(1)).await;
}

#[tokio::test(start_paused = true)]
async fn matching_pod_completes_and_schedules_recheck() {
    let cluster = Cluster::new("worker-7", &["worker-3", "worker-7"]).await;
    let handle = cluster.start(config()).await;

    cluster.wait_for_status(true).await;
    settle().await;

    let queue = handle.queue();
    assert_eq!(queue.state_of(&t1()).await, Some(KeyState::Delayed));
    let not_before = queue.not_before(&t1()).await.unwrap();
    assert!(not_before > Instant::now() + Duration::from_secs(100));
    assert_eq!(queue.counts().await.delayed, 1);

    handle.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn completed_todo_list_is_rechecked_after_two_minutes() {
    let cluster = Cluster::new("worker-7", &["worker-7"]).await;
    let handle = cluster.start(config()).await;
    cluster.wait_for_status(true).await;
    settle().await;
    let writes = cluster.store.status_writes(&t1()).await;

    sleep(Duration::from_secs(121)).await;

    assert_eq!(cluster.store.status_writes(&t1()).await, writes + 1);
    handle.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn missing_pod_leaves_incomplete_without_requeue() {
    let cluster = Cluster::new("worker-7", &["worker-3"]).await;
    let handle = cluster.start(config()).await;

    cluster.wait_for_status(false).await;
    settle().await;

    let queue = handle.queue();
    assert_eq!(queue.state_of(&t1()).await, None);
    assert_eq!(queue.counts().await.delayed, 0);
    let writes = cluster.store.status_writes(&t1()).await;

    // nothing happens until something changes
    sleep(Duration::from_secs(600)).await;
    assert_eq!(cluster.store.status_writes(&t1()).await, writes);

    handle.shutdown().await.unwrap();
}

#[rstest]
#[case(FanOut::Broadcast)]
#[case(FanOut::Indexed)]
#[tokio::test(start_paused = true)]
async fn pod_events_flip_status_both_ways(#[case] fan_out: FanOut) {
    let cluster = Cluster::new("worker-7", &["worker-3"]).await;
    let handle = cluster
        .start(ControllerConfig {
            fan_out,
            ..config()
        })
        .await;
    cluster.wait_for_status(false).await;

    cluster
        .store
        .apply_pod(Pod::new("default", "worker-7"))
        .await;
    cluster.wait_for_status(true).await;

    cluster
        .store
        .delete_pod(&ObjectKey::new("default", "worker-7"))
        .await;
    cluster.wait_for_status(false).await;

    handle.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn refused_watch_is_fatal_at_start() {
    let cluster = Cluster::new("worker-7", &[]).await;
    cluster.bus.refuse(ResourceKind::Pod).await;

    let result = ControllerBuilder::new()
        .store(cluster.store.clone())
        .event_bus(cluster.bus.clone())
        .config(config())
        .build()
        .unwrap()
        .start()
        .await;

    assert!(matches!(result, Err(ControllerError::FatalConfiguration(_))));
}

#[tokio::test(start_paused = true)]
async fn transient_list_failures_are_retried_then_forgotten() {
    let cluster = Cluster::new("worker-7", &["worker-7"]).await;
    for _ in 0..3 {
        cluster
            .store
            .fail_next_list_pods(StoreError::Unavailable("apiserver timeout".into()))
            .await;
    }
    let handle = cluster.start(config()).await;

    cluster.wait_for_status(true).await;
    settle().await;

    assert_eq!(handle.queue().num_requeues(&t1()).await, 0);
    handle.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn status_conflict_is_retried() {
    let cluster = Cluster::new("worker-7", &["worker-7"]).await;
    cluster
        .store
        .fail_next_status_update(StoreError::Conflict {
            key: t1(),
            expected: 1,
            actual: 2,
        })
        .await;
    let handle = cluster.start(config()).await;

    cluster.wait_for_status(true).await;

    handle.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn deleted_todo_list_is_tolerated() {
    let cluster = Cluster::new("worker-7", &["worker-7"]).await;
    let handle = cluster.start(config()).await;
    cluster.wait_for_status(true).await;
    settle().await;

    cluster.store.delete_todo_list(&t1()).await;
    // the pending 2 minute re-check finds nothing
    sleep(Duration::from_secs(130)).await;

    let queue = handle.queue();
    assert_eq!(queue.state_of(&t1()).await, None);
    assert_eq!(queue.counts().await.failing, 0);
    handle.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn periodic_tick_for_missing_target_is_a_no_op() {
    let cluster = Cluster::new("worker-7", &[]).await;
    let mut config = config();
    config.periodic.enabled = true;
    config.periodic.max_ticks = 3;
    let handle = cluster.start(config).await;

    sleep(Duration::from_secs(20)).await;

    let jack = ObjectKey::new("operator-namespace", "jack");
    let queue = handle.queue();
    assert_eq!(queue.state_of(&jack).await, None);
    assert_eq!(queue.counts().await.failing, 0);
    assert_eq!(cluster.store.status_writes(&jack).await, 0);
    handle.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn cancellation_stops_new_work_immediately() {
    let cluster = Cluster::new("worker-7", &["worker-7"]).await;
    let handle = cluster.start(config()).await;
    cluster.wait_for_status(true).await;
    settle().await;
    let writes = cluster.store.status_writes(&t1()).await;

    handle.request_shutdown();
    let queue = handle.queue();
    assert!(!queue.add(t1()).await);
    assert!(!queue.add_after(t1(), Duration::from_secs(1)).await);

    // the pending 2 minute re-check and fresh pod events are both ignored
    cluster
        .store
        .delete_pod(&ObjectKey::new("default", "worker-7"))
        .await;
    sleep(Duration::from_secs(400)).await;

    assert_eq!(cluster.store.status_writes(&t1()).await, writes);
    assert!(cluster.is_completed().await);
    handle.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn dropping_the_handle_cancels_the_controller() {
    let cluster = Cluster::new("worker-7", &["worker-7"]).await;
    let handle = cluster.start(config()).await;
    cluster.wait_for_status(true).await;
    settle().await;
    let writes = cluster.store.status_writes(&t1()).await;
    let queue = handle.queue();

    drop(handle);
    sleep(Duration::from_secs(400)).await;

    assert!(queue.is_shutting_down());
    assert_eq!(cluster.store.status_writes(&t1()).await, writes);
    assert_eq!(cluster.bus.subscriber_count(ResourceKind::Pod).await, 0);
}

/// Records the name of the span each reconciliation runs in.
struct SpanRecordingReconciler {
    spans: std::sync::Mutex<Vec<Option<&'static str>>>,
}

#[async_trait]
impl Reconciler for SpanRecordingReconciler {
    async fn reconcile(&self, _key: &ObjectKey) -> Result<Action, ReconcileError> {
        let name = tracing::Span::current().metadata().map(|m| m.name());
        self.spans.lock().unwrap().push(name);
        Ok(Action::AwaitChange)
    }
}

#[tokio::test(start_paused = true)]
async fn reconcile_runs_inside_worker_span() {
    use tracing_subscriber::util::SubscriberInitExt;
    let _guard = tracing_subscriber::registry().set_default();

    let cluster = Cluster::new("worker-7", &[]).await;
    let reconciler = Arc::new(SpanRecordingReconciler {
        spans: std::sync::Mutex::new(Vec::new()),
    });
    let handle = ControllerBuilder::new()
        .store(cluster.store.clone())
        .event_bus(cluster.bus.clone())
        .reconciler(reconciler.clone())
        .config(config())
        .build()
        .unwrap()
        .start()
        .await
        .unwrap();
    settle().await;
    handle.shutdown().await.unwrap();

    assert_eq!(*reconciler.spans.lock().unwrap(), vec![Some("worker")]);
}

/// Counts completed reconciliations and takes a while about each.
struct SlowReconciler {
    started: AtomicUsize,
    finished: AtomicUsize,
}

#[async_trait]
impl Reconciler for SlowReconciler {
    async fn reconcile(&self, _key: &ObjectKey) -> Result<Action, ReconcileError> {
        self.started.fetch_add(1, Ordering::SeqCst);
        sleep(Duration::from_secs(3)).await;
        self.finished.fetch_add(1, Ordering::SeqCst);
        Ok(Action::AwaitChange)
    }
}

#[tokio::test(start_paused = true)]
async fn shutdown_drains_in_flight_reconciliation() {
    let cluster = Cluster::new("worker-7", &[]).await;
    let reconciler = Arc::new(SlowReconciler {
        started: AtomicUsize::new(0),
        finished: AtomicUsize::new(0),
    });
    let handle = ControllerBuilder::new()
        .store(cluster.store.clone())
        .event_bus(cluster.bus.clone())
        .reconciler(reconciler.clone())
        .config(config())
        .build()
        .unwrap()
        .start()
        .await
        .unwrap();

    while reconciler.started.load(Ordering::SeqCst) == 0 {
        sleep(Duration::from_millis(10)).await;
    }
    // triggers arriving now are deferred behind the in-flight run
    for _ in 0..5 {
        cluster
            .store
            .apply_pod(Pod::new("default", "worker-3"))
            .await;
    }

    let queue = handle.queue();
    handle.shutdown().await.unwrap();

    assert_eq!(reconciler.started.load(Ordering::SeqCst), 1);
    assert_eq!(reconciler.finished.load(Ordering::SeqCst), 1);
    assert_eq!(queue.counts().await.in_flight, 0);
    assert!(!queue.add(t1()).await);
}

#[tokio::test(start_paused = true)]
async fn rapid_triggers_while_in_flight_cause_one_more_run() {
    let cluster = Cluster::new("worker-7", &[]).await;
    let reconciler = Arc::new(SlowReconciler {
        started: AtomicUsize::new(0),
        finished: AtomicUsize::new(0),
    });
    let handle = ControllerBuilder::new()
        .store(cluster.store.clone())
        .event_bus(cluster.bus.clone())
        .reconciler(reconciler.clone())
        .config(ControllerConfig {
            workers: 4,
            ..config()
        })
        .build()
        .unwrap()
        .start()
        .await
        .unwrap();

    while reconciler.started.load(Ordering::SeqCst) == 0 {
        sleep(Duration::from_millis(10)).await;
    }
    for i in 0..10 {
        cluster
            .store
            .apply_pod(Pod::new("default", format!("worker-{i}")))
            .await;
    }

    sleep(Duration::from_secs(30)).await;

    assert_eq!(reconciler.started.load(Ordering::SeqCst), 2);
    assert_eq!(reconciler.finished.load(Ordering::SeqCst), 2);
    handle.shutdown().await.unwrap();
}
