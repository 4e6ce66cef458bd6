//! Dispatcher - sources → router → queue → workers の配線
//!
//! `Controller::start` establishes every watch first, so a watch that cannot
//! be registered fails start-up instead of leaving a half-running loop.

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, error, info, info_span, warn};

use super::reconciler::Reconciler;
use super::router::Router;
use super::sources::{EventSource, PeriodicSource, WatchSource};
use crate::config::ControllerConfig;
use crate::domain::{Action, ControllerError, ErrorKind, ObjectKey, ReconcileError, ResourceKind};
use crate::ports::{EventBus, ResourceStore};
use crate::queue::WorkQueue;

/// A wired but not yet running controller. Built by `ControllerBuilder`.
pub struct Controller {
    pub(crate) config: ControllerConfig,
    pub(crate) store: Arc<dyn ResourceStore>,
    pub(crate) bus: Arc<dyn EventBus>,
    pub(crate) reconciler: Arc<dyn Reconciler>,
    pub(crate) queue: Arc<WorkQueue>,
}

impl Controller {
    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    pub fn queue(&self) -> Arc<WorkQueue> {
        Arc::clone(&self.queue)
    }

    /// Register watches, then spawn sources, the router and the workers.
    pub async fn start(self) -> Result<ControllerHandle, ControllerError> {
        let primary = WatchSource::subscribe(self.bus.as_ref(), ResourceKind::TodoList).await?;
        let secondary = WatchSource::subscribe(self.bus.as_ref(), ResourceKind::Pod).await?;

        let mut sources: Vec<Box<dyn EventSource>> = vec![Box::new(primary), Box::new(secondary)];
        if self.config.periodic.enabled {
            sources.push(Box::new(PeriodicSource::new(
                self.config.periodic.interval,
                self.config.periodic.max_ticks,
                self.config.periodic.target(),
            )));
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (trigger_tx, trigger_rx) = mpsc::channel(self.config.event_buffer);

        let mut source_joins = Vec::with_capacity(sources.len());
        for source in sources {
            let name = source.name();
            debug!(source = %name, "starting event source");
            let span = info_span!("source", source = %name);
            source_joins.push(tokio::spawn(
                source
                    .run(trigger_tx.clone(), shutdown_rx.clone())
                    .instrument(span),
            ));
        }
        // the router sees the channel close once every source is gone
        drop(trigger_tx);

        let mut router = Router::new(
            Arc::clone(&self.queue),
            Arc::clone(&self.store),
            self.config.fan_out,
        );
        router.prime().await;
        let router_join = tokio::spawn(router.run(trigger_rx, shutdown_rx.clone()));

        let workers = self.config.workers;
        let mut worker_joins = Vec::with_capacity(workers);
        for worker_id in 0..workers {
            let queue = Arc::clone(&self.queue);
            let reconciler = Arc::clone(&self.reconciler);
            let report_after = self.config.report_after_attempts;
            let shutdown = shutdown_rx.clone();
            worker_joins.push(tokio::spawn(
                worker_loop(queue, reconciler, report_after, shutdown)
                    .instrument(info_span!("worker", worker = worker_id)),
            ));
        }

        info!(
            workers,
            fan_out = ?self.config.fan_out,
            periodic = self.config.periodic.enabled,
            "controller started"
        );

        Ok(ControllerHandle {
            shutdown_tx,
            source_joins,
            router_join: Some(router_join),
            worker_joins,
            queue: self.queue,
        })
    }
}

/// Handle to a running controller.
/// - `shutdown()` で全タスクを止めて join する
/// - in-flight の reconcile は最後まで実行される
/// - drop するとキャンセルだけ通知する（join はしない）
pub struct ControllerHandle {
    shutdown_tx: watch::Sender<bool>,
    source_joins: Vec<JoinHandle<()>>,
    router_join: Option<JoinHandle<()>>,
    worker_joins: Vec<JoinHandle<()>>,
    queue: Arc<WorkQueue>,
}

impl ControllerHandle {
    pub fn queue(&self) -> Arc<WorkQueue> {
        Arc::clone(&self.queue)
    }

    /// Signal cancellation without waiting.
    ///
    /// The queue stops accepting and handing out keys immediately; only
    /// reconciliations already running continue.
    pub fn request_shutdown(&self) {
        self.queue.shut_down();
        // ignore send error: receivers may already be dropped
        let _ = self.shutdown_tx.send(true);
    }

    /// Cancel, then wait for sources, router and in-flight work to finish.
    pub async fn shutdown(mut self) -> Result<(), ControllerError> {
        info!("controller shutting down");
        self.request_shutdown();

        let mut first_err = None;
        for join in std::mem::take(&mut self.source_joins) {
            if let Err(e) = join.await {
                first_err.get_or_insert(e);
            }
        }
        if let Some(join) = self.router_join.take()
            && let Err(e) = join.await
        {
            first_err.get_or_insert(e);
        }
        for join in std::mem::take(&mut self.worker_joins) {
            if let Err(e) = join.await {
                first_err.get_or_insert(e);
            }
        }
        self.queue.wait_idle().await;
        info!("controller stopped");

        match first_err {
            Some(e) => Err(ControllerError::Join(e)),
            None => Ok(()),
        }
    }
}

impl Drop for ControllerHandle {
    fn drop(&mut self) {
        self.request_shutdown();
    }
}

async fn worker_loop(
    queue: Arc<WorkQueue>,
    reconciler: Arc<dyn Reconciler>,
    report_after_attempts: u32,
    mut shutdown: watch::Receiver<bool>,
) {
    debug!("worker started");
    loop {
        if *shutdown.borrow() {
            break;
        }
        let key = tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
                continue;
            }
            key = queue.get() => key,
        };
        let Some(key) = key else {
            break;
        };
        let result = reconciler.reconcile(&key).await;
        queue.done(&key).await;
        apply_outcome(&queue, &key, result, report_after_attempts).await;
    }
    debug!("worker stopped");
}

/// Translate a reconcile result into queue operations.
pub(crate) async fn apply_outcome(
    queue: &WorkQueue,
    key: &ObjectKey,
    result: Result<Action, ReconcileError>,
    report_after_attempts: u32,
) {
    let err = match result {
        Ok(Action::Requeue(after)) => {
            queue.forget(key).await;
            queue.add_after(key.clone(), after).await;
            return;
        }
        Ok(Action::AwaitChange) => {
            queue.forget(key).await;
            return;
        }
        Err(err) => err,
    };

    let attempt = match err.kind() {
        ErrorKind::NotFound => {
            queue.forget(key).await;
            return;
        }
        ErrorKind::Conflict => queue.add_retry_now(key.clone()).await,
        ErrorKind::Transient => queue.add_rate_limited(key.clone()).await,
    };

    if attempt >= report_after_attempts {
        error!(%key, attempt, error = %err, "reconcile keeps failing; still retrying");
    } else {
        warn!(%key, attempt, error = %err, "reconcile failed; retrying");
    }
}
