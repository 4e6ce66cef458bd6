//! ControllerBuilder - コントローラの構築とワイヤリング
//!
//! Missing collaborators and invalid settings are reported by `build()`,
//! before any task is spawned.

use std::sync::Arc;

use super::dispatcher::Controller;
use super::reconciler::{Reconciler, TodoListReconciler};
use crate::config::{ConfigError, ControllerConfig};
use crate::ports::{EventBus, ResourceStore};
use crate::queue::WorkQueue;

/// Builds a `Controller`.
///
/// # 使用例
/// ```ignore
/// let controller = ControllerBuilder::new()
///     .store(store)
///     .event_bus(bus)
///     .config(config)
///     .build()?;
/// let handle = controller.start().await?;
/// ```
#[derive(Default)]
pub struct ControllerBuilder {
    config: ControllerConfig,
    store: Option<Arc<dyn ResourceStore>>,
    bus: Option<Arc<dyn EventBus>>,
    reconciler: Option<Arc<dyn Reconciler>>,
}

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("no resource store configured")]
    MissingStore,

    #[error("no event bus configured")]
    MissingEventBus,

    #[error("invalid controller configuration: {0}")]
    InvalidConfig(#[from] ConfigError),
}

impl ControllerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn config(mut self, config: ControllerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn store(mut self, store: Arc<dyn ResourceStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn event_bus(mut self, bus: Arc<dyn EventBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Override the reconciler. Defaults to `TodoListReconciler` over the
    /// configured store.
    pub fn reconciler(mut self, reconciler: Arc<dyn Reconciler>) -> Self {
        self.reconciler = Some(reconciler);
        self
    }

    pub fn build(self) -> Result<Controller, BuildError> {
        self.config.validate()?;
        let store = self.store.ok_or(BuildError::MissingStore)?;
        let bus = self.bus.ok_or(BuildError::MissingEventBus)?;

        let reconciler = match self.reconciler {
            Some(reconciler) => reconciler,
            None => Arc::new(
                TodoListReconciler::new(Arc::clone(&store))
                    .with_completed_requeue_after(self.config.completed_requeue_after),
            ),
        };
        let queue = Arc::new(WorkQueue::new(self.config.retry.policy()));

        Ok(Controller {
            config: self.config,
            store,
            bus,
            reconciler,
            queue,
        })
    }
}
