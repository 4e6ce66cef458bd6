use std::sync::Arc;

use anyhow::Context;
use serde::Serialize;
use tokio::time::{Duration, sleep};
use tracing::info;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use todoctl_core::domain::{ObjectKey, Pod, TodoList};
use todoctl_core::impls::{InMemoryEventBus, InMemoryResourceStore};
use todoctl_core::ports::ResourceStore;
use todoctl_core::{ControllerBuilder, ControllerConfig};

/// One line of the demo report.
#[derive(Debug, Serialize)]
struct StatusReport<'a> {
    step: &'a str,
    key: String,
    task: String,
    is_completed: bool,
    resource_version: u64,
}

fn load_config() -> anyhow::Result<ControllerConfig> {
    let config = match std::env::var("TODOCTL_CONFIG") {
        Ok(path) => ControllerConfig::from_file(&path)
            .with_context(|| format!("loading config from {path}"))?,
        Err(_) => ControllerConfig::default(),
    };
    config
        .with_env_overrides()
        .context("applying TODOCTL_* overrides")
}

async fn report(store: &InMemoryResourceStore, key: &ObjectKey, step: &str) -> anyhow::Result<()> {
    let todo = store.get_todo_list(key).await?;
    let line = StatusReport {
        step,
        key: key.to_string(),
        task: todo.spec.task.clone(),
        is_completed: todo.status.is_completed,
        resource_version: todo.metadata.resource_version,
    };
    println!("{}", serde_json::to_string(&line)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,todoctl_core=debug")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // `todoctl run` keeps the controller up until Ctrl-C
    let keep_running = std::env::args().nth(1).as_deref() == Some("run");
    let config = load_config()?;

    // (A) in-memory cluster
    let bus = Arc::new(InMemoryEventBus::new());
    let store = Arc::new(InMemoryResourceStore::with_bus(bus.clone()));
    let key = ObjectKey::new("default", "t1");
    store.apply_pod(Pod::new("default", "worker-3")).await;
    store
        .apply_todo_list(TodoList::new("default", "t1", "worker-7"))
        .await;

    // (B) controller
    let controller = ControllerBuilder::new()
        .store(store.clone())
        .event_bus(bus.clone())
        .config(config)
        .build()?;
    let handle = controller.start().await?;

    let settle = Duration::from_millis(200);
    sleep(settle).await;
    report(&store, &key, "initial").await?;

    // (C) the task pod appears, then goes away
    store.apply_pod(Pod::new("default", "worker-7")).await;
    sleep(settle).await;
    report(&store, &key, "pod-added").await?;

    store
        .delete_pod(&ObjectKey::new("default", "worker-7"))
        .await;
    sleep(settle).await;
    report(&store, &key, "pod-deleted").await?;

    if keep_running {
        info!("running until Ctrl-C");
        tokio::signal::ctrl_c()
            .await
            .context("waiting for Ctrl-C")?;
    }

    let counts = handle.queue().counts().await;
    println!("{}", serde_json::to_string(&counts)?);
    handle.shutdown().await?;
    Ok(())
}
