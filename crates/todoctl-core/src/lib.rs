//! todoctl-core
//!
//! Core building blocks for the TodoList controller.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ObjectKey, TodoList, Pod, WatchEvent, Action, errors）
//! - **ports**: 抽象化レイヤー（ResourceStore, EventBus）
//! - **impls**: in-memory 実装（テスト・デモ用）
//! - **queue**: 重複排除つき WorkQueue と RetryPolicy
//! - **app**: sources, router, reconciler, dispatcher, builder
//! - **config**: TOML + 環境変数による設定

pub mod app;
pub mod config;
pub mod domain;
pub mod impls;
pub mod ports;
pub mod queue;

pub use app::{Controller, ControllerBuilder, ControllerHandle, Reconciler, TodoListReconciler};
pub use config::ControllerConfig;
pub use domain::{Action, ControllerError, ObjectKey, Pod, TodoList};
pub use queue::WorkQueue;
