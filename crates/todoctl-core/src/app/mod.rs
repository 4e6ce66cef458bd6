//! App - コントローラ層
//!
//! ports を組み合わせて reconcile ループを構成します。
//!
//! # 主要コンポーネント
//! - **ControllerBuilder**: 構築とワイヤリング
//! - **EventSource**: watch / periodic の trigger 供給
//! - **Router**: trigger → reconcile key
//! - **Controller / ControllerHandle**: workers の起動と停止
//! - **Reconciler**: Fetch → Correlate → Persist → Schedule

pub mod builder;
pub mod dispatcher;
pub mod reconciler;
pub mod router;
pub mod sources;

pub use self::builder::{BuildError, ControllerBuilder};
pub use self::dispatcher::{Controller, ControllerHandle};
pub use self::reconciler::{Reconciler, TodoListReconciler, correlate};
pub use self::router::{Router, TaskIndex};
pub use self::sources::{EventSource, PeriodicSource, WatchSource};
