//! Ports - 抽象化レイヤー
//!
//! 外部システム（API server, watch stream）へのインターフェース。
//! The controller core consumes these traits; `impls` provides in-memory
//! versions for tests and the demo binary.

pub mod event_bus;
pub mod resource_store;

pub use self::event_bus::{EventBus, WatchStream};
pub use self::resource_store::ResourceStore;
