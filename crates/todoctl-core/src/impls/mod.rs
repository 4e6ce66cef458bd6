//! Impls - ports の in-memory 実装（開発用・テスト用）
//!
//! A real deployment plugs an API-server client in behind the same traits.

pub mod inmem_bus;
pub mod inmem_store;

pub use self::inmem_bus::InMemoryEventBus;
pub use self::inmem_store::InMemoryResourceStore;
