//! ResourceStore port - object の正本（source of truth）
//!
//! The API server (or any backend) that owns TodoList and Pod objects.
//! The controller only reads objects and writes the TodoList status.

use async_trait::async_trait;

use crate::domain::{ObjectKey, Pod, StoreError, TodoList, TodoListStatus};

/// ResourceStore は typed get/list/update-status を提供
///
/// # 契約
/// - `list_*` returns every currently visible item; order is irrelevant
/// - `update_todo_list_status` with `Some(version)` fails with
///   `StoreError::Conflict` when the stored version differs
/// - a successful write bumps the object's resource version
#[async_trait]
pub trait ResourceStore: Send + Sync {
    async fn get_todo_list(&self, key: &ObjectKey) -> Result<TodoList, StoreError>;

    async fn list_todo_lists(&self) -> Result<Vec<TodoList>, StoreError>;

    async fn list_pods(&self) -> Result<Vec<Pod>, StoreError>;

    /// Replace the status subresource. Returns the updated object.
    async fn update_todo_list_status(
        &self,
        key: &ObjectKey,
        status: TodoListStatus,
        expected_resource_version: Option<u64>,
    ) -> Result<TodoList, StoreError>;
}
