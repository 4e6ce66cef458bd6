//! The managed resource.

use serde::{Deserialize, Serialize};

use super::resource::{ObjectMeta, Resource, ResourceKind};

/// Desired state, written by users. The controller only reads it.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TodoListSpec {
    /// Name of the Pod this TodoList is waiting on.
    #[serde(default)]
    pub task: String,
}

/// Observed state. Owned exclusively by the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TodoListStatus {
    #[serde(default)]
    pub is_completed: bool,
}

impl TodoListStatus {
    pub fn completed(is_completed: bool) -> Self {
        Self { is_completed }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TodoList {
    pub metadata: ObjectMeta,

    #[serde(default)]
    pub spec: TodoListSpec,

    #[serde(default)]
    pub status: TodoListStatus,
}

impl TodoList {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>, task: impl Into<String>) -> Self {
        Self {
            metadata: ObjectMeta::new(namespace, name),
            spec: TodoListSpec { task: task.into() },
            status: TodoListStatus::default(),
        }
    }

    pub fn task(&self) -> &str {
        &self.spec.task
    }
}

impl Resource for TodoList {
    const KIND: ResourceKind = ResourceKind::TodoList;

    fn metadata(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn metadata_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}
