//! Resource trait - object kind と metadata の対応付け
//!
//! Both the managed `TodoList` and the observed `Pod` carry the same
//! `ObjectMeta`. The store assigns `uid`, `resource_version` and
//! `creation_timestamp`; callers only ever choose namespace and name.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use ulid::Ulid;

use super::ObjectKey;

/// Kinds of objects the controller observes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResourceKind {
    TodoList,
    Pod,
}

impl ResourceKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ResourceKind::TodoList => "TodoList",
            ResourceKind::Pod => "Pod",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Object metadata.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    pub name: String,

    pub namespace: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<Ulid>,

    /// Bumped by the store on every write; used for optimistic concurrency.
    #[serde(default)]
    pub resource_version: u64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creation_timestamp: Option<DateTime<Utc>>,
}

impl ObjectMeta {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            ..Default::default()
        }
    }

    pub fn key(&self) -> ObjectKey {
        ObjectKey::new(self.namespace.clone(), self.name.clone())
    }
}

/// Resource は kind と型を対応付ける
///
/// # Trait Bounds
/// - `Clone`: the store hands out owned snapshots
/// - `Serialize + DeserializeOwned`: objects round-trip through JSON
/// - `Send + Sync + 'static`: shared across tasks
pub trait Resource: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {
    const KIND: ResourceKind;

    fn metadata(&self) -> &ObjectMeta;

    fn metadata_mut(&mut self) -> &mut ObjectMeta;

    fn key(&self) -> ObjectKey {
        self.metadata().key()
    }

    fn name(&self) -> &str {
        &self.metadata().name
    }
}
