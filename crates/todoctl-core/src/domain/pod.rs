use serde::{Deserialize, Serialize};

use super::resource::{ObjectMeta, Resource, ResourceKind};

/// Minimal projection of a Pod: the controller only consults its name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pod {
    pub metadata: ObjectMeta,
}

impl Pod {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            metadata: ObjectMeta::new(namespace, name),
        }
    }
}

impl Resource for Pod {
    const KIND: ResourceKind = ResourceKind::Pod;

    fn metadata(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn metadata_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}
