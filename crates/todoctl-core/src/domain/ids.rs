//! Object identity.
//!
//! `ObjectKey` is the namespace + name pair that identifies a namespaced
//! object. It doubles as the reconcile key: two notifications that map to the
//! same `ObjectKey` collapse into one pending reconciliation in the work queue.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Namespace + name of an object.
///
/// # 例
/// ```ignore
/// let key = ObjectKey::new("default", "t1");
/// assert_eq!(key.to_string(), "default/t1");
/// let parsed: ObjectKey = "default/t1".parse()?;
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectKey {
    pub namespace: String,
    pub name: String,
}

impl ObjectKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid object key '{0}': expected <namespace>/<name>")]
pub struct ParseKeyError(String);

impl FromStr for ObjectKey {
    type Err = ParseKeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('/') {
            Some((ns, name)) if !ns.is_empty() && !name.is_empty() && !name.contains('/') => {
                Ok(Self::new(ns, name))
            }
            _ => Err(ParseKeyError(s.to_string())),
        }
    }
}
