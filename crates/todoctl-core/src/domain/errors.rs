//! Errors - エラー型と分類
//!
//! Each layer owns one enum. `ErrorKind` is the operational classification
//! the dispatcher uses to pick a recovery path.

use thiserror::Error;

use super::{ObjectKey, ResourceKind};

/// ErrorKind は実行エラーの分類
///
/// - NotFound: object vanished; treated as success, never retried
/// - Transient: store failure; retried with exponential backoff
/// - Conflict: concurrent modification; retried immediately
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Transient,
    Conflict,
}

/// Failures reported by a `ResourceStore`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("{kind} {key} not found")]
    NotFound { kind: ResourceKind, key: ObjectKey },

    #[error("conflict updating {key}: expected resource version {expected}, found {actual}")]
    Conflict {
        key: ObjectKey,
        expected: u64,
        actual: u64,
    },

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            StoreError::NotFound { .. } => ErrorKind::NotFound,
            StoreError::Conflict { .. } => ErrorKind::Conflict,
            StoreError::Unavailable(_) => ErrorKind::Transient,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }
}

/// Failures reported by an `EventBus` when registering a watch.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WatchError {
    #[error("watch for {0} rejected: {1}")]
    Rejected(ResourceKind, String),

    #[error("event bus closed")]
    Closed,
}

/// Failure of a single reconciliation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReconcileError {
    #[error("failed to fetch {key}: {source}")]
    Fetch { key: ObjectKey, source: StoreError },

    #[error("failed to list pods for {key}: {source}")]
    ListPods { key: ObjectKey, source: StoreError },

    #[error("failed to update status of {key}: {source}")]
    UpdateStatus { key: ObjectKey, source: StoreError },
}

impl ReconcileError {
    pub fn kind(&self) -> ErrorKind {
        self.source_error().kind()
    }

    pub fn source_error(&self) -> &StoreError {
        match self {
            ReconcileError::Fetch { source, .. }
            | ReconcileError::ListPods { source, .. }
            | ReconcileError::UpdateStatus { source, .. } => source,
        }
    }
}

/// Errors surfaced to the process owner. Not retried internally.
#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("fatal configuration error: {0}")]
    FatalConfiguration(#[from] WatchError),

    #[error("controller task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> ObjectKey {
        ObjectKey::new("default", "t1")
    }

    #[test]
    fn store_errors_are_classified() {
        let not_found = StoreError::NotFound {
            kind: ResourceKind::TodoList,
            key: key(),
        };
        let conflict = StoreError::Conflict {
            key: key(),
            expected: 1,
            actual: 2,
        };
        let unavailable = StoreError::Unavailable("boom".into());

        assert_eq!(not_found.kind(), ErrorKind::NotFound);
        assert_eq!(conflict.kind(), ErrorKind::Conflict);
        assert_eq!(unavailable.kind(), ErrorKind::Transient);
    }

    #[test]
    fn reconcile_error_inherits_kind_from_store() {
        let err = ReconcileError::UpdateStatus {
            key: key(),
            source: StoreError::Conflict {
                key: key(),
                expected: 3,
                actual: 4,
            },
        };
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert!(err.to_string().contains("default/t1"));
    }
}
