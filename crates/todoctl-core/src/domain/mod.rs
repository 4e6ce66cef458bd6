//! Domain model (identities, resources, events, outcomes, errors).

pub mod errors;
pub mod events;
pub mod ids;
pub mod outcome;
pub mod pod;
pub mod resource;
pub mod todo_list;

pub use errors::{ControllerError, ErrorKind, ReconcileError, StoreError, WatchError};
pub use events::{ChangeType, Trigger, WatchEvent};
pub use ids::{ObjectKey, ParseKeyError};
pub use outcome::Action;
pub use pod::Pod;
pub use resource::{ObjectMeta, Resource, ResourceKind};
pub use todo_list::{TodoList, TodoListSpec, TodoListStatus};
