pub mod change;
pub mod query;
pub mod task;

pub use change::{ChangeRecord, ChangeType, RemoteChange, RemoteEvent};
pub use query::{ListParams, QueryDescriptor, SortKey, StatusFilter};
pub use task::{validate_title, NewTask, Task, TaskCounts, TaskPatch};
