pub mod api;
pub mod config;
pub mod constants;
pub mod error;
pub mod models;
pub mod realtime;
pub mod remote;
pub mod runtime;
pub mod stats;
pub mod store;
pub mod tracing_setup;

// Re-export the types most callers need at crate root for convenience
pub use error::{TaskError, TaskResult};
pub use models::{NewTask, QueryDescriptor, RemoteEvent, SortKey, StatusFilter, Task, TaskPatch};
pub use runtime::{TaskHandle, TaskRuntime};
