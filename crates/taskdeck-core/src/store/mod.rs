//! Client-side task cache and the reconciler that keeps it consistent with
//! the remote store.

pub mod keyed_lock;
pub mod reconciler;
pub mod task_cache;

pub use keyed_lock::{KeyedGuard, KeyedLocks};
pub use reconciler::{MergedChange, Reconciler};
pub use task_cache::{CachedView, FetchTicket, MergeOutcome, MutationKind, MutationToken, TaskCache};
