//! Application-wide constants
//!
//! Centralized location for limits and defaults that are shared between the
//! client runtime, the HTTP server and the CLI.

use std::time::Duration;

/// Maximum task title length, counted in characters after trimming.
pub const MAX_TITLE_LENGTH: usize = 200;

/// Name of the task table in the remote store.
pub const TASKS_TABLE: &str = "tasks";

/// Default REST backend the client talks to.
pub const DEFAULT_API_URL: &str = "http://localhost:3000";

/// Default port for the REST backend.
pub const DEFAULT_PORT: u16 = 3000;

/// Origins allowed by CORS when none are configured.
pub const DEFAULT_ALLOWED_ORIGINS: [&str; 2] = ["http://localhost:5173", "http://localhost:3000"];

// Cache windows
/// A cached view younger than this is served without a network round trip.
pub const STALE_TIME: Duration = Duration::from_secs(5 * 60);

/// A cached view not read for this long is evicted.
pub const IDLE_EVICTION: Duration = Duration::from_secs(10 * 60);

/// Capacity of the channel between a change feed and the event pump.
pub const FEED_CHANNEL_CAPACITY: usize = 256;
