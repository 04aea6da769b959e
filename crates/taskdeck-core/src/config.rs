use std::time::Duration;

use crate::constants::{DEFAULT_API_URL, IDLE_EVICTION, STALE_TIME};

/// Client-side settings for a [`TaskRuntime`](crate::runtime::TaskRuntime).
#[derive(Debug, Clone)]
pub struct CoreConfig {
    /// REST backend base URL
    pub api_url: String,
    /// Session access token, sent as a bearer credential
    pub token: Option<String>,
    /// Transport timeout for each request. `None` keeps reqwest's default.
    pub request_timeout: Option<Duration>,
    /// How long a fetched view is served without re-fetching
    pub stale_time: Duration,
    /// How long an unread view is kept before eviction
    pub idle_eviction: Duration,
}

impl CoreConfig {
    pub fn new(api_url: impl Into<String>, token: Option<String>) -> Self {
        Self {
            api_url: api_url.into(),
            token,
            ..Self::default()
        }
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            token: None,
            request_timeout: None,
            stale_time: STALE_TIME,
            idle_eviction: IDLE_EVICTION,
        }
    }
}
