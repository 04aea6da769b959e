/// Every failure the task pipeline reports to its caller.
///
/// Nothing in the core retries on its own: a `Transport` error rolls back any
/// optimistic state and is handed straight back, and the caller decides
/// whether to re-attempt.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TaskError {
    /// A required field is missing or invalid. Raised before any network call.
    #[error("Invalid input: {0}")]
    Validation(String),

    /// Network or store failure.
    #[error("Transport error: {0}")]
    Transport(String),

    /// Missing or rejected identity. The UI boundary turns this into a
    /// redirect to the login flow.
    #[error("Not authenticated: {0}")]
    Auth(String),

    /// The targeted task does not exist (or is not visible to this user).
    #[error("Task not found: {0}")]
    NotFound(String),
}

pub type TaskResult<T> = Result<T, TaskError>;

impl TaskError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport(message.into())
    }

    pub fn is_auth(&self) -> bool {
        matches!(self, Self::Auth(_))
    }
}

impl From<reqwest::Error> for TaskError {
    fn from(err: reqwest::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

impl From<serde_json::Error> for TaskError {
    fn from(err: serde_json::Error) -> Self {
        Self::Transport(format!("malformed payload: {err}"))
    }
}
