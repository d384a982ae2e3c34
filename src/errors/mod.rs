/*
* Clone Manager Error Taxonomy
* ----------------------------
* @project: vm-clone-manager
*
* Everything that can go sideways between "please clone db1" and "here is your
* shiny new VM" ends up in one of the variants below.
*
* Error Classes:
* ------------
* 1. Identity errors (NotFound, Ambiguous) - the name didn't point at exactly
*    one VM. Never retried, asking again won't change the answer.
* 2. Transport errors - HTTP said no (connection reset, 5xx, timeouts).
*    The only class the task poller retries.
* 3. Task errors (TaskFailed) - the cluster accepted the work and then
*    reported a terminal failure with its own error code.
* 4. Budget errors (PollingExhausted, Timeout, Cancelled) - we gave up
*    waiting, either because the wire kept failing, the clock ran out, or
*    somebody hit Ctrl-C.
*/

pub mod handlers;

use std::time::Duration;
use thiserror::Error;

pub use handlers::RetryPolicy;

#[derive(Error, Debug)]
pub enum CloneError {
    #[error("no VM named '{name}' was found")]
    NotFound { name: String },

    #[error("VM name '{name}' is not unique ({count} matches)")]
    Ambiguous { name: String, count: usize },

    #[error("transport error: {message}")]
    Transport {
        message: String,
        status: Option<u16>,
    },

    #[error("task {task_id} failed: {code}: {detail}")]
    TaskFailed {
        task_id: String,
        code: String,
        detail: String,
    },

    #[error("gave up polling task {task_id} after {attempts} failed attempts: {last_error}")]
    PollingExhausted {
        task_id: String,
        attempts: u32,
        last_error: String,
    },

    #[error("task {task_id} did not finish within {waited:?}")]
    Timeout { task_id: String, waited: Duration },

    #[error("operation cancelled while waiting on {what}")]
    Cancelled { what: String },

    #[error("unexpected response from management API: {0}")]
    InvalidResponse(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl CloneError {
    pub fn transport(message: impl Into<String>) -> Self {
        CloneError::Transport {
            message: message.into(),
            status: None,
        }
    }

    /// Short, stable label printed by the CLI in front of the message.
    pub fn kind(&self) -> &'static str {
        match self {
            CloneError::NotFound { .. } => "NotFound",
            CloneError::Ambiguous { .. } => "Ambiguous",
            CloneError::Transport { .. } => "TransportError",
            CloneError::TaskFailed { .. } => "TaskFailed",
            CloneError::PollingExhausted { .. } => "PollingExhausted",
            CloneError::Timeout { .. } => "Timeout",
            CloneError::Cancelled { .. } => "Cancelled",
            CloneError::InvalidResponse(_) => "InvalidResponse",
            CloneError::Config(_) => "ConfigError",
        }
    }

    /// Only HTTP-layer failures are worth asking again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, CloneError::Transport { .. })
    }
}

impl From<reqwest::Error> for CloneError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            return CloneError::InvalidResponse(err.to_string());
        }
        CloneError::Transport {
            status: err.status().map(|s| s.as_u16()),
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for CloneError {
    fn from(err: serde_json::Error) -> Self {
        CloneError::InvalidResponse(err.to_string())
    }
}

impl From<::config::ConfigError> for CloneError {
    fn from(err: ::config::ConfigError) -> Self {
        CloneError::Config(err.to_string())
    }
}

// Result type alias for convenience
pub type CloneResult<T> = Result<T, CloneError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transport_errors_are_retryable() {
        assert!(CloneError::transport("connection reset").is_retryable());
        assert!(!CloneError::NotFound { name: "db1".into() }.is_retryable());
        assert!(!CloneError::TaskFailed {
            task_id: "t1".into(),
            code: "kInvalidArgument".into(),
            detail: "bad spec".into(),
        }
        .is_retryable());
        assert!(!CloneError::InvalidResponse("garbage".into()).is_retryable());
    }

    #[test]
    fn kind_labels_match_taxonomy() {
        assert_eq!(
            CloneError::Ambiguous { name: "x".into(), count: 2 }.kind(),
            "Ambiguous"
        );
        assert_eq!(
            CloneError::Timeout { task_id: "t".into(), waited: Duration::from_secs(1) }.kind(),
            "Timeout"
        );
        assert_eq!(CloneError::Cancelled { what: "t".into() }.kind(), "Cancelled");
    }

    #[test]
    fn task_failure_message_carries_code_and_detail() {
        let err = CloneError::TaskFailed {
            task_id: "abc".into(),
            code: "kNoSpace".into(),
            detail: "container full".into(),
        };
        assert_eq!(err.to_string(), "task abc failed: kNoSpace: container full");
    }
}
