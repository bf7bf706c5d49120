//! Failure taxonomy for tool invocations.

use std::fmt;
use std::time::Duration;

/// Why an invocation did not produce a result.
///
/// Every variant is terminal for the call; the bridge never retries.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    /// Rejected before any process was spawned.
    #[error("invalid invocation: {0}")]
    Invocation(String),

    #[error("failed to spawn helper `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// Helper exited (non-zero or by signal) without a correlated response.
    #[error("helper exited with {} before responding{}", ExitCode(.code), stderr_suffix(.stderr))]
    ProcessExit { code: Option<i32>, stderr: String },

    /// Deadline elapsed; the helper has been killed.
    #[error("helper did not respond within {} ms", .timeout.as_millis())]
    Timeout { timeout: Duration },

    /// Helper answered with a JSON-RPC error object.
    #[error("tool error {code}: {message}")]
    Tool {
        code: i64,
        message: String,
        data: Option<serde_json::Value>,
    },

    /// Output closed cleanly without ever containing a correlated response.
    #[error("{message}{}", stderr_suffix(.stderr))]
    Protocol { message: String, stderr: String },
}

/// Coarse classification used at the HTTP boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    Invocation,
    Spawn,
    ProcessExit,
    Timeout,
    Tool,
    Protocol,
}

impl FailureKind {
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Invocation => "invocation_error",
            Self::Spawn => "spawn_error",
            Self::ProcessExit => "process_exit",
            Self::Timeout => "timeout",
            Self::Tool => "tool_error",
            Self::Protocol => "protocol_error",
        }
    }
}

impl BridgeError {
    #[must_use]
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Invocation(_) => FailureKind::Invocation,
            Self::Spawn { .. } => FailureKind::Spawn,
            Self::ProcessExit { .. } => FailureKind::ProcessExit,
            Self::Timeout { .. } => FailureKind::Timeout,
            Self::Tool { .. } => FailureKind::Tool,
            Self::Protocol { .. } => FailureKind::Protocol,
        }
    }

    /// Whether a caller-side retry could plausibly succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self.kind(),
            FailureKind::Timeout | FailureKind::ProcessExit | FailureKind::Spawn
        )
    }

    /// Status code the route layer should answer with.
    #[must_use]
    pub fn http_status(&self) -> u16 {
        match self.kind() {
            FailureKind::Invocation => 400,
            FailureKind::Tool => 422,
            FailureKind::Timeout => 504,
            FailureKind::Spawn | FailureKind::ProcessExit | FailureKind::Protocol => 502,
        }
    }

    /// Captured helper stderr, when the failure carries any.
    #[must_use]
    pub fn stderr(&self) -> Option<&str> {
        match self {
            Self::ProcessExit { stderr, .. } | Self::Protocol { stderr, .. }
                if !stderr.is_empty() =>
            {
                Some(stderr.as_str())
            }
            _ => None,
        }
    }
}

struct ExitCode<'a>(&'a Option<i32>);

impl fmt::Display for ExitCode<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(code) => write!(f, "code {code}"),
            None => f.write_str("a signal"),
        }
    }
}

fn stderr_suffix(stderr: &str) -> String {
    let trimmed = stderr.trim();
    if trimmed.is_empty() {
        String::new()
    } else {
        format!(": {trimmed}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_process_exit_message_includes_code_and_stderr() {
        let err = BridgeError::ProcessExit {
            code: Some(1),
            stderr: "TypeError: x is undefined\n".into(),
        };
        assert_eq!(
            err.to_string(),
            "helper exited with code 1 before responding: TypeError: x is undefined"
        );
    }

    #[test]
    fn test_process_exit_by_signal() {
        let err = BridgeError::ProcessExit {
            code: None,
            stderr: String::new(),
        };
        assert_eq!(err.to_string(), "helper exited with a signal before responding");
        assert_eq!(err.stderr(), None);
    }

    #[test]
    fn test_timeout_message() {
        let err = BridgeError::Timeout {
            timeout: Duration::from_millis(50),
        };
        assert_eq!(err.to_string(), "helper did not respond within 50 ms");
    }

    #[test]
    fn test_tool_error_message() {
        let err = BridgeError::Tool {
            code: 400,
            message: "bad input".into(),
            data: None,
        };
        assert_eq!(err.to_string(), "tool error 400: bad input");
    }

    #[test]
    fn test_transient_classification() {
        let timeout = BridgeError::Timeout {
            timeout: Duration::from_secs(1),
        };
        let exit = BridgeError::ProcessExit {
            code: Some(2),
            stderr: String::new(),
        };
        let tool = BridgeError::Tool {
            code: 1,
            message: String::new(),
            data: None,
        };
        assert!(timeout.is_transient());
        assert!(exit.is_transient());
        assert!(!tool.is_transient());
        assert!(!BridgeError::Invocation("x".into()).is_transient());
    }

    #[test]
    fn test_http_status_mapping() {
        assert_eq!(BridgeError::Invocation("x".into()).http_status(), 400);
        assert_eq!(
            BridgeError::Timeout {
                timeout: Duration::from_secs(1)
            }
            .http_status(),
            504
        );
        assert_eq!(
            BridgeError::Protocol {
                message: "no response".into(),
                stderr: String::new(),
            }
            .http_status(),
            502
        );
        assert_eq!(
            BridgeError::Spawn {
                program: "node".into(),
                source: std::io::Error::from(std::io::ErrorKind::NotFound),
            }
            .http_status(),
            502
        );
    }
}
