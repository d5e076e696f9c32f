//! Error types for peer discovery.

use std::fmt;
use std::time::Duration;

/// Result type alias for discovery operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during discovery.
#[derive(Debug)]
pub enum Error {
    /// The directory could not be queried (network, auth, bad response).
    Directory(String),

    /// A single directory attempt exceeded its deadline.
    Timeout {
        /// Operation that timed out.
        operation: String,
        /// Deadline that was exceeded.
        after: Duration,
    },

    /// Every retry attempt failed.
    RetriesExhausted {
        /// Operation that was retried.
        operation: String,
        /// Number of attempts made.
        attempts: u32,
        /// Sleep between attempts.
        delay: Duration,
        /// The last failure observed.
        last: Box<Error>,
    },

    /// The operation was cancelled by a shutdown request.
    Cancelled,

    /// The discovery engine has been shut down.
    Shutdown,

    /// Configuration error.
    Config(String),

    /// Failed to decode a directory response.
    Decode(String),

    /// No async runtime was available to drive background tasks.
    Runtime(String),

    /// Generic IO error.
    Io(std::io::Error),
}

impl Error {
    /// Whether retrying the same operation may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::Directory(_) | Error::Timeout { .. } | Error::Io(_)
        )
    }

    /// Whether this error represents a cancellation rather than a failure.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled | Error::Shutdown)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Directory(msg) => {
                write!(f, "directory query failed: {}", msg)
            }
            Error::Timeout { operation, after } => {
                write!(f, "{} timed out after {}ms", operation, after.as_millis())
            }
            Error::RetriesExhausted {
                operation,
                attempts,
                delay,
                last,
            } => {
                write!(
                    f,
                    "{} attempt(s) with a {}ms sleep to execute [{}] failed; last failure was [{}]",
                    attempts,
                    delay.as_millis(),
                    operation,
                    last
                )
            }
            Error::Cancelled => {
                write!(f, "operation cancelled")
            }
            Error::Shutdown => {
                write!(f, "discovery has been shut down")
            }
            Error::Config(msg) => {
                write!(f, "configuration error: {}", msg)
            }
            Error::Decode(msg) => {
                write!(f, "failed to decode directory response: {}", msg)
            }
            Error::Runtime(msg) => {
                write!(f, "runtime error: {}", msg)
            }
            Error::Io(err) => {
                write!(f, "IO error: {}", err)
            }
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(err) => Some(err),
            Error::RetriesExhausted { last, .. } => Some(last.as_ref()),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err)
    }
}

#[cfg(feature = "kube")]
impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Decode(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::RetriesExhausted {
            operation: "list_peers".to_string(),
            attempts: 3,
            delay: Duration::from_millis(1000),
            last: Box::new(Error::Directory("connection refused".into())),
        };
        let msg = err.to_string();
        assert!(msg.contains("3 attempt(s)"));
        assert!(msg.contains("1000ms"));
        assert!(msg.contains("connection refused"));
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::Other, "test error");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
        assert!(err.is_transient());
    }

    #[test]
    fn test_error_source_chain() {
        use std::error::Error as _;

        let err = Error::RetriesExhausted {
            operation: "list_peers".to_string(),
            attempts: 1,
            delay: Duration::ZERO,
            last: Box::new(Error::Directory("boom".into())),
        };
        let source = err.source().expect("source");
        assert!(source.to_string().contains("boom"));
    }

    #[test]
    fn test_classification() {
        assert!(Error::Cancelled.is_cancelled());
        assert!(Error::Shutdown.is_cancelled());
        assert!(!Error::Config("x".into()).is_transient());
        assert!(Error::Timeout {
            operation: "list_peers".into(),
            after: Duration::from_secs(1)
        }
        .is_transient());
    }
}
