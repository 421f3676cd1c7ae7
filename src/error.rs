//! Error taxonomy shared by fetching, parsing, importing and orchestration.
//!
//! Every variant renders a human-readable description through `Display` and,
//! where there is something the user can do about it, a recovery suggestion
//! through [`FeedError::recovery_suggestion`].

use thiserror::Error;

use crate::storage::DatabaseError;
use crate::sync::BatchRefreshResult;

/// Transport-level cause carried by [`FeedError::NetworkError`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetworkCause {
    /// The device has no usable network route.
    NotConnected,
    /// The host could not be resolved or reached.
    HostUnreachable(String),
    /// Any other transport fault.
    Other(String),
}

impl std::fmt::Display for NetworkCause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NetworkCause::NotConnected => write!(f, "not connected to the internet"),
            NetworkCause::HostUnreachable(detail) => write!(f, "host unreachable: {}", detail),
            NetworkCause::Other(detail) => write!(f, "{}", detail),
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum FeedError {
    #[error("The feed URL is invalid")]
    InvalidUrl,

    #[error("The document is not a valid RSS or Atom feed")]
    InvalidFeedFormat,

    #[error("Failed to parse feed: {0}")]
    ParsingError(String),

    #[error("The connection timed out")]
    ConnectionTimeout,

    #[error("Server returned HTTP status {0}")]
    ServerError(u16),

    #[error("The server returned an empty response")]
    EmptyResponse,

    #[error("The feed uses an unsupported text encoding")]
    UnsupportedEncoding,

    #[error("Network error: {0}")]
    NetworkError(NetworkCause),

    #[error("No network connection is available")]
    NetworkUnavailable,

    #[error("There are no active feeds to refresh")]
    NoActiveFeeds,

    #[error("{failed} of {total} feeds failed to refresh")]
    PartialFailure { failed: usize, total: usize },

    #[error("All feeds failed to refresh: {0}")]
    CompleteFailure(String),

    #[error("A refresh is already running")]
    AlreadyRunning,

    /// Work was abandoned because its deadline passed or the host preempted it.
    #[error("The refresh was cancelled before it finished")]
    Cancelled,

    /// The storage collaborator rejected the import unit.
    #[error("Storage error: {0}")]
    Storage(String),
}

impl FeedError {
    /// A short hint for the user, if there is an obvious next step.
    pub fn recovery_suggestion(&self) -> Option<&'static str> {
        match self {
            FeedError::InvalidUrl => Some("Check that the address starts with http:// or https://."),
            FeedError::InvalidFeedFormat | FeedError::ParsingError(_) => {
                Some("Make sure the address points to an RSS or Atom feed.")
            }
            FeedError::ConnectionTimeout => Some("The server may be busy. Try again later."),
            FeedError::ServerError(code) if *code >= 500 => {
                Some("The server is having problems. Try again later.")
            }
            FeedError::ServerError(_) => Some("Check that the feed address is still valid."),
            FeedError::EmptyResponse => Some("The feed may be temporarily unavailable."),
            FeedError::UnsupportedEncoding => None,
            FeedError::NetworkError(_) | FeedError::NetworkUnavailable => {
                Some("Check your internet connection and try again.")
            }
            FeedError::NoActiveFeeds => Some("Subscribe to a feed or re-enable a paused one."),
            FeedError::PartialFailure { .. } | FeedError::CompleteFailure(_) => {
                Some("Pull to refresh again, or check the failing feeds.")
            }
            FeedError::AlreadyRunning => Some("Wait for the current refresh to finish."),
            FeedError::Cancelled => None,
            FeedError::Storage(_) => None,
        }
    }

    /// Whether the failure came from the network rather than the document.
    pub fn is_network(&self) -> bool {
        matches!(
            self,
            FeedError::ConnectionTimeout
                | FeedError::NetworkError(_)
                | FeedError::NetworkUnavailable
        )
    }
}

impl From<DatabaseError> for FeedError {
    fn from(err: DatabaseError) -> Self {
        FeedError::Storage(err.to_string())
    }
}

/// Aggregate failure of a batch refresh.
///
/// `PartialFailure` and `CompleteFailure` still carry the full per-feed
/// result so callers can report what did land.
#[derive(Debug, Error)]
#[error("{error}")]
pub struct BatchRefreshError {
    pub error: FeedError,
    pub result: Option<BatchRefreshResult>,
}

impl BatchRefreshError {
    pub(crate) fn new(error: FeedError) -> Self {
        Self {
            error,
            result: None,
        }
    }

    pub(crate) fn with_result(error: FeedError, result: BatchRefreshResult) -> Self {
        Self {
            error,
            result: Some(result),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_failure_message() {
        let err = FeedError::PartialFailure {
            failed: 2,
            total: 5,
        };
        assert_eq!(err.to_string(), "2 of 5 feeds failed to refresh");
        assert!(err.recovery_suggestion().is_some());
    }

    #[test]
    fn test_network_errors_suggest_connection_check() {
        let err = FeedError::NetworkError(NetworkCause::NotConnected);
        assert_eq!(
            err.to_string(),
            "Network error: not connected to the internet"
        );
        assert_eq!(
            err.recovery_suggestion(),
            Some("Check your internet connection and try again.")
        );
        assert!(err.is_network());
    }

    #[test]
    fn test_server_error_suggestion_depends_on_class() {
        assert_ne!(
            FeedError::ServerError(503).recovery_suggestion(),
            FeedError::ServerError(404).recovery_suggestion()
        );
    }

    #[test]
    fn test_database_error_maps_to_storage() {
        let err: FeedError = DatabaseError::FeedNotFound(7).into();
        assert!(matches!(err, FeedError::Storage(_)));
        assert!(err.to_string().contains('7'));
    }
}
