use std::error::Error as StdError;
use std::time::Duration;

use futures::StreamExt;

use crate::error::{FeedError, NetworkCause};
use crate::feed::parser::{parse_channel, Channel};
use crate::util::validate_url;

/// Default limit on feed bodies (10MB)
pub const DEFAULT_MAX_FEED_BYTES: usize = 10 * 1024 * 1024;

/// Timeouts and limits for feed retrieval.
#[derive(Debug, Clone)]
pub struct FetchOptions {
    /// Time allowed to connect and receive response headers
    pub connect_timeout: Duration,
    /// Time allowed for the whole request, body included
    pub request_timeout: Duration,
    /// Bodies larger than this are rejected
    pub max_bytes: usize,
    pub user_agent: String,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(30),
            request_timeout: Duration::from_secs(60),
            max_bytes: DEFAULT_MAX_FEED_BYTES,
            user_agent: concat!("feedsync/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

/// HTTP retrieval of feed documents.
///
/// Performs exactly one GET per call. There are no automatic retries:
/// retrying is always a caller decision (manual refresh or the next
/// scheduled cycle).
#[derive(Clone)]
pub struct FetchClient {
    client: reqwest::Client,
    options: FetchOptions,
}

impl FetchClient {
    /// Builds a client with the given timeouts.
    ///
    /// # Errors
    ///
    /// Returns [`FeedError::NetworkError`] if the TLS backend cannot be
    /// initialized.
    pub fn new(options: FetchOptions) -> Result<Self, FeedError> {
        let client = reqwest::Client::builder()
            .connect_timeout(options.connect_timeout)
            .timeout(options.request_timeout)
            .user_agent(options.user_agent.clone())
            .build()
            .map_err(|e| FeedError::NetworkError(NetworkCause::Other(e.to_string())))?;
        Ok(Self { client, options })
    }

    /// Fetches the raw document at `url`.
    ///
    /// # Errors
    ///
    /// - [`FeedError::InvalidUrl`] - not an http(s) URL with a host
    /// - [`FeedError::ConnectionTimeout`] - no response within the connect timeout,
    ///   or the body did not arrive within the request timeout
    /// - [`FeedError::ServerError`] - non-2xx status
    /// - [`FeedError::EmptyResponse`] - 2xx with an empty body
    /// - [`FeedError::NetworkError`] - any other transport fault
    pub async fn fetch(&self, url: &str) -> Result<Vec<u8>, FeedError> {
        let url = validate_url(url).map_err(|e| {
            tracing::debug!(url = %url, error = %e, "Rejected feed URL");
            FeedError::InvalidUrl
        })?;

        let response = tokio::time::timeout(
            self.options.connect_timeout,
            self.client.get(url.clone()).send(),
        )
        .await
        .map_err(|_| FeedError::ConnectionTimeout)?
        .map_err(|e| map_transport_error(&e))?;

        let status = response.status();
        if !status.is_success() {
            tracing::debug!(url = %url, status = %status, "Feed request returned error status");
            return Err(FeedError::ServerError(status.as_u16()));
        }

        let bytes = read_limited_bytes(response, self.options.max_bytes).await?;
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Err(FeedError::EmptyResponse);
        }

        Ok(bytes)
    }

    /// Fetches and parses the document at `url`.
    pub async fn fetch_channel(&self, url: &str) -> Result<Channel, FeedError> {
        let bytes = self.fetch(url).await?;
        parse_channel(&bytes)
    }
}

async fn read_limited_bytes(response: reqwest::Response, limit: usize) -> Result<Vec<u8>, FeedError> {
    let expected_length = response.content_length();

    // Fast path: check Content-Length header
    if let Some(len) = expected_length {
        if len > limit as u64 {
            return Err(too_large(limit));
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| map_transport_error(&e))?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(too_large(limit));
        }
        bytes.extend_from_slice(&chunk);
    }

    if let Some(expected) = expected_length {
        if (bytes.len() as u64) < expected {
            return Err(FeedError::NetworkError(NetworkCause::Other(format!(
                "incomplete response: expected {} bytes, received {}",
                expected,
                bytes.len()
            ))));
        }
    }

    Ok(bytes)
}

fn too_large(limit: usize) -> FeedError {
    FeedError::NetworkError(NetworkCause::Other(format!(
        "response exceeds the {} byte limit",
        limit
    )))
}

/// Maps a transport failure onto the fetch error taxonomy.
fn map_transport_error(err: &reqwest::Error) -> FeedError {
    if err.is_timeout() {
        return FeedError::ConnectionTimeout;
    }

    let mut source: Option<&(dyn StdError + 'static)> = err.source();
    while let Some(cause) = source {
        if let Some(io) = cause.downcast_ref::<std::io::Error>() {
            match io.kind() {
                std::io::ErrorKind::TimedOut => return FeedError::ConnectionTimeout,
                std::io::ErrorKind::NetworkUnreachable | std::io::ErrorKind::NetworkDown => {
                    return FeedError::NetworkError(NetworkCause::NotConnected)
                }
                std::io::ErrorKind::HostUnreachable
                | std::io::ErrorKind::ConnectionRefused
                | std::io::ErrorKind::AddrNotAvailable => {
                    return FeedError::NetworkError(NetworkCause::HostUnreachable(
                        io.to_string(),
                    ))
                }
                _ => {}
            }
        }
        source = cause.source();
    }

    let message = full_message(err);
    if err.is_connect() {
        let lower = message.to_lowercase();
        if lower.contains("dns") || lower.contains("resolve") || lower.contains("lookup") {
            return FeedError::NetworkError(NetworkCause::HostUnreachable(message));
        }
    }

    FeedError::NetworkError(NetworkCause::Other(message))
}

/// Joins an error with its sources; reqwest's top-level message alone is vague.
fn full_message(err: &reqwest::Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}
