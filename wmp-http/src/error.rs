//! Error types for session negotiation and streaming.

use http::StatusCode;

/// Errors that can occur while negotiating a session with a provider.
///
/// [`WmpClient::setup_payment`](crate::WmpClient::setup_payment) logs and
/// swallows these; [`Negotiator::negotiate`](crate::Negotiator::negotiate),
/// reachable through [`WmpClient::negotiator`](crate::WmpClient::negotiator),
/// returns them.
#[derive(Debug, thiserror::Error)]
pub enum NegotiationError {
    /// URL parse error.
    #[error("URL parse error: {context}: {source}")]
    UrlParse {
        /// Human-readable context.
        context: &'static str,
        /// The underlying parse error.
        #[source]
        source: url::ParseError,
    },
    /// The provider URL cannot carry a path.
    #[error("Provider URL cannot be a base: {url}")]
    CannotBeABase {
        /// The offending URL.
        url: String,
    },
    /// HTTP transport error.
    #[error("HTTP error: {context}: {source}")]
    Http {
        /// Human-readable context.
        context: &'static str,
        /// The underlying request error.
        #[source]
        source: reqwest_middleware::Error,
    },
    /// Unexpected HTTP status code.
    #[error("Unexpected HTTP status {status}: {context}: {body}")]
    HttpStatus {
        /// Human-readable context.
        context: &'static str,
        /// The HTTP status code.
        status: StatusCode,
        /// The response body.
        body: String,
    },
    /// Failed to read the response body.
    #[error("Failed to read response body: {context}: {source}")]
    ResponseBodyRead {
        /// Human-readable context.
        context: &'static str,
        /// The underlying reqwest error.
        #[source]
        source: reqwest::Error,
    },
    /// JSON serialization or deserialization error.
    #[error("JSON error: {context}: {source}")]
    Json {
        /// Human-readable context.
        context: &'static str,
        /// The underlying serde error.
        #[source]
        source: serde_json::Error,
    },
    /// A required response header was absent or not valid UTF-8.
    #[error("Missing or invalid {header} header: {context}")]
    MissingHeader {
        /// Human-readable context.
        context: &'static str,
        /// The header name.
        header: &'static str,
    },
    /// The `Link` header could not be parsed.
    #[error("{0}")]
    Link(#[from] LinkParseError),
    /// The session resource advertised no channel link.
    #[error("No rel=\"channel\" link on session resource {url}")]
    MissingChannelLink {
        /// URL of the session resource.
        url: String,
    },
}

/// Errors raised inside a channel transport.
///
/// Transports report these through logging; the listener observes them as a
/// regular close.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    /// The channel URL has a scheme the transport cannot map.
    #[error("Unsupported channel URL scheme '{scheme}': {url}")]
    UnsupportedScheme {
        /// The scheme of the URL.
        scheme: String,
        /// The full URL.
        url: String,
    },
    /// Connecting the WebSocket failed.
    #[error("WebSocket connect to {url} failed: {source}")]
    Connect {
        /// The channel URL.
        url: String,
        /// The underlying WebSocket error.
        #[source]
        source: tokio_tungstenite::tungstenite::Error,
    },
    /// Reading from or writing to the WebSocket failed.
    #[error("WebSocket I/O error: {0}")]
    Io(#[from] tokio_tungstenite::tungstenite::Error),
}

/// A `Link` header that does not follow the `<uri>; param=value` grammar.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Malformed Link header ({reason}): {header}")]
pub struct LinkParseError {
    /// What was wrong.
    pub reason: &'static str,
    /// The raw header value.
    pub header: String,
}

impl LinkParseError {
    pub(crate) fn new(reason: &'static str, header: &str) -> Self {
        Self {
            reason,
            header: header.to_owned(),
        }
    }
}
