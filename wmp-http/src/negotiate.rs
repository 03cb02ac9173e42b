//! Session negotiation with a Web Monetization provider.
//!
//! A session is created with `POST {provider}/api/me/sessions` and the body
//! `{"targetPaymentPointer": "<pointer>"}`. How the streaming channel of the
//! new session is located depends on the provider's protocol revision, see
//! [`ChannelDiscovery`].

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use http::header::{CONTENT_TYPE, HeaderMap, HeaderValue, LINK, LOCATION};
use http::Method;
use reqwest::{Request, Response};
use serde::{Deserialize, Serialize};
use url::Url;
use wmp::PaymentTarget;

use crate::constants::{CHANNEL_REL, CHANNEL_SEGMENT, SESSIONS_PATH};
use crate::error::NegotiationError;
use crate::link::{find_rel, parse_link_header};
use crate::request::HttpRequester;

/// How the channel URL of a freshly created session is found.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum ChannelDiscovery {
    /// The creation response body is `{"sessionId": "<id>"}` and the channel
    /// lives at `{provider}/api/me/sessions/{id}/channel`.
    #[default]
    SessionBody,
    /// The creation response carries a `Location` header pointing at the
    /// session resource, whose `Link` header names the channel with
    /// `rel="channel"`.
    LocationLink,
}

impl ChannelDiscovery {
    /// Returns the kebab-case name used in configuration.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::SessionBody => "session-body",
            Self::LocationLink => "location-link",
        }
    }
}

impl fmt::Display for ChannelDiscovery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChannelDiscovery {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "session-body" => Ok(Self::SessionBody),
            "location-link" => Ok(Self::LocationLink),
            other => Err(format!(
                "unknown channel discovery '{other}', expected 'session-body' or 'location-link'"
            )),
        }
    }
}

/// Body of the session creation request.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SessionRequest<'a> {
    target_payment_pointer: &'a str,
}

/// Body of the session creation response under [`ChannelDiscovery::SessionBody`].
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionResponse {
    /// Identifier of the created session.
    pub session_id: String,
}

/// Negotiates sessions and resolves their channel URL.
#[derive(Debug, Clone)]
pub struct Negotiator {
    client: reqwest::Client,
    headers: HeaderMap,
    timeout: Option<Duration>,
    discovery: ChannelDiscovery,
}

impl Negotiator {
    /// Creates a negotiator sending requests through `client` by default.
    #[must_use]
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            headers: HeaderMap::new(),
            timeout: None,
            discovery: ChannelDiscovery::default(),
        }
    }

    /// Attaches headers to every negotiation request.
    #[must_use]
    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    /// Sets a timeout for every negotiation request.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Sets how the channel URL is located.
    #[must_use]
    pub const fn with_discovery(mut self, discovery: ChannelDiscovery) -> Self {
        self.discovery = discovery;
        self
    }

    /// Returns how the channel URL is located.
    #[must_use]
    pub const fn discovery(&self) -> ChannelDiscovery {
        self.discovery
    }

    /// Creates a session for `target` and returns its channel URL.
    ///
    /// Requests go through `requester` when given, otherwise through the
    /// negotiator's own client.
    ///
    /// # Errors
    ///
    /// Returns [`NegotiationError`] on transport failure, a non-2xx status,
    /// an unparsable body, or missing session/channel references.
    #[cfg_attr(
        feature = "telemetry",
        tracing::instrument(
            name = "wmp.client.negotiate",
            skip_all,
            fields(provider = %provider, pointer = %target, discovery = %self.discovery)
        )
    )]
    pub async fn negotiate(
        &self,
        provider: &Url,
        target: &PaymentTarget,
        requester: Option<&dyn HttpRequester>,
    ) -> Result<Url, NegotiationError> {
        const CONTEXT: &str = "POST /api/me/sessions";

        let requester: &dyn HttpRequester = requester.unwrap_or(&self.client);
        let sessions = sessions_url(provider)?;
        let body = serde_json::to_vec(&SessionRequest {
            target_payment_pointer: target.as_str(),
        })
        .map_err(|source| NegotiationError::Json {
            context: CONTEXT,
            source,
        })?;

        let mut request = self.request(Method::POST, sessions.clone());
        request
            .headers_mut()
            .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        *request.body_mut() = Some(body.into());

        let response = requester
            .execute(request)
            .await
            .map_err(|source| NegotiationError::Http {
                context: CONTEXT,
                source,
            })?;
        let response = ensure_success(response, CONTEXT).await?;

        match self.discovery {
            ChannelDiscovery::SessionBody => {
                let bytes =
                    response
                        .bytes()
                        .await
                        .map_err(|source| NegotiationError::ResponseBodyRead {
                            context: CONTEXT,
                            source,
                        })?;
                let session: SessionResponse =
                    serde_json::from_slice(&bytes).map_err(|source| NegotiationError::Json {
                        context: CONTEXT,
                        source,
                    })?;
                #[cfg(feature = "telemetry")]
                tracing::debug!(session_id = %session.session_id, "Session created");
                channel_url(provider, &session.session_id)
            }
            ChannelDiscovery::LocationLink => {
                let location = header_str(response.headers(), &LOCATION).map(str::to_owned);
                self.follow_location(&sessions, location.as_deref(), requester)
                    .await
            }
        }
    }

    /// Resolves the channel through the session resource's `Link` header.
    async fn follow_location(
        &self,
        sessions: &Url,
        location: Option<&str>,
        requester: &dyn HttpRequester,
    ) -> Result<Url, NegotiationError> {
        const CONTEXT: &str = "GET session resource";

        let location = location.ok_or(NegotiationError::MissingHeader {
            context: "POST /api/me/sessions",
            header: "Location",
        })?;
        let session_url = sessions
            .join(location)
            .map_err(|source| NegotiationError::UrlParse {
                context: "Failed to resolve Location header",
                source,
            })?;
        #[cfg(feature = "telemetry")]
        tracing::debug!(session = %session_url, "Session created, following Location");

        let response = requester
            .execute(self.request(Method::GET, session_url.clone()))
            .await
            .map_err(|source| NegotiationError::Http {
                context: CONTEXT,
                source,
            })?;
        let response = ensure_success(response, CONTEXT).await?;

        let link = header_str(response.headers(), &LINK).ok_or(NegotiationError::MissingHeader {
            context: CONTEXT,
            header: "Link",
        })?;
        let links = parse_link_header(link)?;
        let channel =
            find_rel(&links, CHANNEL_REL).ok_or_else(|| NegotiationError::MissingChannelLink {
                url: session_url.to_string(),
            })?;
        session_url
            .join(&channel.uri)
            .map_err(|source| NegotiationError::UrlParse {
                context: "Failed to resolve channel link",
                source,
            })
    }

    fn request(&self, method: Method, url: Url) -> Request {
        let mut request = Request::new(method, url);
        request.headers_mut().extend(self.headers.clone());
        if let Some(timeout) = self.timeout {
            *request.timeout_mut() = Some(timeout);
        }
        request
    }
}

/// Parses a provider base URL.
///
/// # Errors
///
/// Returns [`NegotiationError::UrlParse`] if `provider` is not an absolute URL.
pub fn parse_provider_url(provider: &str) -> Result<Url, NegotiationError> {
    Url::parse(provider.trim()).map_err(|source| NegotiationError::UrlParse {
        context: "Failed to parse provider URL",
        source,
    })
}

/// Returns `{provider}/api/me/sessions`.
///
/// # Errors
///
/// Returns [`NegotiationError::CannotBeABase`] for URLs without a path, such
/// as `mailto:` URLs.
pub fn sessions_url(provider: &Url) -> Result<Url, NegotiationError> {
    provider_path(provider, &SESSIONS_PATH)
}

/// Returns `{provider}/api/me/sessions/{session_id}/channel`.
///
/// The session id is percent-encoded as a single path segment.
///
/// # Errors
///
/// Returns [`NegotiationError::CannotBeABase`] for URLs without a path.
pub fn channel_url(provider: &Url, session_id: &str) -> Result<Url, NegotiationError> {
    let [api, me, sessions] = SESSIONS_PATH;
    provider_path(provider, &[api, me, sessions, session_id, CHANNEL_SEGMENT])
}

fn provider_path(provider: &Url, segments: &[&str]) -> Result<Url, NegotiationError> {
    let mut url = provider.clone();
    url.set_query(None);
    url.set_fragment(None);
    url.path_segments_mut()
        .map_err(|()| NegotiationError::CannotBeABase {
            url: provider.to_string(),
        })?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

fn header_str<'a>(headers: &'a HeaderMap, name: &http::header::HeaderName) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}

async fn ensure_success(
    response: Response,
    context: &'static str,
) -> Result<Response, NegotiationError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response
        .text()
        .await
        .map_err(|source| NegotiationError::ResponseBodyRead { context, source })?;
    Err(NegotiationError::HttpStatus {
        context,
        status,
        body,
    })
}
