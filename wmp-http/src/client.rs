//! The session client.
//!
//! [`WmpClient`] wires pointer discovery, the monetization state machine,
//! session negotiation and the streaming channel together. It owns at most
//! one channel at a time: a replacement always closes and drops the previous
//! handle before the new channel is created.

use std::fmt::{self, Debug};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use http::header::{AUTHORIZATION, HeaderMap, HeaderValue, InvalidHeaderValue};
use tokio::task::JoinHandle;
use url::Url;
use wmp::{
    CorrelationId, Document, MonetizationHandler, PointerDiscovery, UnconfiguredError,
    UnsupportedEnvironmentError,
};

use crate::channel::{ChannelHandle, ChannelListener, ChannelTransport, WebSocketTransport};
use crate::constants::DEFAULT_TIMEOUT;
use crate::negotiate::{ChannelDiscovery, Negotiator, parse_provider_url};
use crate::request::HttpRequester;

/// Configuration of a [`WmpClient`].
#[derive(Clone)]
pub struct ClientConfig {
    timeout: Duration,
    headers: HeaderMap,
    channel_discovery: ChannelDiscovery,
    http_client: Option<reqwest::Client>,
}

impl ClientConfig {
    /// Creates a configuration with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            headers: HeaderMap::new(),
            channel_discovery: ChannelDiscovery::default(),
            http_client: None,
        }
    }

    /// Sets the timeout of each negotiation request.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets headers sent with every negotiation request.
    #[must_use]
    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    /// Adds an `Authorization: Bearer <token>` header.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidHeaderValue`] if `token` contains characters not
    /// allowed in a header value.
    pub fn with_bearer(mut self, token: &str) -> Result<Self, InvalidHeaderValue> {
        let mut value = HeaderValue::from_str(&format!("Bearer {token}"))?;
        value.set_sensitive(true);
        self.headers.insert(AUTHORIZATION, value);
        Ok(self)
    }

    /// Sets how the channel of a new session is located.
    #[must_use]
    pub const fn with_channel_discovery(mut self, discovery: ChannelDiscovery) -> Self {
        self.channel_discovery = discovery;
        self
    }

    /// Uses a pre-configured HTTP client for negotiation.
    #[must_use]
    pub fn with_http_client(mut self, client: reqwest::Client) -> Self {
        self.http_client = Some(client);
        self
    }

    /// Returns the negotiation request timeout.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Returns the headers sent with every negotiation request.
    #[must_use]
    pub const fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Returns how the channel of a new session is located.
    #[must_use]
    pub const fn channel_discovery(&self) -> ChannelDiscovery {
        self.channel_discovery
    }

    fn negotiator(&self) -> Negotiator {
        Negotiator::new(self.http_client.clone().unwrap_or_default())
            .with_headers(self.headers.clone())
            .with_timeout(self.timeout)
            .with_discovery(self.channel_discovery)
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let header_names: Vec<_> = self.headers.keys().map(http::HeaderName::as_str).collect();
        f.debug_struct("ClientConfig")
            .field("timeout", &self.timeout)
            .field("headers", &header_names)
            .field("channel_discovery", &self.channel_discovery)
            .field("http_client", &self.http_client.is_some())
            .finish()
    }
}

/// The single channel owned by a client.
///
/// `generation` increases with every open; listener callbacks carry the
/// generation they were created for and are ignored once superseded.
#[derive(Default)]
struct ChannelSlot {
    generation: u64,
    handle: Option<Box<dyn ChannelHandle>>,
}

impl ChannelSlot {
    const fn is_current(&self, generation: u64) -> bool {
        self.generation == generation && self.handle.is_some()
    }
}

struct ClientInner {
    handler: Arc<MonetizationHandler>,
    negotiator: Negotiator,
    transport: Arc<dyn ChannelTransport>,
    channel: Mutex<ChannelSlot>,
}

impl ClientInner {
    fn slot(&self) -> MutexGuard<'_, ChannelSlot> {
        self.channel.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Opens the channel of a session negotiated for `expected`.
    ///
    /// Returns `false` without touching the current channel if the adopted
    /// target changed since negotiation started.
    fn open_channel(self: &Arc<Self>, url: Url, expected: Option<CorrelationId>) -> bool {
        let mut slot = self.slot();
        let current = self.handler.correlation_id();
        if current != expected {
            #[cfg(feature = "telemetry")]
            tracing::warn!(
                current = ?current,
                "Payment target changed during negotiation, discarding session"
            );
            return false;
        }
        if let Some(previous) = slot.handle.take() {
            previous.close();
            drop(previous);
            #[cfg(feature = "telemetry")]
            tracing::debug!("Closed previous channel");
            self.handler.fire_stopped(false);
        }
        slot.generation = slot.generation.wrapping_add(1);
        let listener = Arc::new(SessionListener {
            client: Arc::downgrade(self),
            generation: slot.generation,
        });
        #[cfg(feature = "telemetry")]
        tracing::info!(%url, generation = slot.generation, "Opening payment channel");
        slot.handle = Some(self.transport.open(url, listener));
        true
    }

    fn close_stream(&self) {
        let mut slot = self.slot();
        let Some(handle) = slot.handle.take() else {
            return;
        };
        handle.close();
        drop(handle);
        #[cfg(feature = "telemetry")]
        tracing::debug!(generation = slot.generation, "Payment channel closed");
        self.handler.fire_stopped(false);
    }

    fn on_open(&self, generation: u64) {
        let slot = self.slot();
        if !slot.is_current(generation) {
            #[cfg(feature = "telemetry")]
            tracing::debug!(generation, "Ignoring open of a superseded channel");
            return;
        }
        self.handler.fire_started();
    }

    fn on_message(&self, generation: u64, data: &str) {
        let slot = self.slot();
        if !slot.is_current(generation) {
            return;
        }
        #[cfg(feature = "telemetry")]
        if let Err(err) = self.handler.fire_progress(data) {
            tracing::warn!(error = %err, "Dropping malformed progress message");
        }
        #[cfg(not(feature = "telemetry"))]
        let _ = self.handler.fire_progress(data);
    }

    fn on_close(&self, generation: u64) {
        let mut slot = self.slot();
        if !slot.is_current(generation) {
            return;
        }
        let handle = slot.handle.take();
        #[cfg(feature = "telemetry")]
        tracing::debug!(generation, "Payment channel closed by transport");
        self.handler.fire_stopped(false);
        drop(slot);
        drop(handle);
    }
}

struct SessionListener {
    client: Weak<ClientInner>,
    generation: u64,
}

impl ChannelListener for SessionListener {
    fn on_open(&self) {
        if let Some(client) = self.client.upgrade() {
            client.on_open(self.generation);
        }
    }

    fn on_message(&self, data: &str) {
        if let Some(client) = self.client.upgrade() {
            client.on_message(self.generation, data);
        }
    }

    fn on_close(&self) {
        if let Some(client) = self.client.upgrade() {
            client.on_close(self.generation);
        }
    }
}

/// Web Monetization session client.
///
/// Creating a client starts pointer discovery on the document. Payment only
/// begins when [`setup_payment`](Self::setup_payment) is called.
///
/// Channel events are relayed into the [`MonetizationHandler`] while an
/// internal lock over the channel slot is held. A [`wmp::MonetizationHost`]
/// must therefore not call back into the client from `dispatch`.
pub struct WmpClient {
    inner: Arc<ClientInner>,
    discovery: PointerDiscovery,
}

impl WmpClient {
    /// Creates a client streaming over WebSocket.
    ///
    /// # Errors
    ///
    /// Returns [`UnsupportedEnvironmentError`] if the document exposes no
    /// monetization object.
    pub fn new(
        document: Arc<dyn Document>,
        config: ClientConfig,
    ) -> Result<Self, UnsupportedEnvironmentError> {
        Self::with_transport(document, config, Arc::new(WebSocketTransport::new()))
    }

    /// Creates a client streaming over the given transport.
    ///
    /// # Errors
    ///
    /// Returns [`UnsupportedEnvironmentError`] if the document exposes no
    /// monetization object.
    pub fn with_transport(
        document: Arc<dyn Document>,
        config: ClientConfig,
        transport: Arc<dyn ChannelTransport>,
    ) -> Result<Self, UnsupportedEnvironmentError> {
        let handler = Arc::new(MonetizationHandler::new(document.as_ref())?);
        let discovery = PointerDiscovery::start(document, Arc::clone(&handler));
        let inner = Arc::new(ClientInner {
            handler,
            negotiator: config.negotiator(),
            transport,
            channel: Mutex::new(ChannelSlot::default()),
        });
        Ok(Self { inner, discovery })
    }

    /// Returns the monetization state machine.
    #[must_use]
    pub fn monetization_handler(&self) -> &Arc<MonetizationHandler> {
        &self.inner.handler
    }

    /// Returns the negotiator used by [`setup_payment`](Self::setup_payment).
    #[must_use]
    pub fn negotiator(&self) -> &Negotiator {
        &self.inner.negotiator
    }

    /// Returns `true` while the client owns a channel.
    #[must_use]
    pub fn has_open_stream(&self) -> bool {
        self.inner.slot().handle.is_some()
    }

    /// Negotiates a session for the current payment target and opens its
    /// channel.
    ///
    /// Returns immediately. The negotiation runs on a spawned tokio task whose
    /// handle is returned; awaiting it is optional. Returns `Ok(None)` without
    /// issuing a request if the stream has already started, if no target is
    /// adopted, or if `provider_url` is not a valid URL.
    ///
    /// Negotiation failures are logged and leave the state unchanged. A
    /// response that arrives after the payment target changed is discarded.
    ///
    /// Requests go through `requester` when given, for example to add
    /// authentication, otherwise through the client's own HTTP client.
    ///
    /// # Errors
    ///
    /// Returns [`UnconfiguredError`] if the monetization state is undefined.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    pub fn setup_payment(
        &self,
        provider_url: &str,
        requester: Option<Arc<dyn HttpRequester>>,
    ) -> Result<Option<JoinHandle<()>>, UnconfiguredError> {
        let handler = &self.inner.handler;
        if !handler.is_ready_for_payment()? {
            #[cfg(feature = "telemetry")]
            tracing::debug!("Payment stream already started, skipping negotiation");
            return Ok(None);
        }
        let session = handler.session();
        let Some(target) = session.target else {
            #[cfg(feature = "telemetry")]
            tracing::warn!("No payment pointer declared, skipping negotiation");
            return Ok(None);
        };
        let provider = match parse_provider_url(provider_url) {
            Ok(provider) => provider,
            Err(err) => {
                #[cfg(feature = "telemetry")]
                tracing::warn!(error = %err, provider_url, "Invalid provider URL");
                #[cfg(not(feature = "telemetry"))]
                let _ = err;
                return Ok(None);
            }
        };

        let client = Arc::downgrade(&self.inner);
        let negotiator = self.inner.negotiator.clone();
        let correlation_id = session.correlation_id;
        #[cfg(feature = "telemetry")]
        let span = tracing::info_span!(
            "wmp.client.setup_payment",
            provider = %provider,
            request_id = ?correlation_id,
        );

        let task = async move {
            let channel = match negotiator
                .negotiate(&provider, &target, requester.as_deref())
                .await
            {
                Ok(channel) => channel,
                Err(err) => {
                    #[cfg(feature = "telemetry")]
                    tracing::error!(error = %err, "Session negotiation failed");
                    #[cfg(not(feature = "telemetry"))]
                    let _ = err;
                    return;
                }
            };
            if let Some(client) = client.upgrade() {
                client.open_channel(channel, correlation_id);
            }
        };
        #[cfg(feature = "telemetry")]
        let task = tracing::Instrument::instrument(task, span);
        Ok(Some(tokio::spawn(task)))
    }

    /// Closes the payment channel, reporting a non-finalized stop.
    ///
    /// Does nothing if no channel is open.
    pub fn close_monetization_stream(&self) {
        self.inner.close_stream();
    }
}

impl Drop for WmpClient {
    fn drop(&mut self) {
        self.discovery.stop();
        if let Some(handle) = self.inner.slot().handle.take() {
            handle.close();
        }
    }
}

impl Debug for WmpClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WmpClient")
            .field("handler", &self.inner.handler)
            .field("negotiator", &self.inner.negotiator)
            .field("has_open_stream", &self.has_open_stream())
            .field("discovery", &self.discovery)
            .finish_non_exhaustive()
    }
}
