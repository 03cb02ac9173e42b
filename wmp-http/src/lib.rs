#![cfg_attr(docsrs, feature(doc_auto_cfg))]

//! Session negotiation and payment streaming for Web Monetization providers.
//!
//! [`WmpClient`] turns a host document with a declared payment pointer into
//! a live payment stream: it negotiates a session with the provider over HTTP
//! (`POST {provider}/api/me/sessions`), opens the session's streaming channel,
//! and relays channel events into the [`wmp::MonetizationHandler`].
//!
//! # Modules
//!
//! - [`channel`] - Streaming channel abstraction and the WebSocket transport
//! - [`client`] - The session client and its configuration
//! - [`constants`] - Endpoint paths, header names and defaults
//! - [`error`] - Negotiation, channel and `Link` header errors
//! - [`link`] - `Link` header parsing for header-driven channel discovery
//! - [`negotiate`] - Session negotiation with a provider
//! - [`request`] - Overridable HTTP request capability
//!
//! # Feature Flags
//!
//! - `telemetry` - Enables `tracing` spans and events for negotiation, channels
//!   and the session client, and for state transitions in the core crate

pub mod channel;
pub mod client;
pub mod constants;
pub mod error;
pub mod link;
pub mod negotiate;
pub mod request;

pub use channel::{ChannelHandle, ChannelListener, ChannelTransport, WebSocketTransport};
pub use client::{ClientConfig, WmpClient};
pub use error::{ChannelError, LinkParseError, NegotiationError};
pub use negotiate::{ChannelDiscovery, Negotiator};
pub use request::HttpRequester;
