#![cfg_attr(docsrs, feature(doc_auto_cfg))]

//! Core types for Web Monetization provider clients.
//!
//! This crate holds everything a monetization session needs that does not
//! touch the network: the event and state types surfaced on the host
//! monetization object, the abstractions over the host document, and the
//! two leaf components of the session pipeline.
//!
//! # Overview
//!
//! A document declares a payment target through a
//! `<meta name="monetization" content="$wallet.example/alice">` tag. The
//! [`discovery::PointerDiscovery`] engine watches for that declaration and
//! feeds every change into the [`handler::MonetizationHandler`], which owns the
//! `pending` / `started` / `stopped` state machine and emits the
//! `monetization*` events on the host object. Negotiating a session with a
//! provider and streaming progress lives in the `wmp-http` crate.
//!
//! # Modules
//!
//! - [`discovery`] - Payment pointer discovery over a host document
//! - [`document`] - Host document abstraction and an in-memory `<head>`
//! - [`error`] - Error types for environment, readiness and progress parsing
//! - [`handler`] - The monetization state machine
//! - [`host`] - Host monetization object abstraction and a broadcast host
//! - [`proto`] - Payment targets, correlation ids, states and event payloads
//!
//! # Feature Flags
//!
//! - `telemetry` - Enables tracing instrumentation of state transitions

pub mod discovery;
pub mod document;
pub mod error;
pub mod handler;
pub mod host;
pub mod proto;

pub use discovery::PointerDiscovery;
pub use document::{Document, Element, HeadDocument, NodeId};
pub use error::{
    MalformedProgressError, MonetizationError, UnconfiguredError, UnsupportedEnvironmentError,
};
pub use handler::MonetizationHandler;
pub use host::{BroadcastHost, MonetizationHost};
pub use proto::{
    CorrelationId, LifecycleDetail, MonetizationEvent, MonetizationState, PaymentTarget,
    ProgressDetail, ProgressPayload,
};
