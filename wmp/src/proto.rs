//! Wire and event types for monetization sessions.
//!
//! # Key Types
//!
//! - [`PaymentTarget`] - The payment pointer declared by the host document
//! - [`CorrelationId`] - Per-adoption identifier tying events to one target
//! - [`MonetizationState`] - `pending`, `started` or `stopped`
//! - [`LifecycleDetail`] / [`ProgressDetail`] - Event payloads
//! - [`MonetizationEvent`] - The four events emitted on the host object
//! - [`ProgressPayload`] - Inbound message on the streaming channel
//!
//! # Wire Format
//!
//! Event details serialize to camelCase JSON using the Web Monetization
//! field names: the target is `paymentPointer` and the correlation id is
//! `requestId`.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// A payment pointer identifying where funds are streamed to.
///
/// Serializes as a plain string: `"$wallet.example/alice"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PaymentTarget(String);

impl PaymentTarget {
    /// Creates a payment target from the declared pointer string.
    pub fn new(pointer: impl Into<String>) -> Self {
        Self(pointer.into())
    }

    /// Returns the pointer string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PaymentTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PaymentTarget {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for PaymentTarget {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl PartialEq<str> for PaymentTarget {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl PartialEq<&str> for PaymentTarget {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

/// Opaque identifier generated every time a payment target is adopted.
///
/// Backed by a random (v4) UUID so that two adoptions never share an id,
/// even when the same pointer is declared again later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(Uuid);

impl CorrelationId {
    /// Generates a fresh random correlation id.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns the underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0.hyphenated(), f)
    }
}

/// State of the host monetization object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MonetizationState {
    /// A target is declared but no payment has streamed yet.
    Pending,
    /// The payment stream is open.
    Started,
    /// No stream is running, or no target is declared.
    Stopped,
}

impl MonetizationState {
    /// Returns the lowercase wire name of the state.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Started => "started",
            Self::Stopped => "stopped",
        }
    }
}

impl fmt::Display for MonetizationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MonetizationState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "started" => Ok(Self::Started),
            "stopped" => Ok(Self::Stopped),
            other => Err(format!("unknown monetization state '{other}'")),
        }
    }
}

/// Detail carried by `monetizationpending`, `monetizationstart` and
/// `monetizationstop` events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LifecycleDetail {
    /// The target the transition belongs to.
    #[serde(rename = "paymentPointer")]
    pub payment_target: Option<PaymentTarget>,
    /// The correlation id of that target's adoption.
    #[serde(rename = "requestId")]
    pub correlation_id: Option<CorrelationId>,
    /// Only set on stop events: `true` when the stop was caused by the
    /// target being removed or replaced, `false` for a channel close.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finalized: Option<bool>,
}

/// A progress message as it arrives on the streaming channel.
///
/// `amount` and `asset_scale` keep whatever JSON type the provider sent;
/// they are relayed, never interpreted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressPayload {
    /// Amount sent, usually a decimal string.
    pub amount: Value,
    /// Asset code, e.g. `"USD"`.
    pub asset_code: String,
    /// Power of ten the amount is scaled by.
    pub asset_scale: Value,
}

/// Detail carried by `monetizationprogress` events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressDetail {
    /// The target the payment went to.
    #[serde(rename = "paymentPointer")]
    pub payment_target: Option<PaymentTarget>,
    /// The correlation id of that target's adoption.
    #[serde(rename = "requestId")]
    pub correlation_id: Option<CorrelationId>,
    /// Amount sent, relayed verbatim.
    pub amount: Value,
    /// Asset code, e.g. `"USD"`.
    pub asset_code: String,
    /// Power of ten the amount is scaled by, relayed verbatim.
    pub asset_scale: Value,
}

/// An event dispatched on the host monetization object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MonetizationEvent {
    /// `monetizationpending`
    Pending(LifecycleDetail),
    /// `monetizationstart`
    Start(LifecycleDetail),
    /// `monetizationstop`
    Stop(LifecycleDetail),
    /// `monetizationprogress`
    Progress(ProgressDetail),
}

impl MonetizationEvent {
    /// Name of the `monetizationpending` event.
    pub const PENDING: &'static str = "monetizationpending";
    /// Name of the `monetizationstart` event.
    pub const START: &'static str = "monetizationstart";
    /// Name of the `monetizationstop` event.
    pub const STOP: &'static str = "monetizationstop";
    /// Name of the `monetizationprogress` event.
    pub const PROGRESS: &'static str = "monetizationprogress";

    /// Returns the DOM event name.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Pending(_) => Self::PENDING,
            Self::Start(_) => Self::START,
            Self::Stop(_) => Self::STOP,
            Self::Progress(_) => Self::PROGRESS,
        }
    }

    /// Returns the correlation id the event was emitted under.
    #[must_use]
    pub const fn correlation_id(&self) -> Option<&CorrelationId> {
        match self {
            Self::Pending(d) | Self::Start(d) | Self::Stop(d) => d.correlation_id.as_ref(),
            Self::Progress(d) => d.correlation_id.as_ref(),
        }
    }

    /// Returns the payment target the event was emitted for.
    #[must_use]
    pub const fn payment_target(&self) -> Option<&PaymentTarget> {
        match self {
            Self::Pending(d) | Self::Start(d) | Self::Stop(d) => d.payment_target.as_ref(),
            Self::Progress(d) => d.payment_target.as_ref(),
        }
    }

    /// Serializes the event detail to JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn detail_json(&self) -> Result<serde_json::Value, serde_json::Error> {
        match self {
            Self::Pending(d) | Self::Start(d) | Self::Stop(d) => serde_json::to_value(d),
            Self::Progress(d) => serde_json::to_value(d),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_serializes_lowercase() {
        let json = serde_json::to_string(&MonetizationState::Started).unwrap();
        assert_eq!(json, "\"started\"");
        assert_eq!(
            "pending".parse::<MonetizationState>().unwrap(),
            MonetizationState::Pending
        );
        assert!("paused".parse::<MonetizationState>().is_err());
    }

    #[test]
    fn test_lifecycle_detail_uses_web_monetization_names() {
        let id = CorrelationId::generate();
        let detail = LifecycleDetail {
            payment_target: Some(PaymentTarget::new("$alice.example/pay")),
            correlation_id: Some(id),
            finalized: Some(true),
        };
        let value = serde_json::to_value(&detail).unwrap();
        assert_eq!(value["paymentPointer"], "$alice.example/pay");
        assert_eq!(value["requestId"], id.to_string());
        assert_eq!(value["finalized"], true);
    }

    #[test]
    fn test_lifecycle_detail_omits_finalized_when_unset() {
        let detail = LifecycleDetail {
            payment_target: None,
            correlation_id: None,
            finalized: None,
        };
        let value = serde_json::to_value(&detail).unwrap();
        assert!(value.get("finalized").is_none());
        assert!(value["paymentPointer"].is_null());
    }

    #[test]
    fn test_progress_payload_parses_channel_message() {
        let payload: ProgressPayload =
            serde_json::from_str(r#"{"amount":"5","assetCode":"USD","assetScale":2}"#).unwrap();
        assert_eq!(payload.amount, serde_json::json!("5"));
        assert_eq!(payload.asset_code, "USD");
        assert_eq!(payload.asset_scale, serde_json::json!(2));
    }

    #[test]
    fn test_progress_payload_keeps_numeric_amount() {
        let payload: ProgressPayload =
            serde_json::from_str(r#"{"amount":5,"assetCode":"USD","assetScale":"2"}"#).unwrap();
        assert_eq!(payload.amount, serde_json::json!(5));
        assert_eq!(payload.asset_scale, serde_json::json!("2"));

        let missing = serde_json::from_str::<ProgressPayload>(r#"{"assetCode":"USD","assetScale":2}"#);
        assert!(missing.is_err());
    }

    #[test]
    fn test_correlation_ids_are_unique() {
        assert_ne!(CorrelationId::generate(), CorrelationId::generate());
    }

    #[test]
    fn test_event_names() {
        let detail = LifecycleDetail {
            payment_target: None,
            correlation_id: None,
            finalized: None,
        };
        assert_eq!(
            MonetizationEvent::Pending(detail.clone()).name(),
            "monetizationpending"
        );
        assert_eq!(
            MonetizationEvent::Start(detail.clone()).name(),
            "monetizationstart"
        );
        assert_eq!(MonetizationEvent::Stop(detail).name(), "monetizationstop");
    }
}
