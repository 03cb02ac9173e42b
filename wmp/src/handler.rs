//! The monetization state machine.
//!
//! [`MonetizationHandler`] is the single authority over the current payment
//! target, its correlation id, and the `state` field of the host monetization
//! object. Every transition is mirrored as an event dispatched on the host.
//!
//! # Transitions
//!
//! | From | Operation | To | Event |
//! |------|-----------|----|-------|
//! | any | [`adopt_target`](MonetizationHandler::adopt_target) | `pending` | `monetizationpending` (preceded by a finalized stop when `started`) |
//! | any | [`reset_target`](MonetizationHandler::reset_target) | `stopped` | `monetizationstop`, `finalized = true` |
//! | `pending` / `stopped` | [`fire_started`](MonetizationHandler::fire_started) | `started` | `monetizationstart` |
//! | any | [`fire_stopped`](MonetizationHandler::fire_stopped) | `stopped` | `monetizationstop` |
//!
//! Progress reports ([`fire_progress`](MonetizationHandler::fire_progress))
//! never change the state.

use std::fmt::{self, Debug};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[cfg(feature = "telemetry")]
use tracing::debug;

use crate::document::Document;
use crate::error::{MalformedProgressError, UnconfiguredError, UnsupportedEnvironmentError};
use crate::host::MonetizationHost;
use crate::proto::{
    CorrelationId, LifecycleDetail, MonetizationEvent, MonetizationState, PaymentTarget,
    ProgressDetail, ProgressPayload,
};

/// The adopted target and the correlation id generated for it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Session {
    /// The adopted payment target.
    pub target: Option<PaymentTarget>,
    /// Correlation id of the adoption.
    pub correlation_id: Option<CorrelationId>,
}

/// Owns the monetization state and emits lifecycle and progress events.
///
/// Transitions hold an internal lock across the host's `set_state` and
/// `dispatch` calls, so events are observed in transition order.
pub struct MonetizationHandler {
    host: Arc<dyn MonetizationHost>,
    session: Mutex<Session>,
}

impl MonetizationHandler {
    /// Creates a handler bound to the document's monetization object.
    ///
    /// # Errors
    ///
    /// Returns [`UnsupportedEnvironmentError`] if the document exposes no
    /// monetization object.
    pub fn new(document: &dyn Document) -> Result<Self, UnsupportedEnvironmentError> {
        document
            .monetization()
            .map(Self::with_host)
            .ok_or(UnsupportedEnvironmentError)
    }

    /// Creates a handler bound to an explicit host object.
    #[must_use]
    pub fn with_host(host: Arc<dyn MonetizationHost>) -> Self {
        Self {
            host,
            session: Mutex::new(Session::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Session> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns the host object the handler writes to.
    #[must_use]
    pub fn host(&self) -> &Arc<dyn MonetizationHost> {
        &self.host
    }

    /// Returns the current state, `None` while undefined.
    #[must_use]
    pub fn state(&self) -> Option<MonetizationState> {
        self.host.state()
    }

    /// Returns `true` if the state is `started`.
    #[must_use]
    pub fn is_started(&self) -> bool {
        self.state() == Some(MonetizationState::Started)
    }

    /// Returns `true` if the state is `stopped`.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.state() == Some(MonetizationState::Stopped)
    }

    /// Returns `true` if the state is `pending`.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.state() == Some(MonetizationState::Pending)
    }

    /// Returns the adopted payment target.
    #[must_use]
    pub fn payment_target(&self) -> Option<PaymentTarget> {
        self.lock().target.clone()
    }

    /// Returns the correlation id of the current adoption.
    #[must_use]
    pub fn correlation_id(&self) -> Option<CorrelationId> {
        self.lock().correlation_id
    }

    /// Returns a snapshot of the adopted target and its correlation id.
    #[must_use]
    pub fn session(&self) -> Session {
        self.lock().clone()
    }

    /// Checks whether a payment session may be negotiated.
    ///
    /// Returns `Ok(true)` in `pending` or `stopped`, `Ok(false)` in `started`.
    ///
    /// # Errors
    ///
    /// Returns [`UnconfiguredError`] if the state is undefined, i.e. discovery
    /// never ran against the host object.
    pub fn is_ready_for_payment(&self) -> Result<bool, UnconfiguredError> {
        match self.host.state() {
            Some(state) => Ok(state != MonetizationState::Started),
            None => Err(UnconfiguredError),
        }
    }

    /// Adopts a new payment target.
    ///
    /// Does nothing if `target` is already adopted. Otherwise a running stream
    /// is reported stopped (`finalized = true`) under the old target, a fresh
    /// correlation id is generated, and the state moves to `pending`.
    pub fn adopt_target(&self, target: PaymentTarget) {
        let mut session = self.lock();
        if session.target.as_ref() == Some(&target) {
            return;
        }
        if self.host.state() == Some(MonetizationState::Started) {
            self.transition(MonetizationState::Stopped, &session, Some(true));
        }
        #[cfg(feature = "telemetry")]
        debug!(pointer = %target, previous = ?session.target, "Adopting payment target");
        session.target = Some(target);
        session.correlation_id = Some(CorrelationId::generate());
        self.transition(MonetizationState::Pending, &session, None);
    }

    /// Clears the payment target.
    ///
    /// Does nothing if no target is adopted. Otherwise emits a finalized stop
    /// under the old target, then forgets the target and its correlation id.
    pub fn reset_target(&self) {
        let mut session = self.lock();
        if session.target.is_none() {
            return;
        }
        self.transition(MonetizationState::Stopped, &session, Some(true));
        #[cfg(feature = "telemetry")]
        debug!(previous = ?session.target, "Payment target reset");
        *session = Session::default();
    }

    /// Sets the state to `stopped` and emits a stop with an empty detail.
    ///
    /// Used when discovery finds no declared target: the state becomes defined
    /// but there is no target, correlation id or `finalized` flag to report.
    pub fn mark_stopped(&self) {
        let _session = self.lock();
        self.transition(MonetizationState::Stopped, &Session::default(), None);
    }

    /// Reports that the payment stream started.
    ///
    /// Ignored while no target is adopted: `started` always has a target.
    pub fn fire_started(&self) {
        let session = self.lock();
        if session.target.is_none() {
            #[cfg(feature = "telemetry")]
            debug!("Ignoring stream start without a payment target");
            return;
        }
        self.transition(MonetizationState::Started, &session, None);
    }

    /// Reports that the payment stream stopped.
    ///
    /// `finalized` is `true` when the stop was caused by the target being
    /// removed or replaced, `false` for a plain channel close.
    pub fn fire_stopped(&self, finalized: bool) {
        let session = self.lock();
        self.transition(MonetizationState::Stopped, &session, Some(finalized));
    }

    /// Reports payment progress from a raw channel message.
    ///
    /// # Errors
    ///
    /// Returns [`MalformedProgressError`] if `raw` is not a
    /// `{ amount, assetCode, assetScale }` JSON object. No event is emitted in
    /// that case.
    pub fn fire_progress(&self, raw: &str) -> Result<(), MalformedProgressError> {
        let payload: ProgressPayload = serde_json::from_str(raw)?;
        let session = self.lock();
        self.host.dispatch(MonetizationEvent::Progress(ProgressDetail {
            payment_target: session.target.clone(),
            correlation_id: session.correlation_id,
            amount: payload.amount,
            asset_code: payload.asset_code,
            asset_scale: payload.asset_scale,
        }));
        Ok(())
    }

    fn transition(&self, state: MonetizationState, session: &Session, finalized: Option<bool>) {
        #[cfg(feature = "telemetry")]
        debug!(
            from = ?self.host.state(),
            to = %state,
            request_id = ?session.correlation_id,
            ?finalized,
            "Monetization state transition"
        );
        self.host.set_state(state);
        let detail = LifecycleDetail {
            payment_target: session.target.clone(),
            correlation_id: session.correlation_id,
            finalized,
        };
        let event = match state {
            MonetizationState::Pending => MonetizationEvent::Pending(detail),
            MonetizationState::Started => MonetizationEvent::Start(detail),
            MonetizationState::Stopped => MonetizationEvent::Stop(detail),
        };
        self.host.dispatch(event);
    }
}

impl Debug for MonetizationHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MonetizationHandler")
            .field("state", &self.state())
            .field("session", &self.session())
            .finish()
    }
}
