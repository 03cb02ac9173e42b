//! The host monetization object.
//!
//! In a browser this is `document.monetization`: an event target with a
//! mutable `state` field. Here it is the [`MonetizationHost`] trait, injected
//! into the [`MonetizationHandler`](crate::MonetizationHandler) so that any
//! embedding (or a test) can observe the emitted events.
//!
//! [`BroadcastHost`] is the stock implementation. It stores the state and
//! fans every event out to any number of subscribers over a
//! [`tokio::sync::broadcast`] channel.

use std::fmt::{self, Debug};
use std::sync::{Mutex, PoisonError};

use tokio::sync::broadcast;

use crate::proto::{MonetizationEvent, MonetizationState};

/// The host object the state machine reads and writes.
///
/// Implementations must not call back into the handler from
/// [`dispatch`](MonetizationHost::dispatch): the handler holds its transition
/// lock while dispatching.
pub trait MonetizationHost: Send + Sync {
    /// Returns the current state, or `None` while it is undefined.
    fn state(&self) -> Option<MonetizationState>;

    /// Overwrites the current state.
    fn set_state(&self, state: MonetizationState);

    /// Dispatches an event to the host's listeners.
    fn dispatch(&self, event: MonetizationEvent);
}

/// A [`MonetizationHost`] that broadcasts events to subscribers.
///
/// Events dispatched while nobody is subscribed are dropped. Slow subscribers
/// observe [`broadcast::error::RecvError::Lagged`] once the channel capacity is
/// exceeded.
pub struct BroadcastHost {
    state: Mutex<Option<MonetizationState>>,
    events: broadcast::Sender<MonetizationEvent>,
}

impl BroadcastHost {
    /// Default capacity of the event channel.
    pub const DEFAULT_CAPACITY: usize = 64;

    /// Creates a host with an undefined state and the default capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(Self::DEFAULT_CAPACITY)
    }

    /// Creates a host whose event channel buffers up to `capacity` events
    /// per subscriber.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let (events, _) = broadcast::channel(capacity);
        Self {
            state: Mutex::new(None),
            events,
        }
    }

    /// Subscribes to all events dispatched from now on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<MonetizationEvent> {
        self.events.subscribe()
    }
}

impl Default for BroadcastHost {
    fn default() -> Self {
        Self::new()
    }
}

impl Debug for BroadcastHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BroadcastHost")
            .field("state", &self.state())
            .field("subscribers", &self.events.receiver_count())
            .finish()
    }
}

impl MonetizationHost for BroadcastHost {
    fn state(&self) -> Option<MonetizationState> {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, state: MonetizationState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = Some(state);
    }

    fn dispatch(&self, event: MonetizationEvent) {
        // No receivers is not an error for an event target.
        let _ = self.events.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proto::LifecycleDetail;

    #[test]
    fn test_state_starts_undefined() {
        let host = BroadcastHost::new();
        assert_eq!(host.state(), None);
        host.set_state(MonetizationState::Pending);
        assert_eq!(host.state(), Some(MonetizationState::Pending));
    }

    #[test]
    fn test_dispatch_reaches_every_subscriber() {
        let host = BroadcastHost::new();
        let mut first = host.subscribe();
        let mut second = host.subscribe();
        host.dispatch(MonetizationEvent::Start(LifecycleDetail {
            payment_target: None,
            correlation_id: None,
            finalized: None,
        }));
        assert_eq!(first.try_recv().unwrap().name(), MonetizationEvent::START);
        assert_eq!(second.try_recv().unwrap().name(), MonetizationEvent::START);
    }

    #[test]
    fn test_dispatch_without_subscribers_is_dropped() {
        let host = BroadcastHost::new();
        host.dispatch(MonetizationEvent::Stop(LifecycleDetail {
            payment_target: None,
            correlation_id: None,
            finalized: Some(false),
        }));
        let mut late = host.subscribe();
        assert!(late.try_recv().is_err());
    }
}
