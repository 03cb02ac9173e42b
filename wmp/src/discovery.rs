//! Payment pointer discovery.
//!
//! [`PointerDiscovery`] scans the host document once for a
//! `<meta name="monetization">` declaration and then keeps watching the head
//! for declarations being added or removed, and the declaration node itself
//! for changes to its `content` attribute. Every change is forwarded to the
//! [`MonetizationHandler`]. No network is involved.
//!
//! At most one declaration node is observed for attribute changes at a time;
//! the previous observation is disconnected before a new one is installed.

use std::fmt::{self, Debug};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

#[cfg(feature = "telemetry")]
use tracing::{debug, trace};

use crate::document::{
    CONTENT_ATTRIBUTE, Document, Element, MutationObserver, MutationRecord, NodeId, Subscription,
};
use crate::handler::MonetizationHandler;
use crate::proto::PaymentTarget;

struct DiscoveryInner {
    document: Arc<dyn Document>,
    handler: Arc<MonetizationHandler>,
    declaration: Mutex<Option<(NodeId, Subscription)>>,
}

impl DiscoveryInner {
    fn declaration(&self) -> MutexGuard<'_, Option<(NodeId, Subscription)>> {
        self.declaration
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Moves the attribute observation to `node`.
    fn observe_declaration(self: &Arc<Self>, node: NodeId) {
        let mut declaration = self.declaration();
        if let Some((_, stale)) = declaration.take() {
            stale.disconnect();
        }
        let observer: Arc<dyn MutationObserver> = Arc::new(Forward(Arc::downgrade(self)));
        let subscription = self.document.observe_attributes(node, observer);
        *declaration = Some((node, subscription));
    }

    fn disconnect_declaration(&self) {
        if let Some((_, subscription)) = self.declaration().take() {
            subscription.disconnect();
        }
    }

    fn is_current(&self, content: Option<&str>) -> bool {
        let current = self.handler.payment_target();
        current.as_ref().map(PaymentTarget::as_str) == content
    }

    fn on_added(self: &Arc<Self>, element: &Element) {
        if !element.is_declaration() || self.is_current(element.content()) {
            return;
        }
        let Some(content) = declared_pointer(element) else {
            return;
        };
        #[cfg(feature = "telemetry")]
        debug!(node = element.id().get(), pointer = content, "Declaration added");
        self.handler.adopt_target(PaymentTarget::new(content));
        self.observe_declaration(element.id());
    }

    fn on_removed(&self, element: &Element) {
        if !element.is_declaration() || element.content().is_none() {
            return;
        }
        if self.is_current(element.content()) {
            #[cfg(feature = "telemetry")]
            debug!(node = element.id().get(), "Declaration removed");
            self.handler.reset_target();
            self.disconnect_declaration();
        }
    }

    fn on_content_changed(&self, element: &Element) {
        match declared_pointer(element) {
            Some(content) => self.handler.adopt_target(PaymentTarget::new(content)),
            None => self.handler.reset_target(),
        }
    }
}

/// Forwards document mutations to the discovery engine without keeping it
/// alive.
struct Forward(Weak<DiscoveryInner>);

impl MutationObserver for Forward {
    fn on_mutations(&self, records: &[MutationRecord]) {
        let Some(inner) = self.0.upgrade() else {
            return;
        };
        for record in records {
            #[cfg(feature = "telemetry")]
            trace!(?record, "Document mutation");
            match record {
                MutationRecord::ChildList { added, removed } => {
                    for element in added {
                        inner.on_added(element);
                    }
                    for element in removed {
                        inner.on_removed(element);
                    }
                }
                MutationRecord::Attributes {
                    target,
                    attribute_name,
                } if attribute_name == CONTENT_ATTRIBUTE => inner.on_content_changed(target),
                MutationRecord::Attributes { .. } => {}
            }
        }
    }
}

fn declared_pointer(element: &Element) -> Option<&str> {
    element.content().filter(|content| !content.is_empty())
}

/// Watches a host document for the declared payment pointer.
///
/// Observation ends when the engine is [stopped](PointerDiscovery::stop) or
/// dropped.
pub struct PointerDiscovery {
    inner: Arc<DiscoveryInner>,
    children: Mutex<Option<Subscription>>,
}

impl PointerDiscovery {
    /// Runs the initial scan and installs continuous observation.
    ///
    /// A declaration found by the scan is adopted as the payment target;
    /// otherwise the state is set to `stopped`. Either way the head is then
    /// observed for declarations being added or removed, and the declaration
    /// node, if any, for `content` changes.
    pub fn start(document: Arc<dyn Document>, handler: Arc<MonetizationHandler>) -> Self {
        let inner = Arc::new(DiscoveryInner {
            document,
            handler,
            declaration: Mutex::new(None),
        });

        let declaration = inner.document.query_declaration();
        match declaration.as_ref().and_then(declared_pointer) {
            Some(content) => inner.handler.adopt_target(PaymentTarget::new(content)),
            None => {
                #[cfg(feature = "telemetry")]
                debug!("No payment pointer declared");
                inner.handler.mark_stopped();
            }
        }

        let observer: Arc<dyn MutationObserver> = Arc::new(Forward(Arc::downgrade(&inner)));
        let children = inner.document.observe_children(observer);
        if let Some(element) = declaration {
            inner.observe_declaration(element.id());
        }

        Self {
            inner,
            children: Mutex::new(Some(children)),
        }
    }

    /// Returns the handler discovery feeds.
    #[must_use]
    pub fn handler(&self) -> &Arc<MonetizationHandler> {
        &self.inner.handler
    }

    /// Returns the node currently observed for `content` changes.
    #[must_use]
    pub fn observed_declaration(&self) -> Option<NodeId> {
        self.inner.declaration().as_ref().map(|(node, _)| *node)
    }

    /// Disconnects all observation. The handler keeps its current state.
    pub fn stop(&self) {
        let children = self
            .children
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(children) = children {
            children.disconnect();
        }
        self.inner.disconnect_declaration();
    }
}

impl Drop for PointerDiscovery {
    fn drop(&mut self) {
        self.stop();
    }
}

impl Debug for PointerDiscovery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PointerDiscovery")
            .field("handler", &self.inner.handler)
            .field("observed_declaration", &self.observed_declaration())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{DECLARATION_NAME, HeadDocument, META_TAG, NAME_ATTRIBUTE};
    use crate::host::BroadcastHost;
    use crate::proto::{MonetizationEvent, MonetizationState};
    use tokio::sync::broadcast;

    struct Fixture {
        head: HeadDocument,
        discovery: PointerDiscovery,
        events: broadcast::Receiver<MonetizationEvent>,
    }

    impl Fixture {
        fn handler(&self) -> &Arc<MonetizationHandler> {
            self.discovery.handler()
        }

        fn drain(&mut self) -> Vec<MonetizationEvent> {
            std::iter::from_fn(|| self.events.try_recv().ok()).collect()
        }
    }

    fn start(setup: impl FnOnce(&HeadDocument)) -> Fixture {
        let host = Arc::new(BroadcastHost::new());
        let events = host.subscribe();
        let head = HeadDocument::with_monetization(host);
        setup(&head);
        let handler = Arc::new(MonetizationHandler::new(&head).unwrap());
        let discovery = PointerDiscovery::start(Arc::new(head.clone()), handler);
        Fixture {
            head,
            discovery,
            events,
        }
    }

    #[test]
    fn test_no_declaration_resolves_to_stopped() {
        let mut fx = start(|_| {});
        assert_eq!(fx.handler().state(), Some(MonetizationState::Stopped));
        assert_eq!(fx.handler().payment_target(), None);
        assert_eq!(fx.handler().is_ready_for_payment(), Ok(true));
        match &fx.drain()[..] {
            [MonetizationEvent::Stop(detail)] => {
                assert_eq!(detail.payment_target, None);
                assert_eq!(detail.correlation_id, None);
                assert_eq!(detail.finalized, None);
            }
            other => panic!("expected one stop event, got {other:?}"),
        }
        assert_eq!(fx.head.attribute_observer_count(), 0);
    }

    #[test]
    fn test_static_declaration_is_adopted_and_observed() {
        let mut id = None;
        let mut fx = start(|head| id = Some(head.declare("$alice.example/pay")));
        assert!(fx.handler().is_pending());
        assert_eq!(
            fx.handler().payment_target(),
            Some("$alice.example/pay".into())
        );
        assert_eq!(fx.discovery.observed_declaration(), id);
        assert_eq!(fx.drain().len(), 1);
    }

    #[test]
    fn test_empty_static_declaration_is_ignored() {
        let fx = start(|head| {
            head.declare("");
        });
        assert!(fx.handler().is_stopped());
        assert_eq!(fx.handler().payment_target(), None);
    }

    #[test]
    fn test_added_declaration_is_adopted() {
        let mut fx = start(|_| {});
        fx.drain();
        let id = fx.head.declare("$alice.example/pay");

        assert!(fx.handler().is_pending());
        assert_eq!(
            fx.handler().payment_target(),
            Some("$alice.example/pay".into())
        );
        assert_eq!(fx.discovery.observed_declaration(), Some(id));
        let names: Vec<_> = fx.drain().iter().map(MonetizationEvent::name).collect();
        assert_eq!(names, vec![MonetizationEvent::PENDING]);
    }

    #[test]
    fn test_unrelated_meta_is_ignored() {
        let mut fx = start(|_| {});
        fx.drain();
        fx.head
            .append(META_TAG, [(NAME_ATTRIBUTE, "viewport"), (CONTENT_ATTRIBUTE, "x")]);
        assert!(fx.handler().is_stopped());
        assert!(fx.drain().is_empty());
    }

    #[test]
    fn test_re_adding_same_pointer_keeps_correlation_id() {
        let mut fx = start(|head| {
            head.declare("$a.example");
        });
        let id = fx.handler().correlation_id();
        fx.head.declare("$a.example");
        assert_eq!(fx.handler().correlation_id(), id);
        assert_eq!(fx.drain().len(), 1);
    }

    #[test]
    fn test_only_one_declaration_observed_at_a_time() {
        let fx = start(|head| {
            head.declare("$a.example");
        });
        assert_eq!(fx.head.attribute_observer_count(), 1);

        let second = fx.head.declare("$b.example");
        assert_eq!(fx.head.attribute_observer_count(), 1);
        assert_eq!(fx.discovery.observed_declaration(), Some(second));

        let third = fx.head.declare("$c.example");
        assert_eq!(fx.head.attribute_observer_count(), 1);
        assert_eq!(fx.discovery.observed_declaration(), Some(third));
    }

    #[test]
    fn test_removal_while_started_emits_single_finalized_stop() {
        let mut declared = None;
        let mut fx = start(|head| declared = Some(head.declare("$alice.example/pay")));
        let id = fx.handler().correlation_id();
        fx.handler().fire_started();
        fx.drain();

        fx.head.remove(declared.unwrap());

        let emitted = fx.drain();
        assert_eq!(emitted.len(), 1);
        match &emitted[0] {
            MonetizationEvent::Stop(detail) => {
                assert_eq!(detail.finalized, Some(true));
                assert_eq!(detail.correlation_id, id);
            }
            other => panic!("expected stop, got {other:?}"),
        }
        assert_eq!(fx.handler().payment_target(), None);
        assert!(fx.handler().is_stopped());
        assert_eq!(fx.discovery.observed_declaration(), None);
        assert_eq!(fx.head.attribute_observer_count(), 0);
    }

    #[test]
    fn test_removing_stale_declaration_keeps_target() {
        let mut first = None;
        let mut fx = start(|head| first = Some(head.declare("$a.example")));
        fx.head.declare("$b.example");
        fx.drain();

        fx.head.remove(first.unwrap());

        assert!(fx.drain().is_empty());
        assert_eq!(fx.handler().payment_target(), Some("$b.example".into()));
    }

    #[test]
    fn test_content_change_adopts_new_pointer() {
        let mut declared = None;
        let mut fx = start(|head| declared = Some(head.declare("$a.example")));
        let before = fx.handler().correlation_id();
        fx.handler().fire_started();
        fx.drain();

        fx.head
            .set_attribute(declared.unwrap(), CONTENT_ATTRIBUTE, "$b.example");

        let names: Vec<_> = fx.drain().iter().map(MonetizationEvent::name).collect();
        assert_eq!(
            names,
            vec![MonetizationEvent::STOP, MonetizationEvent::PENDING]
        );
        assert_eq!(fx.handler().payment_target(), Some("$b.example".into()));
        assert_ne!(fx.handler().correlation_id(), before);
    }

    #[test]
    fn test_content_removal_resets_target() {
        let mut declared = None;
        let mut fx = start(|head| declared = Some(head.declare("$a.example")));
        fx.drain();

        fx.head.remove_attribute(declared.unwrap(), CONTENT_ATTRIBUTE);

        assert_eq!(fx.handler().payment_target(), None);
        assert!(fx.handler().is_stopped());
        assert_eq!(fx.drain().len(), 1);
    }

    #[test]
    fn test_other_attribute_changes_are_ignored() {
        let mut declared = None;
        let mut fx = start(|head| declared = Some(head.declare("$a.example")));
        fx.drain();

        fx.head
            .set_attribute(declared.unwrap(), "data-note", "irrelevant");
        fx.head
            .set_attribute(declared.unwrap(), NAME_ATTRIBUTE, DECLARATION_NAME);

        assert!(fx.drain().is_empty());
    }

    #[test]
    fn test_stop_disconnects_all_observation() {
        let mut fx = start(|head| {
            head.declare("$a.example");
        });
        fx.discovery.stop();
        assert_eq!(fx.head.child_observer_count(), 0);
        assert_eq!(fx.head.attribute_observer_count(), 0);

        fx.drain();
        fx.head.declare("$b.example");
        assert!(fx.drain().is_empty());
        assert_eq!(fx.handler().payment_target(), Some("$a.example".into()));
    }

    #[test]
    fn test_drop_disconnects_all_observation() {
        let fx = start(|_| {});
        let head = fx.head.clone();
        drop(fx);
        assert_eq!(head.child_observer_count(), 0);
    }
}
