//! Host document abstraction.
//!
//! The payment target is declared by the host document as
//! `<meta name="monetization" content="...">` in its `<head>`. The
//! [`Document`] trait exposes just enough of a document for discovery: a
//! query for the declaration node, scoped mutation observation, and access to
//! the host monetization object.
//!
//! [`HeadDocument`] is an in-memory `<head>` implementing [`Document`]. It
//! delivers mutation records synchronously after each change, outside of its
//! internal lock, so observers may query or re-subscribe from their callback.

use std::collections::BTreeMap;
use std::fmt::{self, Debug};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use crate::host::MonetizationHost;

/// Tag name of declaration nodes.
pub const META_TAG: &str = "meta";

/// Value of the `name` attribute identifying the declaration node.
pub const DECLARATION_NAME: &str = "monetization";

/// Attribute holding the element's name.
pub const NAME_ATTRIBUTE: &str = "name";

/// Attribute holding the declared payment pointer.
pub const CONTENT_ATTRIBUTE: &str = "content";

/// Identity of a node within a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u64);

impl NodeId {
    /// Creates a node id from its raw value.
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw value.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

/// Snapshot of an element: its identity, tag and attributes at the time the
/// snapshot was taken.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    id: NodeId,
    tag: String,
    attributes: BTreeMap<String, String>,
}

impl Element {
    /// Creates an element snapshot.
    pub fn new<T, I, K, V>(id: NodeId, tag: T, attributes: I) -> Self
    where
        T: Into<String>,
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            id,
            tag: tag.into(),
            attributes: attributes
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// Returns the node identity.
    #[must_use]
    pub const fn id(&self) -> NodeId {
        self.id
    }

    /// Returns the lowercase tag name.
    #[must_use]
    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// Returns an attribute value.
    #[must_use]
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    /// Returns the `name` attribute.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.attribute(NAME_ATTRIBUTE)
    }

    /// Returns the `content` attribute.
    #[must_use]
    pub fn content(&self) -> Option<&str> {
        self.attribute(CONTENT_ATTRIBUTE)
    }

    /// Returns `true` for `<meta name="monetization">` elements.
    #[must_use]
    pub fn is_declaration(&self) -> bool {
        self.tag.eq_ignore_ascii_case(META_TAG) && self.name() == Some(DECLARATION_NAME)
    }
}

/// A change observed in the document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutationRecord {
    /// Children were added to or removed from the observed node.
    ChildList {
        /// Snapshots of the added children.
        added: Vec<Element>,
        /// Snapshots of the removed children, as they were when removed.
        removed: Vec<Element>,
    },
    /// An attribute of the observed node changed.
    Attributes {
        /// Snapshot of the node after the change.
        target: Element,
        /// Name of the changed attribute.
        attribute_name: String,
    },
}

/// Receives mutation records from a [`Document`].
pub trait MutationObserver: Send + Sync {
    /// Called with the records of one batch of mutations.
    fn on_mutations(&self, records: &[MutationRecord]);
}

impl<F> MutationObserver for F
where
    F: Fn(&[MutationRecord]) + Send + Sync,
{
    fn on_mutations(&self, records: &[MutationRecord]) {
        self(records);
    }
}

/// Handle of an active observation.
///
/// The observation ends when the handle is [disconnected](Subscription::disconnect)
/// or dropped.
pub struct Subscription {
    disconnect: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    /// Creates a subscription that runs `disconnect` when it ends.
    pub fn new(disconnect: impl FnOnce() + Send + 'static) -> Self {
        Self {
            disconnect: Some(Box::new(disconnect)),
        }
    }

    /// Ends the observation.
    pub fn disconnect(mut self) {
        self.run_disconnect();
    }

    fn run_disconnect(&mut self) {
        if let Some(disconnect) = self.disconnect.take() {
            disconnect();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.run_disconnect();
    }
}

impl Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.disconnect.is_some())
            .finish()
    }
}

/// The parts of a host document that payment discovery depends on.
pub trait Document: Send + Sync {
    /// Returns the host monetization object, if the environment has one.
    fn monetization(&self) -> Option<Arc<dyn MonetizationHost>>;

    /// Returns the first `<meta name="monetization">` element in the head.
    fn query_declaration(&self) -> Option<Element>;

    /// Observes children being added to or removed from the head.
    fn observe_children(&self, observer: Arc<dyn MutationObserver>) -> Subscription;

    /// Observes attribute changes on a single node.
    fn observe_attributes(&self, node: NodeId, observer: Arc<dyn MutationObserver>)
    -> Subscription;
}

type ObserverEntry = (u64, Arc<dyn MutationObserver>);

#[derive(Default)]
struct Tree {
    next_node: u64,
    next_observer: u64,
    children: Vec<Element>,
    child_observers: Vec<ObserverEntry>,
    attribute_observers: BTreeMap<NodeId, Vec<ObserverEntry>>,
}

impl Tree {
    fn child_mut(&mut self, id: NodeId) -> Option<&mut Element> {
        self.children.iter_mut().find(|el| el.id == id)
    }

    fn attribute_observers_of(&self, id: NodeId) -> Vec<Arc<dyn MutationObserver>> {
        self.attribute_observers
            .get(&id)
            .map(|entries| entries.iter().map(|(_, o)| Arc::clone(o)).collect())
            .unwrap_or_default()
    }
}

struct HeadInner {
    monetization: Option<Arc<dyn MonetizationHost>>,
    tree: Mutex<Tree>,
}

impl HeadInner {
    fn tree(&self) -> std::sync::MutexGuard<'_, Tree> {
        self.tree.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// An in-memory document `<head>`.
///
/// Cloning yields another handle to the same head.
#[derive(Clone)]
pub struct HeadDocument {
    inner: Arc<HeadInner>,
}

impl HeadDocument {
    /// Creates an empty head without a monetization object.
    #[must_use]
    pub fn new() -> Self {
        Self::build(None)
    }

    /// Creates an empty head exposing the given monetization object.
    #[must_use]
    pub fn with_monetization(host: Arc<dyn MonetizationHost>) -> Self {
        Self::build(Some(host))
    }

    fn build(monetization: Option<Arc<dyn MonetizationHost>>) -> Self {
        Self {
            inner: Arc::new(HeadInner {
                monetization,
                tree: Mutex::new(Tree::default()),
            }),
        }
    }

    /// Appends an element to the head and notifies child observers.
    pub fn append<I, K, V>(&self, tag: &str, attributes: I) -> NodeId
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let (element, observers) = {
            let mut tree = self.inner.tree();
            tree.next_node += 1;
            let element = Element::new(NodeId(tree.next_node), tag, attributes);
            tree.children.push(element.clone());
            (element, child_observers(&tree))
        };
        let id = element.id;
        notify(
            &observers,
            &[MutationRecord::ChildList {
                added: vec![element],
                removed: Vec::new(),
            }],
        );
        id
    }

    /// Appends `<meta name="monetization" content="{pointer}">`.
    pub fn declare(&self, pointer: &str) -> NodeId {
        self.append(
            META_TAG,
            [
                (NAME_ATTRIBUTE, DECLARATION_NAME),
                (CONTENT_ATTRIBUTE, pointer),
            ],
        )
    }

    /// Removes an element from the head and notifies child observers.
    ///
    /// Returns the removed element, or `None` if it was not a child.
    pub fn remove(&self, id: NodeId) -> Option<Element> {
        let (element, observers) = {
            let mut tree = self.inner.tree();
            let index = tree.children.iter().position(|el| el.id == id)?;
            let element = tree.children.remove(index);
            (element, child_observers(&tree))
        };
        notify(
            &observers,
            &[MutationRecord::ChildList {
                added: Vec::new(),
                removed: vec![element.clone()],
            }],
        );
        Some(element)
    }

    /// Sets an attribute on a child and notifies that node's observers.
    ///
    /// Returns `false` if the node is not a child of the head.
    pub fn set_attribute(&self, id: NodeId, name: &str, value: &str) -> bool {
        self.mutate_attribute(id, name, |attributes| {
            attributes.insert(name.to_owned(), value.to_owned());
        })
    }

    /// Removes an attribute from a child and notifies that node's observers.
    ///
    /// Returns `false` if the node is not a child of the head.
    pub fn remove_attribute(&self, id: NodeId, name: &str) -> bool {
        self.mutate_attribute(id, name, |attributes| {
            attributes.remove(name);
        })
    }

    fn mutate_attribute(
        &self,
        id: NodeId,
        name: &str,
        mutate: impl FnOnce(&mut BTreeMap<String, String>),
    ) -> bool {
        let (target, observers) = {
            let mut tree = self.inner.tree();
            let Some(element) = tree.child_mut(id) else {
                return false;
            };
            mutate(&mut element.attributes);
            let target = element.clone();
            (target, tree.attribute_observers_of(id))
        };
        notify(
            &observers,
            &[MutationRecord::Attributes {
                target,
                attribute_name: name.to_owned(),
            }],
        );
        true
    }

    /// Returns a snapshot of a child element.
    #[must_use]
    pub fn element(&self, id: NodeId) -> Option<Element> {
        self.inner.tree().children.iter().find(|el| el.id == id).cloned()
    }

    /// Returns snapshots of all children in document order.
    #[must_use]
    pub fn children(&self) -> Vec<Element> {
        self.inner.tree().children.clone()
    }

    /// Returns the number of live child-list observations.
    #[must_use]
    pub fn child_observer_count(&self) -> usize {
        self.inner.tree().child_observers.len()
    }

    /// Returns the number of live attribute observations across all nodes.
    #[must_use]
    pub fn attribute_observer_count(&self) -> usize {
        self.inner
            .tree()
            .attribute_observers
            .values()
            .map(Vec::len)
            .sum()
    }
}

impl Default for HeadDocument {
    fn default() -> Self {
        Self::new()
    }
}

impl Debug for HeadDocument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tree = self.inner.tree();
        f.debug_struct("HeadDocument")
            .field("has_monetization", &self.inner.monetization.is_some())
            .field("children", &tree.children)
            .field("child_observers", &tree.child_observers.len())
            .finish_non_exhaustive()
    }
}

impl Document for HeadDocument {
    fn monetization(&self) -> Option<Arc<dyn MonetizationHost>> {
        self.inner.monetization.clone()
    }

    fn query_declaration(&self) -> Option<Element> {
        self.inner
            .tree()
            .children
            .iter()
            .find(|el| el.is_declaration())
            .cloned()
    }

    fn observe_children(&self, observer: Arc<dyn MutationObserver>) -> Subscription {
        let key = {
            let mut tree = self.inner.tree();
            tree.next_observer += 1;
            let key = tree.next_observer;
            tree.child_observers.push((key, observer));
            key
        };
        let weak = Arc::downgrade(&self.inner);
        Subscription::new(move || {
            if let Some(inner) = Weak::upgrade(&weak) {
                inner.tree().child_observers.retain(|(k, _)| *k != key);
            }
        })
    }

    fn observe_attributes(
        &self,
        node: NodeId,
        observer: Arc<dyn MutationObserver>,
    ) -> Subscription {
        let key = {
            let mut tree = self.inner.tree();
            tree.next_observer += 1;
            let key = tree.next_observer;
            tree.attribute_observers
                .entry(node)
                .or_default()
                .push((key, observer));
            key
        };
        let weak = Arc::downgrade(&self.inner);
        Subscription::new(move || {
            if let Some(inner) = Weak::upgrade(&weak) {
                let mut tree = inner.tree();
                if let Some(entries) = tree.attribute_observers.get_mut(&node) {
                    entries.retain(|(k, _)| *k != key);
                    if entries.is_empty() {
                        tree.attribute_observers.remove(&node);
                    }
                }
            }
        })
    }
}

fn child_observers(tree: &Tree) -> Vec<Arc<dyn MutationObserver>> {
    tree.child_observers
        .iter()
        .map(|(_, o)| Arc::clone(o))
        .collect()
}

fn notify(observers: &[Arc<dyn MutationObserver>], records: &[MutationRecord]) {
    for observer in observers {
        observer.on_mutations(records);
    }
}
