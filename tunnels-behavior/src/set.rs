//! Behavior catalogs.
//!
//! A node keeps one [`BehaviorTemplates`] holding a configured template per
//! behavior kind. For every new connection it calls
//! [`BehaviorTemplates::instantiate`] (or [`BehaviorTemplates::attach_to`])
//! to get a [`PeerBehaviors`] of fresh clones bound to that connection.
//! Templates themselves are never attached.

use std::any::Any;
use std::sync::Arc;

use crate::behavior::Behavior;
use crate::controller::{BehaviorHandle, DetachOutcome};
use crate::error::{BehaviorError, BehaviorResult};
use crate::peer::PeerConnection;

/// Object-safe view of a [`BehaviorHandle`].
pub trait PeerBehavior: Send + Sync + 'static {
    /// Name of the behavior kind.
    fn kind(&self) -> &'static str;

    /// Attach to a peer.
    fn attach(&self, peer: Arc<dyn PeerConnection>) -> BehaviorResult<()>;

    /// Detach from the current peer, if any.
    fn detach(&self) -> DetachOutcome;

    /// The peer this behavior is attached to.
    fn attached_peer(&self) -> Option<Arc<dyn PeerConnection>>;

    /// Check if the behavior is attached.
    fn is_attached(&self) -> bool;

    /// Clone into a fresh, unattached instance.
    fn clone_boxed(&self) -> Box<dyn PeerBehavior>;

    /// Downcasting support.
    fn as_any(&self) -> &dyn Any;
}

impl<B: Behavior> PeerBehavior for BehaviorHandle<B> {
    fn kind(&self) -> &'static str {
        B::KIND
    }

    fn attach(&self, peer: Arc<dyn PeerConnection>) -> BehaviorResult<()> {
        BehaviorHandle::attach(self, peer)
    }

    fn detach(&self) -> DetachOutcome {
        BehaviorHandle::detach(self)
    }

    fn attached_peer(&self) -> Option<Arc<dyn PeerConnection>> {
        BehaviorHandle::attached_peer(self)
    }

    fn is_attached(&self) -> bool {
        BehaviorHandle::is_attached(self)
    }

    fn clone_boxed(&self) -> Box<dyn PeerBehavior> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

fn downcast<B: Behavior>(behavior: &dyn PeerBehavior) -> Option<&BehaviorHandle<B>> {
    behavior.as_any().downcast_ref::<BehaviorHandle<B>>()
}

/// A behavior that failed to attach.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachFailure {
    /// Kind of the behavior.
    pub kind: &'static str,
    /// The attach error.
    pub error: BehaviorError,
}

/// Configured templates, one per behavior kind.
#[derive(Default)]
pub struct BehaviorTemplates {
    templates: Vec<Box<dyn PeerBehavior>>,
}

impl BehaviorTemplates {
    /// Create an empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a template.
    pub fn add<B: Behavior>(&mut self, template: B) -> BehaviorResult<()> {
        if self.contains(B::KIND) {
            return Err(BehaviorError::DuplicateBehavior(B::KIND));
        }
        self.templates.push(Box::new(BehaviorHandle::new(template)));
        Ok(())
    }

    /// Builder-style [`add`](Self::add).
    pub fn with<B: Behavior>(mut self, template: B) -> BehaviorResult<Self> {
        self.add(template)?;
        Ok(self)
    }

    /// Remove the template of a kind. Returns true if one was removed.
    pub fn remove<B: Behavior>(&mut self) -> bool {
        let before = self.templates.len();
        self.templates.retain(|t| t.kind() != B::KIND);
        self.templates.len() != before
    }

    /// Get the template of a kind, e.g. to reconfigure it.
    pub fn find<B: Behavior>(&self) -> Option<&BehaviorHandle<B>> {
        self.templates.iter().find_map(|t| downcast::<B>(t.as_ref()))
    }

    /// Check if a template of the named kind is present.
    pub fn contains(&self, kind: &str) -> bool {
        self.templates.iter().any(|t| t.kind() == kind)
    }

    /// Kinds in insertion order.
    pub fn kinds(&self) -> Vec<&'static str> {
        self.templates.iter().map(|t| t.kind()).collect()
    }

    /// Number of templates.
    pub fn len(&self) -> usize {
        self.templates.len()
    }

    /// Check if the catalog is empty.
    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    /// Clone every template into an unbound collection.
    pub fn instantiate(&self) -> PeerBehaviors {
        PeerBehaviors {
            peer: None,
            behaviors: self.templates.iter().map(|t| t.clone_boxed()).collect(),
        }
    }

    /// Clone every template and attach the clones to `peer`.
    ///
    /// Returns the collection together with the behaviors that failed to
    /// attach. Failed behaviors stay in the collection so they get detached.
    pub fn attach_to(&self, peer: Arc<dyn PeerConnection>) -> (PeerBehaviors, Vec<AttachFailure>) {
        let mut behaviors = self.instantiate();
        let failures = behaviors.bind_and_attach(peer);
        (behaviors, failures)
    }
}

/// The behaviors attached to one connection.
///
/// Dropping the collection detaches everything still attached.
#[derive(Default)]
pub struct PeerBehaviors {
    peer: Option<Arc<dyn PeerConnection>>,
    behaviors: Vec<Box<dyn PeerBehavior>>,
}

impl PeerBehaviors {
    /// Create an empty, unbound collection.
    pub fn new() -> Self {
        Self::default()
    }

    /// The peer this collection is bound to.
    pub fn peer(&self) -> Option<&Arc<dyn PeerConnection>> {
        self.peer.as_ref()
    }

    /// Bind to a peer and attach every behavior in insertion order.
    ///
    /// Individual attach failures don't stop the others; they are returned.
    pub fn attach_all(&mut self, peer: Arc<dyn PeerConnection>) -> BehaviorResult<Vec<AttachFailure>> {
        if let Some(bound) = &self.peer {
            return Err(BehaviorError::AlreadyAttached { peer: bound.id() });
        }
        Ok(self.bind_and_attach(peer))
    }

    fn bind_and_attach(&mut self, peer: Arc<dyn PeerConnection>) -> Vec<AttachFailure> {
        let mut failures = Vec::new();
        for behavior in &self.behaviors {
            if let Err(error) = behavior.attach(peer.clone()) {
                tracing::warn!(
                    peer = %peer.id(),
                    behavior = behavior.kind(),
                    error = %error,
                    "Failed to attach behavior"
                );
                failures.push(AttachFailure {
                    kind: behavior.kind(),
                    error,
                });
            }
        }
        self.peer = Some(peer);
        failures
    }

    /// Add a behavior. Attaches it immediately if the collection is bound.
    ///
    /// The behavior is kept even if attaching fails, so it gets detached
    /// with the rest.
    pub fn add<B: Behavior>(&mut self, behavior: B) -> BehaviorResult<()> {
        if self.behaviors.iter().any(|b| b.kind() == B::KIND) {
            return Err(BehaviorError::DuplicateBehavior(B::KIND));
        }
        let handle = BehaviorHandle::new(behavior);
        let result = match &self.peer {
            Some(peer) => handle.attach(peer.clone()),
            None => Ok(()),
        };
        self.behaviors.push(Box::new(handle));
        result
    }

    /// Remove and detach the behavior of a kind.
    pub fn remove<B: Behavior>(&mut self) -> Option<DetachOutcome> {
        let index = self.behaviors.iter().position(|b| b.kind() == B::KIND)?;
        let behavior = self.behaviors.remove(index);
        Some(behavior.detach())
    }

    /// Get the behavior of a kind.
    pub fn find<B: Behavior>(&self) -> Option<&BehaviorHandle<B>> {
        self.behaviors.iter().find_map(|b| downcast::<B>(b.as_ref()))
    }

    /// Kinds in insertion order.
    pub fn kinds(&self) -> Vec<&'static str> {
        self.behaviors.iter().map(|b| b.kind()).collect()
    }

    /// Number of behaviors.
    pub fn len(&self) -> usize {
        self.behaviors.len()
    }

    /// Check if the collection is empty.
    pub fn is_empty(&self) -> bool {
        self.behaviors.is_empty()
    }

    /// Detach every behavior, newest first, and empty the collection.
    pub fn detach_all(&mut self) -> Vec<(&'static str, DetachOutcome)> {
        let outcomes = self
            .behaviors
            .drain(..)
            .rev()
            .map(|b| (b.kind(), b.detach()))
            .collect();
        if let Some(peer) = self.peer.take() {
            tracing::debug!(peer = %peer.id(), "Detached all behaviors");
        }
        outcomes
    }
}

impl Drop for PeerBehaviors {
    fn drop(&mut self) {
        if !self.behaviors.is_empty() {
            self.detach_all();
        }
    }
}
