//! The capability every concrete behavior implements.

use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::error::BehaviorResult;
use crate::peer::{PeerConnection, PeerId};
use crate::resource::{Resource, ResourceRegistry, TaskResource};

/// A protocol-handling module attachable to a peer connection.
///
/// Implementors hold their configuration and whatever per-connection state
/// they need. They never manage attachment themselves: wrap them in a
/// [`BehaviorHandle`](crate::BehaviorHandle), which serializes attach and
/// detach and owns the resources registered during setup.
///
/// Hooks run while the handle's lock is held. They must not call back into
/// the same handle.
pub trait Behavior: Sized + Send + 'static {
    /// Name of the behavior kind. At most one behavior of a kind per peer.
    const KIND: &'static str;

    /// Start observing the peer. Called once per attach, unless the peer was
    /// already disconnected.
    fn setup(&mut self, ctx: &mut AttachContext<'_>) -> BehaviorResult<()>;

    /// Stop observing the peer. Called once per detach. Registered resources
    /// are released after this returns, whatever it returns.
    fn teardown(&mut self, ctx: &mut DetachContext<'_>) -> BehaviorResult<()>;

    /// Copy the configuration into a fresh, unattached behavior.
    ///
    /// Per-connection state must not be carried over.
    fn clone_config(&self) -> Self;
}

/// What a behavior sees during setup.
pub struct AttachContext<'a> {
    peer: &'a Arc<dyn PeerConnection>,
    resources: &'a mut ResourceRegistry,
}

impl<'a> AttachContext<'a> {
    pub(crate) fn new(
        peer: &'a Arc<dyn PeerConnection>,
        resources: &'a mut ResourceRegistry,
    ) -> Self {
        Self { peer, resources }
    }

    /// The peer being attached to.
    pub fn peer(&self) -> &Arc<dyn PeerConnection> {
        self.peer
    }

    /// Identity of the peer being attached to.
    pub fn peer_id(&self) -> PeerId {
        self.peer.id()
    }

    /// Register a resource to release at detach.
    pub fn register(&mut self, resource: Box<dyn Resource>) {
        self.resources.register(resource);
    }

    /// Register a closure to run at detach.
    pub fn register_fn<F>(&mut self, name: impl Into<String>, release_fn: F)
    where
        F: FnOnce() -> BehaviorResult<()> + Send + 'static,
    {
        self.resources.register_fn(name, release_fn);
    }

    /// Register a spawned task to abort at detach.
    pub fn register_task(&mut self, name: impl Into<String>, handle: JoinHandle<()>) {
        self.resources
            .register(Box::new(TaskResource::new(name, handle)));
    }

    /// Number of resources registered so far.
    pub fn resource_count(&self) -> usize {
        self.resources.len()
    }
}

/// What a behavior sees during teardown.
pub struct DetachContext<'a> {
    peer: &'a Arc<dyn PeerConnection>,
    setup_ran: bool,
}

impl<'a> DetachContext<'a> {
    pub(crate) fn new(peer: &'a Arc<dyn PeerConnection>, setup_ran: bool) -> Self {
        Self { peer, setup_ran }
    }

    /// The peer being detached from.
    pub fn peer(&self) -> &Arc<dyn PeerConnection> {
        self.peer
    }

    /// Identity of the peer being detached from.
    pub fn peer_id(&self) -> PeerId {
        self.peer.id()
    }

    /// Whether setup ran for this attachment.
    ///
    /// False when the peer was already disconnected at attach time.
    pub fn setup_ran(&self) -> bool {
        self.setup_ran
    }
}
