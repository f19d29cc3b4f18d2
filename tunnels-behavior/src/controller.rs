//! Attachment controller.
//!
//! [`BehaviorHandle`] wraps a [`Behavior`] and drives its lifecycle:
//!
//! ```text
//! Unattached ──attach──► Attached ──detach──► Detached
//!                           │
//!                           └─ setup skipped if the peer is already
//!                              disconnecting, offline or failed
//! ```
//!
//! `Detached` is terminal. A new attachment needs a fresh clone.
//!
//! The behavior, the attachment and the resource registry sit behind one
//! mutex, so "is attached" and "attached to whom" can't disagree and
//! attach/detach on the same handle never interleave.

use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::behavior::{AttachContext, Behavior, DetachContext};
use crate::error::{BehaviorError, BehaviorResult};
use crate::peer::{PeerConnection, PeerId};
use crate::resource::{ReleaseReport, Resource, ResourceRegistry};

/// Observable attachment phase of a handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachPhase {
    /// Never attached.
    Unattached,
    /// Attached to a peer.
    Attached {
        /// The peer attached to.
        peer: PeerId,
        /// False when the peer was already disconnected at attach time.
        setup_ran: bool,
    },
    /// Detached. The handle can't be attached again.
    Detached,
}

/// Result of a detach that did something.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetachReport {
    /// The peer that was detached from.
    pub peer: PeerId,
    /// Whether setup had run for this attachment.
    pub setup_ran: bool,
    /// Error returned by the teardown hook, if any.
    pub teardown_error: Option<BehaviorError>,
    /// Outcome of releasing the registered resources.
    pub release: ReleaseReport,
}

/// Result of [`BehaviorHandle::detach`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DetachOutcome {
    /// The handle wasn't attached; nothing happened.
    NotAttached,
    /// The handle was detached.
    Detached(DetachReport),
}

impl DetachOutcome {
    /// Get the report if a detach happened.
    pub fn report(&self) -> Option<&DetachReport> {
        match self {
            DetachOutcome::NotAttached => None,
            DetachOutcome::Detached(report) => Some(report),
        }
    }

    /// Check if a detach happened.
    pub fn is_detached(&self) -> bool {
        matches!(self, DetachOutcome::Detached(_))
    }
}

enum Attachment {
    Unattached,
    Attached {
        peer: Arc<dyn PeerConnection>,
        setup_ran: bool,
    },
    Detached,
}

struct AttachmentState<B> {
    behavior: B,
    attachment: Attachment,
    resources: ResourceRegistry,
}

/// A behavior instance together with its attachment state.
///
/// Cloning a handle clones the behavior's configuration into a new,
/// unattached handle with an empty registry. The source's peer and
/// resources are never shared.
pub struct BehaviorHandle<B: Behavior> {
    state: Mutex<AttachmentState<B>>,
}

impl<B: Behavior> BehaviorHandle<B> {
    /// Wrap a behavior in an unattached handle.
    pub fn new(behavior: B) -> Self {
        Self {
            state: Mutex::new(AttachmentState {
                behavior,
                attachment: Attachment::Unattached,
                resources: ResourceRegistry::new(),
            }),
        }
    }

    /// Name of the wrapped behavior kind.
    pub fn kind(&self) -> &'static str {
        B::KIND
    }

    /// Attach to a peer.
    ///
    /// If the peer is already disconnecting, offline or failed, the handle
    /// records the peer and returns without running setup. `detach` must
    /// still be called to clear it.
    ///
    /// A setup error is returned as-is. The handle stays attached and keeps
    /// whatever setup registered, so `detach` cleans up.
    pub fn attach(&self, peer: Arc<dyn PeerConnection>) -> BehaviorResult<()> {
        let mut guard = self.state.lock();
        let state = &mut *guard;

        match &state.attachment {
            Attachment::Attached { peer: current, .. } => {
                return Err(BehaviorError::AlreadyAttached { peer: current.id() });
            }
            Attachment::Detached => return Err(BehaviorError::Retired),
            Attachment::Unattached => {}
        }

        let peer_id = peer.id();
        let peer_state = peer.state();
        if peer_state.is_disconnected() {
            state.attachment = Attachment::Attached {
                peer,
                setup_ran: false,
            };
            tracing::debug!(
                peer = %peer_id,
                behavior = B::KIND,
                state = %peer_state,
                "Peer already disconnected, skipping behavior setup"
            );
            return Ok(());
        }

        state.attachment = Attachment::Attached {
            peer: peer.clone(),
            setup_ran: true,
        };

        let mut ctx = AttachContext::new(&peer, &mut state.resources);
        if let Err(e) = state.behavior.setup(&mut ctx) {
            tracing::warn!(
                peer = %peer_id,
                behavior = B::KIND,
                error = %e,
                "Behavior setup failed"
            );
            return Err(e);
        }

        tracing::debug!(
            peer = %peer_id,
            behavior = B::KIND,
            resources = state.resources.len(),
            "Behavior attached"
        );
        Ok(())
    }

    /// Attach through a non-owning reference.
    ///
    /// Fails with [`BehaviorError::InvalidArgument`] if the peer is gone.
    pub fn attach_weak(&self, peer: &Weak<dyn PeerConnection>) -> BehaviorResult<()> {
        let peer = peer.upgrade().ok_or_else(|| {
            BehaviorError::InvalidArgument("peer connection no longer exists".to_string())
        })?;
        self.attach(peer)
    }

    /// Detach from the peer.
    ///
    /// Does nothing if the handle isn't attached. Otherwise runs teardown,
    /// releases every registered resource in registration order and clears
    /// the peer. Resources are released even if teardown fails.
    pub fn detach(&self) -> DetachOutcome {
        let mut guard = self.state.lock();
        Self::detach_locked(&mut guard)
    }

    fn detach_locked(state: &mut AttachmentState<B>) -> DetachOutcome {
        let (peer, setup_ran) =
            match std::mem::replace(&mut state.attachment, Attachment::Detached) {
                Attachment::Attached { peer, setup_ran } => (peer, setup_ran),
                other => {
                    state.attachment = other;
                    return DetachOutcome::NotAttached;
                }
            };

        // Moved out first: if teardown unwinds, dropping the registry still
        // releases everything.
        let mut resources = std::mem::take(&mut state.resources);

        let peer_id = peer.id();
        let mut ctx = DetachContext::new(&peer, setup_ran);
        let teardown_error = state.behavior.teardown(&mut ctx).err();
        if let Some(e) = &teardown_error {
            tracing::warn!(
                peer = %peer_id,
                behavior = B::KIND,
                error = %e,
                "Behavior teardown failed"
            );
        }

        let release = resources.release_all();

        tracing::debug!(
            peer = %peer_id,
            behavior = B::KIND,
            released = release.released,
            failures = release.failures.len(),
            "Behavior detached"
        );

        DetachOutcome::Detached(DetachReport {
            peer: peer_id,
            setup_ran,
            teardown_error,
            release,
        })
    }

    /// Register a resource to release at detach.
    ///
    /// On an unattached handle the resource is released immediately and
    /// [`BehaviorError::NotAttached`] is returned.
    pub fn register_resource(&self, mut resource: Box<dyn Resource>) -> BehaviorResult<()> {
        let mut state = self.state.lock();
        if !matches!(state.attachment, Attachment::Attached { .. }) {
            drop(state);
            if let Err(e) = resource.release() {
                tracing::warn!(
                    resource = %resource.describe(),
                    error = %e,
                    "Failed to release resource registered on unattached behavior"
                );
            }
            return Err(BehaviorError::NotAttached);
        }
        state.resources.register(resource);
        Ok(())
    }

    /// Fail with [`BehaviorError::ConfigurationAfterAttach`] if attached.
    pub fn assert_not_attached(&self) -> BehaviorResult<()> {
        let state = self.state.lock();
        Self::check_not_attached(&state)
    }

    fn check_not_attached(state: &AttachmentState<B>) -> BehaviorResult<()> {
        match state.attachment {
            Attachment::Attached { .. } => Err(BehaviorError::ConfigurationAfterAttach),
            _ => Ok(()),
        }
    }

    /// Mutate the behavior's configuration.
    ///
    /// Fails with [`BehaviorError::ConfigurationAfterAttach`] once attached.
    pub fn configure<R>(&self, f: impl FnOnce(&mut B) -> R) -> BehaviorResult<R> {
        let mut state = self.state.lock();
        Self::check_not_attached(&state)?;
        Ok(f(&mut state.behavior))
    }

    /// Read the behavior.
    pub fn with_behavior<R>(&self, f: impl FnOnce(&B) -> R) -> R {
        let state = self.state.lock();
        f(&state.behavior)
    }

    /// The peer this handle is attached to.
    pub fn attached_peer(&self) -> Option<Arc<dyn PeerConnection>> {
        match &self.state.lock().attachment {
            Attachment::Attached { peer, .. } => Some(peer.clone()),
            _ => None,
        }
    }

    /// Current attachment phase.
    pub fn phase(&self) -> AttachPhase {
        match &self.state.lock().attachment {
            Attachment::Unattached => AttachPhase::Unattached,
            Attachment::Attached { peer, setup_ran } => AttachPhase::Attached {
                peer: peer.id(),
                setup_ran: *setup_ran,
            },
            Attachment::Detached => AttachPhase::Detached,
        }
    }

    /// Check if the handle is attached.
    pub fn is_attached(&self) -> bool {
        matches!(self.phase(), AttachPhase::Attached { .. })
    }

    /// Number of resources awaiting release.
    pub fn resource_count(&self) -> usize {
        self.state.lock().resources.len()
    }
}

impl<B: Behavior> Clone for BehaviorHandle<B> {
    fn clone(&self) -> Self {
        Self::new(self.with_behavior(B::clone_config))
    }
}

impl<B: Behavior> Drop for BehaviorHandle<B> {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        let peer_id = match &state.attachment {
            Attachment::Attached { peer, .. } => peer.id(),
            _ => return,
        };

        // A teardown that panics here would abort the process. Only release.
        if std::thread::panicking() {
            state.attachment = Attachment::Detached;
            let release = std::mem::take(&mut state.resources).release_all();
            tracing::warn!(
                peer = %peer_id,
                behavior = B::KIND,
                released = release.released,
                failures = release.failures.len(),
                "Behavior dropped while panicking, teardown skipped"
            );
            return;
        }

        tracing::debug!(peer = %peer_id, behavior = B::KIND, "Detaching behavior on drop");
        Self::detach_locked(state);
    }
}

impl<B: Behavior> fmt::Debug for BehaviorHandle<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BehaviorHandle")
            .field("kind", &B::KIND)
            .field("phase", &self.phase())
            .field("resources", &self.resource_count())
            .finish()
    }
}
