//! The connection side of an attachment.
//!
//! Behaviors never own a connection. They see it through [`PeerConnection`],
//! which exposes only an identity and the current state. [`PeerHandle`] is a
//! ready-made implementation that the transport updates as the socket moves
//! through its lifecycle.

pub mod state;

use std::fmt;
use std::net::SocketAddr;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

pub use state::PeerState;

/// Identity a behavior attaches to, unique per connection for the node's
/// lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeerId(pub u64);

impl PeerId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }
}

impl From<u64> for PeerId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "peer-{}", self.0)
    }
}

/// Read-only view of a peer connection.
pub trait PeerConnection: Send + Sync + fmt::Debug {
    /// Identity of the connection.
    fn id(&self) -> PeerId;

    /// Current connection state.
    fn state(&self) -> PeerState;

    /// Subscribe to state changes, if the connection publishes them.
    fn subscribe_state(&self) -> Option<watch::Receiver<PeerState>> {
        None
    }
}

/// Thread-safe connection state holder.
///
/// The transport calls [`PeerHandle::transition_to`]; behaviors read the
/// state or subscribe to it.
pub struct PeerHandle {
    id: PeerId,
    addr: SocketAddr,
    state_tx: watch::Sender<PeerState>,
}

impl PeerHandle {
    /// Create a handle in the `Created` state.
    pub fn new(id: PeerId, addr: SocketAddr) -> Self {
        Self::with_state(id, addr, PeerState::Created)
    }

    /// Create a handle in a given state.
    pub fn with_state(
        id: PeerId,
        addr: SocketAddr,
        state: PeerState,
    ) -> Self {
        let (state_tx, _) = watch::channel(state);
        Self {
            id,
            addr,
            state_tx,
        }
    }

    /// Socket address of the peer.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Transition to a new state.
    pub fn transition_to(&self, new_state: PeerState) {
        let old_state = self.state_tx.send_replace(new_state);
        tracing::debug!(
            peer = %self.id,
            from = %old_state,
            to = %new_state,
            "Peer state transition"
        );
    }
}

impl PeerConnection for PeerHandle {
    fn id(&self) -> PeerId {
        self.id
    }

    fn state(&self) -> PeerState {
        *self.state_tx.borrow()
    }

    fn subscribe_state(&self) -> Option<watch::Receiver<PeerState>> {
        Some(self.state_tx.subscribe())
    }
}

impl fmt::Debug for PeerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeerHandle")
            .field("id", &self.id)
            .field("addr", &self.addr)
            .field("state", &self.state())
            .finish()
    }
}

impl fmt::Display for PeerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}, {})", self.id, self.addr, self.state())
    }
}
