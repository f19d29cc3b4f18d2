//! Peer connection state.

use std::fmt;

/// State of a peer connection, as reported by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PeerState {
    /// Connection object exists, no socket yet.
    #[default]
    Created,
    /// Socket is being opened.
    Connecting,
    /// Socket open, handshake not complete.
    Connected,
    /// Version handshake complete.
    HandShaked,
    /// Gracefully disconnecting.
    Disconnecting,
    /// Disconnected, no further events will arrive.
    Offline,
    /// Connection failed.
    Failed,
}

impl PeerState {
    /// Check if the connection is going away or already gone.
    ///
    /// Behaviors attached in one of these states skip their setup.
    pub fn is_disconnected(&self) -> bool {
        matches!(
            self,
            PeerState::Disconnecting | PeerState::Offline | PeerState::Failed
        )
    }

    /// Check if the handshake has completed.
    ///
    /// Keepalive pings wait for this.
    pub fn is_handshaked(&self) -> bool {
        matches!(self, PeerState::HandShaked)
    }
}

impl fmt::Display for PeerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PeerState::Created => write!(f, "created"),
            PeerState::Connecting => write!(f, "connecting"),
            PeerState::Connected => write!(f, "connected"),
            PeerState::HandShaked => write!(f, "handshaked"),
            PeerState::Disconnecting => write!(f, "disconnecting"),
            PeerState::Offline => write!(f, "offline"),
            PeerState::Failed => write!(f, "failed"),
        }
    }
}
