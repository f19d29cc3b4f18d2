//! Peer behavior attachment for the Tunnels P2P layer.
//!
//! A behavior is a protocol-handling module (keepalive, address relay,
//! header sync, ...) that lives for exactly one peer connection. This crate
//! provides:
//!
//! - The [`Behavior`] capability concrete behaviors implement
//! - [`BehaviorHandle`], which serializes attach/detach and releases every
//!   resource a behavior registered, exactly once
//! - [`BehaviorTemplates`] and [`PeerBehaviors`] for cloning configured
//!   templates onto each new connection
//!
//! # Lifecycle
//!
//! ```text
//! BehaviorTemplates ──clone──► BehaviorHandle ──attach(peer)──► setup()
//!                                                                 │
//!                                 register resources ◄────────────┘
//!                                                                 │
//!         released in order ◄── teardown() ◄── detach() ◄─────────┘
//! ```
//!
//! A handle is attached at most once. After `detach` it is discarded and the
//! template is cloned again for the next connection.
//!
//! # Usage
//!
//! ```ignore
//! use std::sync::Arc;
//! use tunnels_behavior::{BehaviorTemplates, KeepAliveBehavior, KeepAliveConfig, PeerHandle};
//!
//! let templates = BehaviorTemplates::new()
//!     .with(KeepAliveBehavior::new(KeepAliveConfig::default(), sink))?;
//!
//! let peer = Arc::new(PeerHandle::new(id, addr));
//! peer.transition_to(PeerState::HandShaked);
//! let (behaviors, failures) = templates.attach_to(peer.clone());
//! // ...
//! drop(behaviors); // detaches everything
//! ```

pub mod config;
pub mod error;

pub mod peer;
pub mod resource;
pub mod behavior;
pub mod controller;
pub mod set;
pub mod behaviors;

// Re-export main types
pub use behavior::{AttachContext, Behavior, DetachContext};
pub use behaviors::{KeepAliveBehavior, KeepAliveStats, PingSink};
pub use config::{KeepAliveConfig, DEFAULT_FIRST_PING_DELAY, DEFAULT_PING_INTERVAL};
pub use controller::{AttachPhase, BehaviorHandle, DetachOutcome, DetachReport};
pub use error::{BehaviorError, BehaviorResult};
pub use peer::{PeerConnection, PeerHandle, PeerId, PeerState};
pub use resource::{OnRelease, ReleaseFailure, ReleaseReport, Resource, ResourceRegistry, TaskResource};
pub use set::{AttachFailure, BehaviorTemplates, PeerBehavior, PeerBehaviors};
