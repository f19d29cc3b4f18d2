//! Behavior attachment error types.

use thiserror::Error;

use crate::peer::PeerId;

/// Errors raised by the behavior attachment framework.
///
/// `AlreadyAttached`, `InvalidArgument`, `ConfigurationAfterAttach`,
/// `NotAttached`, `Retired` and `DuplicateBehavior` are usage errors: they
/// signal a bug in the caller and are never retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BehaviorError {
    /// The instance is already attached to a peer.
    #[error("Behavior already attached to {peer}")]
    AlreadyAttached { peer: PeerId },

    /// An argument was missing or malformed.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// A configuration change was attempted on an attached instance.
    #[error("Can't modify the behavior while it is attached")]
    ConfigurationAfterAttach,

    /// The operation requires an attached instance.
    #[error("Behavior is not attached to a peer")]
    NotAttached,

    /// The instance was detached and can't be attached again; clone it instead.
    #[error("Behavior was detached; clone the template to attach again")]
    Retired,

    /// A behavior of the same kind is already present.
    #[error("Duplicate behavior: {0}")]
    DuplicateBehavior(&'static str),

    /// The behavior's setup hook failed.
    #[error("Setup failed: {0}")]
    Setup(String),

    /// The behavior's teardown hook failed.
    #[error("Teardown failed: {0}")]
    Teardown(String),

    /// A registered resource failed to release.
    #[error("Failed to release {resource}: {reason}")]
    Release { resource: String, reason: String },
}

impl BehaviorError {
    /// Check if this error reports misuse of the attach/detach contract.
    pub fn is_usage_error(&self) -> bool {
        matches!(
            self,
            BehaviorError::AlreadyAttached { .. }
                | BehaviorError::InvalidArgument(_)
                | BehaviorError::ConfigurationAfterAttach
                | BehaviorError::NotAttached
                | BehaviorError::Retired
                | BehaviorError::DuplicateBehavior(_)
        )
    }
}

/// Result type for behavior operations.
pub type BehaviorResult<T> = Result<T, BehaviorError>;
