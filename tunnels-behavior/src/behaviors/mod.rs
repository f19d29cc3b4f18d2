//! Concrete behaviors.

pub mod keepalive;

pub use keepalive::{KeepAliveBehavior, KeepAliveStats, PingSink};
