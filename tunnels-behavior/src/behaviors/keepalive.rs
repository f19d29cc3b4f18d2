//! Keepalive behavior.
//!
//! Pings the peer at a fixed interval for as long as it stays attached and
//! connected. Ticks that fire before the version handshake completes are
//! skipped. The ping itself is handed to a [`PingSink`] supplied by the
//! transport; this behavior only decides when to ping.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::watch;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use crate::behavior::{AttachContext, Behavior, DetachContext};
use crate::config::KeepAliveConfig;
use crate::error::{BehaviorError, BehaviorResult};
use crate::peer::{PeerId, PeerState};

/// Queues a ping with the given nonce to a peer.
///
/// Returns false if the peer can no longer be written to, which stops the
/// pinger.
pub type PingSink = Arc<dyn Fn(PeerId, u64) -> bool + Send + Sync>;

/// Per-attachment keepalive statistics.
#[derive(Debug, Default)]
pub struct KeepAliveStats {
    pings_sent: AtomicU64,
}

impl KeepAliveStats {
    /// Number of pings handed to the sink.
    pub fn pings_sent(&self) -> u64 {
        self.pings_sent.load(Ordering::Relaxed)
    }
}

/// Periodically pings the attached peer.
pub struct KeepAliveBehavior {
    config: KeepAliveConfig,
    sink: PingSink,
    stats: Arc<KeepAliveStats>,
}

impl KeepAliveBehavior {
    /// Create a keepalive template.
    pub fn new(config: KeepAliveConfig, sink: PingSink) -> Self {
        Self {
            config,
            sink,
            stats: Arc::new(KeepAliveStats::default()),
        }
    }

    /// Current configuration.
    pub fn config(&self) -> &KeepAliveConfig {
        &self.config
    }

    /// Replace the configuration.
    ///
    /// Only reachable through [`BehaviorHandle::configure`](crate::BehaviorHandle::configure),
    /// which refuses once attached.
    pub fn set_config(&mut self, config: KeepAliveConfig) {
        self.config = config;
    }

    /// Statistics for this instance.
    pub fn stats(&self) -> Arc<KeepAliveStats> {
        self.stats.clone()
    }
}

impl fmt::Debug for KeepAliveBehavior {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeepAliveBehavior")
            .field("config", &self.config)
            .field("stats", &self.stats)
            .finish()
    }
}

impl Behavior for KeepAliveBehavior {
    const KIND: &'static str = "keepalive";

    fn setup(&mut self, ctx: &mut AttachContext<'_>) -> BehaviorResult<()> {
        self.config.validate()?;
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| BehaviorError::Setup(format!("keepalive needs a tokio runtime: {}", e)))?;

        let peer = ctx.peer().clone();
        let peer_id = ctx.peer_id();
        let mut state_rx = ctx.peer().subscribe_state();
        let sink = self.sink.clone();
        let stats = self.stats.clone();
        let start = Instant::now() + self.config.first_ping_delay;
        let period = self.config.ping_interval;

        let handle = runtime.spawn(async move {
            let mut ticker = interval_at(start, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut nonce = 0u64;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if !peer.state().is_handshaked() {
                            tracing::trace!(peer = %peer_id, "Handshake pending, skipping ping");
                            continue;
                        }
                        nonce = nonce.wrapping_add(1);
                        if !sink(peer_id, nonce) {
                            tracing::debug!(peer = %peer_id, "Ping sink closed, stopping keepalive");
                            break;
                        }
                        stats.pings_sent.fetch_add(1, Ordering::Relaxed);
                    }
                    _ = wait_for_disconnect(&mut state_rx) => {
                        tracing::debug!(peer = %peer_id, "Peer disconnected, stopping keepalive");
                        break;
                    }
                }
            }
        });

        ctx.register_task("keepalive", handle);
        Ok(())
    }

    fn teardown(&mut self, ctx: &mut DetachContext<'_>) -> BehaviorResult<()> {
        tracing::debug!(
            peer = %ctx.peer_id(),
            pings_sent = self.stats.pings_sent(),
            "Keepalive stopped"
        );
        Ok(())
    }

    fn clone_config(&self) -> Self {
        Self::new(self.config.clone(), self.sink.clone())
    }
}

/// Resolves once the peer reports a disconnected state.
///
/// Never resolves if the peer doesn't publish state changes.
async fn wait_for_disconnect(state_rx: &mut Option<watch::Receiver<PeerState>>) {
    let Some(rx) = state_rx else {
        return std::future::pending().await;
    };
    loop {
        if rx.borrow_and_update().is_disconnected() {
            return;
        }
        if rx.changed().await.is_err() {
            return;
        }
    }
}
