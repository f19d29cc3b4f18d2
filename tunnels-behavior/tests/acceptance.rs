//! Acceptance tests for behavior attachment.
//!
//! These tests verify the acceptance criteria:
//! 1. Lifecycle - clone, attach, detach, detach again
//! 2. Exactly-once release - N resources, one release each
//! 3. No reattachment - attached and detached handles refuse attach
//! 4. Dead connection - setup skipped for disconnecting/failed/offline peers
//! 5. Clone isolation - clones share configuration only
//! 6. Attach race - concurrent attaches yield one success
//! 7. Configuration lock - configuration frozen while attached
//! 8. Node flow - templates cloned onto several peers with keepalive

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use tunnels_behavior::{
    AttachContext, AttachPhase, Behavior, BehaviorError, BehaviorHandle, BehaviorResult,
    BehaviorTemplates, DetachContext, DetachOutcome, KeepAliveBehavior,
    KeepAliveConfig, OnRelease, PeerConnection, PeerHandle, PeerId, PeerState, PingSink,
};

/// Counters shared between a test and every clone of its behavior.
#[derive(Default)]
struct Tally {
    setups: AtomicUsize,
    teardowns: AtomicUsize,
    registered: AtomicUsize,
    released: AtomicUsize,
}

/// Behavior whose setup counts itself and registers `resources` resources.
struct CountingBehavior {
    tally: Arc<Tally>,
    resources: usize,
    setup_delay: Duration,
}

impl CountingBehavior {
    fn new(tally: Arc<Tally>, resources: usize) -> Self {
        Self {
            tally,
            resources,
            setup_delay: Duration::ZERO,
        }
    }

    fn set_resources(&mut self, resources: usize) {
        self.resources = resources;
    }
}

impl Behavior for CountingBehavior {
    const KIND: &'static str = "counting";

    fn setup(&mut self, ctx: &mut AttachContext<'_>) -> BehaviorResult<()> {
        self.tally.setups.fetch_add(1, Ordering::SeqCst);
        if !self.setup_delay.is_zero() {
            thread::sleep(self.setup_delay);
        }
        for i in 0..self.resources {
            let tally = self.tally.clone();
            self.tally.registered.fetch_add(1, Ordering::SeqCst);
            ctx.register_fn(format!("counting-{}", i), move || {
                tally.released.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
        }
        Ok(())
    }

    fn teardown(&mut self, _ctx: &mut DetachContext<'_>) -> BehaviorResult<()> {
        self.tally.teardowns.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn clone_config(&self) -> Self {
        Self {
            tally: self.tally.clone(),
            resources: self.resources,
            setup_delay: self.setup_delay,
        }
    }
}

/// Install a test log subscriber honoring `RUST_LOG`.
fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

fn create_peer(id: u64, state: PeerState) -> Arc<PeerHandle> {
    Arc::new(PeerHandle::with_state(
        PeerId::new(id),
        format!("127.0.0.1:{}", 9000 + id).parse().unwrap(),
        state,
    ))
}

// ============================================================================
// Test 1: Lifecycle
// ============================================================================

#[test]
fn test_lifecycle_scenario() {
    init_logging();
    let tally = Arc::new(Tally::default());
    let template = BehaviorHandle::new(CountingBehavior::new(tally.clone(), 1));

    let x = create_peer(1, PeerState::Connected);
    let i1 = template.clone();
    i1.attach(x.clone()).unwrap();

    assert_eq!(tally.setups.load(Ordering::SeqCst), 1);
    assert_eq!(i1.resource_count(), 1);
    assert_eq!(i1.attached_peer().unwrap().id(), x.id());

    x.transition_to(PeerState::Offline);
    let outcome = i1.detach();
    assert!(outcome.is_detached());
    assert_eq!(tally.released.load(Ordering::SeqCst), 1);
    assert!(i1.attached_peer().is_none());
    assert_eq!(tally.setups.load(Ordering::SeqCst), 1);

    assert_eq!(i1.detach(), DetachOutcome::NotAttached);
    assert_eq!(tally.released.load(Ordering::SeqCst), 1);
    assert_eq!(tally.teardowns.load(Ordering::SeqCst), 1);

    // The template never attached.
    assert_eq!(template.phase(), AttachPhase::Unattached);
}

// ============================================================================
// Test 2: Exactly-once release
// ============================================================================

#[test]
fn test_exactly_once_release() {
    for n in [0usize, 1, 5, 32] {
        let tally = Arc::new(Tally::default());
        let instance = BehaviorHandle::new(CountingBehavior::new(tally.clone(), n));

        instance.attach(create_peer(1, PeerState::HandShaked)).unwrap();
        assert_eq!(tally.registered.load(Ordering::SeqCst), n);
        let report = instance.detach();
        assert_eq!(report.report().unwrap().release.released, n);
        assert_eq!(tally.released.load(Ordering::SeqCst), n);

        assert_eq!(instance.detach(), DetachOutcome::NotAttached);
        assert_eq!(tally.released.load(Ordering::SeqCst), n);
    }
}

#[test]
fn test_registration_racing_detach_never_leaks() {
    let tally = Arc::new(Tally::default());
    let instance = Arc::new(BehaviorHandle::new(CountingBehavior::new(tally.clone(), 0)));
    instance.attach(create_peer(1, PeerState::HandShaked)).unwrap();

    let released = Arc::new(AtomicUsize::new(0));
    let registrar = {
        let instance = instance.clone();
        let released = released.clone();
        thread::spawn(move || {
            for i in 0..200 {
                let released = released.clone();
                let _ = instance.register_resource(Box::new(OnRelease::new(
                    format!("late-{}", i),
                    move || {
                        released.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    },
                )));
            }
        })
    };

    thread::sleep(Duration::from_millis(1));
    instance.detach();
    registrar.join().unwrap();

    // Registered before detach: released by detach. After: released on the spot.
    assert_eq!(released.load(Ordering::SeqCst), 200);
    assert_eq!(instance.resource_count(), 0);
}

// ============================================================================
// Test 3: No reattachment
// ============================================================================

#[test]
fn test_no_reattachment_without_clone() {
    let tally = Arc::new(Tally::default());
    let instance = BehaviorHandle::new(CountingBehavior::new(tally.clone(), 2));

    instance.attach(create_peer(1, PeerState::HandShaked)).unwrap();
    let err = instance.attach(create_peer(2, PeerState::HandShaked)).unwrap_err();
    assert_eq!(err, BehaviorError::AlreadyAttached { peer: PeerId::new(1) });
    assert!(err.is_usage_error());
    assert_eq!(instance.attached_peer().unwrap().id(), PeerId::new(1));
    assert_eq!(instance.resource_count(), 2);
    assert_eq!(tally.setups.load(Ordering::SeqCst), 1);

    instance.detach();
    assert_eq!(
        instance.attach(create_peer(3, PeerState::HandShaked)),
        Err(BehaviorError::Retired)
    );

    // A fresh clone attaches fine.
    let fresh = instance.clone();
    fresh.attach(create_peer(3, PeerState::HandShaked)).unwrap();
    assert_eq!(tally.setups.load(Ordering::SeqCst), 2);
}

// ============================================================================
// Test 4: Dead connection fast path
// ============================================================================

#[test]
fn test_dead_connection_fast_path() {
    for state in [PeerState::Disconnecting, PeerState::Failed, PeerState::Offline] {
        let tally = Arc::new(Tally::default());
        let instance = BehaviorHandle::new(CountingBehavior::new(tally.clone(), 3));
        let peer = create_peer(7, state);

        instance.attach(peer.clone()).unwrap();
        assert_eq!(tally.setups.load(Ordering::SeqCst), 0, "state {}", state);
        assert_eq!(instance.attached_peer().unwrap().id(), peer.id());
        assert_eq!(instance.resource_count(), 0);

        assert!(instance.detach().is_detached());
        assert!(instance.attached_peer().is_none());
        assert_eq!(tally.released.load(Ordering::SeqCst), 0);
    }
}

#[test]
fn test_live_states_run_setup() {
    for state in [
        PeerState::Created,
        PeerState::Connecting,
        PeerState::Connected,
        PeerState::HandShaked,
    ] {
        let tally = Arc::new(Tally::default());
        let instance = BehaviorHandle::new(CountingBehavior::new(tally.clone(), 1));

        instance.attach(create_peer(1, state)).unwrap();
        assert_eq!(tally.setups.load(Ordering::SeqCst), 1, "state {}", state);
    }
}

// ============================================================================
// Test 5: Clone isolation
// ============================================================================

#[test]
fn test_clone_isolation() {
    let tally = Arc::new(Tally::default());
    let source = BehaviorHandle::new(CountingBehavior::new(tally.clone(), 2));
    source.attach(create_peer(1, PeerState::HandShaked)).unwrap();

    let clone = source.clone();
    assert_eq!(clone.phase(), AttachPhase::Unattached);
    assert_eq!(clone.resource_count(), 0);
    assert_eq!(clone.with_behavior(|b| b.resources), 2);

    clone.attach(create_peer(2, PeerState::HandShaked)).unwrap();
    clone
        .register_resource(Box::new(OnRelease::new("clone-only", || Ok(()))))
        .unwrap();
    assert_eq!(clone.resource_count(), 3);
    assert_eq!(source.resource_count(), 2);

    source.detach();
    assert_eq!(clone.resource_count(), 3);
    assert_eq!(clone.attached_peer().unwrap().id(), PeerId::new(2));
}

// ============================================================================
// Test 6: Attach race
// ============================================================================

#[test]
fn test_concurrent_attach_race() {
    for round in 0..50 {
        let tally = Arc::new(Tally::default());
        let mut behavior = CountingBehavior::new(tally.clone(), 1);
        behavior.setup_delay = Duration::from_micros(200);
        let instance = Arc::new(BehaviorHandle::new(behavior));
        let barrier = Arc::new(Barrier::new(2));

        let workers: Vec<_> = (0..2u64)
            .map(|i| {
                let instance = instance.clone();
                let barrier = barrier.clone();
                thread::spawn(move || {
                    let peer = create_peer(100 + i, PeerState::HandShaked);
                    barrier.wait();
                    instance.attach(peer).map(|_| 100 + i)
                })
            })
            .collect();

        let results: Vec<_> = workers.into_iter().map(|w| w.join().unwrap()).collect();
        let winners: Vec<u64> = results.iter().filter_map(|r| r.as_ref().ok().copied()).collect();
        let losers: Vec<&BehaviorError> = results.iter().filter_map(|r| r.as_ref().err()).collect();

        assert_eq!(winners.len(), 1, "round {}", round);
        assert_eq!(losers.len(), 1, "round {}", round);
        assert_eq!(
            *losers[0],
            BehaviorError::AlreadyAttached { peer: PeerId::new(winners[0]) }
        );
        assert_eq!(instance.attached_peer().unwrap().id(), PeerId::new(winners[0]));
        assert_eq!(tally.setups.load(Ordering::SeqCst), 1);
    }
}

#[test]
fn test_concurrent_detach_releases_once() {
    let tally = Arc::new(Tally::default());
    let instance = Arc::new(BehaviorHandle::new(CountingBehavior::new(tally.clone(), 4)));
    instance.attach(create_peer(1, PeerState::HandShaked)).unwrap();

    let barrier = Arc::new(Barrier::new(4));
    let workers: Vec<_> = (0..4)
        .map(|_| {
            let instance = instance.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                instance.detach().is_detached()
            })
        })
        .collect();

    let detached = workers
        .into_iter()
        .map(|w| w.join().unwrap())
        .filter(|d| *d)
        .count();
    assert_eq!(detached, 1);
    assert_eq!(tally.teardowns.load(Ordering::SeqCst), 1);
    assert_eq!(tally.released.load(Ordering::SeqCst), 4);
}

// ============================================================================
// Test 7: Configuration lock
// ============================================================================

#[test]
fn test_configuration_lock() {
    let tally = Arc::new(Tally::default());
    let instance = BehaviorHandle::new(CountingBehavior::new(tally.clone(), 1));

    instance.configure(|b| b.set_resources(2)).unwrap();
    instance.attach(create_peer(1, PeerState::HandShaked)).unwrap();
    assert_eq!(instance.resource_count(), 2);

    assert_eq!(
        instance.configure(|b| b.set_resources(5)),
        Err(BehaviorError::ConfigurationAfterAttach)
    );
    assert_eq!(instance.with_behavior(|b| b.resources), 2);
}

// ============================================================================
// Test 8: Node flow
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_templates_across_peers() {
    init_logging();
    let (tx, mut rx) = mpsc::unbounded_channel::<(PeerId, u64)>();
    let sink: PingSink = Arc::new(move |peer, nonce| tx.send((peer, nonce)).is_ok());
    let tally = Arc::new(Tally::default());

    let templates = BehaviorTemplates::new()
        .with(CountingBehavior::new(tally.clone(), 1))
        .unwrap()
        .with(KeepAliveBehavior::new(
            KeepAliveConfig::new(Duration::from_millis(20))
                .with_first_ping_delay(Duration::ZERO),
            sink,
        ))
        .unwrap();
    assert_eq!(templates.kinds(), vec!["counting", "keepalive"]);

    let peers: Vec<_> = (1..=3).map(|id| create_peer(id, PeerState::HandShaked)).collect();
    let mut attached = Vec::new();
    for peer in &peers {
        let (behaviors, failures) = templates.attach_to(peer.clone());
        assert!(failures.is_empty());
        attached.push(behaviors);
    }
    assert_eq!(tally.setups.load(Ordering::SeqCst), 3);

    // Every peer gets pinged.
    let mut pinged = std::collections::HashSet::new();
    while pinged.len() < peers.len() {
        let (peer, _) = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("keepalive should ping every peer")
            .unwrap();
        pinged.insert(peer);
    }

    // Peer 2 goes away: its behaviors are detached, the others keep running.
    peers[1].transition_to(PeerState::Disconnecting);
    let gone = attached.remove(1);
    drop(gone);
    assert_eq!(tally.teardowns.load(Ordering::SeqCst), 1);
    assert_eq!(tally.released.load(Ordering::SeqCst), 1);

    for behaviors in &attached {
        let keepalive = behaviors.find::<KeepAliveBehavior>().unwrap();
        assert!(keepalive.is_attached());
    }

    // A late connection to an already failed peer skips setup entirely.
    let failed = create_peer(4, PeerState::Failed);
    let (late, failures) = templates.attach_to(failed.clone());
    assert!(failures.is_empty());
    assert_eq!(tally.setups.load(Ordering::SeqCst), 3);
    assert_eq!(
        late.find::<CountingBehavior>().unwrap().attached_peer().unwrap().id(),
        failed.id()
    );

    drop(late);
    attached.clear();
    assert_eq!(tally.teardowns.load(Ordering::SeqCst), 4);
    assert_eq!(tally.released.load(Ordering::SeqCst), 3);
}
