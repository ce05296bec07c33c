//! End-to-end engine scenarios driven by stub attackers: pacing accuracy,
//! mixed outcomes, cancellation, backpressure, and error isolation.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use galick_core::attack::{AttackContext, Attacker};
use galick_core::engine::{Engine, EngineStatus, RunConfig};
use galick_core::metrics::AttackResult;

// ---------------------------------------------------------------------------
// Stub attackers
// ---------------------------------------------------------------------------

/// Sleeps for `latency`, then reports that latency with a fixed status code.
struct FixedAttacker {
    latency: Duration,
    code: u16,
    calls: AtomicU64,
}

impl FixedAttacker {
    fn new(latency: Duration, code: u16) -> Self {
        Self {
            latency,
            code,
            calls: AtomicU64::new(0),
        }
    }
}

#[async_trait]
impl Attacker for FixedAttacker {
    async fn attack(&self, _ctx: &AttackContext) -> AttackResult {
        self.calls.fetch_add(1, Ordering::Relaxed);
        let start = Instant::now();
        tokio::time::sleep(self.latency).await;
        AttackResult {
            timestamp: start,
            latency: self.latency,
            code: self.code,
            bytes_in: 0,
            bytes_out: 0,
            error: None,
        }
    }

    fn name(&self) -> &'static str {
        "stub"
    }
}

/// Alternates between a fast 200 and a slower 500 on successive calls.
struct AlternatingAttacker {
    calls: AtomicU64,
}

#[async_trait]
impl Attacker for AlternatingAttacker {
    async fn attack(&self, _ctx: &AttackContext) -> AttackResult {
        let n = self.calls.fetch_add(1, Ordering::Relaxed);
        let start = Instant::now();
        let (latency, code) = if n % 2 == 0 {
            (Duration::from_millis(10), 200)
        } else {
            (Duration::from_millis(20), 500)
        };
        tokio::time::sleep(latency).await;
        AttackResult {
            timestamp: start,
            latency,
            code,
            bytes_in: 0,
            bytes_out: 0,
            error: None,
        }
    }

    fn name(&self) -> &'static str {
        "stub"
    }
}

/// Records the start instant of every call, so tests can assert that no
/// request departs after cancellation was observed.
struct RecordingAttacker {
    starts: Mutex<Vec<Instant>>,
    latency: Duration,
}

#[async_trait]
impl Attacker for RecordingAttacker {
    async fn attack(&self, _ctx: &AttackContext) -> AttackResult {
        let start = Instant::now();
        self.starts.lock().unwrap().push(start);
        tokio::time::sleep(self.latency).await;
        AttackResult {
            timestamp: start,
            latency: self.latency,
            code: 200,
            bytes_in: 0,
            bytes_out: 0,
            error: None,
        }
    }

    fn name(&self) -> &'static str {
        "stub"
    }
}

/// Fails every third call with a script-style error message.
struct ThirdFailsAttacker {
    calls: AtomicU64,
}

#[async_trait]
impl Attacker for ThirdFailsAttacker {
    async fn attack(&self, _ctx: &AttackContext) -> AttackResult {
        let n = self.calls.fetch_add(1, Ordering::Relaxed);
        let start = Instant::now();
        tokio::time::sleep(Duration::from_millis(1)).await;
        if n % 3 == 2 {
            AttackResult::failure(start, "script error: deliberate")
        } else {
            AttackResult {
                timestamp: start,
                latency: Duration::from_millis(1),
                code: 200,
                bytes_in: 0,
                bytes_out: 0,
                error: None,
            }
        }
    }

    fn name(&self) -> &'static str {
        "stub"
    }
}

/// Panics on every call; the engine must contain it.
struct PanickingAttacker;

#[async_trait]
impl Attacker for PanickingAttacker {
    async fn attack(&self, _ctx: &AttackContext) -> AttackResult {
        panic!("deliberate attacker panic");
    }

    fn name(&self) -> &'static str {
        "stub"
    }
}

fn config(rate: u32, workers: u32, duration: Duration) -> RunConfig {
    RunConfig {
        rate,
        workers,
        duration,
        timeout: Duration::from_secs(10),
        insecure: false,
    }
}

// ---------------------------------------------------------------------------
// Scenario: fixed-latency success
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread")]
async fn fixed_latency_run_hits_target_rate() {
    let attacker = Arc::new(FixedAttacker::new(Duration::from_millis(1), 200));
    let engine = Engine::new(attacker.clone(), config(10, 2, Duration::from_secs(1)));

    let start = Instant::now();
    engine.run(CancellationToken::new()).await;
    let elapsed = start.elapsed();

    let snap = engine.stats().snapshot();
    // 10 ticks/s for 1s; allow generous timer jitter either way.
    assert!(snap.total_requests >= 7, "total was {}", snap.total_requests);
    assert!(
        snap.total_requests <= 12,
        "total was {}",
        snap.total_requests
    );
    assert_eq!(snap.success_count, snap.total_requests);
    assert_eq!(snap.error_count, 0);
    assert_eq!(attacker.calls.load(Ordering::Relaxed), snap.total_requests);

    // Run blocks for the configured duration plus drain slack.
    assert!(elapsed >= Duration::from_secs(1), "elapsed was {elapsed:?}");
    assert!(
        elapsed <= Duration::from_millis(1800),
        "elapsed was {elapsed:?}"
    );
    assert_eq!(engine.status().await, EngineStatus::Done);
}

// ---------------------------------------------------------------------------
// Scenario: mixed outcomes
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread")]
async fn alternating_outcomes_split_success_and_error() {
    let attacker = Arc::new(AlternatingAttacker {
        calls: AtomicU64::new(0),
    });
    let engine = Engine::new(attacker, config(100, 4, Duration::from_secs(1)));
    engine.run(CancellationToken::new()).await;

    let snap = engine.stats().snapshot();
    assert!(snap.total_requests > 20, "total was {}", snap.total_requests);
    assert_eq!(snap.success_count + snap.error_count, snap.total_requests);

    // Alternating 200/500 at equal weight: success lands near 50%.
    let success_rate = snap.success_rate();
    assert!(
        (0.35..=0.65).contains(&success_rate),
        "success rate was {success_rate}"
    );

    // All latencies are 10ms or 20ms, so the mean sits strictly between.
    let mean = snap.mean();
    assert!(
        mean > Duration::from_millis(9) && mean < Duration::from_millis(21),
        "mean was {mean:?}"
    );
}

// ---------------------------------------------------------------------------
// Scenario: cancellation
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread")]
async fn cancellation_stops_departures_promptly() {
    let attacker = Arc::new(RecordingAttacker {
        starts: Mutex::new(Vec::new()),
        latency: Duration::from_millis(50),
    });
    let engine = Engine::new(attacker.clone(), config(20, 2, Duration::from_secs(10)));

    let cancel = CancellationToken::new();
    let canceller = cancel.clone();
    let run_start = Instant::now();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(500)).await;
        canceller.cancel();
    });

    engine.run(cancel).await;
    let elapsed = run_start.elapsed();
    let cancel_offset = Duration::from_millis(500);

    // Run ends shortly after the cancel, not after the 10s duration.
    assert!(elapsed < Duration::from_secs(2), "elapsed was {elapsed:?}");

    // At most rate * 0.55s departures plus one in-flight per worker.
    let snap = engine.stats().snapshot();
    assert!(
        snap.total_requests <= 11 + 2 + 4,
        "total was {}",
        snap.total_requests
    );

    // No request departed after cancellation was observable.
    let starts = attacker.starts.lock().unwrap();
    let limit = cancel_offset + Duration::from_millis(150);
    for s in starts.iter() {
        let offset = s.duration_since(run_start);
        assert!(offset < limit, "request departed at {offset:?} after cancel");
    }

    assert_eq!(engine.status().await, EngineStatus::Done);
}

// ---------------------------------------------------------------------------
// Scenario: backpressure
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread")]
async fn slow_attacker_sheds_ticks_instead_of_queueing() {
    let attacker = Arc::new(FixedAttacker::new(Duration::from_secs(1), 200));
    let engine = Engine::new(attacker, config(100, 2, Duration::from_secs(2)));

    let start = Instant::now();
    engine.run(CancellationToken::new()).await;
    let elapsed = start.elapsed();

    let snap = engine.stats().snapshot();
    // Two workers at ~1 req/s each over 2s, plus one drain-phase completion
    // apiece: the workers are the bottleneck, never a hidden queue.
    assert!(snap.total_requests <= 8, "total was {}", snap.total_requests);
    assert!(snap.total_requests >= 2, "total was {}", snap.total_requests);

    // Ticks the workers could not claim were shed, not buffered.
    assert!(engine.dropped_ticks() > 0);

    // No deadlock: duration plus at most one in-flight request.
    assert!(
        elapsed <= Duration::from_millis(3500),
        "elapsed was {elapsed:?}"
    );
}

// ---------------------------------------------------------------------------
// Scenario: attacker error isolation
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread")]
async fn failing_attacker_calls_do_not_stop_the_run() {
    let attacker = Arc::new(ThirdFailsAttacker {
        calls: AtomicU64::new(0),
    });
    let engine = Engine::new(attacker, config(30, 3, Duration::from_secs(1)));
    engine.run(CancellationToken::new()).await;

    let snap = engine.stats().snapshot();
    assert!(snap.total_requests > 10, "total was {}", snap.total_requests);
    assert_eq!(snap.success_count + snap.error_count, snap.total_requests);

    // Every third call fails: error count lands near a third of the total.
    let error_fraction = snap.error_count as f64 / snap.total_requests as f64;
    assert!(
        (0.2..=0.47).contains(&error_fraction),
        "error fraction was {error_fraction}"
    );
    assert_eq!(engine.status().await, EngineStatus::Done);
}

#[tokio::test(flavor = "multi_thread")]
async fn panicking_attacker_is_contained() {
    let engine = Engine::new(
        Arc::new(PanickingAttacker),
        config(20, 2, Duration::from_millis(500)),
    );
    engine.run(CancellationToken::new()).await;

    let snap = engine.stats().snapshot();
    assert!(snap.total_requests > 0, "panics should still be recorded");
    assert_eq!(snap.error_count, snap.total_requests);
    assert_eq!(snap.success_count, 0);
    assert_eq!(engine.status().await, EngineStatus::Done);
}

// ---------------------------------------------------------------------------
// Boundary behaviours
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread")]
async fn zero_rate_returns_immediately_with_no_requests() {
    let engine = Engine::new(
        Arc::new(FixedAttacker::new(Duration::from_millis(1), 200)),
        config(0, 4, Duration::from_secs(5)),
    );
    let start = Instant::now();
    engine.run(CancellationToken::new()).await;

    assert!(start.elapsed() < Duration::from_millis(250));
    assert_eq!(engine.stats().snapshot().total_requests, 0);
    assert_eq!(engine.status().await, EngineStatus::Done);
}

#[tokio::test(flavor = "multi_thread")]
async fn zero_workers_returns_immediately_with_no_requests() {
    let engine = Engine::new(
        Arc::new(FixedAttacker::new(Duration::from_millis(1), 200)),
        config(10, 0, Duration::from_secs(5)),
    );
    let start = Instant::now();
    engine.run(CancellationToken::new()).await;

    assert!(start.elapsed() < Duration::from_millis(250));
    assert_eq!(engine.stats().snapshot().total_requests, 0);
    assert_eq!(engine.status().await, EngineStatus::Done);
}

#[tokio::test(flavor = "multi_thread")]
async fn zero_duration_returns_immediately_with_no_requests() {
    let engine = Engine::new(
        Arc::new(FixedAttacker::new(Duration::from_millis(1), 200)),
        config(10, 4, Duration::ZERO),
    );
    let start = Instant::now();
    engine.run(CancellationToken::new()).await;

    assert!(start.elapsed() < Duration::from_millis(250));
    assert_eq!(engine.stats().snapshot().total_requests, 0);
    assert_eq!(engine.status().await, EngineStatus::Done);
}
