use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tokio::sync::{RwLock, Semaphore};
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::attack::{AttackContext, Attacker};
use crate::error::GalickError;
use crate::metrics::{AttackResult, Stats};

// ---------------------------------------------------------------------------
// EngineStatus
// ---------------------------------------------------------------------------

/// Lifecycle state of one engine run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineStatus {
    /// Engine is constructed but `run` has not been invoked.
    #[default]
    Idle,
    /// The pacer is emitting ticks and workers are attacking.
    Running,
    /// The tick source is closed; in-flight requests are completing.
    Draining,
    /// All workers have returned; statistics are final.
    Done,
}

impl std::fmt::Display for EngineStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            EngineStatus::Idle => "idle",
            EngineStatus::Running => "running",
            EngineStatus::Draining => "draining",
            EngineStatus::Done => "done",
        };
        write!(f, "{s}")
    }
}

// ---------------------------------------------------------------------------
// RunConfig
// ---------------------------------------------------------------------------

/// Immutable parameters for one load-test run.
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Target departures per second (open loop).
    pub rate: u32,
    /// Number of long-lived worker tasks.
    pub workers: u32,
    /// Total run duration.
    pub duration: Duration,
    /// Per-request timeout.
    pub timeout: Duration,
    /// Skip TLS certificate verification when building attackers.
    pub insecure: bool,
}

impl RunConfig {
    /// Reject configurations that could never produce load. `Engine::run`
    /// additionally short-circuits these to an immediate `Done`, so callers
    /// that skip validation still cannot busy-spin.
    pub fn validate(&self) -> Result<(), GalickError> {
        if self.rate == 0 {
            return Err(GalickError::Validation(
                "rate must be greater than zero".to_string(),
            ));
        }
        if self.workers == 0 {
            return Err(GalickError::Validation(
                "worker count must be greater than zero".to_string(),
            ));
        }
        if self.duration.is_zero() {
            return Err(GalickError::Validation(
                "duration must be greater than zero".to_string(),
            ));
        }
        if self.timeout.is_zero() {
            return Err(GalickError::Validation(
                "timeout must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// The load-generation engine: an open-loop pacer feeding a fixed worker
/// pool through a depth-one tick hand-off.
///
/// Intended departure times are independent of target latency: tick `i`
/// departs at `run_start + i / rate`. When every worker is busy, the tick is
/// dropped rather than queued, so a slow target shows up as reduced observed
/// QPS instead of a silently drifting schedule.
pub struct Engine {
    attacker: Arc<dyn Attacker>,
    config: RunConfig,
    stats: Arc<Stats>,
    status: Arc<RwLock<EngineStatus>>,
    dropped_ticks: AtomicU64,
}

impl Engine {
    pub fn new(attacker: Arc<dyn Attacker>, config: RunConfig) -> Self {
        Self {
            attacker,
            config,
            stats: Arc::new(Stats::new()),
            status: Arc::new(RwLock::new(EngineStatus::Idle)),
            dropped_ticks: AtomicU64::new(0),
        }
    }

    /// Shared handle to the run's statistics. Workers write through their
    /// own clones; presenters should only call `snapshot` on it.
    pub fn stats(&self) -> Arc<Stats> {
        Arc::clone(&self.stats)
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Protocol tag of the attacker driving this run.
    pub fn attacker_name(&self) -> &'static str {
        self.attacker.name()
    }

    pub async fn status(&self) -> EngineStatus {
        self.status.read().await.clone()
    }

    /// Ticks the pacer dropped because every worker was busy. Dropped ticks
    /// are departures that never happened, so they live here rather than in
    /// the request statistics.
    pub fn dropped_ticks(&self) -> u64 {
        self.dropped_ticks.load(Ordering::Relaxed)
    }

    async fn set_status(&self, status: EngineStatus) {
        tracing::debug!(%status, "engine status change");
        *self.status.write().await = status;
    }

    /// Execute the run to completion. Blocks until every worker has exited;
    /// results that complete during draining are included in the statistics.
    ///
    /// Cancelling `cancel` (user key, OS signal) ends the run early through
    /// the same path as duration expiry.
    pub async fn run(&self, cancel: CancellationToken) {
        if self.config.rate == 0 || self.config.workers == 0 || self.config.duration.is_zero() {
            tracing::warn!(
                rate = self.config.rate,
                workers = self.config.workers,
                duration_ms = self.config.duration.as_millis() as u64,
                "degenerate run configuration, finishing immediately"
            );
            self.set_status(EngineStatus::Done).await;
            return;
        }

        self.set_status(EngineStatus::Running).await;

        // One token tree: the duration timer and the external cancel both
        // cancel `run_token`, which every task observes.
        let run_token = cancel.child_token();
        let timer = {
            let token = run_token.clone();
            let duration = self.config.duration;
            tokio::spawn(async move {
                tokio::select! {
                    _ = tokio::time::sleep(duration) => token.cancel(),
                    _ = token.cancelled() => {}
                }
            })
        };

        // Depth-one tick hand-off: at most one permit is ever outstanding,
        // so the pacer can never build a backlog behind busy workers.
        let ticks = Arc::new(Semaphore::new(0));

        let mut workers: JoinSet<()> = JoinSet::new();
        for worker_id in 0..self.config.workers {
            let ticks = Arc::clone(&ticks);
            let stats = Arc::clone(&self.stats);
            let attacker = Arc::clone(&self.attacker);
            let token = run_token.clone();
            let ctx = AttackContext {
                cancel: run_token.clone(),
                timeout: self.config.timeout,
            };

            workers.spawn(async move {
                run_worker(worker_id, ticks, attacker, stats, token, ctx).await;
            });
        }

        // Pacer: one tick per 1s/rate on a drift-resistant ticker. Skipping
        // missed fires (rather than bursting) matches the drop policy.
        let mut period = Duration::from_secs(1) / self.config.rate;
        if period.is_zero() {
            period = Duration::from_nanos(1);
        }
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                _ = run_token.cancelled() => break,
                _ = ticker.tick() => {
                    if ticks.available_permits() == 0 {
                        ticks.add_permits(1);
                    } else {
                        self.dropped_ticks.fetch_add(1, Ordering::Relaxed);
                        tracing::trace!("tick dropped, all workers busy");
                    }
                }
            }
        }

        // Draining: no new departures; workers finish the request they hold
        // (bounded by the per-request timeout) and commit its result.
        self.set_status(EngineStatus::Draining).await;
        ticks.close();
        while workers.join_next().await.is_some() {}
        let _ = timer.await;

        let dropped = self.dropped_ticks();
        if dropped > 0 {
            tracing::debug!(dropped, "pacer dropped ticks during the run");
        }

        self.set_status(EngineStatus::Done).await;
    }
}

/// Worker loop: claim a tick, attack, commit the result. Exits when the
/// tick source closes, or as soon as cancellation is observed while
/// waiting; it never re-checks the tick source after that.
async fn run_worker(
    worker_id: u32,
    ticks: Arc<Semaphore>,
    attacker: Arc<dyn Attacker>,
    stats: Arc<Stats>,
    token: CancellationToken,
    ctx: AttackContext,
) {
    loop {
        let acquired = tokio::select! {
            biased;
            _ = token.cancelled() => break,
            permit = ticks.acquire() => permit,
        };

        match acquired {
            Ok(permit) => {
                // The pacer alone replenishes permits; consuming the tick
                // means forgetting it.
                permit.forget();

                // A panicking attacker is contained as an error result so a
                // single defective request cannot end the run.
                let result = match AssertUnwindSafe(attacker.attack(&ctx)).catch_unwind().await {
                    Ok(result) => result,
                    Err(_) => {
                        tracing::error!(worker_id, "attacker panicked, recording error result");
                        AttackResult::failure(Instant::now(), "attacker panicked")
                    }
                };
                stats.add(&result);
            }
            Err(_) => break, // tick source closed
        }
    }
    tracing::debug!(worker_id, "worker exited");
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
