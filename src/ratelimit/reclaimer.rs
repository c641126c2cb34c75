//! Eviction of expired window entries.
//!
//! Stale entries never affect decisions, since the engine rolls an expired
//! window over on the next request. Sweeping only bounds memory. Two triggers
//! are available: a sampled sweep piggybacked on admission checks, and a
//! periodic tokio task.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::clock::Clock;
use super::store::WindowStore;
use crate::error::{Result, TurnstileError};

/// Fraction of admission checks that also sweep the store.
pub const DEFAULT_SAMPLE_PROBABILITY: f64 = 0.01;

/// Remove expired entries from `store`, returning how many were removed.
pub fn sweep<S: WindowStore>(store: &S, now_ms: u64) -> usize {
    let removed = store.sweep_expired(now_ms);
    if removed > 0 {
        debug!(removed, remaining = store.len(), "Swept expired rate limit windows");
    }
    removed
}

/// Decides whether a given admission check should also sweep.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SweepSampler {
    probability: f64,
}

impl SweepSampler {
    /// Create a sampler firing with `probability` per check.
    ///
    /// # Panics
    ///
    /// Panics if `probability` is not within `[0, 1]`.
    pub fn new(probability: f64) -> Self {
        match Self::try_new(probability) {
            Ok(sampler) => sampler,
            Err(e) => panic!("{e}"),
        }
    }

    /// Fallible variant of [`SweepSampler::new`] for runtime-supplied values.
    pub fn try_new(probability: f64) -> Result<Self> {
        if !(0.0..=1.0).contains(&probability) {
            return Err(TurnstileError::Config(format!(
                "sweep probability must be within [0, 1], got {probability}"
            )));
        }
        Ok(Self { probability })
    }

    /// A sampler that never fires, for deployments using the periodic sweeper.
    pub fn disabled() -> Self {
        Self { probability: 0.0 }
    }

    /// Configured probability.
    pub fn probability(&self) -> f64 {
        self.probability
    }

    /// Roll for this check.
    pub fn should_sweep(&self) -> bool {
        self.probability > 0.0 && rand::thread_rng().gen_bool(self.probability)
    }
}

impl Default for SweepSampler {
    fn default() -> Self {
        Self {
            probability: DEFAULT_SAMPLE_PROBABILITY,
        }
    }
}

/// Handle to a running periodic sweeper.
///
/// Dropping the handle aborts the task.
#[derive(Debug)]
pub struct ReclaimerHandle {
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl ReclaimerHandle {
    /// Stop the sweeper and wait for it to exit.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                if e.is_panic() {
                    warn!(error = %e, "Periodic window sweeper panicked");
                }
            }
        }
    }
}

impl Drop for ReclaimerHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Spawn a tokio task sweeping `store` every `every`.
///
/// Must be called from within a tokio runtime.
///
/// # Panics
///
/// Panics if `every` is zero.
pub fn spawn_periodic_sweep<S>(
    store: Arc<S>,
    clock: Arc<dyn Clock>,
    every: Duration,
) -> ReclaimerHandle
where
    S: WindowStore + 'static,
{
    assert!(!every.is_zero(), "sweep interval must be non-zero");

    let (tx, mut rx) = oneshot::channel();
    let interval_ms = u64::try_from(every.as_millis()).unwrap_or(u64::MAX);
    info!(interval_ms, "Starting periodic window sweeper");

    let task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = &mut rx => break,
                _ = ticker.tick() => {
                    sweep(store.as_ref(), clock.now_millis());
                }
            }
        }

        info!("Periodic window sweeper stopped");
    });

    ReclaimerHandle {
        shutdown: Some(tx),
        task: Some(task),
    }
}
