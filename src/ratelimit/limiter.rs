//! Core rate limiter implementation.
//!
//! A fixed-window counter: each caller key gets `max_requests` admissions per
//! window, and the window restarts on the first request after it ends. Up to
//! twice the budget can pass inside any window-length interval that straddles
//! a boundary; that burst is inherent to fixed windows.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, trace};

use super::clock::{Clock, SystemClock};
use super::decision::{Decision, RateLimitExceeded};
use super::key::{ClientAddressKey, KeyDeriver, RequestMetadata};
use super::reclaimer::{self, ReclaimerHandle, SweepSampler};
use super::store::{ShardedWindowStore, WindowStore};
use super::window::WindowEntry;
use crate::error::{Result, TurnstileError};

/// An immutable rate limit policy.
///
/// Validated on construction, so the engine never sees a zero window or a
/// zero budget.
#[derive(Clone)]
pub struct LimiterConfig {
    /// Policy name, also the default key namespace
    name: String,
    /// Window length
    window: Duration,
    /// Admissions per key per window
    max_requests: u32,
    /// Derives the caller key for a request
    key: Arc<dyn KeyDeriver>,
}

impl LimiterConfig {
    /// Create a policy keyed by client address under the `name` namespace.
    ///
    /// # Panics
    ///
    /// Panics if `window` is zero or not a whole number of milliseconds, or if
    /// `max_requests` is zero.
    pub fn new(name: impl Into<String>, window: Duration, max_requests: u32) -> Self {
        match Self::try_new(name, window, max_requests) {
            Ok(config) => config,
            Err(e) => panic!("{e}"),
        }
    }

    /// Fallible variant of [`LimiterConfig::new`] for runtime-supplied values.
    ///
    /// Windows are tracked in whole milliseconds; a window with a
    /// sub-millisecond remainder is rejected rather than truncated.
    pub fn try_new(name: impl Into<String>, window: Duration, max_requests: u32) -> Result<Self> {
        let name = name.into();
        if window.is_zero() {
            return Err(TurnstileError::Config(format!(
                "policy '{name}': window duration must be positive"
            )));
        }
        if window.subsec_nanos() % 1_000_000 != 0 {
            return Err(TurnstileError::Config(format!(
                "policy '{name}': window duration must be a whole number of milliseconds, \
                 got {window:?}"
            )));
        }
        if max_requests == 0 {
            return Err(TurnstileError::Config(format!(
                "policy '{name}': max requests per window must be positive"
            )));
        }

        Ok(Self {
            key: Arc::new(ClientAddressKey::new(name.clone())),
            name,
            window,
            max_requests,
        })
    }

    /// Replace the key policy.
    ///
    /// The deriver owns the whole key, so it should namespace its keys if the
    /// store is shared with other policies.
    pub fn with_key_deriver(mut self, deriver: impl KeyDeriver + 'static) -> Self {
        self.key = Arc::new(deriver);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn max_requests(&self) -> u32 {
        self.max_requests
    }

    /// Derive the caller key for `request`.
    pub fn derive_key(&self, request: &dyn RequestMetadata) -> String {
        self.key.derive_key(request)
    }
}

impl fmt::Debug for LimiterConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LimiterConfig")
            .field("name", &self.name)
            .field("window", &self.window)
            .field("max_requests", &self.max_requests)
            .finish_non_exhaustive()
    }
}

/// Read-only view of a caller's live window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowStatus {
    /// Admissions so far in this window
    pub count: u32,
    /// Admissions left in this window
    pub remaining: u32,
    /// Time until the window ends
    pub reset_in: Duration,
}

enum Outcome {
    Opened { rolled_over: bool },
    Admitted { count: u32 },
    Denied { retry_after_secs: u64 },
}

/// The admission engine.
///
/// Owns its window store; two limiters never share counters unless they are
/// handed the same store. Thread-safe and meant to be shared behind an `Arc`.
pub struct RateLimiter<S = ShardedWindowStore> {
    store: Arc<S>,
    clock: Arc<dyn Clock>,
    sampler: SweepSampler,
}

impl RateLimiter {
    /// Create a limiter over a fresh sharded store and the system clock.
    pub fn new() -> Self {
        Self::with_store(ShardedWindowStore::new())
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: WindowStore> RateLimiter<S> {
    /// Create a limiter over `store`.
    pub fn with_store(store: S) -> Self {
        Self::with_shared_store(Arc::new(store))
    }

    /// Create a limiter over a store that may also be held elsewhere.
    pub fn with_shared_store(store: Arc<S>) -> Self {
        Self {
            store,
            clock: Arc::new(SystemClock),
            sampler: SweepSampler::default(),
        }
    }

    /// Use `clock` as the time source.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Use `sampler` to decide when a check also sweeps the store.
    pub fn with_sampler(mut self, sampler: SweepSampler) -> Self {
        self.sampler = sampler;
        self
    }

    /// Admit or deny `request` under `config`, consuming one unit of budget
    /// on admission.
    pub fn check_and_consume(
        &self,
        request: &dyn RequestMetadata,
        config: &LimiterConfig,
    ) -> Decision {
        let key = config.derive_key(request);
        self.check_key(&key, config)
    }

    /// Admit or deny a request whose caller key is already known.
    pub fn check_key(&self, key: &str, config: &LimiterConfig) -> Decision {
        let now = self.clock.now_millis();

        if self.sampler.should_sweep() {
            reclaimer::sweep(self.store.as_ref(), now);
        }

        let max_requests = config.max_requests;
        let window = config.window;

        let outcome = self.store.update(key, |slot| match slot {
            Some(entry) if !entry.is_expired(now) => {
                if entry.count >= max_requests {
                    // Denials leave the entry untouched.
                    Outcome::Denied {
                        retry_after_secs: entry.retry_after_secs(now),
                    }
                } else {
                    entry.count += 1;
                    Outcome::Admitted { count: entry.count }
                }
            }
            _ => {
                let rolled_over = slot.is_some();
                *slot = Some(WindowEntry::open(now, window));
                Outcome::Opened { rolled_over }
            }
        });

        match outcome {
            Outcome::Opened { rolled_over } => {
                trace!(
                    key = %key,
                    policy = %config.name,
                    rolled_over,
                    "Opened rate limit window"
                );
                Decision::Admit
            }
            Outcome::Admitted { count } => {
                trace!(key = %key, policy = %config.name, count, "Admitted request");
                Decision::Admit
            }
            Outcome::Denied { retry_after_secs } => {
                debug!(
                    key = %key,
                    policy = %config.name,
                    limit = max_requests,
                    retry_after_secs,
                    "Rate limit exceeded"
                );
                Decision::Deny(RateLimitExceeded {
                    retry_after_secs,
                    limit: max_requests,
                    window,
                })
            }
        }
    }

    /// Current window of the caller behind `request`, without consuming
    /// budget. `None` if the caller has no live window.
    pub fn status(
        &self,
        request: &dyn RequestMetadata,
        config: &LimiterConfig,
    ) -> Option<WindowStatus> {
        let now = self.clock.now_millis();
        let key = config.derive_key(request);

        self.store
            .get(&key)
            .filter(|entry| !entry.is_expired(now))
            .map(|entry| WindowStatus {
                count: entry.count,
                remaining: config.max_requests.saturating_sub(entry.count),
                reset_in: entry.remaining(now),
            })
    }

    /// Sweep expired entries now, regardless of the sampler.
    pub fn sweep(&self) -> usize {
        reclaimer::sweep(self.store.as_ref(), self.clock.now_millis())
    }

    /// Number of tracked keys, including stale ones not yet swept.
    pub fn entry_count(&self) -> usize {
        self.store.len()
    }

    /// Forget every window.
    ///
    /// This is primarily useful for testing.
    pub fn clear(&self) {
        self.store.clear();
    }

    /// The underlying store.
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }
}

impl<S: WindowStore + 'static> RateLimiter<S> {
    /// Sweep this limiter's store on a fixed interval from a tokio task.
    pub fn spawn_reclaimer(&self, every: Duration) -> ReclaimerHandle {
        reclaimer::spawn_periodic_sweep(self.store.clone(), self.clock.clone(), every)
    }
}
