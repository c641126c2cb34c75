//! Named rate limit policies and the registry that resolves them.
//!
//! | Preset | Window | Budget | Key namespace |
//! |---|---|---|---|
//! | `auth` | 15 minutes | 5 | `auth:` |
//! | `api` | 1 minute | 100 | `api:` |
//! | `integration-sync` | 5 minutes | 10 | `integration:` |

use std::collections::HashMap;
use std::sync::OnceLock;
use std::time::Duration;

use tracing::info;

use super::decision::Decision;
use super::key::{ClientAddressKey, RequestMetadata};
use super::limiter::{LimiterConfig, RateLimiter};
use super::reclaimer::{ReclaimerHandle, SweepSampler};
use super::store::{ShardedWindowStore, WindowStore};
use crate::config::{ReclaimerConfig, TurnstileConfig};
use crate::error::{Result, TurnstileError};

/// Name of the credential-submission preset.
pub const AUTH: &str = "auth";
/// Name of the general API traffic preset.
pub const API: &str = "api";
/// Name of the externally-triggered sync preset.
pub const INTEGRATION_SYNC: &str = "integration-sync";
/// Key namespace of the integration sync preset.
pub const INTEGRATION_NAMESPACE: &str = "integration";

/// Authentication attempts: 5 per 15 minutes per address.
pub fn auth() -> &'static LimiterConfig {
    static CONFIG: OnceLock<LimiterConfig> = OnceLock::new();
    CONFIG.get_or_init(|| LimiterConfig::new(AUTH, Duration::from_secs(15 * 60), 5))
}

/// General API traffic: 100 per minute per address.
pub fn api() -> &'static LimiterConfig {
    static CONFIG: OnceLock<LimiterConfig> = OnceLock::new();
    CONFIG.get_or_init(|| LimiterConfig::new(API, Duration::from_secs(60), 100))
}

/// Integration sync triggers: 10 per 5 minutes per address.
pub fn integration_sync() -> &'static LimiterConfig {
    static CONFIG: OnceLock<LimiterConfig> = OnceLock::new();
    CONFIG.get_or_init(|| {
        LimiterConfig::new(INTEGRATION_SYNC, Duration::from_secs(5 * 60), 10)
            .with_key_deriver(ClientAddressKey::new(INTEGRATION_NAMESPACE))
    })
}

/// Policies addressable by name.
#[derive(Debug, Clone, Default)]
pub struct PresetRegistry {
    presets: HashMap<String, LimiterConfig>,
}

impl PresetRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding the three built-in presets.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        for config in [auth(), api(), integration_sync()] {
            registry.register(config.clone());
        }
        registry
    }

    /// Add a policy, replacing any policy with the same name.
    pub fn register(&mut self, config: LimiterConfig) -> Option<LimiterConfig> {
        self.presets.insert(config.name().to_string(), config)
    }

    /// Look up a policy.
    pub fn get(&self, name: &str) -> Option<&LimiterConfig> {
        self.presets.get(name)
    }

    /// Registered policy names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.presets.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.presets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.presets.is_empty()
    }
}

/// One engine plus the policies it serves, checked by policy name.
///
/// All policies share the engine's store; their key namespaces keep their
/// budgets apart.
pub struct AdmissionControl<S = ShardedWindowStore> {
    limiter: RateLimiter<S>,
    presets: PresetRegistry,
}

impl AdmissionControl {
    /// Built-in presets over a fresh store with default sampling.
    pub fn new() -> Self {
        Self::with_parts(RateLimiter::new(), PresetRegistry::builtin())
    }

    /// Build from loaded configuration.
    pub fn from_config(config: &TurnstileConfig) -> Result<Self> {
        config.validate()?;

        let mut presets = PresetRegistry::new();
        for preset in &config.presets {
            presets.register(preset.to_limiter_config()?);
        }

        let sampler = SweepSampler::try_new(config.reclaimer.sample_probability)?;
        let limiter = RateLimiter::new().with_sampler(sampler);

        info!(presets = ?presets.names(), "Admission control initialized");
        Ok(Self::with_parts(limiter, presets))
    }
}

impl Default for AdmissionControl {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: WindowStore> AdmissionControl<S> {
    /// Combine an engine and a registry.
    pub fn with_parts(limiter: RateLimiter<S>, presets: PresetRegistry) -> Self {
        Self { limiter, presets }
    }

    /// Check `request` against the policy named `preset`.
    ///
    /// Errors only when the name is not registered; a denial is `Ok(Decision::Deny(_))`.
    pub fn check(&self, preset: &str, request: &dyn RequestMetadata) -> Result<Decision> {
        let config = self
            .presets
            .get(preset)
            .ok_or_else(|| TurnstileError::UnknownPolicy(preset.to_string()))?;
        Ok(self.limiter.check_and_consume(request, config))
    }

    pub fn limiter(&self) -> &RateLimiter<S> {
        &self.limiter
    }

    pub fn presets(&self) -> &PresetRegistry {
        &self.presets
    }
}

impl<S: WindowStore + 'static> AdmissionControl<S> {
    /// Start the periodic sweeper when `config` asks for one.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start_reclaimer(&self, config: &ReclaimerConfig) -> Option<ReclaimerHandle> {
        config
            .sweep_interval()
            .map(|every| self.limiter.spawn_reclaimer(every))
    }
}
