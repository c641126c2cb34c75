//! Configuration management for Turnstile.
//!
//! Example YAML:
//!
//! ```yaml
//! reclaimer:
//!   sample_probability: 0.01
//!   sweep_interval_secs: 30
//! presets:
//!   - name: auth
//!     window_ms: 900000
//!     max_requests: 5
//!   - name: integration-sync
//!     namespace: integration
//!     window_ms: 300000
//!     max_requests: 10
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::error::{Result, TurnstileError};
use crate::ratelimit::presets::{self, INTEGRATION_NAMESPACE};
use crate::ratelimit::{ClientAddressKey, LimiterConfig, DEFAULT_SAMPLE_PROBABILITY};

/// Main configuration for admission control.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnstileConfig {
    /// Expired-window reclamation
    #[serde(default)]
    pub reclaimer: ReclaimerConfig,

    /// Named rate limit policies
    #[serde(default = "default_presets")]
    pub presets: Vec<PresetConfig>,
}

impl Default for TurnstileConfig {
    fn default() -> Self {
        Self {
            reclaimer: ReclaimerConfig::default(),
            presets: default_presets(),
        }
    }
}

/// Expired-window reclamation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReclaimerConfig {
    /// Probability that an admission check also sweeps the store
    #[serde(default = "default_sample_probability")]
    pub sample_probability: f64,

    /// Interval for the periodic sweeper, if one should run
    #[serde(default)]
    pub sweep_interval_secs: Option<u64>,
}

impl Default for ReclaimerConfig {
    fn default() -> Self {
        Self {
            sample_probability: default_sample_probability(),
            sweep_interval_secs: None,
        }
    }
}

impl ReclaimerConfig {
    /// Interval for the periodic sweeper, if configured.
    pub fn sweep_interval(&self) -> Option<Duration> {
        self.sweep_interval_secs.map(Duration::from_secs)
    }
}

fn default_sample_probability() -> f64 {
    DEFAULT_SAMPLE_PROBABILITY
}

/// One named policy as written in configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresetConfig {
    /// Policy name used to look the policy up
    pub name: String,

    /// Key namespace; defaults to the policy name
    #[serde(default)]
    pub namespace: Option<String>,

    /// Window length in milliseconds
    pub window_ms: u64,

    /// Admissions per key per window
    pub max_requests: u32,
}

impl PresetConfig {
    /// Build the validated runtime policy.
    pub fn to_limiter_config(&self) -> Result<LimiterConfig> {
        let config = LimiterConfig::try_new(
            self.name.clone(),
            Duration::from_millis(self.window_ms),
            self.max_requests,
        )?;

        Ok(match &self.namespace {
            Some(namespace) => config.with_key_deriver(ClientAddressKey::new(namespace.clone())),
            None => config,
        })
    }
}

impl From<&LimiterConfig> for PresetConfig {
    fn from(config: &LimiterConfig) -> Self {
        Self {
            name: config.name().to_string(),
            namespace: None,
            window_ms: u64::try_from(config.window().as_millis()).unwrap_or(u64::MAX),
            max_requests: config.max_requests(),
        }
    }
}

fn default_presets() -> Vec<PresetConfig> {
    vec![
        PresetConfig::from(presets::auth()),
        PresetConfig::from(presets::api()),
        PresetConfig {
            namespace: Some(INTEGRATION_NAMESPACE.to_string()),
            ..PresetConfig::from(presets::integration_sync())
        },
    ]
}

impl TurnstileConfig {
    /// Load configuration from a file; the format follows the extension.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading admission control configuration");

        let config: TurnstileConfig = ::config::Config::builder()
            .add_source(::config::File::from(path))
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: TurnstileConfig = serde_yaml::from_str(yaml)
            .map_err(|e| TurnstileError::Config(format!("Failed to parse config: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Check every value the runtime would otherwise reject.
    pub fn validate(&self) -> Result<()> {
        let probability = self.reclaimer.sample_probability;
        if !(0.0..=1.0).contains(&probability) {
            return Err(TurnstileError::Config(format!(
                "reclaimer.sample_probability must be within [0, 1], got {probability}"
            )));
        }

        if self.reclaimer.sweep_interval_secs == Some(0) {
            return Err(TurnstileError::Config(
                "reclaimer.sweep_interval_secs must be positive".to_string(),
            ));
        }

        if self.presets.is_empty() {
            return Err(TurnstileError::Config("at least one preset is required".to_string()));
        }

        let mut seen = HashSet::new();
        for preset in &self.presets {
            if preset.name.trim().is_empty() {
                return Err(TurnstileError::Config("preset name must not be empty".to_string()));
            }
            if !seen.insert(preset.name.as_str()) {
                return Err(TurnstileError::Config(format!(
                    "duplicate preset name '{}'",
                    preset.name
                )));
            }
            preset.to_limiter_config()?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::presets::{API, AUTH, INTEGRATION_SYNC};
    use crate::ratelimit::RequestHeaders;

    #[test]
    fn test_default_config_matches_builtin_presets() {
        let config = TurnstileConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.reclaimer.sample_probability, 0.01);
        assert_eq!(config.reclaimer.sweep_interval(), None);

        let names: Vec<&str> = config.presets.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec![AUTH, API, INTEGRATION_SYNC]);

        let auth = &config.presets[0];
        assert_eq!(auth.window_ms, 900_000);
        assert_eq!(auth.max_requests, 5);
    }

    #[test]
    fn test_parse_full_config() {
        let yaml = r#"
reclaimer:
  sample_probability: 0.05
  sweep_interval_secs: 30
presets:
  - name: login
    window_ms: 60000
    max_requests: 3
  - name: webhooks
    namespace: hook
    window_ms: 1000
    max_requests: 50
"#;
        let config = TurnstileConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.reclaimer.sample_probability, 0.05);
        assert_eq!(config.reclaimer.sweep_interval(), Some(Duration::from_secs(30)));
        assert_eq!(config.presets.len(), 2);

        let webhooks = config.presets[1].to_limiter_config().unwrap();
        let request = RequestHeaders::new().with("x-real-ip", "10.9.9.9");
        assert_eq!(webhooks.derive_key(&request), "hook:10.9.9.9");
        assert_eq!(webhooks.window(), Duration::from_secs(1));
    }

    #[test]
    fn test_missing_sections_use_defaults() {
        let config = TurnstileConfig::from_yaml("reclaimer: {}\n").unwrap();
        assert_eq!(config.reclaimer.sample_probability, DEFAULT_SAMPLE_PROBABILITY);
        assert_eq!(config.presets.len(), 3);
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let zero_window = r#"
presets:
  - name: broken
    window_ms: 0
    max_requests: 5
"#;
        assert!(matches!(
            TurnstileConfig::from_yaml(zero_window),
            Err(TurnstileError::Config(_))
        ));

        let zero_budget = r#"
presets:
  - name: broken
    window_ms: 1000
    max_requests: 0
"#;
        assert!(TurnstileConfig::from_yaml(zero_budget).is_err());

        let duplicate = r#"
presets:
  - name: api
    window_ms: 1000
    max_requests: 1
  - name: api
    window_ms: 2000
    max_requests: 2
"#;
        assert!(TurnstileConfig::from_yaml(duplicate).is_err());

        let bad_probability = "reclaimer:\n  sample_probability: 1.5\n";
        assert!(TurnstileConfig::from_yaml(bad_probability).is_err());

        assert!(TurnstileConfig::from_yaml("presets: []\n").is_err());
        assert!(TurnstileConfig::from_yaml("presets: [[[").is_err());
    }

    #[test]
    fn test_from_file() {
        let path = std::env::temp_dir()
            .join(format!("turnstile-config-{}.yaml", std::process::id()));
        std::fs::write(
            &path,
            "presets:\n  - name: uploads\n    window_ms: 10000\n    max_requests: 2\n",
        )
        .unwrap();

        let config = TurnstileConfig::from_file(&path);
        std::fs::remove_file(&path).unwrap();

        let config = config.unwrap();
        assert_eq!(config.presets.len(), 1);
        assert_eq!(config.presets[0].name, "uploads");
        assert_eq!(config.reclaimer.sample_probability, DEFAULT_SAMPLE_PROBABILITY);
    }

    #[test]
    fn test_from_missing_file() {
        let result = TurnstileConfig::from_file("/nonexistent/turnstile.yaml");
        assert!(matches!(result, Err(TurnstileError::Source(_))));
    }
}
