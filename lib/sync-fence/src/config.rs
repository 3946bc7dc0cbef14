// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Runtime configuration for fence waits.
//!
//! Loaded with figment from, lowest to highest priority:
//! 1. Code defaults
//! 2. TOML file from the `FENCE_CONFIG_PATH` environment variable
//! 3. Environment variables (`FENCE_WAIT_*` prefixed)

use figment::{
    Figment, Metadata, Profile, Provider,
    providers::{Env, Format, Serialized, Toml},
    value::{Dict, Map},
};
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use std::time::Duration;
use thiserror::Error;
use validator::{Validate, ValidationErrors};

/// Environment variable naming an optional TOML config file.
pub const CONFIG_PATH_ENV: &str = "FENCE_CONFIG_PATH";

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A source could not be read or did not match the schema.
    #[error("Failed to extract configuration: {0}")]
    Extraction(#[from] Box<figment::Error>),

    /// Values were read but failed validation.
    #[error("Configuration validation failed: {0}")]
    Validation(#[from] ValidationErrors),
}

/// Wait behavior.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct WaitConfig {
    /// Warn once when a default wait stays blocked longer than this many
    /// milliseconds. None = never warn.
    #[validate(range(min = 1))]
    #[serde(default)]
    pub slow_wait_warn_ms: Option<u64>,
}

impl WaitConfig {
    /// The slow-wait threshold as a duration, if configured.
    pub fn slow_wait_threshold(&self) -> Option<Duration> {
        self.slow_wait_warn_ms.map(Duration::from_millis)
    }
}

/// Top-level fence configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct FenceConfig {
    /// Wait behavior.
    #[validate(nested)]
    #[serde(default)]
    pub wait: WaitConfig,
}

impl FenceConfig {
    /// Create a Figment configuration with all sources merged.
    pub fn figment() -> Figment {
        let config_path = std::env::var(CONFIG_PATH_ENV).unwrap_or_default();

        Figment::new()
            .merge(Serialized::defaults(FenceConfig::default()))
            .merge(Toml::file(&config_path))
            // Wait config: FENCE_WAIT_SLOW_WAIT_WARN_MS
            .merge(
                Env::prefixed("FENCE_WAIT_")
                    .map(|k| format!("wait.{}", k.as_str().to_lowercase()).into()),
            )
    }

    /// Load configuration from default figment (env and files).
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::extract_from(Self::figment())
    }

    /// Extract and validate configuration from any provider.
    pub fn extract_from<T: Provider>(provider: T) -> Result<Self, ConfigError> {
        let config: Self = Figment::from(provider)
            .extract()
            .map_err(|e| ConfigError::Extraction(Box::new(e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Build a figment from defaults, then merge a custom provider on top.
    ///
    /// # Example
    /// ```rust,ignore
    /// let figment = FenceConfig::figment_with(("wait.slow_wait_warn_ms", 500u64));
    /// let config = FenceConfig::extract_from(figment)?;
    /// ```
    pub fn figment_with<T: Provider>(extra: T) -> Figment {
        Self::figment().merge(extra)
    }
}

impl Provider for FenceConfig {
    fn metadata(&self) -> Metadata {
        Metadata::named("FenceConfig")
    }

    fn data(&self) -> Result<Map<Profile, Dict>, figment::Error> {
        Serialized::defaults(self).data()
    }
}

static GLOBAL: OnceLock<FenceConfig> = OnceLock::new();

/// Process-wide configuration, loaded from the environment on first use.
///
/// An invalid environment is reported once and replaced by defaults.
pub fn global() -> &'static FenceConfig {
    GLOBAL.get_or_init(|| {
        FenceConfig::from_env().unwrap_or_else(|err| {
            tracing::warn!(error = %err, "invalid fence configuration, using defaults");
            FenceConfig::default()
        })
    })
}

/// Set the process-wide configuration before first use.
///
/// Returns the configuration back if one was already installed or loaded.
pub fn install(config: FenceConfig) -> Result<(), FenceConfig> {
    GLOBAL.set(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const VARS: [&str; 2] = [CONFIG_PATH_ENV, "FENCE_WAIT_SLOW_WAIT_WARN_MS"];

    #[test]
    fn test_default_config() {
        let config = FenceConfig::default();
        assert!(config.wait.slow_wait_warn_ms.is_none());
        assert!(config.wait.slow_wait_threshold().is_none());
    }

    #[test]
    fn test_figment_defaults() {
        temp_env::with_vars_unset(VARS, || {
            let config = FenceConfig::from_env().unwrap();
            assert_eq!(config, FenceConfig::default());
        });
    }

    #[test]
    fn test_env_override_wait() {
        temp_env::with_vars(
            vec![
                (CONFIG_PATH_ENV, None),
                ("FENCE_WAIT_SLOW_WAIT_WARN_MS", Some("250")),
            ],
            || {
                let config = FenceConfig::from_env().unwrap();
                assert_eq!(config.wait.slow_wait_warn_ms, Some(250));
                assert_eq!(
                    config.wait.slow_wait_threshold(),
                    Some(Duration::from_millis(250))
                );
            },
        );
    }

    #[test]
    fn test_toml_file_then_env_priority() {
        let path = std::env::temp_dir().join(format!("fence-config-{}.toml", std::process::id()));
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "[wait]\nslow_wait_warn_ms = 40").unwrap();
        drop(file);
        let path_str = path.to_string_lossy().into_owned();

        temp_env::with_vars(
            vec![
                (CONFIG_PATH_ENV, Some(path_str.as_str())),
                ("FENCE_WAIT_SLOW_WAIT_WARN_MS", None),
            ],
            || {
                let config = FenceConfig::from_env().unwrap();
                assert_eq!(config.wait.slow_wait_warn_ms, Some(40));
            },
        );

        temp_env::with_vars(
            vec![
                (CONFIG_PATH_ENV, Some(path_str.as_str())),
                ("FENCE_WAIT_SLOW_WAIT_WARN_MS", Some("90")),
            ],
            || {
                let config = FenceConfig::from_env().unwrap();
                assert_eq!(config.wait.slow_wait_warn_ms, Some(90));
            },
        );

        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_validation_rejects_zero_threshold() {
        temp_env::with_vars_unset(VARS, || {
            let figment = FenceConfig::figment_with(("wait.slow_wait_warn_ms", 0u64));
            let err = FenceConfig::extract_from(figment).unwrap_err();
            assert!(matches!(err, ConfigError::Validation(_)));
        });
    }

    #[test]
    fn test_extraction_error_on_bad_type() {
        temp_env::with_vars(
            vec![
                (CONFIG_PATH_ENV, None),
                ("FENCE_WAIT_SLOW_WAIT_WARN_MS", Some("soon")),
            ],
            || {
                let err = FenceConfig::from_env().unwrap_err();
                assert!(matches!(err, ConfigError::Extraction(_)));
            },
        );
    }

    #[test]
    fn test_config_as_provider() {
        let original = FenceConfig {
            wait: WaitConfig {
                slow_wait_warn_ms: Some(7),
            },
        };
        let extracted: FenceConfig = Figment::from(&original).extract().unwrap();
        assert_eq!(extracted, original);
    }
}
