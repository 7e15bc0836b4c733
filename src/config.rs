//! Runtime configuration.
//!
//! Loaded from TOML; every section and field is optional and falls back to
//! its default. [`CourierConfig::validate`] refuses settings that would
//! weaken key derivation or the PIN policy, or make every remote call fail.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::CourierError;
use crate::keys::MIN_ITERATIONS;
use crate::profile::MIN_PIN_LEN;

/// Top-level configuration (loaded from courier.toml)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CourierConfig {
    pub kdf: KdfConfig,
    pub profile: ProfileConfig,
    pub remote: RemoteConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KdfConfig {
    /// PBKDF2 iterations (default and minimum: 100 000)
    pub iterations: u32,
}

impl Default for KdfConfig {
    fn default() -> Self {
        Self {
            iterations: MIN_ITERATIONS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfileConfig {
    /// Shortest PIN accepted for new profiles (default and minimum: 6)
    pub min_pin_len: usize,
}

impl Default for ProfileConfig {
    fn default() -> Self {
        Self {
            min_pin_len: MIN_PIN_LEN,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// API management base URL
    pub base_url: String,
    /// Per-request timeout in seconds
    pub timeout_secs: u64,
    pub retry: RetryConfig,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: "https://andreanl-api-management.azure-api.net/v1".into(),
            timeout_secs: 30,
            retry: RetryConfig::default(),
        }
    }
}

impl RemoteConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts per remote call, including the first
    pub max_attempts: u32,
    /// Delay between attempts in milliseconds
    pub backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_ms: 500,
        }
    }
}

impl CourierConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self, CourierError> {
        let config: Self =
            toml::from_str(raw).map_err(|e| CourierError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, CourierError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| CourierError::Config(format!("reading {}: {e}", path.display())))?;
        Self::from_toml_str(&raw)
    }

    /// Reject values that would weaken the KDF or PIN policy, or make every
    /// remote call fail.
    pub fn validate(&self) -> Result<(), CourierError> {
        if self.kdf.iterations < MIN_ITERATIONS {
            return Err(CourierError::Config(format!(
                "kdf.iterations must be at least {MIN_ITERATIONS}"
            )));
        }
        if self.profile.min_pin_len < MIN_PIN_LEN {
            return Err(CourierError::Config(format!(
                "profile.min_pin_len must be at least {MIN_PIN_LEN}"
            )));
        }
        if self.remote.base_url.is_empty() {
            return Err(CourierError::Config("remote.base_url must be set".into()));
        }
        if self.remote.timeout_secs == 0 {
            return Err(CourierError::Config(
                "remote.timeout_secs must be at least 1".into(),
            ));
        }
        if self.remote.retry.max_attempts == 0 {
            return Err(CourierError::Config(
                "remote.retry.max_attempts must be at least 1".into(),
            ));
        }
        Ok(())
    }
}
