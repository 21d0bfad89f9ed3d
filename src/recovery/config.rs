//! Recovery client configuration
//!
//! Loaded from TOML, with `RECOVERY_*` environment overrides.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};

use super::coordinator::{RecoveryOptions, ResendRange};
use super::store::DuplicatePolicy;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryConfig {
    /// Exchange host
    #[serde(default = "default_host")]
    pub host: String,

    /// Exchange port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Connect timeout per request (ms)
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Response timeout per read / resend (ms)
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,

    /// Concurrent resend connections (1 = serial)
    #[serde(default = "default_max_inflight_resends")]
    pub max_inflight_resends: usize,

    /// Resend targets above 255
    #[serde(default)]
    pub resend_range: ResendRange,

    /// Same sequence delivered twice
    #[serde(default)]
    pub duplicate_policy: DuplicatePolicy,

    /// Where the JSON output is written
    #[serde(default = "default_output_path")]
    pub output_path: PathBuf,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_connect_timeout_ms() -> u64 {
    5_000
}

fn default_read_timeout_ms() -> u64 {
    10_000
}

fn default_max_inflight_resends() -> usize {
    1
}

fn default_output_path() -> PathBuf {
    PathBuf::from("output.json")
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            connect_timeout_ms: default_connect_timeout_ms(),
            read_timeout_ms: default_read_timeout_ms(),
            max_inflight_resends: default_max_inflight_resends(),
            resend_range: ResendRange::default(),
            duplicate_policy: DuplicatePolicy::default(),
            output_path: default_output_path(),
        }
    }
}

impl RecoveryConfig {
    /// Load from TOML file
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config: Self = toml::from_str(&contents)
            .with_context(|| format!("parsing config {}", path.display()))?;
        Ok(config)
    }

    /// Load from `RECOVERY_CONFIG_PATH` (defaults when unset), then apply
    /// `RECOVERY_HOST` / `RECOVERY_PORT`.
    pub fn from_env() -> anyhow::Result<Self> {
        let mut config = match std::env::var("RECOVERY_CONFIG_PATH") {
            Ok(path) => Self::load(&path)?,
            Err(_) => Self::default(),
        };

        if let Ok(host) = std::env::var("RECOVERY_HOST") {
            config.host = host;
        }
        if let Ok(v) = std::env::var("RECOVERY_PORT") {
            config.port = v
                .parse()
                .with_context(|| format!("invalid RECOVERY_PORT: {}", v))?;
        }

        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.host.trim().is_empty() {
            bail!("host must not be empty");
        }
        if self.port == 0 {
            bail!("port must be non-zero");
        }
        if self.connect_timeout_ms == 0 || self.read_timeout_ms == 0 {
            bail!("timeouts must be non-zero");
        }
        if self.max_inflight_resends == 0 {
            bail!("max_inflight_resends must be at least 1");
        }
        Ok(())
    }

    pub fn options(&self) -> RecoveryOptions {
        RecoveryOptions {
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            read_timeout: Duration::from_millis(self.read_timeout_ms),
            max_inflight_resends: self.max_inflight_resends,
            resend_range: self.resend_range,
            duplicate_policy: self.duplicate_policy,
        }
    }

    /// Save to TOML file
    pub fn save(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let contents = toml::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RecoveryConfig::default();
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 3000);
        assert!(config.validate().is_ok());

        let options = config.options();
        assert_eq!(options.max_inflight_resends, 1);
        assert_eq!(options.resend_range, ResendRange::Reject);
        assert_eq!(options.duplicate_policy, DuplicatePolicy::LastWriteWins);
    }

    #[test]
    fn test_partial_toml() {
        let config: RecoveryConfig = toml::from_str(
            r#"
            host = "exchange.local"
            max_inflight_resends = 8
            resend_range = "truncate"
            duplicate_policy = "first_write_wins"
            "#,
        )
        .unwrap();

        assert_eq!(config.host, "exchange.local");
        assert_eq!(config.port, 3000);
        assert_eq!(config.max_inflight_resends, 8);
        assert_eq!(config.resend_range, ResendRange::Truncate);
        assert_eq!(config.duplicate_policy, DuplicatePolicy::FirstWriteWins);
        assert_eq!(config.options().read_timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = RecoveryConfig::default();
        config.port = 0;
        assert!(config.validate().is_err());

        let mut config = RecoveryConfig::default();
        config.max_inflight_resends = 0;
        assert!(config.validate().is_err());

        let mut config = RecoveryConfig::default();
        config.read_timeout_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_save_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("recovery.toml");

        let mut config = RecoveryConfig::default();
        config.port = 4100;
        config.resend_range = ResendRange::Truncate;
        config.save(&path).unwrap();

        assert_eq!(RecoveryConfig::load(&path).unwrap(), config);
    }
}
