//! CLI configuration.
//!
//! [`CliConfig`] is layered from built-in defaults, an optional TOML file and
//! `COINSMITH_*` environment variables, later layers winning.

use std::path::{Path, PathBuf};
use std::time::Duration;

use config::{Config, ConfigError, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};

use coinsmith_core::constants::{
    DEFAULT_ABSURD_FEE, DEFAULT_DUST_THRESHOLD, DEFAULT_MAX_TX_SIZE, DEFAULT_MIN_RELAY_FEE_PER_KB,
    DEFAULT_RESERVATION_TTL_SECS,
};
use coinsmith_core::fee::FeeRate;
use coinsmith_wallet::{EnginePolicy, FeeSchedule};

/// Settings for one CLI invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CliConfig {
    /// JSON wallet snapshot the commands read and write.
    pub wallet_file: PathBuf,
    /// Log filter used when `RUST_LOG` is unset.
    pub log_level: String,
    pub fee_low_per_kb: u64,
    pub fee_medium_per_kb: u64,
    pub fee_high_per_kb: u64,
    pub dust_threshold: u64,
    pub max_tx_size: usize,
    pub min_relay_fee_per_kb: u64,
    pub absurd_fee: u64,
    pub reservation_ttl_secs: u64,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            wallet_file: default_dir().join("wallets.json"),
            log_level: "info".to_string(),
            fee_low_per_kb: 5_000,
            fee_medium_per_kb: 10_000,
            fee_high_per_kb: 20_000,
            dust_threshold: DEFAULT_DUST_THRESHOLD,
            max_tx_size: DEFAULT_MAX_TX_SIZE,
            min_relay_fee_per_kb: DEFAULT_MIN_RELAY_FEE_PER_KB,
            absurd_fee: DEFAULT_ABSURD_FEE,
            reservation_ttl_secs: DEFAULT_RESERVATION_TTL_SECS,
        }
    }
}

/// `~/.coinsmith`, or the working directory when there is no home.
pub fn default_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".coinsmith")
}

impl CliConfig {
    /// Load the layered configuration.
    ///
    /// An explicit `path` must exist; the default `~/.coinsmith/config.toml`
    /// is optional.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let (file, required) = match path {
            Some(p) => (p.to_path_buf(), true),
            None => (default_dir().join("config.toml"), false),
        };
        Config::builder()
            .add_source(Config::try_from(&Self::default())?)
            .add_source(File::from(file).format(FileFormat::Toml).required(required))
            .add_source(Environment::with_prefix("COINSMITH").try_parsing(true))
            .build()?
            .try_deserialize()
    }

    pub fn fee_schedule(&self) -> FeeSchedule {
        FeeSchedule::from_tiers(
            FeeRate::from_per_kb(self.fee_low_per_kb),
            FeeRate::from_per_kb(self.fee_medium_per_kb),
            FeeRate::from_per_kb(self.fee_high_per_kb),
        )
    }

    pub fn engine_policy(&self) -> EnginePolicy {
        EnginePolicy {
            dust_threshold: self.dust_threshold,
            max_tx_size: self.max_tx_size,
            min_relay_fee: FeeRate::from_per_kb(self.min_relay_fee_per_kb),
            absurd_fee: self.absurd_fee,
        }
    }

    pub fn reservation_ttl(&self) -> Duration {
        Duration::from_secs(self.reservation_ttl_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use coinsmith_core::fee::FeeType;
    use coinsmith_core::traits::FeePolicy;

    #[test]
    fn defaults_match_library_defaults() {
        let cfg = CliConfig::default();
        assert_eq!(cfg.engine_policy(), EnginePolicy::default());
        assert_eq!(cfg.fee_schedule(), FeeSchedule::default());
        assert_eq!(cfg.log_level, "info");
        assert!(cfg.wallet_file.ends_with(".coinsmith/wallets.json"));
    }

    #[test]
    fn file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "log_level = \"debug\"\nfee_high_per_kb = 50000\nreservation_ttl_secs = 30\n",
        )
        .unwrap();

        let cfg = CliConfig::load(Some(&path)).unwrap();
        assert_eq!(cfg.log_level, "debug");
        assert_eq!(cfg.reservation_ttl(), Duration::from_secs(30));
        assert_eq!(
            cfg.fee_schedule().fee_rate(FeeType::High.confirmation_target()),
            FeeRate::from_per_kb(50_000)
        );
        assert_eq!(cfg.dust_threshold, DEFAULT_DUST_THRESHOLD);
    }

    #[test]
    fn explicit_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(CliConfig::load(Some(&dir.path().join("absent.toml"))).is_err());
    }

    #[test]
    fn malformed_value_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "dust_threshold = \"lots\"\n").unwrap();
        assert!(CliConfig::load(Some(&path)).is_err());
    }
}
