//! Configuration for the ledger
//!
//! Commission rates, transfer floors, and lock timeouts are explicit
//! configuration passed into the ledger at construction time. There is no
//! ambient global state, which keeps per-test configuration trivial.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::{Error, Result};

/// Ledger configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Data directory for RocksDB
    pub data_dir: PathBuf,

    /// Service name
    pub service_name: String,

    /// Service version
    pub service_version: String,

    /// Fee and amount-validation configuration
    pub fees: FeeConfig,

    /// Row-lock configuration
    pub locking: LockConfig,

    /// RocksDB configuration
    pub rocksdb: RocksDbConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data/mali-ledger"),
            service_name: "mali-ledger".to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            fees: FeeConfig::default(),
            locking: LockConfig::default(),
            rocksdb: RocksDbConfig::default(),
        }
    }
}

/// Fee and amount-validation configuration
///
/// The transfer and escrow rates are independently configured; business
/// policy may align them but the ledger does not force it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeeConfig {
    /// Commission rate applied to direct transfers
    pub transfer_rate: Decimal,

    /// Commission rate applied to escrow releases
    pub escrow_rate: Decimal,

    /// Minimum transfer amount
    pub min_transfer: Decimal,

    /// Maximum fractional digits accepted on amounts; fees are rounded to
    /// this scale
    pub amount_scale: u32,
}

impl Default for FeeConfig {
    fn default() -> Self {
        Self {
            transfer_rate: Decimal::new(1, 3), // 0.1%
            escrow_rate: Decimal::new(5, 2),   // 5%
            min_transfer: Decimal::ONE,
            amount_scale: 6,
        }
    }
}

impl FeeConfig {
    /// Validate a caller-supplied amount: strictly positive and within the
    /// accepted decimal scale
    pub fn validate_amount(&self, amount: Decimal) -> Result<()> {
        if amount <= Decimal::ZERO {
            return Err(Error::InvalidAmount(format!(
                "amount must be positive, got {}",
                amount
            )));
        }
        if amount.scale() > self.amount_scale {
            return Err(Error::InvalidAmount(format!(
                "amount {} exceeds {} decimal places",
                amount, self.amount_scale
            )));
        }
        Ok(())
    }

    /// Commission carved out of a direct transfer
    pub fn transfer_fee(&self, amount: Decimal) -> Decimal {
        (amount * self.transfer_rate).round_dp(self.amount_scale)
    }

    /// Commission carved out of an escrow release
    pub fn escrow_commission(&self, amount: Decimal) -> Decimal {
        (amount * self.escrow_rate).round_dp(self.amount_scale)
    }
}

/// Row-lock configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockConfig {
    /// How long an operation waits for a row lock before failing with
    /// `LockTimeout` (milliseconds)
    pub lock_timeout_ms: u64,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            lock_timeout_ms: 5_000,
        }
    }
}

/// RocksDB configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RocksDbConfig {
    /// Write buffer size (MB)
    pub write_buffer_size_mb: usize,

    /// Max write buffers
    pub max_write_buffer_number: i32,

    /// Max background jobs (compaction + flush)
    pub max_background_jobs: i32,

    /// Enable statistics
    pub enable_statistics: bool,
}

impl Default for RocksDbConfig {
    fn default() -> Self {
        Self {
            write_buffer_size_mb: 64,
            max_write_buffer_number: 4,
            max_background_jobs: 4,
            enable_statistics: false,
        }
    }
}

impl Config {
    /// Load from file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))?;
        Ok(config)
    }

    /// Load defaults with environment variable overrides
    pub fn from_env() -> Result<Self> {
        let mut config = Config::default();

        if let Ok(data_dir) = std::env::var("MALI_DATA_DIR") {
            config.data_dir = PathBuf::from(data_dir);
        }

        if let Ok(rate) = std::env::var("MALI_TRANSFER_FEE_RATE") {
            config.fees.transfer_rate = rate
                .parse()
                .map_err(|e| Error::Config(format!("MALI_TRANSFER_FEE_RATE: {}", e)))?;
        }

        if let Ok(rate) = std::env::var("MALI_ESCROW_FEE_RATE") {
            config.fees.escrow_rate = rate
                .parse()
                .map_err(|e| Error::Config(format!("MALI_ESCROW_FEE_RATE: {}", e)))?;
        }

        if let Ok(timeout) = std::env::var("MALI_LOCK_TIMEOUT_MS") {
            config.locking.lock_timeout_ms = timeout
                .parse()
                .map_err(|e| Error::Config(format!("MALI_LOCK_TIMEOUT_MS: {}", e)))?;
        }

        Ok(config)
    }
}
