//! Runtime configuration
//!
//! Loaded from `config.toml` (explicit path or `<config_home>/lotledger/`),
//! with every field defaulted so a missing file is not an error.

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Transactions on or before this day of the month settle into the previous month
pub const DEFAULT_CUTOFF_DAY: u32 = 10;

/// Currency outflows (withdrawals, fees) are compared with this slack
pub const WITHDRAWAL_TOLERANCE: Decimal = Decimal::from_parts(1, 0, 0, false, 4);
pub const FEE_TOLERANCE: Decimal = Decimal::from_parts(1, 0, 0, false, 4);
/// Purchases have always been matched with the coarser slack
pub const PURCHASE_TOLERANCE: Decimal = Decimal::from_parts(1, 0, 0, false, 3);
pub const SALE_TOLERANCE: Decimal = Decimal::from_parts(1, 0, 0, false, 3);
/// Lots at or below this quantity are ignored for averages and valuation
pub const LOT_DUST: Decimal = Decimal::from_parts(1, 0, 0, false, 3);

/// Per operation class slack used when deciding whether an outflow can be covered
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct Tolerances {
    pub withdrawal: Decimal,
    pub fee: Decimal,
    pub purchase: Decimal,
    pub sale: Decimal,
    pub lot_dust: Decimal,
}

impl Default for Tolerances {
    fn default() -> Self {
        Self {
            withdrawal: WITHDRAWAL_TOLERANCE,
            fee: FEE_TOLERANCE,
            purchase: PURCHASE_TOLERANCE,
            sale: SALE_TOLERANCE,
            lot_dust: LOT_DUST,
        }
    }
}

/// Price refresh settings
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct PriceConfig {
    pub endpoint: String,
    pub timeout_secs: u64,
    pub request_delay_ms: u64,
    /// Prices younger than this many days are considered fresh
    pub max_age_days: i64,
}

impl Default for PriceConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://www.avanza.se/_api/search/filtered-search".to_string(),
            timeout_secs: 10,
            request_delay_ms: 50,
            max_age_days: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database: Option<PathBuf>,
    pub special_cases: Option<PathBuf>,
    pub cutoff_day: u32,
    pub tolerances: Tolerances,
    pub prices: PriceConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database: None,
            special_cases: None,
            cutoff_day: DEFAULT_CUTOFF_DAY,
            tolerances: Tolerances::default(),
            prices: PriceConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from an explicit file, or the default location if present
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(p) => Self::from_file(p)?,
            None => match default_config_path() {
                Some(p) if p.exists() => Self::from_file(&p)?,
                _ => Self::default(),
            },
        };

        if let Ok(db) = std::env::var("LOTLEDGER_DB") {
            if !db.trim().is_empty() {
                config.database = Some(PathBuf::from(db));
            }
        }

        if !(1..=28).contains(&config.cutoff_day) {
            anyhow::bail!(
                "cutoff_day must be between 1 and 28, got {}",
                config.cutoff_day
            );
        }

        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        debug!("Reading configuration from {:?}", path);
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {:?}", path))?;
        Self::from_toml(&text).with_context(|| format!("Invalid config file {:?}", path))
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).context("Failed to parse TOML configuration")
    }

    /// Price fetching is disabled for offline runs and tests
    pub fn offline() -> bool {
        std::env::var("LOTLEDGER_OFFLINE")
            .map(|v| v != "0")
            .unwrap_or(false)
    }
}

fn default_config_path() -> Option<PathBuf> {
    dir_spec::config_home().map(|dir| dir.join("lotledger").join("config.toml"))
}
