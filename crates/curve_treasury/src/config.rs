//! Treasury configuration
//!
//! Loaded from TOML, optionally overlaid with `SEGCURVE_*` environment
//! variables, and validated before use.

use crate::errors::TreasuryError;
use rust_decimal::Decimal;
use segcurve_economics::fixed::serde_micro;
use segcurve_economics::{CurveParameters, Micro, DEFAULT_HYBRID_THRESHOLD};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::Path;
use std::str::FromStr;

pub const DEFAULT_MAX_COMMIT_ATTEMPTS: u32 = 3;
pub const DEFAULT_DEFERRED_ACCOUNT: &str = "@curve-deferred";

pub const ENV_BASE_PRICE: &str = "SEGCURVE_BASE_PRICE";
pub const ENV_PRICE_INCREMENT: &str = "SEGCURVE_PRICE_INCREMENT";
pub const ENV_RESERVE_RATIO: &str = "SEGCURVE_RESERVE_RATIO";
pub const ENV_DEFERRED_RATE: &str = "SEGCURVE_DEFERRED_RATE";
pub const ENV_MAX_SEGMENTS: &str = "SEGCURVE_MAX_SEGMENTS";
pub const ENV_HYBRID_THRESHOLD: &str = "SEGCURVE_HYBRID_THRESHOLD";
pub const ENV_DEFERRED_ACCOUNT: &str = "SEGCURVE_DEFERRED_ACCOUNT";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TreasuryConfig {
    pub curve: CurveParameters,
    /// Estimated segment crossings from which the closed-form path is used
    pub hybrid_threshold: u64,
    /// Compare-and-swap attempts before a purchase is refunded
    pub max_commit_attempts: u32,
    /// Recipient of distributed deferred allocation
    pub deferred_account: String,
    /// Optional cap on supply plus pending allocation (micro-units)
    #[serde(
        with = "serde_micro::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub max_supply: Option<Micro>,
}

impl Default for TreasuryConfig {
    fn default() -> Self {
        Self {
            curve: CurveParameters::default(),
            hybrid_threshold: DEFAULT_HYBRID_THRESHOLD,
            max_commit_attempts: DEFAULT_MAX_COMMIT_ATTEMPTS,
            deferred_account: DEFAULT_DEFERRED_ACCOUNT.to_string(),
            max_supply: None,
        }
    }
}

impl TreasuryConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, TreasuryError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            TreasuryError::Config(format!("Failed to read config file {}: {e}", path.display()))
        })?;
        let config = Self::from_toml_str(&content)?;
        Ok(config)
    }

    /// Load from a TOML file, then apply environment overrides.
    pub fn load_with_env(path: impl AsRef<Path>) -> Result<Self, TreasuryError> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults overlaid with environment overrides.
    pub fn from_env() -> Result<Self, TreasuryError> {
        let mut config = Self::default();
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, TreasuryError> {
        let config: Self = toml::from_str(content)
            .map_err(|e| TreasuryError::Config(format!("Failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn apply_env_overrides(&mut self) -> Result<(), TreasuryError> {
        if let Some(v) = env_value::<Decimal>(ENV_BASE_PRICE)? {
            self.curve.base_price = v;
        }
        if let Some(v) = env_value::<Decimal>(ENV_PRICE_INCREMENT)? {
            self.curve.price_increment = v;
        }
        if let Some(v) = env_value::<Decimal>(ENV_RESERVE_RATIO)? {
            self.curve.reserve_ratio = v;
        }
        if let Some(v) = env_value::<Decimal>(ENV_DEFERRED_RATE)? {
            self.curve.deferred_allocation_rate = v;
        }
        if let Some(v) = env_value::<u32>(ENV_MAX_SEGMENTS)? {
            self.curve.max_segments_per_call = v;
        }
        if let Some(v) = env_value::<u64>(ENV_HYBRID_THRESHOLD)? {
            self.hybrid_threshold = v;
        }
        if let Ok(account) = env::var(ENV_DEFERRED_ACCOUNT) {
            self.deferred_account = account;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), TreasuryError> {
        self.curve.validate()?;
        if self.max_commit_attempts == 0 {
            return Err(TreasuryError::Config(
                "max_commit_attempts must be greater than 0".into(),
            ));
        }
        if self.deferred_account.trim().is_empty() {
            return Err(TreasuryError::Config("deferred_account must be set".into()));
        }
        if self.max_supply == Some(0) {
            return Err(TreasuryError::Config(
                "max_supply must be greater than 0 when set".into(),
            ));
        }
        Ok(())
    }
}

fn env_value<T>(key: &str) -> Result<Option<T>, TreasuryError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| TreasuryError::Config(format!("Invalid {key}={raw:?}: {e}"))),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use segcurve_economics::DeferredAllocationBasis;

    #[test]
    fn test_defaults_validate() {
        let config = TreasuryConfig::default();
        config.validate().unwrap();
        assert_eq!(config.hybrid_threshold, 10);
        assert_eq!(config.max_commit_attempts, 3);
        assert_eq!(config.max_supply, None);
    }

    #[test]
    fn test_parse_toml() {
        let config = TreasuryConfig::from_toml_str(
            r#"
            hybrid_threshold = 4
            max_supply = 500000000000
            deferred_account = "@dev.seg"

            [curve]
            genesis_supply = 50000000000
            base_price = "0.0002"
            price_increment = "0.00001"
            max_segments_per_call = 10
            deferred_allocation_basis = "total_supply"
            "#,
        )
        .unwrap();

        assert_eq!(config.hybrid_threshold, 4);
        assert_eq!(config.max_supply, Some(500_000_000_000));
        assert_eq!(config.deferred_account, "@dev.seg");
        assert_eq!(config.curve.genesis_supply, 50_000_000_000);
        assert_eq!(config.curve.base_price, Decimal::new(2, 4));
        assert_eq!(config.curve.price_increment, Decimal::new(1, 5));
        assert_eq!(config.curve.reserve_ratio, Decimal::new(1, 1));
        assert_eq!(
            config.curve.deferred_allocation_basis,
            DeferredAllocationBasis::TotalSupply
        );
    }

    #[test]
    fn test_supply_amounts_round_trip_through_toml() {
        let config = TreasuryConfig {
            max_supply: Some(250_000_000_000),
            ..Default::default()
        };
        let text = toml::to_string(&config).unwrap();
        assert_eq!(TreasuryConfig::from_toml_str(&text).unwrap(), config);

        let config = TreasuryConfig::from_toml_str(
            "max_supply = \"340282366920938463463374607431768211455\"\n",
        )
        .unwrap();
        assert_eq!(config.max_supply, Some(Micro::MAX));

        let err = TreasuryConfig::from_toml_str("max_supply = -5\n").unwrap_err();
        assert!(matches!(err, TreasuryError::Config(_)));
    }

    #[test]
    fn test_rejects_invalid_toml_values() {
        let err = TreasuryConfig::from_toml_str("[curve]\nreserve_ratio = \"1.5\"\n").unwrap_err();
        assert!(matches!(err, TreasuryError::Curve(_)));

        let err = TreasuryConfig::from_toml_str("max_commit_attempts = 0\n").unwrap_err();
        assert!(matches!(err, TreasuryError::Config(_)));

        let err = TreasuryConfig::from_toml_str("hybrid_threshold = \"many\"\n").unwrap_err();
        assert!(matches!(err, TreasuryError::Config(_)));
    }
}
