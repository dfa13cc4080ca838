//! Runtime configuration, read from `RETAILPOS_*` environment variables.

use core::str::FromStr;

use thiserror::Error;

use retailpos_core::Money;

pub const ENV_TAX_RATE_BPS: &str = "RETAILPOS_TAX_RATE_BPS";
pub const ENV_OUT_OF_BALANCE_TOLERANCE: &str = "RETAILPOS_OUT_OF_BALANCE_TOLERANCE";
pub const ENV_MAX_COMMIT_ATTEMPTS: &str = "RETAILPOS_MAX_COMMIT_ATTEMPTS";
pub const ENV_DEFAULT_STOCK_MINIMUM: &str = "RETAILPOS_DEFAULT_STOCK_MINIMUM";
pub const ENV_DEFAULT_STOCK_MAXIMUM: &str = "RETAILPOS_DEFAULT_STOCK_MAXIMUM";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{name}: cannot parse '{value}'")]
    Malformed { name: &'static str, value: String },

    #[error("{name}: {reason}")]
    OutOfRange { name: &'static str, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PosConfig {
    /// Sales tax in basis points (1800 = 18%).
    pub tax_rate_bps: u32,
    /// A closing difference beyond this is flagged out of balance.
    pub out_of_balance_tolerance: Money,
    /// Commit attempts per operation before giving up on version conflicts.
    pub max_commit_attempts: u32,
    pub default_stock_minimum: i64,
    pub default_stock_maximum: i64,
}

impl Default for PosConfig {
    fn default() -> Self {
        Self {
            tax_rate_bps: 1800,
            out_of_balance_tolerance: Money::new(1, 0),
            max_commit_attempts: 3,
            default_stock_minimum: 5,
            default_stock_maximum: 1000,
        }
    }
}

impl PosConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`PosConfig::from_env`] with an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let config = Self {
            tax_rate_bps: parse(&lookup, ENV_TAX_RATE_BPS)?.unwrap_or(defaults.tax_rate_bps),
            out_of_balance_tolerance: parse(&lookup, ENV_OUT_OF_BALANCE_TOLERANCE)?
                .unwrap_or(defaults.out_of_balance_tolerance),
            max_commit_attempts: parse(&lookup, ENV_MAX_COMMIT_ATTEMPTS)?.unwrap_or(defaults.max_commit_attempts),
            default_stock_minimum: parse(&lookup, ENV_DEFAULT_STOCK_MINIMUM)?
                .unwrap_or(defaults.default_stock_minimum),
            default_stock_maximum: parse(&lookup, ENV_DEFAULT_STOCK_MAXIMUM)?
                .unwrap_or(defaults.default_stock_maximum),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_commit_attempts == 0 {
            return Err(ConfigError::OutOfRange {
                name: ENV_MAX_COMMIT_ATTEMPTS,
                reason: "must be at least 1".to_string(),
            });
        }
        if self.out_of_balance_tolerance.is_negative() {
            return Err(ConfigError::OutOfRange {
                name: ENV_OUT_OF_BALANCE_TOLERANCE,
                reason: "cannot be negative".to_string(),
            });
        }
        if self.default_stock_minimum < 0 || self.default_stock_maximum < self.default_stock_minimum {
            return Err(ConfigError::OutOfRange {
                name: ENV_DEFAULT_STOCK_MAXIMUM,
                reason: "stock bounds must satisfy 0 <= minimum <= maximum".to_string(),
            });
        }
        Ok(())
    }
}

fn parse<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, name: &'static str) -> Result<Option<T>, ConfigError> {
    match lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty()) {
        None => Ok(None),
        Some(value) => value
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::Malformed { name, value }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn defaults_when_nothing_is_set() {
        assert_eq!(PosConfig::from_lookup(lookup(&[])).unwrap(), PosConfig::default());
    }

    #[test]
    fn overrides_are_parsed() {
        let config = PosConfig::from_lookup(lookup(&[
            (ENV_TAX_RATE_BPS, "1600"),
            (ENV_OUT_OF_BALANCE_TOLERANCE, "0.50"),
            (ENV_MAX_COMMIT_ATTEMPTS, " 5 "),
        ]))
        .unwrap();
        assert_eq!(config.tax_rate_bps, 1600);
        assert_eq!(config.out_of_balance_tolerance, Money::new(0, 50));
        assert_eq!(config.max_commit_attempts, 5);
        assert_eq!(config.default_stock_minimum, 5);
    }

    #[test]
    fn malformed_and_out_of_range_values_fail() {
        assert!(matches!(
            PosConfig::from_lookup(lookup(&[(ENV_TAX_RATE_BPS, "eighteen")])),
            Err(ConfigError::Malformed { name: ENV_TAX_RATE_BPS, .. })
        ));
        assert!(matches!(
            PosConfig::from_lookup(lookup(&[(ENV_MAX_COMMIT_ATTEMPTS, "0")])),
            Err(ConfigError::OutOfRange { .. })
        ));
    }
}
