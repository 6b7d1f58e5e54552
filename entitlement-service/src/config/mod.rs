use secrecy::Secret;
use service_core::config as core_config;
use service_core::error::AppError;
use std::env;
use std::time::Duration;

use crate::models::TransactionDefaults;

#[derive(Debug, Clone)]
pub struct EntitlementConfig {
    pub common: core_config::Config,
    pub mongodb: MongoConfig,
    pub billing: BillingConfig,
    pub sweeper: SweeperConfig,
    pub otlp_endpoint: Option<String>,
    pub service_name: String,
}

#[derive(Debug, Clone)]
pub struct MongoConfig {
    pub uri: Secret<String>,
    pub database: String,
}

#[derive(Debug, Clone)]
pub struct BillingConfig {
    pub default_currency: String,
    pub default_access_period_days: u32,
}

#[derive(Debug, Clone)]
pub struct SweeperConfig {
    /// Zero disables the background sweep.
    pub interval_secs: u64,
}

impl SweeperConfig {
    pub fn interval(&self) -> Option<Duration> {
        (self.interval_secs > 0).then(|| Duration::from_secs(self.interval_secs))
    }
}

impl BillingConfig {
    pub fn transaction_defaults(&self) -> TransactionDefaults {
        TransactionDefaults {
            currency: self.default_currency.clone(),
            access_period_days: self.default_access_period_days,
        }
    }
}

impl EntitlementConfig {
    pub fn load() -> Result<Self, AppError> {
        let common_config = core_config::Config::load()?;
        let is_prod = env::var("ENVIRONMENT").unwrap_or_else(|_| "dev".to_string()) == "prod";

        let default_access_period_days: u32 =
            parse_env("DEFAULT_ACCESS_PERIOD_DAYS", Some("30"), is_prod)?;
        if default_access_period_days == 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "DEFAULT_ACCESS_PERIOD_DAYS must be at least 1"
            )));
        }

        Ok(EntitlementConfig {
            common: common_config,
            mongodb: MongoConfig {
                uri: Secret::new(get_env("MONGODB_URI", None, is_prod)?),
                database: get_env("MONGODB_DATABASE", Some("entitlement_db"), is_prod)?,
            },
            billing: BillingConfig {
                default_currency: get_env("DEFAULT_CURRENCY", Some("USD"), is_prod)?
                    .to_uppercase(),
                default_access_period_days,
            },
            sweeper: SweeperConfig {
                interval_secs: parse_env("EXPIRY_SWEEP_INTERVAL_SECS", Some("3600"), is_prod)?,
            },
            otlp_endpoint: env::var("OTLP_ENDPOINT").ok().filter(|v| !v.is_empty()),
            service_name: "entitlement-service".to_string(),
        })
    }
}

fn get_env(key: &str, default: Option<&str>, is_prod: bool) -> Result<String, AppError> {
    match env::var(key) {
        Ok(val) => Ok(val),
        Err(_) => {
            if is_prod && default.is_none() {
                Err(AppError::ConfigError(anyhow::anyhow!(
                    "{} is required in production but not set",
                    key
                )))
            } else if let Some(def) = default {
                Ok(def.to_string())
            } else {
                Err(AppError::ConfigError(anyhow::anyhow!(
                    "{} is required but not set",
                    key
                )))
            }
        }
    }
}

fn parse_env<T>(key: &str, default: Option<&str>, is_prod: bool) -> Result<T, AppError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    let raw = get_env(key, default, is_prod)?;
    raw.trim().parse().map_err(|e: T::Err| {
        AppError::ConfigError(anyhow::anyhow!("{} has invalid value '{}': {}", key, raw, e))
    })
}
