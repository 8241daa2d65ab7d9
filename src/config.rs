use serde::{Deserialize, Serialize};
use std::fs;
use std::time::Duration;
use thiserror::Error;

use crate::accrual::AccrualPolicy;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config yaml {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("Invalid accrual config: {0}")]
    InvalidAccrual(String),
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AppConfig {
    pub log_level: String,
    pub log_dir: String,
    pub log_file: String,
    pub use_json: bool,
    pub rotation: String,
    /// PostgreSQL connection URL; `DATABASE_URL` takes precedence when set
    #[serde(default)]
    pub postgres_url: Option<String>,
    #[serde(default)]
    pub pool: PoolConfig,
    #[serde(default)]
    pub accrual: AccrualConfig,
    #[serde(default)]
    pub referral: ReferralConfig,
    /// Deadline applied to every atomic unit started by the CLI
    #[serde(default)]
    pub tx_timeout_ms: Option<u64>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct PoolConfig {
    pub max_connections: u32,
    pub acquire_timeout_secs: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: 10,
            acquire_timeout_secs: 5,
        }
    }
}

/// Referral accrual settings. The zone is a fixed offset, never the host's local zone.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AccrualConfig {
    pub utc_offset_hours: i32,
    pub max_rate: f64,
    pub duration_months: i32,
    pub batch_concurrency: usize,
}

impl Default for AccrualConfig {
    fn default() -> Self {
        Self {
            utc_offset_hours: 9, // Asia/Tokyo, no DST
            max_rate: 10.0,
            duration_months: 9,
            batch_concurrency: 8,
        }
    }
}

impl AccrualConfig {
    pub fn policy(&self) -> Result<AccrualPolicy, ConfigError> {
        if !(0.0..=10.0).contains(&self.max_rate) {
            return Err(ConfigError::InvalidAccrual(format!(
                "max_rate {} outside 0.0..=10.0",
                self.max_rate
            )));
        }
        if self.duration_months <= 0 {
            return Err(ConfigError::InvalidAccrual(format!(
                "duration_months must be positive, got {}",
                self.duration_months
            )));
        }
        AccrualPolicy::new(self.utc_offset_hours, self.max_rate, self.duration_months).ok_or_else(
            || {
                ConfigError::InvalidAccrual(format!(
                    "utc_offset_hours {} is not a valid offset",
                    self.utc_offset_hours
                ))
            },
        )
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ReferralConfig {
    /// Opening balance (minor units) granted to accounts opened with a referral code
    pub signup_bonus: i64,
}

impl Default for ReferralConfig {
    fn default() -> Self {
        Self { signup_bonus: 1000 }
    }
}

impl AppConfig {
    pub fn load(env: &str) -> Result<Self, ConfigError> {
        let config_path = format!("config/{}.yaml", env);
        let content = fs::read_to_string(&config_path).map_err(|source| ConfigError::Read {
            path: config_path.clone(),
            source,
        })?;
        Self::from_yaml(&content).map_err(|source| ConfigError::Parse {
            path: config_path,
            source,
        })
    }

    pub fn from_yaml(content: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(content)
    }

    pub fn database_url(&self) -> Option<String> {
        std::env::var("DATABASE_URL")
            .ok()
            .or_else(|| self.postgres_url.clone())
    }

    pub fn tx_timeout(&self) -> Option<Duration> {
        self.tx_timeout_ms.map(Duration::from_millis)
    }
}
