//! ABOUTME: Configuration management with validation and environment loading
//! ABOUTME: Orchestrator runtime tunables plus the per-job evaluated config model

pub mod job_config;

use orc_core::{Error, Result};
use serde::{Deserialize, Serialize};
use validator::Validate;

/// Distributed lock tunables (§4.1).
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct LockConfig {
    /// Lock TTL in seconds; expired locks are reclaimable by the next caller.
    #[validate(range(min = 1))]
    pub ttl_seconds: u64,
    /// Max `acquire` retry attempts before surfacing a retryable error.
    #[validate(range(min = 1))]
    pub retry_attempts: u32,
    /// Fixed delay between `acquire` retries, in seconds.
    #[validate(range(min = 1))]
    pub retry_delay_seconds: u64,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            ttl_seconds: 600,
            retry_attempts: 20,
            retry_delay_seconds: 5,
        }
    }
}

/// Deploy/undeploy fan-out retry tunables (§4.7/§4.8).
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct FanoutConfig {
    #[validate(range(min = 1))]
    pub deploy_retry_attempts: u32,
    #[validate(range(min = 1))]
    pub deploy_retry_delay_seconds: u64,
    #[validate(range(min = 1))]
    pub default_retry_attempts: u32,
    #[validate(range(min = 1))]
    pub default_retry_delay_seconds: u64,
}

impl Default for FanoutConfig {
    fn default() -> Self {
        Self {
            deploy_retry_attempts: 10,
            deploy_retry_delay_seconds: 20,
            default_retry_attempts: 5,
            default_retry_delay_seconds: 10,
        }
    }
}

/// Pipeline runtime tunables (§4.9): bounded waits, chord polling, task time limits.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct PipelineConfig {
    /// Max retries for a task blocked on `async_wait`.
    #[validate(range(min = 1))]
    pub wait_retry_attempts: u32,
    /// Delay between `async_wait` retries, in seconds.
    #[validate(range(min = 1))]
    pub wait_retry_delay_seconds: u64,
    /// Poll interval used while a chord parent is waiting on outstanding children.
    #[validate(range(min = 1))]
    pub chord_poll_interval_seconds: u64,
    /// Soft per-task time limit, in seconds; exceeding raises a cancellable error.
    #[validate(range(min = 1))]
    pub soft_time_limit_seconds: u64,
    /// Hard per-task time limit, in seconds; exceeding terminates the task outright.
    #[validate(range(min = 1))]
    pub hard_time_limit_seconds: u64,
    /// Number of workers draining the task queue.
    #[validate(range(min = 1))]
    pub worker_pool_size: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            wait_retry_attempts: 30,
            wait_retry_delay_seconds: 10,
            chord_poll_interval_seconds: 20,
            soft_time_limit_seconds: 600,
            hard_time_limit_seconds: 1800,
            worker_pool_size: 8,
        }
    }
}

/// Persistence tunables: db location plus retention windows (§3, §9).
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct StoreConfig {
    #[validate(length(min = 1))]
    pub db_path: String,
    /// Job retention, in seconds. Default matches the documented 4-week window.
    #[validate(range(min = 1))]
    pub job_retention_seconds: u64,
    /// Event retention, in seconds; independently configurable per §9.
    #[validate(range(min = 1))]
    pub event_retention_seconds: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        const FOUR_WEEKS: u64 = 4 * 7 * 24 * 3600;
        Self {
            db_path: "orchestrator.db".to_string(),
            job_retention_seconds: FOUR_WEEKS,
            event_retention_seconds: FOUR_WEEKS,
        }
    }
}

/// Top-level orchestrator configuration, loaded once at startup.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct Config {
    #[validate(nested)]
    pub lock: LockConfig,
    #[validate(nested)]
    pub fanout: FanoutConfig,
    #[validate(nested)]
    pub pipeline: PipelineConfig,
    #[validate(nested)]
    pub store: StoreConfig,
    /// Deployment environment name (`dev`, `staging`, `production`), used to select
    /// the logging format in `orc_obs`/`orc_core::telemetry`.
    pub environment: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            lock: LockConfig::default(),
            fanout: FanoutConfig::default(),
            pipeline: PipelineConfig::default(),
            store: StoreConfig::default(),
            environment: "development".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from defaults, optional config file, and `ORCHESTRATOR_*`
    /// environment variable overrides (e.g. `ORCHESTRATOR_LOCK__TTL_SECONDS=300`).
    pub fn load() -> Result<Self> {
        let defaults = Config::default();

        let settings = config::Config::builder()
            .set_default("lock.ttl_seconds", defaults.lock.ttl_seconds)?
            .set_default("lock.retry_attempts", defaults.lock.retry_attempts)?
            .set_default("lock.retry_delay_seconds", defaults.lock.retry_delay_seconds)?
            .set_default("fanout.deploy_retry_attempts", defaults.fanout.deploy_retry_attempts)?
            .set_default(
                "fanout.deploy_retry_delay_seconds",
                defaults.fanout.deploy_retry_delay_seconds,
            )?
            .set_default("fanout.default_retry_attempts", defaults.fanout.default_retry_attempts)?
            .set_default(
                "fanout.default_retry_delay_seconds",
                defaults.fanout.default_retry_delay_seconds,
            )?
            .set_default("pipeline.wait_retry_attempts", defaults.pipeline.wait_retry_attempts)?
            .set_default(
                "pipeline.wait_retry_delay_seconds",
                defaults.pipeline.wait_retry_delay_seconds,
            )?
            .set_default(
                "pipeline.chord_poll_interval_seconds",
                defaults.pipeline.chord_poll_interval_seconds,
            )?
            .set_default(
                "pipeline.soft_time_limit_seconds",
                defaults.pipeline.soft_time_limit_seconds,
            )?
            .set_default(
                "pipeline.hard_time_limit_seconds",
                defaults.pipeline.hard_time_limit_seconds,
            )?
            .set_default("pipeline.worker_pool_size", defaults.pipeline.worker_pool_size as i64)?
            .set_default("store.db_path", defaults.store.db_path.clone())?
            .set_default("store.job_retention_seconds", defaults.store.job_retention_seconds)?
            .set_default("store.event_retention_seconds", defaults.store.event_retention_seconds)?
            .set_default("environment", defaults.environment.clone())?
            .add_source(config::File::with_name("orchestrator").required(false))
            .add_source(config::Environment::with_prefix("ORCHESTRATOR").separator("__"))
            .build()?;

        let config: Config = settings
            .try_deserialize()
            .map_err(|e| Error::Config(format!("failed to deserialize configuration: {e}")))?;

        config
            .validate()
            .map_err(|e| Error::Config(format!("configuration validation failed: {e}")))?;

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    #[test]
    fn default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn default_lock_ttl_matches_soft_time_limit() {
        let config = Config::default();
        assert_eq!(config.lock.ttl_seconds, config.pipeline.soft_time_limit_seconds);
    }

    #[test]
    fn load_applies_documented_defaults() {
        let _guard = ENV_MUTEX.lock().unwrap();
        let config = Config::load().expect("config should load with defaults");
        assert_eq!(config.lock.ttl_seconds, 600);
        assert_eq!(config.fanout.deploy_retry_attempts, 10);
        assert_eq!(config.pipeline.wait_retry_attempts, 30);
    }

    #[test]
    fn load_respects_environment_override() {
        let _guard = ENV_MUTEX.lock().unwrap();
        std::env::set_var("ORCHESTRATOR_LOCK__TTL_SECONDS", "120");
        let config = Config::load().expect("config should load with override");
        std::env::remove_var("ORCHESTRATOR_LOCK__TTL_SECONDS");
        assert_eq!(config.lock.ttl_seconds, 120);
    }

    #[test]
    fn invalid_worker_pool_size_fails_validation() {
        let mut config = Config::default();
        config.pipeline.worker_pool_size = 0;
        assert!(config.validate().is_err());
    }
}
