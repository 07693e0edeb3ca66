use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::stage::StageKind;

/// Top-level configuration, loaded from a JSON file with camelCase keys.
/// Every field has a default so an empty object is a valid config.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OrchestratorConfig {
    /// Concurrent stage executions in the pooled dispatcher.
    pub worker_count: usize,
    /// Attempts a job gets before it fails for good.
    pub max_attempts: i64,
    /// Per-stage execution timeout.
    pub stage_timeout_secs: u64,
    /// Overrides for stages that need more (or less) than the default.
    pub stage_timeout_overrides: HashMap<StageKind, u64>,
    /// First retry delay; doubles per attempt, capped at one minute.
    pub retry_base_delay_ms: u64,
    /// How often the dispatcher re-polls when the queue looks empty.
    pub poll_interval_ms: u64,
    /// Broadcast channel capacity for job events.
    pub event_capacity: usize,
    /// Base URL of the AI worker service.
    pub worker_base_url: String,
    /// SQLite file location. Defaults to `~/.structa/data/structa.db`.
    pub database_path: Option<PathBuf>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            worker_count: 5,
            max_attempts: 3,
            stage_timeout_secs: 120,
            stage_timeout_overrides: HashMap::new(),
            retry_base_delay_ms: 1_000,
            poll_interval_ms: 250,
            event_capacity: 100,
            worker_base_url: "http://localhost:8000".to_string(),
            database_path: None,
        }
    }
}

const MAX_RETRY_DELAY: Duration = Duration::from_secs(60);

impl OrchestratorConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.worker_count == 0 {
            return Err(ConfigError::Validation {
                message: "workerCount must be at least 1".to_string(),
            });
        }
        if self.max_attempts < 1 {
            return Err(ConfigError::Validation {
                message: "maxAttempts must be at least 1".to_string(),
            });
        }
        if self.stage_timeout_secs == 0 {
            return Err(ConfigError::Validation {
                message: "stageTimeoutSecs must be at least 1".to_string(),
            });
        }
        if self.worker_base_url.is_empty() {
            return Err(ConfigError::Validation {
                message: "workerBaseUrl must not be empty".to_string(),
            });
        }
        Ok(())
    }

    /// Timeout for one execution of `kind`.
    pub fn stage_timeout(&self, kind: StageKind) -> Duration {
        let secs = self
            .stage_timeout_overrides
            .get(&kind)
            .copied()
            .unwrap_or(self.stage_timeout_secs);
        Duration::from_secs(secs)
    }

    /// Backoff before attempt `attempts + 1`, given `attempts` failures so
    /// far. Exponential from the base delay, capped at one minute.
    pub fn retry_delay(&self, attempts: i64) -> Duration {
        let exponent = attempts.saturating_sub(1).clamp(0, 31) as u32;
        let delay = Duration::from_millis(self.retry_base_delay_ms)
            .saturating_mul(2u32.saturating_pow(exponent));
        delay.min(MAX_RETRY_DELAY)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}
