use std::path::Path;
use serde::{Deserialize, Serialize};
use tracing::debug;
use crate::processing::batch::{AdvisorConfiguration, BatchSettings};
use crate::utils::{MigratorError, MigratorResult};

/// Settings file for a migration run.
///
/// ```json
/// { "batch": { "batchSize": 40, "orderStrategy": "timestampAscending" },
///   "advisor": { "cooldownPeriod": 5000 },
///   "memoryBudgetMb": 2048 }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MigrationConfig {
    pub batch: BatchSettings,
    /// Derived from `batch` when absent
    pub advisor: Option<AdvisorConfiguration>,
    /// Measure memory pressure against this budget instead of physical memory
    pub memory_budget_mb: Option<u64>,
}

impl MigrationConfig {
    pub async fn load(path: impl AsRef<Path>) -> MigratorResult<Self> {
        let path = path.as_ref();
        let text = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| MigratorError::config(format!("Cannot read {}: {}", path.display(), e)))?;
        let config: Self = serde_json::from_str(&text)
            .map_err(|e| MigratorError::config(format!("Invalid settings in {}: {}", path.display(), e)))?;
        debug!("Loaded settings from {}", path.display());
        Ok(config)
    }

    /// Advisor settings, falling back to the batch bounds.
    pub fn advisor_configuration(&self) -> AdvisorConfiguration {
        match &self.advisor {
            Some(advisor) => advisor.clone().validated(),
            None => AdvisorConfiguration::from_settings(&self.batch),
        }
    }

    pub fn memory_budget_bytes(&self) -> Option<u64> {
        self.memory_budget_mb.map(|mb| mb.saturating_mul(1024 * 1024))
    }
}
