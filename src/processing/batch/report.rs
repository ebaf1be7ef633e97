use std::fmt;
use std::time::Duration;
use serde::Serialize;

/// How a batch run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum RunStatus {
    #[default]
    Completed,
    Cancelled,
    Failed,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = match self {
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::Failed => "failed",
        };
        f.write_str(status)
    }
}

/// End-of-run figures for one `process` call.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub status: RunStatus,
    pub total_items: usize,
    /// Items handed to the work function
    pub dispatched_items: usize,
    pub successful: usize,
    pub failed: usize,
    pub batches: usize,
    pub groups: usize,
    pub elapsed: Duration,
    pub peak_memory_bytes: u64,
    pub initial_batch_size: usize,
    pub final_batch_size: usize,
    pub min_batch_size_used: usize,
    pub max_batch_size_used: usize,
    pub size_adjustments: usize,
    pub timeout_warnings: usize,
    pub memory_warnings: usize,
}

impl RunSummary {
    fn safe_div(numerator: f64, denominator: f64) -> f64 {
        if denominator == 0.0 {
            0.0
        } else {
            numerator / denominator
        }
    }

    /// Dispatched items per second of wall time.
    pub fn throughput(&self) -> f64 {
        Self::safe_div(self.dispatched_items as f64, self.elapsed.as_secs_f64())
    }

    pub fn average_batch_size(&self) -> f64 {
        Self::safe_div(self.dispatched_items as f64, self.batches as f64)
    }

    pub fn format_bytes(bytes: u64) -> String {
        const KB: u64 = 1024;
        const MB: u64 = KB * 1024;
        const GB: u64 = MB * 1024;

        if bytes >= GB {
            format!("{:.2} GB", Self::safe_div(bytes as f64, GB as f64))
        } else if bytes >= MB {
            format!("{:.2} MB", Self::safe_div(bytes as f64, MB as f64))
        } else if bytes >= KB {
            format!("{:.2} KB", Self::safe_div(bytes as f64, KB as f64))
        } else {
            format!("{} B", bytes)
        }
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== Batch Run Report ({}) ===", self.status)?;
        writeln!(f)?;

        writeln!(f, "Items:")?;
        writeln!(f, "- Total: {}", self.total_items)?;
        writeln!(f, "- Dispatched: {}", self.dispatched_items)?;
        writeln!(f, "  └── Successful: {}", self.successful)?;
        writeln!(f, "  └── Failed: {}", self.failed)?;
        writeln!(f)?;

        writeln!(f, "Time-based Metrics:")?;
        writeln!(f, "- Total Duration: {:.2}s", self.elapsed.as_secs_f64())?;
        writeln!(f, "- Throughput: {:.2} items/s", self.throughput())?;
        writeln!(f)?;

        writeln!(f, "Batch Size Metrics:")?;
        writeln!(f, "- Batches: {} ({} groups)", self.batches, self.groups)?;
        writeln!(f, "- Average Batch Size: {:.1}", self.average_batch_size())?;
        writeln!(f, "- Size Range Used: {}-{}", self.min_batch_size_used, self.max_batch_size_used)?;
        writeln!(f, "- Initial → Final: {} → {}", self.initial_batch_size, self.final_batch_size)?;
        writeln!(f, "- Adjustments: {}", self.size_adjustments)?;
        writeln!(f)?;

        writeln!(f, "Memory Usage Metrics:")?;
        writeln!(f, "- Peak Resident Memory: {}", Self::format_bytes(self.peak_memory_bytes))?;
        writeln!(f, "- Memory Warnings: {}", self.memory_warnings)?;
        write!(f, "- Soft Timeout Warnings: {}", self.timeout_warnings)
    }
}
