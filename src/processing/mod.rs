//! The adaptive batch engine.
//!
//! - [`batch::BatchProcessor`]: the batch loop
//! - [`batch::BatchSizeAdvisor`]: batch size advice from recent performance
//! - [`batch::BatchSettings`] / [`batch::AdvisorConfiguration`]: tuning

pub mod batch;

pub use batch::{
    AdvisorConfiguration, BatchItem, BatchProcessor, BatchSettings, BatchSizeAdvisor, OrderStrategy, RunStatus,
    RunSummary,
};
