//! Token Source, Cost Engine, and Usage Dashboard: local usage aggregation,
//! cost attribution, and the per-provider tiered cache that fronts both.

/// Joins the Token Source with the Pricing Catalog into cost results.
pub mod cost_engine;
/// Per-provider tiered cache with failure backoff.
pub mod dashboard;
/// Sandboxed JSONL transcript scanning and aggregation.
pub mod token_source;
/// Token counter, usage, and cost DTOs.
pub mod types;

pub use cost_engine::CostEngine;
pub use dashboard::{CostWiring, DashboardProviderView, DashboardResponse, ProviderEntry, SnapshotSource, UsageDashboard};
pub use token_source::{TokenSource, TranscriptShape};
pub use types::{
    CostBucket, CostConfidence, CostSource, DailyCostBreakdown, DailyCounters, ModelCostBreakdown, ModelUsage,
    ProviderCostResult, TokenCounters,
};
