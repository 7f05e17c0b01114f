//! Token-usage aggregation DTOs: counters, per-model usage, and cost results.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::ops::Add;
use typeshare::typeshare;

/// Non-negative additive token counters for one bucket (today, last-30-days,
/// or a single day).
#[typeshare]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenCounters {
    /// Input tokens consumed.
    pub input_tokens: u64,
    /// Output tokens produced.
    pub output_tokens: u64,
    /// Input tokens served from cache.
    pub cache_read_input_tokens: u64,
    /// Input tokens written to cache.
    pub cache_creation_input_tokens: u64,
    /// Authoritative total; reconstructed as `input + output` when absent upstream.
    pub total_tokens: u64,
}

impl TokenCounters {
    /// Build counters from raw fields, reconstructing `total` when the
    /// upstream record didn't carry one.
    #[must_use]
    pub fn from_raw(
        input_tokens: u64,
        output_tokens: u64,
        cache_read_input_tokens: u64,
        cache_creation_input_tokens: u64,
        total_tokens: Option<u64>,
    ) -> Self {
        Self {
            input_tokens,
            output_tokens,
            cache_read_input_tokens,
            cache_creation_input_tokens,
            total_tokens: total_tokens.unwrap_or(input_tokens + output_tokens),
        }
    }

    /// Componentwise `<=` comparison, used to check the `today <= last30days` invariant.
    #[must_use]
    pub fn le(&self, other: &Self) -> bool {
        self.input_tokens <= other.input_tokens
            && self.output_tokens <= other.output_tokens
            && self.cache_read_input_tokens <= other.cache_read_input_tokens
            && self.cache_creation_input_tokens <= other.cache_creation_input_tokens
            && self.total_tokens <= other.total_tokens
    }
}

impl Add for TokenCounters {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self {
            input_tokens: self.input_tokens + rhs.input_tokens,
            output_tokens: self.output_tokens + rhs.output_tokens,
            cache_read_input_tokens: self.cache_read_input_tokens + rhs.cache_read_input_tokens,
            cache_creation_input_tokens: self.cache_creation_input_tokens + rhs.cache_creation_input_tokens,
            total_tokens: self.total_tokens + rhs.total_tokens,
        }
    }
}

/// One day's counters, keyed by UTC date.
#[typeshare]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyCounters {
    /// `YYYY-MM-DD`, UTC.
    pub date: NaiveDate,
    /// That day's counters.
    pub counters: TokenCounters,
}

/// Per-model usage: today, trailing 30 days, and a daily series.
#[typeshare]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelUsage {
    /// The model ID as recorded in the transcript.
    pub model_id: String,
    /// Counters since the start of the current UTC day.
    pub today: TokenCounters,
    /// Counters over the trailing 30-day window.
    pub last30days: TokenCounters,
    /// Ascending-by-date daily breakdown.
    pub daily: Vec<DailyCounters>,
}

/// Source classification for a cost result.
#[typeshare]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CostSource {
    /// Every priced model resolved via the `exact` strategy and none failed.
    Actual,
    /// At least one model resolved via prefix/alias/fallback, none failed.
    Estimated,
    /// No model could be priced at all.
    Unavailable,
}

/// Confidence tier attached to a [`CostSource`].
#[typeshare]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CostConfidence {
    High,
    Medium,
    Low,
}

/// A bucket of totals, present only when a cost result has a value.
#[typeshare]
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CostBucket {
    /// Total cost in USD, rounded to six decimals.
    pub usd: Option<f64>,
    /// Total tokens across priced models.
    pub tokens: Option<u64>,
}

/// Per-model contribution to a cost result.
#[typeshare]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelCostBreakdown {
    /// The model ID.
    pub model_id: String,
    /// Which resolution strategy produced the quote used.
    pub strategy: crate::pricing::ResolutionStrategy,
    /// This model's cost in USD, rounded to six decimals.
    pub usd: f64,
    /// This model's total tokens.
    pub tokens: u64,
}

/// One day's contribution to a cost result.
#[typeshare]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyCostBreakdown {
    /// `YYYY-MM-DD`, UTC.
    pub date: NaiveDate,
    /// Models contributing tokens on this day, sorted ascending by ID.
    pub model_ids: Vec<String>,
    /// Total tokens across all models on this day.
    pub total_tokens: u64,
}

/// The joined Token Source x Pricing Catalog result for one provider.
#[typeshare]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderCostResult {
    /// Today's totals, present unless `source == unavailable`.
    pub today: CostBucket,
    /// Trailing-30-day totals, present unless `source == unavailable`.
    pub last30days: CostBucket,
    /// Source classification.
    pub source: CostSource,
    /// Confidence tier; `None` when `source == unavailable`.
    pub confidence: Option<CostConfidence>,
    /// Join of contributing catalog source labels.
    pub source_label: Option<String>,
    /// Newest catalog `updatedAt` across used quotes, or the token source's timestamp.
    pub updated_at: Option<DateTime<Utc>>,
    /// Machine-readable reason when unavailable or degraded.
    pub reason_code: Option<String>,
    /// Human-readable reason when unavailable or degraded.
    pub reason_message: Option<String>,
    /// Sorted ascending by model ID.
    pub model_breakdown: Vec<ModelCostBreakdown>,
    /// Sorted ascending by date.
    pub daily_breakdown: Vec<DailyCostBreakdown>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_raw_reconstructs_total_when_absent() {
        let c = TokenCounters::from_raw(10, 5, 0, 0, None);
        assert_eq!(c.total_tokens, 15);
    }

    #[test]
    fn from_raw_trusts_authoritative_total() {
        let c = TokenCounters::from_raw(10, 5, 3, 0, Some(20));
        assert_eq!(c.total_tokens, 20);
    }

    #[test]
    fn add_is_componentwise() {
        let a = TokenCounters::from_raw(1, 2, 3, 4, None);
        let b = TokenCounters::from_raw(10, 20, 30, 40, None);
        let sum = a + b;
        assert_eq!(sum.input_tokens, 11);
        assert_eq!(sum.total_tokens, a.total_tokens + b.total_tokens);
    }
}
