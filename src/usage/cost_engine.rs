//! Cost Engine: joins the Token Source with the Pricing Catalog into a
//! [`ProviderCostResult`], classifying the result by resolution strategy.

use chrono::Utc;

use crate::core::errors::CoreError;
use crate::pricing::{PricingCatalog, ResolutionStrategy};

use super::token_source::{TokenSource, TranscriptShape};
use super::types::{
    CostBucket, CostConfidence, CostSource, DailyCostBreakdown, ModelCostBreakdown, ProviderCostResult,
};

/// Joins a [`TokenSource`] and a [`PricingCatalog`] into per-provider cost results.
pub struct CostEngine<'a> {
    token_source: &'a TokenSource,
    catalog: &'a PricingCatalog,
    pricing_enabled: bool,
}

impl<'a> CostEngine<'a> {
    /// Construct a cost engine over a token source and pricing catalog.
    #[must_use]
    pub fn new(token_source: &'a TokenSource, catalog: &'a PricingCatalog, pricing_enabled: bool) -> Self {
        Self {
            token_source,
            catalog,
            pricing_enabled,
        }
    }

    fn unavailable(reason_code: &str, reason_message: String) -> ProviderCostResult {
        ProviderCostResult {
            today: CostBucket::default(),
            last30days: CostBucket::default(),
            source: CostSource::Unavailable,
            confidence: None,
            source_label: None,
            updated_at: None,
            reason_code: Some(reason_code.to_owned()),
            reason_message: Some(reason_message),
            model_breakdown: Vec::new(),
            daily_breakdown: Vec::new(),
        }
    }

    /// Compute the cost result for `provider_id`.
    ///
    /// # Errors
    ///
    /// Returns an error only if the token source scan itself fails
    /// (filesystem/internal error); per-model pricing failures are recorded
    /// inline and skipped rather than propagated.
    #[tracing::instrument(skip(self))]
    pub async fn cost_for(&self, provider_id: &str, shape: TranscriptShape) -> Result<ProviderCostResult, CoreError> {
        if !self.pricing_enabled {
            return Ok(Self::unavailable("PRICING_NOT_CONFIGURED", "pricing disabled in configuration".to_owned()));
        }

        let usage = self.token_source.usage_for(provider_id, shape).await?;
        if usage.is_empty() {
            return Ok(Self::unavailable("COST_SOURCE_UNAVAILABLE", "no token usage recorded".to_owned()));
        }

        let mut model_breakdown = Vec::new();
        let mut today_total = CostBucket { usd: Some(0.0), tokens: Some(0) };
        let mut last30_total = CostBucket { usd: Some(0.0), tokens: Some(0) };
        let mut strategies_used = Vec::new();
        let mut any_failed = false;
        let mut source_labels = Vec::new();
        let mut newest_updated_at = None;

        let mut daily_map: std::collections::HashMap<chrono::NaiveDate, (Vec<String>, u64)> = std::collections::HashMap::new();

        for model in &usage {
            match self.catalog.resolve(provider_id, &model.model_id).await {
                Ok(quote) if quote.has_price => {
                    let input_unit = quote.input_cost_per_token.unwrap_or(0.0);
                    let output_unit = quote.output_cost_per_token.unwrap_or(0.0);
                    let cache_read_unit = quote.cache_read_input_cost_per_token.unwrap_or(input_unit);
                    let cache_creation_unit = quote.cache_creation_input_cost_per_token.unwrap_or(input_unit);

                    let model_cost = |c: &super::types::TokenCounters| -> f64 {
                        c.input_tokens as f64 * input_unit
                            + c.output_tokens as f64 * output_unit
                            + c.cache_read_input_tokens as f64 * cache_read_unit
                            + c.cache_creation_input_tokens as f64 * cache_creation_unit
                    };

                    let today_usd = round6(model_cost(&model.today));
                    let last30_usd = model_cost(&model.last30days);

                    today_total.usd = today_total.usd.map(|v| v + today_usd);
                    today_total.tokens = today_total.tokens.map(|v| v + model.today.total_tokens);
                    last30_total.usd = last30_total.usd.map(|v| v + last30_usd);
                    last30_total.tokens = last30_total.tokens.map(|v| v + model.last30days.total_tokens);

                    strategies_used.push(quote.strategy);
                    source_labels.push(quote.source_label.clone());
                    newest_updated_at = match newest_updated_at {
                        None => Some(quote.updated_at),
                        Some(prev) if quote.updated_at > prev => Some(quote.updated_at),
                        prev => prev,
                    };

                    model_breakdown.push(ModelCostBreakdown {
                        model_id: model.model_id.clone(),
                        strategy: quote.strategy,
                        usd: round6(last30_usd),
                        tokens: model.last30days.total_tokens,
                    });

                    for day in &model.daily {
                        let entry = daily_map.entry(day.date).or_insert_with(|| (Vec::new(), 0));
                        entry.0.push(model.model_id.clone());
                        entry.1 += day.counters.total_tokens;
                    }
                }
                Ok(_) | Err(CoreError::ModelMappingMissing { .. } | CoreError::ModelPriceMissing { .. }) => {
                    any_failed = true;
                }
                Err(other) => return Err(other),
            }
        }

        if model_breakdown.is_empty() {
            return Ok(Self::unavailable("COST_SOURCE_UNAVAILABLE", "no model could be priced".to_owned()));
        }

        model_breakdown.sort_by(|a, b| a.model_id.cmp(&b.model_id));

        let mut daily_breakdown: Vec<DailyCostBreakdown> = daily_map
            .into_iter()
            .map(|(date, (mut model_ids, total_tokens))| {
                model_ids.sort();
                DailyCostBreakdown { date, model_ids, total_tokens }
            })
            .collect();
        daily_breakdown.sort_by_key(|d| d.date);

        let source = if any_failed {
            CostSource::Estimated
        } else if strategies_used.iter().all(|s| *s == ResolutionStrategy::Exact) {
            CostSource::Actual
        } else {
            CostSource::Estimated
        };
        let confidence = match source {
            CostSource::Actual => Some(CostConfidence::High),
            CostSource::Estimated if any_failed => Some(CostConfidence::Low),
            CostSource::Estimated => Some(CostConfidence::Medium),
            CostSource::Unavailable => None,
        };

        today_total.usd = today_total.usd.map(round6);
        last30_total.usd = last30_total.usd.map(round6);

        Ok(ProviderCostResult {
            today: today_total,
            last30days: last30_total,
            source,
            confidence,
            source_label: if source_labels.is_empty() { None } else { Some(source_labels.join(", ")) },
            updated_at: newest_updated_at.or(Some(Utc::now())),
            reason_code: None,
            reason_message: None,
            model_breakdown,
            daily_breakdown,
        })
    }
}

fn round6(v: f64) -> f64 {
    (v * 1_000_000.0).round() / 1_000_000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pricing::ProviderResolutionConfig;
    use std::io::Write as _;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn setup(usage_json: serde_json::Value, catalog_json: serde_json::Value) -> (tempfile::TempDir, TokenSource, MockServer, PricingCatalog) {
        let dir = tempfile::tempdir().unwrap();
        let mut f = std::fs::File::create(dir.path().join("log.jsonl")).unwrap();
        for line in usage_json.as_array().unwrap() {
            writeln!(f, "{line}").unwrap();
        }
        let source = TokenSource::new(dir.path().to_path_buf());

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(catalog_json))
            .mount(&server)
            .await;
        let mut cfg = std::collections::HashMap::new();
        cfg.insert("codex".to_owned(), ProviderResolutionConfig::default());
        let catalog = PricingCatalog::new(server.uri(), std::time::Duration::from_secs(60), std::time::Duration::from_secs(60), cfg);

        (dir, source, server, catalog)
    }

    #[tokio::test]
    async fn s3_cost_all_exact() {
        let now = Utc::now();
        let today = now.date_naive();
        let line = serde_json::json!({
            "timestamp": now.to_rfc3339(),
            "message": {"id": "m1", "model": "gpt-5.3-codex", "usage": {"input_tokens": 1000, "output_tokens": 500}},
            "requestId": "r1"
        });
        let (_dir, source, _server, catalog) = setup(
            serde_json::json!([line]),
            serde_json::json!({"gpt-5.3-codex": {"input_cost_per_token": 1e-6, "output_cost_per_token": 1e-5, "cache_read_input_token_cost": 5e-7}}),
        )
        .await;

        let engine = CostEngine::new(&source, &catalog, true);
        let result = engine.cost_for("codex", TranscriptShape::ChatTranscript).await.unwrap();
        assert_eq!(result.source, CostSource::Actual);
        assert_eq!(result.confidence, Some(CostConfidence::High));
        assert_eq!(result.today.tokens, Some(1500));
        assert_eq!(result.model_breakdown.len(), 1);
        assert_eq!(result.daily_breakdown.len(), 1);
        assert_eq!(result.daily_breakdown[0].date, today);
        assert_eq!(result.daily_breakdown[0].total_tokens, 1500);
    }

    #[tokio::test]
    async fn disabled_pricing_is_unavailable() {
        let (_dir, source, _server, catalog) = setup(serde_json::json!([]), serde_json::json!({})).await;
        let engine = CostEngine::new(&source, &catalog, false);
        let result = engine.cost_for("codex", TranscriptShape::ChatTranscript).await.unwrap();
        assert_eq!(result.source, CostSource::Unavailable);
        assert_eq!(result.reason_code.as_deref(), Some("PRICING_NOT_CONFIGURED"));
    }
}
