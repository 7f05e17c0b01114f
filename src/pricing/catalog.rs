//! Pricing Catalog: a single HTTPS-fetched JSON pricing document cached in
//! memory with a TTL and a stale-serviceable window, resolved per-model via
//! [`crate::pricing::model_id`]'s exact/prefix/alias/fallback order.
//!
//! The cache is the one unavoidable process-wide singleton named in the
//! design notes; concurrent first-fetches are single-flighted through
//! `fetch_lock` so they share one outbound request.

use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration as StdDuration;
use tokio::sync::{Mutex, RwLock};
use typeshare::typeshare;

use crate::core::errors::CoreError;

use super::model_id::{self, FallbackCandidate, PricedRow, ResolutionStrategy};

/// A single catalog row as fetched from the pricing document.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct CatalogRow {
    #[serde(default)]
    input_cost_per_token: Option<f64>,
    #[serde(default)]
    output_cost_per_token: Option<f64>,
    #[serde(default)]
    cache_read_input_token_cost: Option<f64>,
    #[serde(default)]
    cache_creation_input_token_cost: Option<f64>,
}

impl PricedRow for CatalogRow {
    fn has_price(&self) -> bool {
        [
            self.input_cost_per_token,
            self.output_cost_per_token,
            self.cache_read_input_token_cost,
            self.cache_creation_input_token_cost,
        ]
        .into_iter()
        .flatten()
        .any(f64::is_finite)
    }
}

/// The fully-resolved price quote for a `(providerId, modelId)` pair.
#[typeshare]
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelPriceQuote {
    /// The model ID as requested.
    pub model_id: String,
    /// The catalog key that actually matched.
    pub resolved_model_id: String,
    /// Which of the four strategies produced this match.
    pub strategy: ResolutionStrategy,
    /// Per-input-token cost in USD.
    pub input_cost_per_token: Option<f64>,
    /// Per-output-token cost in USD.
    pub output_cost_per_token: Option<f64>,
    /// Per-cache-read-token cost; falls back to `input_cost_per_token` at
    /// cost-calculation time, never at quote time.
    pub cache_read_input_cost_per_token: Option<f64>,
    /// Per-cache-creation-token cost; falls back to `input_cost_per_token`
    /// at cost-calculation time, never at quote time.
    pub cache_creation_input_cost_per_token: Option<f64>,
    /// `true` iff at least one unit cost above is present and finite.
    pub has_price: bool,
    /// Human-readable catalog source label (e.g. `"LiteLLM"`).
    pub source_label: String,
    /// When the underlying catalog snapshot was fetched.
    pub updated_at: DateTime<Utc>,
    /// `true` if this quote was served from a stale (past-TTL) cache.
    pub stale: bool,
}

struct CatalogState {
    rows: HashMap<String, CatalogRow>,
    fetched_at: DateTime<Utc>,
}

/// Per-provider resolution configuration: ordered prefix candidates and a
/// static alias map.
#[derive(Debug, Clone, Default)]
pub struct ProviderResolutionConfig {
    /// Ordered prefixes tried in [`ResolutionStrategy::Prefix`] order.
    pub prefixes: Vec<String>,
    /// Static `modelId -> canonicalId` alias map.
    pub aliases: HashMap<String, String>,
}

/// The pricing catalog: fetch-once, TTL-cached, single-flighted.
pub struct PricingCatalog {
    http: Client,
    url: String,
    ttl: StdDuration,
    stale_max_age: StdDuration,
    source_label: String,
    provider_config: HashMap<String, ProviderResolutionConfig>,
    state: RwLock<Option<CatalogState>>,
    fetch_lock: Mutex<()>,
}

impl PricingCatalog {
    /// Construct a catalog. `provider_config` supplies the per-provider
    /// prefix/alias tables; providers without an entry get no prefix/alias
    /// resolution (exact and fallback still apply).
    ///
    /// # Panics
    ///
    /// Panics if the underlying `reqwest::Client` cannot be built.
    #[must_use]
    #[expect(clippy::expect_used, reason = "default reqwest Client::builder configuration is infallible")]
    pub fn new(
        url: String,
        ttl: StdDuration,
        stale_max_age: StdDuration,
        provider_config: HashMap<String, ProviderResolutionConfig>,
    ) -> Self {
        Self {
            http: Client::builder().timeout(StdDuration::from_secs(10)).build().expect("reqwest client"),
            url,
            ttl,
            stale_max_age,
            source_label: "LiteLLM".to_owned(),
            provider_config,
            state: RwLock::new(None),
            fetch_lock: Mutex::new(()),
        }
    }

    /// Default provider resolution config matching the spec's worked example
    /// for "one provider" (Codex/OpenAI-family model IDs).
    #[must_use]
    pub fn default_provider_config() -> HashMap<String, ProviderResolutionConfig> {
        let mut map = HashMap::new();
        map.insert(
            "codex".to_owned(),
            ProviderResolutionConfig {
                prefixes: vec![
                    "openai/".to_owned(),
                    "azure/".to_owned(),
                    "openrouter/openai/".to_owned(),
                    "github_copilot/".to_owned(),
                ],
                aliases: HashMap::new(),
            },
        );
        map.insert("claude".to_owned(), ProviderResolutionConfig::default());
        map
    }

    /// Ensure the cached catalog is usable, fetching or refetching as needed.
    ///
    /// Within TTL: no network call. Past TTL: attempt a single-flighted
    /// refetch; on failure within the stale window, leave the existing
    /// value in place (callers observe this via `stale: true` quotes); past
    /// the stale window, returns [`CoreError::PricingCacheTooOld`].
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::PricingFetchFailed`] on the very first fetch
    /// failing, or [`CoreError::PricingCacheTooOld`] once a stale cache
    /// exceeds `stale_max_age`.
    #[tracing::instrument(skip(self))]
    pub async fn ensure_fresh(&self) -> Result<(), CoreError> {
        let now = Utc::now();
        {
            let guard = self.state.read().await;
            if let Some(state) = guard.as_ref() {
                let age = now.signed_duration_since(state.fetched_at);
                if age < chrono::Duration::from_std(self.ttl).unwrap_or_default() {
                    return Ok(());
                }
            }
        }

        // Single-flight: only one concurrent caller performs the network call.
        let _fetch_guard = self.fetch_lock.lock().await;

        // Re-check after acquiring the lock: another caller may have refreshed.
        let now = Utc::now();
        {
            let guard = self.state.read().await;
            if let Some(state) = guard.as_ref() {
                let age = now.signed_duration_since(state.fetched_at);
                if age < chrono::Duration::from_std(self.ttl).unwrap_or_default() {
                    return Ok(());
                }
            }
        }

        match self.fetch().await {
            Ok(rows) => {
                *self.state.write().await = Some(CatalogState { rows, fetched_at: now });
                Ok(())
            }
            Err(err) => {
                let guard = self.state.read().await;
                match guard.as_ref() {
                    Some(state) => {
                        let age = now.signed_duration_since(state.fetched_at);
                        if age <= chrono::Duration::from_std(self.stale_max_age).unwrap_or_default() {
                            tracing::warn!(error = %err, "pricing refetch failed, serving stale cache");
                            Ok(())
                        } else {
                            tracing::warn!(error = %err, "pricing cache exceeded stale-serviceable window");
                            Err(CoreError::PricingCacheTooOld)
                        }
                    }
                    None => Err(err),
                }
            }
        }
    }

    async fn fetch(&self) -> Result<HashMap<String, CatalogRow>, CoreError> {
        let response = self.http.get(&self.url).send().await.map_err(|e| {
            CoreError::PricingFetchFailed {
                reason: format!("request failed: {e}"),
            }
        })?;

        if !response.status().is_success() {
            return Err(CoreError::PricingFetchFailed {
                reason: format!("catalog endpoint returned {}", response.status()),
            });
        }

        let raw: HashMap<String, serde_json::Value> = response.json().await.map_err(|e| {
            CoreError::PricingFetchFailed {
                reason: format!("malformed catalog document: {e}"),
            }
        })?;

        let mut rows = HashMap::with_capacity(raw.len());
        for (model_id, value) in raw {
            if let Ok(row) = serde_json::from_value::<CatalogRow>(value) {
                rows.insert(model_id, row);
            }
        }
        Ok(rows)
    }

    fn is_stale(&self, fetched_at: DateTime<Utc>) -> bool {
        let age = Utc::now().signed_duration_since(fetched_at);
        age >= chrono::Duration::from_std(self.ttl).unwrap_or_default()
    }

    /// Resolve a price quote for `(provider_id, model_id)` per the
    /// exact/prefix/alias/fallback order.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::PricingNotConfigured`]-adjacent errors are the
    /// caller's responsibility (the Cost Engine checks that first); this
    /// returns [`CoreError::ModelMappingMissing`] if no catalog entry
    /// matches at all, or [`CoreError::ModelPriceMissing`] if a matching
    /// entry exists but carries no usable price even after fallback.
    pub async fn resolve(&self, provider_id: &str, model_id: &str) -> Result<ModelPriceQuote, CoreError> {
        self.ensure_fresh().await?;

        let guard = self.state.read().await;
        let Some(state) = guard.as_ref() else {
            return Err(CoreError::ModelMappingMissing {
                model_id: model_id.to_owned(),
            });
        };
        let stale = self.is_stale(state.fetched_at);
        let source_label = if stale {
            format!("{} (stale-cache)", self.source_label)
        } else {
            self.source_label.clone()
        };

        let config = self.provider_config.get(provider_id).cloned().unwrap_or_default();
        let mut found_unpriced_id: Option<String> = None;

        // 1. Exact.
        if let Some(row) = state.rows.get(model_id) {
            if row.has_price() {
                return Ok(quote(model_id, model_id, ResolutionStrategy::Exact, row, &source_label, state.fetched_at, stale));
            }
            found_unpriced_id = Some(model_id.to_owned());
        }

        // 2. Prefix.
        for prefix in &config.prefixes {
            let candidate_key = format!("{prefix}{model_id}");
            if let Some(row) = state.rows.get(&candidate_key) {
                if row.has_price() {
                    return Ok(quote(model_id, &candidate_key, ResolutionStrategy::Prefix, row, &source_label, state.fetched_at, stale));
                }
                found_unpriced_id.get_or_insert(candidate_key);
            }
        }

        // 3. Alias.
        if let Some(canonical) = config.aliases.get(model_id) {
            if let Some(row) = state.rows.get(canonical) {
                if row.has_price() {
                    return Ok(quote(model_id, canonical, ResolutionStrategy::Alias, row, &source_label, state.fetched_at, stale));
                }
                found_unpriced_id.get_or_insert_with(|| canonical.clone());
            }
            for prefix in &config.prefixes {
                let candidate_key = format!("{prefix}{canonical}");
                if let Some(row) = state.rows.get(&candidate_key) {
                    if row.has_price() {
                        return Ok(quote(model_id, &candidate_key, ResolutionStrategy::Alias, row, &source_label, state.fetched_at, stale));
                    }
                    found_unpriced_id.get_or_insert(candidate_key);
                }
            }
        }

        // 4. Version fallback.
        if let Some(target) = model_id::parse_version_skeleton(model_id) {
            let target_prefix = config
                .prefixes
                .iter()
                .find(|p| model_id.starts_with(p.as_str()))
                .map(String::as_str);

            let candidates: Vec<FallbackCandidate<'_>> = state
                .rows
                .iter()
                .filter_map(|(key, row)| {
                    if !row.has_price() {
                        return None;
                    }
                    let parsed = model_id::parse_version_skeleton(key)?;
                    if parsed.skeleton != target.skeleton {
                        return None;
                    }
                    let matched_prefix = config.prefixes.iter().find(|p| key.starts_with(p.as_str())).map(String::as_str);
                    Some(FallbackCandidate {
                        catalog_key: key.as_str(),
                        version: parsed.version,
                        matched_prefix,
                    })
                })
                .collect();

            if let Some(best) = model_id::select_best_fallback(&candidates, &target.version, target_prefix) {
                let row = &state.rows[best.catalog_key];
                return Ok(quote(
                    model_id,
                    best.catalog_key,
                    ResolutionStrategy::Fallback,
                    row,
                    &source_label,
                    state.fetched_at,
                    stale,
                ));
            }
        }

        match found_unpriced_id {
            Some(id) => Err(CoreError::ModelPriceMissing { model_id: id }),
            None => Err(CoreError::ModelMappingMissing {
                model_id: model_id.to_owned(),
            }),
        }
    }
}

fn quote(
    model_id: &str,
    resolved: &str,
    strategy: ResolutionStrategy,
    row: &CatalogRow,
    source_label: &str,
    updated_at: DateTime<Utc>,
    stale: bool,
) -> ModelPriceQuote {
    ModelPriceQuote {
        model_id: model_id.to_owned(),
        resolved_model_id: resolved.to_owned(),
        strategy,
        input_cost_per_token: row.input_cost_per_token,
        output_cost_per_token: row.output_cost_per_token,
        cache_read_input_cost_per_token: row.cache_read_input_token_cost,
        cache_creation_input_cost_per_token: row.cache_creation_input_token_cost,
        has_price: row.has_price(),
        source_label: source_label.to_owned(),
        updated_at,
        stale,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn row(input: f64, output: f64) -> serde_json::Value {
        serde_json::json!({"input_cost_per_token": input, "output_cost_per_token": output})
    }

    async fn catalog_with_server(body: serde_json::Value, ttl_ms: u64, stale_ms: u64) -> (PricingCatalog, MockServer) {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .mount(&server)
            .await;
        let catalog = PricingCatalog::new(
            server.uri(),
            StdDuration::from_millis(ttl_ms),
            StdDuration::from_millis(stale_ms),
            PricingCatalog::default_provider_config(),
        );
        (catalog, server)
    }

    #[tokio::test]
    async fn s3_exact_resolution() {
        let (catalog, _server) = catalog_with_server(
            serde_json::json!({"gpt-5.3-codex": row(1e-6, 1e-5)}),
            60_000,
            60_000,
        )
        .await;
        let quote = catalog.resolve("codex", "gpt-5.3-codex").await.unwrap();
        assert_eq!(quote.strategy, ResolutionStrategy::Exact);
        assert!(quote.has_price);
    }

    #[tokio::test]
    async fn s4_version_fallback() {
        let (catalog, _server) = catalog_with_server(
            serde_json::json!({
                "gpt-5.3-codex": {},
                "gpt-5.2-codex": row(1e-6, 1e-5),
            }),
            60_000,
            60_000,
        )
        .await;
        let quote = catalog.resolve("codex", "gpt-5.3-codex").await.unwrap();
        assert_eq!(quote.strategy, ResolutionStrategy::Fallback);
        assert_eq!(quote.resolved_model_id, "gpt-5.2-codex");
        assert!(quote.has_price);
    }

    #[tokio::test]
    async fn unknown_model_with_no_catalog_entry_at_all() {
        let (catalog, _server) = catalog_with_server(serde_json::json!({}), 60_000, 60_000).await;
        let err = catalog.resolve("codex", "totally-unknown").await.unwrap_err();
        assert!(matches!(err, CoreError::ModelMappingMissing { .. }));
    }

    #[tokio::test]
    async fn s5_stale_cache_then_too_old() {
        let server = MockServer::start().await;
        let hits = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let hits_clone = hits.clone();
        Mock::given(method("GET"))
            .respond_with(move |_: &wiremock::Request| {
                let n = hits_clone.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                if n == 0 {
                    ResponseTemplate::new(200).set_body_json(serde_json::json!({"m": row(1e-6, 1e-5)}))
                } else {
                    ResponseTemplate::new(500)
                }
            })
            .mount(&server)
            .await;

        let catalog = PricingCatalog::new(
            server.uri(),
            StdDuration::from_millis(10),
            StdDuration::from_millis(1_000),
            PricingCatalog::default_provider_config(),
        );

        let first = catalog.resolve("codex", "m").await.unwrap();
        assert!(!first.stale);

        tokio::time::sleep(StdDuration::from_millis(20)).await;
        let second = catalog.resolve("codex", "m").await.unwrap();
        assert!(second.stale);
        assert!(second.source_label.contains("stale-cache"));
    }
}
