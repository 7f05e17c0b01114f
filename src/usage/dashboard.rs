//! Usage Dashboard: a two-tier (core snapshot + cost enrichment) per-provider
//! cache with failure backoff and degraded-mode fall-through.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration as StdDuration;
use tokio::sync::Mutex;

use crate::core::errors::{CoreError, Severity};
use crate::pricing::PricingCatalog;
use crate::providers::{BillingInfo, ProviderCapabilities, ProviderSnapshot, SnapshotIssue, SnapshotStatus};

use super::cost_engine::CostEngine;
use super::token_source::{TokenSource, TranscriptShape};
use super::types::ProviderCostResult;

/// Fetches a fresh [`ProviderSnapshot`]; implemented by each usage provider.
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    /// Perform the upstream call and build a fresh snapshot.
    async fn fetch(&self) -> Result<ProviderSnapshot, CoreError>;
}

/// Per-provider cost enrichment wiring: which token source/shape feeds the
/// shared pricing catalog for this provider.
pub struct CostWiring {
    /// Where this provider's transcripts live.
    pub token_source: Arc<TokenSource>,
    /// Which JSONL shape this provider's transcripts use.
    pub shape: TranscriptShape,
}

/// Everything the dashboard needs to manage one provider's two tiers.
pub struct ProviderEntry {
    /// Stable provider identifier.
    pub provider_id: String,
    /// Human-readable label, used when synthesizing an empty error snapshot.
    pub provider_label: String,
    /// Core snapshot fetcher.
    pub source: Arc<dyn SnapshotSource>,
    /// Cost enrichment wiring, if this provider supports cost attribution.
    pub cost: Option<CostWiring>,
}

struct TieredCache<T> {
    value: Option<T>,
    expires_at: Option<DateTime<Utc>>,
    backoff_until: Option<DateTime<Utc>>,
    failure_count: u32,
    issues: Vec<SnapshotIssue>,
}

impl<T> Default for TieredCache<T> {
    fn default() -> Self {
        Self {
            value: None,
            expires_at: None,
            backoff_until: None,
            failure_count: 0,
            issues: Vec::new(),
        }
    }
}

impl<T> TieredCache<T> {
    fn push_issue(&mut self, issue: SnapshotIssue) {
        if !self.issues.iter().any(|i| i.code == issue.code && i.message == issue.message) {
            self.issues.push(issue);
        }
    }
}

#[derive(Default)]
struct DashboardState {
    core: TieredCache<ProviderSnapshot>,
    cost: TieredCache<ProviderCostResult>,
}

fn issue_for(err: &CoreError) -> SnapshotIssue {
    SnapshotIssue {
        code: err.code().to_owned(),
        message: err.to_string(),
        severity: Severity::Warning,
    }
}

/// One entry in `getDashboard`'s response: a provider's snapshot, optionally
/// enriched with a cost result.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardProviderView {
    /// The (possibly degraded) provider snapshot.
    pub snapshot: ProviderSnapshot,
    /// The cost enrichment, if this provider supports cost attribution.
    pub cost: Option<ProviderCostResult>,
}

/// The full `getDashboard` response.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardResponse {
    /// Per-provider views.
    pub providers: Vec<DashboardProviderView>,
    /// When this response was assembled.
    pub fetched_at: DateTime<Utc>,
}

/// Two-tier per-provider cache with failure backoff. Each provider's state
/// lives behind its own `Mutex`, keyed in a `DashMap` the way
/// [`crate::core::request_guard::RequestGuard`] keys its per-scope state, so
/// a slow provider only ever blocks reads/writes of its own entry, never the
/// whole dashboard.
pub struct UsageDashboard {
    providers: HashMap<String, ProviderEntry>,
    catalog: Arc<PricingCatalog>,
    pricing_enabled: bool,
    core_ttl: StdDuration,
    cost_ttl: StdDuration,
    backoff: StdDuration,
    states: DashMap<String, Arc<Mutex<DashboardState>>>,
}

impl UsageDashboard {
    /// Construct a dashboard over the given provider entries.
    #[must_use]
    pub fn new(
        providers: Vec<ProviderEntry>,
        catalog: Arc<PricingCatalog>,
        pricing_enabled: bool,
        core_ttl: StdDuration,
        cost_ttl: StdDuration,
        backoff: StdDuration,
    ) -> Self {
        Self {
            providers: providers.into_iter().map(|p| (p.provider_id.clone(), p)).collect(),
            catalog,
            pricing_enabled,
            core_ttl,
            cost_ttl,
            backoff,
            states: DashMap::new(),
        }
    }

    /// Clone out the `Arc` for `provider_id`'s state, creating it on first
    /// use. The `DashMap` shard guard this takes internally is never held
    /// across an `.await`.
    fn state_lock(&self, provider_id: &str) -> Arc<Mutex<DashboardState>> {
        self.states
            .entry(provider_id.to_owned())
            .or_insert_with(|| Arc::new(Mutex::new(DashboardState::default())))
            .clone()
    }

    /// `getDashboard({provider, forceRefresh})`: returns one or all providers.
    pub async fn get_dashboard(&self, provider: Option<&str>, force_refresh: bool) -> DashboardResponse {
        let ids: Vec<String> = match provider {
            Some(id) => vec![id.to_owned()],
            None => self.providers.keys().cloned().collect(),
        };

        let mut providers = Vec::with_capacity(ids.len());
        for id in ids {
            providers.push(self.view_for(&id, force_refresh).await);
        }

        DashboardResponse {
            providers,
            fetched_at: Utc::now(),
        }
    }

    /// `getProviderSnapshot(providerId, {forceRefresh, includeWindows})`:
    /// a single provider's core snapshot, independent of the dashboard's
    /// cost-enriched view. An unknown `provider_id` yields an error snapshot
    /// rather than a panic, the same fallback `getDashboard` uses.
    pub async fn get_snapshot(&self, provider_id: &str, force_refresh: bool, include_windows: bool) -> ProviderSnapshot {
        let Some(entry) = self.providers.get(provider_id) else {
            return empty_error_snapshot(provider_id, provider_id, &CoreError::Internal {
                reason: "unknown provider".to_owned(),
            });
        };

        let mut snapshot = self.refresh_core(entry, force_refresh).await;
        if !include_windows {
            snapshot.windows.clear();
        }
        snapshot
    }

    async fn view_for(&self, provider_id: &str, force_refresh: bool) -> DashboardProviderView {
        let Some(entry) = self.providers.get(provider_id) else {
            return DashboardProviderView {
                snapshot: empty_error_snapshot(provider_id, provider_id, &CoreError::Internal {
                    reason: "unknown provider".to_owned(),
                }),
                cost: None,
            };
        };

        let snapshot = self.refresh_core(entry, force_refresh).await;
        let cost = if let Some(wiring) = &entry.cost {
            Some(self.refresh_cost(entry, wiring, force_refresh).await)
        } else {
            None
        };

        DashboardProviderView { snapshot, cost }
    }

    async fn refresh_core(&self, entry: &ProviderEntry, force_refresh: bool) -> ProviderSnapshot {
        let now = Utc::now();
        let state_lock = self.state_lock(&entry.provider_id);

        let outcome = run_tiered(
            &state_lock,
            |s| &mut s.core,
            self.core_ttl,
            self.backoff,
            force_refresh,
            now,
            || entry.source.fetch(),
        )
        .await;

        match outcome {
            TieredOutcome::Fresh(v) => v,
            TieredOutcome::Degraded(v, err) => {
                let issues = {
                    let mut state = state_lock.lock().await;
                    state.core.push_issue(issue_for(&err));
                    state.core.issues.clone()
                };
                let mut v = v;
                v.status = SnapshotStatus::Degraded;
                v.issues = issues;
                v
            }
            TieredOutcome::Error(err) => {
                let issues = {
                    let mut state = state_lock.lock().await;
                    state.core.push_issue(issue_for(&err));
                    state.core.issues.clone()
                };
                let mut snap = empty_error_snapshot(&entry.provider_id, &entry.provider_label, &err);
                snap.issues = issues;
                snap
            }
        }
    }

    async fn refresh_cost(&self, entry: &ProviderEntry, wiring: &CostWiring, force_refresh: bool) -> ProviderCostResult {
        let now = Utc::now();
        let state_lock = self.state_lock(&entry.provider_id);
        let catalog = &self.catalog;
        let pricing_enabled = self.pricing_enabled;

        let outcome = run_tiered(&state_lock, |s| &mut s.cost, self.cost_ttl, self.backoff, force_refresh, now, || async {
            let engine = CostEngine::new(&wiring.token_source, catalog, pricing_enabled);
            engine.cost_for(&entry.provider_id, wiring.shape).await
        })
        .await;

        match outcome {
            TieredOutcome::Fresh(v) | TieredOutcome::Degraded(v, _) => v,
            TieredOutcome::Error(err) => ProviderCostResult {
                today: super::types::CostBucket::default(),
                last30days: super::types::CostBucket::default(),
                source: super::types::CostSource::Unavailable,
                confidence: None,
                source_label: None,
                updated_at: None,
                reason_code: Some(err.code().to_owned()),
                reason_message: Some(err.to_string()),
                model_breakdown: Vec::new(),
                daily_breakdown: Vec::new(),
            },
        }
    }
}

enum TieredOutcome<T> {
    Fresh(T),
    Degraded(T, CoreError),
    Error(CoreError),
}

enum TieredDecision<T> {
    Use(T),
    UseDegraded(T),
    Backoff,
    Fetch,
}

fn decide_tiered<T: Clone>(cache: &TieredCache<T>, force_refresh: bool, now: DateTime<Utc>) -> TieredDecision<T> {
    let expired = cache.expires_at.is_none_or(|exp| now >= exp);
    let in_backoff = cache.backoff_until.is_some_and(|b| now < b);

    match &cache.value {
        None if in_backoff => TieredDecision::Backoff,
        None => TieredDecision::Fetch,
        Some(_) if force_refresh || (expired && !in_backoff) => TieredDecision::Fetch,
        Some(v) if expired && in_backoff => TieredDecision::UseDegraded(v.clone()),
        Some(v) => TieredDecision::Use(v.clone()),
    }
}

fn commit_success<T>(cache: &mut TieredCache<T>, value: T, now: DateTime<Utc>, ttl: StdDuration) {
    cache.value = Some(value);
    cache.expires_at = Some(now + chrono::Duration::from_std(ttl).unwrap_or_default());
    cache.backoff_until = None;
    cache.failure_count = 0;
    cache.issues.clear();
}

fn commit_failure<T>(cache: &mut TieredCache<T>, now: DateTime<Utc>, backoff: StdDuration) {
    cache.failure_count += 1;
    cache.backoff_until = Some(now + chrono::Duration::from_std(backoff).unwrap_or_default());
    if cache.value.is_none() {
        cache.expires_at = Some(now);
    }
}

/// Decide-then-fetch-then-commit over a single provider's `cache` field,
/// selected from its `DashboardState` by `select`. `state_lock` is only ever
/// held for the synchronous decide and commit steps; `fetch` runs with no
/// lock held at all, so one provider's slow upstream call never blocks
/// another provider's dashboard read.
async fn run_tiered<T, F, Fut>(
    state_lock: &Mutex<DashboardState>,
    select: impl Fn(&mut DashboardState) -> &mut TieredCache<T>,
    ttl: StdDuration,
    backoff: StdDuration,
    force_refresh: bool,
    now: DateTime<Utc>,
    fetch: F,
) -> TieredOutcome<T>
where
    T: Clone,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, CoreError>>,
{
    let decision = {
        let mut state = state_lock.lock().await;
        decide_tiered(select(&mut state), force_refresh, now)
    };

    match decision {
        TieredDecision::Use(v) => TieredOutcome::Fresh(v),
        TieredDecision::UseDegraded(v) => TieredOutcome::Degraded(
            v,
            CoreError::UpstreamUnavailable {
                reason: "serving cached value during backoff window".to_owned(),
            },
        ),
        TieredDecision::Backoff => TieredOutcome::Error(CoreError::UpstreamUnavailable {
            reason: "in backoff window after initial fetch failure".to_owned(),
        }),
        TieredDecision::Fetch => match fetch().await {
            Ok(v) => {
                let mut state = state_lock.lock().await;
                commit_success(select(&mut state), v.clone(), now, ttl);
                TieredOutcome::Fresh(v)
            }
            Err(e) => {
                let mut state = state_lock.lock().await;
                let cache = select(&mut state);
                let stale = cache.value.clone();
                commit_failure(cache, now, backoff);
                match stale {
                    Some(v) => TieredOutcome::Degraded(v, e),
                    None => TieredOutcome::Error(e),
                }
            }
        },
    }
}

fn empty_error_snapshot(provider_id: &str, provider_label: &str, err: &CoreError) -> ProviderSnapshot {
    let now = Utc::now();
    ProviderSnapshot {
        provider_id: provider_id.to_owned(),
        provider_label: provider_label.to_owned(),
        account_label: None,
        plan_label: None,
        windows: Vec::new(),
        billing: BillingInfo::default(),
        capabilities: ProviderCapabilities::default(),
        status: SnapshotStatus::Error,
        issues: vec![issue_for(err)],
        fetched_at: now,
        stale_at: now,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FlakySource {
        calls: AtomicUsize,
        fail_first_n: usize,
    }

    #[async_trait]
    impl SnapshotSource for FlakySource {
        async fn fetch(&self) -> Result<ProviderSnapshot, CoreError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_first_n {
                return Err(CoreError::UpstreamUnavailable { reason: "down".to_owned() });
            }
            let now = Utc::now();
            Ok(ProviderSnapshot {
                provider_id: "codex".to_owned(),
                provider_label: "Codex".to_owned(),
                account_label: None,
                plan_label: None,
                windows: Vec::new(),
                billing: BillingInfo::default(),
                capabilities: ProviderCapabilities::default(),
                status: SnapshotStatus::Ok,
                issues: Vec::new(),
                fetched_at: now,
                stale_at: now + chrono::Duration::seconds(180),
            })
        }
    }

    fn catalog() -> Arc<PricingCatalog> {
        Arc::new(PricingCatalog::new(
            "http://127.0.0.1:1/unused".to_owned(),
            StdDuration::from_secs(60),
            StdDuration::from_secs(60),
            PricingCatalog::default_provider_config(),
        ))
    }

    #[tokio::test]
    async fn first_call_success_is_fresh() {
        let source = Arc::new(FlakySource { calls: AtomicUsize::new(0), fail_first_n: 0 });
        let dashboard = UsageDashboard::new(
            vec![ProviderEntry {
                provider_id: "codex".to_owned(),
                provider_label: "Codex".to_owned(),
                source,
                cost: None,
            }],
            catalog(),
            true,
            StdDuration::from_secs(180),
            StdDuration::from_secs(180),
            StdDuration::from_secs(30),
        );

        let response = dashboard.get_dashboard(Some("codex"), false).await;
        assert_eq!(response.providers[0].snapshot.status, SnapshotStatus::Ok);
    }

    #[tokio::test]
    async fn first_call_failure_is_error_then_degraded_on_retry_after_success() {
        let source = Arc::new(FlakySource { calls: AtomicUsize::new(0), fail_first_n: 1 });
        let dashboard = UsageDashboard::new(
            vec![ProviderEntry {
                provider_id: "codex".to_owned(),
                provider_label: "Codex".to_owned(),
                source,
                cost: None,
            }],
            catalog(),
            true,
            StdDuration::from_secs(180),
            StdDuration::from_secs(180),
            StdDuration::from_millis(10),
        );

        let first = dashboard.get_dashboard(Some("codex"), false).await;
        assert_eq!(first.providers[0].snapshot.status, SnapshotStatus::Error);

        tokio::time::sleep(StdDuration::from_millis(20)).await;
        let second = dashboard.get_dashboard(Some("codex"), false).await;
        assert_eq!(second.providers[0].snapshot.status, SnapshotStatus::Ok);
    }

    #[tokio::test]
    async fn get_snapshot_omits_windows_when_not_requested() {
        let source = Arc::new(FlakySource { calls: AtomicUsize::new(0), fail_first_n: 0 });
        let dashboard = UsageDashboard::new(
            vec![ProviderEntry {
                provider_id: "codex".to_owned(),
                provider_label: "Codex".to_owned(),
                source,
                cost: None,
            }],
            catalog(),
            true,
            StdDuration::from_secs(180),
            StdDuration::from_secs(180),
            StdDuration::from_secs(30),
        );

        let with_windows = dashboard.get_snapshot("codex", false, true).await;
        assert_eq!(with_windows.status, SnapshotStatus::Ok);

        let without_windows = dashboard.get_snapshot("codex", false, false).await;
        assert!(without_windows.windows.is_empty());
    }

    #[tokio::test]
    async fn get_snapshot_unknown_provider_is_an_error_snapshot_not_a_panic() {
        let dashboard = UsageDashboard::new(Vec::new(), catalog(), true, StdDuration::from_secs(180), StdDuration::from_secs(180), StdDuration::from_secs(30));
        let snapshot = dashboard.get_snapshot("nonexistent", false, true).await;
        assert_eq!(snapshot.status, SnapshotStatus::Error);
    }

    struct GatedSource {
        started: Arc<tokio::sync::Notify>,
        proceed: Arc<tokio::sync::Notify>,
    }

    #[async_trait]
    impl SnapshotSource for GatedSource {
        async fn fetch(&self) -> Result<ProviderSnapshot, CoreError> {
            self.started.notify_one();
            self.proceed.notified().await;
            let now = Utc::now();
            Ok(ProviderSnapshot {
                provider_id: "slow".to_owned(),
                provider_label: "Slow".to_owned(),
                account_label: None,
                plan_label: None,
                windows: Vec::new(),
                billing: BillingInfo::default(),
                capabilities: ProviderCapabilities::default(),
                status: SnapshotStatus::Ok,
                issues: Vec::new(),
                fetched_at: now,
                stale_at: now + chrono::Duration::seconds(180),
            })
        }
    }

    /// Spec.md §5: no global lock — one provider's slow fetch must not
    /// block another provider's concurrent dashboard read.
    #[tokio::test]
    async fn slow_provider_fetch_does_not_block_other_providers() {
        let started = Arc::new(tokio::sync::Notify::new());
        let proceed = Arc::new(tokio::sync::Notify::new());
        let slow_source = Arc::new(GatedSource {
            started: started.clone(),
            proceed: proceed.clone(),
        });
        let fast_source = Arc::new(FlakySource { calls: AtomicUsize::new(0), fail_first_n: 0 });

        let dashboard = Arc::new(UsageDashboard::new(
            vec![
                ProviderEntry {
                    provider_id: "slow".to_owned(),
                    provider_label: "Slow".to_owned(),
                    source: slow_source,
                    cost: None,
                },
                ProviderEntry {
                    provider_id: "codex".to_owned(),
                    provider_label: "Codex".to_owned(),
                    source: fast_source,
                    cost: None,
                },
            ],
            catalog(),
            true,
            StdDuration::from_secs(180),
            StdDuration::from_secs(180),
            StdDuration::from_secs(30),
        ));

        let dashboard_for_slow = dashboard.clone();
        let slow_call = tokio::spawn(async move { dashboard_for_slow.get_dashboard(Some("slow"), false).await });

        started.notified().await;

        let fast = tokio::time::timeout(StdDuration::from_millis(200), dashboard.get_dashboard(Some("codex"), false))
            .await
            .expect("fast provider's dashboard read was blocked by the slow provider's in-flight fetch");
        assert_eq!(fast.providers[0].snapshot.status, SnapshotStatus::Ok);

        proceed.notify_one();
        let slow = slow_call.await.unwrap();
        assert_eq!(slow.providers[0].snapshot.status, SnapshotStatus::Ok);
    }
}
