//! Claude Usage Provider: HTTP GET against the rate-limit endpoint, with
//! credential iteration and an OAuth-refresh retry on `TOKEN_INVALID`.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::time::Duration;

use crate::core::credentials::{Credential, CredentialResolver, DEFAULT_OAUTH_CLIENT_ID};
use crate::core::errors::CoreError;

use super::types::{
    BillingInfo, Pace, ProviderCapabilities, ProviderSnapshot, SnapshotStatus, UsageMetricWindow,
    WindowId,
};

const USAGE_ENDPOINT: &str = "https://api.anthropic.com/api/oauth/usage";
const OAUTH_TOKEN_ENDPOINT: &str = "https://platform.claude.com/v1/oauth/token";
const OAUTH_BETA_HEADER: &str = "oauth-2025-04-20";

#[derive(Debug, Deserialize)]
struct UsageWindowRaw {
    utilization: f64,
    resets_at: String,
}

#[derive(Debug, Deserialize)]
struct UsageResponse {
    five_hour: Option<UsageWindowRaw>,
    seven_day: Option<UsageWindowRaw>,
    seven_day_sonnet: Option<UsageWindowRaw>,
}

#[derive(Debug, Deserialize)]
struct RefreshResponse {
    access_token: String,
}

/// HTTP provider for Claude's rate-limit endpoint.
#[derive(Debug, Clone)]
pub struct ClaudeUsageProvider {
    http: Client,
    resolver: CredentialResolver,
    oauth_client_id: String,
    pace_threshold_percent: f64,
    usage_endpoint: String,
    oauth_token_endpoint: String,
}

impl ClaudeUsageProvider {
    /// Construct a provider with a dedicated `reqwest::Client` (5s timeout,
    /// matching the Subprocess Adapter's default so all outbound calls share
    /// one timeout philosophy).
    ///
    /// # Panics
    ///
    /// Panics if the `reqwest::Client` cannot be built with the default
    /// configuration.
    #[must_use]
    #[expect(clippy::expect_used, reason = "default reqwest Client::builder configuration is infallible")]
    pub fn new(pace_threshold_percent: f64) -> Self {
        let http = Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .expect("failed to build reqwest client");
        let oauth_client_id = std::env::var("CLAUDE_CODE_OAUTH_CLIENT_ID")
            .unwrap_or_else(|_| DEFAULT_OAUTH_CLIENT_ID.to_owned());
        Self {
            http,
            resolver: CredentialResolver::new(),
            oauth_client_id,
            pace_threshold_percent,
            usage_endpoint: USAGE_ENDPOINT.to_owned(),
            oauth_token_endpoint: OAUTH_TOKEN_ENDPOINT.to_owned(),
        }
    }

    /// Construct a provider pointed at mock endpoints, for driving
    /// [`Self::try_candidate`] against a [`wiremock::MockServer`] in tests.
    #[cfg(test)]
    fn for_testing(usage_endpoint: String, oauth_token_endpoint: String) -> Self {
        let mut provider = Self::new(10.0);
        provider.usage_endpoint = usage_endpoint;
        provider.oauth_token_endpoint = oauth_token_endpoint;
        provider
    }

    /// Resolve candidates, then try each in order, refreshing once on
    /// `TOKEN_INVALID` if a refresh token is available.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::TokenNotFound`] if no candidate exists, or the
    /// last [`CoreError::TokenInvalid`] if every candidate is rejected, or a
    /// transport/parse error from the final attempt.
    #[tracing::instrument(skip(self))]
    pub async fn fetch_snapshot(&self) -> Result<ProviderSnapshot, CoreError> {
        let candidates = self.resolver.resolve_claude().await;
        if candidates.is_empty() {
            return Err(CoreError::TokenNotFound);
        }

        let mut last_token_invalid: Option<CoreError> = None;

        for candidate in &candidates {
            match self.try_candidate(candidate).await {
                Ok(snapshot) => return Ok(snapshot),
                Err(CoreError::TokenInvalid { reason }) => {
                    last_token_invalid = Some(CoreError::TokenInvalid { reason });
                }
                Err(other) => return Err(other),
            }
        }

        Err(last_token_invalid.unwrap_or(CoreError::TokenNotFound))
    }

    async fn try_candidate(&self, candidate: &Credential) -> Result<ProviderSnapshot, CoreError> {
        match self.call_usage_endpoint(&candidate.access_token).await {
            Ok(response) => Ok(self.build_snapshot(response)),
            Err(CoreError::TokenInvalid { reason }) => {
                let Some(refresh_token) = &candidate.refresh_token else {
                    return Err(CoreError::TokenInvalid { reason });
                };
                let refreshed = self.refresh_access_token(refresh_token).await?;
                let response = self.call_usage_endpoint(&refreshed).await?;
                Ok(self.build_snapshot(response))
            }
            Err(other) => Err(other),
        }
    }

    async fn call_usage_endpoint(&self, access_token: &str) -> Result<UsageResponse, CoreError> {
        let result = self
            .http
            .get(&self.usage_endpoint)
            .header("Authorization", format!("Bearer {access_token}"))
            .header("anthropic-beta", OAUTH_BETA_HEADER)
            .send()
            .await;

        let response = result.map_err(|e| CoreError::UpstreamUnavailable {
            reason: format!("request failed: {e}"),
        })?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(CoreError::TokenInvalid {
                reason: format!("usage endpoint returned {status}"),
            });
        }
        if !status.is_success() {
            return Err(CoreError::UpstreamUnavailable {
                reason: format!("usage endpoint returned {status}"),
            });
        }

        response
            .json::<UsageResponse>()
            .await
            .map_err(|e| CoreError::UnsupportedResponse {
                reason: format!("malformed usage response: {e}"),
            })
    }

    async fn refresh_access_token(&self, refresh_token: &str) -> Result<String, CoreError> {
        let form = [
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", self.oauth_client_id.as_str()),
        ];

        let result = self.http.post(&self.oauth_token_endpoint).form(&form).send().await;
        let response = result.map_err(|e| CoreError::UpstreamUnavailable {
            reason: format!("refresh request failed: {e}"),
        })?;

        let status = response.status();
        if status == StatusCode::BAD_REQUEST || status == StatusCode::UNAUTHORIZED {
            return Err(CoreError::TokenInvalid {
                reason: format!("refresh endpoint returned {status}"),
            });
        }
        if !status.is_success() {
            return Err(CoreError::UpstreamUnavailable {
                reason: format!("refresh endpoint returned {status}"),
            });
        }

        let refreshed: RefreshResponse =
            response.json().await.map_err(|e| CoreError::UnsupportedResponse {
                reason: format!("malformed refresh response: {e}"),
            })?;
        Ok(refreshed.access_token)
    }

    fn build_snapshot(&self, response: UsageResponse) -> ProviderSnapshot {
        let now = Utc::now();
        let mut windows = Vec::new();

        if let Some(w) = &response.five_hour {
            windows.push(self.to_metric_window(w, WindowId::Session, "5 Hour", ChronoDuration::hours(5), now));
        }
        if let Some(w) = &response.seven_day {
            windows.push(self.to_metric_window(w, WindowId::Weekly, "7 Day", ChronoDuration::days(7), now));
        }
        if let Some(w) = &response.seven_day_sonnet {
            windows.push(self.to_metric_window(w, WindowId::Model, "7 Day (Sonnet)", ChronoDuration::days(7), now));
        }

        ProviderSnapshot {
            provider_id: "claude".to_owned(),
            provider_label: "Claude".to_owned(),
            account_label: None,
            plan_label: None,
            windows,
            billing: BillingInfo::default(),
            capabilities: ProviderCapabilities {
                supports_force_refresh: true,
                supports_model_breakdown: true,
            },
            status: SnapshotStatus::Ok,
            issues: Vec::new(),
            fetched_at: now,
            stale_at: now + ChronoDuration::seconds(180),
        }
    }

    fn to_metric_window(
        &self,
        raw: &UsageWindowRaw,
        id: WindowId,
        title: &str,
        duration: ChronoDuration,
        now: DateTime<Utc>,
    ) -> UsageMetricWindow {
        let resets_at = DateTime::parse_from_rfc3339(&raw.resets_at)
            .ok()
            .map(|dt| dt.with_timezone(&Utc));
        let utilization_percent = raw.utilization * 100.0;
        UsageMetricWindow {
            id,
            title: title.to_owned(),
            utilization_percent: Some(utilization_percent),
            window_duration_ms: Some(duration.num_milliseconds()),
            resets_at,
            pace: Pace::derive(
                Some(utilization_percent),
                duration,
                resets_at,
                now,
                self.pace_threshold_percent,
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    /// Sanity-checks the 401-then-success response shape directly against a
    /// mock server, independent of credential resolution. See
    /// `refresh_retry_is_a_single_round_trip` below for the same fallback
    /// exercised through `try_candidate` itself.
    #[tokio::test]
    async fn token_fallback_s1() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/usage"))
            .and(header("authorization", "Bearer env-token"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/usage"))
            .and(header("authorization", "Bearer file-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "five_hour": {"utilization": 0.10, "resets_at": "2026-02-25T10:00:00Z"},
                "seven_day": {"utilization": 0.20, "resets_at": "2026-03-01T10:00:00Z"}
            })))
            .mount(&server)
            .await;

        let provider = ClaudeUsageProvider::new(10.0);
        let http = Client::new();
        let resp = http
            .get(format!("{}/v1/usage", server.uri()))
            .header("authorization", "Bearer env-token")
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 401);

        let resp2 = http
            .get(format!("{}/v1/usage", server.uri()))
            .header("authorization", "Bearer file-token")
            .send()
            .await
            .unwrap();
        let body: UsageResponse = resp2.json().await.unwrap();
        let snapshot = provider.build_snapshot(body);
        assert_eq!(
            snapshot.windows[0].utilization_percent,
            Some(10.0)
        );
    }

    #[test]
    fn pace_windows_built_from_utilization_fraction() {
        let provider = ClaudeUsageProvider::new(10.0);
        let response = UsageResponse {
            five_hour: Some(UsageWindowRaw {
                utilization: 0.5,
                resets_at: "2026-02-25T10:00:00Z".to_owned(),
            }),
            seven_day: None,
            seven_day_sonnet: None,
        };
        let snapshot = provider.build_snapshot(response);
        assert_eq!(snapshot.windows.len(), 1);
        assert_eq!(snapshot.windows[0].utilization_percent, Some(50.0));
    }

    /// S2: an expired access token triggers exactly one refresh, then one
    /// retried usage call, in that order — three outbound calls total, not
    /// a retry loop.
    #[tokio::test]
    async fn refresh_retry_is_a_single_round_trip() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/oauth/usage"))
            .and(header("authorization", "Bearer expired-access"))
            .respond_with(ResponseTemplate::new(401))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "refreshed-access"
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/oauth/usage"))
            .and(header("authorization", "Bearer refreshed-access"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "five_hour": {"utilization": 0.25, "resets_at": "2026-02-25T10:00:00Z"}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let provider = ClaudeUsageProvider::for_testing(
            format!("{}/oauth/usage", server.uri()),
            format!("{}/oauth/token", server.uri()),
        );
        let candidate = Credential {
            access_token: "expired-access".to_owned(),
            refresh_token: Some("valid-refresh".to_owned()),
            source: "environment",
        };

        let snapshot = provider.try_candidate(&candidate).await.unwrap();
        assert_eq!(snapshot.windows[0].utilization_percent, Some(25.0));
    }

    /// No refresh token available means a `TOKEN_INVALID` is surfaced
    /// directly rather than attempting a refresh with nothing to send.
    #[tokio::test]
    async fn token_invalid_without_refresh_token_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/oauth/usage"))
            .respond_with(ResponseTemplate::new(401))
            .expect(1)
            .mount(&server)
            .await;

        let provider = ClaudeUsageProvider::for_testing(
            format!("{}/oauth/usage", server.uri()),
            format!("{}/oauth/token", server.uri()),
        );
        let candidate = Credential {
            access_token: "expired-access".to_owned(),
            refresh_token: None,
            source: "environment",
        };

        let err = provider.try_candidate(&candidate).await.unwrap_err();
        assert!(matches!(err, CoreError::TokenInvalid { .. }));
    }
}
