//! Shared DTOs produced by both usage providers: windows, pace, and snapshots.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use typeshare::typeshare;

use crate::core::errors::Severity;

/// Pace status: a comparison between elapsed window time and observed
/// utilization, projecting end-of-window exhaustion.
#[typeshare]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PaceStatus {
    /// Projected utilization stays comfortably under 100% (margin ≥ threshold).
    Margin,
    /// Projected utilization is within the threshold band of 100%.
    Balanced,
    /// Projected utilization exceeds 100% by at least the threshold.
    Over,
    /// Utilization, elapsed time, or the reset timestamp was invalid.
    Unknown,
}

/// Derived pace fields for a single usage window.
#[typeshare]
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pace {
    /// Percent of the window elapsed, 0..=100.
    pub elapsed_percent: Option<f64>,
    /// Utilization projected to end-of-window if the current rate continues.
    pub projected_end_utilization_percent: Option<f64>,
    /// `100 - projected_end_utilization_percent`.
    pub pace_margin_percent: Option<f64>,
    /// Classification of `pace_margin_percent` against the configured threshold.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<PaceStatus>,
}

impl Pace {
    /// Derive pace fields per the spec's formula.
    ///
    /// `elapsed = clamp(D - max(0, R - t), 0, D)`; undefined when
    /// `elapsedPercent <= 0`. `status` is `Unknown` whenever `utilization` is
    /// `None`, `elapsedPercent <= 0`, or the reset timestamp is missing.
    #[must_use]
    pub fn derive(
        utilization_percent: Option<f64>,
        window_duration: chrono::Duration,
        resets_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
        threshold_percent: f64,
    ) -> Self {
        let Some(resets_at) = resets_at else {
            return Self {
                status: Some(PaceStatus::Unknown),
                ..Self::default()
            };
        };
        let duration_ms = window_duration.num_milliseconds() as f64;
        if duration_ms <= 0.0 {
            return Self {
                status: Some(PaceStatus::Unknown),
                ..Self::default()
            };
        }

        let remaining_ms = (resets_at - now).num_milliseconds().max(0) as f64;
        let elapsed_ms = (duration_ms - remaining_ms).clamp(0.0, duration_ms);
        let elapsed_percent = 100.0 * elapsed_ms / duration_ms;

        let Some(utilization_percent) = utilization_percent else {
            return Self {
                elapsed_percent: Some(elapsed_percent),
                status: Some(PaceStatus::Unknown),
                ..Self::default()
            };
        };

        if elapsed_percent <= 0.0 {
            return Self {
                elapsed_percent: Some(elapsed_percent),
                status: Some(PaceStatus::Unknown),
                ..Self::default()
            };
        }

        let projected = 100.0 * utilization_percent / elapsed_percent;
        let margin = 100.0 - projected;
        let status = if margin >= threshold_percent {
            PaceStatus::Margin
        } else if margin <= -threshold_percent {
            PaceStatus::Over
        } else {
            PaceStatus::Balanced
        };

        Self {
            elapsed_percent: Some(elapsed_percent),
            projected_end_utilization_percent: Some(projected),
            pace_margin_percent: Some(margin),
            status: Some(status),
        }
    }
}

/// A single rate-limit or budget window (session/weekly/model).
#[typeshare]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageMetricWindow {
    /// Window kind.
    pub id: WindowId,
    /// Human-readable label for display.
    pub title: String,
    /// Utilization, 0..100 (may exceed 100 if the upstream reports overage).
    pub utilization_percent: Option<f64>,
    /// Window duration in milliseconds.
    pub window_duration_ms: Option<i64>,
    /// ISO-8601 reset timestamp.
    pub resets_at: Option<DateTime<Utc>>,
    /// Derived pace fields.
    pub pace: Pace,
}

/// Discriminates which window a [`UsageMetricWindow`] represents.
#[typeshare]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum WindowId {
    /// A short rolling session window (Codex: 300 minutes).
    Session,
    /// A weekly window (Codex: 10080 minutes).
    Weekly,
    /// A per-model window (Claude's `seven_day_sonnet`, etc.).
    Model,
}

/// Status of a provider snapshot as a whole.
#[typeshare]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SnapshotStatus {
    /// Freshly fetched, no issues.
    Ok,
    /// Serving a prior value during a backoff window after a recoverable failure.
    Degraded,
    /// No valid value is available.
    Error,
}

/// A non-fatal or fatal issue attached to a snapshot.
#[typeshare]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotIssue {
    /// Machine-readable error code from the closed taxonomy.
    pub code: String,
    /// Human-readable diagnostic message.
    pub message: String,
    /// `warning` or `error`.
    pub severity: Severity,
}

/// Billing/plan metadata surfaced alongside usage windows.
#[typeshare]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BillingInfo {
    /// Plan display name, if known.
    pub plan_label: Option<String>,
}

/// Capability flags a transport layer can use to hide unsupported controls.
#[typeshare]
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderCapabilities {
    /// Whether this provider supports forced refresh.
    pub supports_force_refresh: bool,
    /// Whether this provider exposes per-model windows.
    pub supports_model_breakdown: bool,
}

/// The full per-provider usage snapshot returned by `getProviderSnapshot`.
#[typeshare]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderSnapshot {
    /// Stable provider identifier (`"codex"`, `"claude"`).
    pub provider_id: String,
    /// Human-readable provider name.
    pub provider_label: String,
    /// Account display label, if resolvable.
    pub account_label: Option<String>,
    /// Plan display label, if resolvable.
    pub plan_label: Option<String>,
    /// Rate-limit/budget windows.
    pub windows: Vec<UsageMetricWindow>,
    /// Billing metadata.
    pub billing: BillingInfo,
    /// Capability flags.
    pub capabilities: ProviderCapabilities,
    /// Overall snapshot status.
    pub status: SnapshotStatus,
    /// De-duplicated issues accumulated across fetch attempts.
    pub issues: Vec<SnapshotIssue>,
    /// When this snapshot was produced.
    pub fetched_at: DateTime<Utc>,
    /// When this snapshot should be considered stale and refetched.
    pub stale_at: DateTime<Utc>,
}

impl ProviderSnapshot {
    /// `true` iff `now >= stale_at`, per the staleness rule in the data model.
    #[must_use]
    pub fn is_stale(&self, now: DateTime<Utc>) -> bool {
        now >= self.stale_at
    }
}

/// Normalizes a reset timestamp that may be expressed in seconds or
/// milliseconds since epoch, using the `> 10^12` heuristic: values larger
/// than that are assumed to already be milliseconds.
///
/// Per the open question in the design notes, this heuristic is load-bearing
/// and must not be replaced by per-sample guessing.
#[must_use]
pub fn normalize_epoch_timestamp(raw: i64) -> DateTime<Utc> {
    let millis = if raw > 1_000_000_000_000 { raw } else { raw * 1000 };
    DateTime::from_timestamp_millis(millis).unwrap_or_else(Utc::now)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    #[test]
    fn pace_status_unknown_when_no_reset() {
        let pace = Pace::derive(Some(50.0), ChronoDuration::minutes(300), None, Utc::now(), 10.0);
        assert_eq!(pace.status, Some(PaceStatus::Unknown));
    }

    #[test]
    fn pace_status_unknown_when_elapsed_nonpositive() {
        let now = Utc::now();
        let resets_at = now + ChronoDuration::minutes(300);
        let pace = Pace::derive(Some(50.0), ChronoDuration::minutes(300), Some(resets_at), now, 10.0);
        assert_eq!(pace.elapsed_percent, Some(0.0));
        assert_eq!(pace.status, Some(PaceStatus::Unknown));
    }

    #[test]
    fn pace_margin_when_projection_well_under_limit() {
        let now = Utc::now();
        let resets_at = now + ChronoDuration::minutes(150);
        // Half the window elapsed (150 of 300 min), 10% utilized => projected 20%.
        let pace = Pace::derive(Some(10.0), ChronoDuration::minutes(300), Some(resets_at), now, 10.0);
        assert_eq!(pace.elapsed_percent, Some(50.0));
        assert!((pace.projected_end_utilization_percent.unwrap() - 20.0).abs() < 1e-9);
        assert_eq!(pace.status, Some(PaceStatus::Margin));
    }

    #[test]
    fn pace_over_when_projection_exceeds_limit() {
        let now = Utc::now();
        let resets_at = now + ChronoDuration::minutes(150);
        // Half elapsed, 80% utilized => projected 160%, margin -60.
        let pace = Pace::derive(Some(80.0), ChronoDuration::minutes(300), Some(resets_at), now, 10.0);
        assert_eq!(pace.status, Some(PaceStatus::Over));
    }

    #[test]
    fn epoch_heuristic_distinguishes_seconds_from_millis() {
        let seconds = 1_800_000_000_i64;
        let millis = 1_800_000_000_000_i64;
        assert_eq!(
            normalize_epoch_timestamp(seconds),
            normalize_epoch_timestamp(millis)
        );
    }

    #[test]
    fn elapsed_percent_is_always_within_bounds() {
        let now = Utc::now();
        for minutes in [-100, 0, 50, 300, 1000] {
            let resets_at = now + ChronoDuration::minutes(minutes);
            let pace = Pace::derive(Some(10.0), ChronoDuration::minutes(300), Some(resets_at), now, 10.0);
            if let Some(p) = pace.elapsed_percent {
                assert!((0.0..=100.0).contains(&p));
            }
        }
    }
}
