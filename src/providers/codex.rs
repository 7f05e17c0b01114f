//! Codex Usage Provider: speaks a JSON-RPC handshake over stdio to the
//! `codex app-server` subprocess and reads `account/rateLimits/read`.
//!
//! The transport shape (writer task draining an mpsc channel into stdin, a
//! reader task resolving oneshot-keyed pending requests from stdout lines) is
//! the same shape used for the MCP stdio transport elsewhere in the
//! ecosystem, reduced here to the single handshake this provider needs.

use chrono::{Duration as ChronoDuration, Utc};
use serde::Deserialize;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{ChildStdin, ChildStdout, Command};
use tokio::sync::{Mutex, mpsc, oneshot};

use crate::core::errors::CoreError;

use super::types::{
    BillingInfo, Pace, ProviderCapabilities, ProviderSnapshot, SnapshotStatus, UsageMetricWindow,
    WindowId, normalize_epoch_timestamp,
};

const SESSION_WINDOW_MINUTES: i64 = 300;
const WEEKLY_WINDOW_MINUTES: i64 = 10_080;

type Pending = Arc<Mutex<HashMap<u64, oneshot::Sender<Result<Value, String>>>>>;

struct JsonRpcStdioClient {
    writer: mpsc::UnboundedSender<String>,
    pending: Pending,
    next_id: AtomicU64,
}

impl JsonRpcStdioClient {
    async fn spawn(binary: &str) -> Result<(Self, tokio::process::Child), CoreError> {
        let mut command = Command::new(binary);
        command
            .arg("app-server")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = command.spawn().map_err(|e| CoreError::CodexAppServerUnavailable {
            reason: format!("failed to spawn {binary} app-server: {e}"),
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| CoreError::CodexAppServerUnavailable {
                reason: "child stdin unavailable".to_owned(),
            })?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| CoreError::CodexAppServerUnavailable {
                reason: "child stdout unavailable".to_owned(),
            })?;

        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
        let (writer_tx, writer_rx) = mpsc::unbounded_channel();

        tokio::spawn(writer_task(stdin, writer_rx));
        tokio::spawn(reader_task(stdout, pending.clone()));

        Ok((
            Self {
                writer: writer_tx,
                pending,
                next_id: AtomicU64::new(1),
            },
            child,
        ))
    }

    async fn call(&self, method: &str, params: Value, timeout: Duration) -> Result<Value, CoreError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let message = json!({"jsonrpc": "2.0", "id": id, "method": method, "params": params});
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);

        if self
            .writer
            .send(serde_json::to_string(&message).unwrap_or_default())
            .is_err()
        {
            self.pending.lock().await.remove(&id);
            return Err(CoreError::CodexAppServerUnavailable {
                reason: "stdin writer task has exited".to_owned(),
            });
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(Ok(value))) => Ok(value),
            Ok(Ok(Err(message))) => Err(CoreError::UnsupportedResponse { reason: message }),
            Ok(Err(_)) => Err(CoreError::CodexAppServerUnavailable {
                reason: "response channel closed".to_owned(),
            }),
            Err(_) => Err(CoreError::CodexAppServerUnavailable {
                reason: format!("{method} timed out after {timeout:?}"),
            }),
        }
    }

    fn notify(&self, method: &str, params: Value) -> Result<(), CoreError> {
        let message = json!({"jsonrpc": "2.0", "method": method, "params": params});
        self.writer
            .send(serde_json::to_string(&message).unwrap_or_default())
            .map_err(|_| CoreError::CodexAppServerUnavailable {
                reason: "stdin writer task has exited".to_owned(),
            })
    }
}

async fn writer_task(mut stdin: ChildStdin, mut rx: mpsc::UnboundedReceiver<String>) {
    while let Some(line) = rx.recv().await {
        if stdin.write_all(line.as_bytes()).await.is_err() || stdin.write_all(b"\n").await.is_err() {
            break;
        }
        let _ = stdin.flush().await;
    }
    let _ = stdin.shutdown().await;
}

async fn reader_task(stdout: ChildStdout, pending: Pending) {
    let mut lines = BufReader::new(stdout).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if line.trim().is_empty() {
            continue;
        }
        let Ok(value) = serde_json::from_str::<Value>(&line) else {
            tracing::debug!(line = %line, "codex app-server emitted non-JSON line");
            continue;
        };
        let Some(id) = value.get("id").and_then(Value::as_u64) else {
            continue; // notification, nothing pending to resolve
        };
        let Some(tx) = pending.lock().await.remove(&id) else {
            continue;
        };
        if let Some(error) = value.get("error") {
            let message = error
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unknown codex app-server error")
                .to_owned();
            let _ = tx.send(Err(message));
        } else {
            let _ = tx.send(Ok(value.get("result").cloned().unwrap_or(Value::Null)));
        }
    }

    for (_, tx) in pending.lock().await.drain() {
        let _ = tx.send(Err("codex app-server stdout closed".to_owned()));
    }
}

#[derive(Debug, Deserialize)]
struct RateLimitWindowRaw {
    #[serde(alias = "used_percent")]
    used_percent: Option<f64>,
    #[serde(alias = "window_minutes")]
    window_minutes: Option<i64>,
    #[serde(alias = "resets_at")]
    resets_at: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct RateLimitsResponse {
    #[serde(default)]
    rate_limits: Option<RateLimitsPrimarySecondary>,
    #[serde(default, rename = "rateLimitsByLimitId")]
    rate_limits_by_limit_id: Option<HashMap<String, RateLimitsPrimarySecondary>>,
}

#[derive(Debug, Deserialize, Default)]
struct RateLimitsPrimarySecondary {
    primary: Option<RateLimitWindowRaw>,
    secondary: Option<RateLimitWindowRaw>,
}

struct FlatWindow {
    limit_id: String,
    slot: &'static str,
    duration_minutes: i64,
    resets_at: Option<chrono::DateTime<Utc>>,
    used_percent: Option<f64>,
}

fn flatten(limit_id: &str, group: &RateLimitsPrimarySecondary, out: &mut Vec<FlatWindow>) {
    for (slot, raw) in [("primary", &group.primary), ("secondary", &group.secondary)] {
        if let Some(raw) = raw {
            out.push(FlatWindow {
                limit_id: limit_id.to_owned(),
                slot,
                duration_minutes: raw.window_minutes.unwrap_or(0),
                resets_at: raw.resets_at.as_ref().and_then(parse_reset_value),
                used_percent: raw.used_percent,
            });
        }
    }
}

fn parse_reset_value(value: &Value) -> Option<chrono::DateTime<Utc>> {
    if let Some(n) = value.as_i64() {
        return Some(normalize_epoch_timestamp(n));
    }
    if let Some(s) = value.as_str() {
        return chrono::DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|dt| dt.with_timezone(&Utc));
    }
    None
}

/// Speaks JSON-RPC over stdio to `codex app-server`.
#[derive(Debug, Clone)]
pub struct CodexUsageProvider {
    /// Path or name of the `codex` binary to spawn.
    pub binary: String,
    /// Timeout applied to each RPC round-trip, including the handshake.
    pub handshake_timeout: Duration,
    /// Threshold used to classify pace status.
    pub pace_threshold_percent: f64,
}

impl CodexUsageProvider {
    /// Construct a provider invoking `codex` on `PATH`.
    #[must_use]
    pub fn new(pace_threshold_percent: f64) -> Self {
        Self {
            binary: "codex".to_owned(),
            handshake_timeout: Duration::from_secs(10),
            pace_threshold_percent,
        }
    }

    /// Perform the full handshake and return a [`ProviderSnapshot`].
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::CodexAppServerUnavailable`] if the subprocess
    /// cannot be launched, crashes, or times out during the handshake, or
    /// [`CoreError::UnsupportedResponse`] if the final response does not
    /// match the expected shape.
    #[tracing::instrument(skip(self))]
    pub async fn fetch_snapshot(&self) -> Result<ProviderSnapshot, CoreError> {
        let (client, mut child) = JsonRpcStdioClient::spawn(&self.binary).await?;

        let result = self.run_handshake(&client).await;

        let _ = child.start_kill();
        let _ = child.wait().await;

        let response: RateLimitsResponse = match result {
            Ok(value) => serde_json::from_value(value).map_err(|e| CoreError::UnsupportedResponse {
                reason: format!("malformed rateLimits response: {e}"),
            })?,
            Err(err) => return Err(err),
        };

        self.build_snapshot(response)
    }

    async fn run_handshake(&self, client: &JsonRpcStdioClient) -> Result<Value, CoreError> {
        client
            .call(
                "initialize",
                json!({"clientInfo": {"name": "paneforge", "version": env!("CARGO_PKG_VERSION")}}),
                self.handshake_timeout,
            )
            .await?;
        client.notify("initialized", Value::Null)?;
        client
            .call("account/rateLimits/read", Value::Null, self.handshake_timeout)
            .await
    }

    fn build_snapshot(&self, response: RateLimitsResponse) -> Result<ProviderSnapshot, CoreError> {
        let mut flat = Vec::new();
        if let Some(group) = &response.rate_limits {
            flatten("primary", group, &mut flat);
        }
        if let Some(by_id) = &response.rate_limits_by_limit_id {
            for (limit_id, group) in by_id {
                flatten(limit_id, group, &mut flat);
            }
        }

        // De-duplicate by (limitId, slot, durationMins, resetsAt, usedPercent).
        let mut seen = std::collections::HashSet::new();
        flat.retain(|w| {
            let key = (
                w.limit_id.clone(),
                w.slot,
                w.duration_minutes,
                w.resets_at,
                w.used_percent.map(|p| p.to_bits()),
            );
            seen.insert(key)
        });

        let now = Utc::now();
        let session = select_window(&flat, SESSION_WINDOW_MINUTES);
        let weekly = select_window(&flat, WEEKLY_WINDOW_MINUTES);

        let mut windows = Vec::new();
        if let Some(w) = session {
            windows.push(to_metric_window(w, WindowId::Session, "Session", now, self.pace_threshold_percent));
        }
        if let Some(w) = weekly {
            windows.push(to_metric_window(w, WindowId::Weekly, "Weekly", now, self.pace_threshold_percent));
        }

        Ok(ProviderSnapshot {
            provider_id: "codex".to_owned(),
            provider_label: "Codex".to_owned(),
            account_label: None,
            plan_label: None,
            windows,
            billing: BillingInfo::default(),
            capabilities: ProviderCapabilities {
                supports_force_refresh: true,
                supports_model_breakdown: false,
            },
            status: SnapshotStatus::Ok,
            issues: Vec::new(),
            fetched_at: now,
            stale_at: now + ChronoDuration::seconds(180),
        })
    }
}

/// Select the window matching `duration_minutes`, choosing the candidate
/// with the earliest reset; ties broken by higher utilization.
fn select_window(windows: &[FlatWindow], duration_minutes: i64) -> Option<&FlatWindow> {
    windows
        .iter()
        .filter(|w| w.duration_minutes == duration_minutes)
        .min_by(|a, b| match (a.resets_at, b.resets_at) {
            (Some(a_reset), Some(b_reset)) => a_reset.cmp(&b_reset).then_with(|| {
                b.used_percent
                    .unwrap_or(0.0)
                    .total_cmp(&a.used_percent.unwrap_or(0.0))
            }),
            (Some(_), None) => std::cmp::Ordering::Less,
            (None, Some(_)) => std::cmp::Ordering::Greater,
            (None, None) => b
                .used_percent
                .unwrap_or(0.0)
                .total_cmp(&a.used_percent.unwrap_or(0.0)),
        })
}

fn to_metric_window(
    w: &FlatWindow,
    id: WindowId,
    title: &str,
    now: chrono::DateTime<Utc>,
    pace_threshold_percent: f64,
) -> UsageMetricWindow {
    let duration = ChronoDuration::minutes(w.duration_minutes);
    UsageMetricWindow {
        id,
        title: title.to_owned(),
        utilization_percent: w.used_percent,
        window_duration_ms: Some(duration.num_milliseconds()),
        resets_at: w.resets_at,
        pace: Pace::derive(w.used_percent, duration, w.resets_at, now, pace_threshold_percent),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn window(limit_id: &str, slot: &'static str, minutes: i64, reset_offset_secs: i64, used: f64) -> FlatWindow {
        FlatWindow {
            limit_id: limit_id.to_owned(),
            slot,
            duration_minutes: minutes,
            resets_at: Some(Utc::now() + ChronoDuration::seconds(reset_offset_secs)),
            used_percent: Some(used),
        }
    }

    #[test]
    fn selects_earliest_reset_among_same_duration() {
        let windows = vec![
            window("a", "primary", 300, 1000, 10.0),
            window("b", "primary", 300, 500, 20.0),
        ];
        let selected = select_window(&windows, 300).unwrap();
        assert_eq!(selected.limit_id, "b");
    }

    #[test]
    fn ties_broken_by_higher_utilization() {
        let now_offset = 500;
        let windows = vec![
            window("a", "primary", 300, now_offset, 10.0),
            window("b", "primary", 300, now_offset, 90.0),
        ];
        let selected = select_window(&windows, 300).unwrap();
        assert_eq!(selected.limit_id, "b");
    }

    #[test]
    fn filters_by_duration() {
        let windows = vec![window("a", "primary", 300, 500, 10.0), window("b", "primary", 10_080, 500, 10.0)];
        assert_eq!(select_window(&windows, 300).unwrap().limit_id, "a");
        assert_eq!(select_window(&windows, 10_080).unwrap().limit_id, "b");
    }

    #[test]
    fn epoch_heuristic_applies_to_resets() {
        let seconds = json!(1_800_000_000_i64);
        let millis = json!(1_800_000_000_000_i64);
        assert_eq!(parse_reset_value(&seconds), parse_reset_value(&millis));
    }
}
