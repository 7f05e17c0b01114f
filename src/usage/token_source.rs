//! Token Source: walks a sandboxed root for JSONL transcripts, aggregating
//! per-model token counters into today / last-30-days / daily buckets.

use chrono::{DateTime, NaiveDate, Utc};
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::time::{Duration as StdDuration, Instant};
use tokio::sync::RwLock;
use walkdir::WalkDir;

use crate::core::errors::CoreError;

use super::types::{DailyCounters, ModelUsage, TokenCounters};

const CACHE_TTL: StdDuration = StdDuration::from_secs(60);

/// Which transcript shape to parse; selected per-provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TranscriptShape {
    /// `{timestamp, message: {id, model, usage}, requestId}`, deduplicated by `(id, requestId)`.
    ChatTranscript,
    /// Ordered `turn_context`/`event_msg` events with a running model and token_count deltas.
    Session,
}

#[derive(Debug, Deserialize)]
struct ChatRecord {
    timestamp: Option<DateTime<Utc>>,
    message: Option<ChatMessage>,
    #[serde(default, rename = "requestId")]
    request_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    id: Option<String>,
    model: Option<String>,
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatUsage {
    input_tokens: u64,
    output_tokens: u64,
    #[serde(default)]
    cache_read_input_tokens: u64,
    #[serde(default)]
    cache_creation_input_tokens: u64,
}

#[derive(Debug, Deserialize)]
struct SessionLine {
    timestamp: Option<DateTime<Utc>>,
    #[serde(rename = "type")]
    kind: String,
    model: Option<String>,
    msg: Option<SessionMsg>,
}

#[derive(Debug, Deserialize)]
struct SessionMsg {
    #[serde(rename = "type")]
    kind: String,
    info: Option<SessionTokenInfo>,
}

#[derive(Debug, Deserialize)]
struct SessionTokenInfo {
    last_token_usage: Option<SessionTokenUsage>,
    total_token_usage: Option<SessionTokenUsage>,
}

#[derive(Debug, Clone, Deserialize)]
struct SessionTokenUsage {
    input_tokens: u64,
    output_tokens: u64,
    #[serde(default)]
    cache_read_input_tokens: u64,
    #[serde(default)]
    cache_creation_input_tokens: u64,
    #[serde(default)]
    total_tokens: Option<u64>,
}

#[derive(Default, Clone)]
struct ModelAgg {
    today: TokenCounters,
    last30days: TokenCounters,
    daily: HashMap<NaiveDate, TokenCounters>,
}

struct CacheEntry {
    fetched_at: Instant,
    value: Vec<ModelUsage>,
}

/// Scans a sandboxed transcript root and aggregates per-model token usage.
pub struct TokenSource {
    root: PathBuf,
    cache: RwLock<HashMap<String, CacheEntry>>,
}

impl TokenSource {
    /// Construct a source rooted at `root`. All JSONL files must resolve
    /// (after following no symlinks) to a realpath inside `root`'s realpath.
    #[must_use]
    pub fn new(root: PathBuf) -> Self {
        Self {
            root,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Return per-model usage for `provider_id`, using the 60s in-process cache.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Internal`] if the root directory cannot be canonicalized.
    pub async fn usage_for(&self, provider_id: &str, shape: TranscriptShape) -> Result<Vec<ModelUsage>, CoreError> {
        {
            let cache = self.cache.read().await;
            if let Some(entry) = cache.get(provider_id) {
                if entry.fetched_at.elapsed() < CACHE_TTL {
                    return Ok(entry.value.clone());
                }
            }
        }

        let root = self.root.clone();
        let computed = tokio::task::spawn_blocking(move || scan_root(&root, shape))
            .await
            .map_err(|e| CoreError::Internal {
                reason: format!("token source scan task panicked: {e}"),
            })??;

        self.cache.write().await.insert(
            provider_id.to_owned(),
            CacheEntry {
                fetched_at: Instant::now(),
                value: computed.clone(),
            },
        );
        Ok(computed)
    }
}

fn scan_root(root: &Path, shape: TranscriptShape) -> Result<Vec<ModelUsage>, CoreError> {
    let canonical_root = std::fs::canonicalize(root).map_err(|e| CoreError::Internal {
        reason: format!("cannot canonicalize transcripts root: {e}"),
    })?;

    let now = Utc::now();
    let today_start = now.date_naive();
    let last30_start = today_start - chrono::Duration::days(29);

    let mut aggs: HashMap<String, ModelAgg> = HashMap::new();

    for entry in WalkDir::new(root).follow_links(false) {
        let Ok(entry) = entry else { continue };
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("jsonl") {
            continue;
        }
        let Ok(real) = std::fs::canonicalize(path) else { continue };
        if !real.starts_with(&canonical_root) {
            // Realpath escapes the sandboxed root; skip.
            continue;
        }

        match shape {
            TranscriptShape::ChatTranscript => scan_chat_file(&real, today_start, last30_start, &mut aggs),
            TranscriptShape::Session => scan_session_file(&real, today_start, last30_start, &mut aggs),
        }
    }

    let mut out: Vec<ModelUsage> = aggs
        .into_iter()
        .filter(|(_, agg)| agg.today.total_tokens != 0 || agg.last30days.total_tokens != 0)
        .map(|(model_id, agg)| {
            let mut daily: Vec<DailyCounters> = agg
                .daily
                .into_iter()
                .map(|(date, counters)| DailyCounters { date, counters })
                .collect();
            daily.sort_by_key(|d| d.date);
            ModelUsage {
                model_id,
                today: agg.today,
                last30days: agg.last30days,
                daily,
            }
        })
        .collect();
    out.sort_by(|a, b| a.model_id.cmp(&b.model_id));
    Ok(out)
}

fn bucket_in(
    agg: &mut ModelAgg,
    timestamp: DateTime<Utc>,
    today_start: NaiveDate,
    last30_start: NaiveDate,
    delta: TokenCounters,
) {
    let date = timestamp.date_naive();
    if date < last30_start {
        return;
    }
    agg.last30days = agg.last30days + delta;
    if date >= today_start {
        agg.today = agg.today + delta;
    }
    let day = agg.daily.entry(date).or_default();
    *day = *day + delta;
}

fn scan_chat_file(path: &Path, today_start: NaiveDate, last30_start: NaiveDate, aggs: &mut HashMap<String, ModelAgg>) {
    let Ok(file) = std::fs::File::open(path) else { return };
    let reader = std::io::BufReader::new(file);
    let mut seen: HashSet<(String, String)> = HashSet::new();

    for line in reader.lines() {
        let Ok(line) = line else { continue };
        if line.trim().is_empty() {
            continue;
        }
        let Ok(record) = serde_json::from_str::<ChatRecord>(&line) else { continue };
        let Some(timestamp) = record.timestamp else { continue };
        let Some(message) = record.message else { continue };
        let Some(model_id) = message.model else { continue };
        let Some(usage) = message.usage else { continue };

        if let (Some(id), Some(request_id)) = (&message.id, &record.request_id) {
            if !seen.insert((id.clone(), request_id.clone())) {
                continue;
            }
        }

        let delta = TokenCounters::from_raw(
            usage.input_tokens,
            usage.output_tokens,
            usage.cache_read_input_tokens,
            usage.cache_creation_input_tokens,
            None,
        );
        let agg = aggs.entry(model_id).or_default();
        bucket_in(agg, timestamp, today_start, last30_start, delta);
    }
}

fn scan_session_file(path: &Path, today_start: NaiveDate, last30_start: NaiveDate, aggs: &mut HashMap<String, ModelAgg>) {
    let Ok(file) = std::fs::File::open(path) else { return };
    let reader = std::io::BufReader::new(file);

    let mut current_model: Option<String> = None;
    let mut last_total: Option<SessionTokenUsage> = None;

    for line in reader.lines() {
        let Ok(line) = line else { continue };
        if line.trim().is_empty() {
            continue;
        }
        let Ok(record) = serde_json::from_str::<SessionLine>(&line) else { continue };

        if record.kind == "turn_context" {
            if let Some(model) = record.model {
                current_model = Some(model);
            }
            continue;
        }

        if record.kind != "event_msg" {
            continue;
        }
        let Some(msg) = record.msg else { continue };
        if msg.kind != "token_count" {
            continue;
        }
        let Some(info) = msg.info else { continue };
        let Some(model_id) = current_model.clone() else { continue };
        let Some(timestamp) = record.timestamp else { continue };

        let raw_delta = if let Some(last) = &info.last_token_usage {
            last.clone()
        } else {
            let Some(total) = &info.total_token_usage else { continue };
            let prior = last_total.clone().unwrap_or(SessionTokenUsage {
                input_tokens: 0,
                output_tokens: 0,
                cache_read_input_tokens: 0,
                cache_creation_input_tokens: 0,
                total_tokens: Some(0),
            });
            SessionTokenUsage {
                input_tokens: total.input_tokens.saturating_sub(prior.input_tokens),
                output_tokens: total.output_tokens.saturating_sub(prior.output_tokens),
                cache_read_input_tokens: total.cache_read_input_tokens.saturating_sub(prior.cache_read_input_tokens),
                cache_creation_input_tokens: total
                    .cache_creation_input_tokens
                    .saturating_sub(prior.cache_creation_input_tokens),
                total_tokens: None,
            }
        };

        if let Some(total) = &info.total_token_usage {
            last_total = Some(total.clone());
        }

        // The input counter in this shape already includes cache reads.
        let bounded_cache_read = raw_delta.cache_read_input_tokens.min(raw_delta.input_tokens);
        let delta = TokenCounters::from_raw(
            raw_delta.input_tokens,
            raw_delta.output_tokens,
            bounded_cache_read,
            raw_delta.cache_creation_input_tokens,
            raw_delta.total_tokens,
        );

        let agg = aggs.entry(model_id).or_default();
        bucket_in(agg, timestamp, today_start, last30_start, delta);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    fn write_file(dir: &Path, name: &str, content: &str) -> PathBuf {
        let path = dir.join(name);
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(content.as_bytes()).unwrap();
        path
    }

    #[tokio::test]
    async fn chat_transcript_aggregates_and_dedupes() {
        let dir = tempfile::tempdir().unwrap();
        let now = Utc::now();
        let line = serde_json::json!({
            "timestamp": now.to_rfc3339(),
            "message": {"id": "m1", "model": "gpt-5.3-codex", "usage": {"input_tokens": 100, "output_tokens": 50}},
            "requestId": "r1"
        })
        .to_string();
        write_file(dir.path(), "log.jsonl", &format!("{line}\n{line}\n"));

        let source = TokenSource::new(dir.path().to_path_buf());
        let usage = source.usage_for("claude", TranscriptShape::ChatTranscript).await.unwrap();
        assert_eq!(usage.len(), 1);
        assert_eq!(usage[0].today.total_tokens, 150);
    }

    #[tokio::test]
    async fn session_shape_uses_last_when_present() {
        let dir = tempfile::tempdir().unwrap();
        let now = Utc::now();
        let lines = format!(
            "{}\n{}\n",
            serde_json::json!({"timestamp": now.to_rfc3339(), "type": "turn_context", "model": "o4"}),
            serde_json::json!({
                "timestamp": now.to_rfc3339(),
                "type": "event_msg",
                "msg": {"type": "token_count", "info": {"last_token_usage": {"input_tokens": 10, "output_tokens": 5}}}
            })
        );
        write_file(dir.path(), "session.jsonl", &lines);

        let source = TokenSource::new(dir.path().to_path_buf());
        let usage = source.usage_for("codex", TranscriptShape::Session).await.unwrap();
        assert_eq!(usage.len(), 1);
        assert_eq!(usage[0].model_id, "o4");
        assert_eq!(usage[0].today.input_tokens, 10);
    }

    #[tokio::test]
    async fn path_sandbox_skips_escaping_symlink() {
        let dir = tempfile::tempdir().unwrap();
        let outside = tempfile::tempdir().unwrap();
        let now = Utc::now();
        let line = serde_json::json!({
            "timestamp": now.to_rfc3339(),
            "message": {"id": "m1", "model": "gpt-5.3-codex", "usage": {"input_tokens": 100, "output_tokens": 50}},
            "requestId": "r1"
        })
        .to_string();
        let outside_file = write_file(outside.path(), "escaped.jsonl", &line);

        #[cfg(unix)]
        std::os::unix::fs::symlink(&outside_file, dir.path().join("link.jsonl")).unwrap();

        let source = TokenSource::new(dir.path().to_path_buf());
        let usage = source.usage_for("claude", TranscriptShape::ChatTranscript).await.unwrap();
        assert!(usage.is_empty());
    }
}
