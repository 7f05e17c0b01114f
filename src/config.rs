//! Application configuration: defaults, `~/.paneforge/config.toml`, then
//! `PANEFORGE_*` environment overrides, then CLI flags (applied by `main.rs`).

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::utils::paths;

/// Every tunable the core names: timeouts, TTLs, backoff windows, poll
/// intervals, the pace threshold, and byte caps. Nothing below is hardwired
/// past this struct.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    /// Subprocess Adapter default timeout, milliseconds.
    pub subprocess_timeout_ms: u64,
    /// Subprocess Adapter captured-stdout byte cap.
    pub subprocess_stdout_cap_bytes: usize,

    /// Pace status threshold `T` (percent), default 10.
    pub pace_threshold_percent: f64,

    /// Pricing catalog URL.
    pub pricing_catalog_url: String,
    /// Pricing catalog TTL, milliseconds (default 24h).
    pub pricing_ttl_ms: u64,
    /// Pricing catalog stale-serviceable window, milliseconds (default 7d).
    pub pricing_stale_max_age_ms: u64,

    /// Token Source result cache TTL, milliseconds (default 60s).
    pub token_source_cache_ttl_ms: u64,
    /// Sandboxed root directory that `usage::token_source` may walk.
    pub transcripts_root: Option<String>,

    /// Usage Dashboard core-snapshot TTL, milliseconds (default 180s).
    pub dashboard_core_ttl_ms: u64,
    /// Usage Dashboard cost-enrichment TTL, milliseconds (default 180s).
    pub dashboard_cost_ttl_ms: u64,
    /// Usage Dashboard failure backoff, milliseconds (default 30s).
    pub dashboard_backoff_ms: u64,
    /// Usage Dashboard per-request timeout, milliseconds (default 5s).
    pub dashboard_request_timeout_ms: u64,
    /// Whether cost enrichment is enabled at all.
    pub pricing_enabled: bool,

    /// Git Cache poll interval, milliseconds (default 10s).
    pub git_poll_interval_ms: u64,
    /// Git commit log page size (default 10).
    pub git_commit_page_size: usize,

    /// Screen Gateway text-mode poll interval, milliseconds (default 1s).
    pub screen_poll_interval_text_ms: u64,
    /// Screen Gateway image-mode poll interval, milliseconds (default 2s).
    pub screen_poll_interval_image_ms: u64,
    /// Full-vs-delta heuristic: line-count threshold (default 200).
    pub screen_full_rescind_line_threshold: usize,
    /// Full-vs-delta heuristic: change-ratio threshold (default 0.5).
    pub screen_full_rescind_ratio_threshold: f64,
    /// Enter-after-text delay, milliseconds.
    pub screen_enter_delay_ms: u64,
    /// Dangerous-command regex patterns (in addition to the built-in set).
    pub dangerous_command_patterns: Vec<String>,

    /// HTTP bind address for the transport adapter.
    pub http_bind_addr: String,

    /// `true` to emit JSON logs instead of human-readable ones.
    pub log_json: bool,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            subprocess_timeout_ms: 5_000,
            subprocess_stdout_cap_bytes: 20 * 1024 * 1024,
            pace_threshold_percent: 10.0,
            pricing_catalog_url:
                "https://raw.githubusercontent.com/BerriAI/litellm/main/model_prices_and_context_window.json"
                    .to_owned(),
            pricing_ttl_ms: 24 * 60 * 60 * 1000,
            pricing_stale_max_age_ms: 7 * 24 * 60 * 60 * 1000,
            token_source_cache_ttl_ms: 60_000,
            transcripts_root: None,
            dashboard_core_ttl_ms: 180_000,
            dashboard_cost_ttl_ms: 180_000,
            dashboard_backoff_ms: 30_000,
            dashboard_request_timeout_ms: 5_000,
            pricing_enabled: true,
            git_poll_interval_ms: 10_000,
            git_commit_page_size: 10,
            screen_poll_interval_text_ms: 1_000,
            screen_poll_interval_image_ms: 2_000,
            screen_full_rescind_line_threshold: 200,
            screen_full_rescind_ratio_threshold: 0.5,
            screen_enter_delay_ms: 50,
            dangerous_command_patterns: Vec::new(),
            http_bind_addr: "127.0.0.1:4317".to_owned(),
            log_json: false,
        }
    }
}

impl CoreConfig {
    /// Load `~/.paneforge/config.toml` if present, then apply `PANEFORGE_*`
    /// environment overrides on top.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be read or
    /// parsed.
    pub fn load() -> anyhow::Result<Self> {
        let mut config = Self::default();

        let path = paths::config_path();
        if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", path.display()))?;
            config = toml::from_str(&contents)
                .map_err(|e| anyhow::anyhow!("failed to parse {}: {e}", path.display()))?;
        } else {
            tracing::debug!(path = %path.display(), "no config file found, using defaults");
        }

        config.apply_env_overrides();
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("PANEFORGE_SUBPROCESS_TIMEOUT_MS") {
            if let Ok(n) = v.parse() {
                self.subprocess_timeout_ms = n;
            }
        }
        if let Ok(v) = std::env::var("PANEFORGE_PRICING_CATALOG_URL") {
            self.pricing_catalog_url = v;
        }
        if let Ok(v) = std::env::var("PANEFORGE_TRANSCRIPTS_ROOT") {
            self.transcripts_root = Some(v);
        }
        if let Ok(v) = std::env::var("PANEFORGE_PRICING_ENABLED") {
            if let Ok(b) = v.parse() {
                self.pricing_enabled = b;
            }
        }
        if let Ok(v) = std::env::var("PANEFORGE_HTTP_BIND_ADDR") {
            self.http_bind_addr = v;
        }
        if let Ok(v) = std::env::var("PANEFORGE_LOG_FORMAT") {
            self.log_json = v.eq_ignore_ascii_case("json");
        }
    }

    /// Convenience accessor: subprocess timeout as a [`Duration`].
    #[must_use]
    pub const fn subprocess_timeout(&self) -> Duration {
        Duration::from_millis(self.subprocess_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = CoreConfig::default();
        assert_eq!(config.pace_threshold_percent, 10.0);
        assert_eq!(config.git_commit_page_size, 10);
        assert!(config.pricing_enabled);
    }
}
