//! Multiplexer Adapter: shells out to the `wezterm` CLI for pane control,
//! mapping its stderr conventions onto the closed error taxonomy.

use async_trait::async_trait;
use std::path::Path;

use crate::core::errors::CoreError;
use crate::core::subprocess::{SubprocessAdapter, SubprocessOptions};

/// One pane as reported by `wezterm cli list`.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct PaneInfo {
    /// Opaque pane identifier.
    #[serde(rename = "pane_id")]
    pub pane_id: u64,
    /// Working directory URL/path, if known.
    pub cwd: Option<String>,
    /// Terminal title.
    pub title: Option<String>,
}

/// Pane control operations, implemented by shelling out to a terminal
/// multiplexer's CLI.
#[async_trait]
pub trait MultiplexerAdapter: Send + Sync {
    /// Send literal text to a pane, optionally via the paste path.
    async fn send_text(&self, pane_id: &str, text: &str, no_paste: bool) -> Result<(), CoreError>;
    /// Send raw symbolic keys through the direct proxy path, where available.
    async fn send_raw_keys(&self, pane_id: &str, keys: &[String]) -> Result<(), CoreError>;
    /// Capture a pane's current text content.
    async fn capture_pane(&self, pane_id: &str) -> Result<String, CoreError>;
    /// Bring a pane into focus.
    async fn activate_pane(&self, pane_id: &str) -> Result<(), CoreError>;
    /// Terminate a pane.
    async fn kill_pane(&self, pane_id: &str) -> Result<(), CoreError>;
    /// List all known panes.
    async fn list_panes(&self) -> Result<Vec<PaneInfo>, CoreError>;
}

/// `wezterm cli` backed implementation.
pub struct WeztermMultiplexer {
    subprocess: SubprocessAdapter,
}

impl WeztermMultiplexer {
    /// Construct an adapter that shells out to `wezterm`.
    #[must_use]
    pub fn new() -> Self {
        Self {
            subprocess: SubprocessAdapter::new(),
        }
    }

    async fn run(&self, args: &[&str]) -> Result<String, CoreError> {
        match self.subprocess.run("wezterm", args, None::<&Path>, &SubprocessOptions::default()).await {
            Ok(output) => Ok(output.stdout),
            Err(CoreError::UpstreamUnavailable { reason }) => Err(classify_wezterm_error(&reason)),
            Err(other) => Err(other),
        }
    }
}

impl Default for WeztermMultiplexer {
    fn default() -> Self {
        Self::new()
    }
}

fn classify_wezterm_error(reason: &str) -> CoreError {
    if reason.contains("no running wezterm instance") {
        CoreError::WeztermUnavailable { reason: reason.to_owned() }
    } else if let Some(captures) = PANE_NOT_FOUND.captures(reason) {
        CoreError::InvalidPane {
            pane_id: captures.get(1).map_or_else(|| "unknown".to_owned(), |m| m.as_str().to_owned()),
        }
    } else {
        CoreError::WeztermUnavailable { reason: reason.to_owned() }
    }
}

static PANE_NOT_FOUND: std::sync::LazyLock<regex::Regex> =
    std::sync::LazyLock::new(|| regex::Regex::new(r"pane (\d+) not found").expect("valid regex"));

#[async_trait]
impl MultiplexerAdapter for WeztermMultiplexer {
    async fn send_text(&self, pane_id: &str, text: &str, no_paste: bool) -> Result<(), CoreError> {
        let mut args = vec!["cli", "send-text", "--pane-id", pane_id];
        if no_paste {
            args.push("--no-paste");
        }
        args.push("--");
        args.push(text);
        self.run(&args).await.map(|_| ())
    }

    async fn send_raw_keys(&self, pane_id: &str, keys: &[String]) -> Result<(), CoreError> {
        let mut args = vec!["cli".to_owned(), "send-text".to_owned(), "--pane-id".to_owned(), pane_id.to_owned(), "--no-paste".to_owned(), "--".to_owned()];
        args.push(keys.join(""));
        let refs: Vec<&str> = args.iter().map(String::as_str).collect();
        self.run(&refs).await.map(|_| ())
    }

    async fn capture_pane(&self, pane_id: &str) -> Result<String, CoreError> {
        self.run(&["cli", "get-text", "--pane-id", pane_id]).await
    }

    async fn activate_pane(&self, pane_id: &str) -> Result<(), CoreError> {
        self.run(&["cli", "activate-pane", "--pane-id", pane_id]).await.map(|_| ())
    }

    async fn kill_pane(&self, pane_id: &str) -> Result<(), CoreError> {
        self.run(&["cli", "kill-pane", "--pane-id", pane_id]).await.map(|_| ())
    }

    async fn list_panes(&self) -> Result<Vec<PaneInfo>, CoreError> {
        let stdout = self.run(&["cli", "list", "--format", "json"]).await?;
        serde_json::from_str(&stdout).map_err(|e| CoreError::UnsupportedResponse {
            reason: format!("malformed pane list: {e}"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_no_running_instance() {
        let err = classify_wezterm_error("no running wezterm instance");
        assert!(matches!(err, CoreError::WeztermUnavailable { .. }));
    }

    #[test]
    fn classifies_pane_not_found() {
        let err = classify_wezterm_error("error: pane 42 not found");
        match err {
            CoreError::InvalidPane { pane_id } => assert_eq!(pane_id, "42"),
            other => panic!("expected InvalidPane, got {other:?}"),
        }
    }
}
