//! Scheduler: visibility-gated, demand-driven background polling for git
//! state and screen content, one task per pane.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::interval;

use crate::git::GitCache;
use crate::screen::{ScreenGateway, ScreenMode};

/// Polling cadence, taken from [`crate::config::CoreConfig`].
#[derive(Debug, Clone, Copy)]
pub struct SchedulerIntervals {
    /// Git diff/commit-log poll interval.
    pub git: Duration,
    /// Screen poll interval in text mode.
    pub screen_text: Duration,
    /// Screen poll interval in image mode.
    pub screen_image: Duration,
}

/// A pane's visibility flag, set by the transport layer when a client
/// subscribes to or unsubscribes from the pane's live view.
#[derive(Clone)]
pub struct VisibilityGate {
    tx: watch::Sender<bool>,
}

impl VisibilityGate {
    /// Construct a gate, initially invisible.
    #[must_use]
    pub fn new() -> (Self, watch::Receiver<bool>) {
        let (tx, rx) = watch::channel(false);
        (Self { tx }, rx)
    }

    /// Flip visibility. A `false -> true` transition wakes the poller to
    /// tick immediately rather than waiting for its next interval.
    pub fn set(&self, visible: bool) {
        let _ = self.tx.send(visible);
    }
}

impl Default for VisibilityGate {
    fn default() -> Self {
        Self::new().0
    }
}

/// One pane's background polling task handles.
pub struct PaneScheduler {
    handle: JoinHandle<()>,
    visibility: VisibilityGate,
}

impl PaneScheduler {
    /// Spawn the polling loop for `pane_id`, initially invisible. Call
    /// [`Self::set_visible`] once a client subscribes.
    #[must_use]
    pub fn spawn(
        pane_id: String,
        worktree_path: String,
        git_cache: Arc<GitCache>,
        screen_gateway: Arc<ScreenGateway>,
        mode: ScreenMode,
        intervals: SchedulerIntervals,
    ) -> Self {
        let (gate, visibility_rx) = VisibilityGate::new();
        let handle = tokio::spawn(run_pane_loop(pane_id, worktree_path, git_cache, screen_gateway, mode, intervals, visibility_rx));
        Self { handle, visibility: gate }
    }

    /// Mark the pane visible or invisible.
    pub fn set_visible(&self, visible: bool) {
        self.visibility.set(visible);
    }

    /// Stop the polling task.
    pub fn stop(self) {
        self.handle.abort();
    }
}

async fn run_pane_loop(
    pane_id: String,
    worktree_path: String,
    git_cache: Arc<GitCache>,
    screen_gateway: Arc<ScreenGateway>,
    mode: ScreenMode,
    intervals: SchedulerIntervals,
    mut visibility_rx: watch::Receiver<bool>,
) {
    let screen_interval = match mode {
        ScreenMode::Text => intervals.screen_text,
        ScreenMode::Image => intervals.screen_image,
    };

    let mut git_ticker = interval(intervals.git);
    let mut screen_ticker = interval(screen_interval);
    let mut visible = *visibility_rx.borrow();

    loop {
        tokio::select! {
            _ = git_ticker.tick() => {
                if visible {
                    poll_git(&pane_id, &worktree_path, &git_cache).await;
                }
            }
            _ = screen_ticker.tick() => {
                if visible {
                    poll_screen(&pane_id, &screen_gateway).await;
                }
            }
            changed = visibility_rx.changed() => {
                if changed.is_err() {
                    tracing::debug!(pane_id = %pane_id, "visibility gate dropped, stopping scheduler");
                    return;
                }
                let now_visible = *visibility_rx.borrow();
                if now_visible && !visible {
                    // Tick immediately on resume so the client isn't stuck looking
                    // at stale state for up to a full interval.
                    poll_git(&pane_id, &worktree_path, &git_cache).await;
                    poll_screen(&pane_id, &screen_gateway).await;
                }
                visible = now_visible;
            }
        }
    }
}

async fn poll_git(pane_id: &str, worktree_path: &str, git_cache: &GitCache) {
    if let Err(e) = git_cache.refresh(pane_id, worktree_path).await {
        tracing::debug!(pane_id = %pane_id, error = %e, "git poll failed");
    }
}

async fn poll_screen(pane_id: &str, screen_gateway: &ScreenGateway) {
    if let Err(e) = screen_gateway.get_screen(pane_id).await {
        tracing::debug!(pane_id = %pane_id, error = %e, "screen poll failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn visibility_gate_starts_invisible() {
        let (_gate, rx) = VisibilityGate::new();
        assert!(!*rx.borrow());
    }

    #[test]
    fn visibility_gate_set_propagates() {
        let (gate, rx) = VisibilityGate::new();
        gate.set(true);
        assert!(*rx.borrow());
    }
}
