//! Screen Gateway: per-pane capture, cursor-based full/delta responses, and
//! guarded keystroke dispatch.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Mutex;

use crate::core::errors::CoreError;
use crate::core::request_guard::RequestGuard;
use crate::pane::multiplexer::MultiplexerAdapter;

use super::delta::{apply_deltas, build_deltas, should_send_full};
use super::guard::DangerousCommandGuard;
use super::keystrokes::KeystrokeRequest;
use super::types::{Cursor, ScreenDelta, ScreenResponse};

struct PaneState {
    lines: Vec<String>,
    generation: u64,
}

/// Holds per-pane last-known screen content and dispatches capture/keystroke
/// requests through a [`MultiplexerAdapter`].
pub struct ScreenGateway {
    multiplexer: std::sync::Arc<dyn MultiplexerAdapter>,
    guard: DangerousCommandGuard,
    enter_delay_ms: u64,
    state: Mutex<HashMap<String, PaneState>>,
    generation_seed: AtomicU64,
    /// Scoped per pane so an overlapping scheduler tick and on-demand fetch
    /// for the same pane can't let the slower capture clobber the cache
    /// with a screen that is already stale by the time it lands.
    requests: RequestGuard,
}

impl ScreenGateway {
    /// Construct a gateway over `multiplexer`, applying `dangerous_patterns`
    /// in addition to the guard's own baked-in patterns.
    #[must_use]
    pub fn new(multiplexer: std::sync::Arc<dyn MultiplexerAdapter>, dangerous_patterns: &[String], enter_delay_ms: u64) -> Self {
        Self {
            multiplexer,
            guard: DangerousCommandGuard::new(dangerous_patterns),
            enter_delay_ms,
            state: Mutex::new(HashMap::new()),
            generation_seed: AtomicU64::new(0),
            requests: RequestGuard::new(),
        }
    }

    /// Capture `pane_id`'s current text and return either a full snapshot
    /// (first call, or pervasive change) or a delta from the cached lines.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::WeztermUnavailable`] or [`CoreError::InvalidPane`]
    /// when the underlying capture call fails.
    pub async fn get_screen(&self, pane_id: &str) -> Result<ScreenResponse, CoreError> {
        let token = self.requests.begin_request(pane_id);
        let captured = self.multiplexer.capture_pane(pane_id).await?;
        let lines: Vec<String> = captured.lines().map(str::to_owned).collect();

        let mut state = self.state.lock().await;

        if !self.requests.is_current(&token) {
            // A later capture for this pane has already landed; report it
            // instead of overwriting the cache with this stale result.
            if let Some(prev) = state.get(pane_id) {
                return Ok(ScreenResponse::Full {
                    screen: prev.lines.clone(),
                    cursor: cursor_for(pane_id, prev.generation),
                });
            }
        }

        let response = match state.get(pane_id) {
            None => {
                let generation = self.generation_seed.fetch_add(1, Ordering::SeqCst);
                ScreenResponse::Full {
                    screen: lines.clone(),
                    cursor: cursor_for(pane_id, generation),
                }
            }
            Some(prev) => {
                let deltas = build_deltas(&prev.lines, &lines);
                if deltas.is_empty() {
                    ScreenResponse::Delta {
                        deltas: Vec::new(),
                        cursor: cursor_for(pane_id, prev.generation),
                    }
                } else if should_send_full(prev.lines.len(), &deltas) {
                    let generation = self.generation_seed.fetch_add(1, Ordering::SeqCst);
                    ScreenResponse::Full {
                        screen: lines.clone(),
                        cursor: cursor_for(pane_id, generation),
                    }
                } else {
                    let generation = prev.generation + 1;
                    ScreenResponse::Delta {
                        deltas,
                        cursor: cursor_for(pane_id, generation),
                    }
                }
            }
        };

        let generation = match &response {
            ScreenResponse::Full { cursor, .. } | ScreenResponse::Delta { cursor, .. } => generation_of(cursor),
        };
        state.insert(pane_id.to_owned(), PaneState { lines, generation });
        Ok(response)
    }

    /// Re-derive what a client holding `cached` plus `deltas` would see,
    /// for local verification in tests and diagnostics.
    #[must_use]
    pub fn apply(cached: &[String], deltas: &[ScreenDelta]) -> Vec<String> {
        apply_deltas(cached, deltas)
    }

    /// Dispatch a keystroke request to `pane_id`, applying the dangerous-
    /// command guard to the `Text` variant unless it opts out.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::DangerousCommand`] when the guard matches and the
    /// request did not set `allow_dangerous`; otherwise propagates whatever
    /// the multiplexer call returns.
    pub async fn send_keystroke(&self, pane_id: &str, request: KeystrokeRequest) -> Result<(), CoreError> {
        match request {
            KeystrokeRequest::Text { text, with_enter, enter_delay_ms, allow_dangerous } => {
                if !allow_dangerous && self.guard.check(&text) {
                    return Err(CoreError::DangerousCommand);
                }
                self.multiplexer.send_text(pane_id, &text, false).await?;
                if with_enter {
                    let delay = enter_delay_ms.unwrap_or(self.enter_delay_ms);
                    tokio::time::sleep(std::time::Duration::from_millis(delay)).await;
                    self.multiplexer.send_text(pane_id, "\r", true).await?;
                }
                Ok(())
            }
            KeystrokeRequest::Keys { keys } => {
                let names: Vec<String> = keys.into_iter().map(|k| k.0).collect();
                self.multiplexer.send_raw_keys(pane_id, &names).await
            }
            KeystrokeRequest::Raw { bytes } => {
                let text = String::from_utf8_lossy(&bytes).into_owned();
                self.multiplexer.send_raw_keys(pane_id, &[text]).await
            }
        }
    }

    /// Drop cached state for a pane, forcing the next `get_screen` to return
    /// a full snapshot (e.g. after the pane is killed and recreated).
    pub async fn forget(&self, pane_id: &str) {
        self.state.lock().await.remove(pane_id);
    }
}

fn cursor_for(pane_id: &str, generation: u64) -> Cursor {
    Cursor(format!("{pane_id}:{generation}"))
}

fn generation_of(cursor: &Cursor) -> u64 {
    cursor.0.rsplit(':').next().and_then(|s| s.parse().ok()).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    use crate::pane::multiplexer::PaneInfo;

    struct FakeMultiplexer {
        screens: Mutex<Vec<String>>,
        sent: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl MultiplexerAdapter for FakeMultiplexer {
        async fn send_text(&self, _pane_id: &str, _text: &str, _no_paste: bool) -> Result<(), CoreError> {
            self.sent.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        async fn send_raw_keys(&self, _pane_id: &str, _keys: &[String]) -> Result<(), CoreError> {
            Ok(())
        }
        async fn capture_pane(&self, _pane_id: &str) -> Result<String, CoreError> {
            let mut screens = self.screens.lock().await;
            if screens.len() > 1 {
                Ok(screens.remove(0))
            } else {
                Ok(screens[0].clone())
            }
        }
        async fn activate_pane(&self, _pane_id: &str) -> Result<(), CoreError> {
            Ok(())
        }
        async fn kill_pane(&self, _pane_id: &str) -> Result<(), CoreError> {
            Ok(())
        }
        async fn list_panes(&self) -> Result<Vec<PaneInfo>, CoreError> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn first_capture_is_full_then_delta() {
        let mux = FakeMultiplexer {
            screens: Mutex::new(vec!["a\nb\nc".to_owned(), "a\nx\nc".to_owned()]),
            sent: Arc::new(AtomicUsize::new(0)),
        };
        let gateway = ScreenGateway::new(Arc::new(mux), &[], 50);

        let first = gateway.get_screen("pane1").await.unwrap();
        assert!(matches!(first, ScreenResponse::Full { .. }));

        let second = gateway.get_screen("pane1").await.unwrap();
        match second {
            ScreenResponse::Delta { deltas, .. } => assert!(!deltas.is_empty()),
            ScreenResponse::Full { .. } => panic!("expected a delta on the second call"),
        }
    }

    #[tokio::test]
    async fn dangerous_text_is_rejected_without_opt_in() {
        let mux = FakeMultiplexer {
            screens: Mutex::new(vec!["$".to_owned()]),
            sent: Arc::new(AtomicUsize::new(0)),
        };
        let gateway = ScreenGateway::new(Arc::new(mux), &[r"rm\s+-rf\s+/".to_owned()], 50);

        let result = gateway
            .send_keystroke(
                "pane1",
                KeystrokeRequest::Text {
                    text: "rm -rf /".to_owned(),
                    with_enter: false,
                    enter_delay_ms: None,
                    allow_dangerous: false,
                },
            )
            .await;
        assert!(matches!(result, Err(CoreError::DangerousCommand)));
    }

    struct OrderedMultiplexer {
        started: Arc<tokio::sync::Notify>,
        proceed: Arc<tokio::sync::Notify>,
    }

    #[async_trait]
    impl MultiplexerAdapter for OrderedMultiplexer {
        async fn send_text(&self, _pane_id: &str, _text: &str, _no_paste: bool) -> Result<(), CoreError> {
            Ok(())
        }
        async fn send_raw_keys(&self, _pane_id: &str, _keys: &[String]) -> Result<(), CoreError> {
            Ok(())
        }
        async fn capture_pane(&self, _pane_id: &str) -> Result<String, CoreError> {
            self.started.notify_one();
            self.proceed.notified().await;
            Ok("a\nb\nold".to_owned())
        }
        async fn activate_pane(&self, _pane_id: &str) -> Result<(), CoreError> {
            Ok(())
        }
        async fn kill_pane(&self, _pane_id: &str) -> Result<(), CoreError> {
            Ok(())
        }
        async fn list_panes(&self) -> Result<Vec<PaneInfo>, CoreError> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn invariant_1_slower_capture_does_not_regress_a_newer_cached_screen() {
        let started = Arc::new(tokio::sync::Notify::new());
        let proceed = Arc::new(tokio::sync::Notify::new());
        let gateway = Arc::new(ScreenGateway::new(
            Arc::new(OrderedMultiplexer { started: started.clone(), proceed: proceed.clone() }),
            &[],
            50,
        ));

        let slow = gateway.clone();
        let slow_call = tokio::spawn(async move { slow.get_screen("pane1").await });

        // Let the slow call begin its request (claiming the pane scope) and
        // block inside the capture itself before a second, newer call lands.
        started.notified().await;

        gateway.state.lock().await.insert(
            "pane1".to_owned(),
            PaneState { lines: vec!["a".to_owned(), "b".to_owned(), "fresh".to_owned()], generation: 7 },
        );
        let _newer_token = gateway.requests.begin_request("pane1");

        proceed.notify_one();
        slow_call.await.unwrap().unwrap();

        let cached = gateway.state.lock().await;
        assert_eq!(cached.get("pane1").unwrap().lines, vec!["a".to_owned(), "b".to_owned(), "fresh".to_owned()]);
    }

    #[tokio::test]
    async fn dangerous_text_allowed_with_opt_in() {
        let sent = Arc::new(AtomicUsize::new(0));
        let mux = FakeMultiplexer { screens: Mutex::new(vec!["$".to_owned()]), sent: sent.clone() };
        let gateway = ScreenGateway::new(Arc::new(mux), &[r"rm\s+-rf\s+/".to_owned()], 50);

        let result = gateway
            .send_keystroke(
                "pane1",
                KeystrokeRequest::Text {
                    text: "rm -rf /".to_owned(),
                    with_enter: false,
                    enter_delay_ms: None,
                    allow_dangerous: true,
                },
            )
            .await;
        assert!(result.is_ok());
        assert_eq!(sent.load(Ordering::SeqCst), 1);
    }
}
