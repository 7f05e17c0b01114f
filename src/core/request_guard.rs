//! Request Guard: the normative source of truth for which outcome wins when
//! calls to the same scope overlap.
//!
//! For each logically concurrent stream of calls (a pane, a pane+worktree
//! tuple, a provider) this holds a monotonic counter and the currently active
//! scope key. A call's outcome is only published if no later call with the
//! same scope has since been issued.

use dashmap::DashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Opaque token returned by [`RequestGuard::begin_request`]. Carries enough
/// state for [`RequestGuard::is_current`] to decide if its outcome is stale.
#[derive(Debug, Clone)]
pub struct RequestToken {
    scope: String,
    counter: u64,
    state: Arc<GuardState>,
}

#[derive(Debug, Default)]
struct GuardState {
    counter: AtomicU64,
}

/// Per-scope monotonic request counters, keyed by an arbitrary scope string
/// (e.g. `"{paneId}:{worktreePath}"` or a provider ID).
#[derive(Debug, Default)]
pub struct RequestGuard {
    scopes: DashMap<String, Arc<GuardState>>,
}

impl RequestGuard {
    /// Construct an empty guard.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomically reads-and-increments the counter for `scope`, capturing it
    /// at launch.
    #[must_use]
    pub fn begin_request(&self, scope: impl Into<String>) -> RequestToken {
        let scope = scope.into();
        let state = self
            .scopes
            .entry(scope.clone())
            .or_insert_with(|| Arc::new(GuardState::default()))
            .clone();
        let counter = state.counter.fetch_add(1, Ordering::SeqCst) + 1;
        RequestToken {
            scope,
            counter,
            state,
        }
    }

    /// `true` iff no later call to the same scope has been issued since
    /// `token` was created.
    #[must_use]
    pub fn is_current(&self, token: &RequestToken) -> bool {
        token.state.counter.load(Ordering::SeqCst) == token.counter
    }

    /// Run `run`, then dispatch to `on_success`/`on_error` only if the token
    /// is still current at completion time; `on_settled` always runs (e.g. to
    /// clear a loading flag), regardless of staleness.
    pub async fn run_guarded<T, E, Fut, OnSuccess, OnError, OnSettled>(
        &self,
        scope: impl Into<String>,
        run: impl FnOnce() -> Fut,
        on_success: OnSuccess,
        on_error: OnError,
        on_settled: OnSettled,
    ) where
        Fut: std::future::Future<Output = Result<T, E>>,
        OnSuccess: FnOnce(T),
        OnError: FnOnce(E),
        OnSettled: FnOnce(),
    {
        let token = self.begin_request(scope);
        let outcome = run().await;
        on_settled();
        if !self.is_current(&token) {
            return;
        }
        match outcome {
            Ok(value) => on_success(value),
            Err(err) => on_error(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn later_request_invalidates_earlier_token() {
        let guard = RequestGuard::new();
        let first = guard.begin_request("pane-1");
        let _second = guard.begin_request("pane-1");
        assert!(!guard.is_current(&first));
    }

    #[test]
    fn distinct_scopes_do_not_interfere() {
        let guard = RequestGuard::new();
        let a = guard.begin_request("pane-1");
        let _b = guard.begin_request("pane-2");
        assert!(guard.is_current(&a));
    }

    #[tokio::test]
    async fn stale_outcome_is_dropped() {
        let guard = RequestGuard::new();
        let published = Arc::new(Mutex::new(Vec::new()));

        let token_publisher = published.clone();
        let first = async {
            guard
                .run_guarded(
                    "pane-1",
                    || async {
                        // Simulate the first call being superseded mid-flight.
                        Ok::<_, ()>(1)
                    },
                    |v| token_publisher.lock().unwrap().push(v),
                    |_: ()| {},
                    || {},
                )
                .await;
        };

        // Issue a second call to the same scope before the first's future
        // actually awaits its guarded completion, then await both.
        let _second_token = guard.begin_request("pane-1");
        first.await;

        assert!(published.lock().unwrap().is_empty());
    }
}
