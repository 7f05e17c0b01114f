//! Shared application state handed to every HTTP handler. No business logic
//! lives here or in `routes.rs`: handlers call straight into the core
//! components and wrap the result in `Json`.

use std::sync::Arc;

use crate::config::CoreConfig;
use crate::git::GitCache;
use crate::pane::multiplexer::MultiplexerAdapter;
use crate::screen::ScreenGateway;
use crate::usage::UsageDashboard;

/// Everything a handler needs, cloned cheaply per request (every field is an
/// `Arc`).
#[derive(Clone)]
pub struct AppState {
    /// Effective configuration, for handlers that need a tunable directly
    /// (e.g. the commit page size).
    pub config: Arc<CoreConfig>,
    /// Per-pane diff/commit cache.
    pub git_cache: Arc<GitCache>,
    /// Per-pane screen capture and keystroke dispatch.
    pub screen_gateway: Arc<ScreenGateway>,
    /// Two-tier usage snapshot + cost dashboard.
    pub dashboard: Arc<UsageDashboard>,
    /// Direct multiplexer access for pane focus/kill, which the Screen
    /// Gateway doesn't otherwise expose.
    pub multiplexer: Arc<dyn MultiplexerAdapter>,
}
