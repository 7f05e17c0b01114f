//! paneforge: local-first observability and remote-control plane for AI
//! coding agent sessions running in terminal multiplexer panes.

#![warn(missing_debug_implementations)]
#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![warn(unreachable_pub)]
#![warn(elided_lifetimes_in_paths)]
#![warn(missing_copy_implementations)]
#![deny(unused_must_use)]
#![deny(unsafe_op_in_unsafe_fn)]

/// Thin HTTP/WS transport adapter over the core components.
pub mod api;
/// Application configuration loading.
pub mod config;
/// Request Guard, Subprocess Adapter, Credential Resolver, and the closed error taxonomy.
pub mod core;
/// Git Cache: per-pane diff summary and commit log.
pub mod git;
/// Pane control: the multiplexer adapter abstraction.
pub mod pane;
/// Pricing Catalog: fetched pricing document, cached and resolved per model.
pub mod pricing;
/// Usage providers: Codex (JSON-RPC) and Claude (HTTP + OAuth).
pub mod providers;
/// Visibility-gated, demand-driven background polling.
pub mod scheduler;
/// Screen Gateway: capture, delta protocol, dangerous-command guard, keystrokes.
pub mod screen;
/// Usage Dashboard, Cost Engine, and Token Source.
pub mod usage;
/// Shared utilities (paths, git repository discovery).
pub mod utils;
