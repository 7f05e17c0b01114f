//! Usage Providers: one per upstream (Codex, Claude), each producing a
//! [`types::ProviderSnapshot`].

/// Claude HTTP provider with OAuth-refresh retry.
pub mod claude;
/// Codex JSON-RPC-over-stdio provider.
pub mod codex;
/// Shared snapshot/window/pace DTOs.
pub mod types;

pub use claude::ClaudeUsageProvider;
pub use codex::CodexUsageProvider;
pub use types::{
    BillingInfo, Pace, PaceStatus, ProviderCapabilities, ProviderSnapshot, SnapshotIssue,
    SnapshotStatus, UsageMetricWindow, WindowId,
};

use crate::core::errors::CoreError;
use crate::usage::SnapshotSource;

#[async_trait::async_trait]
impl SnapshotSource for ClaudeUsageProvider {
    async fn fetch(&self) -> Result<ProviderSnapshot, CoreError> {
        self.fetch_snapshot().await
    }
}

#[async_trait::async_trait]
impl SnapshotSource for CodexUsageProvider {
    async fn fetch(&self) -> Result<ProviderSnapshot, CoreError> {
        self.fetch_snapshot().await
    }
}
