//! The closed error taxonomy propagated to every caller of the core.

use thiserror::Error;

/// Severity attached to a [`CoreError`] when it is surfaced as a snapshot issue.
///
/// Token-lookup and mapping issues are warnings: they attach to an otherwise
/// valid snapshot. Transport errors are warnings when a prior valid snapshot
/// exists (degraded mode) and errors when there is nothing to fall back on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Attaches to an otherwise-successful result.
    Warning,
    /// No valid result is available.
    Error,
}

/// Closed taxonomy of errors the core can produce, per the error handling design.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// No usable credential for an upstream identity.
    #[error("no usable credential found")]
    TokenNotFound,

    /// Upstream reports an auth failure (HTTP 401/403, refresh 400/401).
    #[error("credential rejected by upstream: {reason}")]
    TokenInvalid {
        /// Diagnostic detail from the failing response.
        reason: String,
    },

    /// Network error, non-auth non-2xx response, or timeout.
    #[error("upstream unavailable: {reason}")]
    UpstreamUnavailable {
        /// Diagnostic detail.
        reason: String,
    },

    /// Response shape did not match the parser's contract.
    #[error("unsupported response shape: {reason}")]
    UnsupportedResponse {
        /// Diagnostic detail.
        reason: String,
    },

    /// Uncategorized failure inside the core.
    #[error("internal error: {reason}")]
    Internal {
        /// Diagnostic detail.
        reason: String,
    },

    /// The Codex JSON-RPC subprocess could not be launched, crashed, or timed
    /// out during the handshake.
    #[error("codex app-server unavailable: {reason}")]
    CodexAppServerUnavailable {
        /// Diagnostic detail.
        reason: String,
    },

    /// Pricing is disabled in configuration.
    #[error("pricing not configured")]
    PricingNotConfigured,

    /// The pricing catalog could not be fetched.
    #[error("pricing fetch failed: {reason}")]
    PricingFetchFailed {
        /// Diagnostic detail.
        reason: String,
    },

    /// The pricing cache is older than the stale-serviceable window.
    #[error("pricing cache too old")]
    PricingCacheTooOld,

    /// No resolution strategy (exact/prefix/alias/fallback) produced a match.
    #[error("no catalog entry for model {model_id}")]
    ModelMappingMissing {
        /// The model ID that could not be mapped.
        model_id: String,
    },

    /// A catalog entry was found but carries no usable price.
    #[error("no price for model {model_id}")]
    ModelPriceMissing {
        /// The model ID with no usable price.
        model_id: String,
    },

    /// No cost source (token usage or pricing) was available.
    #[error("cost source unavailable: {reason}")]
    CostSourceUnavailable {
        /// Diagnostic detail.
        reason: String,
    },

    /// The wezterm CLI reported no running instance.
    #[error("wezterm unavailable: {reason}")]
    WeztermUnavailable {
        /// Diagnostic detail, usually wezterm's stderr.
        reason: String,
    },

    /// The multiplexer reported the pane ID does not exist.
    #[error("pane {pane_id} not found")]
    InvalidPane {
        /// The pane ID that was rejected.
        pane_id: String,
    },

    /// The tmux CLI is unavailable (reserved for a tmux adapter).
    #[error("tmux unavailable: {reason}")]
    TmuxUnavailable {
        /// Diagnostic detail.
        reason: String,
    },

    /// A caller exceeded an internal rate limit.
    #[error("rate limited")]
    RateLimit,

    /// A keystroke or text payload matched a dangerous-command pattern.
    #[error("dangerous command rejected")]
    DangerousCommand,
}

impl CoreError {
    /// The severity this error carries when attached to a snapshot.
    ///
    /// Transport-style errors (`UpstreamUnavailable`, `CodexAppServerUnavailable`,
    /// pricing fetch failures) are context-dependent in the spec (warning in
    /// degraded mode, error with no prior value) — callers that know whether a
    /// prior valid snapshot exists should prefer [`Self::severity_given_prior`].
    /// This method returns the severity assuming no prior value is available.
    #[must_use]
    pub const fn severity(&self) -> Severity {
        match self {
            Self::TokenNotFound
            | Self::TokenInvalid { .. }
            | Self::ModelMappingMissing { .. }
            | Self::ModelPriceMissing { .. }
            | Self::PricingCacheTooOld => Severity::Warning,
            _ => Severity::Error,
        }
    }

    /// Severity given whether a prior valid snapshot exists for this scope.
    #[must_use]
    pub const fn severity_given_prior(&self, has_prior_value: bool) -> Severity {
        match self {
            Self::TokenNotFound
            | Self::TokenInvalid { .. }
            | Self::ModelMappingMissing { .. }
            | Self::ModelPriceMissing { .. }
            | Self::PricingCacheTooOld => Severity::Warning,
            Self::UpstreamUnavailable { .. }
            | Self::CodexAppServerUnavailable { .. }
            | Self::PricingFetchFailed { .. }
            | Self::CostSourceUnavailable { .. } => {
                if has_prior_value {
                    Severity::Warning
                } else {
                    Severity::Error
                }
            }
            _ => Severity::Error,
        }
    }

    /// The stable machine-readable code for this variant, as named in the taxonomy.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::TokenNotFound => "TOKEN_NOT_FOUND",
            Self::TokenInvalid { .. } => "TOKEN_INVALID",
            Self::UpstreamUnavailable { .. } => "UPSTREAM_UNAVAILABLE",
            Self::UnsupportedResponse { .. } => "UNSUPPORTED_RESPONSE",
            Self::Internal { .. } => "INTERNAL",
            Self::CodexAppServerUnavailable { .. } => "CODEX_APP_SERVER_UNAVAILABLE",
            Self::PricingNotConfigured => "PRICING_NOT_CONFIGURED",
            Self::PricingFetchFailed { .. } => "PRICING_FETCH_FAILED",
            Self::PricingCacheTooOld => "PRICING_CACHE_TOO_OLD",
            Self::ModelMappingMissing { .. } => "MODEL_MAPPING_MISSING",
            Self::ModelPriceMissing { .. } => "MODEL_PRICE_MISSING",
            Self::CostSourceUnavailable { .. } => "COST_SOURCE_UNAVAILABLE",
            Self::WeztermUnavailable { .. } => "WEZTERM_UNAVAILABLE",
            Self::InvalidPane { .. } => "INVALID_PANE",
            Self::TmuxUnavailable { .. } => "TMUX_UNAVAILABLE",
            Self::RateLimit => "RATE_LIMIT",
            Self::DangerousCommand => "DANGEROUS_COMMAND",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_lookup_errors_are_warnings() {
        assert_eq!(CoreError::TokenNotFound.severity(), Severity::Warning);
        assert_eq!(
            CoreError::ModelMappingMissing {
                model_id: "x".to_owned()
            }
            .severity(),
            Severity::Warning
        );
    }

    #[test]
    fn transport_error_escalates_without_prior_value() {
        let err = CoreError::UpstreamUnavailable {
            reason: "timeout".to_owned(),
        };
        assert_eq!(err.severity_given_prior(true), Severity::Warning);
        assert_eq!(err.severity_given_prior(false), Severity::Error);
    }

    #[test]
    fn codes_match_taxonomy() {
        assert_eq!(CoreError::RateLimit.code(), "RATE_LIMIT");
        assert_eq!(CoreError::DangerousCommand.code(), "DANGEROUS_COMMAND");
    }
}
