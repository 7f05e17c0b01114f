//! Foundational primitives shared by every component: the error taxonomy,
//! the Request Guard, the Subprocess Adapter, and the Credential Resolver.

/// Credential Resolver: environment, keychain, and credentials-file lookup.
pub mod credentials;
/// The closed `CoreError` taxonomy.
pub mod errors;
/// Request Guard: scope-keyed latest-wins request tracking.
pub mod request_guard;
/// Subprocess Adapter: timeout/cap/recovery wrapper over `tokio::process`.
pub mod subprocess;

pub use credentials::{Credential, CredentialResolver};
pub use errors::{CoreError, Severity};
pub use request_guard::{RequestGuard, RequestToken};
pub use subprocess::{SubprocessAdapter, SubprocessOptions, SubprocessOutput};
