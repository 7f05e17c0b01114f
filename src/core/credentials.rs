//! Credential Resolver: produces an ordered, de-duplicated list of candidate
//! `(accessToken, refreshToken?)` pairs from environment, platform keychain,
//! and a JSON credentials file.

use serde::Deserialize;
use serde_json::Value;
use std::path::PathBuf;

use super::subprocess::{SubprocessAdapter, SubprocessOptions};

/// The default Claude OAuth client ID, used when refreshing tokens and when
/// no override is set via `CLAUDE_CODE_OAUTH_CLIENT_ID`.
pub const DEFAULT_OAUTH_CLIENT_ID: &str = "9d1c250a-e61b-44d9-88ed-5944d1962f5e";

/// A single candidate credential.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    /// Bearer access token.
    pub access_token: String,
    /// OAuth refresh token, if one was found alongside the access token.
    pub refresh_token: Option<String>,
    /// Human-readable description of where this candidate came from, for logs.
    pub source: &'static str,
}

/// Resolves credentials for a named identity (e.g. `"claude"`) from the
/// environment, the platform keychain, and a JSON file, in that priority
/// order, de-duplicated by access token.
#[derive(Debug, Clone)]
pub struct CredentialResolver {
    subprocess: SubprocessAdapter,
}

impl Default for CredentialResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl CredentialResolver {
    /// Construct a resolver.
    #[must_use]
    pub fn new() -> Self {
        Self {
            subprocess: SubprocessAdapter::new(),
        }
    }

    /// Resolve candidates for the Claude identity: `CLAUDE_CODE_OAUTH_TOKEN`,
    /// the `claude-code` keychain service (with an account-suffix scan on
    /// macOS), then `~/.claude/.credentials.json`.
    #[tracing::instrument(skip(self))]
    pub async fn resolve_claude(&self) -> Vec<Credential> {
        let mut candidates = Vec::new();

        if let Ok(token) = std::env::var("CLAUDE_CODE_OAUTH_TOKEN") {
            if !token.is_empty() {
                push_deduped(
                    &mut candidates,
                    Credential {
                        access_token: token,
                        refresh_token: None,
                        source: "environment",
                    },
                );
            }
        }

        for cred in self.keychain_candidates("Claude Code-credentials").await {
            push_deduped(&mut candidates, cred);
        }

        if let Some(cred) = Self::file_candidate(&default_credentials_file_path()) {
            push_deduped(&mut candidates, cred);
        }

        tracing::debug!(count = candidates.len(), "resolved credential candidates");
        candidates
    }

    /// Candidates from the platform keychain under `service`. On macOS,
    /// additionally scans `security dump-keychain` output for service names
    /// that share `service` as a prefix (letting one machine hold multiple
    /// accounts under suffixed service names).
    async fn keychain_candidates(&self, service: &str) -> Vec<Credential> {
        let mut out = Vec::new();

        let entry = keyring::Entry::new(service, &whoami_account());
        if let Ok(entry) = entry {
            if let Ok(secret) = entry.get_password() {
                if let Some(cred) = parse_credential_blob(&secret, "keychain") {
                    out.push(cred);
                }
            }
        }

        if cfg!(target_os = "macos") {
            out.extend(self.scan_macos_keychain_suffixes(service).await);
        }

        out
    }

    async fn scan_macos_keychain_suffixes(&self, prefix: &str) -> Vec<Credential> {
        let options = SubprocessOptions {
            allow_stdout_on_error: true,
            ..Default::default()
        };
        let Ok(output) = self
            .subprocess
            .run("security", &["dump-keychain"], None, &options)
            .await
        else {
            return Vec::new();
        };

        let mut services = Vec::new();
        for line in output.stdout.lines() {
            let trimmed = line.trim();
            if let Some(rest) = trimmed.strip_prefix("\"svce\"<blob>=") {
                let service = rest.trim_matches('"');
                if service.starts_with(prefix) && service != prefix {
                    services.push(service.to_owned());
                }
            }
        }

        let mut out = Vec::new();
        for service in services {
            if let Ok(entry) = keyring::Entry::new(&service, &whoami_account()) {
                if let Ok(secret) = entry.get_password() {
                    if let Some(cred) = parse_credential_blob(&secret, "keychain") {
                        out.push(cred);
                    }
                }
            }
        }
        out
    }

    fn file_candidate(path: &std::path::Path) -> Option<Credential> {
        let contents = std::fs::read_to_string(path).ok()?;
        parse_credential_blob(&contents, "credentials file")
    }
}

/// The fixed path to the Claude CLI's JSON credentials file.
#[must_use]
pub fn default_credentials_file_path() -> PathBuf {
    #[expect(clippy::expect_used, reason = "home directory is required to locate credentials")]
    dirs::home_dir()
        .expect("could not determine home directory")
        .join(".claude")
        .join(".credentials.json")
}

fn whoami_account() -> String {
    std::env::var("USER").unwrap_or_else(|_| "default".to_owned())
}

#[derive(Debug, Deserialize)]
struct FlatShape {
    #[serde(alias = "access_token")]
    access_token: Option<String>,
    #[serde(alias = "refresh_token")]
    refresh_token: Option<String>,
}

/// Parses a credential blob in any of three shapes: a bare token string, a
/// flat JSON object, or a nested object under `claudeAiOauth`/`oauth`/`auth`.
fn parse_credential_blob(raw: &str, source: &'static str) -> Option<Credential> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        for key in ["claudeAiOauth", "oauth", "auth"] {
            if let Some(nested) = value.get(key) {
                if let Some(flat) = extract_flat(nested) {
                    return Some(Credential {
                        access_token: flat.0,
                        refresh_token: flat.1,
                        source,
                    });
                }
            }
        }
        if let Some(flat) = extract_flat(&value) {
            return Some(Credential {
                access_token: flat.0,
                refresh_token: flat.1,
                source,
            });
        }
        return None;
    }

    // Bare token string (not valid JSON, or a JSON string literal).
    let bare = trimmed.trim_matches('"');
    if bare.is_empty() {
        None
    } else {
        Some(Credential {
            access_token: bare.to_owned(),
            refresh_token: None,
            source,
        })
    }
}

fn extract_flat(value: &Value) -> Option<(String, Option<String>)> {
    let shape: FlatShape = serde_json::from_value(value.clone()).ok()?;
    shape.access_token.map(|token| (token, shape.refresh_token))
}

/// Insert `candidate` into `candidates`, de-duplicating by access token. If
/// a duplicate is found and `candidate` supplies a refresh token the earlier
/// entry lacked, the earlier entry is upgraded in place.
fn push_deduped(candidates: &mut Vec<Credential>, candidate: Credential) {
    if let Some(existing) = candidates
        .iter_mut()
        .find(|c| c.access_token == candidate.access_token)
    {
        if existing.refresh_token.is_none() && candidate.refresh_token.is_some() {
            existing.refresh_token = candidate.refresh_token;
        }
        return;
    }
    candidates.push(candidate);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bare_token_string() {
        let cred = parse_credential_blob("sk-ant-abc123", "test").unwrap();
        assert_eq!(cred.access_token, "sk-ant-abc123");
        assert!(cred.refresh_token.is_none());
    }

    #[test]
    fn parses_flat_object_with_snake_case() {
        let blob = r#"{"access_token":"tok","refresh_token":"ref"}"#;
        let cred = parse_credential_blob(blob, "test").unwrap();
        assert_eq!(cred.access_token, "tok");
        assert_eq!(cred.refresh_token.as_deref(), Some("ref"));
    }

    #[test]
    fn parses_flat_object_with_camel_case() {
        let blob = r#"{"accessToken":"tok","refreshToken":"ref"}"#;
        let cred = parse_credential_blob(blob, "test").unwrap();
        assert_eq!(cred.access_token, "tok");
        assert_eq!(cred.refresh_token.as_deref(), Some("ref"));
    }

    #[test]
    fn parses_nested_claude_ai_oauth_shape() {
        let blob = r#"{"claudeAiOauth":{"accessToken":"file-token"}}"#;
        let cred = parse_credential_blob(blob, "test").unwrap();
        assert_eq!(cred.access_token, "file-token");
    }

    #[test]
    fn dedup_upgrades_earlier_entry_with_refresh_token() {
        let mut candidates = vec![Credential {
            access_token: "tok".to_owned(),
            refresh_token: None,
            source: "environment",
        }];
        push_deduped(
            &mut candidates,
            Credential {
                access_token: "tok".to_owned(),
                refresh_token: Some("ref".to_owned()),
                source: "file",
            },
        );
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].refresh_token.as_deref(), Some("ref"));
        assert_eq!(candidates[0].source, "environment");
    }

    #[test]
    fn dedup_does_not_duplicate_distinct_access_tokens() {
        let mut candidates = vec![Credential {
            access_token: "a".to_owned(),
            refresh_token: None,
            source: "environment",
        }];
        push_deduped(
            &mut candidates,
            Credential {
                access_token: "b".to_owned(),
                refresh_token: None,
                source: "file",
            },
        );
        assert_eq!(candidates.len(), 2);
    }
}
