//! Model ID resolution: exact / prefix / alias / version-fallback, in
//! decreasing confidence order. Only `exact` yields a `source=actual` cost
//! result.

use regex::Regex;
use semver::Version;
use std::sync::LazyLock;
use typeshare::typeshare;

/// A catalog row has a price if at least one of the four unit costs is
/// present and finite.
pub trait PricedRow {
    /// `true` iff this row carries at least one finite, present unit cost.
    fn has_price(&self) -> bool;
}

/// One of the four resolution strategies, in decreasing confidence order.
#[typeshare]
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResolutionStrategy {
    /// `modelId` present in the catalog verbatim.
    Exact,
    /// A provider-prefixed variant of `modelId` is present.
    Prefix,
    /// A static per-provider alias maps to a present canonical ID.
    Alias,
    /// A strictly older entry sharing the version-stripped skeleton is present.
    Fallback,
}

static VERSION_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d+(?:\.\d+){0,2}").expect("valid regex"));

/// The version-stripped "skeleton" of a model ID, with the first numeric
/// version token (e.g. `5.3`, `4`, `2024.11`) replaced by a placeholder, plus
/// the parsed version itself (padded to major.minor.patch for ordering).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionSkeleton {
    /// The model ID with its version token replaced by `"{v}"`.
    pub skeleton: String,
    /// The parsed, zero-padded version for strict-ordering comparisons.
    pub version: Version,
}

/// Parse the first numeric version token out of `model_id` and build its
/// skeleton. Returns `None` if no numeric token is present.
#[must_use]
pub fn parse_version_skeleton(model_id: &str) -> Option<VersionSkeleton> {
    let m = VERSION_TOKEN.find(model_id)?;
    let mut parts = m.as_str().split('.');
    let major = parts.next()?.parse().ok()?;
    let minor = parts.next().unwrap_or("0").parse().unwrap_or(0);
    let patch = parts.next().unwrap_or("0").parse().unwrap_or(0);

    let mut skeleton = String::with_capacity(model_id.len());
    skeleton.push_str(&model_id[..m.start()]);
    skeleton.push_str("{v}");
    skeleton.push_str(&model_id[m.end()..]);

    Some(VersionSkeleton {
        skeleton,
        version: Version::new(major, minor, patch),
    })
}

/// A candidate fallback match: the catalog key, its parsed version, and
/// which provider prefix (if any) it carries.
#[derive(Debug, Clone)]
pub struct FallbackCandidate<'a> {
    /// The catalog key this candidate was found under.
    pub catalog_key: &'a str,
    /// The candidate's parsed version.
    pub version: Version,
    /// The provider prefix this key carries, if it matched one.
    pub matched_prefix: Option<&'a str>,
}

/// Select the best fallback candidate from `candidates`, all of which are
/// already known to share the target skeleton and carry a price.
///
/// Tie-break order: closest-lower version, then an unprefixed entry over a
/// provider-prefixed variant, then same-prefix (matching `target_prefix`)
/// over a different-prefix variant.
#[must_use]
pub fn select_best_fallback<'a>(
    candidates: &[FallbackCandidate<'a>],
    target_version: &Version,
    target_prefix: Option<&str>,
) -> Option<FallbackCandidate<'a>> {
    candidates
        .iter()
        .filter(|c| &c.version < target_version)
        .min_by(|a, b| {
            b.version
                .cmp(&a.version) // closest-lower = largest version still < target
                .then_with(|| rank_prefix(a, target_prefix).cmp(&rank_prefix(b, target_prefix)))
        })
        .cloned()
}

fn rank_prefix(candidate: &FallbackCandidate<'_>, target_prefix: Option<&str>) -> u8 {
    match candidate.matched_prefix {
        None => 0,                                              // unprefixed: best
        Some(p) if Some(p) == target_prefix => 1,                // same prefix as target
        Some(_) => 2,                                            // different prefix
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_dotted_version_token() {
        let s = parse_version_skeleton("gpt-5.3-codex").unwrap();
        assert_eq!(s.skeleton, "gpt-{v}-codex");
        assert_eq!(s.version, Version::new(5, 3, 0));
    }

    #[test]
    fn parses_bare_integer_version() {
        let s = parse_version_skeleton("claude-4-opus").unwrap();
        assert_eq!(s.skeleton, "claude-{v}-opus");
        assert_eq!(s.version, Version::new(4, 0, 0));
    }

    #[test]
    fn no_numeric_token_returns_none() {
        assert!(parse_version_skeleton("claude-opus").is_none());
    }

    #[test]
    fn s4_version_fallback_prefers_closest_lower() {
        let target = Version::new(5, 3, 0);
        let candidates = vec![
            FallbackCandidate {
                catalog_key: "gpt-5.2-codex",
                version: Version::new(5, 2, 0),
                matched_prefix: None,
            },
            FallbackCandidate {
                catalog_key: "gpt-5.0-codex",
                version: Version::new(5, 0, 0),
                matched_prefix: None,
            },
        ];
        let best = select_best_fallback(&candidates, &target, None).unwrap();
        assert_eq!(best.catalog_key, "gpt-5.2-codex");
    }

    #[test]
    fn fallback_prefers_unprefixed_over_prefixed_at_same_version() {
        let target = Version::new(5, 3, 0);
        let candidates = vec![
            FallbackCandidate {
                catalog_key: "openai/gpt-5.2-codex",
                version: Version::new(5, 2, 0),
                matched_prefix: Some("openai/"),
            },
            FallbackCandidate {
                catalog_key: "gpt-5.2-codex",
                version: Version::new(5, 2, 0),
                matched_prefix: None,
            },
        ];
        let best = select_best_fallback(&candidates, &target, Some("openai/")).unwrap();
        assert_eq!(best.catalog_key, "gpt-5.2-codex");
    }

    #[test]
    fn fallback_excludes_versions_not_strictly_lower() {
        let target = Version::new(5, 3, 0);
        let candidates = vec![FallbackCandidate {
            catalog_key: "gpt-5.3-codex",
            version: Version::new(5, 3, 0),
            matched_prefix: None,
        }];
        assert!(select_best_fallback(&candidates, &target, None).is_none());
    }
}
