//! Version selection for plugins.
//!
//! Plugins publish arbitrary version strings. Selection keeps only the
//! semantically valid ones, narrows them by a [`StabilityTier`] and picks the
//! highest by semver precedence. A leading `v` is accepted and preserved in
//! the returned string.

use semver::Version;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum VersionError {
    #[error("version '{input}' is not a valid semantic version: {source}")]
    Invalid {
        input: String,
        #[source]
        source: semver::Error,
    },
    #[error("unknown stability tier '{0}', expected one of: none, alpha, experimental, all")]
    UnknownTier(String),
}

/// Which versions are eligible for automatic selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StabilityTier {
    /// Releases only
    #[default]
    None,
    /// Releases plus `alpha*` prereleases without build metadata
    Alpha,
    /// Anything without build metadata
    Experimental,
    /// Every valid version
    All,
}

impl StabilityTier {
    /// Whether a parsed version may be selected under this tier.
    pub fn admits(&self, version: &Version) -> bool {
        let released = version.pre.is_empty() && version.build.is_empty();
        match self {
            StabilityTier::None => released,
            StabilityTier::Alpha => {
                released || (version.pre.as_str().starts_with("alpha") && version.build.is_empty())
            }
            StabilityTier::Experimental => version.build.is_empty(),
            StabilityTier::All => true,
        }
    }
}

impl fmt::Display for StabilityTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StabilityTier::None => write!(f, "none"),
            StabilityTier::Alpha => write!(f, "alpha"),
            StabilityTier::Experimental => write!(f, "experimental"),
            StabilityTier::All => write!(f, "all"),
        }
    }
}

impl FromStr for StabilityTier {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "none" => Ok(StabilityTier::None),
            "alpha" => Ok(StabilityTier::Alpha),
            "experimental" => Ok(StabilityTier::Experimental),
            "all" => Ok(StabilityTier::All),
            other => Err(VersionError::UnknownTier(other.to_string())),
        }
    }
}

/// Parse a plugin version, allowing an optional leading `v`.
pub fn parse_version(input: &str) -> Result<Version, VersionError> {
    let trimmed = input.strip_prefix('v').unwrap_or(input);
    Version::parse(trimmed).map_err(|source| VersionError::Invalid {
        input: input.to_string(),
        source,
    })
}

pub fn is_valid(input: &str) -> bool {
    parse_version(input).is_ok()
}

/// Drop every string that is not a valid semantic version, keeping order.
pub fn filter_versions<S: AsRef<str>>(versions: &[S]) -> Vec<String> {
    versions
        .iter()
        .map(|v| v.as_ref())
        .filter(|v| is_valid(v))
        .map(str::to_string)
        .collect()
}

/// Select the highest version eligible under `tier`.
///
/// Returns an empty string when no candidate survives. Build metadata never
/// affects ordering.
pub fn find_version<S: AsRef<str>>(versions: &[S], tier: StabilityTier) -> String {
    let mut best: Option<(Version, &str)> = None;

    for raw in versions.iter().map(|v| v.as_ref()) {
        let Ok(parsed) = parse_version(raw) else {
            continue;
        };
        if !tier.admits(&parsed) {
            continue;
        }
        let replace = match &best {
            Some((current, _)) => parsed.cmp_precedence(current) == Ordering::Greater,
            None => true,
        };
        if replace {
            best = Some((parsed, raw));
        }
    }

    best.map(|(_, raw)| raw.to_string()).unwrap_or_default()
}

/// Compare two version strings by semver precedence.
pub fn compare(a: &str, b: &str) -> Result<Ordering, VersionError> {
    Ok(parse_version(a)?.cmp_precedence(&parse_version(b)?))
}

/// Check whether `candidates` offers something newer than `installed` under `tier`.
pub fn has_update<S: AsRef<str>>(installed: &str, candidates: &[S], tier: StabilityTier) -> bool {
    let latest = find_version(candidates, tier);
    if latest.is_empty() {
        return false;
    }
    matches!(compare(&latest, installed), Ok(Ordering::Greater))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_versions() {
        let versions = ["v0.0.1", "dev", "bad.version.not.semver", "v0.0.2"];
        assert_eq!(filter_versions(&versions), vec!["v0.0.1", "v0.0.2"]);
    }

    #[test]
    fn test_tier_none_skips_prereleases() {
        let versions = ["v0.0.1", "v1.3.0-rc.1", "v1.3.0-pre-alpha-1"];
        assert_eq!(find_version(&versions, StabilityTier::None), "v0.0.1");
    }

    #[test]
    fn test_tier_all_takes_highest_prerelease() {
        let versions = ["v0.0.1", "v1.3.0-rc.1", "v1.3.0-pre-alpha-1"];
        assert_eq!(find_version(&versions, StabilityTier::All), "v1.3.0-rc.1");
    }

    #[test]
    fn test_tier_alpha() {
        let versions = ["v0.0.1", "v1.3.0-rc.1", "v1.4.0-alpha", "v1.5.0-alpha+meta1234"];
        assert_eq!(find_version(&versions, StabilityTier::Alpha), "v1.4.0-alpha");
    }

    #[test]
    fn test_tier_experimental_excludes_build_metadata() {
        let versions = [
            "v0.0.1",
            "v1.3.0-rc.1",
            "v1.4.0-random-nonalpha",
            "v1.4.1-rc.1+build546",
        ];
        assert_eq!(
            find_version(&versions, StabilityTier::Experimental),
            "v1.4.0-random-nonalpha"
        );
    }

    #[test]
    fn test_release_wins_over_prereleases() {
        let versions = [
            "v0.0.1",
            "v1.3.0",
            "v1.3.0-rc.1",
            "v1.3.0-pre-alpha-1",
            "v1.3.0-rc.1+build546",
        ];
        for tier in [
            StabilityTier::None,
            StabilityTier::Alpha,
            StabilityTier::Experimental,
            StabilityTier::All,
        ] {
            assert_eq!(find_version(&versions, tier), "v1.3.0", "tier {}", tier);
        }
    }

    #[test]
    fn test_tier_all_admits_build_metadata() {
        let versions = ["v1.0.0", "v1.1.0-rc.1+build7"];
        assert_eq!(find_version(&versions, StabilityTier::All), "v1.1.0-rc.1+build7");
    }

    #[test]
    fn test_no_candidate_is_empty() {
        let versions = ["dev", "v2.0.0-beta.1"];
        assert_eq!(find_version(&versions, StabilityTier::None), "");
        assert_eq!(find_version::<&str>(&[], StabilityTier::All), "");
    }

    #[test]
    fn test_has_update() {
        let versions = ["v1.0.0", "v1.1.0", "v1.2.0-alpha.1"];
        assert!(has_update("v1.0.0", &versions, StabilityTier::None));
        assert!(!has_update("v1.1.0", &versions, StabilityTier::None));
        assert!(has_update("v1.1.0", &versions, StabilityTier::Alpha));
        assert!(!has_update("dev", &versions, StabilityTier::None));
    }

    #[test]
    fn test_tier_parsing() {
        assert_eq!("Experimental".parse::<StabilityTier>().unwrap(), StabilityTier::Experimental);
        assert_eq!("".parse::<StabilityTier>().unwrap(), StabilityTier::None);
        assert!("beta".parse::<StabilityTier>().is_err());
    }
}
