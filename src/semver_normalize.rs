//! Semver normalizer: canonicalizes arbitrary version strings
//! into comparable triples, preserving the distinguished tags `latest` and
//! `next`. Pure and infallible: malformed input collapses to `0.0.0` rather
//! than raising.

use semver::Version as SemverVersion;
use std::fmt;

/// A normalized version: either a concrete semver triple or one of the two
/// tags that never compare numerically against a triple.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Version {
    Tag(Tag),
    Semver(SemverVersion),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tag {
    Latest,
    Next,
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tag::Latest => write!(f, "latest"),
            Tag::Next => write!(f, "next"),
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Version::Tag(t) => write!(f, "{t}"),
            Version::Semver(v) => write!(f, "{v}"),
        }
    }
}

impl Default for Version {
    fn default() -> Self {
        Version::zero()
    }
}

impl Version {
    pub fn zero() -> Self {
        Version::Semver(SemverVersion::new(0, 0, 0))
    }

    pub fn is_tag(&self) -> bool {
        matches!(self, Version::Tag(_))
    }

    pub fn as_semver(&self) -> Option<&SemverVersion> {
        match self {
            Version::Semver(v) => Some(v),
            Version::Tag(_) => None,
        }
    }
}

/// Parses `raw` as one of four degrading-precision candidates (full
/// triple, then progressively looser fallbacks) and returns the first that
/// parses as a strictly-greater-than-zero semver, else `0.0.0`.
pub fn normalize(raw: &str) -> Version {
    let (semver_part, _prerelease) = match raw.split_once('-') {
        Some((s, p)) => (s, Some(p)),
        None => (raw, None),
    };

    let parts: Vec<&str> = semver_part.split('.').collect();
    let major = parts.first().copied().unwrap_or("0");
    let minor = parts.get(1).copied().unwrap_or("0");
    let patch = parts.get(2).copied().unwrap_or("0");

    let candidates = [
        raw.to_string(),
        semver_part.to_string(),
        format!("{major}.{minor}.0"),
        format!("{major}.0.0"),
    ];

    for candidate in &candidates {
        if let Some(v) = try_parse_positive(candidate) {
            return Version::Semver(v);
        }
    }

    Version::zero()
}

/// Parses `candidate`, returning it only if it is a valid semver strictly
/// greater than `0.0.0`. `0.0.0` itself is not "recognized", it's the
/// fallback.
fn try_parse_positive(candidate: &str) -> Option<SemverVersion> {
    let v = SemverVersion::parse(candidate).ok()?;
    if v > SemverVersion::new(0, 0, 0) {
        Some(v)
    } else {
        None
    }
}

/// Passes `latest`/`next` through unchanged; otherwise delegates to `normalize`.
pub fn normalize_with_tag_check(raw: &str) -> Version {
    match raw {
        "latest" => Version::Tag(Tag::Latest),
        "next" => Version::Tag(Tag::Next),
        other => normalize(other),
    }
}

/// `gt(a, b)`: normalizes both sides, then compares as semver. Tags never
/// compare with numeric versions. Callers must branch on tag-ness first,
/// so a comparison involving a tag is always `false` here.
pub fn gt(a: &str, b: &str) -> bool {
    match (normalize_with_tag_check(a), normalize_with_tag_check(b)) {
        (Version::Semver(av), Version::Semver(bv)) => av > bv,
        _ => false,
    }
}

pub fn lte(a: &str, b: &str) -> bool {
    match (normalize_with_tag_check(a), normalize_with_tag_check(b)) {
        (Version::Semver(av), Version::Semver(bv)) => av <= bv,
        _ => false,
    }
}

pub fn version_gt(a: &Version, b: &Version) -> bool {
    match (a, b) {
        (Version::Semver(av), Version::Semver(bv)) => av > bv,
        _ => false,
    }
}

pub fn version_gte(a: &Version, b: &Version) -> bool {
    match (a, b) {
        (Version::Semver(av), Version::Semver(bv)) => av >= bv,
        _ => false,
    }
}

pub fn version_lte(a: &Version, b: &Version) -> bool {
    match (a, b) {
        (Version::Semver(av), Version::Semver(bv)) => av <= bv,
        _ => false,
    }
}

/// Canonical semver form of `raw`, or a coerced best-effort triple.
pub fn clean_semver(raw: &str) -> String {
    normalize(raw).to_string()
}

/// Whether `version` satisfies `range`, pre-releases included.
pub fn satisfies(version: &SemverVersion, range: &str) -> bool {
    let Ok(req) = semver::VersionReq::parse(range) else {
        return false;
    };
    if req.matches(version) {
        return true;
    }
    // `semver::VersionReq` ignores prereleases unless the range itself names
    // one; prerelease versions still need to be eligible here, so retry
    // against the version's release triple when the req excludes it only on
    // prerelease grounds.
    let release_only = SemverVersion::new(version.major, version.minor, version.patch);
    req.matches(&release_only)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_full_triple() {
        assert_eq!(normalize("1.2.3").to_string(), "1.2.3");
    }

    #[test]
    fn normalize_prerelease_preserved() {
        assert_eq!(normalize("1.2.3-beta.0").to_string(), "1.2.3-beta.0");
    }

    #[test]
    fn normalize_partial_falls_back_to_lower_precision() {
        assert_eq!(normalize("1.2").to_string(), "1.2.0");
        assert_eq!(normalize("1").to_string(), "1.0.0");
    }

    #[test]
    fn normalize_garbage_falls_back_to_zero() {
        assert_eq!(normalize("not-a-version").to_string(), "0.0.0");
        assert_eq!(normalize("").to_string(), "0.0.0");
    }

    #[test]
    fn tag_pass_through() {
        assert_eq!(normalize_with_tag_check("latest"), Version::Tag(Tag::Latest));
        assert_eq!(normalize_with_tag_check("next"), Version::Tag(Tag::Next));
        assert!(matches!(normalize_with_tag_check("1.0.0"), Version::Semver(_)));
    }

    #[test]
    fn gt_and_lte() {
        assert!(gt("2.0.0", "1.0.0"));
        assert!(!gt("1.0.0", "1.0.0"));
        assert!(lte("1.0.0", "1.0.0"));
        assert!(lte("1.0.0", "2.0.0"));
    }

    #[test]
    fn tags_never_compare_numerically() {
        assert!(!gt("latest", "1.0.0"));
        assert!(!lte("latest", "1.0.0"));
    }
}
