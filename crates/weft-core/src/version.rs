//! Version ranges for crate and toolchain gating.
//!
//! A range is written `[start,end)`. Either bound may be empty, meaning the
//! range is open on that side: `[1.2.0,)` accepts every version from 1.2.0 on,
//! `[,2.0.0)` everything before 2.0.0. Versions are semver; `1` and `1.2` are
//! read as `1.0.0` and `1.2.0`.

use miette::Diagnostic;
use regex::Regex;
use semver::Version;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// A malformed range or version string.
#[derive(Debug, thiserror::Error, Diagnostic)]
pub enum MatchError {
    /// The range does not follow `[start,end)`.
    #[error("malformed version range `{range}`: {reason}")]
    #[diagnostic(
        code(weft::version::range),
        help("ranges look like `[1.2.0,2.0.0)`; leave a bound empty to leave it open")
    )]
    MalformedRange {
        /// The range as written.
        range: String,
        /// What is wrong with it.
        reason: &'static str,
    },

    /// A bound or probe is not a version.
    #[error("invalid version `{version}`: {source}")]
    #[diagnostic(code(weft::version::invalid))]
    InvalidVersion {
        /// The version as written.
        version: String,
        /// Underlying semver error.
        source: semver::Error,
    },
}

/// Half-open version interval.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct VersionRange {
    start: Option<Version>,
    end: Option<Version>,
}

impl VersionRange {
    /// The range accepting every version.
    #[must_use]
    pub fn any() -> Self {
        Self::default()
    }

    /// Parses `[start,end)`. Whitespace is ignored.
    ///
    /// # Errors
    ///
    /// Returns [`MatchError`] if the brackets or the comma are missing, or a
    /// bound is not a version.
    pub fn parse(range: &str) -> Result<Self, MatchError> {
        let compact: String = range.chars().filter(|c| !c.is_whitespace()).collect();
        let malformed = |reason| MatchError::MalformedRange {
            range: range.to_string(),
            reason,
        };

        let inner = compact
            .strip_prefix('[')
            .ok_or_else(|| malformed("expected `[` at the start"))?
            .strip_suffix(')')
            .ok_or_else(|| malformed("expected `)` at the end"))?;
        let (start, end) = inner
            .split_once(',')
            .ok_or_else(|| malformed("expected `,` between the bounds"))?;
        if end.contains(',') {
            return Err(malformed("expected exactly two bounds"));
        }

        let bound = |s: &str| {
            if s.is_empty() {
                Ok(None)
            } else {
                parse_version(s).map(Some)
            }
        };
        Ok(Self {
            start: bound(start)?,
            end: bound(end)?,
        })
    }

    /// Returns `true` if `start <= version < end`.
    #[must_use]
    pub fn contains(&self, version: &Version) -> bool {
        let above = self.start.as_ref().map_or(true, |s| version >= s);
        let below = self.end.as_ref().map_or(true, |e| version < e);
        above && below
    }
}

impl FromStr for VersionRange {
    type Err = MatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for VersionRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let show = |v: &Option<Version>| v.as_ref().map(ToString::to_string).unwrap_or_default();
        write!(f, "[{},{})", show(&self.start), show(&self.end))
    }
}

/// Parses a version, padding missing minor and patch components with zero.
///
/// # Errors
///
/// Returns [`MatchError::InvalidVersion`] for anything that is still not
/// semver after padding, including a leading `v`.
pub fn parse_version(version: &str) -> Result<Version, MatchError> {
    let trimmed = version.trim();
    let core_end = trimmed
        .find(|c| c == '-' || c == '+')
        .unwrap_or(trimmed.len());
    let (core, suffix) = trimmed.split_at(core_end);
    let padded = match core.split('.').count() {
        1 => format!("{core}.0.0{suffix}"),
        2 => format!("{core}.0{suffix}"),
        _ => trimmed.to_string(),
    };
    Version::parse(&padded).map_err(|source| MatchError::InvalidVersion {
        version: version.to_string(),
        source,
    })
}

/// Checks a version against a range string.
///
/// An empty range accepts everything, including an unknown version. A
/// constrained range never accepts an unknown version.
///
/// # Errors
///
/// Returns [`MatchError`] if the range or the version is malformed.
pub fn version_matches(range: &str, version: Option<&str>) -> Result<bool, MatchError> {
    if range.trim().is_empty() {
        return Ok(true);
    }
    let range = VersionRange::parse(range)?;
    match version {
        Some(v) => Ok(range.contains(&parse_version(v)?)),
        None => Ok(false),
    }
}

/// Extracts the version encoded in a registry source path.
///
/// Cargo unpacks registry crates into `<name>-<version>/`, so the last path
/// component of that shape carries the version.
#[must_use]
pub fn version_from_path(path: &Path) -> Option<Version> {
    let re = Regex::new(r"^[A-Za-z0-9_\-]+?-(\d+\.\d+\.\d+(?:-[0-9A-Za-z.\-]+)?(?:\+[0-9A-Za-z.\-]+)?)$")
        .ok()?;
    path.ancestors()
        .filter_map(|p| p.file_name()?.to_str())
        .find_map(|name| re.captures(name))
        .and_then(|caps| Version::parse(&caps[1]).ok())
}

/// Extracts the version from `rustc -V` output, e.g. `rustc 1.82.0 (f6e511eec 2024-10-15)`.
#[must_use]
pub fn toolchain_version_from_output(output: &str) -> Option<Version> {
    output
        .split_whitespace()
        .nth(1)
        .and_then(|v| parse_version(v).ok())
}
