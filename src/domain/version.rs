use std::{fmt, str::FromStr};

use thiserror::Error;

/// Semantic version reported by a wkhtmltopdf-family binary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BinaryVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl BinaryVersion {
    /// Assumed when the binary cannot be probed.
    pub const DEFAULT: BinaryVersion = BinaryVersion::new(0, 9, 9);
    /// From this version on, page-object keywords (`cover`, `toc`) are bare words.
    pub const WITHOUT_DASHES: BinaryVersion = BinaryVersion::new(0, 12, 0);

    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    pub fn uses_bare_page_objects(self) -> bool {
        self >= Self::WITHOUT_DASHES
    }

    /// Find the first version-looking token in `--version` output such as
    /// `wkhtmltopdf 0.12.6 (with patched qt)`.
    pub fn from_version_output(output: &str) -> Option<Self> {
        output
            .split_whitespace()
            .find_map(|token| token.trim_start_matches('v').parse().ok())
    }
}

impl Default for BinaryVersion {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl fmt::Display for BinaryVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid binary version `{0}`")]
pub struct ParseVersionError(String);

impl FromStr for BinaryVersion {
    type Err = ParseVersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ParseVersionError(s.to_string());
        let mut parts = s.split('.');
        let major = parts
            .next()
            .and_then(|p| p.parse().ok())
            .ok_or_else(invalid)?;
        let minor = parts
            .next()
            .and_then(|p| p.parse().ok())
            .ok_or_else(invalid)?;
        let patch = match parts.next() {
            Some(p) => p.parse().map_err(|_| invalid())?,
            None => 0,
        };
        if parts.next().is_some() {
            return Err(invalid());
        }
        Ok(Self::new(major, minor, patch))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_version_output() {
        let version = BinaryVersion::from_version_output("wkhtmltopdf 0.12.6 (with patched qt)");
        assert_eq!(version, Some(BinaryVersion::new(0, 12, 6)));
    }

    #[test]
    fn unparsable_output_yields_none() {
        assert_eq!(BinaryVersion::from_version_output("command not found"), None);
    }

    #[test]
    fn dash_threshold_is_inclusive() {
        assert!(!BinaryVersion::DEFAULT.uses_bare_page_objects());
        assert!(!BinaryVersion::new(0, 11, 9).uses_bare_page_objects());
        assert!(BinaryVersion::new(0, 12, 0).uses_bare_page_objects());
        assert!(BinaryVersion::new(1, 0, 0).uses_bare_page_objects());
    }

    #[test]
    fn two_component_versions_default_patch() {
        assert_eq!("0.12".parse(), Ok(BinaryVersion::new(0, 12, 0)));
        assert!("0.12.1.4".parse::<BinaryVersion>().is_err());
    }
}
