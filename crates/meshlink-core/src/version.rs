//! Router/controller software versions and minimum-version checks.
//!
//! Versions are `major.minor.patch` with an optional leading `v` and an
//! optional `-suffix` (ignored). `0.0.0` is a development build and satisfies
//! every minimum.

use std::fmt;
use std::str::FromStr;

/// Controllers older than this build link keys from default bindings only and
/// don't understand the `LinkDuplicate` fault subject.
pub const LINK_MGMT_MIN_VERSION: &str = "0.30.0";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Version {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

#[derive(Debug, thiserror::Error)]
pub enum VersionError {
    #[error("empty version string")]
    Empty,
    #[error("invalid version component '{component}' in '{version}'")]
    InvalidComponent { version: String, component: String },
    #[error("too many components in '{0}'")]
    TooManyComponents(String),
}

impl Version {
    pub const DEV: Version = Version { major: 0, minor: 0, patch: 0 };

    pub fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self { major, minor, patch }
    }

    pub fn is_dev(&self) -> bool {
        *self == Self::DEV
    }

    /// True if this version is at least `min`. Dev builds always qualify.
    pub fn has_minimum(&self, min: &Version) -> bool {
        self.is_dev() || self >= min
    }

    /// Parse `min` and compare.
    pub fn has_minimum_version(&self, min: &str) -> Result<bool, VersionError> {
        Ok(self.has_minimum(&min.parse()?))
    }
}

impl FromStr for Version {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let trimmed = trimmed.strip_prefix('v').unwrap_or(trimmed);
        let core = trimmed.split(&['-', '+'][..]).next().unwrap_or_default();
        if core.is_empty() {
            return Err(VersionError::Empty);
        }

        let mut parts = [0u32; 3];
        for (i, component) in core.split('.').enumerate() {
            if i >= parts.len() {
                return Err(VersionError::TooManyComponents(s.to_string()));
            }
            parts[i] = component
                .parse()
                .map_err(|_| VersionError::InvalidComponent {
                    version: s.to_string(),
                    component: component.to_string(),
                })?;
        }

        Ok(Version::new(parts[0], parts[1], parts[2]))
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Single capability gate for pre-0.30.0 link management.
///
/// Unparseable versions count as legacy.
pub fn requires_legacy_link_mgmt(version: &str) -> bool {
    match version.parse::<Version>() {
        Ok(v) => !v.has_minimum_version(LINK_MGMT_MIN_VERSION).unwrap_or(false),
        Err(_) => true,
    }
}
