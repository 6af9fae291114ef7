//! Packed ABI versions.
//!
//! A version is packed into 32 bits as `major << 20 | minor << 10 | patch`
//! (12/10/10 bits). Every API table starts with one so callers can check it
//! before touching members that were appended in later minor versions.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::{IsarError, Result};

/// A packed `major.minor.patch` version.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct Version(u32);

impl Version {
    /// The invalid version, used as "unset".
    pub const INVALID: Version = Version(0);

    /// The version implemented by this crate.
    pub const LATEST: Version = Version::new(2025, 0, 0);

    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Version(((major & 0xFFF) << 20) | ((minor & 0x3FF) << 10) | (patch & 0x3FF))
    }

    pub const fn from_packed(packed: u32) -> Self {
        Version(packed)
    }

    pub const fn packed(self) -> u32 {
        self.0
    }

    pub const fn major(self) -> u32 {
        self.0 >> 20
    }

    pub const fn minor(self) -> u32 {
        (self.0 >> 10) & 0x3FF
    }

    pub const fn patch(self) -> u32 {
        self.0 & 0x3FF
    }

    pub fn is_valid(self) -> bool {
        self != Version::INVALID
    }

    /// Peers interoperate when both versions are valid and share a major version.
    pub fn is_compatible_with(self, other: Version) -> bool {
        self.is_valid() && other.is_valid() && self.major() == other.major()
    }

    /// Whether a table of this version carries members introduced in `required`.
    pub fn provides(self, required: Version) -> bool {
        self.major() == required.major() && self >= required
    }
}

impl Default for Version {
    fn default() -> Self {
        Version::LATEST
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major(), self.minor(), self.patch())
    }
}

impl FromStr for Version {
    type Err = IsarError;

    fn from_str(s: &str) -> Result<Self> {
        let mut parts = s.trim().split('.');
        let mut next = |name: &'static str, max: u32| -> Result<u32> {
            let part = parts.next().ok_or_else(|| IsarError::invalid_argument("version", format!("missing {name} in '{s}'")))?;
            let value: u32 = part
                .parse()
                .map_err(|_| IsarError::invalid_argument("version", format!("bad {name} '{part}'")))?;
            if value > max {
                return Err(IsarError::invalid_argument("version", format!("{name} {value} out of range")));
            }
            Ok(value)
        };
        let major = next("major", 0xFFF)?;
        let minor = next("minor", 0x3FF)?;
        let patch = next("patch", 0x3FF)?;
        if parts.next().is_some() {
            return Err(IsarError::invalid_argument("version", format!("trailing components in '{s}'")));
        }
        Ok(Version::new(major, minor, patch))
    }
}

impl From<Version> for String {
    fn from(version: Version) -> Self {
        version.to_string()
    }
}

impl TryFrom<String> for Version {
    type Error = IsarError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}
