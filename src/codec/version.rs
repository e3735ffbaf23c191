//! Version headers for format negotiation
//!
//! A header is a fixed-width magic name followed by a (major, minor) pair.
//! Readers accept any minor version and branch on it to consume legacy
//! fields; a different major version is a hard failure.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::primitives::{Codec, TypeTag};
use super::source::DataSource;
use crate::error::{CoreError, CoreResult};

/// Width of the magic name field
pub const VERSION_NAME_LEN: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Version {
    pub major: u32,
    pub minor: u32,
}

impl Version {
    pub const fn new(major: u32, minor: u32) -> Self {
        Self { major, minor }
    }

    /// Whether data written as `self` can be read by code at `current`
    pub fn compatible_with(&self, current: &Version) -> bool {
        self.major == current.major
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// Write a version header
pub fn write_version<S: DataSource + ?Sized>(
    ds: &mut S,
    name: &str,
    version: &Version,
) -> CoreResult<()> {
    ds.put_tag(TypeTag::Version)?;
    ds.write_padded_string(name, VERSION_NAME_LEN)?;
    ds.write_u32(version.major)?;
    ds.write_u32(version.minor)
}

/// Read a version header and check it against `current`.
///
/// Returns the version found in the stream so callers can branch on legacy
/// minor versions.
pub fn read_version<S: DataSource + ?Sized>(
    ds: &mut S,
    name: &str,
    current: &Version,
) -> CoreResult<Version> {
    ds.expect_tag(TypeTag::Version)?;
    let magic = ds.read_padded_string(VERSION_NAME_LEN)?;
    let found = Version {
        major: ds.read_u32()?,
        minor: ds.read_u32()?,
    };

    let expected_name: String = name.chars().take(VERSION_NAME_LEN).collect();
    if magic != expected_name {
        return Err(CoreError::VersionMismatch {
            name: name.to_string(),
            expected: format!("\"{}\"", expected_name),
            found: format!("\"{}\"", magic),
        });
    }
    if !found.compatible_with(current) {
        return Err(CoreError::VersionMismatch {
            name: name.to_string(),
            expected: current.to_string(),
            found: found.to_string(),
        });
    }
    if found.minor > current.minor {
        debug!("{}: reading newer minor version {} (have {})", name, found, current);
    }
    Ok(found)
}
