// /////////////////////////////////////////////////////////////////////////////
// Notelock Sync Engine
// Copyright (c) 2025 Notelock Project Contributors
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Protocol Version
//!
//! Value object for the versioned cryptographic protocol. Four versions
//! coexist on the wire; a payload's version is the 3-character prefix of
//! its ciphertext string. The engine decrypts all four versions and
//! encrypts only with the latest.
//!
//! ## Version Ordering
//!
//! Versions order as zero-padded decimal strings: `"002" < "003" < "004"`,
//! and a future `"005"` compares newer than this library's latest. Unknown
//! tags are rejected at parse time rather than carried as opaque strings.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::NotelockError;

/// A cryptographic protocol version.
///
/// Variants map one-to-one onto the 3-digit wire tags. `V000` is the
/// explicit "unencrypted" tag used by payloads that opt out of encryption
/// (decrypted backups, values stored before any key exists).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ProtocolVersion {
    #[serde(rename = "000")]
    V000,
    #[serde(rename = "001")]
    V001,
    #[serde(rename = "002")]
    V002,
    #[serde(rename = "003")]
    V003,
    #[serde(rename = "004")]
    V004,
}

impl ProtocolVersion {
    /// The version used for all new encryptions.
    pub const LATEST: ProtocolVersion = ProtocolVersion::V004;

    /// Length of the version tag prefixing every ciphertext string.
    pub const TAG_LENGTH: usize = 3;

    /// Gets the 3-digit wire tag for this version
    pub fn as_str(&self) -> &'static str {
        match self {
            ProtocolVersion::V000 => "000",
            ProtocolVersion::V001 => "001",
            ProtocolVersion::V002 => "002",
            ProtocolVersion::V003 => "003",
            ProtocolVersion::V004 => "004",
        }
    }

    /// Parses the version tag off the front of a ciphertext string
    ///
    /// # Errors
    ///
    /// * `UnsupportedVersion` - tag is unknown or the string is shorter
    ///   than a tag
    pub fn from_encrypted_string(string: &str) -> Result<Self, NotelockError> {
        if string.len() < Self::TAG_LENGTH {
            return Err(NotelockError::UnsupportedVersion(format!(
                "string too short to carry a version tag: {} chars",
                string.len()
            )));
        }
        string[..Self::TAG_LENGTH].parse()
    }

    /// Checks whether a raw tag is newer than the library's latest version
    ///
    /// Comparison is decimal over the zero-padded tag, so `"005"` (unknown
    /// to this library) still compares newer than `"004"`.
    pub fn tag_is_newer_than_latest(tag: &str) -> bool {
        tag.len() == Self::TAG_LENGTH
            && tag.chars().all(|c| c.is_ascii_digit())
            && tag > Self::LATEST.as_str()
    }

    /// Checks whether this version's encryption is decrypt-only
    ///
    /// Versions 001 and 002 may still be decrypted (and signed in
    /// against, with an outdated-protocol warning) but are never used for
    /// new encryptions.
    pub fn is_outdated(&self) -> bool {
        matches!(self, ProtocolVersion::V001 | ProtocolVersion::V002)
    }

    /// Minimum password derivation cost accepted for this version
    ///
    /// Versions 003+ fix their KDF parameters and carry no per-account
    /// cost, so any stored cost passes.
    pub fn minimum_cost(&self) -> u32 {
        match self {
            ProtocolVersion::V000 => 0,
            ProtocolVersion::V001 | ProtocolVersion::V002 => 3_000,
            ProtocolVersion::V003 => 110_000,
            ProtocolVersion::V004 => 0,
        }
    }

    /// Checks whether a stored password derivation cost meets this
    /// version's minimum
    pub fn supports_password_derivation_cost(&self, cost: u32) -> bool {
        cost >= self.minimum_cost()
    }
}

impl FromStr for ProtocolVersion {
    type Err = NotelockError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "000" => Ok(ProtocolVersion::V000),
            "001" => Ok(ProtocolVersion::V001),
            "002" => Ok(ProtocolVersion::V002),
            "003" => Ok(ProtocolVersion::V003),
            "004" => Ok(ProtocolVersion::V004),
            other => Err(NotelockError::UnsupportedVersion(format!(
                "unknown protocol version tag '{}'",
                other
            ))),
        }
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_version_ordering() {
        assert!(ProtocolVersion::V002 < ProtocolVersion::V003);
        assert!(ProtocolVersion::V003 < ProtocolVersion::V004);
        assert_eq!(ProtocolVersion::LATEST, ProtocolVersion::V004);
    }

    #[test]
    fn test_future_tag_is_newer() {
        assert!(ProtocolVersion::tag_is_newer_than_latest("005"));
        assert!(ProtocolVersion::tag_is_newer_than_latest("010"));
        assert!(!ProtocolVersion::tag_is_newer_than_latest("004"));
        assert!(!ProtocolVersion::tag_is_newer_than_latest("002"));
        assert!(!ProtocolVersion::tag_is_newer_than_latest("00x"));
    }

    #[test]
    fn test_parse_from_encrypted_string() {
        let version = ProtocolVersion::from_encrypted_string("004:abc:def:ghi").unwrap();
        assert_eq!(version, ProtocolVersion::V004);
        assert!(ProtocolVersion::from_encrypted_string("9").is_err());
        assert!(ProtocolVersion::from_encrypted_string("077:junk").is_err());
    }

    #[test]
    fn test_derivation_cost_minimums() {
        assert!(ProtocolVersion::V003.supports_password_derivation_cost(110_000));
        assert!(!ProtocolVersion::V003.supports_password_derivation_cost(60_000));
        assert!(ProtocolVersion::V002.supports_password_derivation_cost(3_000));
        assert!(!ProtocolVersion::V001.supports_password_derivation_cost(2_999));
    }

    proptest! {
        #[test]
        fn prop_roundtrip_tags(version in prop_oneof![
            Just(ProtocolVersion::V001),
            Just(ProtocolVersion::V002),
            Just(ProtocolVersion::V003),
            Just(ProtocolVersion::V004),
        ]) {
            let parsed: ProtocolVersion = version.as_str().parse().unwrap();
            prop_assert_eq!(parsed, version);
        }
    }
}
