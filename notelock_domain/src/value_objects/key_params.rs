// /////////////////////////////////////////////////////////////////////////////
// Notelock Sync Engine
// Copyright (c) 2025 Notelock Project Contributors
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Key Params
//!
//! The parameters needed to re-derive a root key from a password. Key
//! params are public data: the server stores them and returns them to any
//! caller presenting the account email, so they must never contain secret
//! material.
//!
//! Per-version salt inputs:
//!
//! - v003/v004 carry a `pw_nonce`; the derivation salt is computed from
//!   `identifier` and nonce.
//! - v001/v002 carry an explicit `pw_salt` plus a legacy `pw_cost`
//!   iteration count.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::NotelockError;
use crate::value_objects::ProtocolVersion;

/// Provenance of a key params record.
///
/// Recorded at creation so the key recovery flow can distinguish params
/// minted by registration from params minted by a password change on
/// another device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyParamsOrigination {
    Registration,
    PasswordChange,
    ProtocolUpgrade,
    EmailChange,
}

/// Parameters for re-deriving a root key from the account password.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyParams {
    pub version: ProtocolVersion,

    /// Account email.
    pub identifier: String,

    /// Salt seed for v003+.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pw_nonce: Option<String>,

    /// Explicit salt for v002 and below.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pw_salt: Option<String>,

    /// Legacy KDF iteration count for v002 and below.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pw_cost: Option<u32>,

    /// Creation timestamp, carried by v004 params.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created: Option<DateTime<Utc>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub origination: Option<KeyParamsOrigination>,
}

impl KeyParams {
    /// Creates v004 params with the given nonce
    pub fn new_004(identifier: impl Into<String>, pw_nonce: impl Into<String>, origination: KeyParamsOrigination) -> Self {
        Self {
            version: ProtocolVersion::V004,
            identifier: identifier.into(),
            pw_nonce: Some(pw_nonce.into()),
            pw_salt: None,
            pw_cost: None,
            created: Some(Utc::now()),
            origination: Some(origination),
        }
    }

    /// Creates v003 params with the given nonce
    pub fn new_003(identifier: impl Into<String>, pw_nonce: impl Into<String>) -> Self {
        Self {
            version: ProtocolVersion::V003,
            identifier: identifier.into(),
            pw_nonce: Some(pw_nonce.into()),
            pw_salt: None,
            pw_cost: None,
            created: None,
            origination: None,
        }
    }

    /// Creates legacy params (v001/v002) with explicit salt and cost
    pub fn new_legacy(
        version: ProtocolVersion,
        identifier: impl Into<String>,
        pw_salt: impl Into<String>,
        pw_cost: u32,
    ) -> Self {
        Self {
            version,
            identifier: identifier.into(),
            pw_nonce: None,
            pw_salt: Some(pw_salt.into()),
            pw_cost: Some(pw_cost),
            created: None,
            origination: None,
        }
    }

    /// Requires the nonce carried by v003+ params
    pub fn nonce(&self) -> Result<&str, NotelockError> {
        self.pw_nonce.as_deref().ok_or_else(|| {
            NotelockError::invalid_config(format!(
                "{} key params are missing pw_nonce",
                self.version
            ))
        })
    }

    /// Requires the explicit salt carried by legacy params
    pub fn salt(&self) -> Result<&str, NotelockError> {
        self.pw_salt.as_deref().ok_or_else(|| {
            NotelockError::invalid_config(format!(
                "{} key params are missing pw_salt",
                self.version
            ))
        })
    }

    /// Checks whether the stored derivation cost meets the version minimum
    ///
    /// Versions without a stored cost always pass; their KDF parameters
    /// are fixed by the version itself.
    pub fn cost_is_acceptable(&self) -> bool {
        match self.pw_cost {
            Some(cost) => self.version.supports_password_derivation_cost(cost),
            None => true,
        }
    }

    /// Compares two params records for derivation equivalence
    ///
    /// Equivalent params derive the same root key for the same password.
    /// The `created`/`origination` metadata does not affect derivation.
    pub fn derivation_equals(&self, other: &KeyParams) -> bool {
        self.version == other.version
            && self.identifier == other.identifier
            && self.pw_nonce == other.pw_nonce
            && self.pw_salt == other.pw_salt
            && self.pw_cost == other.pw_cost
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derivation_equality_ignores_metadata() {
        let mut a = KeyParams::new_004("user@example.com", "nonce1", KeyParamsOrigination::Registration);
        let mut b = a.clone();
        b.created = None;
        b.origination = Some(KeyParamsOrigination::PasswordChange);
        assert!(a.derivation_equals(&b));
        b.pw_nonce = Some("nonce2".to_string());
        assert!(!a.derivation_equals(&b));
        a.pw_nonce = Some("nonce2".to_string());
        assert!(a.derivation_equals(&b));
    }

    #[test]
    fn test_legacy_cost_check() {
        let params = KeyParams::new_legacy(ProtocolVersion::V002, "u@e.com", "salt", 101);
        assert!(!params.cost_is_acceptable());
        let params = KeyParams::new_legacy(ProtocolVersion::V002, "u@e.com", "salt", 3_000);
        assert!(params.cost_is_acceptable());
    }

    #[test]
    fn test_missing_nonce_is_an_error() {
        let params = KeyParams::new_legacy(ProtocolVersion::V001, "u@e.com", "salt", 3_000);
        assert!(params.nonce().is_err());
        assert!(params.salt().is_ok());
    }
}
