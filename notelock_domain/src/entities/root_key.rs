// /////////////////////////////////////////////////////////////////////////////
// Notelock Sync Engine
// Copyright (c) 2025 Notelock Project Contributors
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Root Key
//!
//! The password-derived key at the top of the key hierarchy. The root key
//! wraps items keys; it is never sent to the server and never persisted in
//! plaintext. Its `server_password` half is the only proof of password the
//! server ever sees.
//!
//! All key material is hex-encoded in memory and zeroized on drop.

use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::value_objects::{KeyParams, ProtocolVersion};

/// Password-derived root key.
///
/// - `master_key`: wraps items keys (and local storage when a passcode is
///   configured)
/// - `server_password`: sent to the server as proof of password; stripped
///   before any local persistence
/// - `data_authentication_key`: HMAC key for protocol versions ≤003
#[derive(Debug, Clone, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct RootKey {
    master_key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    server_password: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    data_authentication_key: Option<String>,
    #[zeroize(skip)]
    key_params: KeyParams,
}

impl RootKey {
    pub fn new(
        master_key: String,
        server_password: Option<String>,
        data_authentication_key: Option<String>,
        key_params: KeyParams,
    ) -> Self {
        Self {
            master_key,
            server_password,
            data_authentication_key,
            key_params,
        }
    }

    /// Hex-encoded master key material
    pub fn master_key(&self) -> &str {
        &self.master_key
    }

    /// Hex-encoded server password, if still attached
    pub fn server_password(&self) -> Option<&str> {
        self.server_password.as_deref()
    }

    /// Hex-encoded data authentication key (v003 and below)
    pub fn data_authentication_key(&self) -> Option<&str> {
        self.data_authentication_key.as_deref()
    }

    pub fn key_params(&self) -> &KeyParams {
        &self.key_params
    }

    pub fn version(&self) -> ProtocolVersion {
        self.key_params.version
    }

    /// Copies this key without the server password
    ///
    /// The in-memory root key kept after authentication must not retain
    /// the proof-of-password half.
    pub fn without_server_password(&self) -> RootKey {
        RootKey {
            master_key: self.master_key.clone(),
            server_password: None,
            data_authentication_key: self.data_authentication_key.clone(),
            key_params: self.key_params.clone(),
        }
    }

    /// Compares key material (not params metadata)
    pub fn material_equals(&self, other: &RootKey) -> bool {
        self.master_key == other.master_key
            && self.data_authentication_key == other.data_authentication_key
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value_objects::KeyParamsOrigination;

    fn test_key() -> RootKey {
        RootKey::new(
            "aa".repeat(32),
            Some("bb".repeat(32)),
            None,
            KeyParams::new_004("u@e.com", "nonce", KeyParamsOrigination::Registration),
        )
    }

    #[test]
    fn test_strip_server_password() {
        let key = test_key();
        let stripped = key.without_server_password();
        assert!(stripped.server_password().is_none());
        assert!(stripped.material_equals(&key));
    }

    #[test]
    fn test_material_equality_ignores_params() {
        let key = test_key();
        let mut other = key.clone();
        other.key_params = KeyParams::new_004("u@e.com", "other-nonce", KeyParamsOrigination::PasswordChange);
        assert!(key.material_equals(&other));
    }
}
