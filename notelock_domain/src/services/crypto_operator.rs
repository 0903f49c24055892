// /////////////////////////////////////////////////////////////////////////////
// Notelock Sync Engine
// Copyright (c) 2025 Notelock Project Contributors
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Crypto Operator Port
//!
//! Domain interface for the versioned cryptographic operators. One
//! operator exists per protocol version; the protocol service dispatches
//! on the 3-digit version tag. Operators are synchronous CPU-bound
//! services (the async boundary lives above them, in the application
//! layer).
//!
//! An operator never decides *which* key encrypts a payload; the protocol
//! service selects the key and passes its material down as an
//! `OperatorKey`.

use uuid::Uuid;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::entities::{Payload, RootKey};
use crate::error::NotelockError;
use crate::value_objects::{ItemContent, KeyParams, KeyParamsOrigination, ProtocolVersion};

/// Why a payload is being encrypted; decides key selection and whether
/// encryption happens at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncryptionIntent {
    /// Upload to the server, encrypted under the default items key.
    Sync,
    /// Upload or store explicitly unencrypted (`000` framing).
    SyncDecrypted,
    /// Local database row; encrypted when a root/passcode key exists.
    LocalStoragePreferEncrypted,
    /// Local database row, explicitly unencrypted.
    LocalStorageDecrypted,
    /// Encrypted backup file.
    FileEncrypted,
    /// Decrypted backup file.
    FileDecrypted,
}

impl EncryptionIntent {
    /// Whether this intent requires ciphertext output
    pub fn requires_encryption(&self) -> bool {
        matches!(
            self,
            EncryptionIntent::Sync | EncryptionIntent::FileEncrypted
        )
    }

    /// Whether this intent prefers ciphertext when a key is available
    pub fn prefers_encryption(&self) -> bool {
        self.requires_encryption()
            || matches!(self, EncryptionIntent::LocalStoragePreferEncrypted)
    }
}

/// Symmetric key material handed to an operator for one operation.
///
/// Built from either an items key (carrying its uuid for AAD binding and
/// `items_key_id` linkage) or a root key (no uuid; wraps items keys and
/// local storage). Material is hex-encoded and zeroized on drop.
#[derive(Debug, Clone, Zeroize, ZeroizeOnDrop)]
pub struct OperatorKey {
    #[zeroize(skip)]
    uuid: Option<Uuid>,
    material_hex: String,
    auth_key_hex: Option<String>,
}

impl OperatorKey {
    pub fn new(uuid: Option<Uuid>, material_hex: String, auth_key_hex: Option<String>) -> Self {
        Self {
            uuid,
            material_hex,
            auth_key_hex,
        }
    }

    /// Builds operator material from a root key
    pub fn from_root_key(root_key: &RootKey) -> Self {
        Self {
            uuid: None,
            material_hex: root_key.master_key().to_string(),
            auth_key_hex: root_key.data_authentication_key().map(str::to_string),
        }
    }

    /// Uuid of the wrapping items key, if the material came from one
    pub fn uuid(&self) -> Option<&Uuid> {
        self.uuid.as_ref()
    }

    pub fn material_hex(&self) -> &str {
        &self.material_hex
    }

    /// HMAC key material (protocol ≤003)
    pub fn auth_key_hex(&self) -> Option<&str> {
        self.auth_key_hex.as_deref()
    }
}

/// Output of an encryption operation, ready to overlay onto a payload.
#[derive(Debug, Clone)]
pub struct EncryptedParameters {
    pub uuid: Uuid,
    /// Framed ciphertext string (version tag prefix).
    pub content: String,
    /// Ciphertext of the per-item key.
    pub enc_item_key: Option<String>,
    /// Uuid of the wrapping items key (v004, items-key wraps only).
    pub items_key_id: Option<Uuid>,
    /// Legacy content authentication hash (≤002 wire shape).
    pub auth_hash: Option<String>,
    pub version: ProtocolVersion,
}

/// Output of a decryption operation.
#[derive(Debug, Clone)]
pub struct DecryptedParameters {
    pub uuid: Uuid,
    pub content: ItemContent,
}

/// One protocol version's cryptographic implementation.
pub trait CryptoOperator: Send + Sync {
    /// The protocol version this operator implements
    fn version(&self) -> ProtocolVersion;

    /// Derives a brand-new root key for the identifier/password pair,
    /// minting fresh salt inputs
    fn create_root_key(
        &self,
        identifier: &str,
        password: &str,
        origination: KeyParamsOrigination,
    ) -> Result<RootKey, NotelockError>;

    /// Re-derives a root key from a password and existing key params
    fn compute_root_key(&self, password: &str, key_params: &KeyParams)
        -> Result<RootKey, NotelockError>;

    /// Generates fresh hex-encoded items-key material
    fn generate_items_key_material(&self) -> String;

    /// Encrypts a payload's decrypted content under the given key
    ///
    /// # Errors
    ///
    /// * `InvalidPayload` - payload carries no decrypted content
    /// * `EncryptionError` - primitive failure
    fn encrypt_payload(
        &self,
        payload: &Payload,
        key: &OperatorKey,
    ) -> Result<EncryptedParameters, NotelockError>;

    /// Decrypts a payload's ciphertext under the given key
    ///
    /// # Errors
    ///
    /// * `DecryptionError` - auth failure, corrupt framing, or bad key
    fn decrypt_payload(
        &self,
        payload: &Payload,
        key: &OperatorKey,
    ) -> Result<DecryptedParameters, NotelockError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intent_encryption_requirements() {
        assert!(EncryptionIntent::Sync.requires_encryption());
        assert!(EncryptionIntent::FileEncrypted.requires_encryption());
        assert!(!EncryptionIntent::SyncDecrypted.requires_encryption());
        assert!(EncryptionIntent::LocalStoragePreferEncrypted.prefers_encryption());
        assert!(!EncryptionIntent::LocalStorageDecrypted.prefers_encryption());
    }

    #[test]
    fn test_operator_key_from_root_key_has_no_uuid() {
        let root = RootKey::new(
            "ab".repeat(32),
            None,
            Some("cd".repeat(32)),
            KeyParams::new_003("u@e.com", "nonce"),
        );
        let key = OperatorKey::from_root_key(&root);
        assert!(key.uuid().is_none());
        assert_eq!(key.material_hex(), "ab".repeat(32));
        assert_eq!(key.auth_key_hex(), Some("cd".repeat(32).as_str()));
    }
}
