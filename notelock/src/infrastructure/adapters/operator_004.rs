// /////////////////////////////////////////////////////////////////////////////
// Notelock Sync Engine
// Copyright (c) 2025 Notelock Project Contributors
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Protocol Operator 004
//!
//! The authoritative protocol version; the only one used for new
//! encryptions.
//!
//! ## Key Derivation
//!
//! Argon2id with 64 MiB memory, 5 iterations, 1 lane, 64-byte output.
//! The salt is the first 16 bytes of the hex SHA-256 of
//! `identifier:pw_nonce`. The output splits 32/32 into the master key and
//! the server password.
//!
//! ## Content Encryption
//!
//! XChaCha20-Poly1305 with a fresh 24-byte random nonce per encryption.
//! Each payload gets a fresh 32-byte per-item key: content is encrypted
//! under the item key, and the hex item key is encrypted under the
//! wrapping key (items key or root key) into `enc_item_key`. Both
//! encryptions authenticate the additional data string
//! `"{uuid}:{key_id}:004"`, binding ciphertext to its item and wrapping
//! key; `key_id` is empty when the root key wraps directly.
//!
//! ## Wire Framing
//!
//! `004:<b64url nonce>:<b64url ciphertext+tag>:<b64url aad>`

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chacha20poly1305::aead::{Aead, Payload as AeadPayload};
use chacha20poly1305::{KeyInit, XChaCha20Poly1305, XNonce};
use rand::RngCore;
use sha2::{Digest, Sha256};
use uuid::Uuid;
use zeroize::Zeroizing;

use notelock_domain::entities::{Payload, RootKey};
use notelock_domain::error::NotelockError;
use notelock_domain::services::{
    CryptoOperator, DecryptedParameters, EncryptedParameters, OperatorKey,
};
use notelock_domain::value_objects::{
    EncryptedString, ItemContent, KeyParams, KeyParamsOrigination, ProtocolVersion,
};

const ARGON2_MEMORY_KIB: u32 = 65_536;
const ARGON2_ITERATIONS: u32 = 5;
const ARGON2_LANES: u32 = 1;
const DERIVED_KEY_LENGTH: usize = 64;
const SALT_LENGTH: usize = 16;
const NONCE_LENGTH: usize = 24;
const ITEM_KEY_LENGTH: usize = 32;
const PW_NONCE_LENGTH: usize = 32;

/// Operator for protocol version 004.
#[derive(Debug, Default)]
pub struct Operator004;

impl Operator004 {
    pub fn new() -> Self {
        Self
    }

    /// Derives the Argon2id salt from the identifier and nonce
    fn derive_salt(identifier: &str, nonce: &str) -> Result<Vec<u8>, NotelockError> {
        let mut hasher = Sha256::new();
        hasher.update(format!("{}:{}", identifier, nonce).as_bytes());
        let hash_hex = hex::encode(hasher.finalize());
        hex::decode(&hash_hex[..SALT_LENGTH * 2])
            .map_err(|e| NotelockError::encryption(format!("salt derivation failed: {}", e)))
    }

    fn derive_key(password: &str, salt: &[u8]) -> Result<Zeroizing<[u8; DERIVED_KEY_LENGTH]>, NotelockError> {
        let params = argon2::Params::new(
            ARGON2_MEMORY_KIB,
            ARGON2_ITERATIONS,
            ARGON2_LANES,
            Some(DERIVED_KEY_LENGTH),
        )
        .map_err(|e| NotelockError::encryption(format!("invalid argon2 params: {}", e)))?;
        let argon2 = argon2::Argon2::new(argon2::Algorithm::Argon2id, argon2::Version::V0x13, params);
        let mut derived = Zeroizing::new([0u8; DERIVED_KEY_LENGTH]);
        argon2
            .hash_password_into(password.as_bytes(), salt, derived.as_mut())
            .map_err(|e| NotelockError::encryption(format!("argon2 derivation failed: {}", e)))?;
        Ok(derived)
    }

    /// The authenticated-data string binding a ciphertext to its item and
    /// wrapping key
    fn aad_string(uuid: &Uuid, key_uuid: Option<&Uuid>) -> String {
        let key_id = key_uuid.map(Uuid::to_string).unwrap_or_default();
        format!("{}:{}:{}", uuid, key_id, ProtocolVersion::V004)
    }

    fn encrypt_string(
        plaintext: &[u8],
        key_hex: &str,
        aad: &str,
    ) -> Result<String, NotelockError> {
        let key_bytes = Zeroizing::new(decode_key_hex(key_hex)?);
        let cipher = XChaCha20Poly1305::new(key_bytes.as_slice().into());
        let mut nonce = [0u8; NONCE_LENGTH];
        rand::rng().fill_bytes(&mut nonce);
        let ciphertext = cipher
            .encrypt(
                XNonce::from_slice(&nonce),
                AeadPayload {
                    msg: plaintext,
                    aad: aad.as_bytes(),
                },
            )
            .map_err(|_| NotelockError::encryption("aead encryption failed"))?;
        Ok(EncryptedString::format_aead(
            &URL_SAFE_NO_PAD.encode(nonce),
            &URL_SAFE_NO_PAD.encode(ciphertext),
            &URL_SAFE_NO_PAD.encode(aad.as_bytes()),
        ))
    }

    fn decrypt_string(
        framed: &str,
        key_hex: &str,
        expected_aad: &str,
    ) -> Result<Vec<u8>, NotelockError> {
        let parsed = EncryptedString::parse(framed)?;
        let components = match parsed {
            EncryptedString::Aead {
                version: ProtocolVersion::V004,
                components,
            } => components,
            other => {
                return Err(NotelockError::decryption(format!(
                    "expected a v004 string, found {}",
                    other.version()
                )))
            }
        };
        let aad = URL_SAFE_NO_PAD
            .decode(&components.aad_b64)
            .map_err(|e| NotelockError::decryption(format!("invalid aad encoding: {}", e)))?;
        if aad != expected_aad.as_bytes() {
            return Err(NotelockError::decryption(
                "authenticated data does not match payload identity",
            ));
        }
        let nonce = URL_SAFE_NO_PAD
            .decode(&components.nonce_b64)
            .map_err(|e| NotelockError::decryption(format!("invalid nonce encoding: {}", e)))?;
        if nonce.len() != NONCE_LENGTH {
            return Err(NotelockError::decryption("nonce has wrong length"));
        }
        let ciphertext = URL_SAFE_NO_PAD
            .decode(&components.ciphertext_b64)
            .map_err(|e| NotelockError::decryption(format!("invalid ciphertext encoding: {}", e)))?;
        let key_bytes = Zeroizing::new(decode_key_hex(key_hex)?);
        let cipher = XChaCha20Poly1305::new(key_bytes.as_slice().into());
        cipher
            .decrypt(
                XNonce::from_slice(&nonce),
                AeadPayload {
                    msg: &ciphertext,
                    aad: &aad,
                },
            )
            .map_err(|_| NotelockError::decryption("authentication tag mismatch"))
    }
}

fn decode_key_hex(key_hex: &str) -> Result<Vec<u8>, NotelockError> {
    let bytes = hex::decode(key_hex)
        .map_err(|e| NotelockError::encryption(format!("invalid key material: {}", e)))?;
    if bytes.len() != ITEM_KEY_LENGTH {
        return Err(NotelockError::encryption(format!(
            "key material has {} bytes, expected {}",
            bytes.len(),
            ITEM_KEY_LENGTH
        )));
    }
    Ok(bytes)
}

pub(crate) fn random_hex(length: usize) -> String {
    let mut bytes = vec![0u8; length];
    rand::rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

impl CryptoOperator for Operator004 {
    fn version(&self) -> ProtocolVersion {
        ProtocolVersion::V004
    }

    fn create_root_key(
        &self,
        identifier: &str,
        password: &str,
        origination: KeyParamsOrigination,
    ) -> Result<RootKey, NotelockError> {
        let nonce = random_hex(PW_NONCE_LENGTH);
        let key_params = KeyParams::new_004(identifier, nonce, origination);
        self.compute_root_key(password, &key_params)
    }

    fn compute_root_key(
        &self,
        password: &str,
        key_params: &KeyParams,
    ) -> Result<RootKey, NotelockError> {
        let salt = Self::derive_salt(&key_params.identifier, key_params.nonce()?)?;
        let derived = Self::derive_key(password, &salt)?;
        let (master, server) = derived.split_at(DERIVED_KEY_LENGTH / 2);
        Ok(RootKey::new(
            hex::encode(master),
            Some(hex::encode(server)),
            None,
            key_params.clone(),
        ))
    }

    fn generate_items_key_material(&self) -> String {
        random_hex(ITEM_KEY_LENGTH)
    }

    fn encrypt_payload(
        &self,
        payload: &Payload,
        key: &OperatorKey,
    ) -> Result<EncryptedParameters, NotelockError> {
        let content = payload.decrypted_content()?;
        let content_json = serde_json::to_string(&content.to_value())?;
        let aad = Self::aad_string(payload.uuid(), key.uuid());

        let item_key_hex = Zeroizing::new(random_hex(ITEM_KEY_LENGTH));
        let encrypted_content = Self::encrypt_string(content_json.as_bytes(), &item_key_hex, &aad)?;
        let enc_item_key = Self::encrypt_string(item_key_hex.as_bytes(), key.material_hex(), &aad)?;

        Ok(EncryptedParameters {
            uuid: *payload.uuid(),
            content: encrypted_content,
            enc_item_key: Some(enc_item_key),
            items_key_id: key.uuid().copied(),
            auth_hash: None,
            version: ProtocolVersion::V004,
        })
    }

    fn decrypt_payload(
        &self,
        payload: &Payload,
        key: &OperatorKey,
    ) -> Result<DecryptedParameters, NotelockError> {
        let framed_content = payload.content().encrypted_string().ok_or_else(|| {
            NotelockError::invalid_payload(format!("payload {} carries no ciphertext", payload.uuid()))
        })?;
        let enc_item_key = payload.enc_item_key().ok_or_else(|| {
            NotelockError::decryption(format!("payload {} is missing enc_item_key", payload.uuid()))
        })?;
        let aad = Self::aad_string(payload.uuid(), key.uuid());

        let item_key_bytes = Zeroizing::new(Self::decrypt_string(enc_item_key, key.material_hex(), &aad)?);
        let item_key_hex = std::str::from_utf8(&item_key_bytes)
            .map_err(|_| NotelockError::decryption("item key is not valid utf-8"))?;

        let content_bytes = Self::decrypt_string(framed_content, item_key_hex, &aad)?;
        let content_value: serde_json::Value = serde_json::from_slice(&content_bytes)
            .map_err(|e| NotelockError::decryption(format!("decrypted content is not json: {}", e)))?;
        let content = ItemContent::from_value(content_value)?;

        Ok(DecryptedParameters {
            uuid: *payload.uuid(),
            content,
        })
    }
}
