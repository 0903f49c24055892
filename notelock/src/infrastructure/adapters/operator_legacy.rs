// /////////////////////////////////////////////////////////////////////////////
// Notelock Sync Engine
// Copyright (c) 2025 Notelock Project Contributors
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Legacy Protocol Operators (002 / 001)
//!
//! Kept for decrypting data written by old clients. Accounts on these
//! versions can still sign in (the session service emits an
//! outdated-protocol warning), but the engine never selects them for new
//! encryptions.
//!
//! - **002**: PBKDF2-SHA512 over the explicit `pw_salt` with the stored
//!   `pw_cost`; AES-256-CBC + HMAC-SHA256 in the same framing as 003.
//! - **001**: PBKDF2-SHA512 with the stored legacy cost; AES-256-CBC
//!   without any content authentication. Framing omits the auth hash:
//!   `001:<uuid>:<iv hex>:<ciphertext b64>`.

use zeroize::Zeroizing;

use notelock_domain::entities::{Payload, RootKey};
use notelock_domain::error::NotelockError;
use notelock_domain::services::{
    CryptoOperator, DecryptedParameters, EncryptedParameters, OperatorKey,
};
use notelock_domain::value_objects::{
    ItemContent, KeyParams, KeyParamsOrigination, ProtocolVersion,
};

use super::operator_003::{
    decrypt_framed_cbc, encrypt_framed_cbc, parse_cbc, pbkdf2_sha512, split_item_key,
};
use super::operator_004::random_hex;

const KEY_LENGTH: usize = 32;
const SALT_LENGTH: usize = 16;

/// Operator for protocol version 002.
#[derive(Debug, Default)]
pub struct Operator002;

/// Operator for protocol version 001.
#[derive(Debug, Default)]
pub struct Operator001;

impl Operator002 {
    pub fn new() -> Self {
        Self
    }
}

impl Operator001 {
    pub fn new() -> Self {
        Self
    }
}

fn require_acceptable_cost(key_params: &KeyParams) -> Result<u32, NotelockError> {
    let cost = key_params.pw_cost.ok_or_else(|| {
        NotelockError::invalid_config(format!("{} key params carry no pw_cost", key_params.version))
    })?;
    if !key_params.version.supports_password_derivation_cost(cost) {
        return Err(NotelockError::AuthenticationFailed(format!(
            "derivation cost {} is below the {} minimum",
            cost, key_params.version
        )));
    }
    Ok(cost)
}

impl CryptoOperator for Operator002 {
    fn version(&self) -> ProtocolVersion {
        ProtocolVersion::V002
    }

    fn create_root_key(
        &self,
        identifier: &str,
        password: &str,
        _origination: KeyParamsOrigination,
    ) -> Result<RootKey, NotelockError> {
        let key_params = KeyParams::new_legacy(
            ProtocolVersion::V002,
            identifier,
            random_hex(SALT_LENGTH),
            ProtocolVersion::V002.minimum_cost(),
        );
        self.compute_root_key(password, &key_params)
    }

    fn compute_root_key(
        &self,
        password: &str,
        key_params: &KeyParams,
    ) -> Result<RootKey, NotelockError> {
        let cost = require_acceptable_cost(key_params)?;
        let salt = key_params.salt()?;
        let mut derived = Zeroizing::new([0u8; KEY_LENGTH * 3]);
        pbkdf2_sha512(password, salt.as_bytes(), cost, derived.as_mut())?;
        Ok(RootKey::new(
            hex::encode(&derived[..KEY_LENGTH]),
            Some(hex::encode(&derived[KEY_LENGTH..KEY_LENGTH * 2])),
            Some(hex::encode(&derived[KEY_LENGTH * 2..])),
            key_params.clone(),
        ))
    }

    fn generate_items_key_material(&self) -> String {
        random_hex(KEY_LENGTH)
    }

    fn encrypt_payload(
        &self,
        payload: &Payload,
        key: &OperatorKey,
    ) -> Result<EncryptedParameters, NotelockError> {
        let content = payload.decrypted_content()?;
        let content_json = serde_json::to_string(&content.to_value())?;
        let item_key_hex = Zeroizing::new(random_hex(KEY_LENGTH * 2));
        let (ek, ak) = split_item_key(&item_key_hex)?;

        let encrypted_content = encrypt_framed_cbc(
            ProtocolVersion::V002,
            payload.uuid(),
            content_json.as_bytes(),
            ek,
            Some(ak),
        )?;
        let auth_key = key.auth_key_hex().ok_or_else(|| {
            NotelockError::encryption("v002 encryption requires a data authentication key")
        })?;
        let enc_item_key = encrypt_framed_cbc(
            ProtocolVersion::V002,
            payload.uuid(),
            item_key_hex.as_bytes(),
            key.material_hex(),
            Some(auth_key),
        )?;

        Ok(EncryptedParameters {
            uuid: *payload.uuid(),
            content: encrypted_content,
            enc_item_key: Some(enc_item_key),
            items_key_id: None,
            auth_hash: None,
            version: ProtocolVersion::V002,
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

        let key_components = parse_cbc(enc_item_key, ProtocolVersion::V002)?;
        let item_key_bytes = Zeroizing::new(decrypt_framed_cbc(
            ProtocolVersion::V002,
            payload.uuid(),
            &key_components,
            key.material_hex(),
            key.auth_key_hex(),
        )?);
        let item_key_hex = std::str::from_utf8(&item_key_bytes)
            .map_err(|_| NotelockError::decryption("item key is not valid utf-8"))?;
        let (ek, ak) = split_item_key(item_key_hex)?;

        let content_components = parse_cbc(framed_content, ProtocolVersion::V002)?;
        let content_bytes = decrypt_framed_cbc(
            ProtocolVersion::V002,
            payload.uuid(),
            &content_components,
            ek,
            Some(ak),
        )?;
        let content_value: serde_json::Value = serde_json::from_slice(&content_bytes)
            .map_err(|e| NotelockError::decryption(format!("decrypted content is not json: {}", e)))?;
        Ok(DecryptedParameters {
            uuid: *payload.uuid(),
            content: ItemContent::from_value(content_value)?,
        })
    }
}

impl CryptoOperator for Operator001 {
    fn version(&self) -> ProtocolVersion {
        ProtocolVersion::V001
    }

    fn create_root_key(
        &self,
        identifier: &str,
        password: &str,
        _origination: KeyParamsOrigination,
    ) -> Result<RootKey, NotelockError> {
        let key_params = KeyParams::new_legacy(
            ProtocolVersion::V001,
            identifier,
            random_hex(SALT_LENGTH),
            ProtocolVersion::V001.minimum_cost(),
        );
        self.compute_root_key(password, &key_params)
    }

    fn compute_root_key(
        &self,
        password: &str,
        key_params: &KeyParams,
    ) -> Result<RootKey, NotelockError> {
        let cost = require_acceptable_cost(key_params)?;
        let salt = key_params.salt()?;
        let mut derived = Zeroizing::new([0u8; KEY_LENGTH * 2]);
        pbkdf2_sha512(password, salt.as_bytes(), cost, derived.as_mut())?;
        Ok(RootKey::new(
            hex::encode(&derived[..KEY_LENGTH]),
            Some(hex::encode(&derived[KEY_LENGTH..])),
            None,
            key_params.clone(),
        ))
    }

    fn generate_items_key_material(&self) -> String {
        random_hex(KEY_LENGTH)
    }

    fn encrypt_payload(
        &self,
        payload: &Payload,
        key: &OperatorKey,
    ) -> Result<EncryptedParameters, NotelockError> {
        let content = payload.decrypted_content()?;
        let content_json = serde_json::to_string(&content.to_value())?;
        // Single-purpose item key; 001 has no authentication half.
        let item_key_hex = Zeroizing::new(random_hex(KEY_LENGTH));

        let encrypted_content = encrypt_framed_cbc(
            ProtocolVersion::V001,
            payload.uuid(),
            content_json.as_bytes(),
            &item_key_hex,
            None,
        )?;
        let enc_item_key = encrypt_framed_cbc(
            ProtocolVersion::V001,
            payload.uuid(),
            item_key_hex.as_bytes(),
            key.material_hex(),
            None,
        )?;

        Ok(EncryptedParameters {
            uuid: *payload.uuid(),
            content: encrypted_content,
            enc_item_key: Some(enc_item_key),
            items_key_id: None,
            auth_hash: None,
            version: ProtocolVersion::V001,
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

        let key_components = parse_cbc(enc_item_key, ProtocolVersion::V001)?;
        let item_key_bytes = Zeroizing::new(decrypt_framed_cbc(
            ProtocolVersion::V001,
            payload.uuid(),
            &key_components,
            key.material_hex(),
            None,
        )?);
        let item_key_hex = std::str::from_utf8(&item_key_bytes)
            .map_err(|_| NotelockError::decryption("item key is not valid utf-8"))?;

        let content_components = parse_cbc(framed_content, ProtocolVersion::V001)?;
        let content_bytes = decrypt_framed_cbc(
            ProtocolVersion::V001,
            payload.uuid(),
            &content_components,
            item_key_hex,
            None,
        )?;
        let content_value: serde_json::Value = serde_json::from_slice(&content_bytes)
            .map_err(|e| NotelockError::decryption(format!("decrypted content is not json: {}", e)))?;
        Ok(DecryptedParameters {
            uuid: *payload.uuid(),
            content: ItemContent::from_value(content_value)?,
        })
    }
}
