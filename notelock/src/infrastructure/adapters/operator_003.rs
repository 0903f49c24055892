// /////////////////////////////////////////////////////////////////////////////
// Notelock Sync Engine
// Copyright (c) 2025 Notelock Project Contributors
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Protocol Operator 003
//!
//! ## Key Derivation
//!
//! PBKDF2-HMAC-SHA512 with 110,000 iterations over a salt of
//! hex(SHA-256(`identifier:SF:pw_nonce`)). The 768-bit output splits into
//! master key, server password, and data authentication key.
//!
//! ## Content Encryption
//!
//! AES-256-CBC with a random 16-byte IV, authenticated by HMAC-SHA256
//! over the string-to-auth `version:uuid:iv:ciphertext`. Each payload
//! gets a fresh 128-hex-char per-item key whose halves are the encryption
//! key and the HMAC key; the per-item key is itself CBC+HMAC encrypted
//! under the wrapping key into `enc_item_key`.
//!
//! ## Wire Framing
//!
//! `003:<auth_hash>:<uuid>:<iv hex>:<ciphertext b64>`

use std::num::NonZeroU32;

use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine as _;
use cbc::cipher::block_padding::Pkcs7;
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use rand::RngCore;
use ring::{hmac, pbkdf2};
use sha2::{Digest, Sha256};
use uuid::Uuid;
use zeroize::Zeroizing;

use notelock_domain::entities::{Payload, RootKey};
use notelock_domain::error::NotelockError;
use notelock_domain::services::{
    CryptoOperator, DecryptedParameters, EncryptedParameters, OperatorKey,
};
use notelock_domain::value_objects::{
    CbcComponents, EncryptedString, ItemContent, KeyParams, KeyParamsOrigination, ProtocolVersion,
};

use super::operator_004::random_hex;

const PBKDF2_ITERATIONS: u32 = 110_000;
const DERIVED_KEY_LENGTH: usize = 96;
const IV_LENGTH: usize = 16;
const KEY_LENGTH: usize = 32;
const PW_NONCE_LENGTH: usize = 32;

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

/// Operator for protocol version 003.
#[derive(Debug, Default)]
pub struct Operator003;

impl Operator003 {
    pub fn new() -> Self {
        Self
    }

    fn derive_salt(identifier: &str, nonce: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(format!("{}:SF:{}", identifier, nonce).as_bytes());
        hex::encode(hasher.finalize())
    }
}

/// PBKDF2-HMAC-SHA512 into `output`.
pub(crate) fn pbkdf2_sha512(
    password: &str,
    salt: &[u8],
    iterations: u32,
    output: &mut [u8],
) -> Result<(), NotelockError> {
    let iterations = NonZeroU32::new(iterations)
        .ok_or_else(|| NotelockError::encryption("kdf iteration count cannot be zero"))?;
    pbkdf2::derive(
        pbkdf2::PBKDF2_HMAC_SHA512,
        iterations,
        salt,
        password.as_bytes(),
        output,
    );
    Ok(())
}

fn decode_hex_key(key_hex: &str, expected_len: usize) -> Result<Vec<u8>, NotelockError> {
    let bytes = hex::decode(key_hex)
        .map_err(|e| NotelockError::encryption(format!("invalid key material: {}", e)))?;
    if bytes.len() != expected_len {
        return Err(NotelockError::encryption(format!(
            "key material has {} bytes, expected {}",
            bytes.len(),
            expected_len
        )));
    }
    Ok(bytes)
}

/// AES-256-CBC encrypt with PKCS7 padding.
pub(crate) fn cbc_encrypt(
    plaintext: &[u8],
    key_hex: &str,
    iv: &[u8],
) -> Result<Vec<u8>, NotelockError> {
    let key = Zeroizing::new(decode_hex_key(key_hex, KEY_LENGTH)?);
    let cipher = Aes256CbcEnc::new_from_slices(&key, iv)
        .map_err(|e| NotelockError::encryption(format!("cbc init failed: {}", e)))?;
    Ok(cipher.encrypt_padded_vec_mut::<Pkcs7>(plaintext))
}

/// AES-256-CBC decrypt with PKCS7 padding.
pub(crate) fn cbc_decrypt(
    ciphertext: &[u8],
    key_hex: &str,
    iv: &[u8],
) -> Result<Vec<u8>, NotelockError> {
    let key = Zeroizing::new(decode_hex_key(key_hex, KEY_LENGTH)?);
    let cipher = Aes256CbcDec::new_from_slices(&key, iv)
        .map_err(|e| NotelockError::decryption(format!("cbc init failed: {}", e)))?;
    cipher
        .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
        .map_err(|_| NotelockError::decryption("cbc padding is invalid"))
}

/// HMAC-SHA256 over the string-to-auth, hex-encoded.
pub(crate) fn auth_hash_hex(auth_key_hex: &str, string_to_auth: &str) -> Result<String, NotelockError> {
    let key_bytes = Zeroizing::new(decode_hex_key(auth_key_hex, KEY_LENGTH)?);
    let key = hmac::Key::new(hmac::HMAC_SHA256, &key_bytes);
    Ok(hex::encode(hmac::sign(&key, string_to_auth.as_bytes()).as_ref()))
}

/// Constant-time verification of a hex auth hash.
pub(crate) fn verify_auth_hash(
    auth_key_hex: &str,
    string_to_auth: &str,
    expected_hex: &str,
) -> Result<(), NotelockError> {
    let key_bytes = Zeroizing::new(decode_hex_key(auth_key_hex, KEY_LENGTH)?);
    let key = hmac::Key::new(hmac::HMAC_SHA256, &key_bytes);
    let expected = hex::decode(expected_hex)
        .map_err(|_| NotelockError::decryption("auth hash is not valid hex"))?;
    hmac::verify(&key, string_to_auth.as_bytes(), &expected)
        .map_err(|_| NotelockError::decryption("content authentication failed"))
}

/// Encrypts a plaintext into a CBC+HMAC framed string.
pub(crate) fn encrypt_framed_cbc(
    version: ProtocolVersion,
    uuid: &Uuid,
    plaintext: &[u8],
    encryption_key_hex: &str,
    auth_key_hex: Option<&str>,
) -> Result<String, NotelockError> {
    let mut iv = [0u8; IV_LENGTH];
    rand::rng().fill_bytes(&mut iv);
    let iv_hex = hex::encode(iv);
    let ciphertext_b64 = BASE64_STANDARD.encode(cbc_encrypt(plaintext, encryption_key_hex, &iv)?);

    match auth_key_hex {
        Some(auth_key) => {
            let string_to_auth = format!("{}:{}:{}:{}", version, uuid, iv_hex, ciphertext_b64);
            let auth_hash = auth_hash_hex(auth_key, &string_to_auth)?;
            Ok(EncryptedString::format_cbc(
                version,
                &auth_hash,
                uuid,
                &iv_hex,
                &ciphertext_b64,
            ))
        }
        // v001 shape: no authentication component.
        None => Ok(format!("{}:{}:{}:{}", version, uuid, iv_hex, ciphertext_b64)),
    }
}

/// Decrypts a parsed CBC framed string, verifying the auth hash when the
/// version carries one.
pub(crate) fn decrypt_framed_cbc(
    version: ProtocolVersion,
    expected_uuid: &Uuid,
    components: &CbcComponents,
    encryption_key_hex: &str,
    auth_key_hex: Option<&str>,
) -> Result<Vec<u8>, NotelockError> {
    if &components.uuid != expected_uuid {
        return Err(NotelockError::decryption(
            "encrypted string belongs to a different item",
        ));
    }
    if let Some(expected_hash) = &components.auth_hash {
        let auth_key = auth_key_hex.ok_or_else(|| {
            NotelockError::decryption("no authentication key available for authenticated content")
        })?;
        let string_to_auth = format!(
            "{}:{}:{}:{}",
            version, components.uuid, components.iv_hex, components.ciphertext_b64
        );
        verify_auth_hash(auth_key, &string_to_auth, expected_hash)?;
    }
    let iv = hex::decode(&components.iv_hex)
        .map_err(|_| NotelockError::decryption("iv is not valid hex"))?;
    if iv.len() != IV_LENGTH {
        return Err(NotelockError::decryption("iv has wrong length"));
    }
    let ciphertext = BASE64_STANDARD
        .decode(&components.ciphertext_b64)
        .map_err(|_| NotelockError::decryption("ciphertext is not valid base64"))?;
    cbc_decrypt(&ciphertext, encryption_key_hex, &iv)
}

/// Splits a 128-hex-char per-item key into encryption and HMAC halves.
pub(crate) fn split_item_key(item_key_hex: &str) -> Result<(&str, &str), NotelockError> {
    if item_key_hex.len() != KEY_LENGTH * 4 {
        return Err(NotelockError::decryption(format!(
            "per-item key has {} chars, expected {}",
            item_key_hex.len(),
            KEY_LENGTH * 4
        )));
    }
    Ok(item_key_hex.split_at(KEY_LENGTH * 2))
}

impl CryptoOperator for Operator003 {
    fn version(&self) -> ProtocolVersion {
        ProtocolVersion::V003
    }

    fn create_root_key(
        &self,
        identifier: &str,
        password: &str,
        _origination: KeyParamsOrigination,
    ) -> Result<RootKey, NotelockError> {
        let nonce = random_hex(PW_NONCE_LENGTH);
        let key_params = KeyParams::new_003(identifier, nonce);
        self.compute_root_key(password, &key_params)
    }

    fn compute_root_key(
        &self,
        password: &str,
        key_params: &KeyParams,
    ) -> Result<RootKey, NotelockError> {
        let salt = Self::derive_salt(&key_params.identifier, key_params.nonce()?);
        let mut derived = Zeroizing::new([0u8; DERIVED_KEY_LENGTH]);
        pbkdf2_sha512(password, salt.as_bytes(), PBKDF2_ITERATIONS, derived.as_mut())?;
        let master = &derived[..KEY_LENGTH];
        let server = &derived[KEY_LENGTH..KEY_LENGTH * 2];
        let auth = &derived[KEY_LENGTH * 2..];
        Ok(RootKey::new(
            hex::encode(master),
            Some(hex::encode(server)),
            Some(hex::encode(auth)),
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

        // Fresh per-item key: encryption half + authentication half.
        let item_key_hex = Zeroizing::new(random_hex(KEY_LENGTH * 2));
        let (ek, ak) = split_item_key(&item_key_hex)?;

        let encrypted_content = encrypt_framed_cbc(
            ProtocolVersion::V003,
            payload.uuid(),
            content_json.as_bytes(),
            ek,
            Some(ak),
        )?;
        let auth_key = key.auth_key_hex().ok_or_else(|| {
            NotelockError::encryption("v003 encryption requires a data authentication key")
        })?;
        let enc_item_key = encrypt_framed_cbc(
            ProtocolVersion::V003,
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
            version: ProtocolVersion::V003,
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

        let key_components = parse_cbc(enc_item_key, ProtocolVersion::V003)?;
        let item_key_bytes = Zeroizing::new(decrypt_framed_cbc(
            ProtocolVersion::V003,
            payload.uuid(),
            &key_components,
            key.material_hex(),
            key.auth_key_hex(),
        )?);
        let item_key_hex = std::str::from_utf8(&item_key_bytes)
            .map_err(|_| NotelockError::decryption("item key is not valid utf-8"))?;
        let (ek, ak) = split_item_key(item_key_hex)?;

        let content_components = parse_cbc(framed_content, ProtocolVersion::V003)?;
        let content_bytes = decrypt_framed_cbc(
            ProtocolVersion::V003,
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

/// Parses a CBC framed string and checks the version matches.
pub(crate) fn parse_cbc(
    framed: &str,
    expected_version: ProtocolVersion,
) -> Result<CbcComponents, NotelockError> {
    match EncryptedString::parse(framed)? {
        EncryptedString::Cbc { version, components } if version == expected_version => Ok(components),
        other => Err(NotelockError::decryption(format!(
            "expected a {} string, found {}",
            expected_version,
            other.version()
        ))),
    }
}
