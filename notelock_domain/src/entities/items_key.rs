// /////////////////////////////////////////////////////////////////////////////
// Notelock Sync Engine
// Copyright (c) 2025 Notelock Project Contributors
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Items Key
//!
//! A per-user symmetric key stored as a regular syncable item
//! (`SN|ItemsKey`), itself encrypted under the root key. Items keys wrap
//! the per-item keys of every other item. A user may hold several items
//! keys after password changes or protocol upgrades; exactly one is the
//! *default* used for new encryptions.
//!
//! Key material is immutable once created: an items key arriving from the
//! server that fails to decrypt is always a key mismatch, never an update,
//! which is why the payload manager's ignored-key rule preserves the local
//! copy.

use chrono::{DateTime, Utc};
use serde_json::json;
use uuid::Uuid;

use crate::entities::payload::Payload;
use crate::entities::Item;
use crate::error::NotelockError;
use crate::value_objects::{ContentType, ItemContent, ProtocolVersion};

const FIELD_ITEMS_KEY: &str = "itemsKey";
const FIELD_DATA_AUTH_KEY: &str = "dataAuthenticationKey";
const FIELD_VERSION: &str = "version";
const FIELD_IS_DEFAULT: &str = "isDefault";

/// Typed view over an `SN|ItemsKey` payload.
#[derive(Debug, Clone)]
pub struct ItemsKey {
    item: Item,
}

impl ItemsKey {
    /// Wraps a decrypted items-key payload
    ///
    /// # Errors
    ///
    /// * `InvalidPayload` - wrong content type or missing key material
    pub fn from_item(item: Item) -> Result<Self, NotelockError> {
        if item.content_type() != &ContentType::ItemsKey {
            return Err(NotelockError::invalid_payload(format!(
                "expected SN|ItemsKey payload, got {}",
                item.content_type()
            )));
        }
        if item.content().string_field(FIELD_ITEMS_KEY).is_none() {
            return Err(NotelockError::invalid_payload(format!(
                "items key {} carries no key material",
                item.uuid()
            )));
        }
        Ok(Self { item })
    }

    /// Builds a brand-new items key payload with fresh material
    ///
    /// The caller supplies hex-encoded material from the operator's random
    /// generator; the payload is created dirty so it uploads on the next
    /// sync round.
    pub fn new_payload(
        material_hex: String,
        version: ProtocolVersion,
        is_default: bool,
    ) -> Payload {
        let mut content = ItemContent::new();
        content.set_field(FIELD_ITEMS_KEY, json!(material_hex));
        content.set_field(FIELD_VERSION, json!(version.as_str()));
        content.set_field(FIELD_IS_DEFAULT, json!(is_default));
        Payload::builder(ContentType::ItemsKey)
            .decrypted_content(content)
            .dirty(true)
            .build()
    }

    pub fn uuid(&self) -> &Uuid {
        self.item.uuid()
    }

    pub fn item(&self) -> &Item {
        &self.item
    }

    pub fn payload(&self) -> &Payload {
        self.item.payload()
    }

    /// Hex-encoded symmetric key material
    pub fn material_hex(&self) -> &str {
        // Presence validated in from_item.
        self.item.content().string_field(FIELD_ITEMS_KEY).unwrap_or_default()
    }

    /// HMAC key material for keys minted under protocol ≤003
    pub fn data_authentication_key(&self) -> Option<&str> {
        self.item.content().string_field(FIELD_DATA_AUTH_KEY)
    }

    /// Protocol version this key encrypts with
    pub fn version(&self) -> ProtocolVersion {
        self.item
            .content()
            .string_field(FIELD_VERSION)
            .and_then(|v| v.parse().ok())
            .unwrap_or(ProtocolVersion::LATEST)
    }

    /// Whether this key is the default for new encryptions
    pub fn is_default(&self) -> bool {
        self.item
            .content()
            .field(FIELD_IS_DEFAULT)
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(false)
    }

    pub fn created_at(&self) -> &DateTime<Utc> {
        self.item.created_at()
    }

    /// Copies the backing payload with the default flag changed
    ///
    /// Key material never changes; toggling the default flag is the only
    /// permitted mutation, and it produces a new dirty payload.
    pub fn payload_with_default(&self, is_default: bool) -> Payload {
        let mut content = self.item.content().clone();
        content.set_field(FIELD_IS_DEFAULT, json!(is_default));
        self.item
            .payload()
            .copy()
            .decrypted_content(content)
            .dirty(true)
            .build()
    }
}

/// Selects the newest valid items key out of a set of candidate payloads.
///
/// Used by key recovery to decide whether a rescued key should become the
/// new root of trust: only keys that decrypt cleanly participate, ordered
/// by server creation time.
pub fn newest_valid_items_key(payloads: &[&Payload]) -> Option<Uuid> {
    payloads
        .iter()
        .filter(|p| !p.error_decrypting() && !p.deleted() && p.content().is_decrypted())
        .max_by_key(|p| (*p.created_at(), *p.uuid()))
        .map(|p| *p.uuid())
}

/// Checks whether an incoming items-key payload should be ignored.
///
/// True when the arrival failed decryption while the master copy is
/// healthy; the master copy is preserved and the arrival is routed into
/// the ignored set of the emission.
pub fn should_ignore_items_key_arrival(incoming: &Payload, master: Option<&Payload>) -> bool {
    if incoming.content_type() != &ContentType::ItemsKey {
        return false;
    }
    if !incoming.error_decrypting() {
        return false;
    }
    match master {
        Some(current) => !current.error_decrypting() && current.content().is_decrypted(),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decrypted_key_payload(is_default: bool) -> Payload {
        ItemsKey::new_payload("ab".repeat(32), ProtocolVersion::V004, is_default)
    }

    #[test]
    fn test_new_payload_is_dirty_items_key() {
        let payload = decrypted_key_payload(true);
        assert_eq!(payload.content_type(), &ContentType::ItemsKey);
        assert!(payload.dirty());

        let key = ItemsKey::from_item(Item::from_payload(payload).unwrap()).unwrap();
        assert!(key.is_default());
        assert_eq!(key.version(), ProtocolVersion::V004);
        assert_eq!(key.material_hex(), "ab".repeat(32));
    }

    #[test]
    fn test_wrong_content_type_rejected() {
        let payload = Payload::builder(ContentType::Note)
            .decrypted_content(ItemContent::new())
            .build();
        let item = Item::from_payload(payload).unwrap();
        assert!(ItemsKey::from_item(item).is_err());
    }

    #[test]
    fn test_ignore_rule_requires_healthy_master() {
        let master = decrypted_key_payload(true);
        let incoming = master.copy().error_decrypting(true).encrypted_content("004:a:b:c").build();
        assert!(should_ignore_items_key_arrival(&incoming, Some(&master)));

        // No master copy: nothing to protect.
        assert!(!should_ignore_items_key_arrival(&incoming, None));

        // Healthy arrival: normal emission.
        assert!(!should_ignore_items_key_arrival(&master, Some(&master)));
    }

    #[test]
    fn test_newest_valid_key_selection() {
        let older = decrypted_key_payload(false)
            .copy()
            .created_at(Utc::now() - chrono::Duration::days(2))
            .build();
        let newer = decrypted_key_payload(false);
        let errored = decrypted_key_payload(false)
            .copy()
            .error_decrypting(true)
            .build();
        let chosen = newest_valid_items_key(&[&older, &newer, &errored]);
        assert_eq!(chosen, Some(*newer.uuid()));
    }

    #[test]
    fn test_source_is_remote_helper() {
        use crate::entities::PayloadSource;
        assert!(PayloadSource::RemoteRetrieved.is_remote());
        assert!(!PayloadSource::LocalChanged.is_remote());
    }
}
