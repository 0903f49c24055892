// /////////////////////////////////////////////////////////////////////////////
// Notelock Sync Engine
// Copyright (c) 2025 Notelock Project Contributors
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Protocol Service
//!
//! Orchestrates the versioned crypto operators: selects the operator by
//! the 3-digit version tag, selects the wrapping key for each operation,
//! and manages the key hierarchy (root key lifecycle, keychain
//! persistence, passcode wrapping, items-key creation and default
//! selection).
//!
//! ## Key Selection
//!
//! - Items keys (and the storage envelope) encrypt under the root key —
//!   or under the passcode-derived wrapper key when no account exists.
//! - Every other payload encrypts under the default items key.
//! - A v004 payload whose `items_key_id` is not present locally is parked
//!   with `waiting_for_key=true` and retried when the key arrives.
//!
//! ## Decryption Pipeline
//!
//! `decrypt_payload` never returns an error for content failures: the
//! outcome is recorded on the returned payload (`error_decrypting`,
//! `waiting_for_key`) and the ciphertext is preserved for later repair.
//! Already-decrypted payloads pass through untouched. `000` content is
//! decoded unconditionally.

use std::sync::Arc;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine as _;
use parking_lot::RwLock;
use serde_json::{json, Value};
use tracing::{debug, info, warn};
use uuid::Uuid;

use notelock_domain::entities::{
    Item, ItemsKey, Payload, PayloadSource, RootKey, WirePayload,
};
use notelock_domain::error::NotelockError;
use notelock_domain::events::ApplicationEvent;
use notelock_domain::repositories::DeviceInterface;
use notelock_domain::services::{CryptoOperator, EncryptionIntent, OperatorKey};
use notelock_domain::value_objects::{
    ContentType, ItemContent, KeyParams, KeyParamsOrigination, ProtocolVersion,
};

use crate::application::event_bus::EventBus;
use crate::application::options::ApplicationOptions;
use crate::application::services::payload_manager::PayloadManager;
use crate::application::services::storage::{
    storage_keys, StorageEncryptionDelegate, StorageService, StorageValueMode,
};
use crate::infrastructure::adapters::OperatorRegistry;

/// Crypto orchestration and key hierarchy management.
pub struct ProtocolService {
    operators: OperatorRegistry,
    payloads: Arc<PayloadManager>,
    device: Arc<dyn DeviceInterface>,
    events: Arc<EventBus>,
    options: ApplicationOptions,
    root_key: RwLock<Option<RootKey>>,
    /// Passcode-derived key wrapping the root key (and local storage when
    /// no account exists).
    wrapper_key: RwLock<Option<RootKey>>,
}

impl ProtocolService {
    pub fn new(
        operators: OperatorRegistry,
        payloads: Arc<PayloadManager>,
        device: Arc<dyn DeviceInterface>,
        events: Arc<EventBus>,
        options: ApplicationOptions,
    ) -> Self {
        Self {
            operators,
            payloads,
            device,
            events,
            options,
            root_key: RwLock::new(None),
            wrapper_key: RwLock::new(None),
        }
    }

    /// Looks up the operator for a protocol version
    pub fn operator_for(&self, version: ProtocolVersion) -> Result<Arc<dyn CryptoOperator>, NotelockError> {
        self.operators
            .get(&version)
            .cloned()
            .ok_or_else(|| NotelockError::UnsupportedVersion(version.to_string()))
    }

    fn latest_operator(&self) -> Result<Arc<dyn CryptoOperator>, NotelockError> {
        self.operator_for(ProtocolVersion::LATEST)
    }

    // ---- root key lifecycle -------------------------------------------------

    /// Derives a brand-new root key with fresh salt inputs
    pub fn create_root_key(
        &self,
        identifier: &str,
        password: &str,
        origination: KeyParamsOrigination,
    ) -> Result<RootKey, NotelockError> {
        self.latest_operator()?.create_root_key(identifier, password, origination)
    }

    /// Re-derives a root key from existing key params
    pub fn compute_root_key(
        &self,
        password: &str,
        key_params: &KeyParams,
    ) -> Result<RootKey, NotelockError> {
        self.operator_for(key_params.version)?.compute_root_key(password, key_params)
    }

    /// Installs the in-memory root key (server password stripped)
    pub fn set_root_key(&self, root_key: RootKey) {
        *self.root_key.write() = Some(root_key.without_server_password());
        self.events.notify(ApplicationEvent::KeyStatusChanged);
    }

    pub fn root_key(&self) -> Option<RootKey> {
        self.root_key.read().clone()
    }

    pub fn has_root_key(&self) -> bool {
        self.root_key.read().is_some()
    }

    /// Key params of the current account, if signed in
    pub fn account_key_params(&self) -> Option<KeyParams> {
        self.root_key.read().as_ref().map(|k| k.key_params().clone())
    }

    pub fn clear_root_key(&self) {
        *self.root_key.write() = None;
        self.events.notify(ApplicationEvent::KeyStatusChanged);
    }

    /// Persists the root key to the keychain, wrapped by the passcode key
    /// when one is configured
    pub async fn persist_root_key(&self) -> Result<(), NotelockError> {
        let Some(root_key) = self.root_key() else {
            return Ok(());
        };
        let value = match self.wrapper_key.read().clone() {
            Some(wrapper) => {
                let wire = self.wrap_root_key(&root_key, &wrapper)?;
                json!({ "wrapped": wire })
            }
            None => serde_json::to_value(&root_key)?,
        };
        self.device.set_keychain_value(value).await
    }

    fn wrap_root_key(&self, root_key: &RootKey, wrapper: &RootKey) -> Result<Value, NotelockError> {
        let content = ItemContent::from_value(serde_json::to_value(root_key)?)?;
        let payload = Payload::builder(ContentType::Other("SN|RootKeyEnvelope".to_string()))
            .decrypted_content(content)
            .build();
        let operator = self.operator_for(wrapper.version())?;
        let params = operator.encrypt_payload(&payload, &OperatorKey::from_root_key(wrapper))?;
        let wire = payload
            .copy()
            .encrypted_content(params.content)
            .enc_item_key(params.enc_item_key)
            .build()
            .to_wire();
        Ok(serde_json::to_value(wire)?)
    }

    fn unwrap_root_key(&self, wire_value: &Value, wrapper: &RootKey) -> Result<RootKey, NotelockError> {
        let wire: WirePayload = serde_json::from_value(wire_value.clone())?;
        let payload = Payload::from_wire(&wire)?;
        let operator = self.operator_for(wrapper.version())?;
        let decrypted =
            operator.decrypt_payload(&payload, &OperatorKey::from_root_key(wrapper))?;
        serde_json::from_value(decrypted.content.to_value()).map_err(NotelockError::from)
    }

    /// Loads the root key from the keychain at launch
    ///
    /// `passcode` is required when a wrapper is configured; a wrong
    /// passcode surfaces as an authentication failure.
    pub async fn load_root_key(
        &self,
        storage: &StorageService,
        passcode: Option<&str>,
    ) -> Result<bool, NotelockError> {
        let Some(value) = self.device.get_keychain_value().await? else {
            return Ok(false);
        };
        if !value.is_object() {
            // Legacy keychain shape; the migration service repairs it at
            // sign-in.
            warn!("keychain value has a legacy shape; skipping root key load");
            return Ok(false);
        }
        let root_key = match value.get("wrapped") {
            Some(wrapped) => {
                let wrapper_params = storage
                    .get_value(storage_keys::ROOT_KEY_WRAPPER_PARAMS, StorageValueMode::Nonwrapped)
                    .await?
                    .ok_or_else(|| {
                        NotelockError::invalid_config("keychain is wrapped but no wrapper params exist")
                    })?;
                let wrapper_params: KeyParams = serde_json::from_value(wrapper_params)?;
                let passcode = passcode.ok_or_else(|| {
                    NotelockError::AuthenticationFailed("a passcode is required to unlock storage".to_string())
                })?;
                let wrapper = self.compute_root_key(passcode, &wrapper_params)?;
                let root_key = self.unwrap_root_key(wrapped, &wrapper)?;
                *self.wrapper_key.write() = Some(wrapper);
                root_key
            }
            None => serde_json::from_value(value)?,
        };
        self.set_root_key(root_key);
        Ok(true)
    }

    /// Configures a local passcode and re-persists the root key wrapped
    pub async fn set_passcode(
        &self,
        storage: &StorageService,
        passcode: &str,
    ) -> Result<(), NotelockError> {
        let wrapper = self.create_root_key(
            &self.options.identifier,
            passcode,
            KeyParamsOrigination::ProtocolUpgrade,
        )?;
        storage
            .set_value(
                storage_keys::ROOT_KEY_WRAPPER_PARAMS,
                serde_json::to_value(wrapper.key_params())?,
                StorageValueMode::Nonwrapped,
            )
            .await?;
        *self.wrapper_key.write() = Some(wrapper);
        self.persist_root_key().await?;
        self.events.notify(ApplicationEvent::KeyStatusChanged);
        Ok(())
    }

    /// Clears the keychain and in-memory keys (sign-out)
    pub async fn clear_keys(&self) -> Result<(), NotelockError> {
        self.clear_root_key();
        *self.wrapper_key.write() = None;
        self.device.clear_keychain_value().await
    }

    // ---- items keys ---------------------------------------------------------

    /// All decrypted, live items keys
    pub fn items_keys(&self) -> Vec<ItemsKey> {
        self.payloads
            .all_of_type(&ContentType::ItemsKey)
            .into_iter()
            .filter(|p| !p.deleted() && p.content().is_decrypted())
            .filter_map(|p| Item::from_payload(p).ok())
            .filter_map(|i| ItemsKey::from_item(i).ok())
            .collect()
    }

    /// The items key used for new encryptions
    ///
    /// Prefers the key flagged default; falls back to the newest valid
    /// key when no flag survives a conflict.
    pub fn default_items_key(&self) -> Option<ItemsKey> {
        let keys = self.items_keys();
        keys.iter()
            .find(|k| k.is_default())
            .cloned()
            .or_else(|| keys.into_iter().max_by_key(|k| (*k.created_at(), *k.uuid())))
    }

    pub fn items_key_for_id(&self, uuid: &Uuid) -> Option<ItemsKey> {
        self.payloads
            .find(uuid)
            .filter(|p| !p.deleted() && p.content().is_decrypted())
            .and_then(|p| Item::from_payload(p).ok())
            .and_then(|i| ItemsKey::from_item(i).ok())
    }

    /// Creates a fresh default items key, un-defaulting any predecessor
    pub fn create_new_default_items_key(&self) -> Result<ItemsKey, NotelockError> {
        let material = self.latest_operator()?.generate_items_key_material();
        let payload = ItemsKey::new_payload(material, ProtocolVersion::LATEST, true);

        let mut emissions = Vec::new();
        for existing in self.items_keys() {
            if existing.is_default() {
                emissions.push(existing.payload_with_default(false));
            }
        }
        emissions.push(payload.clone());
        self.payloads.emit_payloads(emissions, PayloadSource::Constructor);
        info!(uuid = %payload.uuid(), "created new default items key");
        self.events.notify(ApplicationEvent::KeyStatusChanged);

        ItemsKey::from_item(Item::from_payload(payload)?)
    }

    fn operator_key_for_items_key(key: &ItemsKey) -> OperatorKey {
        OperatorKey::new(
            Some(*key.uuid()),
            key.material_hex().to_string(),
            key.data_authentication_key().map(str::to_string),
        )
    }

    /// The key available for local/root-scoped encryption, if any
    fn root_scope_key(&self) -> Option<RootKey> {
        self.root_key().or_else(|| self.wrapper_key.read().clone())
    }

    // ---- unencrypted framing ------------------------------------------------

    /// Encodes content in the explicit `000` unencrypted framing
    pub fn encode_unencrypted(content: &ItemContent) -> Result<String, NotelockError> {
        let json = serde_json::to_string(&content.to_value())?;
        Ok(format!("{}{}", ProtocolVersion::V000, BASE64_STANDARD.encode(json)))
    }

    /// Decodes `000`-framed content; always succeeds for well-formed input
    pub fn decode_unencrypted(string: &str) -> Result<ItemContent, NotelockError> {
        let body = string
            .strip_prefix(ProtocolVersion::V000.as_str())
            .ok_or_else(|| NotelockError::invalid_payload("missing 000 prefix"))?;
        let bytes = BASE64_STANDARD
            .decode(body)
            .map_err(|e| NotelockError::decryption(format!("invalid 000 encoding: {}", e)))?;
        let value: Value = serde_json::from_slice(&bytes)?;
        ItemContent::from_value(value).map_err(NotelockError::from)
    }

    // ---- payload encryption / decryption ------------------------------------

    /// Encrypts a payload per the given intent
    ///
    /// # Errors
    ///
    /// * `KeyNotAvailable` - the intent requires encryption but no usable
    ///   key exists
    pub fn encrypt_payload(
        &self,
        payload: &Payload,
        intent: EncryptionIntent,
    ) -> Result<Payload, NotelockError> {
        if !payload.content().is_decrypted() {
            // Tombstones and still-encrypted payloads pass through.
            return Ok(payload.clone());
        }
        if !intent.prefers_encryption() {
            let content = payload.decrypted_content()?;
            return Ok(payload
                .copy()
                .encrypted_content(Self::encode_unencrypted(content)?)
                .enc_item_key(None)
                .items_key_id(None)
                .build());
        }

        enum Wrap {
            Items(ItemsKey),
            Root(RootKey),
        }

        let wrap = if payload.content_type() == &ContentType::ItemsKey {
            self.root_scope_key().map(Wrap::Root)
        } else {
            self.default_items_key()
                .map(Wrap::Items)
                .or_else(|| self.root_scope_key().map(Wrap::Root))
        };

        let (operator_key, version) = match wrap {
            Some(Wrap::Items(key)) => (Self::operator_key_for_items_key(&key), key.version()),
            Some(Wrap::Root(key)) => (OperatorKey::from_root_key(&key), key.version()),
            None => {
                if intent.requires_encryption() {
                    return Err(NotelockError::KeyNotAvailable(format!(
                        "no key available to encrypt payload {}",
                        payload.uuid()
                    )));
                }
                let content = payload.decrypted_content()?;
                return Ok(payload
                    .copy()
                    .encrypted_content(Self::encode_unencrypted(content)?)
                    .enc_item_key(None)
                    .items_key_id(None)
                    .build());
            }
        };

        let operator = self.operator_for(version)?;
        let params = operator.encrypt_payload(payload, &operator_key)?;
        Ok(payload
            .copy()
            .encrypted_content(params.content)
            .enc_item_key(params.enc_item_key)
            .items_key_id(params.items_key_id)
            .auth_hash(params.auth_hash)
            .build())
    }

    /// Decrypts a payload, recording failures on the result
    ///
    /// Never fails for content reasons: a missing key parks the payload
    /// (`waiting_for_key`), an authentication failure marks it
    /// (`error_decrypting`) with the ciphertext preserved.
    pub fn decrypt_payload(&self, payload: &Payload) -> Payload {
        let Some(string) = payload.content().encrypted_string().map(str::to_string) else {
            // Already decrypted or content-less.
            return payload.clone();
        };

        if string.starts_with(ProtocolVersion::V000.as_str()) {
            return match Self::decode_unencrypted(&string) {
                Ok(content) => payload
                    .copy()
                    .decrypted_content(content)
                    .enc_item_key(None)
                    .items_key_id(None)
                    .error_decrypting(false)
                    .waiting_for_key(false)
                    .build(),
                Err(e) => {
                    warn!(uuid = %payload.uuid(), error = %e, "invalid 000 payload");
                    payload.copy().error_decrypting(true).build()
                }
            };
        }

        let version = match ProtocolVersion::from_encrypted_string(&string) {
            Ok(version) => version,
            Err(e) => {
                warn!(uuid = %payload.uuid(), error = %e, "unknown protocol version");
                return payload.copy().error_decrypting(true).build();
            }
        };

        let operator_key = match self.resolve_decryption_key(payload, version) {
            Ok(Some(key)) => key,
            Ok(None) => {
                debug!(uuid = %payload.uuid(), "payload waiting for key");
                return payload.copy().waiting_for_key(true).build();
            }
            Err(e) => {
                warn!(uuid = %payload.uuid(), error = %e, "no decryption key");
                return payload.copy().error_decrypting(true).build();
            }
        };

        let operator = match self.operator_for(version) {
            Ok(operator) => operator,
            Err(e) => {
                warn!(uuid = %payload.uuid(), error = %e, "unsupported version");
                return payload.copy().error_decrypting(true).build();
            }
        };

        match operator.decrypt_payload(payload, &operator_key) {
            Ok(params) => payload
                .copy()
                .decrypted_content(params.content)
                .enc_item_key(None)
                .items_key_id(payload.items_key_id().copied())
                .error_decrypting(false)
                .waiting_for_key(false)
                .build(),
            Err(e) => {
                warn!(uuid = %payload.uuid(), error = %e, "decryption failed");
                payload.copy().error_decrypting(true).build()
            }
        }
    }

    /// Chooses the wrapping key for decryption
    ///
    /// `Ok(None)` means the needed key is not present yet.
    fn resolve_decryption_key(
        &self,
        payload: &Payload,
        version: ProtocolVersion,
    ) -> Result<Option<OperatorKey>, NotelockError> {
        if payload.content_type() == &ContentType::ItemsKey {
            return Ok(self.root_scope_key().map(|k| OperatorKey::from_root_key(&k)));
        }
        if version == ProtocolVersion::V004 {
            if let Some(items_key_id) = payload.items_key_id() {
                return Ok(self
                    .items_key_for_id(items_key_id)
                    .map(|k| Self::operator_key_for_items_key(&k)));
            }
        }
        Ok(self.root_scope_key().map(|k| OperatorKey::from_root_key(&k)))
    }

    /// Decrypts a batch, in arrival order
    pub fn decrypt_payloads(&self, payloads: &[Payload]) -> Vec<Payload> {
        payloads.iter().map(|p| self.decrypt_payload(p)).collect()
    }

    /// Re-runs decryption for payloads parked on a missing key
    ///
    /// Called when new items keys arrive; returns the repaired payloads
    /// for re-emission.
    pub fn repair_waiting_payloads(&self) -> Vec<Payload> {
        let waiting: Vec<Payload> = self
            .payloads
            .all()
            .into_iter()
            .filter(|p| p.waiting_for_key() || p.error_decrypting())
            .collect();
        waiting
            .iter()
            .map(|p| self.decrypt_payload(&p.copy().waiting_for_key(false).build()))
            .filter(|p| p.content().is_decrypted())
            .collect()
    }
}

#[async_trait]
impl StorageEncryptionDelegate for ProtocolService {
    async fn encrypt_storage_envelope(&self, value: &Value) -> Result<String, NotelockError> {
        match self.root_scope_key() {
            Some(key) => {
                let content = ItemContent::from_value(json!({ "values": value }))?;
                let payload = Payload::builder(ContentType::Other("SN|StorageEnvelope".to_string()))
                    .decrypted_content(content)
                    .build();
                let operator = self.operator_for(key.version())?;
                let params =
                    operator.encrypt_payload(&payload, &OperatorKey::from_root_key(&key))?;
                let wire = payload
                    .copy()
                    .encrypted_content(params.content)
                    .enc_item_key(params.enc_item_key)
                    .build()
                    .to_wire();
                serde_json::to_string(&wire).map_err(NotelockError::from)
            }
            None => {
                let content = ItemContent::from_value(json!({ "values": value }))?;
                Self::encode_unencrypted(&content)
            }
        }
    }

    async fn decrypt_storage_envelope(&self, raw: &str) -> Result<Value, NotelockError> {
        let content = if raw.starts_with(ProtocolVersion::V000.as_str()) {
            Self::decode_unencrypted(raw)?
        } else {
            let wire: WirePayload = serde_json::from_str(raw)?;
            let payload = Payload::from_wire(&wire)?;
            let key = self.root_scope_key().ok_or_else(|| {
                NotelockError::KeyNotAvailable("storage envelope is encrypted but no key is loaded".to_string())
            })?;
            let operator = self.operator_for(key.version())?;
            operator
                .decrypt_payload(&payload, &OperatorKey::from_root_key(&key))
                .map(|params| params.content)?
        };
        Ok(content.field("values").cloned().unwrap_or(Value::Null))
    }

    async fn encrypt_payload_for_storage(
        &self,
        payload: &Payload,
    ) -> Result<WirePayload, NotelockError> {
        if !payload.content().is_decrypted() {
            return Ok(payload.to_local_row());
        }
        let encrypted = self.encrypt_payload(payload, EncryptionIntent::LocalStoragePreferEncrypted)?;
        Ok(encrypted.to_local_row())
    }

    async fn decrypt_payload_from_storage(
        &self,
        wire: &WirePayload,
    ) -> Result<Payload, NotelockError> {
        let payload = Payload::from_wire(wire)?;
        Ok(self.decrypt_payload(&payload))
    }
}
