// /////////////////////////////////////////////////////////////////////////////
// Notelock Sync Engine
// Copyright (c) 2025 Notelock Project Contributors
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Storage Service
//!
//! Persistence facade over the injected `DeviceInterface`. Three value
//! modes coexist:
//!
//! - **Wrapped** (the default): values live in an in-memory bucket that
//!   persists as a single envelope, encrypted through the protocol
//!   service whenever a root or passcode key exists.
//! - **Unwrapped**: plaintext values inside the same persisted document
//!   (session metadata that must be readable before keys are available).
//! - **Nonwrapped**: written straight to device raw storage; bootstrap
//!   values like the migration version marker that must survive storage
//!   encryption changes.
//!
//! Payload rows persist individually through the device bulk table,
//! encrypted with local-storage intent on the way down and decrypted on
//! the way up.
//!
//! The protocol service plugs in behind `StorageEncryptionDelegate`; the
//! slot is weak so the two services can reference each other without a
//! cycle keeping them alive.

use std::collections::BTreeMap;
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use notelock_domain::entities::{Payload, WirePayload};
use notelock_domain::error::NotelockError;
use notelock_domain::events::ApplicationEvent;
use notelock_domain::repositories::DeviceInterface;

use crate::application::event_bus::EventBus;
use crate::application::options::ApplicationOptions;

/// Well-known storage keys, namespaced by the application identifier.
pub mod storage_keys {
    /// Last-completed migration version.
    pub const ENGINE_VERSION: &str = "snjs_version";
    pub const LAST_SYNC_TOKEN: &str = "last_sync_token";
    pub const PAGINATION_TOKEN: &str = "pagination_token";
    pub const USER: &str = "user";
    pub const SESSION: &str = "session";
    pub const ROOT_KEY_WRAPPER_PARAMS: &str = "root_key_wrapper_params";
    pub const UNDECRYPTABLE_ITEMS: &str = "key_recovery_undecryptable_items";
    /// The persisted value document itself.
    pub const VALUES_DOCUMENT: &str = "storage_values";
}

/// How a value is persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageValueMode {
    /// Inside the encrypted envelope (default).
    Wrapped,
    /// Plaintext inside the persisted document.
    Unwrapped,
    /// Directly in device raw storage, always plaintext.
    Nonwrapped,
}

/// Encryption seam the protocol service implements.
#[async_trait]
pub trait StorageEncryptionDelegate: Send + Sync {
    /// Encrypts the wrapped-value envelope (plaintext framing when no key
    /// exists)
    async fn encrypt_storage_envelope(&self, value: &Value) -> Result<String, NotelockError>;

    /// Decrypts a persisted envelope
    async fn decrypt_storage_envelope(&self, raw: &str) -> Result<Value, NotelockError>;

    /// Encrypts one payload for a local database row
    async fn encrypt_payload_for_storage(
        &self,
        payload: &Payload,
    ) -> Result<WirePayload, NotelockError>;

    /// Decrypts one local database row
    async fn decrypt_payload_from_storage(
        &self,
        wire: &WirePayload,
    ) -> Result<Payload, NotelockError>;
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct PersistedValues {
    /// Encrypted (or `000`-framed) envelope of the wrapped bucket.
    #[serde(skip_serializing_if = "Option::is_none")]
    wrapped: Option<String>,
    #[serde(default)]
    unwrapped: BTreeMap<String, Value>,
}

/// Persistence facade over the device interface.
pub struct StorageService {
    device: Arc<dyn DeviceInterface>,
    events: Arc<EventBus>,
    options: ApplicationOptions,
    wrapped: RwLock<BTreeMap<String, Value>>,
    unwrapped: RwLock<BTreeMap<String, Value>>,
    delegate: RwLock<Option<Weak<dyn StorageEncryptionDelegate>>>,
}

impl StorageService {
    pub fn new(
        device: Arc<dyn DeviceInterface>,
        events: Arc<EventBus>,
        options: ApplicationOptions,
    ) -> Self {
        Self {
            device,
            events,
            options,
            wrapped: RwLock::new(BTreeMap::new()),
            unwrapped: RwLock::new(BTreeMap::new()),
            delegate: RwLock::new(None),
        }
    }

    /// Installs the encryption delegate (the protocol service)
    pub fn set_encryption_delegate(&self, delegate: Weak<dyn StorageEncryptionDelegate>) {
        *self.delegate.write() = Some(delegate);
    }

    fn delegate(&self) -> Result<Arc<dyn StorageEncryptionDelegate>, NotelockError> {
        self.delegate
            .read()
            .as_ref()
            .and_then(Weak::upgrade)
            .ok_or_else(|| NotelockError::internal("storage encryption delegate not installed"))
    }

    fn document_key(&self) -> String {
        self.options.namespaced_key(storage_keys::VALUES_DOCUMENT)
    }

    /// Loads the persisted value document into memory
    pub async fn initialize(&self) -> Result<(), NotelockError> {
        let raw = self
            .device
            .get_raw_storage_value(&self.document_key())
            .await
            .map_err(|e| self.read_error(e))?;
        let Some(raw) = raw else {
            return Ok(());
        };
        let document: PersistedValues = serde_json::from_str(&raw)?;
        *self.unwrapped.write() = document.unwrapped;
        if let Some(envelope) = document.wrapped {
            let value = self.delegate()?.decrypt_storage_envelope(&envelope).await?;
            if let Value::Object(map) = value {
                *self.wrapped.write() = map.into_iter().collect();
            }
        }
        Ok(())
    }

    async fn persist_values(&self) -> Result<(), NotelockError> {
        let wrapped_value = {
            let bucket = self.wrapped.read();
            Value::Object(bucket.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
        };
        let envelope = self.delegate()?.encrypt_storage_envelope(&wrapped_value).await?;
        let document = PersistedValues {
            wrapped: Some(envelope),
            unwrapped: self.unwrapped.read().clone(),
        };
        let raw = serde_json::to_string(&document)?;
        self.device
            .set_raw_storage_value(&self.document_key(), &raw)
            .await
            .map_err(|e| self.write_error(e))
    }

    /// Writes a value in the given mode
    pub async fn set_value(
        &self,
        key: &str,
        value: Value,
        mode: StorageValueMode,
    ) -> Result<(), NotelockError> {
        match mode {
            StorageValueMode::Wrapped => {
                self.wrapped.write().insert(key.to_string(), value);
                self.persist_values().await
            }
            StorageValueMode::Unwrapped => {
                self.unwrapped.write().insert(key.to_string(), value);
                self.persist_values().await
            }
            StorageValueMode::Nonwrapped => {
                let raw = serde_json::to_string(&value)?;
                self.device
                    .set_raw_storage_value(&self.options.namespaced_key(key), &raw)
                    .await
                    .map_err(|e| self.write_error(e))
            }
        }
    }

    /// Reads a value in the given mode
    pub async fn get_value(
        &self,
        key: &str,
        mode: StorageValueMode,
    ) -> Result<Option<Value>, NotelockError> {
        match mode {
            StorageValueMode::Wrapped => Ok(self.wrapped.read().get(key).cloned()),
            StorageValueMode::Unwrapped => Ok(self.unwrapped.read().get(key).cloned()),
            StorageValueMode::Nonwrapped => {
                let raw = self
                    .device
                    .get_raw_storage_value(&self.options.namespaced_key(key))
                    .await
                    .map_err(|e| self.read_error(e))?;
                match raw {
                    Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
                    None => Ok(None),
                }
            }
        }
    }

    /// Removes a value in the given mode
    pub async fn remove_value(
        &self,
        key: &str,
        mode: StorageValueMode,
    ) -> Result<(), NotelockError> {
        match mode {
            StorageValueMode::Wrapped => {
                self.wrapped.write().remove(key);
                self.persist_values().await
            }
            StorageValueMode::Unwrapped => {
                self.unwrapped.write().remove(key);
                self.persist_values().await
            }
            StorageValueMode::Nonwrapped => self
                .device
                .remove_raw_storage_value(&self.options.namespaced_key(key))
                .await
                .map_err(|e| self.write_error(e)),
        }
    }

    /// Persists payloads to the local database
    ///
    /// Deleted-and-clean payloads remove their row; everything else is
    /// encrypted with local-storage intent and upserted.
    pub async fn save_payloads(&self, payloads: &[Payload]) -> Result<(), NotelockError> {
        let delegate = self.delegate()?;
        for payload in payloads {
            if payload.deleted() && !payload.dirty() {
                self.device
                    .remove_raw_database_payload(payload.uuid())
                    .await
                    .map_err(|e| self.write_error(e))?;
                continue;
            }
            let wire = delegate.encrypt_payload_for_storage(payload).await?;
            self.device
                .save_raw_database_payload(&wire)
                .await
                .map_err(|e| self.write_error(e))?;
        }
        Ok(())
    }

    /// Loads and decrypts every payload row
    ///
    /// Rows that fail to decrypt come back flagged rather than dropped;
    /// the caller decides how to surface them.
    pub async fn load_all_payloads(&self) -> Result<Vec<Payload>, NotelockError> {
        let delegate = self.delegate()?;
        let rows = self
            .device
            .get_all_raw_database_payloads()
            .await
            .map_err(|e| self.read_error(e))?;
        let mut payloads = Vec::with_capacity(rows.len());
        for wire in rows {
            match delegate.decrypt_payload_from_storage(&wire).await {
                Ok(payload) => payloads.push(payload),
                Err(e) => {
                    warn!(uuid = %wire.uuid, error = %e, "failed to load payload row");
                    let payload = Payload::from_wire(&wire)?;
                    payloads.push(payload.copy().error_decrypting(true).build());
                }
            }
        }
        Ok(payloads)
    }

    /// Removes one payload row
    pub async fn remove_payload(&self, uuid: &uuid::Uuid) -> Result<(), NotelockError> {
        self.device
            .remove_raw_database_payload(uuid)
            .await
            .map_err(|e| self.write_error(e))
    }

    /// Clears all local data (sign-out)
    pub async fn clear_all(&self) -> Result<(), NotelockError> {
        self.wrapped.write().clear();
        self.unwrapped.write().clear();
        self.device
            .remove_raw_storage_value(&self.document_key())
            .await
            .map_err(|e| self.write_error(e))?;
        self.device
            .remove_all_raw_database_payloads()
            .await
            .map_err(|e| self.write_error(e))
    }

    fn read_error(&self, err: NotelockError) -> NotelockError {
        self.events.notify(ApplicationEvent::LocalDatabaseReadError);
        NotelockError::storage_read(err.to_string())
    }

    fn write_error(&self, err: NotelockError) -> NotelockError {
        self.events.notify(ApplicationEvent::LocalDatabaseWriteError);
        NotelockError::storage_write(err.to_string())
    }
}
