// /////////////////////////////////////////////////////////////////////////////
// Notelock Sync Engine
// Copyright (c) 2025 Notelock Project Contributors
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # In-Memory Device Interface
//!
//! A `DeviceInterface` backed by process memory. Hosts without platform
//! storage (and every integration test) inject this implementation;
//! production hosts wrap their native key-value store, database, and
//! keychain instead.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use uuid::Uuid;

use notelock_domain::entities::WirePayload;
use notelock_domain::error::NotelockError;
use notelock_domain::repositories::DeviceInterface;

/// Memory-backed device storage.
#[derive(Debug, Default)]
pub struct MemoryDeviceInterface {
    values: RwLock<HashMap<String, String>>,
    payloads: RwLock<HashMap<Uuid, WirePayload>>,
    keychain: RwLock<Option<Value>>,
}

impl MemoryDeviceInterface {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored payload rows (test inspection)
    pub fn payload_count(&self) -> usize {
        self.payloads.read().len()
    }
}

#[async_trait]
impl DeviceInterface for MemoryDeviceInterface {
    async fn get_raw_storage_value(&self, key: &str) -> Result<Option<String>, NotelockError> {
        Ok(self.values.read().get(key).cloned())
    }

    async fn set_raw_storage_value(&self, key: &str, value: &str) -> Result<(), NotelockError> {
        self.values.write().insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove_raw_storage_value(&self, key: &str) -> Result<(), NotelockError> {
        self.values.write().remove(key);
        Ok(())
    }

    async fn get_all_raw_database_payloads(&self) -> Result<Vec<WirePayload>, NotelockError> {
        Ok(self.payloads.read().values().cloned().collect())
    }

    async fn save_raw_database_payload(&self, payload: &WirePayload) -> Result<(), NotelockError> {
        self.payloads.write().insert(payload.uuid, payload.clone());
        Ok(())
    }

    async fn remove_raw_database_payload(&self, uuid: &Uuid) -> Result<(), NotelockError> {
        self.payloads.write().remove(uuid);
        Ok(())
    }

    async fn remove_all_raw_database_payloads(&self) -> Result<(), NotelockError> {
        self.payloads.write().clear();
        Ok(())
    }

    async fn get_keychain_value(&self) -> Result<Option<Value>, NotelockError> {
        Ok(self.keychain.read().clone())
    }

    async fn set_keychain_value(&self, value: Value) -> Result<(), NotelockError> {
        *self.keychain.write() = Some(value);
        Ok(())
    }

    async fn clear_keychain_value(&self) -> Result<(), NotelockError> {
        *self.keychain.write() = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_value_roundtrip() {
        let device = MemoryDeviceInterface::new();
        device.set_raw_storage_value("k", "v").await.unwrap();
        assert_eq!(device.get_raw_storage_value("k").await.unwrap(), Some("v".to_string()));
        device.remove_raw_storage_value("k").await.unwrap();
        assert_eq!(device.get_raw_storage_value("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_payload_rows_key_by_uuid() {
        let device = MemoryDeviceInterface::new();
        let wire = WirePayload {
            uuid: Uuid::new_v4(),
            content_type: "Note".to_string(),
            content: None,
            enc_item_key: None,
            items_key_id: None,
            created_at: None,
            updated_at: None,
            deleted: false,
            auth_hash: None,
            auth_params: None,
            dirty: None,
        };
        device.save_raw_database_payload(&wire).await.unwrap();
        device.save_raw_database_payload(&wire).await.unwrap();
        assert_eq!(device.payload_count(), 1);
        device.remove_raw_database_payload(&wire.uuid).await.unwrap();
        assert_eq!(device.payload_count(), 0);
    }

    #[tokio::test]
    async fn test_keychain_slot() {
        let device = MemoryDeviceInterface::new();
        assert!(device.get_keychain_value().await.unwrap().is_none());
        device.set_keychain_value(json!({"version": "004"})).await.unwrap();
        assert!(device.get_keychain_value().await.unwrap().is_some());
        device.clear_keychain_value().await.unwrap();
        assert!(device.get_keychain_value().await.unwrap().is_none());
    }
}
