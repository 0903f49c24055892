// /////////////////////////////////////////////////////////////////////////////
// Notelock Sync Engine
// Copyright (c) 2025 Notelock Project Contributors
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Device Interface Port
//!
//! The narrow persistence surface a host platform injects: a raw string
//! key-value store, a bulk payload table keyed by uuid, and a keychain
//! slot for the wrapped root key. The engine layers namespacing, value
//! wrapping, and payload encryption on top in its storage service; the
//! device side stores exactly what it is given.

use async_trait::async_trait;
use serde_json::Value;
use uuid::Uuid;

use crate::entities::WirePayload;
use crate::error::NotelockError;

/// Host-provided persistence backend.
#[async_trait]
pub trait DeviceInterface: Send + Sync {
    /// Reads a raw storage value
    async fn get_raw_storage_value(&self, key: &str) -> Result<Option<String>, NotelockError>;

    /// Writes a raw storage value
    async fn set_raw_storage_value(&self, key: &str, value: &str) -> Result<(), NotelockError>;

    /// Removes a raw storage value
    async fn remove_raw_storage_value(&self, key: &str) -> Result<(), NotelockError>;

    /// Reads every payload row in the local database
    async fn get_all_raw_database_payloads(&self) -> Result<Vec<WirePayload>, NotelockError>;

    /// Inserts or replaces one payload row
    async fn save_raw_database_payload(&self, payload: &WirePayload) -> Result<(), NotelockError>;

    /// Removes one payload row
    async fn remove_raw_database_payload(&self, uuid: &Uuid) -> Result<(), NotelockError>;

    /// Removes every payload row
    async fn remove_all_raw_database_payloads(&self) -> Result<(), NotelockError>;

    /// Reads the keychain slot
    async fn get_keychain_value(&self) -> Result<Option<Value>, NotelockError>;

    /// Writes the keychain slot
    async fn set_keychain_value(&self, value: Value) -> Result<(), NotelockError>;

    /// Clears the keychain slot
    async fn clear_keychain_value(&self) -> Result<(), NotelockError>;
}
