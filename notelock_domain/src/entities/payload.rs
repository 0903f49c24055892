// /////////////////////////////////////////////////////////////////////////////
// Notelock Sync Engine
// Copyright (c) 2025 Notelock Project Contributors
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Payload Entity
//!
//! The atomic unit of the engine: one version of one item's state plus its
//! sync bookkeeping. Payloads are immutable after construction; every
//! state transition produces a new payload through `PayloadBuilder` or a
//! `copy_with` projection.
//!
//! ## Field Groups
//!
//! - **Identity**: `uuid`, `content_type`
//! - **Content**: decrypted object, framed ciphertext string, or absent;
//!   plus `enc_item_key` and `items_key_id` when encrypted
//! - **Server timestamps**: `created_at`, `updated_at` (microsecond
//!   precision, authoritative from the server; `updated_at` at the epoch
//!   means the item has never been synced)
//! - **Local bookkeeping**: `dirty`, `dirtied_date`, `last_sync_began`,
//!   `last_sync_end`, `deleted`, `error_decrypting`, `waiting_for_key`
//! - **Legacy**: `auth_hash`, `auth_params` (v001/v002)
//!
//! ## Wire Shape
//!
//! The server only ever sees the wire subset (`WirePayload`): identity,
//! ciphertext, key linkage, timestamps, tombstone flag. Local bookkeeping
//! never leaves the device.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::NotelockError;
use crate::value_objects::{ContentType, ItemContent, ProtocolVersion};

/// Where a payload emission originated.
///
/// Sources drive delta selection during sync response handling and decide
/// which side wins when bookkeeping conflicts (e.g. a remote arrival never
/// clears a local dirty flag by itself).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PayloadSource {
    /// Constructed locally, never emitted before.
    Constructor,
    /// Produced by a local mutation through an item mutator.
    LocalChanged,
    /// Loaded from the local database at launch.
    LocalDatabaseLoaded,
    /// Persisted locally; emission confirms the write.
    LocalSaved,
    /// Downloaded from the server during a sync round.
    RemoteRetrieved,
    /// Acknowledged by the server as saved (metadata only).
    RemoteSaved,
    /// Rejected by the server during save.
    RemoteRejected,
    /// Produced by conflict resolution.
    ConflictData,
    /// Imported from a local backup file.
    FileImport,
}

impl PayloadSource {
    /// Checks whether the payload arrived from the server
    pub fn is_remote(&self) -> bool {
        matches!(
            self,
            PayloadSource::RemoteRetrieved | PayloadSource::RemoteSaved | PayloadSource::RemoteRejected
        )
    }

    /// Sources whose payload variant omits content.
    ///
    /// Such payloads must be merged with the master copy's content before
    /// they are persisted or emitted onward.
    pub fn omits_content(&self) -> bool {
        matches!(self, PayloadSource::RemoteSaved)
    }
}

/// Content slot of a payload.
#[derive(Debug, Clone, PartialEq)]
pub enum PayloadContent {
    /// Decrypted content object.
    Decrypted(ItemContent),
    /// Framed ciphertext string (3-digit version tag prefix).
    Encrypted(String),
    /// No content (tombstones, metadata-only server acknowledgements).
    Absent,
}

impl PayloadContent {
    pub fn is_decrypted(&self) -> bool {
        matches!(self, PayloadContent::Decrypted(_))
    }

    pub fn is_encrypted(&self) -> bool {
        matches!(self, PayloadContent::Encrypted(_))
    }

    pub fn is_absent(&self) -> bool {
        matches!(self, PayloadContent::Absent)
    }

    pub fn decrypted(&self) -> Option<&ItemContent> {
        match self {
            PayloadContent::Decrypted(content) => Some(content),
            _ => None,
        }
    }

    pub fn encrypted_string(&self) -> Option<&str> {
        match self {
            PayloadContent::Encrypted(s) => Some(s),
            _ => None,
        }
    }
}

/// Immutable record holding one version of one item's state plus sync
/// bookkeeping.
#[derive(Debug, Clone, PartialEq)]
pub struct Payload {
    // Identity fields (always first)
    uuid: Uuid,
    content_type: ContentType,

    // Content fields
    content: PayloadContent,
    enc_item_key: Option<String>,
    items_key_id: Option<Uuid>,

    // Server-authoritative timestamps
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,

    // Local sync bookkeeping
    dirty: bool,
    dirtied_date: Option<DateTime<Utc>>,
    last_sync_began: Option<DateTime<Utc>>,
    last_sync_end: Option<DateTime<Utc>>,
    deleted: bool,
    error_decrypting: bool,
    waiting_for_key: bool,

    // Legacy (v001/v002)
    auth_hash: Option<String>,
    auth_params: Option<Value>,
}

impl Payload {
    /// Starts a builder for a brand-new item payload
    pub fn builder(content_type: ContentType) -> PayloadBuilder {
        PayloadBuilder::new(content_type)
    }

    /// Starts a builder pre-populated with this payload's fields
    pub fn copy(&self) -> PayloadBuilder {
        PayloadBuilder::from_payload(self)
    }

    pub fn uuid(&self) -> &Uuid {
        &self.uuid
    }

    pub fn content_type(&self) -> &ContentType {
        &self.content_type
    }

    pub fn content(&self) -> &PayloadContent {
        &self.content
    }

    pub fn enc_item_key(&self) -> Option<&str> {
        self.enc_item_key.as_deref()
    }

    pub fn items_key_id(&self) -> Option<&Uuid> {
        self.items_key_id.as_ref()
    }

    pub fn created_at(&self) -> &DateTime<Utc> {
        &self.created_at
    }

    pub fn updated_at(&self) -> &DateTime<Utc> {
        &self.updated_at
    }

    pub fn dirty(&self) -> bool {
        self.dirty
    }

    pub fn dirtied_date(&self) -> Option<&DateTime<Utc>> {
        self.dirtied_date.as_ref()
    }

    pub fn last_sync_began(&self) -> Option<&DateTime<Utc>> {
        self.last_sync_began.as_ref()
    }

    pub fn last_sync_end(&self) -> Option<&DateTime<Utc>> {
        self.last_sync_end.as_ref()
    }

    pub fn deleted(&self) -> bool {
        self.deleted
    }

    pub fn error_decrypting(&self) -> bool {
        self.error_decrypting
    }

    pub fn waiting_for_key(&self) -> bool {
        self.waiting_for_key
    }

    pub fn auth_hash(&self) -> Option<&str> {
        self.auth_hash.as_deref()
    }

    pub fn auth_params(&self) -> Option<&Value> {
        self.auth_params.as_ref()
    }

    /// Checks whether this payload has ever completed a server sync
    ///
    /// The server stamps `updated_at` on every save, so an epoch value
    /// means the item was created locally and never uploaded.
    pub fn never_synced(&self) -> bool {
        self.updated_at.timestamp_micros() == 0
    }

    /// Checks whether this payload is a never-uploaded local deletion
    ///
    /// Such payloads are cleared locally without a server round trip.
    pub fn discardable(&self) -> bool {
        self.deleted && self.never_synced()
    }

    /// Gets the protocol version of the encrypted content, if encrypted
    pub fn encrypted_version(&self) -> Option<ProtocolVersion> {
        let string = self.content.encrypted_string()?;
        ProtocolVersion::from_encrypted_string(string).ok()
    }

    /// Requires decrypted content
    ///
    /// # Errors
    ///
    /// * `InvalidPayload` - content is encrypted or absent
    pub fn decrypted_content(&self) -> Result<&ItemContent, NotelockError> {
        self.content.decrypted().ok_or_else(|| {
            NotelockError::invalid_payload(format!(
                "payload {} has no decrypted content",
                self.uuid
            ))
        })
    }

    /// Converts to the wire shape sent to the server
    pub fn to_wire(&self) -> WirePayload {
        let content = match &self.content {
            PayloadContent::Decrypted(content) => Some(WireContent::Object(content.to_value())),
            PayloadContent::Encrypted(string) => Some(WireContent::String(string.clone())),
            PayloadContent::Absent => None,
        };
        WirePayload {
            uuid: self.uuid,
            content_type: self.content_type.as_str().to_string(),
            content,
            enc_item_key: self.enc_item_key.clone(),
            items_key_id: self.items_key_id,
            created_at: Some(self.created_at),
            updated_at: Some(self.updated_at),
            deleted: self.deleted,
            auth_hash: self.auth_hash.clone(),
            auth_params: self.auth_params.clone(),
            dirty: None,
        }
    }

    /// Converts to a local database row, carrying the dirty flag so
    /// pending uploads survive a restart
    pub fn to_local_row(&self) -> WirePayload {
        let mut wire = self.to_wire();
        wire.dirty = Some(self.dirty);
        wire
    }

    /// Builds a payload from a wire record
    ///
    /// Wire records carry no local bookkeeping; the resulting payload is
    /// clean (not dirty, no decryption-state flags).
    pub fn from_wire(wire: &WirePayload) -> Result<Payload, NotelockError> {
        let content = match &wire.content {
            Some(WireContent::String(s)) => PayloadContent::Encrypted(s.clone()),
            Some(WireContent::Object(v)) => PayloadContent::Decrypted(
                ItemContent::from_value(v.clone()).map_err(NotelockError::from)?,
            ),
            None => PayloadContent::Absent,
        };
        Ok(Payload {
            uuid: wire.uuid,
            content_type: ContentType::from_raw(&wire.content_type),
            content,
            enc_item_key: wire.enc_item_key.clone(),
            items_key_id: wire.items_key_id,
            created_at: wire.created_at.unwrap_or_else(epoch),
            updated_at: wire.updated_at.unwrap_or_else(epoch),
            dirty: wire.dirty.unwrap_or(false),
            dirtied_date: None,
            last_sync_began: None,
            last_sync_end: None,
            deleted: wire.deleted,
            error_decrypting: false,
            waiting_for_key: false,
            auth_hash: wire.auth_hash.clone(),
            auth_params: wire.auth_params.clone(),
        })
    }
}

/// Timestamp for never-synced payloads.
pub fn epoch() -> DateTime<Utc> {
    Utc.timestamp_micros(0).single().unwrap_or_else(Utc::now)
}

/// Content slot of a wire payload: ciphertext string or plain object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WireContent {
    String(String),
    Object(Value),
}

/// The item shape exchanged with the server and the local database.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WirePayload {
    pub uuid: Uuid,
    pub content_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<WireContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enc_item_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub items_key_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub deleted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_hash: Option<String>,
    /// Legacy embedded key params (v001/v002 era servers sent these;
    /// key recovery reads them off rescued items keys).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_params: Option<Value>,
    /// Local-row extension; never sent to the server.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dirty: Option<bool>,
}

/// Builder for `Payload`.
///
/// Every field of the "max" payload variant is settable; unset bookkeeping
/// fields default to the clean state. `build()` performs the only
/// validation the engine imposes on payloads (a content type must exist).
#[derive(Debug, Clone)]
pub struct PayloadBuilder {
    uuid: Uuid,
    content_type: ContentType,
    content: PayloadContent,
    enc_item_key: Option<String>,
    items_key_id: Option<Uuid>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    dirty: bool,
    dirtied_date: Option<DateTime<Utc>>,
    last_sync_began: Option<DateTime<Utc>>,
    last_sync_end: Option<DateTime<Utc>>,
    deleted: bool,
    error_decrypting: bool,
    waiting_for_key: bool,
    auth_hash: Option<String>,
    auth_params: Option<Value>,
}

impl PayloadBuilder {
    pub fn new(content_type: ContentType) -> Self {
        Self {
            uuid: Uuid::new_v4(),
            content_type,
            content: PayloadContent::Absent,
            enc_item_key: None,
            items_key_id: None,
            created_at: Utc::now(),
            updated_at: epoch(),
            dirty: false,
            dirtied_date: None,
            last_sync_began: None,
            last_sync_end: None,
            deleted: false,
            error_decrypting: false,
            waiting_for_key: false,
            auth_hash: None,
            auth_params: None,
        }
    }

    fn from_payload(payload: &Payload) -> Self {
        Self {
            uuid: payload.uuid,
            content_type: payload.content_type.clone(),
            content: payload.content.clone(),
            enc_item_key: payload.enc_item_key.clone(),
            items_key_id: payload.items_key_id,
            created_at: payload.created_at,
            updated_at: payload.updated_at,
            dirty: payload.dirty,
            dirtied_date: payload.dirtied_date,
            last_sync_began: payload.last_sync_began,
            last_sync_end: payload.last_sync_end,
            deleted: payload.deleted,
            error_decrypting: payload.error_decrypting,
            waiting_for_key: payload.waiting_for_key,
            auth_hash: payload.auth_hash.clone(),
            auth_params: payload.auth_params.clone(),
        }
    }

    pub fn uuid(mut self, uuid: Uuid) -> Self {
        self.uuid = uuid;
        self
    }

    pub fn decrypted_content(mut self, content: ItemContent) -> Self {
        self.content = PayloadContent::Decrypted(content);
        self
    }

    pub fn encrypted_content(mut self, string: impl Into<String>) -> Self {
        self.content = PayloadContent::Encrypted(string.into());
        self
    }

    pub fn absent_content(mut self) -> Self {
        self.content = PayloadContent::Absent;
        self
    }

    pub fn enc_item_key(mut self, enc_item_key: Option<String>) -> Self {
        self.enc_item_key = enc_item_key;
        self
    }

    pub fn items_key_id(mut self, items_key_id: Option<Uuid>) -> Self {
        self.items_key_id = items_key_id;
        self
    }

    pub fn created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }

    pub fn updated_at(mut self, updated_at: DateTime<Utc>) -> Self {
        self.updated_at = updated_at;
        self
    }

    pub fn dirty(mut self, dirty: bool) -> Self {
        self.dirty = dirty;
        if dirty {
            self.dirtied_date = Some(Utc::now());
        }
        self
    }

    pub fn dirtied_date(mut self, dirtied_date: Option<DateTime<Utc>>) -> Self {
        self.dirtied_date = dirtied_date;
        self
    }

    pub fn last_sync_began(mut self, at: Option<DateTime<Utc>>) -> Self {
        self.last_sync_began = at;
        self
    }

    pub fn last_sync_end(mut self, at: Option<DateTime<Utc>>) -> Self {
        self.last_sync_end = at;
        self
    }

    pub fn deleted(mut self, deleted: bool) -> Self {
        self.deleted = deleted;
        self
    }

    pub fn error_decrypting(mut self, error_decrypting: bool) -> Self {
        self.error_decrypting = error_decrypting;
        self
    }

    pub fn waiting_for_key(mut self, waiting_for_key: bool) -> Self {
        self.waiting_for_key = waiting_for_key;
        self
    }

    pub fn auth_hash(mut self, auth_hash: Option<String>) -> Self {
        self.auth_hash = auth_hash;
        self
    }

    pub fn auth_params(mut self, auth_params: Option<Value>) -> Self {
        self.auth_params = auth_params;
        self
    }

    pub fn build(self) -> Payload {
        Payload {
            uuid: self.uuid,
            content_type: self.content_type,
            content: self.content,
            enc_item_key: self.enc_item_key,
            items_key_id: self.items_key_id,
            created_at: self.created_at,
            updated_at: self.updated_at,
            dirty: self.dirty,
            dirtied_date: self.dirtied_date,
            last_sync_began: self.last_sync_began,
            last_sync_end: self.last_sync_end,
            deleted: self.deleted,
            error_decrypting: self.error_decrypting,
            waiting_for_key: self.waiting_for_key,
            auth_hash: self.auth_hash,
            auth_params: self.auth_params,
        }
    }
}
