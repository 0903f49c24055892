// /////////////////////////////////////////////////////////////////////////////
// Notelock Sync Engine
// Copyright (c) 2025 Notelock Project Contributors
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # API Client Port
//!
//! The HTTP transport surface, reduced to the endpoints the engine
//! consumes: credential lifecycle and the sync endpoint. The concrete
//! transport is injected by the host; the engine sees request/response
//! models only.
//!
//! All responses may fail with `NotelockError::ApiError { status, .. }`;
//! a 401 triggers the single reauthenticate-and-retry path in the
//! session service.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::entities::WirePayload;
use crate::error::NotelockError;
use crate::value_objects::KeyParams;

/// Server API compatibility date sent with every sync request.
pub const API_VERSION: &str = "20240226";

/// Authenticated session tokens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub access_token: String,
    pub refresh_token: String,
    pub access_expiration: DateTime<Utc>,
    pub refresh_expiration: DateTime<Utc>,
}

impl Session {
    /// Whether the access token has passed its expiry
    pub fn access_expired(&self) -> bool {
        Utc::now() >= self.access_expiration
    }
}

/// The account the session belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub uuid: Uuid,
    pub email: String,
}

/// Response to register / sign-in / change-credentials.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionResponse {
    pub session: Session,
    pub user: User,
    pub key_params: KeyParams,
}

/// Request body for registration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrationRequest {
    pub email: String,
    /// Hex-encoded server password (the proof half of the root key).
    pub server_password: String,
    pub key_params: KeyParams,
}

/// Request body for a credential change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeCredentialsRequest {
    pub current_server_password: String,
    pub new_server_password: String,
    pub new_key_params: KeyParams,
}

/// One sync round's upload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncRequest {
    pub api: String,
    pub items: Vec<WirePayload>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sync_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cursor_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
    pub compute_integrity: bool,
}

/// Kind of server-reported conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictType {
    SyncConflict,
    UuidConflict,
}

/// One server-reported conflict entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawConflict {
    #[serde(rename = "type")]
    pub conflict_type: ConflictType,
    /// The server's copy (sync conflicts).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_item: Option<WirePayload>,
    /// Our refused copy (uuid conflicts).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unsaved_item: Option<WirePayload>,
}

/// One sync round's download.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SyncResponse {
    #[serde(default)]
    pub retrieved_items: Vec<WirePayload>,
    #[serde(default)]
    pub saved_items: Vec<WirePayload>,
    #[serde(default)]
    pub conflicts: Vec<RawConflict>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sync_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cursor_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub integrity_hash: Option<String>,
}

/// Host-provided HTTP transport.
#[async_trait]
pub trait ApiClient: Send + Sync {
    /// Registers a new account
    async fn register(&self, request: RegistrationRequest)
        -> Result<SessionResponse, NotelockError>;

    /// Signs in with email and server password
    async fn sign_in(
        &self,
        email: &str,
        server_password: &str,
    ) -> Result<SessionResponse, NotelockError>;

    /// Fetches the key params stored for an account
    async fn get_key_params(&self, email: &str) -> Result<KeyParams, NotelockError>;

    /// Swaps account credentials
    async fn change_credentials(
        &self,
        session: &Session,
        request: ChangeCredentialsRequest,
    ) -> Result<SessionResponse, NotelockError>;

    /// Runs one sync round
    async fn sync(
        &self,
        session: &Session,
        request: SyncRequest,
    ) -> Result<SyncResponse, NotelockError>;

    /// Exchanges the refresh token for a fresh session
    async fn refresh_session(&self, session: &Session) -> Result<Session, NotelockError>;

    /// Terminates the session server-side
    async fn sign_out(&self, session: &Session) -> Result<(), NotelockError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conflict_type_wire_names() {
        assert_eq!(
            serde_json::to_string(&ConflictType::SyncConflict).unwrap(),
            "\"sync_conflict\""
        );
        assert_eq!(
            serde_json::to_string(&ConflictType::UuidConflict).unwrap(),
            "\"uuid_conflict\""
        );
    }

    #[test]
    fn test_sync_response_defaults_are_empty() {
        let response: SyncResponse = serde_json::from_str("{}").unwrap();
        assert!(response.retrieved_items.is_empty());
        assert!(response.conflicts.is_empty());
        assert!(response.sync_token.is_none());
    }

    #[test]
    fn test_session_expiry() {
        let session = Session {
            access_token: "a".to_string(),
            refresh_token: "r".to_string(),
            access_expiration: Utc::now() - chrono::Duration::minutes(1),
            refresh_expiration: Utc::now() + chrono::Duration::days(30),
        };
        assert!(session.access_expired());
    }
}
