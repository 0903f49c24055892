// /////////////////////////////////////////////////////////////////////////////
// Notelock Sync Engine
// Copyright (c) 2025 Notelock Project Contributors
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Integration Test Harness
//!
//! Shared fixtures for the integration suite: an in-process sync server
//! implementing the `ApiClient` port with the real wire semantics
//! (credential checks, conflict detection on stale `updated_at`,
//! pagination, integrity hashes) and a scripted challenge responder.
//!
//! The server only ever stores what a real server would see: ciphertext,
//! key params, and server passwords. Tests asserting zero-knowledge
//! properties inspect `LocalSyncServer::stored_items`.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use parking_lot::Mutex;
use uuid::Uuid;

use notelock::application::{Application, ApplicationOptions};
use notelock::infrastructure::repositories::MemoryDeviceInterface;
use notelock_domain::entities::{Payload, WirePayload};
use notelock_domain::error::NotelockError;
use notelock_domain::repositories::{
    ApiClient, ChallengeReason, ChallengeResponder, ChangeCredentialsRequest, RawConflict,
    RegistrationRequest, Session, SessionResponse, SyncRequest, SyncResponse, User,
};
use notelock_domain::repositories::api_client::ConflictType;
use notelock_domain::services::compute_integrity_hash;
use notelock_domain::value_objects::KeyParams;

struct ServerAccount {
    uuid: Uuid,
    server_password: String,
    key_params: KeyParams,
    items: HashMap<Uuid, WirePayload>,
}

#[derive(Default)]
struct ServerState {
    accounts: HashMap<String, ServerAccount>,
    sessions: HashMap<String, String>,
    clock_micros: i64,
    token_counter: u64,
}

impl ServerState {
    fn next_timestamp(&mut self) -> chrono::DateTime<Utc> {
        let now = Utc::now().timestamp_micros();
        self.clock_micros = self.clock_micros.max(now) + 1;
        Utc.timestamp_micros(self.clock_micros).single().unwrap()
    }

    fn account_for_session(&self, session: &Session) -> Result<&str, NotelockError> {
        self.sessions
            .get(&session.access_token)
            .map(String::as_str)
            .ok_or(NotelockError::ApiError {
                status: 401,
                message: "invalid session".to_string(),
            })
    }
}

/// In-process sync server implementing the transport port.
#[derive(Default)]
pub struct LocalSyncServer {
    state: Mutex<ServerState>,
    /// When set, every sync request fails with this HTTP status once.
    pub fail_next_sync_with: Mutex<Option<u16>>,
}

impl LocalSyncServer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn new_session(state: &mut ServerState, email: &str) -> Session {
        state.token_counter += 1;
        let access_token = format!("access-{}", state.token_counter);
        let refresh_token = format!("refresh-{}", state.token_counter);
        state.sessions.insert(access_token.clone(), email.to_string());
        Session {
            access_token,
            refresh_token,
            access_expiration: Utc::now() + chrono::Duration::hours(1),
            refresh_expiration: Utc::now() + chrono::Duration::days(30),
        }
    }

    /// Ciphertext rows as stored server-side
    pub fn stored_items(&self, email: &str) -> Vec<WirePayload> {
        self.state
            .lock()
            .accounts
            .get(email)
            .map(|a| a.items.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Silently drops an item server-side (integrity divergence fixture)
    pub fn drop_item(&self, email: &str, uuid: &Uuid) {
        if let Some(account) = self.state.lock().accounts.get_mut(email) {
            account.items.remove(uuid);
        }
    }

    /// Silently rewinds an item's server timestamp (integrity divergence
    /// fixture; the client's copy keeps the newer timestamp)
    pub fn backdate_item(&self, email: &str, uuid: &Uuid, seconds: i64) {
        if let Some(account) = self.state.lock().accounts.get_mut(email) {
            if let Some(item) = account.items.get_mut(uuid) {
                item.updated_at = item
                    .updated_at
                    .map(|t| t - chrono::Duration::seconds(seconds));
            }
        }
    }

    /// Invalidates every session (401 fixture)
    pub fn revoke_all_sessions(&self) {
        self.state.lock().sessions.clear();
    }

    fn integrity_hash(account: &ServerAccount) -> String {
        let payloads: Vec<Payload> = account
            .items
            .values()
            .filter(|w| !w.deleted)
            .filter_map(|w| Payload::from_wire(w).ok())
            .collect();
        let refs: Vec<&Payload> = payloads.iter().collect();
        compute_integrity_hash(&refs)
    }
}

#[async_trait]
impl ApiClient for LocalSyncServer {
    async fn register(&self, request: RegistrationRequest) -> Result<SessionResponse, NotelockError> {
        let mut state = self.state.lock();
        if state.accounts.contains_key(&request.email) {
            return Err(NotelockError::ApiError {
                status: 409,
                message: "account already exists".to_string(),
            });
        }
        let uuid = Uuid::new_v4();
        state.accounts.insert(
            request.email.clone(),
            ServerAccount {
                uuid,
                server_password: request.server_password.clone(),
                key_params: request.key_params.clone(),
                items: HashMap::new(),
            },
        );
        let session = Self::new_session(&mut state, &request.email);
        Ok(SessionResponse {
            session,
            user: User {
                uuid,
                email: request.email,
            },
            key_params: request.key_params,
        })
    }

    async fn sign_in(&self, email: &str, server_password: &str) -> Result<SessionResponse, NotelockError> {
        let mut state = self.state.lock();
        let (uuid, key_params) = {
            let account = state.accounts.get(email).ok_or(NotelockError::ApiError {
                status: 401,
                message: "invalid email or password".to_string(),
            })?;
            if account.server_password != server_password {
                return Err(NotelockError::ApiError {
                    status: 401,
                    message: "invalid email or password".to_string(),
                });
            }
            (account.uuid, account.key_params.clone())
        };
        let session = Self::new_session(&mut state, email);
        Ok(SessionResponse {
            session,
            user: User {
                uuid,
                email: email.to_string(),
            },
            key_params,
        })
    }

    async fn get_key_params(&self, email: &str) -> Result<KeyParams, NotelockError> {
        self.state
            .lock()
            .accounts
            .get(email)
            .map(|a| a.key_params.clone())
            .ok_or(NotelockError::ApiError {
                status: 404,
                message: "unknown account".to_string(),
            })
    }

    async fn change_credentials(
        &self,
        session: &Session,
        request: ChangeCredentialsRequest,
    ) -> Result<SessionResponse, NotelockError> {
        let mut state = self.state.lock();
        let email = state.account_for_session(session)?.to_string();
        let account = state
            .accounts
            .get_mut(&email)
            .ok_or_else(|| NotelockError::internal("session without account"))?;
        if account.server_password != request.current_server_password {
            return Err(NotelockError::ApiError {
                status: 401,
                message: "current password is incorrect".to_string(),
            });
        }
        account.server_password = request.new_server_password.clone();
        account.key_params = request.new_key_params.clone();
        let uuid = account.uuid;
        let key_params = account.key_params.clone();
        let session = Self::new_session(&mut state, &email);
        Ok(SessionResponse {
            session,
            user: User { uuid, email },
            key_params,
        })
    }

    async fn sync(&self, session: &Session, request: SyncRequest) -> Result<SyncResponse, NotelockError> {
        if let Some(status) = self.fail_next_sync_with.lock().take() {
            return Err(NotelockError::ApiError {
                status,
                message: "injected failure".to_string(),
            });
        }
        let mut state = self.state.lock();
        let email = state.account_for_session(session)?.to_string();

        let mut saved_items = Vec::new();
        let mut conflicts = Vec::new();
        let uploaded: Vec<Uuid> = request.items.iter().map(|w| w.uuid).collect();

        // Apply the upload.
        for incoming in &request.items {
            let timestamp = state.next_timestamp();
            let account = state
                .accounts
                .get_mut(&email)
                .ok_or_else(|| NotelockError::internal("session without account"))?;
            match account.items.get(&incoming.uuid) {
                Some(existing) if existing.updated_at != incoming.updated_at => {
                    // Stale base: the item changed since this client last saw it.
                    conflicts.push(RawConflict {
                        conflict_type: ConflictType::SyncConflict,
                        server_item: Some(existing.clone()),
                        unsaved_item: Some(incoming.clone()),
                    });
                }
                _ => {
                    let mut stored = incoming.clone();
                    if stored.created_at.is_none() {
                        stored.created_at = Some(timestamp);
                    }
                    stored.updated_at = Some(timestamp);
                    stored.dirty = None;
                    if stored.deleted {
                        stored.content = None;
                        stored.enc_item_key = None;
                    }
                    account.items.insert(stored.uuid, stored.clone());
                    // Acknowledgements carry metadata only.
                    stored.content = None;
                    stored.enc_item_key = None;
                    saved_items.push(stored);
                }
            }
        }

        // Compute the download window.
        let since: i64 = request
            .cursor_token
            .as_deref()
            .or(request.sync_token.as_deref())
            .and_then(|t| t.parse().ok())
            .unwrap_or(0);
        let account = state
            .accounts
            .get(&email)
            .ok_or_else(|| NotelockError::internal("session without account"))?;
        let mut retrieved: Vec<WirePayload> = account
            .items
            .values()
            .filter(|w| {
                w.updated_at
                    .map(|t| t.timestamp_micros() > since)
                    .unwrap_or(false)
            })
            .filter(|w| !uploaded.contains(&w.uuid))
            .cloned()
            .collect();
        retrieved.sort_by_key(|w| w.updated_at.map(|t| t.timestamp_micros()).unwrap_or(0));

        let limit = request.limit.unwrap_or(150) as usize;
        let (page, cursor_token) = if retrieved.len() > limit {
            let cursor = retrieved[limit - 1]
                .updated_at
                .map(|t| t.timestamp_micros().to_string());
            (retrieved[..limit].to_vec(), cursor)
        } else {
            (retrieved, None)
        };

        let sync_token = if cursor_token.is_some() {
            request.sync_token.clone()
        } else {
            Some(state.clock_micros.to_string())
        };
        let integrity_hash = if request.compute_integrity {
            state.accounts.get(&email).map(Self::integrity_hash)
        } else {
            None
        };

        Ok(SyncResponse {
            retrieved_items: page,
            saved_items,
            conflicts,
            sync_token,
            cursor_token,
            integrity_hash,
        })
    }

    async fn refresh_session(&self, session: &Session) -> Result<Session, NotelockError> {
        let mut state = self.state.lock();
        // Refresh tokens pair with the numbered access token.
        let suffix = session.refresh_token.strip_prefix("refresh-");
        let email = suffix
            .map(|n| format!("access-{}", n))
            .and_then(|access| state.sessions.get(&access).cloned());
        match email {
            Some(email) => Ok(Self::new_session(&mut state, &email)),
            None => Err(NotelockError::ApiError {
                status: 401,
                message: "invalid refresh token".to_string(),
            }),
        }
    }

    async fn sign_out(&self, session: &Session) -> Result<(), NotelockError> {
        self.state.lock().sessions.remove(&session.access_token);
        Ok(())
    }
}

/// Challenge responder with scripted answers.
#[derive(Default)]
pub struct ScriptedChallenge {
    pub password: Mutex<Option<String>>,
    pub passcode: Mutex<Option<String>>,
}

impl ScriptedChallenge {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_password(password: &str) -> Arc<Self> {
        let challenge = Self::default();
        *challenge.password.lock() = Some(password.to_string());
        Arc::new(challenge)
    }
}

#[async_trait]
impl ChallengeResponder for ScriptedChallenge {
    async fn prompt_password(&self, _reason: ChallengeReason) -> Option<String> {
        self.password.lock().clone()
    }

    async fn prompt_passcode(&self, _reason: ChallengeReason) -> Option<String> {
        self.passcode.lock().clone()
    }
}

/// One launched application plus its collaborators.
pub struct TestContext {
    pub app: Arc<Application>,
    pub device: Arc<MemoryDeviceInterface>,
    pub server: Arc<LocalSyncServer>,
    pub challenge: Arc<ScriptedChallenge>,
}

/// Builds and launches an application against the given server
pub async fn launch_app(server: Arc<LocalSyncServer>, identifier: &str) -> TestContext {
    launch_app_with_options(server, ApplicationOptions::new(identifier)).await
}

/// Builds and launches an application with explicit options
pub async fn launch_app_with_options(
    server: Arc<LocalSyncServer>,
    options: ApplicationOptions,
) -> TestContext {
    let device = Arc::new(MemoryDeviceInterface::new());
    launch_app_with_device(server, device, options).await
}

/// Builds and launches an application over an existing device store
pub async fn launch_app_with_device(
    server: Arc<LocalSyncServer>,
    device: Arc<MemoryDeviceInterface>,
    options: ApplicationOptions,
) -> TestContext {
    let challenge = ScriptedChallenge::new();
    let app = Application::new(
        options,
        device.clone(),
        server.clone(),
        challenge.clone(),
    );
    app.prepare_for_launch().await.expect("prepare_for_launch");
    app.launch().await.expect("launch");
    TestContext {
        app,
        device,
        server,
        challenge,
    }
}
