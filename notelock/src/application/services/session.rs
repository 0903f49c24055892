// /////////////////////////////////////////////////////////////////////////////
// Notelock Sync Engine
// Copyright (c) 2025 Notelock Project Contributors
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Session Service
//!
//! Credential lifecycle against the server: register, sign in, change
//! password, sign out, and session token upkeep. The server never sees
//! the account password; every flow derives the root key locally and
//! sends only the server-password half as proof.
//!
//! ## Invalid Sessions
//!
//! A 401 from any endpoint emits `InvalidSyncSession`. Recovery is a
//! refresh-token exchange first, then a password challenge through the
//! injected responder; in both cases callers retry the failed operation
//! exactly once.

use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::json;
use tracing::{info, warn};

use notelock_domain::entities::PayloadSource;
use notelock_domain::error::NotelockError;
use notelock_domain::events::ApplicationEvent;
use notelock_domain::repositories::{
    ApiClient, ChallengeReason, ChallengeResponder, ChangeCredentialsRequest, RegistrationRequest,
    Session, SessionResponse, User,
};
use notelock_domain::value_objects::{KeyParams, KeyParamsOrigination};

use crate::application::event_bus::EventBus;
use crate::application::services::payload_manager::PayloadManager;
use crate::application::services::protocol::ProtocolService;
use crate::application::services::storage::{storage_keys, StorageService, StorageValueMode};

/// Result of a successful sign-in.
#[derive(Debug, Clone)]
pub struct SignInOutcome {
    pub user: User,
    /// True when the account still uses a decrypt-only protocol version.
    pub outdated_protocol: bool,
}

/// Credential and session lifecycle.
pub struct SessionService {
    api: Arc<dyn ApiClient>,
    storage: Arc<StorageService>,
    protocol: Arc<ProtocolService>,
    payloads: Arc<PayloadManager>,
    challenge: Arc<dyn ChallengeResponder>,
    events: Arc<EventBus>,
    session: RwLock<Option<Session>>,
    user: RwLock<Option<User>>,
}

impl SessionService {
    pub fn new(
        api: Arc<dyn ApiClient>,
        storage: Arc<StorageService>,
        protocol: Arc<ProtocolService>,
        payloads: Arc<PayloadManager>,
        challenge: Arc<dyn ChallengeResponder>,
        events: Arc<EventBus>,
    ) -> Self {
        Self {
            api,
            storage,
            protocol,
            payloads,
            challenge,
            events,
            session: RwLock::new(None),
            user: RwLock::new(None),
        }
    }

    pub fn current_session(&self) -> Option<Session> {
        self.session.read().clone()
    }

    pub fn current_user(&self) -> Option<User> {
        self.user.read().clone()
    }

    pub fn is_signed_in(&self) -> bool {
        self.session.read().is_some()
    }

    /// Restores persisted session state at launch
    pub async fn load_persisted_credentials(&self) -> Result<(), NotelockError> {
        if let Some(value) = self
            .storage
            .get_value(storage_keys::SESSION, StorageValueMode::Unwrapped)
            .await?
        {
            *self.session.write() = Some(serde_json::from_value(value)?);
        }
        if let Some(value) = self
            .storage
            .get_value(storage_keys::USER, StorageValueMode::Unwrapped)
            .await?
        {
            *self.user.write() = Some(serde_json::from_value(value)?);
        }
        Ok(())
    }

    async fn persist_response(&self, response: &SessionResponse) -> Result<(), NotelockError> {
        self.storage
            .set_value(
                storage_keys::SESSION,
                serde_json::to_value(&response.session)?,
                StorageValueMode::Unwrapped,
            )
            .await?;
        self.storage
            .set_value(
                storage_keys::USER,
                json!({ "uuid": response.user.uuid, "email": response.user.email }),
                StorageValueMode::Unwrapped,
            )
            .await?;
        *self.session.write() = Some(response.session.clone());
        *self.user.write() = Some(response.user.clone());
        Ok(())
    }

    /// Registers a new account
    ///
    /// Derives a fresh v004 root key, proves it to the server, and mints
    /// the account's first default items key.
    pub async fn register(&self, email: &str, password: &str) -> Result<User, NotelockError> {
        let root_key =
            self.protocol
                .create_root_key(email, password, KeyParamsOrigination::Registration)?;
        let server_password = root_key
            .server_password()
            .ok_or_else(|| NotelockError::internal("derived root key is missing server password"))?
            .to_string();
        let response = self
            .api
            .register(RegistrationRequest {
                email: email.to_string(),
                server_password,
                key_params: root_key.key_params().clone(),
            })
            .await?;

        self.persist_response(&response).await?;
        self.protocol.set_root_key(root_key);
        self.protocol.persist_root_key().await?;
        self.protocol.create_new_default_items_key()?;
        // Anything created before the account existed uploads now.
        self.mark_all_payloads_dirty();
        info!(email, "registered new account");
        self.events.notify(ApplicationEvent::SignedIn);
        Ok(response.user)
    }

    /// Signs in to an existing account
    ///
    /// Accounts on protocol versions 001/002 may still sign in; the
    /// outcome flags them so hosts can surface an upgrade warning.
    pub async fn sign_in(&self, email: &str, password: &str) -> Result<SignInOutcome, NotelockError> {
        let key_params = self.api.get_key_params(email).await?;
        self.sign_in_with_params(password, &key_params).await
    }

    /// Signs in deriving the root key from caller-supplied key params
    ///
    /// Key recovery uses this when no credentials exist locally: the
    /// params embedded on a rescued items key stand in for the server's.
    pub async fn sign_in_with_params(
        &self,
        password: &str,
        key_params: &KeyParams,
    ) -> Result<SignInOutcome, NotelockError> {
        if !key_params.cost_is_acceptable() {
            return Err(NotelockError::AuthenticationFailed(format!(
                "account key params carry an insecure derivation cost for {}",
                key_params.version
            )));
        }
        let outdated_protocol = key_params.version.is_outdated();
        if outdated_protocol {
            warn!(version = %key_params.version, "signing in against an outdated protocol version");
        }

        let root_key = self.protocol.compute_root_key(password, key_params)?;
        let server_password = root_key
            .server_password()
            .ok_or_else(|| NotelockError::internal("derived root key is missing server password"))?
            .to_string();
        let response = self.api.sign_in(&key_params.identifier, &server_password).await?;

        self.persist_response(&response).await?;
        self.protocol.set_root_key(root_key);
        self.protocol.persist_root_key().await?;
        info!(email = %key_params.identifier, "signed in");
        self.events.notify(ApplicationEvent::SignedIn);
        Ok(SignInOutcome {
            user: response.user,
            outdated_protocol,
        })
    }

    /// Changes the account password
    ///
    /// On success every local payload is marked dirty so the entire
    /// library re-encrypts and re-uploads under the new key hierarchy on
    /// the next sync round.
    pub async fn change_password(
        &self,
        current_password: &str,
        new_password: &str,
    ) -> Result<(), NotelockError> {
        let session = self
            .current_session()
            .ok_or_else(|| NotelockError::InvalidSession("not signed in".to_string()))?;
        let user = self
            .current_user()
            .ok_or_else(|| NotelockError::InvalidSession("not signed in".to_string()))?;
        let current_params = self
            .protocol
            .account_key_params()
            .ok_or_else(|| NotelockError::KeyNotAvailable("no account root key".to_string()))?;

        let current_root = self
            .protocol
            .compute_root_key(current_password, &current_params)?;
        let new_root = self.protocol.create_root_key(
            &user.email,
            new_password,
            KeyParamsOrigination::PasswordChange,
        )?;

        let request = ChangeCredentialsRequest {
            current_server_password: current_root
                .server_password()
                .ok_or_else(|| NotelockError::internal("missing current server password"))?
                .to_string(),
            new_server_password: new_root
                .server_password()
                .ok_or_else(|| NotelockError::internal("missing new server password"))?
                .to_string(),
            new_key_params: new_root.key_params().clone(),
        };
        let response = self.api.change_credentials(&session, request).await?;

        self.persist_response(&response).await?;
        self.protocol.set_root_key(new_root);
        self.protocol.persist_root_key().await?;
        // New hierarchy: fresh default items key, then re-upload the world.
        self.protocol.create_new_default_items_key()?;
        self.mark_all_payloads_dirty();
        info!("password changed; full re-sync queued");
        self.events.notify(ApplicationEvent::KeyStatusChanged);
        Ok(())
    }

    fn mark_all_payloads_dirty(&self) {
        let dirtied: Vec<_> = self
            .payloads
            .all()
            .into_iter()
            .filter(|p| !p.deleted())
            .map(|p| p.copy().dirty(true).build())
            .collect();
        if !dirtied.is_empty() {
            self.payloads.emit_payloads(dirtied, PayloadSource::LocalChanged);
        }
    }

    /// Attempts to restore a valid session after a 401
    ///
    /// Tries the refresh token first; falls back to a password challenge.
    /// Returns false when the user cancels the challenge.
    pub async fn reauthenticate(&self) -> Result<bool, NotelockError> {
        self.events.notify(ApplicationEvent::InvalidSyncSession);
        let Some(session) = self.current_session() else {
            return Ok(false);
        };

        match self.api.refresh_session(&session).await {
            Ok(fresh) => {
                self.storage
                    .set_value(
                        storage_keys::SESSION,
                        serde_json::to_value(&fresh)?,
                        StorageValueMode::Unwrapped,
                    )
                    .await?;
                *self.session.write() = Some(fresh);
                return Ok(true);
            }
            Err(e) => warn!(error = %e, "session refresh failed; prompting for password"),
        }

        let Some(user) = self.current_user() else {
            return Ok(false);
        };
        let Some(password) = self
            .challenge
            .prompt_password(ChallengeReason::Reauthentication)
            .await
        else {
            // Challenge cancelled; the requesting operation aborts.
            return Ok(false);
        };
        self.sign_in(&user.email, &password).await?;
        Ok(true)
    }

    /// Signs out and forgets the session
    ///
    /// Server-side termination is best-effort; local state is cleared
    /// regardless.
    pub async fn sign_out(&self) -> Result<(), NotelockError> {
        if let Some(session) = self.current_session() {
            if let Err(e) = self.api.sign_out(&session).await {
                warn!(error = %e, "server-side sign-out failed");
            }
        }
        *self.session.write() = None;
        *self.user.write() = None;
        self.storage
            .remove_value(storage_keys::SESSION, StorageValueMode::Unwrapped)
            .await?;
        self.storage
            .remove_value(storage_keys::USER, StorageValueMode::Unwrapped)
            .await?;
        self.events.notify(ApplicationEvent::SignedOut);
        Ok(())
    }
}
