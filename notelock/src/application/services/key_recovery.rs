// /////////////////////////////////////////////////////////////////////////////
// Notelock Sync Engine
// Copyright (c) 2025 Notelock Project Contributors
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Key Recovery Service
//!
//! Rescue path for items keys that arrive undecryptable — typically after
//! a password change on another device, which re-wraps every items key
//! under a root key this client cannot derive yet.
//!
//! ## Flow
//!
//! 1. An items key arriving from a remote source with
//!    `error_decrypting=true` lands in a FIFO decryption queue, and its
//!    raw payload is persisted to isolated storage so it survives a
//!    restart.
//! 2. Queue processing fetches the server's current key params; newer
//!    server params are recorded as the likely derivation inputs.
//! 3. Each queued key prompts for the account password, derives a
//!    candidate root key, and attempts decryption. A cancelled prompt
//!    aborts processing; failures stay queued for a later attempt.
//! 4. A successful decryption whose params match the server's *and* whose
//!    key is newer than any locally-valid items key promotes the
//!    candidate to the new root key (persisted wrapped when a passcode is
//!    configured). Other queue entries are retried against the same
//!    candidate immediately.
//! 5. When the queue drains, params still diverging from the server force
//!    a corrective sign-in, and an out-of-sync engine requests an
//!    integrity-checked sync.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde_json::{json, Map, Value};
use tracing::{info, warn};

use notelock_domain::entities::{newest_valid_items_key, Payload, PayloadSource};
use notelock_domain::error::NotelockError;
use notelock_domain::repositories::{ApiClient, ChallengeReason, ChallengeResponder};
use notelock_domain::services::OperatorKey;
use notelock_domain::value_objects::{ContentType, KeyParams};

use crate::application::event_bus::EventBus;
use crate::application::services::payload_manager::{PayloadManager, PayloadSubscription};
use crate::application::services::protocol::ProtocolService;
use crate::application::services::session::SessionService;
use crate::application::services::storage::{storage_keys, StorageService, StorageValueMode};
use crate::application::services::sync::{SyncOptions, SyncService, TimingStrategy};

/// Rescue service for undecryptable items keys.
pub struct KeyRecoveryService {
    api: Arc<dyn ApiClient>,
    storage: Arc<StorageService>,
    protocol: Arc<ProtocolService>,
    payloads: Arc<PayloadManager>,
    session: Arc<SessionService>,
    sync: Arc<SyncService>,
    challenge: Arc<dyn ChallengeResponder>,
    #[allow(dead_code)]
    events: Arc<EventBus>,
    queue: Mutex<VecDeque<Payload>>,
    is_processing_queue: AtomicBool,
    server_params: RwLock<Option<KeyParams>>,
    subscription: RwLock<Option<PayloadSubscription>>,
}

impl KeyRecoveryService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        api: Arc<dyn ApiClient>,
        storage: Arc<StorageService>,
        protocol: Arc<ProtocolService>,
        payloads: Arc<PayloadManager>,
        session: Arc<SessionService>,
        sync: Arc<SyncService>,
        challenge: Arc<dyn ChallengeResponder>,
        events: Arc<EventBus>,
    ) -> Arc<Self> {
        let service = Arc::new(Self {
            api,
            storage,
            protocol,
            payloads,
            session,
            sync,
            challenge,
            events,
            queue: Mutex::new(VecDeque::new()),
            is_processing_queue: AtomicBool::new(false),
            server_params: RwLock::new(None),
            subscription: RwLock::new(None),
        });
        let weak = Arc::downgrade(&service);
        let subscription = service.payloads.add_observer(Arc::new(move |set| {
            if let Some(service) = weak.upgrade() {
                if !set.source.is_remote() {
                    return;
                }
                for payload in set.changed.iter().chain(&set.inserted).chain(&set.ignored) {
                    if payload.content_type() == &ContentType::ItemsKey && payload.error_decrypting() {
                        service.enqueue(payload.clone());
                    }
                }
            }
        }));
        *service.subscription.write() = Some(subscription);
        service
    }

    fn enqueue(&self, payload: Payload) {
        let mut queue = self.queue.lock();
        if queue.iter().any(|p| p.uuid() == payload.uuid()) {
            return;
        }
        warn!(uuid = %payload.uuid(), "undecryptable items key queued for recovery");
        queue.push_back(payload);
    }

    /// Number of keys awaiting recovery
    pub fn pending_count(&self) -> usize {
        self.queue.lock().len()
    }

    /// Persists an undecryptable key so it survives restart
    async fn persist_undecryptable(&self, payload: &Payload) -> Result<(), NotelockError> {
        let mut record = self
            .storage
            .get_value(storage_keys::UNDECRYPTABLE_ITEMS, StorageValueMode::Nonwrapped)
            .await?
            .and_then(|v| v.as_object().cloned())
            .unwrap_or_else(Map::new);
        record.insert(
            payload.uuid().to_string(),
            serde_json::to_value(payload.to_local_row())?,
        );
        self.storage
            .set_value(
                storage_keys::UNDECRYPTABLE_ITEMS,
                Value::Object(record),
                StorageValueMode::Nonwrapped,
            )
            .await
    }

    async fn clear_undecryptable(&self, payload: &Payload) -> Result<(), NotelockError> {
        let Some(mut record) = self
            .storage
            .get_value(storage_keys::UNDECRYPTABLE_ITEMS, StorageValueMode::Nonwrapped)
            .await?
            .and_then(|v| v.as_object().cloned())
        else {
            return Ok(());
        };
        record.remove(&payload.uuid().to_string());
        self.storage
            .set_value(
                storage_keys::UNDECRYPTABLE_ITEMS,
                Value::Object(record),
                StorageValueMode::Nonwrapped,
            )
            .await
    }

    /// Fetches and records the server's current key params
    async fn reconcile_server_params(&self) -> Result<(), NotelockError> {
        let Some(user) = self.session.current_user() else {
            return Ok(());
        };
        match self.api.get_key_params(&user.email).await {
            Ok(server_params) => {
                let client_version = self
                    .protocol
                    .account_key_params()
                    .map(|p| p.version)
                    .unwrap_or(server_params.version);
                if server_params.version >= client_version {
                    *self.server_params.write() = Some(server_params);
                }
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "failed to fetch server key params");
                Ok(())
            }
        }
    }

    fn recovery_params(&self) -> Option<KeyParams> {
        self.server_params
            .read()
            .clone()
            .or_else(|| self.protocol.account_key_params())
    }

    /// Key params embedded on a rescued payload
    fn embedded_params(payload: &Payload) -> Option<KeyParams> {
        payload
            .auth_params()
            .and_then(|value| serde_json::from_value(value.clone()).ok())
    }

    /// Establishes credentials from a key's embedded params
    ///
    /// Runs when no credentials exist locally at all: performs a server
    /// sign-in deriving the root key from the embedded params and takes
    /// the result as the root of trust.
    async fn sign_in_with_embedded_params(
        &self,
        password: &str,
        embedded: &KeyParams,
    ) -> Result<bool, NotelockError> {
        match self.session.sign_in_with_params(password, embedded).await {
            Ok(_) => {
                info!("credentials established from embedded key params");
                // A user exists now; record the server's params for the
                // promotion rule.
                self.reconcile_server_params().await?;
                Ok(true)
            }
            Err(e) => {
                warn!(error = %e, "sign-in with embedded params failed");
                Ok(false)
            }
        }
    }

    /// Attempts to decrypt one queued key with a candidate root key
    fn try_decrypt_with(&self, payload: &Payload, candidate: &notelock_domain::entities::RootKey) -> Option<Payload> {
        let version = payload.encrypted_version()?;
        let operator = self.protocol.operator_for(version).ok()?;
        let params = operator
            .decrypt_payload(payload, &OperatorKey::from_root_key(candidate))
            .ok()?;
        Some(
            payload
                .copy()
                .decrypted_content(params.content)
                .enc_item_key(None)
                .error_decrypting(false)
                .waiting_for_key(false)
                .build(),
        )
    }

    /// Creation time of the newest locally-valid items key
    fn newest_valid_key_created_at(&self) -> Option<chrono::DateTime<chrono::Utc>> {
        let key_payloads = self.payloads.all_of_type(&ContentType::ItemsKey);
        let refs: Vec<&Payload> = key_payloads.iter().collect();
        newest_valid_items_key(&refs)
            .and_then(|uuid| self.payloads.find(&uuid))
            .map(|p| *p.created_at())
    }

    /// Processes the decryption queue
    ///
    /// Re-entrant calls return immediately; the queue drains once per
    /// processing pass, with failures staying queued for the next.
    pub async fn process_queue(&self) -> Result<(), NotelockError> {
        if self.is_processing_queue.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let result = self.process_queue_inner().await;
        self.is_processing_queue.store(false, Ordering::Release);
        result
    }

    async fn process_queue_inner(&self) -> Result<(), NotelockError> {
        let batch: Vec<Payload> = self.queue.lock().drain(..).collect();
        if batch.is_empty() {
            return Ok(());
        }
        for payload in &batch {
            self.persist_undecryptable(payload).await?;
        }

        self.reconcile_server_params().await?;

        let mut remaining: VecDeque<Payload> = batch.into();
        while let Some(payload) = remaining.pop_front() {
            let params = match self.recovery_params() {
                Some(params) => params,
                None => {
                    // No credentials exist locally; a server sign-in with
                    // the key's embedded params establishes them and the
                    // key re-enters the normal path.
                    let Some(embedded) = Self::embedded_params(&payload) else {
                        warn!(uuid = %payload.uuid(), "rescued key carries no embedded params");
                        self.queue.lock().push_back(payload);
                        continue;
                    };
                    let Some(password) = self
                        .challenge
                        .prompt_password(ChallengeReason::KeyRecovery)
                        .await
                    else {
                        // Cancelled: abort processing, keep the queue intact.
                        self.queue.lock().push_back(payload);
                        self.queue.lock().extend(remaining);
                        return Ok(());
                    };
                    if self.sign_in_with_embedded_params(&password, &embedded).await? {
                        remaining.push_front(payload);
                    } else {
                        self.queue.lock().push_back(payload);
                    }
                    continue;
                }
            };
            let Some(password) = self.challenge.prompt_password(ChallengeReason::KeyRecovery).await
            else {
                // Cancelled: abort processing, keep the queue intact.
                self.queue.lock().push_back(payload);
                self.queue.lock().extend(remaining);
                return Ok(());
            };

            let candidate = match self.protocol.compute_root_key(&password, &params) {
                Ok(candidate) => candidate,
                Err(e) => {
                    warn!(error = %e, "candidate root key derivation failed");
                    self.queue.lock().push_back(payload);
                    continue;
                }
            };

            let Some(decrypted) = self.try_decrypt_with(&payload, &candidate) else {
                warn!(uuid = %payload.uuid(), "recovery attempt failed; key stays queued");
                self.queue.lock().push_back(payload);
                continue;
            };

            // Promotion rule: server-confirmed params plus a key newer
            // than anything locally valid replace the root of trust.
            let params_match_server = self
                .server_params
                .read()
                .as_ref()
                .map(|server| server.derivation_equals(candidate.key_params()))
                .unwrap_or(false);
            let key_is_newer = self
                .newest_valid_key_created_at()
                .map(|newest| payload.created_at() > &newest)
                .unwrap_or(true);
            if params_match_server && key_is_newer {
                info!(uuid = %payload.uuid(), "recovered key promotes new root key");
                self.protocol.set_root_key(candidate.clone());
                self.protocol.persist_root_key().await?;
            }

            let mut emitted = vec![decrypted.clone()];
            self.clear_undecryptable(&decrypted).await?;

            // The same candidate usually unlocks sibling keys wrapped by
            // the same password change.
            let mut still_failing = VecDeque::new();
            while let Some(sibling) = remaining.pop_front() {
                match self.try_decrypt_with(&sibling, &candidate) {
                    Some(recovered) => {
                        self.clear_undecryptable(&recovered).await?;
                        emitted.push(recovered);
                    }
                    None => still_failing.push_back(sibling),
                }
            }
            remaining = still_failing;

            self.payloads.emit_payloads(emitted, PayloadSource::LocalChanged);
            self.sync.repair_waiting_payloads().await?;
        }

        self.finalize_recovery().await
    }

    /// Post-drain reconciliation
    async fn finalize_recovery(&self) -> Result<(), NotelockError> {
        let server_params = self.server_params.read().clone();
        let client_params = self.protocol.account_key_params();
        let diverged = match (&server_params, &client_params) {
            (Some(server), Some(client)) => !server.derivation_equals(client),
            _ => false,
        };
        if diverged {
            if let Some(user) = self.session.current_user() {
                info!("key params still diverge from server; corrective sign-in");
                if let Some(password) = self
                    .challenge
                    .prompt_password(ChallengeReason::Reauthentication)
                    .await
                {
                    if let Err(e) = self.session.sign_in(&user.email, &password).await {
                        warn!(error = %e, "corrective sign-in failed");
                    }
                }
            }
        }
        if self.sync.is_out_of_sync() {
            self.sync
                .sync(SyncOptions {
                    timing: TimingStrategy::ForceSpawnNew,
                    check_integrity: true,
                    ..Default::default()
                })
                .await?;
        }
        Ok(())
    }

    /// Restores persisted undecryptable keys into the queue at launch
    pub async fn load_persisted_queue(&self) -> Result<(), NotelockError> {
        let Some(record) = self
            .storage
            .get_value(storage_keys::UNDECRYPTABLE_ITEMS, StorageValueMode::Nonwrapped)
            .await?
            .and_then(|v| v.as_object().cloned())
        else {
            return Ok(());
        };
        for raw in record.values() {
            let wire: notelock_domain::entities::WirePayload =
                serde_json::from_value(raw.clone())?;
            let payload = Payload::from_wire(&wire)?;
            self.enqueue(payload.copy().error_decrypting(true).build());
        }
        Ok(())
    }

    /// Serializes the persisted record for host inspection
    pub async fn persisted_record(&self) -> Result<Value, NotelockError> {
        Ok(self
            .storage
            .get_value(storage_keys::UNDECRYPTABLE_ITEMS, StorageValueMode::Nonwrapped)
            .await?
            .unwrap_or_else(|| json!({})))
    }
}

impl Drop for KeyRecoveryService {
    fn drop(&mut self) {
        if let Some(subscription) = self.subscription.write().take() {
            self.payloads.remove_observer(subscription);
        }
    }
}
