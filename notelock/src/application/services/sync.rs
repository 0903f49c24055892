// /////////////////////////////////////////////////////////////////////////////
// Notelock Sync Engine
// Copyright (c) 2025 Notelock Project Contributors
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Sync Service
//!
//! The queued sync state machine. One sync operation runs at a time;
//! callers arriving while one is in flight either await the next
//! completion (`ResolveOnNext`) or enqueue a fresh operation to run after
//! the current one (`ForceSpawnNew`).
//!
//! ## One Round
//!
//! 1. **Pre-flight**: collect dirty payloads; clear never-uploaded
//!    deletions locally; persist dirty payloads whose `dirtied_date` is
//!    newer than the last pre-sync save *before* any network I/O (crash
//!    safety); stamp `last_sync_began`.
//! 2. **Upload**: encrypt under the default items key and send along the
//!    stored sync and pagination tokens. Initial mode uploads nothing so
//!    existing items keys are discovered before new ones are minted.
//! 3. **Response**: persist tokens; decrypt retrieved payloads; reconcile
//!    through the conflict deltas per source; merge metadata-only saved
//!    acknowledgements with master content; emit into the payload
//!    manager; persist the reconciled payloads.
//! 4. **Pagination**: a cursor token chains another round immediately.
//! 5. **Integrity**: when the server supplies a hash, compare against the
//!    locally computed digest; after `max_discordance` consecutive
//!    mismatches the engine enters the out-of-sync state.
//! 6. **Chaining**: leftover dirt (conflict duplicates are born dirty)
//!    chains another round, bounded by `max_chained_rounds`.
//!
//! No error escapes a sync call without also being surfaced as an
//! application event.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde_json::json;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use notelock_domain::entities::{Payload, PayloadSource};
use notelock_domain::error::NotelockError;
use notelock_domain::events::{ApplicationEvent, MAJOR_DATA_CHANGE_THRESHOLD};
use notelock_domain::repositories::{
    ApiClient, ConflictType, SyncRequest, SyncResponse, API_VERSION,
};
use notelock_domain::services::{
    compute_integrity_hash, delta_out_of_sync, delta_remote_conflicts, delta_remote_rejected,
    delta_remote_retrieved, delta_remote_saved, EncryptionIntent,
};
use notelock_domain::value_objects::ContentType;

use crate::application::event_bus::EventBus;
use crate::application::options::ApplicationOptions;
use crate::application::services::payload_manager::PayloadManager;
use crate::application::services::protocol::ProtocolService;
use crate::application::services::session::SessionService;
use crate::application::services::storage::{storage_keys, StorageService, StorageValueMode};

/// What a sync call is trying to achieve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncMode {
    /// Upload dirt, download changes.
    #[default]
    Default,
    /// Download first; upload nothing. Used for the first sync of a
    /// session so existing items keys are discovered before any new key
    /// is created.
    Initial,
}

/// How a call behaves when a sync is already running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimingStrategy {
    /// Resolve when the next completed sync finishes.
    #[default]
    ResolveOnNext,
    /// Enqueue a fresh sync to run after the current one.
    ForceSpawnNew,
}

/// Options for one sync call.
#[derive(Debug, Clone, Copy, Default)]
pub struct SyncOptions {
    pub mode: SyncMode,
    pub timing: TimingStrategy,
    pub check_integrity: bool,
}

/// The queued sync state machine.
pub struct SyncService {
    api: Arc<dyn ApiClient>,
    storage: Arc<StorageService>,
    protocol: Arc<ProtocolService>,
    payloads: Arc<PayloadManager>,
    session: Arc<SessionService>,
    events: Arc<EventBus>,
    options: ApplicationOptions,

    op_lock: tokio::sync::Mutex<()>,
    resolvers: Mutex<Vec<oneshot::Sender<()>>>,
    last_pre_sync_save: RwLock<Option<DateTime<Utc>>>,
    out_of_sync: AtomicBool,
    discordance: AtomicU32,
    completed_initial_sync: AtomicBool,
}

impl SyncService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        api: Arc<dyn ApiClient>,
        storage: Arc<StorageService>,
        protocol: Arc<ProtocolService>,
        payloads: Arc<PayloadManager>,
        session: Arc<SessionService>,
        events: Arc<EventBus>,
        options: ApplicationOptions,
    ) -> Self {
        Self {
            api,
            storage,
            protocol,
            payloads,
            session,
            events,
            options,
            op_lock: tokio::sync::Mutex::new(()),
            resolvers: Mutex::new(Vec::new()),
            last_pre_sync_save: RwLock::new(None),
            out_of_sync: AtomicBool::new(false),
            discordance: AtomicU32::new(0),
            completed_initial_sync: AtomicBool::new(false),
        }
    }

    /// Whether the engine is currently in the out-of-sync state
    pub fn is_out_of_sync(&self) -> bool {
        self.out_of_sync.load(Ordering::Acquire)
    }

    /// Whether the initial sync of this session has completed
    pub fn completed_initial_sync(&self) -> bool {
        self.completed_initial_sync.load(Ordering::Acquire)
    }

    /// Clears sync cursors and round bookkeeping (sign-out)
    pub async fn reset(&self) -> Result<(), NotelockError> {
        self.storage
            .remove_value(storage_keys::LAST_SYNC_TOKEN, StorageValueMode::Unwrapped)
            .await?;
        self.storage
            .remove_value(storage_keys::PAGINATION_TOKEN, StorageValueMode::Unwrapped)
            .await?;
        *self.last_pre_sync_save.write() = None;
        self.out_of_sync.store(false, Ordering::Release);
        self.discordance.store(0, Ordering::Release);
        self.completed_initial_sync.store(false, Ordering::Release);
        Ok(())
    }

    /// Runs (or queues) a sync operation
    pub async fn sync(&self, options: SyncOptions) -> Result<(), NotelockError> {
        match self.op_lock.try_lock() {
            Ok(_guard) => {
                let result = self.perform_sync(options).await;
                self.flush_resolvers();
                result
            }
            Err(_) => match options.timing {
                TimingStrategy::ResolveOnNext => {
                    let (tx, rx) = oneshot::channel();
                    self.resolvers.lock().push(tx);
                    // The in-flight operation may have finished between the
                    // failed try_lock and the push; run a round ourselves in
                    // that case instead of waiting on a dead resolver.
                    if let Ok(_guard) = self.op_lock.try_lock() {
                        let result = self.perform_sync(options).await;
                        self.flush_resolvers();
                        return result;
                    }
                    // Resolved when the in-flight operation completes.
                    let _ = rx.await;
                    Ok(())
                }
                TimingStrategy::ForceSpawnNew => {
                    let _guard = self.op_lock.lock().await;
                    let result = self.perform_sync(options).await;
                    self.flush_resolvers();
                    result
                }
            },
        }
    }

    fn flush_resolvers(&self) {
        for resolver in self.resolvers.lock().drain(..) {
            let _ = resolver.send(());
        }
    }

    async fn perform_sync(&self, options: SyncOptions) -> Result<(), NotelockError> {
        self.events.notify(ApplicationEvent::WillSync);
        let result = self.perform_sync_inner(options).await;
        if let Err(e) = &result {
            warn!(error = %e, "sync failed");
            self.events.notify(ApplicationEvent::FailedSync);
        }
        result
    }

    async fn perform_sync_inner(&self, options: SyncOptions) -> Result<(), NotelockError> {
        let in_flight = self.pre_flight().await?;

        if !self.session.is_signed_in() {
            return self.complete_offline(in_flight).await;
        }

        if options.mode == SyncMode::Initial {
            // Download-only round so existing items keys are discovered
            // before anything new uploads.
            self.run_rounds(Vec::new(), options.check_integrity).await?;
            self.completed_initial_sync.store(true, Ordering::Release);
            self.events.notify(ApplicationEvent::CompletedFullSync);
            // Chain a default round to push pending local state.
            return Box::pin(self.perform_sync_inner(SyncOptions {
                mode: SyncMode::Default,
                timing: options.timing,
                check_integrity: options.check_integrity,
            }))
            .await;
        }

        let upload = self.encrypt_for_upload(&in_flight)?;
        self.run_rounds(upload, options.check_integrity).await?;

        // Conflict duplicates are born dirty; chain bounded follow-up
        // rounds until the library is clean.
        let mut chained = 0;
        while chained < self.options.max_chained_rounds {
            let remaining = self.collect_chained_dirty().await?;
            if remaining.is_empty() {
                break;
            }
            chained += 1;
            debug!(round = chained, dirty = remaining.len(), "chaining sync round");
            let upload = self.encrypt_for_upload(&remaining)?;
            self.run_rounds(upload, options.check_integrity).await?;
        }

        self.events.notify(ApplicationEvent::CompletedIncrementalSync);
        Ok(())
    }

    /// Pre-flight bookkeeping; returns the payloads to upload
    async fn pre_flight(&self) -> Result<Vec<Payload>, NotelockError> {
        let dirty = self.payloads.dirty_payloads();

        // Deleted items that never reached the server need no round trip.
        let (discardable, to_sync): (Vec<Payload>, Vec<Payload>) =
            dirty.into_iter().partition(Payload::discardable);
        if !discardable.is_empty() {
            let cleared: Vec<Payload> = discardable
                .into_iter()
                .map(|p| p.copy().dirty(false).build())
                .collect();
            // Removes any previously persisted row for the tombstone.
            self.storage.save_payloads(&cleared).await?;
            self.payloads.emit_payloads(cleared, PayloadSource::LocalSaved);
        }

        // Persist before network: anything dirtied since the last
        // pre-sync save must reach disk before the request leaves.
        let cutoff = *self.last_pre_sync_save.read();
        let to_persist: Vec<Payload> = to_sync
            .iter()
            .filter(|p| match (p.dirtied_date(), cutoff.as_ref()) {
                (Some(dirtied), Some(cutoff)) => dirtied > cutoff,
                (Some(_), None) => true,
                (None, _) => false,
            })
            .cloned()
            .collect();
        if !to_persist.is_empty() {
            self.storage.save_payloads(&to_persist).await?;
        }
        *self.last_pre_sync_save.write() = Some(Utc::now());

        // Stamp the in-flight marker used to detect mid-flight redirties.
        let began = Utc::now();
        let in_flight: Vec<Payload> = to_sync
            .iter()
            .map(|p| p.copy().last_sync_began(Some(began)).build())
            .collect();
        if !in_flight.is_empty() {
            self.payloads
                .emit_payloads(in_flight.clone(), PayloadSource::LocalSaved);
        }
        Ok(in_flight)
    }

    /// Offline completion: persist locally and settle dirty flags
    async fn complete_offline(&self, in_flight: Vec<Payload>) -> Result<(), NotelockError> {
        if !in_flight.is_empty() {
            let now = Utc::now();
            let settled: Vec<Payload> = in_flight
                .iter()
                .map(|p| p.copy().dirty(false).dirtied_date(None).last_sync_end(Some(now)).build())
                .collect();
            self.storage.save_payloads(&settled).await?;
            self.payloads.emit_payloads(settled, PayloadSource::LocalSaved);
        }
        self.events.notify(ApplicationEvent::CompletedIncrementalSync);
        Ok(())
    }

    fn encrypt_for_upload(&self, payloads: &[Payload]) -> Result<Vec<Payload>, NotelockError> {
        let mut upload = Vec::with_capacity(payloads.len());
        for payload in payloads {
            if payload.deleted() {
                upload.push(payload.copy().absent_content().build());
                continue;
            }
            match self.protocol.encrypt_payload(payload, EncryptionIntent::Sync) {
                Ok(encrypted) => upload.push(encrypted),
                Err(e @ NotelockError::KeyNotAvailable(_)) => {
                    // Stays dirty; uploads once keys exist.
                    warn!(uuid = %payload.uuid(), error = %e, "skipping upload, no key yet");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(upload)
    }

    async fn get_token(&self, key: &str) -> Result<Option<String>, NotelockError> {
        Ok(self
            .storage
            .get_value(key, StorageValueMode::Unwrapped)
            .await?
            .and_then(|v| v.as_str().map(str::to_string)))
    }

    async fn set_or_clear_token(&self, key: &str, token: Option<&str>) -> Result<(), NotelockError> {
        match token {
            Some(token) => {
                self.storage
                    .set_value(key, json!(token), StorageValueMode::Unwrapped)
                    .await
            }
            None => self.storage.remove_value(key, StorageValueMode::Unwrapped).await,
        }
    }

    /// Runs request/response rounds until pagination is exhausted
    async fn run_rounds(&self, upload: Vec<Payload>, check_integrity: bool) -> Result<(), NotelockError> {
        let mut items: Vec<Payload> = upload;
        loop {
            let request = SyncRequest {
                api: API_VERSION.to_string(),
                items: items.iter().map(Payload::to_wire).collect(),
                sync_token: self.get_token(storage_keys::LAST_SYNC_TOKEN).await?,
                cursor_token: self.get_token(storage_keys::PAGINATION_TOKEN).await?,
                limit: Some(self.options.sync_request_limit),
                compute_integrity: check_integrity,
            };
            let response = self.send_with_session_retry(request).await?;
            let has_more = self.handle_response(&response, check_integrity).await?;
            // Pagination rounds only download.
            items.clear();
            if !has_more {
                return Ok(());
            }
        }
    }

    /// Sends the request, retrying once after session reauthentication
    async fn send_with_session_retry(&self, request: SyncRequest) -> Result<SyncResponse, NotelockError> {
        let session = self
            .session
            .current_session()
            .ok_or_else(|| NotelockError::InvalidSession("not signed in".to_string()))?;
        match self.api.sync(&session, request.clone()).await {
            Ok(response) => Ok(response),
            Err(e) if e.is_invalid_session() => {
                if self.session.reauthenticate().await? {
                    let session = self
                        .session
                        .current_session()
                        .ok_or_else(|| NotelockError::InvalidSession("session lost".to_string()))?;
                    self.api.sync(&session, request).await
                } else {
                    Err(e)
                }
            }
            Err(e) => Err(e),
        }
    }

    /// Applies one response; returns whether a pagination round follows
    async fn handle_response(
        &self,
        response: &SyncResponse,
        check_integrity: bool,
    ) -> Result<bool, NotelockError> {
        if let Some(token) = &response.sync_token {
            self.set_or_clear_token(storage_keys::LAST_SYNC_TOKEN, Some(token))
                .await?;
        }
        self.set_or_clear_token(storage_keys::PAGINATION_TOKEN, response.cursor_token.as_deref())
            .await?;

        // Decrypt retrieved payloads; deleted or content-less ones pass
        // through untouched. Items keys decrypt and land in the master
        // first so payloads that depend on them resolve in one pass.
        let mut key_wires: Vec<&_> = Vec::new();
        let mut other_wires: Vec<&_> = Vec::new();
        for wire in &response.retrieved_items {
            if ContentType::from_raw(&wire.content_type) == ContentType::ItemsKey {
                key_wires.push(wire);
            } else {
                other_wires.push(wire);
            }
        }
        let mut keys_arrived = false;
        if !key_wires.is_empty() {
            let mut retrieved_keys = Vec::with_capacity(key_wires.len());
            for wire in key_wires {
                let payload = Payload::from_wire(wire)?;
                if payload.deleted() || !payload.content().is_encrypted() {
                    retrieved_keys.push(payload);
                } else {
                    retrieved_keys.push(self.protocol.decrypt_payload(&payload));
                }
            }
            let key_base = self.payloads.snapshot();
            let key_delta = delta_remote_retrieved(&key_base, retrieved_keys);
            if !key_delta.is_empty() {
                let source = key_delta.source();
                let payloads = key_delta.into_payloads();
                self.storage.save_payloads(&payloads).await?;
                self.payloads.emit_payloads(payloads, source);
                keys_arrived = true;
            }
        }

        let mut retrieved = Vec::with_capacity(other_wires.len());
        for wire in other_wires {
            let payload = Payload::from_wire(wire)?;
            if payload.deleted() || !payload.content().is_encrypted() {
                retrieved.push(payload);
            } else {
                retrieved.push(self.protocol.decrypt_payload(&payload));
            }
        }

        let mut sync_conflicts = Vec::new();
        let mut uuid_conflicts = Vec::new();
        let mut rejected = Vec::new();
        for conflict in &response.conflicts {
            match conflict.conflict_type {
                ConflictType::SyncConflict => match (&conflict.server_item, &conflict.unsaved_item) {
                    (Some(server_item), _) => {
                        let payload = Payload::from_wire(server_item)?;
                        sync_conflicts.push(self.protocol.decrypt_payload(&payload));
                    }
                    (None, Some(unsaved)) => {
                        // Save rejected without a server copy.
                        rejected.push(Payload::from_wire(unsaved)?);
                    }
                    (None, None) => warn!("conflict entry carries no payload"),
                },
                ConflictType::UuidConflict => {
                    if let Some(unsaved) = &conflict.unsaved_item {
                        let payload = Payload::from_wire(unsaved)?;
                        uuid_conflicts.push(self.protocol.decrypt_payload(&payload));
                    }
                }
            }
        }

        let saved: Vec<Payload> = response
            .saved_items
            .iter()
            .map(Payload::from_wire)
            .collect::<Result<_, _>>()?;

        // Reconcile per source against one consistent base snapshot.
        let base = self.payloads.snapshot();
        let retrieved_delta = delta_remote_retrieved(&base, retrieved);
        let saved_delta = delta_remote_saved(&base, saved);
        let conflict_delta = delta_remote_conflicts(&base, sync_conflicts, uuid_conflicts);
        let rejected_delta = delta_remote_rejected(&base, rejected);

        let mut touched = 0;
        let mut to_persist: Vec<Payload> = Vec::new();
        for collection in [retrieved_delta, saved_delta, conflict_delta, rejected_delta] {
            if collection.is_empty() {
                continue;
            }
            let source = collection.source();
            let payloads = collection.into_payloads();
            to_persist.extend(payloads.iter().cloned());
            let emission = self.payloads.emit_payloads(payloads, source);
            touched += emission.touched();
        }
        if !to_persist.is_empty() {
            self.storage.save_payloads(&to_persist).await?;
        }
        if touched >= MAJOR_DATA_CHANGE_THRESHOLD {
            self.events.notify(ApplicationEvent::MajorDataChange);
        }
        if keys_arrived {
            // Fresh keys may unlock payloads parked earlier in this or a
            // previous round.
            self.repair_waiting_payloads().await?;
        }

        if check_integrity {
            if let Some(server_hash) = &response.integrity_hash {
                self.check_integrity(server_hash);
            }
        }

        Ok(response.cursor_token.is_some())
    }

    fn check_integrity(&self, server_hash: &str) {
        let local = self.payloads.not_deleted();
        let refs: Vec<&Payload> = local.iter().collect();
        let local_hash = compute_integrity_hash(&refs);
        if local_hash == server_hash {
            self.discordance.store(0, Ordering::Release);
            if self.out_of_sync.swap(false, Ordering::AcqRel) {
                info!("integrity restored");
                self.events.notify(ApplicationEvent::ExitedOutOfSync);
            }
            return;
        }
        let misses = self.discordance.fetch_add(1, Ordering::AcqRel) + 1;
        warn!(misses, "integrity hash mismatch");
        if misses >= self.options.max_discordance && !self.out_of_sync.swap(true, Ordering::AcqRel) {
            self.events.notify(ApplicationEvent::EnteredOutOfSync);
        }
    }

    /// Dirty payloads for a chained round, with in-flight stamps
    async fn collect_chained_dirty(&self) -> Result<Vec<Payload>, NotelockError> {
        let dirty = self.payloads.dirty_payloads();
        if dirty.is_empty() {
            return Ok(Vec::new());
        }
        self.storage.save_payloads(&dirty).await?;
        let began = Utc::now();
        let in_flight: Vec<Payload> = dirty
            .iter()
            .map(|p| p.copy().last_sync_began(Some(began)).build())
            .collect();
        self.payloads
            .emit_payloads(in_flight.clone(), PayloadSource::LocalSaved);
        Ok(in_flight)
    }

    /// Recovers from the out-of-sync state
    ///
    /// Downloads the full server item set, reconciles it with the
    /// divergence-preserving delta, then requests an integrity-checked
    /// sync.
    pub async fn resolve_out_of_sync(&self) -> Result<(), NotelockError> {
        info!("resolving out-of-sync state");
        let _guard = self.op_lock.lock().await;

        let session = self
            .session
            .current_session()
            .ok_or_else(|| NotelockError::InvalidSession("not signed in".to_string()))?;

        // Full download: no sync token.
        let mut cursor: Option<String> = None;
        let mut downloaded: Vec<Payload> = Vec::new();
        loop {
            let request = SyncRequest {
                api: API_VERSION.to_string(),
                items: Vec::new(),
                sync_token: None,
                cursor_token: cursor.clone(),
                limit: Some(self.options.sync_request_limit),
                compute_integrity: false,
            };
            let response = self.api.sync(&session, request).await?;
            for wire in &response.retrieved_items {
                let payload = Payload::from_wire(wire)?;
                if payload.deleted() || !payload.content().is_encrypted() {
                    downloaded.push(payload);
                } else {
                    downloaded.push(self.protocol.decrypt_payload(&payload));
                }
            }
            if let Some(token) = &response.sync_token {
                self.set_or_clear_token(storage_keys::LAST_SYNC_TOKEN, Some(token))
                    .await?;
            }
            cursor = response.cursor_token;
            if cursor.is_none() {
                break;
            }
        }

        let base = self.payloads.snapshot();
        let reconciled = delta_out_of_sync(&base, downloaded);
        if !reconciled.is_empty() {
            let source = reconciled.source();
            let payloads = reconciled.into_payloads();
            self.storage.save_payloads(&payloads).await?;
            self.payloads.emit_payloads(payloads, source);
        }
        drop(_guard);
        self.flush_resolvers();

        self.sync(SyncOptions {
            mode: SyncMode::Default,
            timing: TimingStrategy::ForceSpawnNew,
            check_integrity: true,
        })
        .await
    }

    /// Items-key emissions may unlock parked payloads; repair and re-emit
    pub async fn repair_waiting_payloads(&self) -> Result<(), NotelockError> {
        let repaired = self.protocol.repair_waiting_payloads();
        if repaired.is_empty() {
            return Ok(());
        }
        info!(count = repaired.len(), "repaired payloads waiting for keys");
        self.storage.save_payloads(&repaired).await?;
        self.payloads
            .emit_payloads(repaired, PayloadSource::LocalChanged);
        Ok(())
    }

}
