// /////////////////////////////////////////////////////////////////////////////
// Notelock Sync Engine
// Copyright (c) 2025 Notelock Project Contributors
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Application
//!
//! The composition root: one explicitly constructed services struct per
//! namespace, wired from the three injected collaborators (device
//! interface, API transport, challenge responder). No process-wide
//! singletons exist, so multiple applications with distinct identifiers
//! can share a process and a device store.
//!
//! ## Launch Sequence
//!
//! `prepare_for_launch` → `launch`:
//!
//! 1. `Started`; migrations initialize (fatal on failure) and receive
//!    `PreparingForLaunch`.
//! 2. The root key loads from the keychain, prompting for a passcode when
//!    the keychain is wrapped.
//! 3. Storage values decrypt (`StorageReady`), the session restores, the
//!    local database loads into the payload manager (`LocalDataLoaded`),
//!    and payloads parked on missing keys get a repair pass.
//! 4. `Launched`; a signed-in session forwards the `SignedIn` stage.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use serde_json::Value;
use tracing::info;

use notelock_domain::entities::{Item, PayloadSource};
use notelock_domain::error::NotelockError;
use notelock_domain::events::ApplicationEvent;
use notelock_domain::repositories::{
    ApiClient, ChallengeReason, ChallengeResponder, DeviceInterface, User,
};
use notelock_domain::value_objects::{ContentType, ItemContent};

use crate::application::event_bus::{EventBus, EventObserver, EventSubscription};
use crate::application::options::ApplicationOptions;
use crate::application::services::item_manager::ItemManager;
use crate::application::services::key_recovery::KeyRecoveryService;
use crate::application::services::migration::{ApplicationStage, MigrationService};
use crate::application::services::payload_manager::PayloadManager;
use crate::application::services::protocol::ProtocolService;
use crate::application::services::session::{SessionService, SignInOutcome};
use crate::application::services::storage::{StorageEncryptionDelegate, StorageService};
use crate::application::services::sync::{SyncMode, SyncOptions, SyncService, TimingStrategy};
use crate::infrastructure::adapters::default_operator_registry;

/// One engine instance: services composed over injected collaborators.
pub struct Application {
    options: ApplicationOptions,
    events: Arc<EventBus>,
    payloads: Arc<PayloadManager>,
    items: Arc<ItemManager>,
    storage: Arc<StorageService>,
    protocol: Arc<ProtocolService>,
    session: Arc<SessionService>,
    sync: Arc<SyncService>,
    key_recovery: Arc<KeyRecoveryService>,
    migrations: Arc<MigrationService>,
    challenge: Arc<dyn ChallengeResponder>,
    launched: AtomicBool,
}

impl Application {
    /// Wires a full application from its injected collaborators
    pub fn new(
        options: ApplicationOptions,
        device: Arc<dyn DeviceInterface>,
        api: Arc<dyn ApiClient>,
        challenge: Arc<dyn ChallengeResponder>,
    ) -> Arc<Self> {
        let events = Arc::new(EventBus::new());
        let payloads = Arc::new(PayloadManager::new());
        let items = ItemManager::new(Arc::clone(&payloads));
        let storage = Arc::new(StorageService::new(
            Arc::clone(&device),
            Arc::clone(&events),
            options.clone(),
        ));
        let protocol = Arc::new(ProtocolService::new(
            default_operator_registry(),
            Arc::clone(&payloads),
            Arc::clone(&device),
            Arc::clone(&events),
            options.clone(),
        ));
        let protocol_dyn: Arc<dyn StorageEncryptionDelegate> = Arc::clone(&protocol) as Arc<dyn StorageEncryptionDelegate>;
        let delegate: Weak<dyn StorageEncryptionDelegate> = Arc::downgrade(&protocol_dyn);
        storage.set_encryption_delegate(delegate);

        let session = Arc::new(SessionService::new(
            Arc::clone(&api),
            Arc::clone(&storage),
            Arc::clone(&protocol),
            Arc::clone(&payloads),
            Arc::clone(&challenge),
            Arc::clone(&events),
        ));
        let sync = Arc::new(SyncService::new(
            Arc::clone(&api),
            Arc::clone(&storage),
            Arc::clone(&protocol),
            Arc::clone(&payloads),
            Arc::clone(&session),
            Arc::clone(&events),
            options.clone(),
        ));
        let key_recovery = KeyRecoveryService::new(
            Arc::clone(&api),
            Arc::clone(&storage),
            Arc::clone(&protocol),
            Arc::clone(&payloads),
            Arc::clone(&session),
            Arc::clone(&sync),
            Arc::clone(&challenge),
            Arc::clone(&events),
        );
        let migrations = Arc::new(MigrationService::new(
            Arc::clone(&device),
            Arc::clone(&storage),
            options.clone(),
        ));

        Arc::new(Self {
            options,
            events,
            payloads,
            items,
            storage,
            protocol,
            session,
            sync,
            key_recovery,
            migrations,
            challenge,
            launched: AtomicBool::new(false),
        })
    }

    // ---- lifecycle ----------------------------------------------------------

    /// Runs migrations and restores persisted state
    ///
    /// # Errors
    ///
    /// * `MigrationError` - fatal; the host must not continue
    pub async fn prepare_for_launch(&self) -> Result<(), NotelockError> {
        self.events.notify(ApplicationEvent::Started);

        self.migrations.initialize().await?;
        self.migrations
            .handle_stage(ApplicationStage::PreparingForLaunch)
            .await?;
        self.events.notify(ApplicationEvent::MigrationsLoaded);

        self.unlock_root_key().await?;
        self.storage.initialize().await?;
        self.events.notify(ApplicationEvent::StorageReady);
        self.session.load_persisted_credentials().await?;

        self.load_local_database().await?;
        self.migrations.handle_stage(ApplicationStage::LoadedDatabase).await?;
        self.migrations
            .handle_stage(ApplicationStage::StorageDecrypted)
            .await?;
        self.events.notify(ApplicationEvent::LocalDataLoaded);

        self.key_recovery.load_persisted_queue().await?;
        Ok(())
    }

    async fn unlock_root_key(&self) -> Result<(), NotelockError> {
        // First attempt without a passcode; a wrapped keychain asks for one.
        match self.protocol.load_root_key(&self.storage, None).await {
            Ok(_) => Ok(()),
            Err(NotelockError::AuthenticationFailed(_)) => {
                let Some(passcode) = self
                    .challenge
                    .prompt_passcode(ChallengeReason::PasscodeUnlock)
                    .await
                else {
                    return Err(NotelockError::ChallengeCancelled(
                        "passcode unlock cancelled".to_string(),
                    ));
                };
                self.protocol
                    .load_root_key(&self.storage, Some(&passcode))
                    .await
                    .map(|_| ())
            }
            Err(e) => Err(e),
        }
    }

    async fn load_local_database(&self) -> Result<(), NotelockError> {
        let payloads = self.storage.load_all_payloads().await?;
        if payloads.is_empty() {
            return Ok(());
        }
        info!(count = payloads.len(), "loading local database");
        // Items keys first so dependent payloads can resolve their key on
        // the repair pass.
        let (keys, rest): (Vec<_>, Vec<_>) = payloads
            .into_iter()
            .partition(|p| p.content_type() == &ContentType::ItemsKey);
        if !keys.is_empty() {
            self.payloads
                .emit_payloads(keys, PayloadSource::LocalDatabaseLoaded);
        }
        if !rest.is_empty() {
            self.payloads
                .emit_payloads(rest, PayloadSource::LocalDatabaseLoaded);
        }
        self.sync.repair_waiting_payloads().await?;
        Ok(())
    }

    /// Completes the launch sequence
    pub async fn launch(&self) -> Result<(), NotelockError> {
        self.migrations.handle_stage(ApplicationStage::Launched).await?;
        if self.session.is_signed_in() {
            self.migrations.handle_stage(ApplicationStage::SignedIn).await?;
        }
        self.launched.store(true, Ordering::Release);
        self.events.notify(ApplicationEvent::Launched);
        Ok(())
    }

    pub fn is_launched(&self) -> bool {
        self.launched.load(Ordering::Acquire)
    }

    // ---- account ------------------------------------------------------------

    /// Registers an account and runs the first sync
    pub async fn register(&self, email: &str, password: &str) -> Result<User, NotelockError> {
        let user = self.session.register(email, password).await?;
        self.migrations.handle_stage(ApplicationStage::SignedIn).await?;
        self.sync
            .sync(SyncOptions {
                mode: SyncMode::Default,
                timing: TimingStrategy::ForceSpawnNew,
                check_integrity: false,
            })
            .await?;
        Ok(user)
    }

    /// Signs in and runs the initial (download-first) sync
    pub async fn sign_in(&self, email: &str, password: &str) -> Result<SignInOutcome, NotelockError> {
        let outcome = self.session.sign_in(email, password).await?;
        self.migrations.handle_stage(ApplicationStage::SignedIn).await?;
        self.sync
            .sync(SyncOptions {
                mode: SyncMode::Initial,
                timing: TimingStrategy::ForceSpawnNew,
                check_integrity: false,
            })
            .await?;
        // Sign-in against an account with no items keys yet (fresh or
        // legacy) mints the first one.
        if self.protocol.default_items_key().is_none() {
            self.protocol.create_new_default_items_key()?;
            self.sync.sync(SyncOptions::default()).await?;
        }
        self.key_recovery.process_queue().await?;
        Ok(outcome)
    }

    /// Changes the account password and re-syncs everything
    pub async fn change_password(
        &self,
        current_password: &str,
        new_password: &str,
    ) -> Result<(), NotelockError> {
        self.session.change_password(current_password, new_password).await?;
        self.sync
            .sync(SyncOptions {
                timing: TimingStrategy::ForceSpawnNew,
                ..Default::default()
            })
            .await
    }

    /// Signs out and clears all local state
    pub async fn sign_out(&self) -> Result<(), NotelockError> {
        self.session.sign_out().await?;
        self.sync.reset().await?;
        self.protocol.clear_keys().await?;
        self.storage.clear_all().await?;
        self.payloads.reset();
        self.items.reset();
        self.launched.store(false, Ordering::Release);
        Ok(())
    }

    // ---- sync ---------------------------------------------------------------

    /// Runs a default sync round
    pub async fn sync(&self) -> Result<(), NotelockError> {
        self.sync.sync(SyncOptions::default()).await?;
        self.key_recovery.process_queue().await
    }

    /// Runs a sync with explicit options
    pub async fn sync_with_options(&self, options: SyncOptions) -> Result<(), NotelockError> {
        self.sync.sync(options).await?;
        self.key_recovery.process_queue().await
    }

    // ---- preferences --------------------------------------------------------

    fn prefs_item(&self) -> Option<Item> {
        self.items
            .items_of_type(&ContentType::UserPrefs)
            .into_iter()
            .next()
    }

    /// Reads a preference from the user-preferences singleton
    pub fn get_preference(&self, key: &str, default: Value) -> Value {
        self.prefs_item()
            .and_then(|item| item.content().field(key).cloned())
            .unwrap_or(default)
    }

    /// Writes a preference, creating the singleton on first use
    pub fn set_preference(&self, key: &str, value: Value) -> Result<(), NotelockError> {
        match self.prefs_item() {
            Some(item) => {
                self.items.change_item(item.uuid(), |mutator| {
                    mutator.set_field(key, value);
                })?;
            }
            None => {
                let mut content = ItemContent::new();
                content.set_field(key, value);
                self.items.create_item(ContentType::UserPrefs, content)?;
            }
        }
        self.events.notify(ApplicationEvent::PreferencesChanged);
        Ok(())
    }

    // ---- accessors ----------------------------------------------------------

    pub fn options(&self) -> &ApplicationOptions {
        &self.options
    }

    pub fn items(&self) -> &Arc<ItemManager> {
        &self.items
    }

    pub fn payloads(&self) -> &Arc<PayloadManager> {
        &self.payloads
    }

    pub fn protocol(&self) -> &Arc<ProtocolService> {
        &self.protocol
    }

    pub fn storage(&self) -> &Arc<StorageService> {
        &self.storage
    }

    pub fn session_service(&self) -> &Arc<SessionService> {
        &self.session
    }

    pub fn sync_service(&self) -> &Arc<SyncService> {
        &self.sync
    }

    pub fn key_recovery(&self) -> &Arc<KeyRecoveryService> {
        &self.key_recovery
    }

    pub fn migrations(&self) -> &Arc<MigrationService> {
        &self.migrations
    }

    /// Subscribes to application events
    pub fn add_event_observer(&self, observer: EventObserver) -> EventSubscription {
        self.events.subscribe(observer)
    }

    pub fn remove_event_observer(&self, subscription: EventSubscription) {
        self.events.unsubscribe(subscription)
    }
}
