// /////////////////////////////////////////////////////////////////////////////
// Notelock Sync Engine
// Copyright (c) 2025 Notelock Project Contributors
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Migration Service
//!
//! Ordered, stage-gated schema migrations keyed on the version marker
//! persisted under `snjs_version`. Each migration declares a semver
//! version and reacts to host lifecycle stages; the service activates
//! every migration newer than the stored marker, forwards stages to them
//! in version order, and overwrites the marker once the final migration
//! completes.
//!
//! Migration failure is the engine's only fatal error class: the launch
//! sequence surfaces it to the host and refuses to continue.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::json;
use tracing::{info, warn};

use notelock_domain::error::NotelockError;
use notelock_domain::repositories::DeviceInterface;

use crate::application::options::ApplicationOptions;
use crate::application::services::storage::{storage_keys, StorageService, StorageValueMode};

/// Library version written once all migrations complete.
pub const ENGINE_VERSION: &str = "2.0.0";

/// Version marker stamped on legacy installs that predate markers.
const LEGACY_VERSION: &str = "1.0.0";

/// Host lifecycle stages forwarded to migrations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ApplicationStage {
    PreparingForLaunch,
    LoadedDatabase,
    StorageDecrypted,
    Launched,
    SignedIn,
}

/// Compares two `x.y.z` version strings numerically.
pub fn compare_semver(a: &str, b: &str) -> std::cmp::Ordering {
    let parse = |v: &str| -> (u32, u32, u32) {
        let mut parts = v.split('.').map(|p| p.parse::<u32>().unwrap_or(0));
        (
            parts.next().unwrap_or(0),
            parts.next().unwrap_or(0),
            parts.next().unwrap_or(0),
        )
    };
    parse(a).cmp(&parse(b))
}

/// Shared service handles migrations operate through.
#[derive(Clone)]
pub struct MigrationContext {
    pub device: Arc<dyn DeviceInterface>,
    pub storage: Arc<StorageService>,
    pub options: ApplicationOptions,
}

/// One versioned migration.
#[async_trait]
pub trait Migration: Send + Sync {
    /// Semver this migration upgrades the install to
    fn version(&self) -> &'static str;

    /// Reacts to one lifecycle stage
    async fn handle_stage(
        &self,
        stage: ApplicationStage,
        context: &MigrationContext,
    ) -> Result<(), NotelockError>;
}

/// Repairs and bootstrapping that run on every launch, before versioned
/// migrations are selected.
struct BaseMigration;

impl BaseMigration {
    /// Ensures a version marker exists
    ///
    /// Fresh installs (no keychain, no data) start at the current
    /// version; installs with data but no marker predate markers and get
    /// the legacy version so every migration runs.
    async fn pre_run(&self, context: &MigrationContext) -> Result<(), NotelockError> {
        let marker = context
            .storage
            .get_value(storage_keys::ENGINE_VERSION, StorageValueMode::Nonwrapped)
            .await?;
        if marker.is_some() {
            return Ok(());
        }
        let has_existing_data = context.device.get_keychain_value().await?.is_some()
            || !context.device.get_all_raw_database_payloads().await?.is_empty();
        let version = if has_existing_data {
            LEGACY_VERSION
        } else {
            ENGINE_VERSION
        };
        info!(version, "bootstrapping version marker");
        context
            .storage
            .set_value(
                storage_keys::ENGINE_VERSION,
                json!(version),
                StorageValueMode::Nonwrapped,
            )
            .await
    }

    /// Whether the keychain needs structural repair
    ///
    /// Legacy clients stored the bare master key string; current clients
    /// store a JSON object. A string value marks repair pending until the
    /// account's key params can reconstruct the object at sign-in.
    async fn keychain_needs_repair(&self, context: &MigrationContext) -> Result<bool, NotelockError> {
        Ok(matches!(
            context.device.get_keychain_value().await?,
            Some(serde_json::Value::String(_))
        ))
    }
}

/// Moves flat, un-namespaced storage keys under the application
/// identifier so multiple engine instances can share one device store.
struct StorageNamespaceMigration;

#[async_trait]
impl Migration for StorageNamespaceMigration {
    fn version(&self) -> &'static str {
        "1.5.0"
    }

    async fn handle_stage(
        &self,
        stage: ApplicationStage,
        context: &MigrationContext,
    ) -> Result<(), NotelockError> {
        if stage != ApplicationStage::PreparingForLaunch {
            return Ok(());
        }
        for key in [
            storage_keys::LAST_SYNC_TOKEN,
            storage_keys::PAGINATION_TOKEN,
            storage_keys::USER,
            storage_keys::SESSION,
        ] {
            let Some(value) = context.device.get_raw_storage_value(key).await? else {
                continue;
            };
            let namespaced = context.options.namespaced_key(key);
            if context.device.get_raw_storage_value(&namespaced).await?.is_none() {
                info!(key, "migrating storage key into namespace");
                context.device.set_raw_storage_value(&namespaced, &value).await?;
            }
            context.device.remove_raw_storage_value(key).await?;
        }
        Ok(())
    }
}

/// Stage-gated migration runner.
pub struct MigrationService {
    context: MigrationContext,
    base: BaseMigration,
    active: RwLock<Vec<Arc<dyn Migration>>>,
    keychain_repair_pending: RwLock<bool>,
}

impl MigrationService {
    pub fn new(
        device: Arc<dyn DeviceInterface>,
        storage: Arc<StorageService>,
        options: ApplicationOptions,
    ) -> Self {
        Self {
            context: MigrationContext {
                device,
                storage,
                options,
            },
            base: BaseMigration,
            active: RwLock::new(Vec::new()),
            keychain_repair_pending: RwLock::new(false),
        }
    }

    /// All migrations the library ships, version-sorted
    fn registered_migrations() -> Vec<Arc<dyn Migration>> {
        let mut migrations: Vec<Arc<dyn Migration>> = vec![Arc::new(StorageNamespaceMigration)];
        migrations.sort_by(|a, b| compare_semver(a.version(), b.version()));
        migrations
    }

    /// Runs the base pre-run and selects pending migrations
    ///
    /// # Errors
    ///
    /// * `MigrationError` - fatal; the engine must not launch
    pub async fn initialize(&self) -> Result<(), NotelockError> {
        self.base
            .pre_run(&self.context)
            .await
            .map_err(|e| NotelockError::MigrationError(e.to_string()))?;
        *self.keychain_repair_pending.write() = self
            .base
            .keychain_needs_repair(&self.context)
            .await
            .map_err(|e| NotelockError::MigrationError(e.to_string()))?;

        let stored = self
            .stored_version()
            .await
            .map_err(|e| NotelockError::MigrationError(e.to_string()))?;
        let pending: Vec<Arc<dyn Migration>> = Self::registered_migrations()
            .into_iter()
            .filter(|m| compare_semver(m.version(), &stored) == std::cmp::Ordering::Greater)
            .collect();
        info!(
            stored = %stored,
            pending = pending.len(),
            "migrations initialized"
        );
        *self.active.write() = pending;
        Ok(())
    }

    async fn stored_version(&self) -> Result<String, NotelockError> {
        Ok(self
            .context
            .storage
            .get_value(storage_keys::ENGINE_VERSION, StorageValueMode::Nonwrapped)
            .await?
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_else(|| LEGACY_VERSION.to_string()))
    }

    /// Whether required migrations remain or the keychain needs repair
    pub async fn has_pending_migrations(&self) -> Result<bool, NotelockError> {
        Ok(!self.active.read().is_empty() || *self.keychain_repair_pending.read())
    }

    /// Forwards a lifecycle stage to every active migration
    ///
    /// After `Launched`, completed migrations are retired and the stored
    /// version marker advances to the library version.
    pub async fn handle_stage(&self, stage: ApplicationStage) -> Result<(), NotelockError> {
        if stage == ApplicationStage::SignedIn && *self.keychain_repair_pending.read() {
            self.repair_keychain().await?;
        }
        let active: Vec<Arc<dyn Migration>> = self.active.read().clone();
        for migration in active {
            migration
                .handle_stage(stage, &self.context)
                .await
                .map_err(|e| {
                    NotelockError::MigrationError(format!(
                        "migration {} failed at {:?}: {}",
                        migration.version(),
                        stage,
                        e
                    ))
                })?;
        }
        if stage == ApplicationStage::Launched {
            self.mark_done().await?;
        }
        Ok(())
    }

    async fn mark_done(&self) -> Result<(), NotelockError> {
        if self.active.read().is_empty() {
            return Ok(());
        }
        self.active.write().clear();
        self.context
            .storage
            .set_value(
                storage_keys::ENGINE_VERSION,
                json!(ENGINE_VERSION),
                StorageValueMode::Nonwrapped,
            )
            .await
            .map_err(|e| NotelockError::MigrationError(e.to_string()))?;
        info!(version = ENGINE_VERSION, "migrations complete");
        Ok(())
    }

    /// Rewrites a legacy bare-string keychain into the current shape
    async fn repair_keychain(&self) -> Result<(), NotelockError> {
        let Some(serde_json::Value::String(master_key)) =
            self.context.device.get_keychain_value().await?
        else {
            *self.keychain_repair_pending.write() = false;
            return Ok(());
        };
        warn!("repairing legacy keychain value");
        self.context
            .device
            .set_keychain_value(json!({ "master_key": master_key }))
            .await?;
        *self.keychain_repair_pending.write() = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_semver_compare() {
        use std::cmp::Ordering;
        assert_eq!(compare_semver("1.0.0", "1.0.0"), Ordering::Equal);
        assert_eq!(compare_semver("1.5.0", "1.0.0"), Ordering::Greater);
        assert_eq!(compare_semver("1.9.0", "1.10.0"), Ordering::Less);
        assert_eq!(compare_semver("2.0.0", "1.99.99"), Ordering::Greater);
    }
}
