// /////////////////////////////////////////////////////////////////////////////
// Notelock Sync Engine
// Copyright (c) 2025 Notelock Project Contributors
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Migration Integration Tests
//!
//! Version-marker bootstrapping, the namespace migration over legacy
//! storage layouts, and keychain repair detection.

mod common;

use std::sync::Arc;

use common::{launch_app, launch_app_with_device, LocalSyncServer};
use notelock::application::ApplicationOptions;
use notelock::infrastructure::repositories::MemoryDeviceInterface;
use notelock_domain::repositories::DeviceInterface;
use serde_json::json;

#[tokio::test]
async fn test_fresh_install_has_no_pending_migrations() {
    let ctx = launch_app(LocalSyncServer::new(), "fresh-install").await;
    assert!(!ctx.app.migrations().has_pending_migrations().await.unwrap());

    // The marker lands at the current library version.
    let marker = ctx
        .device
        .get_raw_storage_value("fresh-install-snjs_version")
        .await
        .unwrap();
    assert_eq!(marker, Some("\"2.0.0\"".to_string()));
}

#[tokio::test]
async fn test_legacy_storage_keys_migrate_into_namespace() {
    let device = Arc::new(MemoryDeviceInterface::new());
    // A legacy client wrote flat keys and a bare-string keychain.
    device
        .set_raw_storage_value("last_sync_token", "\"12345\"")
        .await
        .unwrap();
    device
        .set_keychain_value(json!("aa".repeat(32)))
        .await
        .unwrap();

    let ctx = launch_app_with_device(
        LocalSyncServer::new(),
        device,
        ApplicationOptions::new("legacy-ns"),
    )
    .await;

    // The flat key moved under the namespace.
    assert_eq!(
        ctx.device.get_raw_storage_value("last_sync_token").await.unwrap(),
        None
    );
    assert_eq!(
        ctx.device
            .get_raw_storage_value("legacy-ns-last_sync_token")
            .await
            .unwrap(),
        Some("\"12345\"".to_string())
    );

    // Versioned migrations are done, but the keychain still awaits its
    // sign-in-time repair.
    assert!(ctx.app.migrations().has_pending_migrations().await.unwrap());
}

#[tokio::test]
async fn test_launched_stage_advances_version_marker() {
    let device = Arc::new(MemoryDeviceInterface::new());
    // Existing data plus a stale marker forces the migration path.
    device
        .set_raw_storage_value("legacy-adv-snjs_version", "\"1.0.0\"")
        .await
        .unwrap();
    device
        .set_raw_storage_value("session", "{}")
        .await
        .unwrap();

    let ctx = launch_app_with_device(
        LocalSyncServer::new(),
        device,
        ApplicationOptions::new("legacy-adv"),
    )
    .await;

    let marker = ctx
        .device
        .get_raw_storage_value("legacy-adv-snjs_version")
        .await
        .unwrap();
    assert_eq!(marker, Some("\"2.0.0\"".to_string()));
    assert!(!ctx.app.migrations().has_pending_migrations().await.unwrap());
}
