// /////////////////////////////////////////////////////////////////////////////
// Notelock Sync Engine
// Copyright (c) 2025 Notelock Project Contributors
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Persistence Integration Tests
//!
//! Restart behavior over one device store: local database reload, root
//! key restoration from the keychain (plain and passcode-wrapped), and
//! crash-safe dirty payloads surviving into a new launch.

mod common;

use std::sync::Arc;

use common::{launch_app, LocalSyncServer, ScriptedChallenge};
use notelock::application::{Application, ApplicationOptions};
use notelock_domain::value_objects::{ContentType, ItemContent};
use serde_json::json;

const EMAIL: &str = "persist@example.com";
const PASSWORD: &str = "persistent passphrase";

fn note_content(title: &str) -> ItemContent {
    let mut content = ItemContent::new();
    content.set_field("title", json!(title));
    content
}

#[tokio::test]
async fn test_relaunch_restores_items_and_session() {
    let server = LocalSyncServer::new();
    let ctx = launch_app(server.clone(), "relaunch").await;
    ctx.app.register(EMAIL, PASSWORD).await.unwrap();
    let note = ctx
        .app
        .items()
        .create_item(ContentType::Note, note_content("persisted"))
        .unwrap();
    let note_uuid = *note.uuid();
    ctx.app.sync().await.unwrap();

    // Second launch over the same device store.
    let challenge = ScriptedChallenge::new();
    let relaunched = Application::new(
        ApplicationOptions::new("relaunch"),
        ctx.device.clone(),
        server.clone(),
        challenge,
    );
    relaunched.prepare_for_launch().await.unwrap();
    relaunched.launch().await.unwrap();

    assert!(relaunched.session_service().is_signed_in());
    assert!(relaunched.protocol().has_root_key());
    let restored = relaunched.items().find_item(&note_uuid).unwrap();
    assert_eq!(restored.content().string_field("title"), Some("persisted"));
    assert_eq!(relaunched.items().invalid_item_count(), 0);

    // The restored session still syncs.
    relaunched.sync().await.unwrap();
}

#[tokio::test]
async fn test_dirty_payloads_survive_relaunch() {
    let server = LocalSyncServer::new();
    let ctx = launch_app(server.clone(), "crash-safe").await;
    ctx.app.register(EMAIL, PASSWORD).await.unwrap();

    // A failed round persists the dirty payload before the request left.
    ctx.app
        .items()
        .create_item(ContentType::Note, note_content("unflushed"))
        .unwrap();
    *ctx.server.fail_next_sync_with.lock() = Some(500);
    assert!(ctx.app.sync().await.is_err());

    let challenge = ScriptedChallenge::new();
    let relaunched = Application::new(
        ApplicationOptions::new("crash-safe"),
        ctx.device.clone(),
        server.clone(),
        challenge,
    );
    relaunched.prepare_for_launch().await.unwrap();
    relaunched.launch().await.unwrap();

    let dirty = relaunched.payloads().dirty_payloads();
    assert_eq!(dirty.len(), 1);
    relaunched.sync().await.unwrap();
    assert!(relaunched.payloads().dirty_payloads().is_empty());
    assert!(server
        .stored_items(EMAIL)
        .iter()
        .any(|w| &w.uuid == dirty[0].uuid()));
}

#[tokio::test]
async fn test_passcode_wraps_root_key_across_launches() {
    let server = LocalSyncServer::new();
    let ctx = launch_app(server.clone(), "passcode").await;
    ctx.app.register(EMAIL, PASSWORD).await.unwrap();
    ctx.app
        .items()
        .create_item(ContentType::Note, note_content("locked"))
        .unwrap();
    ctx.app.sync().await.unwrap();

    ctx.app
        .protocol()
        .set_passcode(ctx.app.storage(), "1234")
        .await
        .unwrap();

    // The keychain now holds ciphertext, not the root key.
    use notelock_domain::repositories::DeviceInterface;
    let keychain = ctx.device.get_keychain_value().await.unwrap().unwrap();
    assert!(keychain.get("wrapped").is_some());

    // Relaunch: the wrapped keychain demands the passcode.
    let challenge = ScriptedChallenge::new();
    *challenge.passcode.lock() = Some("1234".to_string());
    let relaunched = Application::new(
        ApplicationOptions::new("passcode"),
        ctx.device.clone(),
        server.clone(),
        challenge,
    );
    relaunched.prepare_for_launch().await.unwrap();
    relaunched.launch().await.unwrap();
    assert!(relaunched.protocol().has_root_key());
    assert_eq!(relaunched.items().invalid_item_count(), 0);

    // Without the passcode the launch aborts.
    let cancelling = Arc::new(ScriptedChallenge::default());
    let refused = Application::new(
        ApplicationOptions::new("passcode"),
        ctx.device.clone(),
        server.clone(),
        cancelling,
    );
    assert!(refused.prepare_for_launch().await.is_err());
}
