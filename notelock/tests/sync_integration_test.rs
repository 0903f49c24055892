// /////////////////////////////////////////////////////////////////////////////
// Notelock Sync Engine
// Copyright (c) 2025 Notelock Project Contributors
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Sync Integration Tests
//!
//! End-to-end scenarios over the in-process server: zero-knowledge
//! upload, offline rounds, conflict duplication between two clients,
//! preference persistence, the 105-item password change, and the
//! integrity out-of-sync cycle.

mod common;

use std::sync::Arc;

use common::{launch_app, launch_app_with_options, LocalSyncServer};
use notelock::application::ApplicationOptions;
use notelock::application::services::sync::{SyncMode, SyncOptions, TimingStrategy};
use notelock_domain::entities::PayloadContent;
use notelock_domain::events::ApplicationEvent;
use notelock_domain::services::EncryptionIntent;
use notelock_domain::value_objects::{ContentType, ItemContent};
use parking_lot::Mutex;
use serde_json::json;

const EMAIL: &str = "sync@example.com";
const PASSWORD: &str = "a very long passphrase";

fn note_content(title: &str, text: &str) -> ItemContent {
    let mut content = ItemContent::new();
    content.set_field("title", json!(title));
    content.set_field("text", json!(text));
    content
}

#[tokio::test]
async fn test_server_only_sees_ciphertext() {
    let server = LocalSyncServer::new();
    let ctx = launch_app(server.clone(), "zero-knowledge").await;
    ctx.app.register(EMAIL, PASSWORD).await.unwrap();

    ctx.app
        .items()
        .create_item(ContentType::Note, note_content("my secret title", "my secret body"))
        .unwrap();
    ctx.app.sync().await.unwrap();

    let stored = server.stored_items(EMAIL);
    assert!(!stored.is_empty());
    for wire in &stored {
        if let Some(notelock_domain::entities::WireContent::String(content)) = &wire.content {
            assert!(
                content.starts_with("004:"),
                "server stored a non-004 content string: {}",
                &content[..8.min(content.len())]
            );
            assert!(!content.contains("secret"));
        }
    }
    // Nothing stayed dirty.
    assert!(ctx.app.payloads().dirty_payloads().is_empty());
}

#[tokio::test]
async fn test_offline_sync_persists_and_settles_dirty() {
    let server = LocalSyncServer::new();
    let ctx = launch_app(server.clone(), "offline").await;

    let item = ctx
        .app
        .items()
        .create_item(ContentType::Note, note_content("offline note", ""))
        .unwrap();
    assert!(item.dirty());
    ctx.app.sync().await.unwrap();

    let settled = ctx.app.payloads().find(item.uuid()).unwrap();
    assert!(!settled.dirty());
    assert!(settled.never_synced());
    assert!(ctx.device.payload_count() > 0);
}

#[tokio::test]
async fn test_decrypting_already_decrypted_payload_is_identity() {
    let server = LocalSyncServer::new();
    let ctx = launch_app(server.clone(), "identity").await;
    let item = ctx
        .app
        .items()
        .create_item(ContentType::Note, note_content("plain", "object"))
        .unwrap();

    let decrypted = ctx.app.protocol().decrypt_payload(item.payload());
    assert_eq!(&decrypted, item.payload());
    assert!(!decrypted.error_decrypting());
}

#[tokio::test]
async fn test_000_intent_roundtrip() {
    let server = LocalSyncServer::new();
    let ctx = launch_app(server.clone(), "intent-000").await;
    let item = ctx
        .app
        .items()
        .create_item(ContentType::Note, note_content("visible", "on purpose"))
        .unwrap();

    let encoded = ctx
        .app
        .protocol()
        .encrypt_payload(item.payload(), EncryptionIntent::SyncDecrypted)
        .unwrap();
    match encoded.content() {
        PayloadContent::Encrypted(string) => assert!(string.starts_with("000")),
        other => panic!("expected 000 framing, got {:?}", other),
    }

    let decoded = ctx.app.protocol().decrypt_payload(&encoded);
    assert!(!decoded.error_decrypting());
    let content = decoded.content().decrypted().unwrap();
    assert_eq!(content.string_field("title"), Some("visible"));
    assert_eq!(content.string_field("text"), Some("on purpose"));
}

#[tokio::test]
async fn test_concurrent_edit_produces_conflict_duplicate() {
    let server = LocalSyncServer::new();

    // Client A creates the note.
    let a = launch_app(server.clone(), "client-a").await;
    a.app.register(EMAIL, PASSWORD).await.unwrap();
    let note = a
        .app
        .items()
        .create_item(ContentType::Note, note_content("base", "v0"))
        .unwrap();
    let note_uuid = *note.uuid();
    a.app.sync().await.unwrap();

    // Client B edits it to C2 and uploads.
    let b = launch_app(server.clone(), "client-b").await;
    b.app.sign_in(EMAIL, PASSWORD).await.unwrap();
    b.app
        .items()
        .change_item(&note_uuid, |m| m.set_text("C2"))
        .unwrap();
    b.app.sync().await.unwrap();

    // A edits the same note to C1 without having seen C2, then syncs.
    a.app
        .items()
        .change_item(&note_uuid, |m| m.set_text("C1"))
        .unwrap();
    a.app.sync().await.unwrap();

    // The original uuid holds the server content; a new item carries the
    // local edit with a conflict_of back-reference.
    let original = a.app.items().find_item(&note_uuid).unwrap();
    assert_eq!(original.content().string_field("text"), Some("C2"));

    let duplicates: Vec<_> = a
        .app
        .items()
        .items()
        .into_iter()
        .filter(|item| item.conflict_of() == Some(&note_uuid))
        .collect();
    assert_eq!(duplicates.len(), 1);
    assert_eq!(duplicates[0].content().string_field("text"), Some("C1"));

    // The duplicate reaches the server on the chained round.
    assert!(a.app.payloads().dirty_payloads().is_empty());
    let on_server = server.stored_items(EMAIL);
    assert!(on_server.iter().any(|w| &w.uuid == duplicates[0].uuid()));
}

#[tokio::test]
async fn test_preference_persists_across_sessions() {
    let server = LocalSyncServer::new();
    let ctx = launch_app(server.clone(), "prefs").await;
    ctx.app.register(EMAIL, PASSWORD).await.unwrap();

    ctx.app.set_preference("editorLeft", json!(300)).unwrap();
    ctx.app.sync().await.unwrap();
    ctx.app.sign_out().await.unwrap();
    assert_eq!(ctx.app.get_preference("editorLeft", json!(0)), json!(0));

    ctx.app.sign_in(EMAIL, PASSWORD).await.unwrap();
    assert_eq!(ctx.app.get_preference("editorLeft", json!(0)), json!(300));

    // A fresh install without an account sees the default.
    let fresh = launch_app(LocalSyncServer::new(), "prefs-fresh").await;
    assert_eq!(fresh.app.get_preference("editorLeft", json!(42)), json!(42));
}

#[tokio::test]
async fn test_change_password_with_105_items() {
    let server = LocalSyncServer::new();
    let ctx = launch_app(server.clone(), "change-pw").await;
    ctx.app.register(EMAIL, PASSWORD).await.unwrap();

    for i in 0..105 {
        ctx.app
            .items()
            .create_item(ContentType::Note, note_content(&format!("note-{}", i), "body"))
            .unwrap();
    }
    ctx.app.sync().await.unwrap();
    assert!(ctx.app.payloads().dirty_payloads().is_empty());

    let new_password = "an even longer passphrase";
    ctx.app.change_password(PASSWORD, new_password).await.unwrap();
    assert!(ctx.app.payloads().dirty_payloads().is_empty());

    ctx.app.sign_out().await.unwrap();
    assert_eq!(ctx.app.items().items().len(), 0);

    ctx.app.sign_in(EMAIL, new_password).await.unwrap();
    let notes = ctx.app.items().items_of_type(&ContentType::Note);
    assert_eq!(notes.len(), 105);
    assert_eq!(ctx.app.items().invalid_item_count(), 0);
}

#[tokio::test]
async fn test_integrity_mismatch_enters_and_exits_out_of_sync() {
    let server = LocalSyncServer::new();
    let options = ApplicationOptions::new("integrity").with_max_discordance(1);
    let ctx = launch_app_with_options(server.clone(), options).await;
    ctx.app.register(EMAIL, PASSWORD).await.unwrap();

    let note = ctx
        .app
        .items()
        .create_item(ContentType::Note, note_content("drift", ""))
        .unwrap();
    let note_uuid = *note.uuid();
    ctx.app.sync().await.unwrap();

    let events = Arc::new(Mutex::new(Vec::new()));
    {
        let events = Arc::clone(&events);
        ctx.app
            .add_event_observer(Arc::new(move |e| events.lock().push(e)));
    }

    // Rewind the server's timestamp for the note; the client's copy now
    // disagrees and the integrity hashes diverge.
    server.backdate_item(EMAIL, &note_uuid, 3600);
    ctx.app
        .sync_with_options(SyncOptions {
            mode: SyncMode::Default,
            timing: TimingStrategy::ForceSpawnNew,
            check_integrity: true,
        })
        .await
        .unwrap();
    assert!(ctx.app.sync_service().is_out_of_sync());
    assert!(events.lock().contains(&ApplicationEvent::EnteredOutOfSync));

    // Recovery: full download reconciles the timestamp, then an
    // integrity-checked sync confirms convergence.
    ctx.app.sync_service().resolve_out_of_sync().await.unwrap();
    assert!(!ctx.app.sync_service().is_out_of_sync());
    assert!(events.lock().contains(&ApplicationEvent::ExitedOutOfSync));
}

#[tokio::test]
async fn test_failed_sync_emits_event_and_recovers() {
    let server = LocalSyncServer::new();
    let ctx = launch_app(server.clone(), "fail-sync").await;
    ctx.app.register(EMAIL, PASSWORD).await.unwrap();

    let events = Arc::new(Mutex::new(Vec::new()));
    {
        let events = Arc::clone(&events);
        ctx.app
            .add_event_observer(Arc::new(move |e| events.lock().push(e)));
    }

    ctx.app
        .items()
        .create_item(ContentType::Note, note_content("retry me", ""))
        .unwrap();
    *server.fail_next_sync_with.lock() = Some(500);
    assert!(ctx.app.sync().await.is_err());
    assert!(events.lock().contains(&ApplicationEvent::FailedSync));

    // The item stayed dirty and uploads on the next round.
    assert!(!ctx.app.payloads().dirty_payloads().is_empty());
    ctx.app.sync().await.unwrap();
    assert!(ctx.app.payloads().dirty_payloads().is_empty());
}

#[tokio::test]
async fn test_major_data_change_fires_for_large_rounds() {
    let server = LocalSyncServer::new();

    let a = launch_app(server.clone(), "major-a").await;
    a.app.register(EMAIL, PASSWORD).await.unwrap();
    for i in 0..20 {
        a.app
            .items()
            .create_item(ContentType::Note, note_content(&format!("bulk-{}", i), ""))
            .unwrap();
    }
    a.app.sync().await.unwrap();

    // A second client downloads all twenty in one round.
    let b = launch_app(server.clone(), "major-b").await;
    let events = Arc::new(Mutex::new(Vec::new()));
    {
        let events = Arc::clone(&events);
        b.app
            .add_event_observer(Arc::new(move |e| events.lock().push(e)));
    }
    b.app.sign_in(EMAIL, PASSWORD).await.unwrap();
    assert!(events.lock().contains(&ApplicationEvent::MajorDataChange));
    assert_eq!(b.app.items().items_of_type(&ContentType::Note).len(), 20);
}

#[tokio::test]
async fn test_never_synced_deletion_skips_server() {
    let server = LocalSyncServer::new();
    let ctx = launch_app(server.clone(), "discard").await;
    ctx.app.register(EMAIL, PASSWORD).await.unwrap();

    let item = ctx
        .app
        .items()
        .create_item(ContentType::Note, note_content("ephemeral", ""))
        .unwrap();
    ctx.app.items().set_item_to_be_deleted(item.uuid()).unwrap();
    ctx.app.sync().await.unwrap();

    assert!(ctx.app.payloads().find(item.uuid()).is_none());
    let on_server = server.stored_items(EMAIL);
    assert!(!on_server.iter().any(|w| &w.uuid == item.uuid()));
}
