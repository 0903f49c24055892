// /////////////////////////////////////////////////////////////////////////////
// Notelock Sync Engine
// Copyright (c) 2025 Notelock Project Contributors
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Conflict Deltas
//!
//! A delta is a pure function reducing a base collection (the current
//! master) and an apply collection (incoming payloads of one source) into
//! a result collection, encoding one conflict policy. Resolution is
//! per-uuid and deterministic: the same inputs always produce the same
//! outputs, including duplicate ordering.
//!
//! ## Deltas
//!
//! - `delta_remote_retrieved`: server download colliding with pending
//!   local dirt resolves through the item's conflict strategy.
//! - `delta_remote_saved`: metadata-only server acknowledgements merge
//!   with master content and settle dirty bookkeeping.
//! - `delta_remote_conflicts`: explicit server conflict entries
//!   (`sync_conflict` resolves by strategy, `uuid_conflict` re-identifies
//!   the local copy).
//! - `delta_remote_rejected`: rejected saves re-source from the decrypted
//!   master with dirty cleared.
//! - `delta_out_of_sync`: full-download reconciliation duplicating any
//!   genuinely divergent local content before accepting the server state.
//! - `delta_file_import`: backup imports never overwrite; collisions
//!   always duplicate the imported copy.
//!
//! Duplicates carry a fresh uuid, a `conflict_of` back-reference to the
//! original, `dirty=true`, and never-synced timestamps so they upload on
//! the next round.

use chrono::Utc;

use crate::entities::{
    epoch, ConflictStrategy, ImmutableCollection, Item, Payload, PayloadCollection, PayloadSource,
};
use crate::value_objects::ItemContent;

/// Duplicates `content` into a brand-new conflict item.
fn duplicate_with_content(original: &Payload, content: ItemContent) -> Payload {
    let mut content = content;
    content.conflict_of = Some(*original.uuid());
    Payload::builder(original.content_type().clone())
        .decrypted_content(content)
        .created_at(Utc::now())
        .updated_at(epoch())
        .dirty(true)
        .build()
}

/// Whether the master copy was re-dirtied after its current sync began.
///
/// A payload dirtied again mid-flight must stay dirty when the in-flight
/// save is acknowledged.
fn redirtied_since_sync_began(master: &Payload) -> bool {
    match (master.dirtied_date(), master.last_sync_began()) {
        (Some(dirtied), Some(began)) => dirtied > began,
        (Some(_), None) => true,
        _ => false,
    }
}

/// Applies one conflict strategy to a (local, incoming) pair.
///
/// Pushes the winning payload(s) in deterministic order: surviving master
/// first, duplicates after, incoming last.
fn apply_strategy(
    strategy: ConflictStrategy,
    master: &Payload,
    incoming: Payload,
    results: &mut Vec<Payload>,
) {
    match strategy {
        ConflictStrategy::KeepLeft => {
            // Local copy survives and re-uploads so the server converges.
            results.push(master.copy().dirty(true).build());
        }
        ConflictStrategy::KeepRight => {
            results.push(settle_incoming(incoming));
        }
        ConflictStrategy::KeepLeftDuplicateRight => {
            results.push(master.clone());
            if let Some(content) = incoming.content().decrypted() {
                results.push(duplicate_with_content(&incoming, content.clone()));
            }
        }
        ConflictStrategy::KeepRightDuplicateLeft => {
            if let Some(content) = master.content().decrypted() {
                results.push(duplicate_with_content(master, content.clone()));
            }
            results.push(settle_incoming(incoming));
        }
        ConflictStrategy::KeepLeftMergeRefs => {
            let merged = match (master.content().decrypted(), incoming.content().decrypted()) {
                (Some(local), Some(remote)) => {
                    let mut content = local.clone();
                    content.references = local.merged_references(remote);
                    content
                }
                (Some(local), None) => local.clone(),
                _ => return,
            };
            results.push(
                master
                    .copy()
                    .decrypted_content(merged)
                    .updated_at(*incoming.updated_at())
                    .dirty(true)
                    .build(),
            );
        }
    }
}

/// Clears in-flight bookkeeping on an accepted server copy.
fn settle_incoming(incoming: Payload) -> Payload {
    incoming
        .copy()
        .dirty(false)
        .dirtied_date(None)
        .last_sync_end(Some(Utc::now()))
        .build()
}

/// Resolves one incoming payload against the master collection.
fn resolve_incoming(base: &PayloadCollection, incoming: Payload, results: &mut Vec<Payload>) {
    let master = match base.find(incoming.uuid()) {
        Some(master) => master,
        None => {
            results.push(settle_incoming(incoming));
            return;
        }
    };
    let strategy = match Item::from_payload(master.clone()) {
        Ok(local_item) => local_item.conflict_strategy_with(&incoming),
        // Master is errored or not decrypted: never overwrite it with
        // lower-priority data.
        Err(_) => ConflictStrategy::KeepLeft,
    };
    apply_strategy(strategy, master, incoming, results);
}

/// Reconciles payloads downloaded during a normal sync round.
///
/// Clean master copies accept the server state directly; masters with
/// pending dirt resolve through the item's conflict strategy.
pub fn delta_remote_retrieved(
    base: &PayloadCollection,
    apply: Vec<Payload>,
) -> ImmutableCollection {
    let mut results = Vec::with_capacity(apply.len());
    for incoming in apply {
        match base.find(incoming.uuid()) {
            Some(master) if master.dirty() && !master.discardable() => {
                resolve_incoming(base, incoming, &mut results);
            }
            _ => results.push(settle_incoming(incoming)),
        }
    }
    ImmutableCollection::new(results, PayloadSource::RemoteRetrieved)
}

/// Settles server acknowledgements for uploaded payloads.
///
/// Saved payloads carry metadata only; content merges from the master
/// copy. Dirty clears unless the item was re-dirtied mid-flight.
pub fn delta_remote_saved(base: &PayloadCollection, apply: Vec<Payload>) -> ImmutableCollection {
    let now = Utc::now();
    let mut results = Vec::with_capacity(apply.len());
    for incoming in apply {
        let master = base.find(incoming.uuid());
        match master {
            Some(master) => {
                let keep_dirty = master.dirty() && redirtied_since_sync_began(master);
                results.push(
                    master
                        .copy()
                        .updated_at(*incoming.updated_at())
                        .created_at(*incoming.created_at())
                        .deleted(incoming.deleted())
                        .dirty(keep_dirty)
                        .last_sync_end(Some(now))
                        .build(),
                );
            }
            None => results.push(settle_incoming(incoming)),
        }
    }
    ImmutableCollection::new(results, PayloadSource::RemoteSaved)
}

/// Resolves explicit server conflict entries.
///
/// `sync_conflicts` carry the server's copy of a concurrently-modified
/// item; `uuid_conflicts` carry our unsaved copy whose uuid the server
/// refused (already taken). The latter re-identify locally: the content
/// moves to a fresh uuid and the original is tombstoned for discard.
pub fn delta_remote_conflicts(
    base: &PayloadCollection,
    sync_conflicts: Vec<Payload>,
    uuid_conflicts: Vec<Payload>,
) -> ImmutableCollection {
    let mut results = Vec::new();
    for server_item in sync_conflicts {
        resolve_incoming(base, server_item, &mut results);
    }
    for unsaved in uuid_conflicts {
        let content = base
            .find(unsaved.uuid())
            .and_then(|master| master.content().decrypted().cloned())
            .or_else(|| unsaved.content().decrypted().cloned());
        if let Some(content) = content {
            results.push(duplicate_with_content(&unsaved, content));
        }
        // Tombstone the refused uuid; never synced, so the manager
        // discards it without a server round trip.
        results.push(
            unsaved
                .copy()
                .absent_content()
                .deleted(true)
                .dirty(false)
                .updated_at(epoch())
                .build(),
        );
    }
    ImmutableCollection::new(results, PayloadSource::ConflictData)
}

/// Re-sources payloads whose save the server rejected.
///
/// The rejected ciphertext is replaced by the locally-held decrypted
/// counterpart with dirty cleared, so the rejection does not wedge the
/// sync loop. A rejected payload with no decrypted counterpart is skipped.
pub fn delta_remote_rejected(base: &PayloadCollection, apply: Vec<Payload>) -> ImmutableCollection {
    let now = Utc::now();
    let mut results = Vec::new();
    for incoming in apply {
        match base.find(incoming.uuid()) {
            Some(master) if master.content().is_decrypted() => {
                results.push(
                    master
                        .copy()
                        .dirty(false)
                        .dirtied_date(None)
                        .last_sync_end(Some(now))
                        .build(),
                );
            }
            _ => {
                // No decrypted counterpart to fall back on; drop the
                // rejection rather than fail the round.
            }
        }
    }
    ImmutableCollection::new(results, PayloadSource::RemoteRejected)
}

/// Reconciles a full server download after an integrity divergence.
///
/// The server state is authoritative; local content that genuinely
/// differs is preserved as a conflict duplicate before being overwritten.
pub fn delta_out_of_sync(base: &PayloadCollection, apply: Vec<Payload>) -> ImmutableCollection {
    let mut results = Vec::with_capacity(apply.len());
    for incoming in apply {
        let master = base.find(incoming.uuid());
        let local_content = master.and_then(|m| m.content().decrypted());
        let incoming_content = incoming.content().decrypted();
        if let (Some(master), Some(local), Some(remote)) = (master, local_content, incoming_content)
        {
            if !local.equals_ignoring_bookkeeping(remote) {
                results.push(duplicate_with_content(master, local.clone()));
            }
        }
        results.push(settle_incoming(incoming));
    }
    ImmutableCollection::new(results, PayloadSource::RemoteRetrieved)
}

/// Merges payloads imported from a backup file.
///
/// Imports never overwrite local data: any uuid collision duplicates the
/// imported copy under a fresh uuid. Non-colliding imports arrive dirty
/// so they upload.
pub fn delta_file_import(base: &PayloadCollection, apply: Vec<Payload>) -> ImmutableCollection {
    let mut results = Vec::with_capacity(apply.len());
    for incoming in apply {
        if base.contains(incoming.uuid()) {
            if let Some(content) = incoming.content().decrypted() {
                results.push(duplicate_with_content(&incoming, content.clone()));
            }
        } else {
            results.push(incoming.copy().dirty(true).build());
        }
    }
    ImmutableCollection::new(results, PayloadSource::FileImport)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value_objects::ContentType;
    use serde_json::json;

    fn note_payload(title: &str) -> Payload {
        let mut content = ItemContent::new();
        content.set_field("title", json!(title));
        Payload::builder(ContentType::Note)
            .decrypted_content(content)
            .build()
    }

    fn base_with(payloads: Vec<Payload>) -> PayloadCollection {
        PayloadCollection::with_payloads(payloads)
    }

    #[test]
    fn test_retrieved_without_collision_is_accepted() {
        let base = PayloadCollection::new();
        let incoming = note_payload("fresh").copy().updated_at(Utc::now()).build();
        let uuid = *incoming.uuid();
        let result = delta_remote_retrieved(&base, vec![incoming]);
        assert_eq!(result.len(), 1);
        assert_eq!(result.payloads()[0].uuid(), &uuid);
        assert!(!result.payloads()[0].dirty());
    }

    #[test]
    fn test_retrieved_over_clean_master_takes_server_copy() {
        let master = note_payload("old");
        let incoming = master
            .copy()
            .decrypted_content({
                let mut c = ItemContent::new();
                c.set_field("title", json!("new"));
                c
            })
            .updated_at(Utc::now())
            .build();
        let base = base_with(vec![master]);
        let result = delta_remote_retrieved(&base, vec![incoming]);
        assert_eq!(result.len(), 1);
        assert_eq!(
            result.payloads()[0]
                .content()
                .decrypted()
                .unwrap()
                .string_field("title"),
            Some("new")
        );
    }

    #[test]
    fn test_retrieved_over_dirty_master_duplicates_local_edit() {
        // Local edit C1 pending; server arrives with C2. The original
        // uuid ends up holding C2 and a conflict duplicate holds C1.
        let master = note_payload("C1").copy().dirty(true).build();
        let uuid = *master.uuid();
        let incoming = master
            .copy()
            .decrypted_content({
                let mut c = ItemContent::new();
                c.set_field("title", json!("C2"));
                c
            })
            .dirty(false)
            .updated_at(Utc::now())
            .build();
        let base = base_with(vec![master]);
        let result = delta_remote_retrieved(&base, vec![incoming]);
        assert_eq!(result.len(), 2);

        let duplicate = &result.payloads()[0];
        let settled = &result.payloads()[1];
        assert_ne!(duplicate.uuid(), &uuid);
        assert_eq!(duplicate.content().decrypted().unwrap().conflict_of, Some(uuid));
        assert_eq!(
            duplicate.content().decrypted().unwrap().string_field("title"),
            Some("C1")
        );
        assert!(duplicate.dirty());
        assert_eq!(settled.uuid(), &uuid);
        assert_eq!(
            settled.content().decrypted().unwrap().string_field("title"),
            Some("C2")
        );
    }

    #[test]
    fn test_retrieved_equal_content_over_dirty_master_keeps_right() {
        let master = note_payload("same").copy().dirty(true).build();
        let incoming = master.copy().dirty(false).updated_at(Utc::now()).build();
        let base = base_with(vec![master]);
        let result = delta_remote_retrieved(&base, vec![incoming]);
        assert_eq!(result.len(), 1);
        assert!(!result.payloads()[0].dirty());
    }

    #[test]
    fn test_saved_merges_metadata_with_master_content() {
        let began = Utc::now();
        let master = note_payload("kept")
            .copy()
            .dirty(true)
            .last_sync_began(Some(began))
            .dirtied_date(Some(began - chrono::Duration::seconds(10)))
            .build();
        let server_time = Utc::now();
        let ack = master
            .copy()
            .absent_content()
            .updated_at(server_time)
            .dirty(false)
            .build();
        let base = base_with(vec![master.clone()]);
        let result = delta_remote_saved(&base, vec![ack]);
        assert_eq!(result.len(), 1);
        let settled = &result.payloads()[0];
        // Content merged back from master, timestamps from server.
        assert_eq!(
            settled.content().decrypted().unwrap().string_field("title"),
            Some("kept")
        );
        assert_eq!(settled.updated_at(), &server_time);
        assert!(!settled.dirty());
        assert!(settled.last_sync_end().is_some());
    }

    #[test]
    fn test_saved_keeps_dirty_when_redirtied_mid_flight() {
        let began = Utc::now() - chrono::Duration::seconds(5);
        let master = note_payload("x")
            .copy()
            .dirty(true)
            .last_sync_began(Some(began))
            .dirtied_date(Some(Utc::now()))
            .build();
        let ack = master.copy().absent_content().updated_at(Utc::now()).build();
        let base = base_with(vec![master]);
        let result = delta_remote_saved(&base, vec![ack]);
        assert!(result.payloads()[0].dirty());
    }

    #[test]
    fn test_uuid_conflict_moves_content_to_fresh_uuid() {
        let local = note_payload("mine").copy().dirty(true).build();
        let uuid = *local.uuid();
        let base = base_with(vec![local.clone()]);
        let result = delta_remote_conflicts(&base, vec![], vec![local]);
        assert_eq!(result.len(), 2);
        let duplicate = &result.payloads()[0];
        let tombstone = &result.payloads()[1];
        assert_ne!(duplicate.uuid(), &uuid);
        assert!(duplicate.dirty());
        assert_eq!(
            duplicate.content().decrypted().unwrap().string_field("title"),
            Some("mine")
        );
        assert_eq!(tombstone.uuid(), &uuid);
        assert!(tombstone.deleted());
        assert!(tombstone.discardable());
    }

    #[test]
    fn test_rejected_resources_from_decrypted_master() {
        let master = note_payload("local-truth").copy().dirty(true).build();
        let rejected = master.copy().encrypted_content("004:a:b:c").build();
        let base = base_with(vec![master.clone()]);
        let result = delta_remote_rejected(&base, vec![rejected]);
        assert_eq!(result.len(), 1);
        let settled = &result.payloads()[0];
        assert!(!settled.dirty());
        assert!(settled.last_sync_end().is_some());
        assert_eq!(
            settled.content().decrypted().unwrap().string_field("title"),
            Some("local-truth")
        );
    }

    #[test]
    fn test_rejected_without_counterpart_is_skipped() {
        let base = PayloadCollection::new();
        let rejected = note_payload("ghost").copy().encrypted_content("004:a:b:c").build();
        let result = delta_remote_rejected(&base, vec![rejected]);
        assert!(result.is_empty());
    }

    #[test]
    fn test_out_of_sync_duplicates_divergent_local_content() {
        let master = note_payload("local");
        let uuid = *master.uuid();
        let incoming = master
            .copy()
            .decrypted_content({
                let mut c = ItemContent::new();
                c.set_field("title", json!("server"));
                c
            })
            .updated_at(Utc::now())
            .build();
        let base = base_with(vec![master]);
        let result = delta_out_of_sync(&base, vec![incoming]);
        assert_eq!(result.len(), 2);
        assert_eq!(
            result.payloads()[0].content().decrypted().unwrap().conflict_of,
            Some(uuid)
        );
    }

    #[test]
    fn test_out_of_sync_equal_content_passes_through() {
        let master = note_payload("same");
        let incoming = master.copy().updated_at(Utc::now()).build();
        let base = base_with(vec![master]);
        let result = delta_out_of_sync(&base, vec![incoming]);
        assert_eq!(result.len(), 1);
    }

    #[test]
    fn test_file_import_always_duplicates_collisions() {
        let existing = note_payload("existing");
        let uuid = *existing.uuid();
        let imported = existing
            .copy()
            .decrypted_content({
                let mut c = ItemContent::new();
                c.set_field("title", json!("imported"));
                c
            })
            .build();
        let base = base_with(vec![existing]);
        let result = delta_file_import(&base, vec![imported]);
        assert_eq!(result.len(), 1);
        let duplicate = &result.payloads()[0];
        assert_ne!(duplicate.uuid(), &uuid);
        assert_eq!(duplicate.content().decrypted().unwrap().conflict_of, Some(uuid));
        assert!(duplicate.dirty());
    }

    #[test]
    fn test_file_import_fresh_payloads_arrive_dirty() {
        let base = PayloadCollection::new();
        let imported = note_payload("new");
        let result = delta_file_import(&base, vec![imported]);
        assert!(result.payloads()[0].dirty());
    }
}
