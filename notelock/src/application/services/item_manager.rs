// /////////////////////////////////////////////////////////////////////////////
// Notelock Sync Engine
// Copyright (c) 2025 Notelock Project Contributors
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Item Manager
//!
//! The typed item collection layered over the payload manager. It
//! constructs `Item` views on demand, maintains a reverse-reference index
//! so `items_referencing_item` is proportional to the reference count,
//! and owns the mutation API: `change_item` builds a mutator, applies the
//! caller's edits, emits the resulting payload, and returns the new item.
//!
//! ## Visibility
//!
//! User-visible item streams exclude deleted payloads and payloads that
//! failed decryption or are waiting for a key; those surface again once
//! repaired.
//!
//! ## Singleton Enforcement
//!
//! After every emission touching a singleton content type, all live
//! matches are scanned; the earliest-created instance (uuid as the
//! deterministic tiebreaker) survives and the rest are marked
//! deleted-and-dirty so the deletion propagates on the next sync round.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;
use uuid::Uuid;

use notelock_domain::entities::{
    Item, ItemMutator, MutationType, Payload, PayloadSource,
};
use notelock_domain::error::NotelockError;
use notelock_domain::value_objects::{ContentType, ItemContent};

use super::payload_manager::{EmissionSet, PayloadManager, PayloadSubscription};

/// Typed item collection and mutation API.
pub struct ItemManager {
    payloads: Arc<PayloadManager>,
    /// target uuid -> uuids of items referencing it
    reference_index: RwLock<HashMap<Uuid, HashSet<Uuid>>>,
    subscription: RwLock<Option<PayloadSubscription>>,
}

impl ItemManager {
    /// Creates the manager and registers it on the payload manager
    pub fn new(payloads: Arc<PayloadManager>) -> Arc<Self> {
        let manager = Arc::new(Self {
            payloads,
            reference_index: RwLock::new(HashMap::new()),
            subscription: RwLock::new(None),
        });
        let weak = Arc::downgrade(&manager);
        let subscription = manager.payloads.add_observer(Arc::new(move |set| {
            if let Some(manager) = weak.upgrade() {
                manager.handle_emission(set);
            }
        }));
        *manager.subscription.write() = Some(subscription);
        manager
    }

    fn handle_emission(&self, set: &EmissionSet) {
        self.update_reference_index(set);
        self.enforce_singletons(set);
    }

    fn update_reference_index(&self, set: &EmissionSet) {
        let mut index = self.reference_index.write();
        for payload in set.changed.iter().chain(&set.inserted).chain(&set.discarded) {
            // Remove stale edges from this item, then re-add current ones.
            for referencers in index.values_mut() {
                referencers.remove(payload.uuid());
            }
            if payload.deleted() {
                continue;
            }
            if let Some(content) = payload.content().decrypted() {
                for reference in &content.references {
                    index.entry(reference.uuid).or_default().insert(*payload.uuid());
                }
            }
        }
    }

    fn enforce_singletons(&self, set: &EmissionSet) {
        let mut singleton_types: Vec<ContentType> = Vec::new();
        for payload in set.changed.iter().chain(&set.inserted) {
            if payload.content_type().is_singleton()
                && !payload.deleted()
                && !singleton_types.contains(payload.content_type())
            {
                singleton_types.push(payload.content_type().clone());
            }
        }
        for content_type in singleton_types {
            let mut live: Vec<Payload> = self
                .payloads
                .all_of_type(&content_type)
                .into_iter()
                .filter(|p| !p.deleted())
                .collect();
            if live.len() <= 1 {
                continue;
            }
            live.sort_by(|a, b| (a.created_at(), a.uuid()).cmp(&(b.created_at(), b.uuid())));
            let losers = live.split_off(1);
            debug!(
                content_type = %content_type,
                removed = losers.len(),
                "enforcing singleton"
            );
            let tombstones: Vec<Payload> = losers
                .into_iter()
                .map(|p| p.copy().deleted(true).dirty(true).build())
                .collect();
            self.payloads.emit_payloads(tombstones, PayloadSource::LocalChanged);
        }
    }

    /// Whether a payload belongs in user-visible item streams
    fn is_visible(payload: &Payload) -> bool {
        !payload.deleted()
            && !payload.error_decrypting()
            && !payload.waiting_for_key()
            && payload.content().is_decrypted()
    }

    /// All user-visible items
    pub fn items(&self) -> Vec<Item> {
        self.payloads
            .all()
            .into_iter()
            .filter(Self::is_visible)
            .filter_map(|p| Item::from_payload(p).ok())
            .collect()
    }

    /// All user-visible items of a content type
    pub fn items_of_type(&self, content_type: &ContentType) -> Vec<Item> {
        self.payloads
            .all_of_type(content_type)
            .into_iter()
            .filter(Self::is_visible)
            .filter_map(|p| Item::from_payload(p).ok())
            .collect()
    }

    /// Finds a user-visible item by uuid
    pub fn find_item(&self, uuid: &Uuid) -> Option<Item> {
        self.payloads
            .find(uuid)
            .filter(Self::is_visible)
            .and_then(|p| Item::from_payload(p).ok())
    }

    /// Number of payloads currently undecryptable
    pub fn invalid_item_count(&self) -> usize {
        self.payloads
            .all()
            .into_iter()
            .filter(|p| p.error_decrypting())
            .count()
    }

    /// Items whose content references the given uuid
    pub fn items_referencing_item(&self, uuid: &Uuid) -> Vec<Item> {
        let referencers: Vec<Uuid> = self
            .reference_index
            .read()
            .get(uuid)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default();
        referencers
            .iter()
            .filter_map(|uuid| self.find_item(uuid))
            .collect()
    }

    /// Creates a new item from decrypted content
    ///
    /// The payload is emitted dirty so it uploads on the next round.
    pub fn create_item(
        &self,
        content_type: ContentType,
        content: ItemContent,
    ) -> Result<Item, NotelockError> {
        let payload = Payload::builder(content_type)
            .decrypted_content(content)
            .dirty(true)
            .build();
        let set = self
            .payloads
            .emit_payloads(vec![payload.clone()], PayloadSource::Constructor);
        // Singleton enforcement may have superseded the fresh payload.
        let current = set
            .inserted
            .first()
            .map(|p| *p.uuid())
            .unwrap_or_else(|| *payload.uuid());
        self.find_item(&current)
            .or_else(|| Item::from_payload(payload).ok())
            .ok_or_else(|| NotelockError::internal("created item is not retrievable"))
    }

    /// Applies a mutation to an existing item and emits the result
    pub fn change_item<F>(&self, uuid: &Uuid, mutate: F) -> Result<Item, NotelockError>
    where
        F: FnOnce(&mut ItemMutator),
    {
        self.change_item_with_type(uuid, MutationType::UserInteraction, mutate)
    }

    /// Applies a mutation with an explicit mutation type
    pub fn change_item_with_type<F>(
        &self,
        uuid: &Uuid,
        mutation_type: MutationType,
        mutate: F,
    ) -> Result<Item, NotelockError>
    where
        F: FnOnce(&mut ItemMutator),
    {
        let payload = self
            .payloads
            .find(uuid)
            .ok_or_else(|| NotelockError::ItemNotFound(uuid.to_string()))?;
        let item = Item::from_payload(payload)?;
        let mut mutator = ItemMutator::new(&item, mutation_type);
        mutate(&mut mutator);
        let mutated = mutator.finish();
        self.payloads
            .emit_payloads(vec![mutated.clone()], PayloadSource::LocalChanged);
        Item::from_payload(mutated)
    }

    /// Marks an item deleted; the tombstone uploads on the next round
    pub fn set_item_to_be_deleted(&self, uuid: &Uuid) -> Result<(), NotelockError> {
        self.change_item_with_type(uuid, MutationType::Internal, |mutator| {
            mutator.set_deleted();
        })?;
        Ok(())
    }

    /// Drops the reference index (sign-out; the payload manager resets
    /// separately)
    pub fn reset(&self) {
        self.reference_index.write().clear();
    }
}

impl Drop for ItemManager {
    fn drop(&mut self) {
        if let Some(subscription) = self.subscription.write().take() {
            self.payloads.remove_observer(subscription);
        }
    }
}
