// /////////////////////////////////////////////////////////////////////////////
// Notelock Sync Engine
// Copyright (c) 2025 Notelock Project Contributors
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Payload Manager
//!
//! Owner of the authoritative in-memory master collection. Every payload
//! that enters the engine flows through `emit_payloads`, which applies
//! the batch to the master atomically and then notifies observers with
//! the partitioned emission set `(changed, inserted, discarded, ignored,
//! source)`.
//!
//! ## Emission Rules
//!
//! - **Ignored-key rule**: an `SN|ItemsKey` arrival with
//!   `error_decrypting=true` over a master copy that decrypts cleanly is
//!   routed into `ignored` and the master copy is preserved. Items-key
//!   material is immutable, so an undecryptable arrival is always a key
//!   mismatch, never an update.
//! - **Discard rule**: a deleted payload that is no longer dirty has
//!   completed (or never needed) its server round trip; it leaves the
//!   master and lands in `discarded`.
//! - Everything else overlays the master: present uuid goes to `changed`,
//!   new uuid to `inserted`.
//!
//! Observers fire after the master is fully updated, in registration
//! order, and may emit re-entrantly (the collection lock is not held
//! during notification).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;
use uuid::Uuid;

use notelock_domain::entities::{
    should_ignore_items_key_arrival, Payload, PayloadCollection, PayloadSource,
};
use notelock_domain::value_objects::ContentType;

/// The partitioned result of one emission.
#[derive(Debug, Clone)]
pub struct EmissionSet {
    pub changed: Vec<Payload>,
    pub inserted: Vec<Payload>,
    pub discarded: Vec<Payload>,
    pub ignored: Vec<Payload>,
    pub source: PayloadSource,
}

impl EmissionSet {
    /// Total number of payloads the emission touched
    pub fn touched(&self) -> usize {
        self.changed.len() + self.inserted.len() + self.discarded.len()
    }
}

/// Observer callback over emission sets.
pub type PayloadObserver = Arc<dyn Fn(&EmissionSet) + Send + Sync>;

/// Handle for removing a payload observer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PayloadSubscription(u64);

/// Authoritative in-memory payload store.
#[derive(Default)]
pub struct PayloadManager {
    collection: RwLock<PayloadCollection>,
    observers: RwLock<Vec<(u64, PayloadObserver)>>,
    next_observer_id: AtomicU64,
}

impl PayloadManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an emission observer
    pub fn add_observer(&self, observer: PayloadObserver) -> PayloadSubscription {
        let id = self.next_observer_id.fetch_add(1, Ordering::Relaxed);
        self.observers.write().push((id, observer));
        PayloadSubscription(id)
    }

    pub fn remove_observer(&self, subscription: PayloadSubscription) {
        self.observers.write().retain(|(id, _)| *id != subscription.0);
    }

    /// Applies a batch of payloads to the master collection and notifies
    /// observers
    pub fn emit_payloads(&self, payloads: Vec<Payload>, source: PayloadSource) -> EmissionSet {
        let mut changed = Vec::new();
        let mut inserted = Vec::new();
        let mut discarded = Vec::new();
        let mut ignored = Vec::new();

        {
            let mut collection = self.collection.write();
            for payload in payloads {
                let master = collection.find(payload.uuid());

                if should_ignore_items_key_arrival(&payload, master) {
                    ignored.push(payload);
                    continue;
                }

                if payload.deleted() && !payload.dirty() {
                    collection.discard(payload.uuid());
                    discarded.push(payload);
                    continue;
                }

                if master.is_some() {
                    changed.push(payload.clone());
                } else {
                    inserted.push(payload.clone());
                }
                collection.set(payload);
            }
        }

        let set = EmissionSet {
            changed,
            inserted,
            discarded,
            ignored,
            source,
        };
        debug!(
            source = ?set.source,
            changed = set.changed.len(),
            inserted = set.inserted.len(),
            discarded = set.discarded.len(),
            ignored = set.ignored.len(),
            "payload emission"
        );
        self.notify(&set);
        set
    }

    fn notify(&self, set: &EmissionSet) {
        let observers: Vec<PayloadObserver> = self
            .observers
            .read()
            .iter()
            .map(|(_, observer)| Arc::clone(observer))
            .collect();
        for observer in observers {
            observer(set);
        }
    }

    /// Finds the master copy for a uuid
    pub fn find(&self, uuid: &Uuid) -> Option<Payload> {
        self.collection.read().find(uuid).cloned()
    }

    /// All master payloads of a content type
    pub fn all_of_type(&self, content_type: &ContentType) -> Vec<Payload> {
        self.collection
            .read()
            .all_of_type(content_type)
            .into_iter()
            .cloned()
            .collect()
    }

    /// All payloads currently marked dirty
    pub fn dirty_payloads(&self) -> Vec<Payload> {
        self.collection.read().dirty().into_iter().cloned().collect()
    }

    /// All non-deleted payloads
    pub fn not_deleted(&self) -> Vec<Payload> {
        self.collection.read().not_deleted().into_iter().cloned().collect()
    }

    /// All master payloads
    pub fn all(&self) -> Vec<Payload> {
        self.collection.read().all_owned()
    }

    /// A point-in-time copy of the master collection (delta base)
    pub fn snapshot(&self) -> PayloadCollection {
        self.collection.read().clone()
    }

    pub fn len(&self) -> usize {
        self.collection.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.collection.read().is_empty()
    }

    /// Drops every payload (sign-out)
    pub fn reset(&self) {
        *self.collection.write() = PayloadCollection::new();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use notelock_domain::entities::ItemsKey;
    use notelock_domain::value_objects::{ItemContent, ProtocolVersion};
    use parking_lot::Mutex;

    fn note() -> Payload {
        Payload::builder(ContentType::Note)
            .decrypted_content(ItemContent::new())
            .build()
    }

    #[test]
    fn test_insert_then_change_partition() {
        let manager = PayloadManager::new();
        let payload = note();
        let set = manager.emit_payloads(vec![payload.clone()], PayloadSource::Constructor);
        assert_eq!(set.inserted.len(), 1);
        assert!(set.changed.is_empty());

        let set = manager.emit_payloads(
            vec![payload.copy().dirty(true).build()],
            PayloadSource::LocalChanged,
        );
        assert_eq!(set.changed.len(), 1);
        assert!(set.inserted.is_empty());
    }

    #[test]
    fn test_clean_deleted_payload_is_discarded() {
        let manager = PayloadManager::new();
        let payload = note();
        manager.emit_payloads(vec![payload.clone()], PayloadSource::Constructor);

        let tombstone = payload
            .copy()
            .deleted(true)
            .dirty(false)
            .updated_at(Utc::now())
            .build();
        let set = manager.emit_payloads(vec![tombstone], PayloadSource::RemoteSaved);
        assert_eq!(set.discarded.len(), 1);
        assert!(manager.find(payload.uuid()).is_none());
    }

    #[test]
    fn test_dirty_deleted_payload_stays_until_synced() {
        let manager = PayloadManager::new();
        let payload = note();
        manager.emit_payloads(vec![payload.clone()], PayloadSource::Constructor);

        let pending_deletion = payload.copy().deleted(true).dirty(true).build();
        manager.emit_payloads(vec![pending_deletion], PayloadSource::LocalChanged);
        assert!(manager.find(payload.uuid()).is_some());
        assert_eq!(manager.dirty_payloads().len(), 1);
    }

    #[test]
    fn test_ignored_key_rule_preserves_master() {
        let manager = PayloadManager::new();
        let healthy = ItemsKey::new_payload("ab".repeat(32), ProtocolVersion::V004, true);
        manager.emit_payloads(vec![healthy.clone()], PayloadSource::Constructor);

        let errored_arrival = healthy
            .copy()
            .encrypted_content("004:a:b:c")
            .error_decrypting(true)
            .dirty(false)
            .build();
        let set = manager.emit_payloads(vec![errored_arrival], PayloadSource::RemoteRetrieved);
        assert_eq!(set.ignored.len(), 1);
        assert!(set.changed.is_empty());

        let master = manager.find(healthy.uuid()).unwrap();
        assert!(!master.error_decrypting());
        assert!(master.content().is_decrypted());
    }

    #[test]
    fn test_observers_see_fully_applied_master() {
        let manager = Arc::new(PayloadManager::new());
        let observed_len = Arc::new(Mutex::new(0usize));
        {
            let inner = Arc::clone(&manager);
            let observed_len = Arc::clone(&observed_len);
            manager.add_observer(Arc::new(move |set| {
                // Master already contains the whole batch when observers run.
                if set.source == PayloadSource::Constructor {
                    *observed_len.lock() = inner.len();
                }
            }));
        }
        manager.emit_payloads(vec![note(), note(), note()], PayloadSource::Constructor);
        assert_eq!(*observed_len.lock(), 3);
    }
}
