// /////////////////////////////////////////////////////////////////////////////
// Notelock Sync Engine
// Copyright (c) 2025 Notelock Project Contributors
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Payload Collections
//!
//! `PayloadCollection` is the mutable set the payload manager owns as its
//! master state: payloads indexed by uuid with a secondary content-type
//! index. `ImmutableCollection` is the frozen result a conflict delta
//! returns; it is applied to the master as one atomic overlay.

use std::collections::{HashMap, HashSet};

use uuid::Uuid;

use crate::entities::payload::{Payload, PayloadSource};
use crate::value_objects::ContentType;

/// Mutable payload set indexed by uuid and by content type.
#[derive(Debug, Clone, Default)]
pub struct PayloadCollection {
    map: HashMap<Uuid, Payload>,
    type_index: HashMap<ContentType, HashSet<Uuid>>,
}

impl PayloadCollection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_payloads(payloads: Vec<Payload>) -> Self {
        let mut collection = Self::new();
        for payload in payloads {
            collection.set(payload);
        }
        collection
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn find(&self, uuid: &Uuid) -> Option<&Payload> {
        self.map.get(uuid)
    }

    pub fn contains(&self, uuid: &Uuid) -> bool {
        self.map.contains_key(uuid)
    }

    /// Inserts or replaces the payload for its uuid
    pub fn set(&mut self, payload: Payload) {
        if let Some(previous) = self.map.get(payload.uuid()) {
            if previous.content_type() != payload.content_type() {
                if let Some(bucket) = self.type_index.get_mut(previous.content_type()) {
                    bucket.remove(previous.uuid());
                }
            }
        }
        self.type_index
            .entry(payload.content_type().clone())
            .or_default()
            .insert(*payload.uuid());
        self.map.insert(*payload.uuid(), payload);
    }

    /// Removes the payload for the uuid, if present
    pub fn discard(&mut self, uuid: &Uuid) -> Option<Payload> {
        let payload = self.map.remove(uuid)?;
        if let Some(bucket) = self.type_index.get_mut(payload.content_type()) {
            bucket.remove(uuid);
        }
        Some(payload)
    }

    pub fn all(&self) -> Vec<&Payload> {
        self.map.values().collect()
    }

    pub fn all_owned(&self) -> Vec<Payload> {
        self.map.values().cloned().collect()
    }

    /// Gets all payloads of one content type
    pub fn all_of_type(&self, content_type: &ContentType) -> Vec<&Payload> {
        match self.type_index.get(content_type) {
            Some(bucket) => bucket.iter().filter_map(|uuid| self.map.get(uuid)).collect(),
            None => Vec::new(),
        }
    }

    /// Gets all payloads currently marked dirty
    pub fn dirty(&self) -> Vec<&Payload> {
        self.map.values().filter(|p| p.dirty()).collect()
    }

    /// Gets all non-deleted payloads
    pub fn not_deleted(&self) -> Vec<&Payload> {
        self.map.values().filter(|p| !p.deleted()).collect()
    }
}

/// Frozen payload set produced by a conflict delta.
///
/// Carries the source under which its payloads should be emitted.
#[derive(Debug, Clone)]
pub struct ImmutableCollection {
    payloads: Vec<Payload>,
    source: PayloadSource,
}

impl ImmutableCollection {
    pub fn new(payloads: Vec<Payload>, source: PayloadSource) -> Self {
        Self { payloads, source }
    }

    pub fn payloads(&self) -> &[Payload] {
        &self.payloads
    }

    pub fn into_payloads(self) -> Vec<Payload> {
        self.payloads
    }

    pub fn source(&self) -> PayloadSource {
        self.source
    }

    pub fn len(&self) -> usize {
        self.payloads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payloads.is_empty()
    }
}
