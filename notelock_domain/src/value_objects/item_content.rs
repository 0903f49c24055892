// /////////////////////////////////////////////////////////////////////////////
// Notelock Sync Engine
// Copyright (c) 2025 Notelock Project Contributors
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Item Content
//!
//! The decrypted content object of an item. The engine does not validate
//! user content fields; it treats content as a JSON tree with three parts
//! it understands:
//!
//! - `references`: the outgoing edges of the item graph
//! - `appData`: per-application-domain metadata buckets
//! - `conflict_of`: back-reference set on conflict duplicates
//!
//! Everything else passes through untouched.
//!
//! ## Equality
//!
//! Conflict resolution compares contents while ignoring bookkeeping keys:
//! `conflict_of` at the content level, and `client_updated_at` inside the
//! default appData domain. Two contents that differ only in those keys are
//! treated as equal and resolve without duplication.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::value_objects::ContentType;

/// The appData domain bucket owned by this engine.
pub const DEFAULT_APP_DOMAIN: &str = "org.notelock.app";

/// Content key ignored when checking content equality.
pub const CONTENT_KEYS_TO_IGNORE_WHEN_CHECKING_EQUALITY: &[&str] = &["conflict_of"];

/// AppData keys (within the default domain) ignored when checking equality.
pub const APP_DATA_CONTENT_KEYS_TO_IGNORE_WHEN_CHECKING_EQUALITY: &[&str] = &["client_updated_at"];

/// An outgoing reference from one item to another.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentReference {
    pub uuid: Uuid,
    pub content_type: ContentType,
}

/// Decrypted content of an item.
///
/// Immutable by convention: mutation flows through `ItemMutator`, which
/// works on an owned copy and produces a new payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ItemContent {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub references: Vec<ContentReference>,

    #[serde(rename = "appData", default, skip_serializing_if = "Map::is_empty")]
    pub app_data: Map<String, Value>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub conflict_of: Option<Uuid>,

    /// All remaining content fields (title, text, preferences, key
    /// material for items keys, ...), passed through without validation.
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl ItemContent {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds content from a plain JSON object
    pub fn from_value(value: Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(value)
    }

    /// Serializes content back into a plain JSON object
    pub fn to_value(&self) -> Value {
        // Serialization of this struct cannot fail; all parts are JSON trees.
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    /// Gets a top-level content field
    pub fn field(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// Gets a string-valued top-level content field
    pub fn string_field(&self, key: &str) -> Option<&str> {
        self.fields.get(key).and_then(Value::as_str)
    }

    /// Sets a top-level content field
    pub fn set_field(&mut self, key: impl Into<String>, value: Value) {
        self.fields.insert(key.into(), value);
    }

    /// Checks whether this content references the given uuid
    pub fn references_uuid(&self, uuid: &Uuid) -> bool {
        self.references.iter().any(|r| &r.uuid == uuid)
    }

    /// Adds a reference if not already present
    pub fn add_reference(&mut self, reference: ContentReference) {
        if !self.references_uuid(&reference.uuid) {
            self.references.push(reference);
        }
    }

    /// Removes any reference to the given uuid
    pub fn remove_reference(&mut self, uuid: &Uuid) {
        self.references.retain(|r| &r.uuid != uuid);
    }

    /// Gets a value from an appData domain bucket
    pub fn domain_data(&self, domain: &str, key: &str) -> Option<&Value> {
        self.app_data.get(domain)?.as_object()?.get(key)
    }

    /// Sets a value in an appData domain bucket, creating the bucket if
    /// needed
    pub fn set_domain_data(&mut self, domain: &str, key: impl Into<String>, value: Value) {
        let bucket = self
            .app_data
            .entry(domain.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if let Value::Object(map) = bucket {
            map.insert(key.into(), value);
        } else {
            let mut map = Map::new();
            map.insert(key.into(), value);
            *bucket = Value::Object(map);
        }
    }

    /// Compares contents, ignoring conflict bookkeeping keys
    ///
    /// `conflict_of` and the default domain's `client_updated_at` do not
    /// participate; reference order does not participate either (the
    /// reference set does).
    pub fn equals_ignoring_bookkeeping(&self, other: &ItemContent) -> bool {
        if self.fields != other.fields {
            return false;
        }
        if !reference_sets_equal(&self.references, &other.references) {
            return false;
        }
        stripped_app_data(self) == stripped_app_data(other)
    }

    /// Checks whether two contents differ only in their reference arrays
    pub fn differs_only_in_references(&self, other: &ItemContent) -> bool {
        !self.equals_ignoring_bookkeeping(other)
            && self.fields == other.fields
            && stripped_app_data(self) == stripped_app_data(other)
    }

    /// Unions this content's references with another's
    pub fn merged_references(&self, other: &ItemContent) -> Vec<ContentReference> {
        let mut merged = self.references.clone();
        for reference in &other.references {
            if !merged.iter().any(|r| r.uuid == reference.uuid) {
                merged.push(reference.clone());
            }
        }
        merged
    }
}

fn reference_sets_equal(a: &[ContentReference], b: &[ContentReference]) -> bool {
    a.len() == b.len() && a.iter().all(|r| b.contains(r))
}

fn stripped_app_data(content: &ItemContent) -> Map<String, Value> {
    let mut app_data = content.app_data.clone();
    if let Some(Value::Object(bucket)) = app_data.get_mut(DEFAULT_APP_DOMAIN) {
        for key in APP_DATA_CONTENT_KEYS_TO_IGNORE_WHEN_CHECKING_EQUALITY {
            bucket.remove(*key);
        }
    }
    app_data
}
