// /////////////////////////////////////////////////////////////////////////////
// Notelock Sync Engine
// Copyright (c) 2025 Notelock Project Contributors
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Item Layer
//!
//! Typed read-only views over decrypted payloads, plus the mutator that is
//! the only sanctioned path for changing an item. A mutator works on an
//! owned copy of the content and produces a new payload with `dirty=true`
//! and a fresh `dirtied_date`; the backing payload is never touched.
//!
//! ## Conflict Strategy
//!
//! Each item decides how it resolves against a conflicting copy of itself
//! (`conflict_strategy_with`). The rules, in priority order:
//!
//! 1. Singletons keep the local copy.
//! 2. A locally-errored item keeps the local copy (never overwrite an
//!    unreadable item with lower-priority data).
//! 3. A remotely-errored arrival over a healthy local copy keeps the
//!    arrival as master and duplicates the healthy local data.
//! 4. Either side deleted, or contents equal ignoring bookkeeping keys:
//!    accept the incoming copy.
//! 5. Contents differing only in reference arrays: keep local content and
//!    union the references.
//! 6. Otherwise the server wins the uuid: accept the incoming copy as
//!    master and duplicate the local content under a new uuid with a
//!    `conflict_of` back-reference, so no edit is ever silently lost.
//!
//! Items keys override the default: key material is immutable, so a
//! conflicting items key always keeps the local copy.

use chrono::{DateTime, Utc};
use serde_json::json;
use uuid::Uuid;

use crate::entities::payload::{Payload, PayloadContent};
use crate::error::NotelockError;
use crate::value_objects::{
    ContentReference, ContentType, ItemContent, DEFAULT_APP_DOMAIN,
};

/// How one side of a uuid collision resolves against the other.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictStrategy {
    /// Ignore the incoming copy.
    KeepLeft,
    /// Accept the incoming copy.
    KeepRight,
    /// Keep local; duplicate incoming under a new uuid with `conflict_of`.
    KeepLeftDuplicateRight,
    /// Accept incoming as master; duplicate the local copy.
    KeepRightDuplicateLeft,
    /// Keep local content; union the reference arrays.
    KeepLeftMergeRefs,
}

/// What kind of actor produced a mutation.
///
/// User-interactive mutations refresh `client_updated_at`; internal
/// mutations (sync bookkeeping, singleton enforcement) do not.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationType {
    UserInteraction = 1,
    Internal = 2,
}

/// A typed read-only view over a decrypted payload.
#[derive(Debug, Clone)]
pub struct Item {
    payload: Payload,
}

impl Item {
    /// Wraps a payload carrying decrypted content
    ///
    /// # Errors
    ///
    /// * `InvalidPayload` - content is encrypted or absent
    pub fn from_payload(payload: Payload) -> Result<Self, NotelockError> {
        if !payload.content().is_decrypted() {
            return Err(NotelockError::invalid_payload(format!(
                "cannot construct item over non-decrypted payload {}",
                payload.uuid()
            )));
        }
        Ok(Self { payload })
    }

    pub fn uuid(&self) -> &Uuid {
        self.payload.uuid()
    }

    pub fn content_type(&self) -> &ContentType {
        self.payload.content_type()
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    pub fn content(&self) -> &ItemContent {
        match self.payload.content() {
            PayloadContent::Decrypted(content) => content,
            // Unreachable: from_payload enforces decrypted content.
            _ => unreachable!("item payload content is always decrypted"),
        }
    }

    pub fn created_at(&self) -> &DateTime<Utc> {
        self.payload.created_at()
    }

    pub fn updated_at(&self) -> &DateTime<Utc> {
        self.payload.updated_at()
    }

    pub fn deleted(&self) -> bool {
        self.payload.deleted()
    }

    pub fn dirty(&self) -> bool {
        self.payload.dirty()
    }

    pub fn conflict_of(&self) -> Option<&Uuid> {
        self.content().conflict_of.as_ref()
    }

    /// Client-side last-modified timestamp, distinct from the
    /// server-authoritative `updated_at`
    pub fn client_updated_at(&self) -> Option<DateTime<Utc>> {
        self.content()
            .domain_data(DEFAULT_APP_DOMAIN, "client_updated_at")
            .and_then(|v| v.as_str())
            .and_then(|s| s.parse().ok())
    }

    /// Whether this item type must have at most one live instance
    pub fn is_singleton(&self) -> bool {
        self.content_type().is_singleton()
    }

    /// Decides the resolution strategy against a conflicting copy
    ///
    /// `incoming` is the other side of the uuid collision (usually a
    /// server arrival); see the module docs for the rule ordering.
    pub fn conflict_strategy_with(&self, incoming: &Payload) -> ConflictStrategy {
        if self.content_type() == &ContentType::ItemsKey {
            return ConflictStrategy::KeepLeft;
        }
        if self.is_singleton() {
            return ConflictStrategy::KeepLeft;
        }
        if self.payload.error_decrypting() {
            return ConflictStrategy::KeepLeft;
        }
        if incoming.error_decrypting() {
            return ConflictStrategy::KeepRightDuplicateLeft;
        }
        if self.deleted() || incoming.deleted() {
            return ConflictStrategy::KeepRight;
        }
        match incoming.content().decrypted() {
            Some(incoming_content) => {
                if self.content().equals_ignoring_bookkeeping(incoming_content) {
                    ConflictStrategy::KeepRight
                } else if self.content().differs_only_in_references(incoming_content) {
                    ConflictStrategy::KeepLeftMergeRefs
                } else {
                    ConflictStrategy::KeepRightDuplicateLeft
                }
            }
            None => ConflictStrategy::KeepLeft,
        }
    }
}

/// Typed note view.
#[derive(Debug, Clone)]
pub struct Note(pub Item);

impl Note {
    pub fn title(&self) -> Option<&str> {
        self.0.content().string_field("title")
    }

    pub fn text(&self) -> Option<&str> {
        self.0.content().string_field("text")
    }
}

/// Typed tag view.
#[derive(Debug, Clone)]
pub struct Tag(pub Item);

impl Tag {
    pub fn title(&self) -> Option<&str> {
        self.0.content().string_field("title")
    }

    /// Uuids of the notes this tag references
    pub fn note_uuids(&self) -> Vec<Uuid> {
        self.0
            .content()
            .references
            .iter()
            .filter(|r| r.content_type == ContentType::Note)
            .map(|r| r.uuid)
            .collect()
    }
}

/// Typed component (plugin) view.
#[derive(Debug, Clone)]
pub struct Component(pub Item);

impl Component {
    pub fn name(&self) -> Option<&str> {
        self.0.content().string_field("name")
    }

    pub fn area(&self) -> Option<&str> {
        self.0.content().string_field("area")
    }

    pub fn hosted_url(&self) -> Option<&str> {
        self.0.content().string_field("hosted_url")
    }
}

/// Typed user-preferences view (singleton).
#[derive(Debug, Clone)]
pub struct UserPrefs(pub Item);

impl UserPrefs {
    pub fn preference(&self, key: &str) -> Option<&serde_json::Value> {
        self.0.content().field(key)
    }
}

/// Mutator producing a new payload from an item plus edits.
///
/// The working copy starts as a clone of the item's content; `finish()`
/// stamps the dirty bookkeeping and, for user-interactive mutations, the
/// `client_updated_at` app-data key.
pub struct ItemMutator {
    payload: Payload,
    content: ItemContent,
    mutation_type: MutationType,
    deleted: Option<bool>,
}

impl ItemMutator {
    pub fn new(item: &Item, mutation_type: MutationType) -> Self {
        Self {
            payload: item.payload().clone(),
            content: item.content().clone(),
            mutation_type,
            deleted: None,
        }
    }

    /// Mutable access to the working copy of the content
    pub fn content_mut(&mut self) -> &mut ItemContent {
        &mut self.content
    }

    pub fn set_field(&mut self, key: impl Into<String>, value: serde_json::Value) {
        self.content.set_field(key, value);
    }

    pub fn set_title(&mut self, title: impl Into<String>) {
        self.content.set_field("title", json!(title.into()));
    }

    pub fn set_text(&mut self, text: impl Into<String>) {
        self.content.set_field("text", json!(text.into()));
    }

    pub fn add_reference(&mut self, reference: ContentReference) {
        self.content.add_reference(reference);
    }

    pub fn remove_reference(&mut self, uuid: &Uuid) {
        self.content.remove_reference(uuid);
    }

    pub fn set_domain_data(&mut self, key: impl Into<String>, value: serde_json::Value) {
        self.content.set_domain_data(DEFAULT_APP_DOMAIN, key, value);
    }

    pub fn set_conflict_of(&mut self, uuid: Uuid) {
        self.content.conflict_of = Some(uuid);
    }

    pub fn set_deleted(&mut self) {
        self.deleted = Some(true);
    }

    /// Produces the mutated payload
    ///
    /// The result is always dirty with a fresh `dirtied_date`; the
    /// server-authoritative timestamps are untouched.
    pub fn finish(mut self) -> Payload {
        if self.mutation_type == MutationType::UserInteraction {
            self.content.set_domain_data(
                DEFAULT_APP_DOMAIN,
                "client_updated_at",
                json!(Utc::now().to_rfc3339()),
            );
        }
        let mut builder = self
            .payload
            .copy()
            .decrypted_content(self.content)
            .dirty(true);
        if let Some(deleted) = self.deleted {
            builder = builder.deleted(deleted);
        }
        builder.build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn note_item(title: &str) -> Item {
        let mut content = ItemContent::new();
        content.set_field("title", json!(title));
        let payload = Payload::builder(ContentType::Note)
            .decrypted_content(content)
            .build();
        Item::from_payload(payload).unwrap()
    }

    #[test]
    fn test_item_requires_decrypted_content() {
        let payload = Payload::builder(ContentType::Note)
            .encrypted_content("004:a:b:c")
            .build();
        assert!(Item::from_payload(payload).is_err());
    }

    #[test]
    fn test_mutator_produces_dirty_copy() {
        let item = note_item("before");
        let mutated = {
            let mut mutator = ItemMutator::new(&item, MutationType::UserInteraction);
            mutator.set_title("after");
            mutator.finish()
        };
        assert!(mutated.dirty());
        assert!(mutated.dirtied_date().is_some());
        assert_eq!(
            mutated.content().decrypted().unwrap().string_field("title"),
            Some("after")
        );
        // Original untouched.
        assert_eq!(item.content().string_field("title"), Some("before"));
    }

    #[test]
    fn test_user_mutation_stamps_client_updated_at() {
        let item = note_item("x");
        let mut mutator = ItemMutator::new(&item, MutationType::UserInteraction);
        mutator.set_text("body");
        let payload = mutator.finish();
        let content = payload.content().decrypted().unwrap();
        assert!(content.domain_data(DEFAULT_APP_DOMAIN, "client_updated_at").is_some());

        let mut internal = ItemMutator::new(&item, MutationType::Internal);
        internal.set_text("body");
        let payload = internal.finish();
        let content = payload.content().decrypted().unwrap();
        assert!(content.domain_data(DEFAULT_APP_DOMAIN, "client_updated_at").is_none());
    }

    #[test]
    fn test_conflict_strategy_equal_contents_keeps_right() {
        let item = note_item("same");
        let incoming = item.payload().clone();
        assert_eq!(item.conflict_strategy_with(&incoming), ConflictStrategy::KeepRight);
    }

    #[test]
    fn test_conflict_strategy_differing_contents_duplicates_local() {
        let item = note_item("local");
        let mut content = ItemContent::new();
        content.set_field("title", json!("remote"));
        let incoming = item.payload().copy().decrypted_content(content).build();
        assert_eq!(
            item.conflict_strategy_with(&incoming),
            ConflictStrategy::KeepRightDuplicateLeft
        );
    }

    #[test]
    fn test_conflict_strategy_reference_only_difference_merges() {
        let item = note_item("x");
        let mut content = item.content().clone();
        content.add_reference(ContentReference {
            uuid: Uuid::new_v4(),
            content_type: ContentType::Tag,
        });
        let incoming = item.payload().copy().decrypted_content(content).build();
        assert_eq!(
            item.conflict_strategy_with(&incoming),
            ConflictStrategy::KeepLeftMergeRefs
        );
    }

    #[test]
    fn test_conflict_strategy_deleted_side_keeps_right() {
        let item = note_item("x");
        let incoming = item.payload().copy().deleted(true).absent_content().build();
        assert_eq!(item.conflict_strategy_with(&incoming), ConflictStrategy::KeepRight);
    }

    #[test]
    fn test_conflict_strategy_remote_errored_duplicates_left() {
        let item = note_item("x");
        let incoming = item
            .payload()
            .copy()
            .encrypted_content("004:a:b:c")
            .error_decrypting(true)
            .build();
        assert_eq!(
            item.conflict_strategy_with(&incoming),
            ConflictStrategy::KeepRightDuplicateLeft
        );
    }

    #[test]
    fn test_mutation_type_discriminants_are_distinct() {
        assert_ne!(MutationType::UserInteraction as i32, MutationType::Internal as i32);
    }

    #[test]
    fn test_typed_views_expose_domain_getters() {
        let mut note_payload_content = ItemContent::new();
        note_payload_content.set_field("title", json!("groceries"));
        note_payload_content.set_field("text", json!("milk, eggs"));
        let note = Note(
            Item::from_payload(
                Payload::builder(ContentType::Note)
                    .decrypted_content(note_payload_content)
                    .build(),
            )
            .unwrap(),
        );
        assert_eq!(note.title(), Some("groceries"));
        assert_eq!(note.text(), Some("milk, eggs"));

        let mut tag_content = ItemContent::new();
        tag_content.set_field("title", json!("errands"));
        tag_content.add_reference(ContentReference {
            uuid: *note.0.uuid(),
            content_type: ContentType::Note,
        });
        let tag = Tag(
            Item::from_payload(
                Payload::builder(ContentType::Tag)
                    .decrypted_content(tag_content)
                    .build(),
            )
            .unwrap(),
        );
        assert_eq!(tag.title(), Some("errands"));
        assert_eq!(tag.note_uuids(), vec![*note.0.uuid()]);

        let mut prefs_content = ItemContent::new();
        prefs_content.set_field("sortBy", json!("updated_at"));
        let prefs = UserPrefs(
            Item::from_payload(
                Payload::builder(ContentType::UserPrefs)
                    .decrypted_content(prefs_content)
                    .build(),
            )
            .unwrap(),
        );
        assert_eq!(prefs.preference("sortBy"), Some(&json!("updated_at")));
        assert!(prefs.0.is_singleton());
    }
}
