// /////////////////////////////////////////////////////////////////////////////
// Notelock Sync Engine
// Copyright (c) 2025 Notelock Project Contributors
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! Entities of the notelock domain: payloads, collections, typed items,
//! and the key hierarchy.

pub mod collection;
pub mod item;
pub mod items_key;
pub mod payload;
pub mod root_key;

pub use collection::{ImmutableCollection, PayloadCollection};
pub use item::{
    Component, ConflictStrategy, Item, ItemMutator, MutationType, Note, Tag, UserPrefs,
};
pub use items_key::{newest_valid_items_key, should_ignore_items_key_arrival, ItemsKey};
pub use payload::{
    epoch, Payload, PayloadBuilder, PayloadContent, PayloadSource, WireContent, WirePayload,
};
pub use root_key::RootKey;
