// /////////////////////////////////////////////////////////////////////////////
// Notelock Sync Engine
// Copyright (c) 2025 Notelock Project Contributors
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Content Type
//!
//! String-discriminated item types, modeled as a sum type with a catch-all
//! for types this library does not interpret. Unknown content types are
//! carried through sync untouched so newer clients' data survives a round
//! trip through an older client.

use std::fmt;

use serde::de::{self, Deserializer};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};

/// Discriminator for the domain type of an item.
///
/// Wire representation is the raw string (`"Note"`, `"SN|ItemsKey"`, ...).
/// Types the engine gives special treatment: `ItemsKey` (key hierarchy and
/// the ignored-key emission rule), `UserPrefs` and `Privileges`
/// (singletons).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ContentType {
    Note,
    Tag,
    ItemsKey,
    Component,
    UserPrefs,
    Privileges,
    /// A type this library does not interpret; preserved verbatim.
    Other(String),
}

impl ContentType {
    pub fn as_str(&self) -> &str {
        match self {
            ContentType::Note => "Note",
            ContentType::Tag => "Tag",
            ContentType::ItemsKey => "SN|ItemsKey",
            ContentType::Component => "SN|Component",
            ContentType::UserPrefs => "SN|UserPreferences",
            ContentType::Privileges => "SN|Privileges",
            ContentType::Other(raw) => raw,
        }
    }

    pub fn from_raw(raw: &str) -> Self {
        match raw {
            "Note" => ContentType::Note,
            "Tag" => ContentType::Tag,
            "SN|ItemsKey" => ContentType::ItemsKey,
            "SN|Component" => ContentType::Component,
            "SN|UserPreferences" => ContentType::UserPrefs,
            "SN|Privileges" => ContentType::Privileges,
            other => ContentType::Other(other.to_string()),
        }
    }

    /// Types required to have at most one live instance.
    ///
    /// Enforced after every emission: the earliest-created match survives
    /// and the rest are marked deleted and dirty.
    pub fn is_singleton(&self) -> bool {
        matches!(self, ContentType::UserPrefs | ContentType::Privileges)
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for ContentType {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ContentType {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        if raw.is_empty() {
            return Err(de::Error::custom("content_type cannot be empty"));
        }
        Ok(ContentType::from_raw(&raw))
    }
}
