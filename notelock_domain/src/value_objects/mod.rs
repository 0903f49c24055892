// /////////////////////////////////////////////////////////////////////////////
// Notelock Sync Engine
// Copyright (c) 2025 Notelock Project Contributors
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! Value objects of the notelock domain.
//!
//! Immutable, identity-free types defined by their attributes:
//! protocol versions, content type discriminators, key params,
//! ciphertext framing, and decrypted content trees.

pub mod content_type;
pub mod encrypted_string;
pub mod item_content;
pub mod key_params;
pub mod protocol_version;

pub use content_type::ContentType;
pub use encrypted_string::{AeadComponents, CbcComponents, EncryptedString};
pub use item_content::{
    ContentReference, ItemContent, APP_DATA_CONTENT_KEYS_TO_IGNORE_WHEN_CHECKING_EQUALITY,
    CONTENT_KEYS_TO_IGNORE_WHEN_CHECKING_EQUALITY, DEFAULT_APP_DOMAIN,
};
pub use key_params::{KeyParams, KeyParamsOrigination};
pub use protocol_version::ProtocolVersion;
