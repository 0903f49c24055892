// /////////////////////////////////////////////////////////////////////////////
// Notelock Sync Engine
// Copyright (c) 2025 Notelock Project Contributors
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Notelock Domain
//!
//! The domain layer of the notelock end-to-end encrypted sync engine. It
//! holds the business rules of the system and is independent of any
//! transport, persistence technology, or user interface.
//!
//! ## Domain Concepts
//!
//! ### Entities
//! Objects with identity whose state evolves through explicit copies:
//!
//! - `Payload`: one version of one item's state plus sync bookkeeping;
//!   immutable after construction
//! - `Item` and its typed views (`Note`, `Tag`, `Component`,
//!   `UserPrefs`, `ItemsKey`)
//! - `RootKey`: the password-derived top of the key hierarchy
//! - `PayloadCollection`: the uuid-indexed master set
//!
//! ### Value Objects
//! Immutable, identity-free, self-validating:
//!
//! - `ProtocolVersion`: the four coexisting crypto protocol versions
//! - `ContentType`: string-discriminated item types as a sum type
//! - `KeyParams`: public inputs for root key re-derivation
//! - `EncryptedString`: colon-delimited ciphertext framing
//! - `ItemContent`: the decrypted content tree with references and
//!   app-data buckets
//!
//! ### Domain Services
//! Stateless logic operating on domain objects:
//!
//! - conflict deltas: pure `(base, incoming) -> result` reducers, one per
//!   conflict policy
//! - the crypto operator port, implemented per protocol version by the
//!   infrastructure layer
//! - the integrity digest over non-deleted server timestamps
//!
//! ### Ports
//! Async traits for the injected collaborators: `DeviceInterface`
//! (persistence), `ApiClient` (transport), `ChallengeResponder`
//! (user prompts).
//!
//! ## Invariants
//!
//! - Payloads are immutable; every state transition produces a new
//!   payload.
//! - At most one items key is the default at any time.
//! - A v004 payload referencing an absent items key waits
//!   (`waiting_for_key`) instead of failing.
//! - `updated_at` is server-authoritative; local mutations never touch it.
//! - An item that failed decryption is never silently replaced and never
//!   reaches user-visible streams until repaired.

pub mod entities;
pub mod error;
pub mod events;
pub mod repositories;
pub mod services;
pub mod value_objects;

pub use error::NotelockError;
