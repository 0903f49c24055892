// /////////////////////////////////////////////////////////////////////////////
// Notelock Sync Engine
// Copyright (c) 2025 Notelock Project Contributors
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Domain Error System
//!
//! This module provides the hierarchical error system for the notelock sync
//! engine domain. It categorizes failures, provides actionable error
//! messages, and supports both automated recovery decisions and
//! human-readable diagnostics.
//!
//! ## Overview
//!
//! The error system is organized around the failure kinds of an encrypted
//! sync engine:
//!
//! - **Decryption failures**: auth tag mismatch, corrupt framing, missing
//!   key material. Recorded on the affected payload and never thrown past
//!   the protocol layer.
//! - **Key availability**: an items key referenced by a payload has not yet
//!   been loaded; the payload is parked in a waiting state rather than
//!   failed.
//! - **Network failures**: transport errors surfaced to the sync service,
//!   which retries on the next round.
//! - **Session failures**: expired or invalid credentials requiring
//!   reauthentication.
//! - **Storage failures**: persistence reads/writes against the injected
//!   device interface.
//! - **Migration failures**: the only fatal class; the engine refuses to
//!   launch.
//!
//! ## Error Handling Policy
//!
//! No error may cross the sync boundary as a panic or an unhandled
//! `Result`: every failure is either recorded on a payload
//! (`error_decrypting`, `waiting_for_key`), surfaced as an application
//! event, or returned to the caller as a `NotelockError`.

use thiserror::Error;

/// Domain-specific errors for the notelock sync engine.
///
/// Each variant includes a descriptive message and represents one failure
/// mode of the engine. Variants are grouped by the subsystem that raises
/// them; `category()` exposes the grouping for logging and metrics.
#[derive(Error, Debug, Clone)]
pub enum NotelockError {
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    #[error("Encryption error: {0}")]
    EncryptionError(String),

    #[error("Decryption error: {0}")]
    DecryptionError(String),

    #[error("Unsupported protocol version: {0}")]
    UnsupportedVersion(String),

    #[error("Key not available: {0}")]
    KeyNotAvailable(String),

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Invalid session: {0}")]
    InvalidSession(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("API error ({status}): {message}")]
    ApiError { status: u16, message: String },

    #[error("Storage read error: {0}")]
    StorageReadError(String),

    #[error("Storage write error: {0}")]
    StorageWriteError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Sync error: {0}")]
    SyncError(String),

    #[error("Integrity check failed: {0}")]
    IntegrityError(String),

    #[error("Migration failed: {0}")]
    MigrationError(String),

    #[error("Challenge cancelled: {0}")]
    ChallengeCancelled(String),

    #[error("Item not found: {0}")]
    ItemNotFound(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl NotelockError {
    /// Creates a new configuration error
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfiguration(msg.into())
    }

    /// Creates a new payload validation error
    pub fn invalid_payload(msg: impl Into<String>) -> Self {
        Self::InvalidPayload(msg.into())
    }

    /// Creates a new encryption error
    pub fn encryption(msg: impl Into<String>) -> Self {
        Self::EncryptionError(msg.into())
    }

    /// Creates a new decryption error
    pub fn decryption(msg: impl Into<String>) -> Self {
        Self::DecryptionError(msg.into())
    }

    /// Creates a new network error
    pub fn network(msg: impl Into<String>) -> Self {
        Self::NetworkError(msg.into())
    }

    /// Creates a new storage read error
    pub fn storage_read(msg: impl Into<String>) -> Self {
        Self::StorageReadError(msg.into())
    }

    /// Creates a new storage write error
    pub fn storage_write(msg: impl Into<String>) -> Self {
        Self::StorageWriteError(msg.into())
    }

    /// Creates a new sync error
    pub fn sync(msg: impl Into<String>) -> Self {
        Self::SyncError(msg.into())
    }

    /// Creates a new internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::InternalError(msg.into())
    }

    /// Checks if the error is recoverable by retrying on a later round
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            NotelockError::NetworkError(_)
                | NotelockError::KeyNotAvailable(_)
                | NotelockError::StorageReadError(_)
                | NotelockError::StorageWriteError(_)
                | NotelockError::InvalidSession(_)
        )
    }

    /// Checks if the error is fatal to engine launch
    ///
    /// Migration failure is the only fatal class; every other error is
    /// captured and surfaced as an event.
    pub fn is_fatal(&self) -> bool {
        matches!(self, NotelockError::MigrationError(_))
    }

    /// Checks if the error represents an HTTP 401 from the server
    pub fn is_invalid_session(&self) -> bool {
        matches!(self, NotelockError::InvalidSession(_))
            || matches!(self, NotelockError::ApiError { status: 401, .. })
    }

    /// Gets the error category
    pub fn category(&self) -> &'static str {
        match self {
            NotelockError::InvalidConfiguration(_) => "configuration",
            NotelockError::InvalidPayload(_) => "payload",
            NotelockError::EncryptionError(_) => "encryption",
            NotelockError::DecryptionError(_) => "decryption",
            NotelockError::UnsupportedVersion(_) => "protocol",
            NotelockError::KeyNotAvailable(_) => "keys",
            NotelockError::AuthenticationFailed(_) => "session",
            NotelockError::InvalidSession(_) => "session",
            NotelockError::NetworkError(_) => "network",
            NotelockError::ApiError { .. } => "network",
            NotelockError::StorageReadError(_) => "storage",
            NotelockError::StorageWriteError(_) => "storage",
            NotelockError::SerializationError(_) => "serialization",
            NotelockError::SyncError(_) => "sync",
            NotelockError::IntegrityError(_) => "integrity",
            NotelockError::MigrationError(_) => "migration",
            NotelockError::ChallengeCancelled(_) => "challenge",
            NotelockError::ItemNotFound(_) => "items",
            NotelockError::InternalError(_) => "internal",
        }
    }
}

// Implement conversion from standard library errors
impl From<std::io::Error> for NotelockError {
    fn from(err: std::io::Error) -> Self {
        NotelockError::StorageReadError(err.to_string())
    }
}

impl From<serde_json::Error> for NotelockError {
    fn from(err: serde_json::Error) -> Self {
        NotelockError::SerializationError(err.to_string())
    }
}
