// /////////////////////////////////////////////////////////////////////////////
// Notelock Sync Engine
// Copyright (c) 2025 Notelock Project Contributors
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Application Events
//!
//! Lifecycle and status events the engine emits to host observers.
//! Observers are notified synchronously in registration order; no event
//! carries secret material.

use serde::{Deserialize, Serialize};

/// A sync round touching at least this many items emits `MajorDataChange`.
pub const MAJOR_DATA_CHANGE_THRESHOLD: usize = 15;

/// Events emitted to host observers across the engine's lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ApplicationEvent {
    Started,
    Launched,
    LocalDataLoaded,
    KeyStatusChanged,
    CompletedFullSync,
    CompletedIncrementalSync,
    FailedSync,
    EnteredOutOfSync,
    ExitedOutOfSync,
    SignedIn,
    SignedOut,
    MajorDataChange,
    WillSync,
    InvalidSyncSession,
    LocalDatabaseReadError,
    LocalDatabaseWriteError,
    MigrationsLoaded,
    StorageReady,
    PreferencesChanged,
    UserRolesChanged,
}

impl ApplicationEvent {
    /// Whether this event reports a failure condition
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            ApplicationEvent::FailedSync
                | ApplicationEvent::EnteredOutOfSync
                | ApplicationEvent::InvalidSyncSession
                | ApplicationEvent::LocalDatabaseReadError
                | ApplicationEvent::LocalDatabaseWriteError
        )
    }
}
