// /////////////////////////////////////////////////////////////////////////////
// Notelock Sync Engine
// Copyright (c) 2025 Notelock Project Contributors
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Challenge Port
//!
//! User-prompt surface injected by the host UI. A challenge that resolves
//! to `None` means the user cancelled; the operation that requested the
//! challenge aborts and callers must handle the absent result.

use async_trait::async_trait;

/// Why the engine is asking for a credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChallengeReason {
    /// An items key arrived that the current root key cannot decrypt.
    KeyRecovery,
    /// The server reported the session invalid; reauthentication needed.
    Reauthentication,
    /// Unlocking local storage protected by a passcode.
    PasscodeUnlock,
}

/// Host-provided prompt surface.
#[async_trait]
pub trait ChallengeResponder: Send + Sync {
    /// Prompts the user for the account password
    ///
    /// Returns `None` when the user cancels.
    async fn prompt_password(&self, reason: ChallengeReason) -> Option<String>;

    /// Prompts the user for the local passcode
    async fn prompt_passcode(&self, reason: ChallengeReason) -> Option<String>;
}
