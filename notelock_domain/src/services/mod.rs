// /////////////////////////////////////////////////////////////////////////////
// Notelock Sync Engine
// Copyright (c) 2025 Notelock Project Contributors
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! Domain services: pure conflict deltas, the crypto operator port, and
//! the integrity digest.

pub mod crypto_operator;
pub mod delta;
pub mod integrity;

pub use crypto_operator::{
    CryptoOperator, DecryptedParameters, EncryptedParameters, EncryptionIntent, OperatorKey,
};
pub use delta::{
    delta_file_import, delta_out_of_sync, delta_remote_conflicts, delta_remote_rejected,
    delta_remote_retrieved, delta_remote_saved,
};
pub use integrity::compute_integrity_hash;
