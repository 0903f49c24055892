// /////////////////////////////////////////////////////////////////////////////
// Notelock Sync Engine
// Copyright (c) 2025 Notelock Project Contributors
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Integrity Digest
//!
//! Deterministic digest over the sync state used to detect silent
//! divergence between client and server. Both sides compute SHA-256 over
//! the comma-joined `updated_at` microsecond timestamps of all non-deleted
//! items, sorted by `updated_at` descending; equal digests mean equal item
//! sets as far as server timestamps can tell.

use sha2::{Digest, Sha256};

use crate::entities::Payload;

/// Computes the integrity hash over the given payloads.
///
/// Deleted payloads are excluded. Ordering is `updated_at` descending
/// with uuid as the deterministic tiebreaker for equal timestamps.
pub fn compute_integrity_hash(payloads: &[&Payload]) -> String {
    let mut timestamps: Vec<(i64, String)> = payloads
        .iter()
        .filter(|p| !p.deleted())
        .map(|p| (p.updated_at().timestamp_micros(), p.uuid().to_string()))
        .collect();
    timestamps.sort_by(|a, b| b.cmp(a));

    let joined = timestamps
        .iter()
        .map(|(micros, _)| micros.to_string())
        .collect::<Vec<_>>()
        .join(",");

    let mut hasher = Sha256::new();
    hasher.update(joined.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value_objects::ContentType;
    use chrono::{TimeZone, Utc};

    fn payload_updated_at(micros: i64) -> Payload {
        Payload::builder(ContentType::Note)
            .updated_at(Utc.timestamp_micros(micros).single().unwrap())
            .build()
    }

    #[test]
    fn test_hash_matches_manual_computation() {
        let a = payload_updated_at(3_000_000);
        let b = payload_updated_at(1_000_000);
        let hash = compute_integrity_hash(&[&b, &a]);

        let mut hasher = Sha256::new();
        hasher.update("3000000,1000000".as_bytes());
        assert_eq!(hash, hex::encode(hasher.finalize()));
    }

    #[test]
    fn test_deleted_payloads_excluded() {
        let a = payload_updated_at(3_000_000);
        let deleted = payload_updated_at(2_000_000).copy().deleted(true).build();
        let with_deleted = compute_integrity_hash(&[&a, &deleted]);
        let without = compute_integrity_hash(&[&a]);
        assert_eq!(with_deleted, without);
    }

    #[test]
    fn test_order_independence_of_input() {
        let a = payload_updated_at(5_000_000);
        let b = payload_updated_at(4_000_000);
        let c = payload_updated_at(6_000_000);
        assert_eq!(
            compute_integrity_hash(&[&a, &b, &c]),
            compute_integrity_hash(&[&c, &b, &a])
        );
    }
}
