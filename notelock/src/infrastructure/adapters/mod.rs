// /////////////////////////////////////////////////////////////////////////////
// Notelock Sync Engine
// Copyright (c) 2025 Notelock Project Contributors
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! Infrastructure adapters: the per-version crypto operators implementing
//! the domain's `CryptoOperator` port, and the registry the protocol
//! service dispatches through.

pub mod operator_003;
pub mod operator_004;
pub mod operator_legacy;

use std::collections::HashMap;
use std::sync::Arc;

use notelock_domain::services::CryptoOperator;
use notelock_domain::value_objects::ProtocolVersion;

pub use operator_003::Operator003;
pub use operator_004::Operator004;
pub use operator_legacy::{Operator001, Operator002};

/// Version-keyed operator lookup.
pub type OperatorRegistry = HashMap<ProtocolVersion, Arc<dyn CryptoOperator>>;

/// Builds the registry of all supported protocol versions.
pub fn default_operator_registry() -> OperatorRegistry {
    let mut registry: OperatorRegistry = HashMap::new();
    registry.insert(ProtocolVersion::V001, Arc::new(Operator001::new()));
    registry.insert(ProtocolVersion::V002, Arc::new(Operator002::new()));
    registry.insert(ProtocolVersion::V003, Arc::new(Operator003::new()));
    registry.insert(ProtocolVersion::V004, Arc::new(Operator004::new()));
    registry
}
