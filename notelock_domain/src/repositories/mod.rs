// /////////////////////////////////////////////////////////////////////////////
// Notelock Sync Engine
// Copyright (c) 2025 Notelock Project Contributors
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! Infrastructure ports: the narrow dependency-injected interfaces
//! through which the engine consumes its external collaborators.

pub mod api_client;
pub mod challenge;
pub mod device_interface;

pub use api_client::{
    ApiClient, ChangeCredentialsRequest, ConflictType, RawConflict, RegistrationRequest, Session,
    SessionResponse, SyncRequest, SyncResponse, User, API_VERSION,
};
pub use challenge::{ChallengeReason, ChallengeResponder};
pub use device_interface::DeviceInterface;
