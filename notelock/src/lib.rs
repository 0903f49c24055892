// /////////////////////////////////////////////////////////////////////////////
// Notelock Sync Engine
// Copyright (c) 2025 Notelock Project Contributors
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Notelock
//!
//! Client-side end-to-end encrypted data synchronization engine for a
//! personal notes service. The engine keeps a local collection of user
//! items (notes, tags, components, preferences, encryption keys),
//! encrypts them with keys derived from the user's password, synchronizes
//! them bidirectionally with a server that only ever sees ciphertext, and
//! reconciles concurrent edits deterministically.
//!
//! ## Layers
//!
//! - **Domain** (`notelock-domain`): payloads, items, the key hierarchy,
//!   conflict deltas, and the ports the engine consumes its collaborators
//!   through.
//! - **Application** (this crate, `application`): the service graph —
//!   payload and item managers, protocol orchestration, storage facade,
//!   session lifecycle, the sync state machine, key recovery, and
//!   migrations — composed by [`Application`].
//! - **Infrastructure** (this crate, `infrastructure`): the versioned
//!   crypto operators, an in-memory device interface, and observability
//!   bootstrap.
//!
//! ## Getting Started
//!
//! A host injects three collaborators — persistence, transport, and a
//! prompt surface — and drives the lifecycle:
//!
//! ```ignore
//! let app = Application::new(
//!     ApplicationOptions::new("my-app"),
//!     device,     // Arc<dyn DeviceInterface>
//!     api,        // Arc<dyn ApiClient>
//!     challenge,  // Arc<dyn ChallengeResponder>
//! );
//! app.prepare_for_launch().await?;
//! app.launch().await?;
//! app.register("user@example.com", "correct horse battery").await?;
//! app.sync().await?;
//! ```

pub mod application;
pub mod infrastructure;

pub use application::{Application, ApplicationOptions, EventBus};

// Re-export the domain crate so hosts depend on one crate only.
pub use notelock_domain as domain;
