// /////////////////////////////////////////////////////////////////////////////
// Notelock Sync Engine
// Copyright (c) 2025 Notelock Project Contributors
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Observability
//!
//! Tracing subscriber bootstrap for hosts that want the engine's
//! structured logs on stderr. Level selection follows the standard
//! `RUST_LOG` environment filter, defaulting to `info` for the engine's
//! crates. The engine never logs plaintext content, key material, or
//! passwords at any level.

use once_cell::sync::OnceCell;
use tracing_subscriber::{fmt, EnvFilter};

static INIT: OnceCell<()> = OnceCell::new();

/// Installs the global tracing subscriber.
///
/// Idempotent; repeated calls (e.g. from parallel tests) are no-ops.
pub fn init_observability() {
    INIT.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("notelock=info,notelock_domain=info"));
        let _ = fmt()
            .with_env_filter(filter)
            .with_target(true)
            .with_writer(std::io::stderr)
            .try_init();
    });
}
