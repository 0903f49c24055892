// /////////////////////////////////////////////////////////////////////////////
// Notelock Sync Engine
// Copyright (c) 2025 Notelock Project Contributors
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Application Options
//!
//! Host-supplied engine configuration. Every field has a production
//! default; hosts override programmatically or from a TOML file.

use serde::{Deserialize, Serialize};

use notelock_domain::error::NotelockError;

/// Engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationOptions {
    /// Namespace prefixing every storage key, so multiple engine
    /// instances can share one device store.
    pub identifier: String,

    /// Server host, recorded for hosts that construct their transport
    /// from options.
    pub host: String,

    /// Consecutive integrity mismatches tolerated before entering the
    /// out-of-sync state.
    pub max_discordance: u32,

    /// Upper bound of items per sync request.
    pub sync_request_limit: u32,

    /// Upper bound of chained sync rounds triggered by leftover dirt in
    /// one call.
    pub max_chained_rounds: u32,
}

impl Default for ApplicationOptions {
    fn default() -> Self {
        Self {
            identifier: "notelock".to_string(),
            host: "https://sync.notelock.example".to_string(),
            max_discordance: 5,
            sync_request_limit: 150,
            max_chained_rounds: 5,
        }
    }
}

impl ApplicationOptions {
    pub fn new(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            ..Default::default()
        }
    }

    /// Parses options from a TOML document
    pub fn from_toml_str(raw: &str) -> Result<Self, NotelockError> {
        toml::from_str(raw).map_err(|e| NotelockError::invalid_config(format!("bad options file: {}", e)))
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn with_max_discordance(mut self, max_discordance: u32) -> Self {
        self.max_discordance = max_discordance;
        self
    }

    /// Prefixes a storage key with this instance's namespace
    pub fn namespaced_key(&self, key: &str) -> String {
        format!("{}-{}", self.identifier, key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = ApplicationOptions::default();
        assert_eq!(options.max_discordance, 5);
        assert_eq!(options.namespaced_key("user"), "notelock-user");
    }

    #[test]
    fn test_toml_overrides() {
        let options = ApplicationOptions::from_toml_str(
            r#"
            identifier = "test-ns"
            max_discordance = 2
            "#,
        )
        .unwrap();
        assert_eq!(options.identifier, "test-ns");
        assert_eq!(options.max_discordance, 2);
        // Unspecified fields keep defaults.
        assert_eq!(options.sync_request_limit, 150);
    }
}
