// /////////////////////////////////////////////////////////////////////////////
// Notelock Sync Engine
// Copyright (c) 2025 Notelock Project Contributors
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Encrypted String Framing
//!
//! Parsers and formatters for the colon-delimited ciphertext strings the
//! protocol puts on the wire. Each version frames its components
//! differently; the common element is the 3-digit version tag prefix.
//!
//! ## Wire Formats
//!
//! - v004: `004:<b64url nonce>:<b64url ciphertext+tag>:<b64url aad>`
//! - v003/v002: `00x:<auth_hash>:<uuid>:<iv hex>:<ciphertext b64>`
//! - v001: `001:<uuid>:<iv hex>:<ciphertext b64>` (no authentication)
//! - v000: `000` + base64 of the JSON content (no encryption)
//!
//! Parsing is strict about component counts. The payload of each component
//! is not validated here; the operators decode and authenticate them.

use uuid::Uuid;

use crate::error::NotelockError;
use crate::value_objects::ProtocolVersion;

/// Components of a v004 encrypted string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AeadComponents {
    pub nonce_b64: String,
    pub ciphertext_b64: String,
    pub aad_b64: String,
}

/// Components of a v001-v003 encrypted string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CbcComponents {
    /// HMAC-SHA256 over the string-to-auth; absent for v001.
    pub auth_hash: Option<String>,
    pub uuid: Uuid,
    pub iv_hex: String,
    pub ciphertext_b64: String,
}

/// A parsed encrypted string of any version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncryptedString {
    Aead {
        version: ProtocolVersion,
        components: AeadComponents,
    },
    Cbc {
        version: ProtocolVersion,
        components: CbcComponents,
    },
    /// v000; the remainder is base64-encoded JSON.
    Unencrypted { content_b64: String },
}

impl EncryptedString {
    /// Parses a framed ciphertext string
    ///
    /// # Errors
    ///
    /// * `UnsupportedVersion` - unknown version tag
    /// * `InvalidPayload` - wrong component count for the tagged version
    pub fn parse(string: &str) -> Result<Self, NotelockError> {
        let version = ProtocolVersion::from_encrypted_string(string)?;
        match version {
            ProtocolVersion::V000 => Ok(EncryptedString::Unencrypted {
                content_b64: string[ProtocolVersion::TAG_LENGTH..].to_string(),
            }),
            ProtocolVersion::V004 => {
                let parts: Vec<&str> = string.split(':').collect();
                if parts.len() != 4 {
                    return Err(NotelockError::invalid_payload(format!(
                        "v004 string has {} components, expected 4",
                        parts.len()
                    )));
                }
                Ok(EncryptedString::Aead {
                    version,
                    components: AeadComponents {
                        nonce_b64: parts[1].to_string(),
                        ciphertext_b64: parts[2].to_string(),
                        aad_b64: parts[3].to_string(),
                    },
                })
            }
            ProtocolVersion::V002 | ProtocolVersion::V003 => {
                let parts: Vec<&str> = string.split(':').collect();
                if parts.len() != 5 {
                    return Err(NotelockError::invalid_payload(format!(
                        "{} string has {} components, expected 5",
                        version,
                        parts.len()
                    )));
                }
                Ok(EncryptedString::Cbc {
                    version,
                    components: CbcComponents {
                        auth_hash: Some(parts[1].to_string()),
                        uuid: parse_uuid(parts[2])?,
                        iv_hex: parts[3].to_string(),
                        ciphertext_b64: parts[4].to_string(),
                    },
                })
            }
            ProtocolVersion::V001 => {
                let parts: Vec<&str> = string.split(':').collect();
                if parts.len() != 4 {
                    return Err(NotelockError::invalid_payload(format!(
                        "v001 string has {} components, expected 4",
                        parts.len()
                    )));
                }
                Ok(EncryptedString::Cbc {
                    version,
                    components: CbcComponents {
                        auth_hash: None,
                        uuid: parse_uuid(parts[1])?,
                        iv_hex: parts[2].to_string(),
                        ciphertext_b64: parts[3].to_string(),
                    },
                })
            }
        }
    }

    /// Gets the version of this encrypted string
    pub fn version(&self) -> ProtocolVersion {
        match self {
            EncryptedString::Aead { version, .. } => *version,
            EncryptedString::Cbc { version, .. } => *version,
            EncryptedString::Unencrypted { .. } => ProtocolVersion::V000,
        }
    }

    /// Formats a v004 string from its components
    pub fn format_aead(nonce_b64: &str, ciphertext_b64: &str, aad_b64: &str) -> String {
        format!(
            "{}:{}:{}:{}",
            ProtocolVersion::V004,
            nonce_b64,
            ciphertext_b64,
            aad_b64
        )
    }

    /// Formats a v002/v003 string from its components
    pub fn format_cbc(
        version: ProtocolVersion,
        auth_hash: &str,
        uuid: &Uuid,
        iv_hex: &str,
        ciphertext_b64: &str,
    ) -> String {
        format!("{}:{}:{}:{}:{}", version, auth_hash, uuid, iv_hex, ciphertext_b64)
    }

    /// Formats a v000 string from base64 content
    pub fn format_unencrypted(content_b64: &str) -> String {
        format!("{}{}", ProtocolVersion::V000, content_b64)
    }
}

fn parse_uuid(raw: &str) -> Result<Uuid, NotelockError> {
    Uuid::parse_str(raw)
        .map_err(|e| NotelockError::invalid_payload(format!("invalid uuid in encrypted string: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_parse_v004() {
        let parsed = EncryptedString::parse("004:bm9uY2U:Y2lwaGVy:YWFk").unwrap();
        match parsed {
            EncryptedString::Aead { version, components } => {
                assert_eq!(version, ProtocolVersion::V004);
                assert_eq!(components.nonce_b64, "bm9uY2U");
                assert_eq!(components.ciphertext_b64, "Y2lwaGVy");
                assert_eq!(components.aad_b64, "YWFk");
            }
            other => panic!("unexpected parse: {:?}", other),
        }
    }

    #[test]
    fn test_parse_v003() {
        let uuid = Uuid::new_v4();
        let raw = format!("003:deadbeef:{}:00ff:aGVsbG8=", uuid);
        let parsed = EncryptedString::parse(&raw).unwrap();
        match parsed {
            EncryptedString::Cbc { version, components } => {
                assert_eq!(version, ProtocolVersion::V003);
                assert_eq!(components.auth_hash.as_deref(), Some("deadbeef"));
                assert_eq!(components.uuid, uuid);
            }
            other => panic!("unexpected parse: {:?}", other),
        }
    }

    #[test]
    fn test_parse_v000_keeps_remainder() {
        let parsed = EncryptedString::parse("000eyJmb28iOiJiYXIifQ==").unwrap();
        assert_eq!(
            parsed,
            EncryptedString::Unencrypted {
                content_b64: "eyJmb28iOiJiYXIifQ==".to_string()
            }
        );
    }

    #[test]
    fn test_wrong_component_count_rejected() {
        assert!(EncryptedString::parse("004:only:two").is_err());
        assert!(EncryptedString::parse("003:a:b").is_err());
        assert!(EncryptedString::parse("005:a:b:c").is_err());
    }

    proptest! {
        // Any string without the right shape must error rather than panic.
        #[test]
        fn prop_parse_never_panics(s in ".{0,64}") {
            let _ = EncryptedString::parse(&s);
        }
    }
}
