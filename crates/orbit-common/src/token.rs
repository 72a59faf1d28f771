use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Keys that must be present in every join token. `public_location` may be
/// null, but the key itself has to exist.
pub const MANDATORY_TOKEN_FIELDS: [&str; 6] = [
    "auth_key",
    "cluster_ip",
    "cluster_name",
    "cluster_token",
    "public_location",
    "watcher_service",
];

/// Authority tier selected when a token is issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenMode {
    /// Full control, including node deletion and quota changes.
    Admin,
    /// Deploy/delete own jobs, manage own user-space.
    User,
    /// Enumerate and read logs; no mutation beyond self-registration.
    Worker,
}

impl TokenMode {
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(TokenMode::Admin),
            1 => Some(TokenMode::User),
            2 => Some(TokenMode::Worker),
            _ => None,
        }
    }
}

/// Credential envelope handed out-of-band to joining nodes.
///
/// Wire format: base64url-no-pad over JSON with deterministic key order.
/// Decoders tolerate unknown keys for forward compatibility.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinToken {
    pub cluster_ip: String,
    pub cluster_name: String,
    /// Runtime bootstrap secret of the embedded control plane.
    pub cluster_token: String,
    /// One of the three tier keys of the pool.
    pub auth_key: String,
    /// `host:port` of the in-cluster watcher.
    pub watcher_service: String,
    pub public_location: Option<String>,
}

impl JoinToken {
    /// Encode as base64url(JSON). Key order is deterministic (sorted).
    pub fn encode(&self) -> String {
        // Round-tripping through Value sorts the keys.
        let value = serde_json::to_value(self).unwrap_or_default();
        let json = serde_json::to_string(&value).unwrap_or_default();
        URL_SAFE_NO_PAD.encode(json)
    }

    /// Decode without validating the field set.
    pub fn decode(token: &str) -> Result<Self> {
        let raw = URL_SAFE_NO_PAD
            .decode(token.trim())
            .map_err(|e| Error::TokenInvalid(format!("bad base64: {e}")))?;
        let value: serde_json::Value = serde_json::from_slice(&raw)
            .map_err(|e| Error::TokenInvalid(format!("bad payload: {e}")))?;

        let map = value
            .as_object()
            .ok_or_else(|| Error::TokenInvalid("payload is not an object".into()))?;
        for field in MANDATORY_TOKEN_FIELDS {
            if !map.contains_key(field) {
                return Err(Error::TokenInvalid(format!("missing field '{field}'")));
            }
        }

        serde_json::from_value(value)
            .map_err(|e| Error::TokenInvalid(format!("bad field type: {e}")))
    }

    /// Decode and enforce the token invariants.
    ///
    /// All mandatory fields must be present and non-empty; with
    /// `require_public` the token must also carry a public location.
    pub fn validate(token: &str, require_public: bool) -> Result<Self> {
        let decoded = Self::decode(token)?;
        for (field, value) in [
            ("cluster_ip", &decoded.cluster_ip),
            ("cluster_name", &decoded.cluster_name),
            ("cluster_token", &decoded.cluster_token),
            ("auth_key", &decoded.auth_key),
            ("watcher_service", &decoded.watcher_service),
        ] {
            if value.trim().is_empty() {
                return Err(Error::TokenInvalid(format!("empty field '{field}'")));
            }
        }
        if require_public && decoded.public_location.is_none() {
            return Err(Error::TokenInvalid(
                "token is not valid for public pools (no public_location)".into(),
            ));
        }
        Ok(decoded)
    }
}
