// Authentication types

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A token within this many minutes of expiry is treated as expired
pub const EXPIRY_MARGIN_MINUTES: i64 = 5;

/// Per-account credential blob, persisted as `tokens/<name>.json`.
///
/// Fields the gateway does not know about (provider metadata, auth method,
/// region hints) ride along in `extra` and survive refresh overlays.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenBlob {
    #[serde(default)]
    pub access_token: String,

    #[serde(default)]
    pub refresh_token: String,

    /// RFC 3339 UTC timestamp; absence means expired
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<String>,

    // OIDC client credentials used for refresh
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,

    /// Legacy pointer to a sidecar credential file; carried but unused
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id_hash: Option<String>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl TokenBlob {
    /// True when the token is past, or within the safety margin of, its expiry
    pub fn is_expired(&self) -> bool {
        let Some(expires_at) = self.expires_at.as_deref() else {
            return true;
        };

        match DateTime::parse_from_rfc3339(expires_at) {
            Ok(expires) => {
                expires.with_timezone(&Utc) - Utc::now() < Duration::minutes(EXPIRY_MARGIN_MINUTES)
            }
            Err(e) => {
                tracing::warn!("Failed to parse expires_at {:?}: {}", expires_at, e);
                true
            }
        }
    }

    /// Format an expiry timestamp the way the upstream tooling writes it
    pub fn format_expires_at(when: DateTime<Utc>) -> String {
        when.format("%Y-%m-%dT%H:%M:%S.000Z").to_string()
    }

    pub fn has_client_credentials(&self) -> bool {
        self.client_id.as_deref().is_some_and(|id| !id.is_empty())
            && self
                .client_secret
                .as_deref()
                .is_some_and(|secret| !secret.is_empty())
    }
}
