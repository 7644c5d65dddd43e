//! "Remember me" session token: opaque proof of a prior successful
//! login, persisted in the shared settings document under `SESSION`.
//!
//! The token is not checked against anything server-side — presence
//! plus an unexpired timestamp plus a still-existing user record is the
//! whole gate. At most one session exists at a time; issuing a new one
//! overwrites the old.

use chrono::{DateTime, Duration, Local};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Session lifetime: 7 days.
const SESSION_TTL_DAYS: i64 = 7;

/// Token byte length before hex encoding (16 bytes = 32 hex chars).
const TOKEN_BYTES: usize = 16;

/// The `SESSION` sub-object of the settings document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    /// The authenticated identity.
    pub username: String,
    /// Random opaque token, fixed length.
    pub token: String,
    /// Absolute expiry, RFC 3339.
    pub expires_at: String,
}

/// A `SESSION` object was present but malformed. Treated as "no valid
/// session" by the flow — it falls through to interactive login, never
/// an error the user sees.
#[derive(Debug, Error)]
pub enum SessionCorrupt {
    #[error("SESSION object does not match the expected shape: {0}")]
    BadShape(#[from] serde_json::Error),
    #[error("SESSION expiry '{value}' is not a valid RFC 3339 timestamp")]
    BadExpiry { value: String },
}

impl SessionRecord {
    /// Issue a fresh session for `username`, expiring 7 days out.
    pub fn issue(username: &str) -> Self {
        let mut bytes = [0u8; TOKEN_BYTES];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        Self {
            username: username.to_string(),
            token: hex::encode(bytes),
            expires_at: (Local::now() + Duration::days(SESSION_TTL_DAYS)).to_rfc3339(),
        }
    }

    /// Whether the expiry is strictly in the future.
    pub fn is_unexpired(&self) -> Result<bool, SessionCorrupt> {
        let expires = DateTime::parse_from_rfc3339(&self.expires_at).map_err(|_| {
            SessionCorrupt::BadExpiry {
                value: self.expires_at.clone(),
            }
        })?;
        Ok(expires.with_timezone(&Local) > Local::now())
    }
}
