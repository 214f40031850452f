//! JWT claims.

use serde::{Deserialize, Serialize};

/// Registered claims carried by every token the engine issues.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (user identifier).
    pub sub: String,

    /// Issuer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,

    /// Expiration time (as Unix timestamp).
    pub exp: i64,

    /// Issued at (as Unix timestamp).
    pub iat: i64,

    /// Not before (as Unix timestamp).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nbf: Option<i64>,

    /// JWT ID, the revocation key.
    pub jti: String,
}

impl Claims {
    /// Seconds until expiry relative to `now`, floored at zero.
    pub fn expires_in(&self, now: i64) -> i64 {
        (self.exp - now).max(0)
    }
}
