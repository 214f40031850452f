//! Token engine contract and bearer token types.

mod claims;
pub mod jwt;
pub mod parser;

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::GuardError;
use crate::request::RequestContext;

pub use claims::Claims;
pub use jwt::{JwtEngine, JwtSettings};
pub use parser::{TokenParser, TokenSource};

/// Opaque bearer token as presented by a client.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Token(String);

impl Token {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl From<String> for Token {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for Token {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl AsRef<str> for Token {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// Tokens are credentials; keep them out of debug logs.
impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let prefix: String = self.0.chars().take(8).collect();
        write!(f, "Token({prefix}…)")
    }
}

/// Issues, verifies, refreshes and revokes bearer tokens.
///
/// The engine holds no per-request state: the guard passes the token it is
/// working with to every call. A shared engine instance is used by many
/// guards concurrently.
#[async_trait]
pub trait TokenEngine: Send + Sync {
    /// Locate a token in the request (header, query, cookie...).
    fn parse_from_request(&self, request: &RequestContext) -> Option<Token>;

    /// Verify a token and return its claims.
    ///
    /// A rejected token is `Err(GuardError::Token(_))`; any other error is an
    /// engine fault.
    async fn verify(&self, token: &Token) -> Result<Claims, GuardError>;

    /// Mint a token for the given subject claim.
    async fn issue(&self, subject: &str) -> Result<Token, GuardError>;

    /// Replace a token with a fresh one for the same subject.
    async fn refresh(&self, _token: &Token) -> Result<Token, GuardError> {
        Err(GuardError::unsupported("token engine", "refresh"))
    }

    /// Revoke a token, or every token of its subject when `force_all` is set.
    async fn invalidate(&self, _token: &Token, _force_all: bool) -> Result<bool, GuardError> {
        Err(GuardError::unsupported("token engine", "invalidate"))
    }
}
