//! User records and the credentials used to look them up.

use std::fmt;
use std::sync::{Arc, OnceLock};

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A user record the guard can authenticate.
pub trait Authenticatable: Clone + Send + Sync + 'static {
    /// Stable identity key, written into tokens as the subject claim.
    fn auth_identifier(&self) -> String;
}

/// User role.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Regular user.
    #[default]
    User,
    /// Administrator.
    Admin,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::User => write!(f, "user"),
            Role::Admin => write!(f, "admin"),
        }
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "user" => Ok(Role::User),
            "admin" => Ok(Role::Admin),
            _ => Err(format!("unknown role: {}", s)),
        }
    }
}

impl TryFrom<String> for Role {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

/// User record shared by the bundled directories.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: String,
    pub username: String,
    pub email: String,
    pub display_name: String,
    #[serde(skip_serializing)]
    pub password_hash: Option<String>,
    #[sqlx(try_from = "String")]
    pub role: Role,
    pub is_active: bool,
}

impl User {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    /// Verify a password against this user's bcrypt hash.
    ///
    /// Users without a hash (e.g. provisioned externally) never match.
    pub fn verify_password(&self, password: &str) -> bool {
        self.password_hash
            .as_deref()
            .is_some_and(|hash| bcrypt::verify(password, hash).unwrap_or(false))
    }
}

/// Throwaway bcrypt hash checked when a login names nobody, so a miss costs
/// one verification like a wrong password does.
#[derive(Debug, Clone)]
pub(crate) struct DecoyHash {
    cost: u32,
    hash: Arc<OnceLock<Option<String>>>,
}

impl DecoyHash {
    pub(crate) fn new(cost: u32) -> Self {
        Self {
            cost,
            hash: Arc::new(OnceLock::new()),
        }
    }

    /// Decoy with the same cost as an existing `$2b$<cost>$...` hash.
    pub(crate) fn matching(hash: &str) -> Self {
        let cost = hash
            .split('$')
            .nth(2)
            .and_then(|cost| cost.parse().ok())
            .unwrap_or(bcrypt::DEFAULT_COST);
        Self::new(cost)
    }

    /// Run a verification that is always discarded.
    pub(crate) fn check(&self, password: &str) {
        let hash = self
            .hash
            .get_or_init(|| bcrypt::hash("jwt-guard-decoy", self.cost).ok());
        if let Some(hash) = hash {
            let _ = bcrypt::verify(password, hash);
        }
    }

    #[cfg(test)]
    pub(crate) fn cost(&self) -> u32 {
        self.cost
    }

    #[cfg(test)]
    pub(crate) fn was_checked(&self) -> bool {
        self.hash.get().is_some()
    }
}

impl Default for DecoyHash {
    fn default() -> Self {
        Self::new(bcrypt::DEFAULT_COST)
    }
}

impl Authenticatable for User {
    fn auth_identifier(&self) -> String {
        self.id.clone()
    }
}

/// Raw login credentials. `username` may also hold an email address.
#[derive(Clone, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}
