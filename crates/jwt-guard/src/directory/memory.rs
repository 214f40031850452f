//! Users declared in configuration.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::UserDirectory;
use crate::error::GuardError;
use crate::user::{Credentials, DecoyHash, Role, User};

/// A user entry in the config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StaticUser {
    /// User ID.
    pub id: String,
    /// Login name.
    pub username: String,
    /// Display name.
    #[serde(default)]
    pub name: Option<String>,
    /// Email address.
    pub email: String,
    /// Password hash (bcrypt).
    pub password_hash: String,
    /// Role.
    #[serde(default)]
    pub role: Role,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

impl From<StaticUser> for User {
    fn from(user: StaticUser) -> Self {
        Self {
            display_name: user.name.unwrap_or_else(|| user.username.clone()),
            id: user.id,
            username: user.username,
            email: user.email,
            password_hash: Some(user.password_hash),
            role: user.role,
            is_active: user.active,
        }
    }
}

/// Read-only directory over a fixed user list.
#[derive(Debug, Clone, Default)]
pub struct StaticDirectory {
    users: Vec<User>,
    decoy: DecoyHash,
}

impl StaticDirectory {
    pub fn new(users: impl IntoIterator<Item = StaticUser>) -> Self {
        Self::from_users(users.into_iter().map(User::from).collect())
    }

    pub fn from_users(users: Vec<User>) -> Self {
        let decoy = users
            .iter()
            .find_map(|u| u.password_hash.as_deref())
            .map(DecoyHash::matching)
            .unwrap_or_default();
        Self { users, decoy }
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

#[async_trait]
impl UserDirectory for StaticDirectory {
    type User = User;

    async fn resolve_by_id(&self, id: &str) -> Result<Option<User>, GuardError> {
        Ok(self.users.iter().find(|u| u.id == id).cloned())
    }

    async fn resolve_by_credentials(
        &self,
        credentials: &Credentials,
    ) -> Result<Option<User>, GuardError> {
        let login = credentials.username.as_str();
        let user = self
            .users
            .iter()
            .find(|u| u.username == login || u.email == login)
            .cloned();
        if user.is_none() {
            self.decoy.check(&credentials.password);
        }
        Ok(user)
    }

    async fn validate_credentials(
        &self,
        user: &User,
        credentials: &Credentials,
    ) -> Result<bool, GuardError> {
        Ok(user.is_active && user.verify_password(&credentials.password))
    }
}
