//! User directory contract and bundled implementations.

pub mod memory;
pub mod sqlite;

use async_trait::async_trait;

use crate::error::GuardError;
use crate::user::{Authenticatable, Credentials};

pub use memory::{StaticDirectory, StaticUser};
pub use sqlite::{NewUser, SqliteDirectory};

/// Resolves identities to user records and checks raw credentials.
///
/// "No such user" is `Ok(None)`. `Err` is reserved for backend failures and
/// unsupported capabilities.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    type User: Authenticatable;

    /// Look a user up by the identifier carried in the subject claim.
    async fn resolve_by_id(&self, id: &str) -> Result<Option<Self::User>, GuardError>;

    /// Look a user up by the non-secret part of the credentials.
    async fn resolve_by_credentials(
        &self,
        _credentials: &Credentials,
    ) -> Result<Option<Self::User>, GuardError> {
        Err(GuardError::unsupported(
            "user directory",
            "resolve_by_credentials",
        ))
    }

    /// Check the secret part of the credentials against a resolved user.
    async fn validate_credentials(
        &self,
        _user: &Self::User,
        _credentials: &Credentials,
    ) -> Result<bool, GuardError> {
        Err(GuardError::unsupported(
            "user directory",
            "validate_credentials",
        ))
    }
}
