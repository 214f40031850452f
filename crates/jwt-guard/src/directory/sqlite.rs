//! SQLite-backed user directory.

use std::path::Path;
use std::str::FromStr;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use tracing::{debug, info, instrument, warn};

use super::UserDirectory;
use crate::error::GuardError;
use crate::user::{Credentials, DecoyHash, Role, User};

const USER_COLUMNS: &str = "id, username, email, display_name, password_hash, role, is_active";

/// Request to create a user.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub password: String,
    pub display_name: Option<String>,
    pub role: Role,
}

/// Directory over a `users` table.
#[derive(Debug, Clone)]
pub struct SqliteDirectory {
    pool: SqlitePool,
    bcrypt_cost: u32,
    decoy: DecoyHash,
}

impl SqliteDirectory {
    /// Open (or create) the database at `path` and run migrations.
    pub async fn connect(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating database directory: {}", parent.display()))?;
        }

        let database_url = format!("sqlite://{}?mode=rwc", path.display());

        let options = SqliteConnectOptions::from_str(&database_url)
            .context("parsing database URL")?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(std::time::Duration::from_secs(30));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .context("connecting to user database")?;

        Self::with_pool(pool).await
    }

    /// In-memory database (for testing).
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .context("parsing in-memory database URL")?;

        // Every connection to :memory: is its own database; pin exactly one.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .context("connecting to in-memory database")?;

        Self::with_pool(pool).await
    }

    async fn with_pool(pool: SqlitePool) -> Result<Self> {
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .context("running user database migrations")?;

        Ok(Self {
            pool,
            bcrypt_cost: bcrypt::DEFAULT_COST,
            decoy: DecoyHash::default(),
        })
    }

    /// Override the bcrypt cost used when creating users.
    pub fn with_bcrypt_cost(mut self, cost: u32) -> Self {
        self.bcrypt_cost = cost;
        self.decoy = DecoyHash::new(cost);
        self
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    fn generate_id() -> String {
        format!("usr_{}", nanoid::nanoid!(12))
    }

    /// Create a user, hashing the password.
    #[instrument(skip(self, request), fields(username = %request.username))]
    pub async fn create_user(&self, request: NewUser) -> Result<User> {
        if request.password.len() < 8 {
            bail!("Password must be at least 8 characters.");
        }

        let id = Self::generate_id();
        let display_name = request
            .display_name
            .unwrap_or_else(|| request.username.clone());
        let password_hash =
            bcrypt::hash(&request.password, self.bcrypt_cost).context("hashing password")?;

        debug!("Creating user: {} ({})", request.username, id);

        sqlx::query(
            r#"
            INSERT INTO users (id, username, email, display_name, password_hash, role)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(&request.username)
        .bind(&request.email)
        .bind(&display_name)
        .bind(&password_hash)
        .bind(request.role.to_string())
        .execute(&self.pool)
        .await
        .context("Failed to insert user")?;

        info!(user_id = %id, "Created user");

        self.fetch_by_id(&id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("User not found after creation"))
    }

    /// Enable or disable a user.
    pub async fn set_active(&self, id: &str, active: bool) -> Result<bool> {
        let result = sqlx::query("UPDATE users SET is_active = ? WHERE id = ?")
            .bind(active)
            .bind(id)
            .execute(&self.pool)
            .await
            .context("Failed to update user")?;
        Ok(result.rows_affected() > 0)
    }

    async fn fetch_by_id(&self, id: &str) -> Result<Option<User>, sqlx::Error> {
        sqlx::query_as::<_, User>(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
    }

    async fn touch_last_login(&self, id: &str) {
        let result = sqlx::query(
            "UPDATE users SET last_login_at = strftime('%Y-%m-%dT%H:%M:%SZ', 'now') WHERE id = ?",
        )
        .bind(id)
        .execute(&self.pool)
        .await;

        if let Err(e) = result {
            warn!(user_id = %id, "Failed to update last login: {:?}", e);
        }
    }
}

#[async_trait]
impl UserDirectory for SqliteDirectory {
    type User = User;

    #[instrument(skip(self))]
    async fn resolve_by_id(&self, id: &str) -> Result<Option<User>, GuardError> {
        Ok(self.fetch_by_id(id).await?)
    }

    #[instrument(skip(self, credentials), fields(username = %credentials.username))]
    async fn resolve_by_credentials(
        &self,
        credentials: &Credentials,
    ) -> Result<Option<User>, GuardError> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE username = ? OR email = ? LIMIT 1"
        ))
        .bind(&credentials.username)
        .bind(&credentials.username)
        .fetch_optional(&self.pool)
        .await?;

        if user.is_none() {
            self.decoy.check(&credentials.password);
        }
        Ok(user)
    }

    #[instrument(skip(self, user, credentials), fields(user_id = %user.id))]
    async fn validate_credentials(
        &self,
        user: &User,
        credentials: &Credentials,
    ) -> Result<bool, GuardError> {
        if !user.is_active || !user.verify_password(&credentials.password) {
            return Ok(false);
        }

        self.touch_last_login(&user.id).await;
        Ok(true)
    }
}
