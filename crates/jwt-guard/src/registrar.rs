//! Named guard drivers and guard definitions.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{debug, info};

use crate::config::{AuthConfig, GuardSettings, ProviderConfig};
use crate::directory::{SqliteDirectory, StaticDirectory};
use crate::error::GuardError;
use crate::guard::{AuthGuard, DynDirectory};
use crate::request::RequestContext;
use crate::token::{JwtEngine, TokenEngine};
use crate::user::{Authenticatable, User};

/// Everything a driver needs to build one guard.
pub struct DriverContext<U: Authenticatable> {
    pub name: String,
    pub settings: GuardSettings,
    pub directory: DynDirectory<U>,
    pub request: RequestContext,
}

/// Builds a guard for a request.
pub type DriverFactory<U> =
    Arc<dyn Fn(DriverContext<U>) -> Result<AuthGuard<U>, GuardError> + Send + Sync>;

/// Registry of drivers, user directories and named guards.
pub struct GuardRegistrar<U: Authenticatable> {
    drivers: HashMap<String, DriverFactory<U>>,
    directories: HashMap<String, DynDirectory<U>>,
    guards: HashMap<String, GuardSettings>,
    default_guard: String,
}

impl<U: Authenticatable> Default for GuardRegistrar<U> {
    fn default() -> Self {
        Self::new("api")
    }
}

impl<U: Authenticatable> GuardRegistrar<U> {
    pub fn new(default_guard: impl Into<String>) -> Self {
        Self {
            drivers: HashMap::new(),
            directories: HashMap::new(),
            guards: HashMap::new(),
            default_guard: default_guard.into(),
        }
    }

    /// Register a driver under `name`, replacing any previous one.
    pub fn extend(&mut self, name: impl Into<String>, factory: DriverFactory<U>) -> &mut Self {
        self.drivers.insert(name.into(), factory);
        self
    }

    pub fn register_directory(
        &mut self,
        name: impl Into<String>,
        directory: DynDirectory<U>,
    ) -> &mut Self {
        self.directories.insert(name.into(), directory);
        self
    }

    pub fn define_guard(&mut self, name: impl Into<String>, settings: GuardSettings) -> &mut Self {
        self.guards.insert(name.into(), settings);
        self
    }

    pub fn set_default_guard(&mut self, name: impl Into<String>) -> &mut Self {
        self.default_guard = name.into();
        self
    }

    pub fn default_guard_name(&self) -> &str {
        &self.default_guard
    }

    pub fn has_guard(&self, name: &str) -> bool {
        self.guards.contains_key(name)
    }

    pub fn directory(&self, name: &str) -> Option<&DynDirectory<U>> {
        self.directories.get(name)
    }

    /// Build the guard called `name` for `request`.
    pub fn guard(&self, name: &str, request: RequestContext) -> Result<AuthGuard<U>, GuardError> {
        let settings = self
            .guards
            .get(name)
            .ok_or_else(|| GuardError::Config(format!("auth guard [{name}] is not defined")))?;

        let factory = self.drivers.get(&settings.driver).ok_or_else(|| {
            GuardError::Config(format!(
                "auth driver [{}] for guard [{name}] is not defined",
                settings.driver
            ))
        })?;

        let directory = self.directories.get(&settings.provider).ok_or_else(|| {
            GuardError::Config(format!(
                "user provider [{}] for guard [{name}] is not defined",
                settings.provider
            ))
        })?;

        debug!(guard = name, driver = %settings.driver, "building guard");
        factory(DriverContext {
            name: name.to_string(),
            settings: settings.clone(),
            directory: Arc::clone(directory),
            request,
        })
    }

    pub fn default_guard(&self, request: RequestContext) -> Result<AuthGuard<U>, GuardError> {
        self.guard(&self.default_guard, request)
    }

    /// Driver that binds guards to a shared token engine.
    pub fn jwt_driver(engine: Arc<dyn TokenEngine>) -> DriverFactory<U> {
        Arc::new(
            move |ctx: DriverContext<U>| -> Result<AuthGuard<U>, GuardError> {
                Ok(
                    AuthGuard::new(Arc::clone(&engine), ctx.directory, ctx.request)
                        .token_required(ctx.settings.token_required),
                )
            },
        )
    }
}

impl GuardRegistrar<User> {
    /// Wire the `jwt` driver, every configured provider and every guard.
    pub async fn from_config(config: &AuthConfig) -> Result<Self> {
        config.validate()?;

        let engine: Arc<dyn TokenEngine> = Arc::new(JwtEngine::new(config.jwt.settings()?)?);

        let mut registrar = Self::new(config.default_guard.clone());
        registrar.extend("jwt", Self::jwt_driver(engine));

        for (name, provider) in &config.providers {
            let directory: DynDirectory<User> = match provider {
                ProviderConfig::Static { users } => {
                    info!(provider = %name, users = users.len(), "static user provider");
                    Arc::new(StaticDirectory::new(users.iter().cloned()))
                }
                ProviderConfig::Sqlite { path } => {
                    let path = PathBuf::from(path);
                    info!(provider = %name, path = %path.display(), "sqlite user provider");
                    Arc::new(
                        SqliteDirectory::connect(&path)
                            .await
                            .with_context(|| format!("opening user provider [{name}]"))?,
                    )
                }
            };
            registrar.register_directory(name.clone(), directory);
        }

        for (name, settings) in &config.guards {
            registrar.define_guard(name.clone(), settings.clone());
        }

        Ok(registrar)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::JwtConfig;
    use crate::directory::StaticUser;
    use crate::token::JwtSettings;
    use crate::user::{Credentials, Role};
    use axum::http::{HeaderMap, HeaderValue, Uri};

    const SECRET: &str = "registrar-test-secret-with-more-than-32-chars";

    fn static_user() -> StaticUser {
        StaticUser {
            id: "1".to_string(),
            username: "dev".to_string(),
            name: None,
            email: "dev@localhost".to_string(),
            password_hash: bcrypt::hash("devpassword123", 4).unwrap(),
            role: Role::Admin,
            active: true,
        }
    }

    fn auth_config() -> AuthConfig {
        let mut config = AuthConfig {
            jwt: JwtConfig {
                secret: Some(SECRET.to_string()),
                ..JwtConfig::default()
            },
            ..AuthConfig::default()
        };
        config.providers.insert(
            "users".to_string(),
            ProviderConfig::Static {
                users: vec![static_user()],
            },
        );
        config
    }

    fn manual_registrar() -> GuardRegistrar<User> {
        let engine: Arc<dyn TokenEngine> =
            Arc::new(JwtEngine::new(JwtSettings::new(SECRET)).unwrap());
        let mut registrar: GuardRegistrar<User> = GuardRegistrar::new("api");
        registrar
            .extend("jwt", GuardRegistrar::jwt_driver(engine))
            .register_directory("users", Arc::new(StaticDirectory::new([static_user()])))
            .define_guard("api", GuardSettings::default());
        registrar
    }

    #[tokio::test]
    async fn test_unknown_guard_is_config_error() {
        let registrar = manual_registrar();
        let err = registrar
            .guard("web", RequestContext::empty())
            .err()
            .unwrap();
        assert!(matches!(err, GuardError::Config(_)));
    }

    #[tokio::test]
    async fn test_unknown_driver_is_config_error() {
        let mut registrar = manual_registrar();
        registrar.define_guard(
            "session",
            GuardSettings {
                driver: "session".to_string(),
                ..GuardSettings::default()
            },
        );
        let err = registrar
            .guard("session", RequestContext::empty())
            .err()
            .unwrap();
        assert!(matches!(err, GuardError::Config(msg) if msg.contains("session")));
    }

    #[tokio::test]
    async fn test_unknown_provider_is_config_error() {
        let mut registrar = manual_registrar();
        registrar.define_guard(
            "admin",
            GuardSettings {
                provider: "admins".to_string(),
                ..GuardSettings::default()
            },
        );
        assert!(matches!(
            registrar.guard("admin", RequestContext::empty()),
            Err(GuardError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_custom_driver_is_used() {
        let mut registrar = manual_registrar();
        let engine: Arc<dyn TokenEngine> =
            Arc::new(JwtEngine::new(JwtSettings::new(SECRET)).unwrap());
        registrar.extend(
            "optional",
            Arc::new(
                move |ctx: DriverContext<User>| -> Result<AuthGuard<User>, GuardError> {
                    Ok(AuthGuard::new(Arc::clone(&engine), ctx.directory, ctx.request)
                        .token_required(false))
                },
            ),
        );
        registrar.define_guard(
            "public",
            GuardSettings {
                driver: "optional".to_string(),
                ..GuardSettings::default()
            },
        );

        let mut guard = registrar.guard("public", RequestContext::empty()).unwrap();
        assert!(guard.guest().await.unwrap());
    }

    #[tokio::test]
    async fn test_from_config_round_trip() {
        let registrar = GuardRegistrar::from_config(&auth_config()).await.unwrap();
        assert_eq!(registrar.default_guard_name(), "api");
        assert!(registrar.has_guard("api"));

        let mut guard = registrar.default_guard(RequestContext::empty()).unwrap();
        let attempt = guard
            .attempt(&Credentials::new("dev", "devpassword123"), true)
            .await
            .unwrap();
        let token = attempt.into_token().unwrap();

        let mut headers = HeaderMap::new();
        headers.insert(
            "authorization",
            HeaderValue::from_str(&format!("Bearer {token}")).unwrap(),
        );
        let request = RequestContext::new(headers, Uri::from_static("/"));

        let mut next = registrar.default_guard(request).unwrap();
        assert_eq!(next.id().await.unwrap().as_deref(), Some("1"));
    }

    #[tokio::test]
    async fn test_from_config_rejects_invalid_config() {
        let mut config = auth_config();
        config.jwt.secret = Some("short".to_string());
        assert!(GuardRegistrar::from_config(&config).await.is_err());
    }

    #[tokio::test]
    async fn test_guards_share_the_engine_revocations() {
        let registrar = GuardRegistrar::from_config(&auth_config()).await.unwrap();

        let mut login = registrar.default_guard(RequestContext::empty()).unwrap();
        let token = login
            .attempt(&Credentials::new("dev", "devpassword123"), true)
            .await
            .unwrap()
            .into_token()
            .unwrap();

        let mut logout = registrar.default_guard(RequestContext::empty()).unwrap();
        logout.set_token(token.clone());
        logout.logout(false).await.unwrap();

        let mut after = registrar.default_guard(RequestContext::empty()).unwrap();
        after.set_token(token);
        assert!(after.user().await.unwrap().is_none());
    }
}
