//! Configuration: guards, user providers and the JWT engine.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use config::{Config, Environment, File, FileFormat};
use jsonwebtoken::Algorithm;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::directory::StaticUser;
use crate::token::jwt::is_hmac;
use crate::token::{JwtSettings, TokenParser, TokenSource};

pub const APP_NAME: &str = "jwt-guard";
const ENV_PREFIX: &str = "JWT_GUARD";
const INSECURE_SECRET: &str = "change-me-to-a-long-random-secret";
const MIN_SECRET_LEN: usize = 32;

/// Top-level configuration file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub auth: AuthConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address the reference HTTP host listens on.
    pub listen: String,
    /// Mark auth cookies `Secure`.
    pub secure_cookies: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:8080".to_string(),
            secure_cookies: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Authentication configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Guard used when none is named.
    pub default_guard: String,
    pub jwt: JwtConfig,
    /// Guard name to driver/provider binding.
    pub guards: BTreeMap<String, GuardSettings>,
    /// Provider name to user directory definition.
    pub providers: BTreeMap<String, ProviderConfig>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        let mut guards = BTreeMap::new();
        guards.insert("api".to_string(), GuardSettings::default());

        let mut providers = BTreeMap::new();
        providers.insert(
            "users".to_string(),
            ProviderConfig::Static { users: Vec::new() },
        );

        Self {
            default_guard: "api".to_string(),
            jwt: JwtConfig::default(),
            guards,
            providers,
        }
    }
}

/// Binding of one named guard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardSettings {
    /// Registered driver name (`jwt`).
    pub driver: String,
    /// Name of an entry in `providers`.
    pub provider: String,
    /// Reject requests that carry no token with `MissingToken`.
    pub token_required: bool,
}

impl Default for GuardSettings {
    fn default() -> Self {
        Self {
            driver: "jwt".to_string(),
            provider: "users".to_string(),
            token_required: true,
        }
    }
}

/// A user directory definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "driver", rename_all = "lowercase")]
pub enum ProviderConfig {
    /// Users listed inline.
    Static {
        #[serde(default)]
        users: Vec<StaticUser>,
    },
    /// Users stored in a SQLite database.
    Sqlite { path: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JwtConfig {
    /// HMAC secret, or `env:VAR_NAME` to read it from the environment.
    pub secret: Option<String>,
    pub algorithm: Algorithm,
    pub issuer: Option<String>,
    pub ttl_secs: i64,
    pub refresh_ttl_secs: i64,
    pub leeway_secs: u64,
    /// Token lookup order.
    pub sources: Vec<TokenSource>,
    pub query_param: String,
    pub cookie_name: String,
}

impl Default for JwtConfig {
    fn default() -> Self {
        Self {
            // No default secret - must be explicitly configured
            secret: None,
            algorithm: Algorithm::HS256,
            issuer: Some(APP_NAME.to_string()),
            ttl_secs: 60 * 60,
            refresh_ttl_secs: 60 * 60 * 24 * 14,
            leeway_secs: 0,
            sources: TokenSource::default_order(),
            query_param: "token".to_string(),
            cookie_name: "auth_token".to_string(),
        }
    }
}

impl JwtConfig {
    /// Resolve the secret, expanding `env:VAR_NAME` syntax.
    pub fn resolve_secret(&self) -> Result<Option<String>, ConfigValidationError> {
        match &self.secret {
            None => Ok(None),
            Some(value) => {
                if let Some(var_name) = value.strip_prefix("env:") {
                    match std::env::var(var_name) {
                        Ok(secret) if !secret.is_empty() => Ok(Some(secret)),
                        Ok(_) => Err(ConfigValidationError::EnvVarEmpty(var_name.to_string())),
                        Err(_) => Err(ConfigValidationError::EnvVarNotFound(var_name.to_string())),
                    }
                } else {
                    Ok(Some(value.clone()))
                }
            }
        }
    }

    /// Engine settings with the secret resolved and checked.
    pub fn settings(&self) -> Result<JwtSettings, ConfigValidationError> {
        let secret = self
            .resolve_secret()?
            .ok_or(ConfigValidationError::MissingJwtSecret)?;

        if secret == INSECURE_SECRET {
            return Err(ConfigValidationError::InsecureJwtSecret);
        }
        if secret.len() < MIN_SECRET_LEN {
            return Err(ConfigValidationError::JwtSecretTooShort);
        }
        if !is_hmac(self.algorithm) {
            return Err(ConfigValidationError::UnsupportedAlgorithm(format!(
                "{:?}",
                self.algorithm
            )));
        }
        if self.ttl_secs <= 0 {
            return Err(ConfigValidationError::InvalidTtl);
        }
        if self.refresh_ttl_secs < 0 {
            return Err(ConfigValidationError::InvalidRefreshTtl);
        }

        Ok(JwtSettings {
            secret,
            algorithm: self.algorithm,
            issuer: self.issuer.clone(),
            ttl_secs: self.ttl_secs,
            refresh_ttl_secs: self.refresh_ttl_secs,
            leeway_secs: self.leeway_secs,
            parser: TokenParser::new(
                self.sources.clone(),
                self.query_param.clone(),
                self.cookie_name.clone(),
            ),
        })
    }
}

impl AuthConfig {
    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        self.jwt.settings()?;

        if !self.guards.contains_key(&self.default_guard) {
            return Err(ConfigValidationError::UnknownGuard(
                self.default_guard.clone(),
            ));
        }

        for (name, guard) in &self.guards {
            if !self.providers.contains_key(&guard.provider) {
                return Err(ConfigValidationError::UnknownProvider {
                    guard: name.clone(),
                    provider: guard.provider.clone(),
                });
            }
        }

        Ok(())
    }

    /// Generate a secure random JWT secret using cryptographically secure RNG.
    pub fn generate_jwt_secret() -> String {
        use rand::Rng;

        const CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";
        const SECRET_LENGTH: usize = 64;

        let mut rng = rand::rng();
        (0..SECRET_LENGTH)
            .map(|_| {
                let idx = rng.random_range(0..CHARSET.len());
                CHARSET[idx] as char
            })
            .collect()
    }
}

/// Configuration validation errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigValidationError {
    #[error(
        "JWT secret is required. Set JWT_GUARD__AUTH__JWT__SECRET or auth.jwt.secret in config."
    )]
    MissingJwtSecret,
    #[error("JWT secret cannot be the placeholder value. Please configure a secure secret.")]
    InsecureJwtSecret,
    #[error("JWT secret must be at least 32 characters long for security.")]
    JwtSecretTooShort,
    #[error("JWT algorithm {0} is not supported; use HS256, HS384 or HS512.")]
    UnsupportedAlgorithm(String),
    #[error("JWT ttl_secs must be positive.")]
    InvalidTtl,
    #[error("JWT refresh_ttl_secs cannot be negative.")]
    InvalidRefreshTtl,
    #[error("default guard '{0}' is not defined in auth.guards.")]
    UnknownGuard(String),
    #[error("guard '{guard}' references undefined provider '{provider}'.")]
    UnknownProvider { guard: String, provider: String },
    #[error("Environment variable '{0}' not found (referenced via env:{0} in config).")]
    EnvVarNotFound(String),
    #[error("Environment variable '{0}' is empty (referenced via env:{0} in config).")]
    EnvVarEmpty(String),
}

/// Default config file location (`$XDG_CONFIG_HOME/jwt-guard/config.toml`).
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(APP_NAME).join("config.toml"))
}

/// Load configuration from defaults, an optional TOML file and the
/// environment (`JWT_GUARD__SECTION__KEY`).
pub fn load_config(path: Option<&Path>) -> Result<AppConfig> {
    let mut builder = Config::builder()
        .set_default("logging.level", "info")?
        .set_default("server.listen", ServerConfig::default().listen)?;

    let file = path.map(Path::to_path_buf).or_else(default_config_path);
    if let Some(ref file) = file {
        builder = builder.add_source(
            File::from(file.as_path())
                .format(FileFormat::Toml)
                .required(path.is_some()),
        );
    }

    let built = builder
        .add_source(Environment::with_prefix(ENV_PREFIX).separator("__"))
        .build()
        .context("building configuration")?;

    let config: AppConfig = built
        .try_deserialize()
        .context("deserializing configuration")?;

    Ok(config)
}

/// Render the default configuration as TOML, with a header comment.
pub fn default_config_toml() -> Result<String> {
    let mut config = AppConfig::default();
    config.auth.jwt.secret = Some(format!("env:{ENV_PREFIX}_SECRET"));

    let body = toml::to_string_pretty(&config).context("serializing default config to TOML")?;
    Ok(format!(
        "# {APP_NAME} configuration\n# Environment overrides use {ENV_PREFIX}__SECTION__KEY.\n\n{body}"
    ))
}
