use std::env;
use std::fs;
use std::io::{self, IsTerminal, Write};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow, bail};
use clap::{Args, Parser, Subcommand};
use log::{LevelFilter, debug, info};
use tokio::net::TcpListener;

use jwt_guard::api::{self, AppState};
use jwt_guard::config::{
    self as app_config, APP_NAME, AppConfig, AuthConfig, ProviderConfig, default_config_path,
};
use jwt_guard::directory::{NewUser, SqliteDirectory};
use jwt_guard::registrar::GuardRegistrar;
use jwt_guard::request::RequestContext;
use jwt_guard::user::Role;

fn main() {
    if let Err(err) = try_main() {
        let _ = writeln!(io::stderr(), "{err:?}");
        std::process::exit(1);
    }
}

fn try_main() -> Result<()> {
    let cli = Cli::parse();

    let ctx = RuntimeContext::new(cli.common.clone())?;
    ctx.init_logging()?;
    debug!("config file: {:?}", ctx.config_file);

    match cli.command {
        Command::Serve(cmd) => async_serve(ctx, cmd),
        Command::HashPassword(cmd) => handle_hash_password(&ctx, cmd),
        Command::GenerateSecret => handle_generate_secret(&ctx),
        Command::IssueToken(cmd) => async_issue_token(ctx, cmd),
        Command::UserAdd(cmd) => async_user_add(ctx, cmd),
        Command::Config { command } => handle_config(&ctx, command),
    }
}

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "jwt-guard - stateless bearer-token authentication.",
    propagate_version = true
)]
struct Cli {
    #[command(flatten)]
    common: CommonOpts,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Args)]
struct CommonOpts {
    /// Override the config file path
    #[arg(long, value_name = "PATH", global = true, env = "JWT_GUARD_CONFIG")]
    config: Option<PathBuf>,
    /// Reduce output to only errors
    #[arg(short, long, action = clap::ArgAction::SetTrue, global = true)]
    quiet: bool,
    /// Increase logging verbosity (stackable)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count, global = true)]
    verbose: u8,
    /// Enable debug logging (equivalent to -vv)
    #[arg(long, global = true)]
    debug: bool,
    /// Enable trace logging (overrides other levels)
    #[arg(long, global = true)]
    trace: bool,
    /// Output machine readable JSON
    #[arg(long, global = true)]
    json: bool,
    /// Disable ANSI colors in output
    #[arg(long = "no-color", global = true)]
    no_color: bool,
    /// Emit additional diagnostics for troubleshooting
    #[arg(long = "diagnostics", global = true)]
    diagnostics: bool,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the HTTP auth API
    Serve(ServeCommand),
    /// Print a bcrypt hash for a static user entry
    HashPassword(HashPasswordCommand),
    /// Print a fresh JWT signing secret
    GenerateSecret,
    /// Issue a token for a user id
    IssueToken(IssueTokenCommand),
    /// Create a user in a sqlite provider
    UserAdd(UserAddCommand),
    /// Inspect or initialize configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

#[derive(Debug, Clone, Args)]
struct ServeCommand {
    /// Address to listen on (overrides server.listen)
    #[arg(long, value_name = "ADDR")]
    listen: Option<String>,
}

#[derive(Debug, Clone, Args)]
struct HashPasswordCommand {
    password: String,
    /// bcrypt cost factor
    #[arg(long, default_value_t = bcrypt::DEFAULT_COST)]
    cost: u32,
}

#[derive(Debug, Clone, Args)]
struct IssueTokenCommand {
    /// User identifier (token subject)
    user_id: String,
    /// Guard to issue through (defaults to auth.default_guard)
    #[arg(long)]
    guard: Option<String>,
}

#[derive(Debug, Clone, Args)]
struct UserAddCommand {
    #[arg(long)]
    username: String,
    #[arg(long)]
    email: String,
    #[arg(long, env = "JWT_GUARD_USER_PASSWORD")]
    password: String,
    #[arg(long = "display-name")]
    display_name: Option<String>,
    /// Create the user with the admin role
    #[arg(long)]
    admin: bool,
    /// Provider to add the user to
    #[arg(long, default_value = "users")]
    provider: String,
}

#[derive(Debug, Subcommand)]
enum ConfigCommand {
    /// Write the default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
    /// Print the effective configuration (secret redacted)
    Show,
}

#[derive(Debug, Clone)]
struct RuntimeContext {
    common: CommonOpts,
    config_file: Option<PathBuf>,
    config: AppConfig,
}

impl RuntimeContext {
    fn new(common: CommonOpts) -> Result<Self> {
        let config_file = common.config.clone().or_else(default_config_path);
        let config = app_config::load_config(common.config.as_deref())?;
        Ok(Self {
            common,
            config_file,
            config,
        })
    }

    fn init_logging(&self) -> Result<()> {
        use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

        if self.common.quiet {
            log::set_max_level(LevelFilter::Off);
            return Ok(());
        }

        let level = match self.effective_log_level() {
            LevelFilter::Off => "off",
            LevelFilter::Error => "error",
            LevelFilter::Warn => "warn",
            LevelFilter::Info => "info",
            LevelFilter::Debug => "debug",
            LevelFilter::Trace => "trace",
        };

        let env_filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(format!("jwt_guard={level},tower_http={level}")));

        if self.common.json {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json())
                .try_init()
                .ok();
        } else {
            let disable_color = self.common.no_color
                || env::var_os("NO_COLOR").is_some()
                || !io::stderr().is_terminal();

            tracing_subscriber::registry()
                .with(env_filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_writer(io::stderr)
                        .with_ansi(!disable_color)
                        .with_target(self.common.diagnostics)
                        .with_file(self.common.diagnostics)
                        .with_line_number(self.common.diagnostics),
                )
                .try_init()
                .ok();
        }

        // log crate users (token parsing) go through env_logger
        let mut builder =
            env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
        builder.filter_level(self.effective_log_level());
        builder.try_init().ok();

        Ok(())
    }

    /// Level from flags, falling back to `logging.level` from config.
    fn effective_log_level(&self) -> LevelFilter {
        if self.common.trace {
            LevelFilter::Trace
        } else if self.common.debug {
            LevelFilter::Debug
        } else {
            match self.common.verbose {
                0 => self
                    .config
                    .logging
                    .level
                    .parse()
                    .unwrap_or(LevelFilter::Info),
                1 => LevelFilter::Debug,
                _ => LevelFilter::Trace,
            }
        }
    }

    fn auth(&self) -> &AuthConfig {
        &self.config.auth
    }
}

#[tokio::main]
async fn async_serve(ctx: RuntimeContext, cmd: ServeCommand) -> Result<()> {
    let registrar = GuardRegistrar::from_config(ctx.auth())
        .await
        .context("initializing auth guards")?;

    let state = AppState::new(Arc::new(registrar))
        .with_cookie_name(ctx.auth().jwt.cookie_name.clone())
        .with_secure_cookies(ctx.config.server.secure_cookies);
    let app = api::router(state);

    let listen = cmd.listen.unwrap_or_else(|| ctx.config.server.listen.clone());
    let listener = TcpListener::bind(&listen)
        .await
        .with_context(|| format!("binding {listen}"))?;
    info!("listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("running HTTP server")?;

    info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        log::error!("failed to listen for shutdown signal: {e}");
    }
}

fn handle_hash_password(ctx: &RuntimeContext, cmd: HashPasswordCommand) -> Result<()> {
    let hash = bcrypt::hash(&cmd.password, cmd.cost).context("hashing password")?;
    if ctx.common.json {
        println!("{}", serde_json::json!({ "password_hash": hash }));
    } else {
        println!("{hash}");
    }
    Ok(())
}

fn handle_generate_secret(ctx: &RuntimeContext) -> Result<()> {
    let secret = AuthConfig::generate_jwt_secret();
    if ctx.common.json {
        println!("{}", serde_json::json!({ "secret": secret }));
    } else {
        println!("{secret}");
    }
    Ok(())
}

#[tokio::main]
async fn async_issue_token(ctx: RuntimeContext, cmd: IssueTokenCommand) -> Result<()> {
    let registrar = GuardRegistrar::from_config(ctx.auth())
        .await
        .context("initializing auth guards")?;

    let guard_name = cmd
        .guard
        .unwrap_or_else(|| registrar.default_guard_name().to_string());
    let guard = registrar.guard(&guard_name, RequestContext::empty())?;

    let token = guard
        .issue_token_for_id(&cmd.user_id)
        .await?
        .ok_or_else(|| anyhow!("no user with id '{}' in guard '{guard_name}'", cmd.user_id))?;

    if ctx.common.json {
        println!(
            "{}",
            serde_json::json!({
                "token": token.as_str(),
                "token_type": "bearer",
                "expires_in": ctx.auth().jwt.ttl_secs,
            })
        );
    } else {
        println!("{token}");
    }
    Ok(())
}

#[tokio::main]
async fn async_user_add(ctx: RuntimeContext, cmd: UserAddCommand) -> Result<()> {
    let path = match ctx.auth().providers.get(&cmd.provider) {
        Some(ProviderConfig::Sqlite { path }) => PathBuf::from(path),
        Some(ProviderConfig::Static { .. }) => bail!(
            "provider '{}' is static; add users to the config file instead (see `hash-password`)",
            cmd.provider
        ),
        None => bail!("provider '{}' is not configured", cmd.provider),
    };

    let directory = SqliteDirectory::connect(&path).await?;
    let user = directory
        .create_user(NewUser {
            username: cmd.username,
            email: cmd.email,
            password: cmd.password,
            display_name: cmd.display_name,
            role: if cmd.admin { Role::Admin } else { Role::User },
        })
        .await?;

    if ctx.common.json {
        println!("{}", serde_json::to_string_pretty(&user)?);
    } else {
        println!("created user {} ({}, {})", user.username, user.id, user.role);
    }
    Ok(())
}

fn handle_config(ctx: &RuntimeContext, command: ConfigCommand) -> Result<()> {
    match command {
        ConfigCommand::Init { force } => {
            let path = ctx
                .config_file
                .clone()
                .ok_or_else(|| anyhow!("could not determine config directory"))?;

            if path.exists() && !force {
                bail!(
                    "{} already exists (use --force to overwrite)",
                    path.display()
                );
            }
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("creating config directory {}", parent.display()))?;
            }

            fs::write(&path, app_config::default_config_toml()?)
                .with_context(|| format!("writing config file {}", path.display()))?;
            info!("wrote {}", path.display());
            if !ctx.common.quiet {
                println!("{}", path.display());
            }
        }
        ConfigCommand::Show => {
            let mut config = ctx.config.clone();
            if config.auth.jwt.secret.is_some() {
                config.auth.jwt.secret = Some("<redacted>".to_string());
            }

            if ctx.common.json {
                println!("{}", serde_json::to_string_pretty(&config)?);
            } else {
                print!(
                    "{}",
                    toml::to_string_pretty(&config).context("serializing config to TOML")?
                );
            }

            if let Err(e) = ctx.auth().validate() {
                log::warn!("{APP_NAME} configuration is not usable: {e}");
            }
        }
    }
    Ok(())
}
