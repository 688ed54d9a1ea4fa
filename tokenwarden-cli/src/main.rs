//! Tokenwarden CLI
//!
//! Command-line host for the Vault JWT manager.
//!
//! # Usage
//!
//! ```bash
//! # Exchange the seed once and print the JWT
//! tokenwarden --addr https://vault.internal:8200 --secret-id edge-role --seed seed.json token
//!
//! # Keep the JWT fresh and log lifecycle events until Ctrl+C
//! tokenwarden watch
//!
//! # Validate a seed document offline
//! tokenwarden check-seed /run/secrets/vault-seed.json
//! ```

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use tokenwarden_core::{ManagerEvent, SecretManager, SecretRegistry, read_seed_file};

mod config;

#[derive(Parser)]
#[command(name = "tokenwarden")]
#[command(about = "Keeps a Vault-issued OIDC JWT fresh")]
#[command(version)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to a TOML config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(flatten)]
    connection: ConnectionArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct ConnectionArgs {
    /// Vault address (scheme://host[:port])
    #[arg(long, global = true, env = "VAULT_ADDR")]
    addr: Option<String>,

    /// Vault host name or address
    #[arg(long, global = true)]
    host: Option<String>,

    /// Vault port
    #[arg(long, global = true)]
    port: Option<u16>,

    /// URL scheme (http, https)
    #[arg(long, global = true)]
    scheme: Option<String>,

    /// OIDC role to issue the JWT for
    #[arg(long, global = true)]
    secret_id: Option<String>,

    /// Path to the seed document
    #[arg(long, global = true)]
    seed: Option<PathBuf>,

    /// Fraction of the TTL after which to renew
    #[arg(long, global = true)]
    renewal_factor: Option<f64>,
}

impl From<ConnectionArgs> for config::Overrides {
    fn from(args: ConnectionArgs) -> Self {
        Self {
            addr: args.addr,
            host: args.host,
            port: args.port,
            scheme: args.scheme,
            secret_id: args.secret_id,
            seed_path: args.seed,
            renewal_factor: args.renewal_factor,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Exchange the seed for a JWT and print it
    Token {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Keep the JWT renewed and log events until interrupted
    Watch,

    /// Validate a seed document without contacting Vault
    CheckSeed {
        /// Path to the seed document
        path: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let settings = config::load_config(cli.config.as_deref())?.merge(cli.connection.into());
    init_logging(cli.verbose, settings.log_level());
    if let Some(path) = &settings.config_path {
        debug!("Loaded configuration from {:?}", path);
    }

    match cli.command {
        Commands::Token { format } => print_token(&settings, &format).await,
        Commands::Watch => watch(&settings).await,
        Commands::CheckSeed { path } => check_seed(&path).await,
    }
}

fn init_logging(verbose: bool, default_level: &str) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level))
    };

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

async fn open_manager(settings: &config::CliConfig) -> Result<SecretManager> {
    let manager_config = settings.manager_config()?;
    let seed_path = settings.seed_path()?;

    let registry = SecretRegistry::new();
    SecretManager::connect(&registry, manager_config, seed_path)
        .await
        .context("failed to open secret manager")
}

async fn print_token(settings: &config::CliConfig, format: &str) -> Result<()> {
    if !matches!(format, "text" | "json") {
        bail!("unknown output format '{}': expected text or json", format);
    }

    let manager = open_manager(settings).await?;
    let result = manager.start().await;
    if let Err(e) = result {
        manager.stop();
        return Err(e).context("token exchange failed");
    }

    let context = manager
        .auth_context()
        .context("manager reported ready without a token")?;

    match format {
        "json" => {
            let output = serde_json::json!({
                "token": context.token.expose(),
                "ttl": context.ttl,
                "expires_at": context.expires_at().to_rfc3339(),
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        _ => println!("{}", context.token.expose()),
    }

    manager.stop();
    Ok(())
}

async fn watch(settings: &config::CliConfig) -> Result<()> {
    let manager = open_manager(settings).await?;
    let mut events = manager.subscribe();

    manager.start().await.context("token exchange failed")?;
    info!("JWT ready. Press Ctrl+C to stop.");

    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal?;
                info!("Shutdown signal received");
                break;
            }
            event = events.recv() => match event {
                Ok(event) => log_event(&event),
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "Event subscriber lagged"),
                Err(RecvError::Closed) => break,
            },
        }
    }

    manager.stop();
    info!("Stopped");
    Ok(())
}

fn log_event(event: &ManagerEvent) {
    match event {
        ManagerEvent::Ready { ttl } => info!(ttl, "JWT issued"),
        ManagerEvent::RenewalScheduled { delay } => {
            info!("Next renewal in {:.1}s", delay.as_secs_f64())
        }
        ManagerEvent::Renewed { ttl } => info!(ttl, "JWT renewed"),
        ManagerEvent::RenewalFailed {
            error,
            attempt,
            retry_in,
        } => error!(
            attempt,
            "Renewal failed: {}; retrying in {:.1}s",
            error,
            retry_in.as_secs_f64()
        ),
        ManagerEvent::Stopped => debug!("Manager stopped"),
    }
}

async fn check_seed(path: &Path) -> Result<()> {
    read_seed_file(path)
        .await
        .with_context(|| format!("seed document {:?} is not usable", path))?;
    println!("Seed document {:?} is valid", path);
    Ok(())
}
