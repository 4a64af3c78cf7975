//! hotcopyd: plaintext ↔ ciphertext directory mirror daemon
//!
//! Usage:
//!   HC_PASSWORD=... hotcopyd [--config /etc/hotcopy/config.toml]
//!                            [--plain /data] [--cipher /enc-data]
//!
//! Environment:
//!   HC_PASSWORD  - password the AES key is derived from (required)
//!   PUID / PGID  - owner applied to every mirrored entry (optional)

mod daemon;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use hotcopy_core::config::HotcopyConfig;
use secrecy::SecretString;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "hotcopyd", version, about = "Encrypted directory mirror daemon")]
struct Cli {
    /// Path to config.toml
    #[arg(
        long,
        short = 'c',
        env = "HOTCOPY_CONFIG",
        default_value = "/etc/hotcopy/config.toml"
    )]
    config: PathBuf,

    /// Plaintext tree (overrides [mirror] plain_root)
    #[arg(long)]
    plain: Option<PathBuf>,

    /// Ciphertext tree (overrides [mirror] cipher_root)
    #[arg(long)]
    cipher: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "HOTCOPY_LOG")]
    log: Option<String>,

    /// Log format (json, text)
    #[arg(long, env = "HOTCOPY_LOG_FORMAT")]
    log_format: Option<LogFormat>,

    /// Owner uid for mirrored entries
    #[arg(long, env = "PUID")]
    uid: Option<u32>,

    /// Owner gid for mirrored entries
    #[arg(long, env = "PGID")]
    gid: Option<u32>,

    #[arg(long, env = "HC_PASSWORD", hide = true, hide_env_values = true)]
    password: Option<String>,
}

#[derive(Clone, Debug, ValueEnum, PartialEq)]
enum LogFormat {
    Json,
    Text,
}

#[tokio::main]
async fn main() -> Result<()> {
    let mut cli = Cli::parse();

    let loaded = load_config(&cli.config).await?;
    let found = loaded.is_some();
    let mut config = loaded.unwrap_or_default();
    apply_overrides(&mut config, &cli);

    let format = match &cli.log_format {
        Some(format) => format.clone(),
        None => <LogFormat as ValueEnum>::from_str(&config.daemon.log_format, true)
            .map_err(|e| anyhow::anyhow!("invalid log_format in config: {e}"))?,
    };
    init_logging(&config.daemon.log_level, &format)?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %cli.config.display(),
        plain = %config.mirror.plain_root.display(),
        cipher = %config.mirror.cipher_root.display(),
        "hotcopyd starting"
    );
    if !found {
        tracing::warn!(
            "config file not found: {}  (using defaults)",
            cli.config.display()
        );
    }

    let password = take_password(cli.password.take())?;
    daemon::run(config, password).await
}

async fn load_config(path: &Path) -> Result<Option<HotcopyConfig>> {
    if !path.exists() {
        return Ok(None);
    }
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("reading config {}", path.display()))?;
    let config = toml::from_str(&content)
        .with_context(|| format!("parsing config {}", path.display()))?;
    Ok(Some(config))
}

/// Fold command line and environment inputs into the loaded config.
fn apply_overrides(config: &mut HotcopyConfig, cli: &Cli) {
    if let Some(plain) = &cli.plain {
        config.mirror.plain_root = plain.clone();
    }
    if let Some(cipher) = &cli.cipher {
        config.mirror.cipher_root = cipher.clone();
    }
    if let Some(level) = &cli.log {
        config.daemon.log_level = level.clone();
    }
    if let Some(format) = &cli.log_format {
        config.daemon.log_format = match format {
            LogFormat::Json => "json".into(),
            LogFormat::Text => "text".into(),
        };
    }
    if cli.uid.is_some() {
        config.ownership.uid = cli.uid;
    }
    if cli.gid.is_some() {
        config.ownership.gid = cli.gid;
    }
}

fn take_password(raw: Option<String>) -> Result<SecretString> {
    match raw {
        Some(password) if !password.is_empty() => Ok(SecretString::from(password)),
        _ => anyhow::bail!("HC_PASSWORD is not set"),
    }
}

fn init_logging(level: &str, format: &LogFormat) -> Result<()> {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(level)
            .with_context(|| format!("invalid log level {level:?}"))?,
    };

    let registry = tracing_subscriber::registry().with(filter);
    let installed = match format {
        LogFormat::Json => registry.with(fmt::layer().json()).try_init(),
        LogFormat::Text => registry.with(fmt::layer()).try_init(),
    };
    installed.context("installing tracing subscriber")
}
