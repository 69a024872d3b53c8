//! # tally
//!
//! tally server binary: loads settings, wires the verifier into the server,
//! and serves the expense API and change stream until ctrl-c.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tally_auth::{JwtVerifier, issue_token};
use tally_core::logging::{LogFormat, init_subscriber};
use tally_server::config::ServerConfig;
use tally_server::server::TallyServer;
use tally_settings::TallySettings;

/// tally expense server.
#[derive(Parser, Debug)]
#[command(name = "tally", about = "Expense API with a real-time change stream")]
struct Cli {
    /// Settings file (defaults to `~/.tally/settings.json`).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind (overrides settings; 0 for auto-assign).
    #[arg(long)]
    port: Option<u16>,

    /// Log filter directive (overrides settings; `RUST_LOG` still wins).
    #[arg(long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print a signed token for a user and exit.
    Token {
        /// User ID to embed in the token.
        user_id: String,

        /// Lifetime in seconds; omit for a non-expiring token.
        #[arg(long)]
        ttl_secs: Option<i64>,
    },
}

impl Cli {
    /// Fold command-line overrides into the loaded settings.
    fn apply(&self, settings: &mut TallySettings) {
        if let Some(host) = &self.host {
            settings.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if let Some(level) = &self.log_level {
            settings.logging.level.clone_from(level);
        }
    }
}

fn load(cli: &Cli) -> Result<TallySettings> {
    let path = cli
        .config
        .clone()
        .unwrap_or_else(tally_settings::settings_path);
    let mut settings = tally_settings::load_settings_from_path(&path)
        .with_context(|| format!("Failed to load settings from {}", path.display()))?;
    cli.apply(&mut settings);
    settings.validate().context("Invalid settings")?;
    Ok(settings)
}

/// Stderr subscriber used while settings load, before the configured one
/// exists. Only warnings and errors get through.
fn bootstrap_subscriber() -> impl tracing::Subscriber + Send + Sync {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::WARN)
        .with_writer(std::io::stderr)
        .compact()
        .finish()
}

fn server_config(settings: &TallySettings) -> ServerConfig {
    ServerConfig {
        host: settings.server.host.clone(),
        port: settings.server.port,
        allowed_origins: settings.server.allowed_origins.clone(),
        ..ServerConfig::default()
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = tracing::subscriber::with_default(bootstrap_subscriber(), || load(&cli))?;

    if let Some(Command::Token { user_id, ttl_secs }) = &cli.command {
        let ttl = ttl_secs.map(chrono::Duration::seconds);
        let token = issue_token(&settings.auth.token_secret, user_id, ttl)
            .context("Failed to sign token")?;
        println!("{token}");
        return Ok(());
    }

    let format = if settings.logging.json {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };
    init_subscriber(&settings.logging.level, format);

    let metrics_handle =
        tally_server::metrics::install_recorder().context("Failed to install metrics recorder")?;

    let verifier = Arc::new(JwtVerifier::new(&settings.auth.token_secret));
    let server = TallyServer::new(server_config(&settings), verifier).with_metrics(metrics_handle);

    let (addr, handle) = server.listen().await.context("Failed to bind server")?;
    tracing::info!("tally listening on http://{addr}");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    tracing::info!("Shutting down...");
    if !server.stop(vec![handle]).await {
        tracing::warn!("shutdown grace period expired");
    }
    tracing::info!("Shutdown complete");
    Ok(())
}
