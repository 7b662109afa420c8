// MIT License - Copyright (c) 2026 Peter Wright
// Cloud service binary: site listener and provisioning commands

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use tokio::signal::unix::{SignalKind, signal};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use sec_ctl::{
    CloudConfig, CommandRelay, MemoryRelay, MqttRelay, SiteRegistry, SiteServer, SqliteStore,
    Store, Subject,
};

// ---------------------------------------------------------------------------
// CLI
// ---------------------------------------------------------------------------

#[derive(Parser)]
#[command(name = "sec-ctl-cloud")]
#[command(about = "Cloud relay for remote security panel sites")]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(long, default_value = "config.toml")]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Accept site connections and relay commands until stopped
    Serve,
    /// Create a user account
    CreateUser {
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
    },
    /// Provision a new site and print its credentials
    CreateSite {
        /// How long the claim token stays valid
        #[arg(long, default_value_t = 24)]
        claim_hours: i64,
    },
    /// Make a user the owner of an unclaimed site
    ClaimSite {
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
        #[arg(long)]
        site: Uuid,
        #[arg(long)]
        token: String,
    },
    /// Print a site's most recent events
    Events {
        #[arg(long)]
        site: Uuid,
        #[arg(long, default_value_t = 20)]
        limit: u32,
        /// Only events older than this event id
        #[arg(long)]
        before: Option<i64>,
    },
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    // RUST_LOG controls verbosity (e.g. RUST_LOG=debug or RUST_LOG=sec_ctl=trace).
    // Default: info.
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    // systemd journal already adds timestamps, so omit them when running under systemd
    if std::env::var_os("JOURNAL_STREAM").is_some() {
        tracing_subscriber::fmt().without_time().with_env_filter(env_filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    }

    let cli = Cli::parse();
    let config = load_config(&cli.config)?;

    match cli.command {
        Command::Serve => serve(&cli.config, config).await,
        Command::CreateUser { email, password } => {
            let store = open_store(&config).await?;
            let user = store
                .create_user(&email, &password)
                .await
                .context("Failed to create user")?;
            println!("user_id: {}", user.id);
            Ok(())
        }
        Command::CreateSite { claim_hours } => {
            let store = open_store(&config).await?;
            let site = store.create_site().await.context("Failed to create site")?;
            let site_token = store
                .create_token(Subject::site(site.id), None)
                .await
                .context("Failed to create site token")?;
            let claim_expires = Utc::now() + chrono::Duration::hours(claim_hours);
            let claim_token = store
                .create_token(Subject::site(site.id), Some(claim_expires))
                .await
                .context("Failed to create claim token")?;
            println!("site_id: {}", site.id);
            println!("site_token: {site_token}");
            println!("claim_token: {claim_token} (expires {claim_expires})");
            Ok(())
        }
        Command::ClaimSite {
            email,
            password,
            site,
            token,
        } => {
            let store = open_store(&config).await?;
            let user = store
                .auth_user_by_password(&email, &password)
                .await
                .context("Failed to authenticate user")?;
            store
                .claim_site(&user, site, &token)
                .await
                .context("Failed to claim site")?;
            println!("Site {site} now owned by {}", user.email);
            Ok(())
        }
        Command::Events {
            site,
            limit,
            before,
        } => {
            let store = open_store(&config).await?;
            let events = store
                .site_events(site, before, Some(limit))
                .await
                .context("Failed to fetch events")?;
            for event in events {
                println!(
                    "{:>6}  {}  {:<8}  {}",
                    event.id,
                    event.time.to_rfc3339(),
                    event.level,
                    event.data
                );
            }
            Ok(())
        }
    }
}

fn load_config(path: &str) -> Result<CloudConfig> {
    if !Path::new(path).exists() {
        info!("No config file at {path}, using defaults");
        return Ok(CloudConfig::default());
    }
    let text = std::fs::read_to_string(path).context("Failed to read config file")?;
    CloudConfig::from_toml_str(&text).context("Failed to parse config file")
}

async fn open_store(config: &CloudConfig) -> Result<Arc<SqliteStore>> {
    let store = SqliteStore::connect(&config.database.url)
        .await
        .with_context(|| format!("Failed to open database {}", config.database.url))?;
    Ok(Arc::new(store))
}

fn build_relay(config: &CloudConfig) -> Result<Arc<dyn CommandRelay>> {
    match &config.mqtt {
        Some(mqtt) => {
            let opts = mqtt.relay_options().context("Invalid MQTT configuration")?;
            Ok(Arc::new(MqttRelay::connect(opts)))
        }
        None => {
            warn!("No [mqtt] configured; relaying commands in-process only");
            Ok(Arc::new(MemoryRelay::new()))
        }
    }
}

async fn serve(config_path: &str, mut config: CloudConfig) -> Result<()> {
    let mut sighup = signal(SignalKind::hangup())?;
    let mut sigterm = signal(SignalKind::terminate())?;

    loop {
        let store: Arc<dyn Store> = open_store(&config).await?;
        let relay = build_relay(&config)?;
        let registry = SiteRegistry::start(store.clone(), relay)
            .await
            .context("Failed to start site registry")?;
        let server = SiteServer::bind(
            &config.listen.addr(),
            registry.clone(),
            store,
            config.listen.login_timeout(),
        )
        .await
        .context("Failed to start site listener")?;

        let cancel = CancellationToken::new();
        let server_handle = tokio::spawn(server.run(cancel.clone()));

        info!("Cloud relay running. Send SIGHUP to restart, SIGINT/SIGTERM to stop.");
        let restart = tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received SIGINT, shutting down...");
                false
            }
            _ = sigterm.recv() => {
                info!("Received SIGTERM, shutting down...");
                false
            }
            _ = sighup.recv() => {
                info!("Received SIGHUP, reloading config and restarting...");
                true
            }
        };

        cancel.cancel();
        registry.shutdown();
        if let Err(e) = server_handle.await {
            warn!("Site listener task failed: {e}");
        }

        if !restart {
            break;
        }

        // Keep the previous config if the new one doesn't load
        match load_config(config_path) {
            Ok(new_config) => {
                config = new_config;
                info!("Config reloaded successfully");
            }
            Err(e) => warn!("Failed to reload config, keeping previous: {e:#}"),
        }
    }

    info!("Shutdown complete");
    Ok(())
}
