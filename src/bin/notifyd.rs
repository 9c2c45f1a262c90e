//! Notify Daemon - Per-store WebSocket push notifications
//!
//! Browsers connect to the WebSocket route with a one-time key issued by the
//! upstream API; notifications published on the pub/sub channel are pushed to
//! every connection of the matching store.
//!
//! # Usage
//!
//! ```bash
//! # Start the daemon (foreground)
//! notifyd
//!
//! # Override the port and run against in-process backends
//! notifyd --port 4100 --backend memory run
//!
//! # Print the effective configuration
//! notifyd config
//! ```

use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use notifyd::publisher::Publisher;
use notifyd::server::NotifyServer;
use notifyd::store::{KeyStore, MemoryKeyStore, MemoryPubSub, PubSub, RedisKeyStore, RedisPubSub};
use notifyd::{AppContext, Backend, Config};

/// Notify daemon - store notification push server
#[derive(Parser, Debug)]
#[command(name = "notifyd", version, about)]
struct Args {
    /// Config file (defaults to the user config dir when present)
    #[arg(short, long, env = "NOTIFYD_CONFIG")]
    config: Option<PathBuf>,

    /// Address to listen on
    #[arg(long)]
    bind: Option<String>,

    /// Port to listen on
    #[arg(short, long)]
    port: Option<u16>,

    /// Redis URL for the key store and pub/sub
    #[arg(long)]
    redis_url: Option<String>,

    /// Key store and pub/sub backend (redis or memory)
    #[arg(long)]
    backend: Option<Backend>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the daemon
    Run,
    /// Print the effective configuration as TOML
    Config,
}

fn load_config(args: &Args) -> Result<Config> {
    let mut config =
        Config::load_or_default(args.config.as_deref()).context("Failed to load configuration")?;
    config
        .apply_env()
        .context("Failed to apply environment overrides")?;

    if let Some(bind) = &args.bind {
        config.bind_address = bind.clone();
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(url) = &args.redis_url {
        config.redis_url = url.clone();
    }
    if let Some(backend) = args.backend {
        config.backend = backend;
    }

    config.validate().context("Invalid configuration")?;
    Ok(config)
}

fn main() -> Result<()> {
    let args = Args::parse();
    let config = load_config(&args)?;

    match args.command.unwrap_or(Command::Run) {
        Command::Run => run_daemon(config),
        Command::Config => {
            print!("{}", config.to_toml()?);
            Ok(())
        }
    }
}

#[tokio::main]
async fn run_daemon(config: Config) -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("notifyd=info".parse()?)
                .add_directive("notify_core=info".parse()?)
                .add_directive("notify_protocol=info".parse()?),
        )
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        pid = process::id(),
        backend = %config.backend,
        "Notify daemon starting"
    );

    let cancel_token = CancellationToken::new();

    let shutdown_token = cancel_token.clone();
    tokio::spawn(async move {
        if let Err(e) = wait_for_shutdown_signal().await {
            error!(error = %e, "Error waiting for shutdown signal");
        }
        info!("Shutdown signal received");
        shutdown_token.cancel();
    });

    let (keys, pubsub): (Arc<dyn KeyStore>, Arc<dyn PubSub>) = match config.backend {
        Backend::Redis => {
            let keys = RedisKeyStore::connect(&config.redis_url)
                .await
                .context("Failed to connect key store")?;
            let pubsub = RedisPubSub::connect(&config.redis_url)
                .await
                .context("Failed to connect pub/sub")?;
            (Arc::new(keys), Arc::new(pubsub))
        }
        Backend::Memory => {
            warn!(
                seed_keys = config.seed_keys.len(),
                "Memory backend: only seed_keys are accepted and nothing outside this process can publish"
            );
            (
                Arc::new(MemoryKeyStore::seeded(&config.seed_keys)),
                Arc::new(MemoryPubSub::new()),
            )
        }
    };

    let ctx = AppContext::new(config, keys, cancel_token);
    info!("Cluster started");

    let publisher = Publisher::new(ctx.cluster.clone(), ctx.config.notification_channel.clone());
    let events = publisher
        .subscribe(pubsub.as_ref())
        .await
        .context("Failed to subscribe to notification channel")?;

    let server = NotifyServer::new(ctx).with_bridge(publisher, events);

    if let Err(e) = server.run().await {
        error!(error = %e, "Server error");
        return Err(e.into());
    }

    info!("Notify daemon stopped");
    Ok(())
}

async fn wait_for_shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;

        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
            }
            _ = sigint.recv() => {
                info!("Received SIGINT");
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        info!("Received Ctrl+C");
    }

    Ok(())
}
