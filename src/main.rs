//! prised - the prise daemon.
//!
//! Owns PTY sessions and their emulated screens; serves front-end clients
//! over a Unix domain socket. Runs on a current-thread runtime so all
//! client-visible state lives on one loop thread; only the per-session PTY
//! readers run elsewhere.

use clap::Parser;
use std::path::PathBuf;
use thiserror::Error;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use prise::config::{Config, ConfigError};
use prise::registry::{Registry, RegistryOptions};
use prise::server;

/// prised - persistent terminal multiplexer daemon
#[derive(Parser, Debug)]
#[command(name = "prised", version, about, long_about = None)]
struct Args {
    /// Socket path (default: /tmp/prise-<uid>.sock)
    #[arg(long)]
    socket: Option<PathBuf>,

    /// Config file path (default: ~/.config/prise/config.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Shut down when the last client disconnects
    #[arg(long)]
    exit_on_idle: bool,

    /// Shell to spawn in new sessions (overrides $SHELL)
    #[arg(long)]
    shell: Option<String>,
}

#[derive(Error, Debug)]
enum PrisedError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), PrisedError> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "prise=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = match args.config.clone().or_else(Config::default_path) {
        Some(path) => Config::load(&path)?.unwrap_or_default(),
        None => Config::default(),
    };

    let socket_path = args
        .socket
        .or(config.socket_path)
        .unwrap_or_else(server::default_socket_path);

    let registry = Registry::new(RegistryOptions {
        exit_on_idle: args.exit_on_idle || config.exit_on_idle,
        shell: args.shell.or(config.shell),
    });

    // Ctrl-C triggers the same shutdown path as idle exit: the accept loop
    // breaks, sessions drain, the socket path is unlinked.
    let shutdown = registry.shutdown_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("received Ctrl+C, shutting down");
            shutdown.cancel();
        }
    });

    tracing::info!("prised starting");
    server::serve(registry, &socket_path).await?;
    Ok(())
}
