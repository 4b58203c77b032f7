//! consolegate daemon
//!
//! Serves console access authentication for console proxies and sweeps
//! expired tickets.

use clap::{Parser, Subcommand};
use consolegate_daemon::{ConsoleState, ControlServer, DaemonConfig};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "consolegated")]
#[command(about = "consolegate daemon - console access ticketing and authentication")]
#[command(version)]
struct Cli {
    /// Configuration file path (defaults to <store>/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Store directory
    #[arg(short, long)]
    store: Option<PathBuf>,

    /// Control listen address
    #[arg(short, long)]
    listen: Option<String>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Serve console proxies and sweep expired tickets (default)
    Serve,
    /// Issue a console ticket for a VM
    IssueTicket {
        /// VM UUID or numeric id
        #[arg(long)]
        vm: String,
    },
    /// Run a single expiry sweep
    Sweep,
    /// Print the effective configuration
    PrintConfig,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    let store_path = cli
        .store
        .clone()
        .unwrap_or_else(consolegate_common::default_store_path);
    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(|| store_path.join("config.toml"));

    let mut config = DaemonConfig::load(&config_path)?;
    if cli.store.is_some() {
        config.store_path = store_path;
    }
    if let Some(listen) = cli.listen {
        config.control_listen = listen;
    }

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(config).await,
        Command::IssueTicket { vm } => {
            let state = ConsoleState::new(&config)?;
            let ticket = state.issue_ticket(&vm)?;
            println!("{}", ticket.ticket);
            Ok(())
        }
        Command::Sweep => {
            let state = ConsoleState::new(&config)?;
            let swept = state.sweeper().sweep_once()?;
            println!("{}", swept);
            Ok(())
        }
        Command::PrintConfig => {
            print!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
    }
}

async fn serve(config: DaemonConfig) -> anyhow::Result<()> {
    info!("consolegate daemon v{}", consolegate_common::VERSION);

    let state = ConsoleState::new(&config)?;

    // Make sure proxies can be bootstrapped before accepting them
    state.keys().key_iv_pair()?;

    let sweeper = state.sweeper();
    let sweeper_handle = tokio::spawn(async move { sweeper.run().await });

    let control_handle = tokio::spawn(ControlServer::new(state.clone()).bind_and_serve());

    info!("Daemon started, control listener on {}", config.control_listen);

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
        result = control_handle => {
            match result {
                Ok(Err(e)) => tracing::error!("Control listener error: {}", e),
                Err(e) => tracing::error!("Control listener task failed: {}", e),
                Ok(Ok(())) => {}
            }
        }
        result = sweeper_handle => {
            if let Err(e) = result {
                tracing::error!("Ticket sweeper error: {}", e);
            }
        }
    }

    info!("Daemon shutdown complete");
    Ok(())
}
