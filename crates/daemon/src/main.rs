//! PaperDrop Daemon
//!
//! HTTP file-transfer gateway for an e-paper reader's SD card.

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use daemon::config::Config;
use daemon::{FileServer, MountedStorage, NetworkStatusHandle};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

/// PaperDrop Daemon - HTTP file transfer for e-paper readers.
#[derive(Parser, Debug)]
#[command(name = "paperdrop")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands for the daemon.
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Start serving the storage root over HTTP
    Start {
        /// Port to listen on (overrides the config file)
        #[arg(long, short)]
        port: Option<u16>,

        /// Storage root directory (overrides the config file)
        #[arg(long, short, value_name = "DIR")]
        root: Option<PathBuf>,
    },

    /// Print the effective configuration as TOML
    ShowConfig,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let mut config = match &cli.config {
        Some(config_path) => Config::load(config_path)?,
        None => Config::load_default()?,
    };

    // Apply environment variable overrides
    config.apply_env_overrides();

    match cli.command {
        Commands::Start { port, root } => {
            if let Some(port) = port {
                config.server.port = port;
            }
            if let Some(root) = root {
                config.storage.root = root;
            }
            config.validate()?;

            let _guard = init_tracing(cli.verbose, &config);
            tracing::info!("PaperDrop daemon starting...");
            run_server(config).await?;
        }
        Commands::ShowConfig => {
            config.validate()?;
            print!("{}", config.to_toml()?);
        }
    }

    Ok(())
}

/// Initialize tracing, to a daily rolling file when `log_dir` is set.
///
/// The returned guard must stay alive for buffered file output to be flushed.
fn init_tracing(verbose: bool, config: &Config) -> Option<WorkerGuard> {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(config.daemon.log_level.to_lowercase()))
    };

    match &config.daemon.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "paperdrop.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(writer)
                .with_ansi(false)
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
            None
        }
    }
}

/// Mount storage, bind the server and serve until interrupted.
async fn run_server(config: Config) -> anyhow::Result<()> {
    let storage = MountedStorage::mount(&config.storage.root).with_context(|| {
        format!(
            "Failed to mount storage root: {}",
            config.storage.root.display()
        )
    })?;

    let network = NetworkStatusHandle::default();
    let mut server = FileServer::bind(&config, storage, network)
        .await
        .with_context(|| {
            format!(
                "Failed to bind {}:{}",
                config.server.bind_address, config.server.port
            )
        })?;

    let shutdown = server.shutdown_token();
    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        tracing::info!("Received shutdown signal");
        shutdown.cancel();
    });

    tracing::info!("Serving {} at {}", config.storage.root.display(), server.server_url());
    server.run().await?;
    Ok(())
}

/// Wait for a shutdown signal (SIGTERM or SIGINT).
#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let (mut sigterm, mut sigint) =
        match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
            (Ok(term), Ok(int)) => (term, int),
            _ => {
                tracing::warn!("Failed to register signal handlers, falling back to Ctrl-C");
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };

    tokio::select! {
        _ = sigterm.recv() => {
            tracing::info!("Received SIGTERM");
        }
        _ = sigint.recv() => {
            tracing::info!("Received SIGINT");
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_debug_assert() {
        // Verify the CLI structure is valid
        Cli::command().debug_assert();
    }

    #[test]
    fn test_start_command() {
        let cli = Cli::try_parse_from(["paperdrop", "start"]).unwrap();
        match cli.command {
            Commands::Start { port, root } => {
                assert_eq!(port, None);
                assert_eq!(root, None);
            }
            _ => panic!("Expected Start command"),
        }
    }

    #[test]
    fn test_start_with_overrides() {
        let cli = Cli::try_parse_from([
            "paperdrop", "start", "--port", "8080", "--root", "/mnt/sd",
        ])
        .unwrap();
        match cli.command {
            Commands::Start { port, root } => {
                assert_eq!(port, Some(8080));
                assert_eq!(root, Some(PathBuf::from("/mnt/sd")));
            }
            _ => panic!("Expected Start command"),
        }
    }

    #[test]
    fn test_start_with_short_flags() {
        let cli = Cli::try_parse_from(["paperdrop", "start", "-p", "81", "-r", "/card"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Start {
                port: Some(81),
                ..
            }
        ));
    }

    #[test]
    fn test_invalid_port_rejected() {
        assert!(Cli::try_parse_from(["paperdrop", "start", "--port", "99999"]).is_err());
    }

    #[test]
    fn test_show_config_command() {
        let cli = Cli::try_parse_from(["paperdrop", "show-config"]).unwrap();
        assert!(matches!(cli.command, Commands::ShowConfig));
    }

    #[test]
    fn test_global_flags() {
        let cli = Cli::try_parse_from([
            "paperdrop",
            "--verbose",
            "--config",
            "/etc/paperdrop.toml",
            "start",
        ])
        .unwrap();
        assert!(cli.verbose);
        assert_eq!(cli.config, Some(PathBuf::from("/etc/paperdrop.toml")));

        // Global flags may also follow the subcommand
        let cli = Cli::try_parse_from(["paperdrop", "start", "-v"]).unwrap();
        assert!(cli.verbose);
    }

    #[test]
    fn test_missing_subcommand() {
        assert!(Cli::try_parse_from(["paperdrop"]).is_err());
    }
}
