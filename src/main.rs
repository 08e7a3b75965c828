use std::process::ExitCode;

use clap::Parser;
use log::{error, info, warn};
use tokio_util::sync::CancellationToken;

use wiith_lib::{utils::init_logging, Cli, MonitorConfig};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(err) = init_logging(&cli.log_settings()) {
        eprintln!("wiith: {err:#}");
        return ExitCode::FAILURE;
    }

    let config = match MonitorConfig::from_cli(&cli) {
        Ok(config) => config,
        Err(err) => {
            error!("{err}");
            return ExitCode::FAILURE;
        }
    };

    let shutdown = CancellationToken::new();
    tokio::spawn(forward_shutdown(shutdown.clone()));

    match wiith_lib::run(config, shutdown).await {
        Ok(summary) => {
            info!(
                "wiith exiting: {} events, {} clients at exit",
                summary.events_applied, summary.clients_at_exit
            );
            ExitCode::SUCCESS
        }
        Err(err) => {
            error!("{err}");
            ExitCode::FAILURE
        }
    }
}

/// Ctrl-C or SIGTERM starts the clean shutdown path.
async fn forward_shutdown(shutdown: CancellationToken) {
    let mut terminate =
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(signal) => Some(signal),
            Err(err) => {
                warn!("failed to listen for SIGTERM: {err}");
                None
            }
        };

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(err) = result {
                warn!("failed to listen for Ctrl-C: {err}");
                return;
            }
            info!("Caught interrupt, shutting down");
        }
        Some(_) = async {
            match terminate.as_mut() {
                Some(signal) => signal.recv().await,
                None => std::future::pending().await,
            }
        } => info!("Caught SIGTERM, shutting down"),
    }

    shutdown.cancel();
}
