use std::sync::Arc;

use clap::Parser;
use color_eyre::Result;
use serial_bridge::{
    cli,
    config::Config,
    logging,
    mock::MockConnector,
    serial::{Connector, SerialConnector},
    server,
};

#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};

use tracing::{debug, error, info, Level};

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = cli::Cli::parse();

    if let Some(command) = cli.command {
        cli::handle_command(command);

        return Ok(());
    }

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    logging::init(level, cli.log_dir.map(|dir| (Level::DEBUG, dir))).await;

    let config = if let Some(config_path) = cli.config {
        debug!(?config_path, "Config from path");
        Config::new_from_path(config_path)?
    } else {
        debug!("Default config");
        Config::default()
    };

    let connector: Arc<dyn Connector> = if cli.mock.is_empty() {
        Arc::new(SerialConnector)
    } else {
        info!(ports = ?cli.mock, "Using mock serial ports");
        Arc::new(MockConnector::echoing(&cli.mock))
    };

    #[cfg(unix)]
    let mut hangup = signal(SignalKind::hangup())?;

    #[cfg(unix)]
    let hangup = hangup.recv();

    #[cfg(not(unix))]
    let hangup = futures::future::pending::<Option<()>>();

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Ctrl-C, quitting")
        }
        _ = hangup => {
            info!("Told to hang up, quitting")
        }
        result = server::run_on_port(config, connector, cli.port) => {
            error!("Server returned");
            result?;
            return Err(color_eyre::eyre::eyre!("Server stopped unexpectedly"));
        }
    }

    Ok(())
}
