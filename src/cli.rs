use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::{
    config::Config,
    messages::{ClientMessage, ServerMessage},
    server::DEFAULT_PORT,
};

/// The command line interface for serial bridge.
#[derive(Parser)]
#[command(author, version, about)]
pub struct Cli {
    /// Path to a configuration file
    pub config: Option<PathBuf>,

    /// Which port the web server listens on
    #[arg(long, default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Use in-memory serial ports with these names instead of real ones.
    /// They echo back every line written to them.
    #[arg(long, num_args = 1..)]
    pub mock: Vec<String>,

    /// Also log to a daily rotated file in this directory
    #[arg(long)]
    pub log_dir: Option<PathBuf>,

    /// Log more
    #[arg(short, long)]
    pub verbose: bool,

    /// Subcommands
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Commands available in the command line interface.
#[derive(Subcommand)]
pub enum Commands {
    /// Examples for user convenience.
    #[clap(subcommand)]
    Examples(Examples),
}

/// Helpful examples for users.
#[derive(Subcommand, Clone)]
pub enum Examples {
    /// Show an example of a configuration file's contents.
    Config,

    /// Show an example JSON message (from server to user) listing serial ports.
    Ports,

    /// Show an example JSON request of connecting to a serial port.
    ConnectPort,

    /// Show an example JSON request of sending a command as is.
    Command,

    /// Show an example JSON request of moving a control channel.
    SetValue,
}

/// Print what the command asks for.
pub fn handle_command(command: Commands) {
    match command {
        Commands::Examples(example) => {
            let example = match example {
                Examples::Config => Config::example().serialize_pretty(),
                Examples::Ports => pretty(&ServerMessage::example_ports_list()),
                Examples::ConnectPort => pretty(&ClientMessage::example_connect_port()),
                Examples::Command => pretty(&ClientMessage::example_command()),
                Examples::SetValue => pretty(&ClientMessage::example_set_value()),
            };

            println!("{example}");
        }
    }
}

fn pretty<T: serde::Serialize>(message: &T) -> String {
    serde_json::to_string_pretty(message).unwrap_or_else(|e| format!("Could not serialize: {e}"))
}
