//! cmdshell-term - terminal for cmdshell devices
//!
//! Provides both a REPL and one-shot command execution.

mod commands;
mod repl;

use clap::{Parser, Subcommand};
use cmdshell_client::{Client, ConnectionConfig};
use colored::Colorize;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "cmdshell-term")]
#[command(about = "Terminal for devices speaking the cmdshell command protocol")]
#[command(version)]
struct Cli {
    /// Device address (serial-over-TCP bridge or emulator)
    #[arg(short, long, env = "CMDSHELL_SERVER", default_value = "127.0.0.1:7500")]
    server: SocketAddr,

    /// Serial device node; takes precedence over --server
    #[arg(short, long, env = "CMDSHELL_DEVICE")]
    device: Option<PathBuf>,

    /// Wait per attempt for a result, in milliseconds
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Sends of one command before giving up
    #[arg(long, default_value = "10")]
    attempts: u32,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
pub(crate) enum Commands {
    /// Start interactive REPL
    Repl,

    /// Send a raw command line, e.g. `exec so 3 1`
    Exec {
        #[arg(required = true, trailing_var_arg = true)]
        line: Vec<String>,
    },

    /// Ping the device
    Ping,

    /// Get device info
    Info,

    /// Get firmware version
    Version,

    /// Read the device clock
    Time,

    /// Read the device date
    Date,

    /// Read all inputs as a bit mask
    Read,

    /// Set all outputs from a 16 character bit string
    Set {
        /// Bit string, first character is pin 0
        bits: String,
    },

    /// Read one input pin
    ReadInput {
        /// Pin number 0 - 15
        pin: u8,
    },

    /// Drive one output pin
    SetOutput {
        /// Pin number 0 - 15
        pin: u8,

        /// 0 for off, 1 for on
        state: u8,
    },

    /// Show the pin mapping
    PinMap {
        /// `input` or `output`; both when omitted
        which: Option<String>,
    },

    /// Draw a hardware random number
    Random,

    /// Shut the device down
    Shutdown,

    /// Restart the device
    Reboot {
        /// Delay before restarting, in milliseconds
        #[arg(long)]
        delay_ms: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();

    let mut config = match &cli.device {
        Some(path) => ConnectionConfig::device(path),
        None => ConnectionConfig::tcp(cli.server),
    }
    .with_max_attempts(cli.attempts);
    if let Some(ms) = cli.timeout_ms {
        config = config.with_request_timeout(Duration::from_millis(ms));
    }
    let client = Client::new(config);

    match cli.command {
        Some(Commands::Repl) | None => {
            repl::run(client).await?;
        }
        Some(cmd) => {
            client.connect().await.map_err(|e| {
                eprintln!("{}: {}", "Connection failed".red(), e);
                e
            })?;

            let result = commands::execute(&client, cmd).await;

            match result {
                Ok(output) => {
                    if !output.is_empty() {
                        println!("{}", output);
                    }
                }
                Err(e) => {
                    eprintln!("{}: {}", "Error".red(), e);
                    client.close().await;
                    std::process::exit(1);
                }
            }

            client.close().await;
        }
    }

    Ok(())
}
