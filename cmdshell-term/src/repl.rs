//! Interactive REPL.

use crate::commands::render;
use cmdshell_client::{Client, ClientError};
use colored::Colorize;
use rustyline::error::ReadlineError;
use rustyline::history::DefaultHistory;
use rustyline::{Config, Editor};

/// Lines handled by the terminal itself rather than sent to the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Local {
    Exit,
    Connect,
    Disconnect,
}

impl Local {
    fn parse(line: &str) -> Option<Self> {
        match line.to_lowercase().as_str() {
            "exit" | "close" | "quit" => Some(Local::Exit),
            "connect" => Some(Local::Connect),
            "disconnect" => Some(Local::Disconnect),
            _ => None,
        }
    }
}

pub async fn run(client: Client) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", "cmdshell terminal".bold().cyan());
    connect(&client).await;

    // Create readline editor
    let config = Config::builder()
        .history_ignore_space(true)
        .auto_add_history(true)
        .build();
    let mut rl: Editor<(), DefaultHistory> = Editor::with_config(config)?;

    // Load history
    let history_path = std::env::var("HOME")
        .map(|h| std::path::PathBuf::from(h).join(".cmdshell_history"))
        .unwrap_or_else(|_| ".cmdshell_history".into());
    if let Err(e) = rl.load_history(&history_path) {
        tracing::debug!("no history loaded from {}: {}", history_path.display(), e);
    }

    println!("Type 'help' for device commands, 'exit' to leave.\n");

    loop {
        let prompt = format!("{} ", "cmdshell>".cyan());
        match rl.readline(&prompt) {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }

                let local = Local::parse(line);
                tracing::debug!(?local, "input line");
                match local {
                    Some(Local::Exit) => break,
                    Some(Local::Connect) => connect(&client).await,
                    Some(Local::Disconnect) => {
                        client.close().await;
                        println!("{}", "Disconnected.".dimmed());
                    }
                    None if !client.is_connected() => {
                        println!("{}\n", "Not connected. Type 'connect' first.".yellow());
                    }
                    None => match client.execute(line).await {
                        Ok(resp) => println!("{}\n", render(&resp)),
                        Err(e) => {
                            println!("{}: {}", "Error".red(), e);
                            if let Some(hint) = recovery_hint(&e, client.is_connected()) {
                                println!("{}", hint.yellow());
                            }
                            println!();
                        }
                    },
                }
            }
            Err(ReadlineError::Interrupted) => {
                println!("^C");
                continue;
            }
            Err(ReadlineError::Eof) => {
                println!("^D");
                break;
            }
            Err(err) => {
                println!("{}: {:?}", "Error".red(), err);
                break;
            }
        }
    }

    // Save history
    if let Err(e) = rl.save_history(&history_path) {
        tracing::warn!("failed to save history to {}: {}", history_path.display(), e);
    }

    client.close().await;
    println!("{}", "Disconnected.".dimmed());

    Ok(())
}

/// Suggests what to do after a failed command, if retrying could help.
fn recovery_hint(err: &ClientError, connected: bool) -> Option<&'static str> {
    if !err.is_retryable() {
        None
    } else if connected {
        Some("The device did not answer; try the command again.")
    } else {
        Some("The link was lost. Type 'connect' to reconnect.")
    }
}

async fn connect(client: &Client) {
    let conn = client.connection();
    let endpoint = &conn.config().endpoint;
    println!("Connecting to {}...", endpoint);
    match client.connect().await {
        Ok(()) => println!("{}", "Connected!".green()),
        Err(e) => {
            tracing::debug!("connect to {} failed: {:?}", endpoint, e);
            println!("{}: {}", "Connection failed".red(), e);
        }
    }
}
