//! Command execution.

use crate::Commands;
use cmdshell_client::Client;
use cmdshell_protocol::Response;
use colored::Colorize;
use std::time::Duration;

/// Executes a one-shot command and returns the formatted output.
pub async fn execute(client: &Client, cmd: Commands) -> Result<String, Box<dyn std::error::Error>> {
    match cmd {
        Commands::Repl => unreachable!(),

        Commands::Exec { line } => {
            let resp = client.execute(&line.join(" ")).await?;
            Ok(render(&resp))
        }

        Commands::Ping => {
            client.ping().await?;
            Ok("Success".green().to_string())
        }

        Commands::Info => Ok(client.info().await?),

        Commands::Version => Ok(client.version().await?),

        Commands::Time => Ok(client.time().await?),

        Commands::Date => Ok(client.date().await?),

        Commands::Read => {
            let mask = client.read_inputs().await?;
            Ok(format!("{:#06x} ({})", mask, bit_string(mask).cyan()))
        }

        Commands::Set { bits } => {
            let resp = client.execute(&format!("set {}", bits)).await?;
            Ok(render(&resp))
        }

        Commands::ReadInput { pin } => {
            let on = client.read_input(pin).await?;
            Ok(format!("Input {} = {}", pin, level(on)))
        }

        Commands::SetOutput { pin, state } => {
            let on = client.set_output(pin, state != 0).await?;
            Ok(format!("Output {} = {}", pin, level(on)))
        }

        Commands::PinMap { which } => Ok(client.pin_map(which.as_deref()).await?),

        Commands::Random => Ok(client.random().await?.to_string()),

        Commands::Shutdown => {
            client.shutdown().await?;
            Ok("Shutdown requested".yellow().to_string())
        }

        Commands::Reboot { delay_ms } => {
            client.reboot(delay_ms.map(Duration::from_millis)).await?;
            Ok("Reboot requested".yellow().to_string())
        }
    }
}

/// Renders a Result the way the terminal shows it: the data, or the code
/// name when there is none. Failures are prefixed with their code.
pub fn render(resp: &Response) -> String {
    let text = resp.display_text();
    if resp.is_success() {
        if resp.data.is_none() {
            text.green().to_string()
        } else {
            text
        }
    } else if resp.data.is_none() {
        text.red().to_string()
    } else {
        format!("{}: {}", resp.code.name().red(), text)
    }
}

/// Channel 0 first, matching the `set` argument layout.
fn bit_string(mask: u16) -> String {
    (0..16)
        .map(|pin| if mask & (1 << pin) != 0 { '1' } else { '0' })
        .collect()
}

fn level(on: bool) -> colored::ColoredString {
    if on {
        "on".green()
    } else {
        "off".dimmed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cmdshell_protocol::{ResultCode, ResultData};

    #[test]
    fn test_render() {
        colored::control::set_override(false);

        let ok = Response::success(1, 0, ResultData::UInt(42));
        assert_eq!(render(&ok), "42");

        let pong = Response::status(2, 0, ResultCode::Success);
        assert_eq!(render(&pong), "Success");

        let missing = Response::error(
            3,
            0,
            ResultCode::ParameterMissing,
            "Input pin number: 0 - 15",
        );
        assert_eq!(render(&missing), "ParameterMissing: Input pin number: 0 - 15");

        let uninit = Response::status(4, 0, ResultCode::Uninitialized);
        assert_eq!(render(&uninit), "Uninitialized");
    }

    #[test]
    fn test_bit_string_layout() {
        assert_eq!(bit_string(0x0001), "1000000000000000");
        assert_eq!(bit_string(0x8000), "0000000000000001");
    }
}
