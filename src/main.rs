//! cmdshell - command shell device emulator
//!
//! Serves the framed command protocol on a TCP bridge or a serial device node.

use cmdshell_device::{Config, Device, DeviceExit};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    loop {
        // Reloaded on every boot so a reboot picks up config changes
        let config = match Config::load() {
            Ok(c) => {
                if let Ok(path) = std::env::var("CMDSHELL_CONFIG") {
                    tracing::info!("Loaded config from {}", path);
                }
                c
            }
            Err(e) => {
                // If a config file was explicitly specified, fail on error
                if std::env::var("CMDSHELL_CONFIG").is_ok() {
                    tracing::error!("Failed to load config: {}", e);
                    return Err(e.into());
                }
                tracing::info!("Using default configuration");
                Config::default()
            }
        };

        tracing::info!("Starting cmdshell device {}", config.info.version);
        match &config.transport.device {
            Some(path) => tracing::info!("  Device node: {}", path.display()),
            None => tracing::info!("  Bind address: {}", config.transport.bind_addr),
        }
        tracing::info!("  Scratch buffer: {} bytes", config.receiver.buffer_size);
        tracing::info!("  Idle timeout: {} ms", config.receiver.idle_timeout_ms);

        let device = Arc::new(Device::new(config));

        // Spawn shutdown signal handler
        let signal_device = device.clone();
        let signal = tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("Received shutdown signal, stopping device...");
            signal_device.shutdown();
        });

        let exit = device.run().await;
        signal.abort();

        match exit? {
            DeviceExit::Shutdown => break,
            DeviceExit::Reboot => tracing::info!("Rebooting device"),
        }
    }

    tracing::info!("Device stopped");
    Ok(())
}
