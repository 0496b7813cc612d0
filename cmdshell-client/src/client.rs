//! High-level client API.

use crate::connection::{Connection, ConnectionConfig};
use crate::error::ClientError;
use chrono::{Local, NaiveDate, NaiveTime};
use cmdshell_protocol::{Message, ResultData, ResultType, Response};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};

/// High-level client for a cmdshell device.
pub struct Client {
    conn: Arc<Connection>,
}

impl Client {
    /// Creates a new client with the given configuration.
    pub fn new(config: ConnectionConfig) -> Self {
        Self {
            conn: Arc::new(Connection::new(config)),
        }
    }

    /// Opens the link, pings the device and sets its clock from the host.
    ///
    /// The whole sequence is retried `connect_attempts` times.
    pub async fn connect(&self) -> Result<(), ClientError> {
        let config = self.conn.config();
        let mut last_err = ClientError::NotConnected;

        for attempt in 1..=config.connect_attempts {
            match self.try_connect().await {
                Ok(()) => {
                    tracing::info!("Connected to {}", config.endpoint);
                    return Ok(());
                }
                Err(e) => {
                    tracing::warn!(attempt, "connect to {} failed: {}", config.endpoint, e);
                    self.conn.close().await;
                    last_err = e;
                }
            }
            if attempt < config.connect_attempts {
                tokio::time::sleep(config.connect_retry_delay).await;
            }
        }
        Err(last_err)
    }

    async fn try_connect(&self) -> Result<(), ClientError> {
        self.conn.connect().await?;
        self.handshake().await
    }

    /// Runs the connect sequence over an already open link.
    pub async fn attach<S>(&self, stream: S) -> Result<(), ClientError>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        self.conn.attach(stream).await;
        self.handshake().await
    }

    async fn handshake(&self) -> Result<(), ClientError> {
        self.ping().await?;
        self.sync_clock().await
    }

    /// Returns whether the client is connected.
    pub fn is_connected(&self) -> bool {
        self.conn.is_connected()
    }

    /// Closes the connection.
    pub async fn close(&self) {
        self.conn.close().await
    }

    /// Returns the underlying connection.
    pub fn connection(&self) -> Arc<Connection> {
        self.conn.clone()
    }

    // =========================================================================
    // Helper methods
    // =========================================================================

    fn message(&self, command: &str) -> Message {
        Message::new(self.conn.next_sequence(), 0, command)
    }

    async fn request(&self, msg: Message) -> Result<ResultData, ClientError> {
        let response = self.conn.request(&msg).await?;

        if !response.is_success() {
            return Err(ClientError::Device {
                code: response.code,
                message: response.display_text(),
            });
        }
        Ok(response.data)
    }

    async fn request_string(&self, msg: Message) -> Result<String, ClientError> {
        match self.request(msg).await? {
            ResultData::String(s) => Ok(s),
            other => Err(unexpected(ResultType::String, &other)),
        }
    }

    /// Sends a typed command line and returns the raw Result, whatever its code.
    pub async fn execute(&self, line: &str) -> Result<Response, ClientError> {
        let msg = Message::parse_line(self.conn.next_sequence(), 0, line)
            .ok_or_else(|| ClientError::InvalidCommand(line.to_string()))?;
        self.conn.request(&msg).await
    }

    // =========================================================================
    // System commands
    // =========================================================================

    /// Pings the device.
    pub async fn ping(&self) -> Result<(), ClientError> {
        self.request(self.message("ping")).await?;
        Ok(())
    }

    /// Gets help for one command, or for all commands.
    pub async fn help(&self, command: Option<&str>) -> Result<String, ClientError> {
        let mut msg = self.message("help");
        if let Some(command) = command {
            msg = msg.with_arg(command);
        }
        self.request_string(msg).await
    }

    pub async fn version(&self) -> Result<String, ClientError> {
        self.request_string(self.message("version")).await
    }

    pub async fn info(&self) -> Result<String, ClientError> {
        self.request_string(self.message("info")).await
    }

    /// Reads the device clock time.
    pub async fn time(&self) -> Result<String, ClientError> {
        self.request_string(self.message("time")).await
    }

    /// Sets the device clock time.
    pub async fn set_time(&self, time: NaiveTime) -> Result<String, ClientError> {
        let msg = self
            .message("time")
            .with_arg(time.format("%H:%M:%S").to_string());
        self.request_string(msg).await
    }

    /// Reads the device date.
    pub async fn date(&self) -> Result<String, ClientError> {
        self.request_string(self.message("date")).await
    }

    /// Sets the device date.
    pub async fn set_date(&self, date: NaiveDate) -> Result<String, ClientError> {
        let msg = self
            .message("date")
            .with_arg(date.format("%m/%d/%Y").to_string());
        self.request_string(msg).await
    }

    /// Sets the device date and time from the host clock.
    pub async fn sync_clock(&self) -> Result<(), ClientError> {
        let now = Local::now().naive_local();
        let date = self.set_date(now.date()).await?;
        let time = self.set_time(now.time()).await?;
        tracing::debug!("Device clock set to {} {}", date, time);
        Ok(())
    }

    /// Asks the device to shut down. No Result is awaited.
    pub async fn shutdown(&self) -> Result<(), ClientError> {
        self.conn.send(&self.message("shutdown")).await
    }

    /// Asks the device to restart after `delay`. No Result is awaited.
    pub async fn reboot(&self, delay: Option<Duration>) -> Result<(), ClientError> {
        let mut msg = self.message("reboot");
        if let Some(delay) = delay {
            msg = msg.with_arg(delay.as_millis().to_string());
        }
        self.conn.send(&msg).await
    }

    // =========================================================================
    // GPIO commands
    // =========================================================================

    /// Reads all inputs; bit i is channel i.
    pub async fn read_inputs(&self) -> Result<u16, ClientError> {
        match self.request(self.message("read")).await? {
            ResultData::UShort(mask) => Ok(mask),
            other => Err(unexpected(ResultType::UShort, &other)),
        }
    }

    /// Sets all outputs; bit i drives channel i.
    pub async fn set_outputs(&self, mask: u16) -> Result<String, ClientError> {
        let bits: String = (0..16)
            .map(|pin| if mask & (1 << pin) != 0 { '1' } else { '0' })
            .collect();
        self.request_string(self.message("set").with_arg(bits)).await
    }

    pub async fn read_input(&self, pin: u8) -> Result<bool, ClientError> {
        let msg = self.message("readinput").with_arg(pin.to_string());
        match self.request(msg).await? {
            ResultData::Byte(level) => Ok(level != 0),
            other => Err(unexpected(ResultType::Byte, &other)),
        }
    }

    pub async fn set_output(&self, pin: u8, on: bool) -> Result<bool, ClientError> {
        let msg = self
            .message("setoutput")
            .with_args([pin.to_string(), u8::from(on).to_string()]);
        match self.request(msg).await? {
            ResultData::Byte(level) => Ok(level != 0),
            other => Err(unexpected(ResultType::Byte, &other)),
        }
    }

    /// Gets the pin map: `"input"`, `"output"`, or both when `None`.
    pub async fn pin_map(&self, which: Option<&str>) -> Result<String, ClientError> {
        let mut msg = self.message("getpinmap");
        if let Some(which) = which {
            msg = msg.with_arg(which);
        }
        self.request_string(msg).await
    }

    // =========================================================================
    // RNG commands
    // =========================================================================

    /// Draws a hardware random number.
    pub async fn random(&self) -> Result<u32, ClientError> {
        match self.request(self.message("getrnd")).await? {
            ResultData::UInt(value) => Ok(value),
            other => Err(unexpected(ResultType::UInt, &other)),
        }
    }
}

fn unexpected(expected: ResultType, data: &ResultData) -> ClientError {
    ClientError::UnexpectedData {
        expected,
        actual: data.result_type(),
    }
}
