//! Connection management.

use crate::error::ClientError;
use crate::stream::{ClientStream, Endpoint};
use cmdshell_protocol::{FrameDecoder, Message, ProtocolError, ResultCode, Response};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;

/// Default read buffer size.
pub const DEFAULT_READ_BUFFER_SIZE: usize = 512;

/// Minimum read buffer size.
pub const MIN_READ_BUFFER_SIZE: usize = 64;

/// Maximum read buffer size (one full frame).
pub const MAX_READ_BUFFER_SIZE: usize = cmdshell_protocol::MAX_FRAME_SIZE;

/// Sends of one Message before giving up.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 10;

/// Default response timeout: generous in debug builds where the device may
/// be stopped in a debugger.
#[cfg(debug_assertions)]
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
#[cfg(not(debug_assertions))]
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Connection configuration.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Device endpoint.
    pub endpoint: Endpoint,
    /// Transport open timeout.
    pub connect_timeout: Duration,
    /// Wait for one Result before re-sending.
    pub request_timeout: Duration,
    /// Sends of one Message before giving up.
    pub max_attempts: u32,
    /// Attempts of the whole connect sequence.
    pub connect_attempts: u32,
    /// Pause between connect attempts.
    pub connect_retry_delay: Duration,
    /// Read buffer size for link reads.
    pub read_buffer_size: usize,
}

impl ConnectionConfig {
    pub fn new(endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            connect_timeout: Duration::from_secs(10),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            connect_attempts: 10,
            connect_retry_delay: Duration::from_millis(500),
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
        }
    }

    pub fn tcp(addr: SocketAddr) -> Self {
        Self::new(Endpoint::Tcp(addr))
    }

    pub fn device(path: impl Into<PathBuf>) -> Self {
        Self::new(Endpoint::Device(path.into()))
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    pub fn with_connect_attempts(mut self, attempts: u32, delay: Duration) -> Self {
        self.connect_attempts = attempts.max(1);
        self.connect_retry_delay = delay;
        self
    }

    pub fn with_read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size.clamp(MIN_READ_BUFFER_SIZE, MAX_READ_BUFFER_SIZE);
        self
    }
}

/// The one Message currently awaiting its Result.
struct Pending {
    sequence: u64,
    tx: oneshot::Sender<Response>,
}

/// A connection to a cmdshell device.
pub struct Connection {
    config: ConnectionConfig,
    /// Write half of the link.
    writer: Mutex<Option<BoxedWriter>>,
    /// Bytes received but not yet decoded.
    decoder: Mutex<FrameDecoder>,
    /// Waiter for the in-flight Message, if any.
    pending: Mutex<Option<Pending>>,
    /// Background read loop.
    read_task: Mutex<Option<JoinHandle<()>>>,
    next_sequence: AtomicU64,
    connected: AtomicBool,
}

impl Connection {
    /// Creates a new connection (not yet connected).
    pub fn new(config: ConnectionConfig) -> Self {
        Self {
            config,
            writer: Mutex::new(None),
            decoder: Mutex::new(FrameDecoder::responses()),
            pending: Mutex::new(None),
            read_task: Mutex::new(None),
            next_sequence: AtomicU64::new(1),
            connected: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Opens the configured endpoint and starts reading from it.
    pub async fn connect(self: &Arc<Self>) -> Result<(), ClientError> {
        tracing::debug!("Connecting to {}...", self.config.endpoint);
        let stream = ClientStream::open(&self.config.endpoint, self.config.connect_timeout)
            .await
            .map_err(|e| {
                tracing::debug!("Connection failed: {}", e);
                ClientError::Io(e)
            })?;
        self.attach(stream).await;
        Ok(())
    }

    /// Takes over an already open link, replacing any previous one.
    pub async fn attach<S>(self: &Arc<Self>, stream: S)
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        self.close().await;

        let (read_half, write_half) = tokio::io::split(stream);
        *self.writer.lock().await = Some(Box::new(write_half));
        self.decoder.lock().await.clear();
        self.connected.store(true, Ordering::SeqCst);

        let conn = Arc::clone(self);
        let handle = tokio::spawn(async move {
            if let Err(e) = conn.read_loop(Box::new(read_half)).await {
                tracing::debug!("read_loop ended: {}", e);
            }
        });
        *self.read_task.lock().await = Some(handle);
    }

    /// Allocates the sequence number for a new Message.
    pub fn next_sequence(&self) -> u64 {
        self.next_sequence.fetch_add(1, Ordering::SeqCst)
    }

    /// Writes a Message without waiting for a Result.
    pub async fn send(&self, msg: &Message) -> Result<(), ClientError> {
        if !self.is_connected() {
            return Err(ClientError::NotConnected);
        }
        let encoded = msg.encode()?;
        let mut writer_guard = self.writer.lock().await;
        let writer = writer_guard.as_mut().ok_or(ClientError::NotConnected)?;
        writer.write_all(&encoded).await?;
        writer.flush().await?;
        tracing::trace!(sequence = msg.sequence, len = encoded.len(), "message sent");
        Ok(())
    }

    /// Sends a Message and waits for its Result.
    ///
    /// The identical frame is re-sent while the device answers
    /// `IncompleteMessage` or stays silent, up to `max_attempts` sends.
    /// Only a Result echoing `msg.sequence` counts as an answer, so an
    /// `IncompleteMessage` for sequence 0 (nothing recoverable) is discarded
    /// and the attempt runs out its timeout.
    pub async fn request(&self, msg: &Message) -> Result<Response, ClientError> {
        if !self.is_connected() {
            tracing::debug!("request() called but not connected");
            return Err(ClientError::NotConnected);
        }

        let attempts = self.config.max_attempts;
        for attempt in 1..=attempts {
            let rx = self.arm(msg.sequence).await;
            self.send(msg).await?;
            tracing::debug!(
                sequence = msg.sequence,
                command = %msg.command,
                attempt,
                "waiting for result"
            );

            match tokio::time::timeout(self.config.request_timeout, rx).await {
                Ok(Ok(resp)) if resp.code == ResultCode::IncompleteMessage => {
                    tracing::debug!(
                        sequence = msg.sequence,
                        attempt,
                        "device reported incomplete message"
                    );
                }
                Ok(Ok(resp)) => return Ok(resp),
                Ok(Err(_)) => {
                    tracing::debug!(sequence = msg.sequence, "result channel closed");
                    return Err(ClientError::ConnectionClosed);
                }
                Err(_) => {
                    tracing::warn!(
                        sequence = msg.sequence,
                        attempt,
                        "timed out waiting for {}",
                        msg.command
                    );
                }
            }
        }

        self.pending.lock().await.take();
        Err(ClientError::RetriesExhausted {
            sequence: msg.sequence,
            attempts,
        })
    }

    /// Drops stale buffered input and registers a fresh waiter.
    async fn arm(&self, sequence: u64) -> oneshot::Receiver<Response> {
        self.decoder.lock().await.clear();
        let (tx, rx) = oneshot::channel();
        *self.pending.lock().await = Some(Pending { sequence, tx });
        rx
    }

    /// Reads the link and completes the pending wait.
    async fn read_loop(&self, mut reader: BoxedReader) -> Result<(), ClientError> {
        tracing::debug!("read_loop started");
        let mut buf = vec![0u8; self.config.read_buffer_size];

        let result = loop {
            let n = match reader.read(&mut buf).await {
                Ok(0) => break Err(ClientError::ConnectionClosed),
                Ok(n) => n,
                Err(e) => break Err(ClientError::Io(e)),
            };
            tracing::trace!("read_loop: received {} bytes", n);

            let mut decoded = Vec::new();
            {
                let mut decoder = self.decoder.lock().await;
                let mut rest = &buf[..n];
                while !rest.is_empty() {
                    let taken = decoder.extend(rest);
                    rest = &rest[taken..];
                    loop {
                        match decoder.decode_response() {
                            Ok(Some(resp)) => decoded.push(resp),
                            Ok(None) => break,
                            Err(ProtocolError::CorruptFrame {
                                sequence: Some(sequence),
                            }) => {
                                tracing::warn!(sequence, "corrupt result");
                                decoded.push(Response::incomplete(sequence));
                            }
                            Err(e) => tracing::warn!("undecodable result: {}", e),
                        }
                    }
                    if taken == 0 {
                        // Scratch full of an unfinishable frame
                        decoder.clear();
                    }
                }
            }

            for resp in decoded {
                self.complete(resp).await;
            }
        };

        tracing::debug!("read_loop: connection closed");
        self.connected.store(false, Ordering::SeqCst);
        // Dropping the waiter wakes the request with ConnectionClosed.
        self.pending.lock().await.take();
        result
    }

    async fn complete(&self, resp: Response) {
        let mut pending = self.pending.lock().await;
        match pending.take() {
            Some(waiter) if waiter.sequence == resp.sequence => {
                tracing::debug!(sequence = resp.sequence, code = %resp.code, "result received");
                let _ = waiter.tx.send(resp);
            }
            other => {
                tracing::debug!(sequence = resp.sequence, "stale result discarded");
                *pending = other;
            }
        }
    }

    /// Returns whether the connection is established.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Closes the connection.
    pub async fn close(&self) {
        self.connected.store(false, Ordering::SeqCst);

        if let Some(mut writer) = self.writer.lock().await.take() {
            tracing::debug!("Shutting down writer");
            let _ = writer.shutdown().await;
        }
        if let Some(handle) = self.read_task.lock().await.take() {
            handle.abort();
        }
        self.pending.lock().await.take();
        self.decoder.lock().await.clear();
    }
}
