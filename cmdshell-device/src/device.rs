//! Device loop: owns the link, the receiver and the module registry.

use crate::config::Config;
use crate::dispatcher::Dispatcher;
use crate::error::DeviceError;
use crate::module::{ControlCommand, Outbound};
use crate::modules::{IoModule, OsRandom, RngModule, SimulatedPins, SystemModule};
use crate::receiver::Receiver;
use crate::stream::SerialStream;
use bytes::Bytes;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};

/// Why the device loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceExit {
    Shutdown,
    /// Modules should be rebuilt and the loop started again.
    Reboot,
}

/// Device statistics, accumulated across links.
#[derive(Debug, Default)]
pub struct DeviceStats {
    pub links_total: AtomicU64,
    pub bytes_received: AtomicU64,
    pub frames_decoded: AtomicU64,
    pub frames_corrupt: AtomicU64,
    pub frames_sent: AtomicU64,
}

/// Emulated command shell device.
pub struct Device {
    config: Config,
    stats: Arc<DeviceStats>,
    shutdown: broadcast::Sender<()>,
    running: AtomicBool,
}

impl Device {
    pub fn new(config: Config) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            config,
            stats: Arc::new(DeviceStats::default()),
            shutdown: shutdown_tx,
            running: AtomicBool::new(false),
        }
    }

    /// Registry with the built-in modules: I/O, system, then RNG.
    pub fn default_dispatcher(&self) -> Dispatcher {
        let mut dispatcher =
            Dispatcher::new().with_reply_unsupported(self.config.dispatch.reply_unsupported);
        dispatcher.register(IoModule::new(SimulatedPins::new()));
        dispatcher.register(SystemModule::new(self.config.info.clone()));
        dispatcher.register(RngModule::new(OsRandom));
        dispatcher
    }

    /// Runs the device with the built-in modules on the configured transport.
    pub async fn run(&self) -> Result<DeviceExit, DeviceError> {
        let dispatcher = self.default_dispatcher();
        match self.config.transport.device.clone() {
            Some(path) => {
                let stream = SerialStream::open_device(&path).await?;
                tracing::info!("Device link open on {}", path.display());
                self.run_on_stream(stream, dispatcher).await
            }
            None => {
                let listener = TcpListener::bind(self.config.transport.bind_addr).await?;
                tracing::info!("Device listening on {}", self.config.transport.bind_addr);
                self.run_on_listener(listener, dispatcher).await
            }
        }
    }

    /// Serves a single, already open link until it closes or a control
    /// command stops the device.
    pub async fn run_on_stream<S>(
        &self,
        stream: S,
        dispatcher: Dispatcher,
    ) -> Result<DeviceExit, DeviceError>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        self.running.store(true, Ordering::SeqCst);
        let (control_tx, mut control_rx) = mpsc::unbounded_channel();

        let (mut dispatcher, result) = self
            .serve(stream, dispatcher, &control_tx, &mut control_rx)
            .await;
        dispatcher.unregister_all();
        self.running.store(false, Ordering::SeqCst);

        match result {
            Ok(exit) => Ok(exit.unwrap_or(DeviceExit::Shutdown)),
            Err(DeviceError::ShuttingDown) => Ok(DeviceExit::Shutdown),
            Err(e) => Err(e),
        }
    }

    /// Accepts hosts one at a time; the modules persist across links.
    pub async fn run_on_listener(
        &self,
        listener: TcpListener,
        mut dispatcher: Dispatcher,
    ) -> Result<DeviceExit, DeviceError> {
        self.running.store(true, Ordering::SeqCst);
        let (control_tx, mut control_rx) = mpsc::unbounded_channel();
        let mut shutdown_rx = self.shutdown.subscribe();

        let exit = loop {
            tokio::select! {
                accepted = listener.accept() => {
                    let (tcp, addr) = match accepted {
                        Ok(pair) => pair,
                        Err(e) => {
                            tracing::error!("Accept error: {}", e);
                            continue;
                        }
                    };
                    tracing::info!("Host connected: {}", addr);

                    let (returned, result) = self
                        .serve(SerialStream::from(tcp), dispatcher, &control_tx, &mut control_rx)
                        .await;
                    dispatcher = returned;

                    match result {
                        Ok(Some(exit)) => break exit,
                        Ok(None) => tracing::info!("Host disconnected: {}", addr),
                        Err(DeviceError::ShuttingDown) => break DeviceExit::Shutdown,
                        Err(e) => tracing::warn!("Link {} error: {}", addr, e),
                    }
                }
                _ = shutdown_rx.recv() => {
                    tracing::info!("Device shutting down");
                    break DeviceExit::Shutdown;
                }
            }
        };

        dispatcher.unregister_all();
        self.running.store(false, Ordering::SeqCst);
        Ok(exit)
    }

    /// Runs one link. The dispatcher is handed back whatever the outcome.
    async fn serve<S>(
        &self,
        stream: S,
        dispatcher: Dispatcher,
        control_tx: &mpsc::UnboundedSender<ControlCommand>,
        control_rx: &mut mpsc::UnboundedReceiver<ControlCommand>,
    ) -> (Dispatcher, Result<Option<DeviceExit>, DeviceError>)
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        self.stats.links_total.fetch_add(1, Ordering::Relaxed);
        let (reader, mut writer) = tokio::io::split(stream);
        let (frame_tx, mut frame_rx) = mpsc::unbounded_channel::<Bytes>();

        let writer_task = tokio::spawn(async move {
            while let Some(frame) = frame_rx.recv().await {
                writer.write_all(&frame).await?;
                writer.flush().await?;
            }
            Ok::<_, std::io::Error>(())
        });

        let receiver = Receiver::new(
            &self.config.receiver,
            dispatcher,
            Outbound::new(frame_tx),
            control_tx.clone(),
        );
        let result = self.link_loop(reader, &receiver, control_rx).await;

        self.record(&receiver);
        let dispatcher = receiver.into_dispatcher();

        // All senders are gone now; the writer drains what is queued and stops.
        match writer_task.await {
            Ok(Err(e)) => tracing::debug!("Writer stopped: {}", e),
            Err(e) => tracing::error!("Writer task failed: {}", e),
            Ok(Ok(())) => {}
        }

        (dispatcher, result)
    }

    async fn link_loop<S>(
        &self,
        mut reader: ReadHalf<S>,
        receiver: &Receiver,
        control_rx: &mut mpsc::UnboundedReceiver<ControlCommand>,
    ) -> Result<Option<DeviceExit>, DeviceError>
    where
        S: AsyncRead + AsyncWrite,
    {
        let idle_timeout = self.config.receiver.idle_timeout();
        let mut shutdown_rx = self.shutdown.subscribe();
        let mut buf = vec![0u8; self.config.receiver.buffer_size];

        loop {
            let awaiting_more = receiver.awaiting_more();

            tokio::select! {
                result = reader.read(&mut buf) => {
                    match result {
                        Ok(0) => {
                            tracing::debug!("Link closed by host");
                            return Ok(None);
                        }
                        Ok(n) => receiver.on_bytes(&buf[..n]),
                        Err(e) => return Err(DeviceError::Io(e)),
                    }
                }

                // Restarted on every pass, so it only fires after a quiet spell.
                _ = tokio::time::sleep(idle_timeout), if awaiting_more => {
                    receiver.give_up();
                }

                Some(command) = control_rx.recv() => {
                    return Ok(Some(match command {
                        ControlCommand::Shutdown => {
                            tracing::info!("Shutdown requested by host");
                            DeviceExit::Shutdown
                        }
                        ControlCommand::Reboot { delay } => {
                            tracing::info!(?delay, "Reboot requested by host");
                            tokio::time::sleep(delay).await;
                            DeviceExit::Reboot
                        }
                    }));
                }

                _ = shutdown_rx.recv() => {
                    tracing::debug!("Shutdown signal received");
                    return Err(DeviceError::ShuttingDown);
                }
            }
        }
    }

    fn record(&self, receiver: &Receiver) {
        let link = receiver.stats();
        let bytes = link.bytes_received.load(Ordering::Relaxed);
        let decoded = link.frames_decoded.load(Ordering::Relaxed);
        let corrupt = link.frames_corrupt.load(Ordering::Relaxed);
        let sent = receiver.frames_sent();

        self.stats.bytes_received.fetch_add(bytes, Ordering::Relaxed);
        self.stats.frames_decoded.fetch_add(decoded, Ordering::Relaxed);
        self.stats.frames_corrupt.fetch_add(corrupt, Ordering::Relaxed);
        self.stats.frames_sent.fetch_add(sent, Ordering::Relaxed);

        tracing::info!(bytes, decoded, corrupt, sent, "Link statistics");
    }

    /// Initiates device shutdown.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(());
    }

    /// Returns whether the device loop is running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Returns device statistics.
    pub fn stats(&self) -> &DeviceStats {
        &self.stats
    }

    pub fn config(&self) -> &Config {
        &self.config
    }
}
