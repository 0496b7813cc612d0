//! Device-side receiver: scratch buffer, frame scanning and dispatch.

use crate::config::ReceiverConfig;
use crate::dispatcher::Dispatcher;
use crate::module::{ControlCommand, Outbound};
use cmdshell_protocol::codec::Decoded;
use cmdshell_protocol::frame::recover_sequence;
use cmdshell_protocol::{FrameDecoder, FrameKind, Message, Response};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;

/// Receiver counters.
#[derive(Debug, Default)]
pub struct ReceiverStats {
    pub bytes_received: AtomicU64,
    pub frames_decoded: AtomicU64,
    pub frames_corrupt: AtomicU64,
    pub idle_give_ups: AtomicU64,
}

struct Inner {
    scratch: FrameDecoder,
    dispatcher: Dispatcher,
}

/// Turns raw link bytes into dispatched Messages.
///
/// The scratch buffer and the dispatcher share one lock, held for the whole
/// ingest, scan, dispatch and compact cycle.
pub struct Receiver {
    inner: Mutex<Inner>,
    outbound: Outbound,
    control: mpsc::UnboundedSender<ControlCommand>,
    stats: ReceiverStats,
}

impl Receiver {
    pub fn new(
        config: &ReceiverConfig,
        dispatcher: Dispatcher,
        outbound: Outbound,
        control: mpsc::UnboundedSender<ControlCommand>,
    ) -> Self {
        Self {
            inner: Mutex::new(Inner {
                scratch: FrameDecoder::new(FrameKind::Message, config.buffer_size),
                dispatcher,
            }),
            outbound,
            control,
            stats: ReceiverStats::default(),
        }
    }

    /// Ingests a burst of bytes from the link.
    ///
    /// Bytes beyond the free scratch space are taken in further passes after
    /// complete frames have been consumed.
    pub fn on_bytes(&self, mut chunk: &[u8]) {
        tracing::trace!(len = chunk.len(), "bytes received");
        self.stats
            .bytes_received
            .fetch_add(chunk.len() as u64, Ordering::Relaxed);

        let mut inner = self.inner.lock();
        while !chunk.is_empty() {
            let taken = inner.scratch.extend(chunk);
            chunk = &chunk[taken..];
            self.drain(&mut inner);
        }
    }

    /// Abandons a partial frame after the idle timeout.
    pub fn give_up(&self) {
        let mut inner = self.inner.lock();
        if let Some(decoded) = inner.scratch.give_up() {
            self.stats.idle_give_ups.fetch_add(1, Ordering::Relaxed);
            tracing::debug!("idle timeout with partial frame buffered");
            self.handle(&mut inner, decoded);
        }
    }

    /// Returns whether a partial frame is waiting for more bytes.
    pub fn awaiting_more(&self) -> bool {
        self.inner.lock().scratch.has_partial()
    }

    /// Bytes currently held in the scratch buffer.
    pub fn buffered(&self) -> usize {
        self.inner.lock().scratch.buffered()
    }

    pub fn stats(&self) -> &ReceiverStats {
        &self.stats
    }

    /// Results and unsolicited Messages queued so far.
    pub fn frames_sent(&self) -> u64 {
        self.outbound.sent()
    }

    /// Releases the dispatcher so its modules outlive this link.
    pub fn into_dispatcher(self) -> Dispatcher {
        self.inner.into_inner().dispatcher
    }

    fn drain(&self, inner: &mut Inner) {
        while let Some(decoded) = inner.scratch.next_frame() {
            self.handle(inner, decoded);
        }
    }

    fn handle(&self, inner: &mut Inner, decoded: Decoded) {
        match decoded {
            Decoded::Frame(frame) => match Message::decode(&frame) {
                Ok(msg) => {
                    self.stats.frames_decoded.fetch_add(1, Ordering::Relaxed);
                    inner.dispatcher.dispatch(&msg, &self.outbound, &self.control);
                }
                Err(e) => {
                    tracing::warn!("undecodable message: {}", e);
                    self.reject(recover_sequence(&frame));
                }
            },
            Decoded::Corrupt { sequence } => {
                tracing::warn!(?sequence, "corrupt frame dropped");
                self.reject(sequence);
            }
        }
    }

    fn reject(&self, sequence: Option<u64>) {
        self.stats.frames_corrupt.fetch_add(1, Ordering::Relaxed);
        self.outbound
            .send_result(&Response::incomplete(sequence.unwrap_or(0)));
    }
}
