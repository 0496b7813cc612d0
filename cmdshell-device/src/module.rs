//! Command module contract and the capabilities handed to handlers.

use crate::error::DeviceError;
use bytes::Bytes;
use cmdshell_protocol::{Message, ResultCode, Response};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Handler function for one command of module `M`.
///
/// `Ok(Some(_))` is sent back to the host. `Ok(None)` sends nothing, which
/// only the shutdown and reboot commands use.
pub type Handler<M> =
    fn(&mut M, &Message, &HandlerContext<'_>) -> Result<Option<Response>, DeviceError>;

/// One command exposed by a module.
pub struct CommandDef<M> {
    pub name: &'static str,
    pub help: &'static str,
    pub handler: Handler<M>,
}

impl<M> CommandDef<M> {
    pub const fn new(name: &'static str, help: &'static str, handler: Handler<M>) -> Self {
        Self {
            name,
            help,
            handler,
        }
    }
}

/// Busy flag and last produced Result, embedded in every module.
#[derive(Debug, Default)]
pub struct HandlerState {
    busy: bool,
    last_result: Option<Response>,
}

/// A pluggable set of commands with a start/stop lifecycle.
pub trait CommandModule: Send + Sized {
    /// Module name used in logs and errors.
    const NAME: &'static str;

    /// Commands this module answers.
    fn commands() -> &'static [CommandDef<Self>];

    fn state(&self) -> &HandlerState;

    fn state_mut(&mut self) -> &mut HandlerState;

    fn start(&mut self) -> Result<(), DeviceError> {
        Ok(())
    }

    fn stop(&mut self) {}

    /// Advisory: false while a handler of this module runs.
    fn ready_for_command(&self) -> bool {
        !self.state().busy
    }

    fn last_result(&self) -> Option<&Response> {
        self.state().last_result.as_ref()
    }
}

/// Runs one handler with the busy flag raised.
///
/// Errors and panics become error Results; they never escape.
pub(crate) fn invoke<M: CommandModule + 'static>(
    module: &mut M,
    index: usize,
    msg: &Message,
    ctx: &HandlerContext<'_>,
) -> Option<Response> {
    let def = &M::commands()[index];
    module.state_mut().busy = true;

    let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        (def.handler)(module, msg, ctx)
    }))
    .unwrap_or_else(|panic| Err(DeviceError::HandlerPanic(panic_message(panic.as_ref()))));

    let response = match outcome {
        Ok(response) => response,
        Err(e) => {
            tracing::debug!(module = M::NAME, command = def.name, "handler error: {}", e);
            Some(e.to_response(msg))
        }
    };

    let state = module.state_mut();
    state.last_result = response.clone();
    state.busy = false;
    response
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Out-of-band requests from a handler to the device loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlCommand {
    Shutdown,
    Reboot { delay: Duration },
}

/// Sending half of the link: encoded frames queued for the writer task.
#[derive(Debug, Clone)]
pub struct Outbound {
    tx: mpsc::UnboundedSender<Bytes>,
    sent: Arc<AtomicU64>,
}

impl Outbound {
    pub fn new(tx: mpsc::UnboundedSender<Bytes>) -> Self {
        Self {
            tx,
            sent: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Encodes and queues a Result.
    ///
    /// A Result too large to frame is replaced by an `InternalException`.
    pub fn send_result(&self, response: &Response) -> ResultCode {
        let frame = match response.encode() {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(sequence = response.sequence, "cannot encode result: {}", e);
                let fallback = Response::error(
                    response.sequence,
                    response.callback_id,
                    ResultCode::InternalException,
                    e.to_string(),
                );
                match fallback.encode() {
                    Ok(frame) => frame,
                    Err(_) => return ResultCode::InternalException,
                }
            }
        };
        tracing::debug!(
            sequence = response.sequence,
            code = %response.code,
            "sending result"
        );
        self.push(frame).map_or_else(|e| e.result_code(), |()| ResultCode::Success)
    }

    /// Encodes and queues a device-initiated Message.
    pub fn send_message(&self, msg: &Message) -> ResultCode {
        match msg.encode() {
            Ok(frame) => self
                .push(frame)
                .map_or_else(|e| e.result_code(), |()| ResultCode::Success),
            Err(e) => {
                tracing::warn!(
                    command = %msg.command,
                    "cannot encode unsolicited message: {}",
                    e
                );
                ResultCode::ParameterError
            }
        }
    }

    fn push(&self, frame: Bytes) -> Result<(), DeviceError> {
        self.tx.send(frame).map_err(|_| {
            tracing::debug!("port closed, frame dropped");
            DeviceError::PortClosed
        })?;
        self.sent.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Frames queued so far.
    pub fn sent(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Source of help text, implemented by the dispatch table.
pub trait HelpIndex {
    /// Help for `command`, or every command when it is empty.
    fn help_text(&self, command: &str) -> String;
}

/// Capabilities available to a running handler.
pub struct HandlerContext<'a> {
    outbound: &'a Outbound,
    help: &'a dyn HelpIndex,
    control: &'a mpsc::UnboundedSender<ControlCommand>,
}

impl<'a> HandlerContext<'a> {
    pub fn new(
        outbound: &'a Outbound,
        help: &'a dyn HelpIndex,
        control: &'a mpsc::UnboundedSender<ControlCommand>,
    ) -> Self {
        Self {
            outbound,
            help,
            control,
        }
    }

    /// Sends an extra Result ahead of the handler's own.
    pub fn send_result(&self, response: &Response) -> ResultCode {
        self.outbound.send_result(response)
    }

    /// Sends a device-initiated Message to the host.
    pub fn send_unsolicited(&self, msg: &Message) -> ResultCode {
        self.outbound.send_message(msg)
    }

    pub fn help_text(&self, command: &str) -> String {
        self.help.help_text(command)
    }

    /// Asks the device loop to shut down or reboot.
    pub fn control(&self, command: ControlCommand) -> Result<(), DeviceError> {
        self.control
            .send(command)
            .map_err(|_| DeviceError::ShuttingDown)
    }
}
