//! System commands: help, version, clock, info, ping, shutdown, reboot.

use crate::config::InfoConfig;
use crate::error::DeviceError;
use crate::module::{CommandDef, CommandModule, ControlCommand, HandlerContext, HandlerState};
use chrono::{Duration as ClockOffset, Local, NaiveDate, NaiveDateTime, NaiveTime};
use cmdshell_protocol::{Message, ResultCode, ResultData, Response};
use std::time::Duration;

const TIME_FORMAT: &str = "%H:%M:%S";
const TIME_REPLY_FORMAT: &str = "%H:%M:%S%.3f";
const DATE_FORMAT: &str = "%m/%d/%Y";

/// Emulated real-time clock: host local time plus a settable offset.
#[derive(Debug, Clone, Copy)]
pub struct DeviceClock {
    offset: ClockOffset,
}

impl Default for DeviceClock {
    fn default() -> Self {
        Self {
            offset: ClockOffset::zero(),
        }
    }
}

impl DeviceClock {
    pub fn now(&self) -> NaiveDateTime {
        Local::now().naive_local() + self.offset
    }

    /// Moves the clock to `time` on the current device date.
    pub fn set_time(&mut self, time: NaiveTime) {
        let now = self.now();
        self.shift_to(now.date().and_time(time), now);
    }

    /// Moves the clock to `date`, keeping the current device time of day.
    pub fn set_date(&mut self, date: NaiveDate) {
        let now = self.now();
        self.shift_to(date.and_time(now.time()), now);
    }

    fn shift_to(&mut self, target: NaiveDateTime, now: NaiveDateTime) {
        self.offset = self.offset + (target - now);
    }
}

/// Built-in system command module.
pub struct SystemModule {
    info: InfoConfig,
    clock: DeviceClock,
    state: HandlerState,
}

impl SystemModule {
    pub fn new(info: InfoConfig) -> Self {
        Self {
            info,
            clock: DeviceClock::default(),
            state: HandlerState::default(),
        }
    }

    pub fn clock(&self) -> &DeviceClock {
        &self.clock
    }

    fn help(
        &mut self,
        msg: &Message,
        ctx: &HandlerContext<'_>,
    ) -> Result<Option<Response>, DeviceError> {
        let text = ctx.help_text(msg.arg(0).unwrap_or(""));
        Ok(Some(string_reply(msg, text)))
    }

    fn version(
        &mut self,
        msg: &Message,
        _: &HandlerContext<'_>,
    ) -> Result<Option<Response>, DeviceError> {
        Ok(Some(string_reply(msg, format!("cmdshell {}", self.info.version))))
    }

    fn time(
        &mut self,
        msg: &Message,
        _: &HandlerContext<'_>,
    ) -> Result<Option<Response>, DeviceError> {
        if let Some(arg) = msg.arg(0) {
            let time = NaiveTime::parse_from_str(arg, TIME_FORMAT).map_err(|_| {
                DeviceError::InvalidParameter("Time format: 23:59:59".to_string())
            })?;
            self.clock.set_time(time);
            tracing::info!(time = %arg, "device time set");
        }
        let now = self.clock.now().format(TIME_REPLY_FORMAT).to_string();
        Ok(Some(string_reply(msg, now)))
    }

    fn date(
        &mut self,
        msg: &Message,
        _: &HandlerContext<'_>,
    ) -> Result<Option<Response>, DeviceError> {
        if let Some(arg) = msg.arg(0) {
            let date = NaiveDate::parse_from_str(arg, DATE_FORMAT).map_err(|_| {
                DeviceError::InvalidParameter("Date format: 12/31/2012".to_string())
            })?;
            self.clock.set_date(date);
            tracing::info!(date = %arg, "device date set");
        }
        let today = self.clock.now().format(DATE_FORMAT).to_string();
        Ok(Some(string_reply(msg, today)))
    }

    fn info(
        &mut self,
        msg: &Message,
        _: &HandlerContext<'_>,
    ) -> Result<Option<Response>, DeviceError> {
        Ok(Some(string_reply(msg, self.info.info.clone())))
    }

    fn ping(
        &mut self,
        msg: &Message,
        _: &HandlerContext<'_>,
    ) -> Result<Option<Response>, DeviceError> {
        Ok(Some(Response::status(
            msg.sequence,
            msg.callback_id,
            ResultCode::Success,
        )))
    }

    // The acknowledgment is built but never sent: the link just stops.
    fn shutdown(
        &mut self,
        msg: &Message,
        ctx: &HandlerContext<'_>,
    ) -> Result<Option<Response>, DeviceError> {
        let ack = pending(msg, "Shutting down...");
        tracing::info!(sequence = msg.sequence, "{}", ack.display_text());
        ctx.control(ControlCommand::Shutdown)?;
        Ok(None)
    }

    fn reboot(
        &mut self,
        msg: &Message,
        ctx: &HandlerContext<'_>,
    ) -> Result<Option<Response>, DeviceError> {
        let delay = match msg.arg(0) {
            Some(arg) => arg.parse::<u64>().map(Duration::from_millis).map_err(|_| {
                DeviceError::InvalidParameter("Reboot delay in milliseconds".to_string())
            })?,
            None => Duration::ZERO,
        };
        let ack = pending(msg, "Rebooting...");
        tracing::info!(sequence = msg.sequence, ?delay, "{}", ack.display_text());
        ctx.control(ControlCommand::Reboot { delay })?;
        Ok(None)
    }
}

fn string_reply(msg: &Message, text: String) -> Response {
    Response::success(msg.sequence, msg.callback_id, ResultData::String(text))
}

fn pending(msg: &Message, text: &str) -> Response {
    Response::error(msg.sequence, msg.callback_id, ResultCode::OperationPending, text)
}

static COMMANDS: [CommandDef<SystemModule>; 11] = [
    CommandDef::new("help", "Display system help", SystemModule::help),
    CommandDef::new("h", "Display system help", SystemModule::help),
    CommandDef::new("?", "Display system help", SystemModule::help),
    CommandDef::new("ver", "Display CommandShell version", SystemModule::version),
    CommandDef::new("version", "Display CommandShell version", SystemModule::version),
    CommandDef::new(
        "time",
        "Get/Set CommandShell time (param format: 23:59:59)",
        SystemModule::time,
    ),
    CommandDef::new(
        "date",
        "Get/Set CommandShell date (param format: 12/31/2012)",
        SystemModule::date,
    ),
    CommandDef::new("info", "Display CommandShell system info", SystemModule::info),
    CommandDef::new("shutdown", "Shutdown the system", SystemModule::shutdown),
    CommandDef::new("ping", "Request acknowledgement from the system", SystemModule::ping),
    CommandDef::new("reboot", "Reboot the system [milliseconds]", SystemModule::reboot),
];

impl CommandModule for SystemModule {
    const NAME: &'static str = "system";

    fn commands() -> &'static [CommandDef<Self>] {
        &COMMANDS
    }

    fn state(&self) -> &HandlerState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut HandlerState {
        &mut self.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::{invoke, HelpIndex, Outbound};
    use chrono::{Datelike, Timelike};
    use tokio::sync::mpsc;

    struct FixedHelp;

    impl HelpIndex for FixedHelp {
        fn help_text(&self, command: &str) -> String {
            if command.is_empty() {
                "all".to_string()
            } else {
                format!("help for {}", command)
            }
        }
    }

    fn index_of(name: &str) -> usize {
        COMMANDS.iter().position(|def| def.name == name).unwrap()
    }

    struct Harness {
        module: SystemModule,
        outbound: Outbound,
        control_tx: mpsc::UnboundedSender<ControlCommand>,
        control_rx: mpsc::UnboundedReceiver<ControlCommand>,
        _rx: mpsc::UnboundedReceiver<bytes::Bytes>,
    }

    impl Harness {
        fn new() -> Self {
            let (tx, rx) = mpsc::unbounded_channel();
            let (control_tx, control_rx) = mpsc::unbounded_channel();
            Self {
                module: SystemModule::new(InfoConfig::default()),
                outbound: Outbound::new(tx),
                control_tx,
                control_rx,
                _rx: rx,
            }
        }

        fn run(&mut self, line: &str) -> Option<Response> {
            let msg = Message::parse_line(1, 2, line).unwrap();
            let ctx = HandlerContext::new(&self.outbound, &FixedHelp, &self.control_tx);
            invoke(&mut self.module, index_of(&msg.command), &msg, &ctx)
        }
    }

    fn text(resp: &Response) -> String {
        match &resp.data {
            ResultData::String(s) => s.clone(),
            other => panic!("expected string, got {:?}", other),
        }
    }

    #[test]
    fn test_ping_and_info() {
        let mut h = Harness::new();
        let resp = h.run("ping").unwrap();
        assert_eq!(resp.code, ResultCode::Success);
        assert_eq!(resp.data, ResultData::None);
        assert_eq!(resp.callback_id, 2);

        let resp = h.run("info").unwrap();
        assert_eq!(text(&resp), "cmdshell device emulator");

        let resp = h.run("ver").unwrap();
        assert!(text(&resp).starts_with("cmdshell "));
    }

    #[test]
    fn test_help_forwards_argument() {
        let mut h = Harness::new();
        assert_eq!(text(&h.run("help").unwrap()), "all");
        assert_eq!(text(&h.run("? ri").unwrap()), "help for ri");
    }

    #[test]
    fn test_set_time() {
        let mut h = Harness::new();
        let resp = h.run("time 23:59:58").unwrap();
        assert_eq!(resp.code, ResultCode::Success);
        let reply = text(&resp);
        assert_eq!(reply.len(), "23:59:58.000".len());

        let now = h.module.clock().now();
        // Allow the clock to roll over into the next day mid-test.
        assert!(now.hour() == 23 || now.hour() == 0);
    }

    #[test]
    fn test_set_date() {
        let mut h = Harness::new();
        let resp = h.run("date 12/31/2012").unwrap();
        let now = h.module.clock().now();
        assert_eq!(now.year(), 2012);
        assert_eq!(now.month(), 12);
        assert_eq!(text(&resp), "12/31/2012");
    }

    #[test]
    fn test_bad_clock_arguments() {
        let mut h = Harness::new();
        assert_eq!(h.run("time 25:00").unwrap().code, ResultCode::ParameterError);
        assert_eq!(h.run("date 31/12/2012").unwrap().code, ResultCode::ParameterError);
    }

    #[test]
    fn test_shutdown_sends_nothing() {
        let mut h = Harness::new();
        assert!(h.run("shutdown").is_none());
        assert_eq!(h.control_rx.try_recv().unwrap(), ControlCommand::Shutdown);
        assert!(h.module.last_result().is_none());
    }

    #[test]
    fn test_reboot_delay() {
        let mut h = Harness::new();
        assert!(h.run("reboot 250").is_none());
        assert_eq!(
            h.control_rx.try_recv().unwrap(),
            ControlCommand::Reboot {
                delay: Duration::from_millis(250)
            }
        );

        assert!(h.run("reboot").is_none());
        assert_eq!(
            h.control_rx.try_recv().unwrap(),
            ControlCommand::Reboot {
                delay: Duration::ZERO
            }
        );

        let resp = h.run("reboot soon").unwrap();
        assert_eq!(resp.code, ResultCode::ParameterError);
        assert!(h.control_rx.try_recv().is_err());
    }
}
