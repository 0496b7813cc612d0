//! GPIO commands over sixteen input and sixteen output channels.

use crate::error::DeviceError;
use crate::module::{CommandDef, CommandModule, HandlerContext, HandlerState};
use cmdshell_protocol::{Message, ResultData, Response};
use parking_lot::Mutex;
use std::sync::Arc;

/// Channels per direction.
pub const PIN_COUNT: usize = 16;

const INPUT_PINS: [&str; PIN_COUNT] = [
    "PB5", "PB6", "PB7", "PB8", "PC12", "PD2", "PB3", "PB9", "PB4", "PC11", "PA14", "PC10", "PA6",
    "PA7", "PA13", "PA8",
];

const OUTPUT_PINS: [&str; PIN_COUNT] = [
    "PC0", "PC1", "PC2", "PC3", "PA0", "PA1", "PA4", "PA5", "PB10", "PB11", "PB14", "PB15", "PC6",
    "PC7", "PC8", "PC9",
];

const SET_HINT: &str = "16 character bit string, e.g. 1110100111010110";
const INPUT_HINT: &str = "Input pin number: 0 - 15";
const OUTPUT_HINT: &str = "Output pin number: 0 - 15, state: 0 - 1";

/// Access to the physical channels.
pub trait PinBank: Send {
    fn read_input(&self, pin: usize) -> Result<bool, DeviceError>;

    fn write_output(&mut self, pin: usize, state: bool) -> Result<(), DeviceError>;
}

#[derive(Debug, Default)]
struct PinLevels {
    inputs: u16,
    outputs: u16,
}

/// In-memory pins. Clones share the same levels, so a test or a front end
/// can drive inputs and observe outputs while the module owns its copy.
#[derive(Debug, Clone, Default)]
pub struct SimulatedPins {
    levels: Arc<Mutex<PinLevels>>,
}

impl SimulatedPins {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_input(&self, pin: usize, state: bool) {
        let mut levels = self.levels.lock();
        if state {
            levels.inputs |= 1 << pin;
        } else {
            levels.inputs &= !(1 << pin);
        }
    }

    pub fn set_inputs(&self, mask: u16) {
        self.levels.lock().inputs = mask;
    }

    pub fn output(&self, pin: usize) -> bool {
        self.levels.lock().outputs & (1 << pin) != 0
    }

    pub fn outputs(&self) -> u16 {
        self.levels.lock().outputs
    }
}

impl PinBank for SimulatedPins {
    fn read_input(&self, pin: usize) -> Result<bool, DeviceError> {
        if pin >= PIN_COUNT {
            return Err(DeviceError::Hardware(format!("no input pin {}", pin)));
        }
        Ok(self.levels.lock().inputs & (1 << pin) != 0)
    }

    fn write_output(&mut self, pin: usize, state: bool) -> Result<(), DeviceError> {
        if pin >= PIN_COUNT {
            return Err(DeviceError::Hardware(format!("no output pin {}", pin)));
        }
        let mut levels = self.levels.lock();
        if state {
            levels.outputs |= 1 << pin;
        } else {
            levels.outputs &= !(1 << pin);
        }
        Ok(())
    }
}

/// Built-in GPIO command module.
pub struct IoModule {
    pins: Box<dyn PinBank>,
    state: HandlerState,
}

impl IoModule {
    pub fn new(pins: impl PinBank + 'static) -> Self {
        Self {
            pins: Box::new(pins),
            state: HandlerState::default(),
        }
    }

    fn read(
        &mut self,
        msg: &Message,
        _: &HandlerContext<'_>,
    ) -> Result<Option<Response>, DeviceError> {
        let mut mask = 0u16;
        for pin in 0..PIN_COUNT {
            if self.pins.read_input(pin)? {
                mask |= 1 << pin;
            }
        }
        Ok(Some(reply(msg, ResultData::UShort(mask))))
    }

    fn set(
        &mut self,
        msg: &Message,
        _: &HandlerContext<'_>,
    ) -> Result<Option<Response>, DeviceError> {
        let bits = msg
            .arg(0)
            .ok_or_else(|| DeviceError::MissingParameter(SET_HINT.to_string()))?;
        if bits.chars().count() != PIN_COUNT {
            return Err(DeviceError::InvalidParameter(SET_HINT.to_string()));
        }

        // '0' clears a channel; any other character sets it.
        for (pin, c) in bits.chars().enumerate() {
            self.pins.write_output(pin, c != '0')?;
        }
        Ok(Some(reply(msg, ResultData::String(bits.to_string()))))
    }

    fn read_input(
        &mut self,
        msg: &Message,
        _: &HandlerContext<'_>,
    ) -> Result<Option<Response>, DeviceError> {
        let arg = msg
            .arg(0)
            .ok_or_else(|| DeviceError::MissingParameter(INPUT_HINT.to_string()))?;
        let pin = parse_pin(arg)
            .ok_or_else(|| DeviceError::InvalidParameter(INPUT_HINT.to_string()))?;

        let level = self.pins.read_input(pin)?;
        Ok(Some(reply(msg, ResultData::Byte(level as u8))))
    }

    fn set_output(
        &mut self,
        msg: &Message,
        _: &HandlerContext<'_>,
    ) -> Result<Option<Response>, DeviceError> {
        let (pin_arg, state_arg) = match (msg.arg(0), msg.arg(1)) {
            (Some(pin), Some(state)) => (pin, state),
            _ => return Err(DeviceError::MissingParameter(OUTPUT_HINT.to_string())),
        };
        let pin = parse_pin(pin_arg)
            .ok_or_else(|| DeviceError::InvalidParameter("Output pin number: 0 - 15".to_string()))?;
        let state = state_arg
            .parse::<i32>()
            .map(|v| v != 0)
            .map_err(|_| DeviceError::InvalidParameter("State: 0 - 1".to_string()))?;

        self.pins.write_output(pin, state)?;
        Ok(Some(reply(msg, ResultData::Byte(state as u8))))
    }

    fn pin_map(
        &mut self,
        msg: &Message,
        _: &HandlerContext<'_>,
    ) -> Result<Option<Response>, DeviceError> {
        let map = match msg.arg(0) {
            Some(which) if which.eq_ignore_ascii_case("input") => render_map("Input", &INPUT_PINS),
            Some(_) => render_map("Output", &OUTPUT_PINS),
            None => render_map("Input", &INPUT_PINS) + &render_map("Output", &OUTPUT_PINS),
        };
        Ok(Some(reply(msg, ResultData::String(map))))
    }
}

fn parse_pin(arg: &str) -> Option<usize> {
    arg.parse::<usize>().ok().filter(|pin| *pin < PIN_COUNT)
}

fn render_map(direction: &str, pins: &[&str; PIN_COUNT]) -> String {
    pins.iter()
        .enumerate()
        .map(|(i, name)| format!("{} Pin {:>2} = {}\n", direction, i, name))
        .collect()
}

fn reply(msg: &Message, data: ResultData) -> Response {
    Response::success(msg.sequence, msg.callback_id, data)
}

static COMMANDS: [CommandDef<IoModule>; 7] = [
    CommandDef::new("read", "Read all input states 0 - 15", IoModule::read),
    CommandDef::new(
        "set",
        "Set all output states 0 - 15. Param: 16 char bit string, e.g. 1110100111010110",
        IoModule::set,
    ),
    CommandDef::new(
        "readinput",
        "Read input state of given pin. Params: [0-15]",
        IoModule::read_input,
    ),
    CommandDef::new(
        "ri",
        "Read input state of given pin. Params: [0-15]",
        IoModule::read_input,
    ),
    CommandDef::new(
        "setoutput",
        "Set output state of given pin. Params: [0-15] [0|1]",
        IoModule::set_output,
    ),
    CommandDef::new(
        "so",
        "Set output state of given pin. Params: [0-15] [0|1]",
        IoModule::set_output,
    ),
    CommandDef::new(
        "getpinmap",
        "Get mapping of pins. Params: [input|output]",
        IoModule::pin_map,
    ),
];

impl CommandModule for IoModule {
    const NAME: &'static str = "io";

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
    use crate::module::{invoke, ControlCommand, HelpIndex, Outbound};
    use cmdshell_protocol::ResultCode;
    use proptest::prelude::*;
    use tokio::sync::mpsc;

    struct NoHelp;

    impl HelpIndex for NoHelp {
        fn help_text(&self, _command: &str) -> String {
            String::new()
        }
    }

    struct FaultyPins;

    impl PinBank for FaultyPins {
        fn read_input(&self, _pin: usize) -> Result<bool, DeviceError> {
            Err(DeviceError::Hardware("bus fault".to_string()))
        }

        fn write_output(&mut self, _pin: usize, _state: bool) -> Result<(), DeviceError> {
            Err(DeviceError::Hardware("bus fault".to_string()))
        }
    }

    fn run(module: &mut IoModule, line: &str) -> Response {
        let (tx, _rx) = mpsc::unbounded_channel();
        let (control_tx, _control_rx) = mpsc::unbounded_channel::<ControlCommand>();
        let outbound = Outbound::new(tx);
        let ctx = HandlerContext::new(&outbound, &NoHelp, &control_tx);

        let msg = Message::parse_line(9, 0, line).unwrap();
        let index = COMMANDS
            .iter()
            .position(|def| def.name == msg.command)
            .unwrap();
        invoke(module, index, &msg, &ctx).unwrap()
    }

    #[test]
    fn test_set_programs_outputs_and_echoes() {
        let pins = SimulatedPins::new();
        let mut module = IoModule::new(pins.clone());

        let resp = run(&mut module, "set 1110100111010110");
        assert_eq!(resp.code, ResultCode::Success);
        assert_eq!(resp.data, ResultData::String("1110100111010110".into()));

        let expected = "1110100111010110";
        for (pin, c) in expected.chars().enumerate() {
            assert_eq!(pins.output(pin), c == '1', "pin {}", pin);
        }
    }

    #[test]
    fn test_set_argument_errors() {
        let mut module = IoModule::new(SimulatedPins::new());
        assert_eq!(run(&mut module, "set").code, ResultCode::ParameterMissing);
        assert_eq!(run(&mut module, "set 101").code, ResultCode::ParameterError);
        assert_eq!(
            run(&mut module, "set 11101001110101101").code,
            ResultCode::ParameterError
        );
    }

    #[test]
    fn test_read_input_pin() {
        let pins = SimulatedPins::new();
        let mut module = IoModule::new(pins.clone());

        assert_eq!(run(&mut module, "readinput 7").data, ResultData::Byte(0));
        pins.set_input(7, true);
        assert_eq!(run(&mut module, "ri 7").data, ResultData::Byte(1));

        assert_eq!(run(&mut module, "ri").code, ResultCode::ParameterMissing);
        assert_eq!(run(&mut module, "ri 16").code, ResultCode::ParameterError);
        assert_eq!(run(&mut module, "ri -1").code, ResultCode::ParameterError);
        assert_eq!(run(&mut module, "ri seven").code, ResultCode::ParameterError);
    }

    #[test]
    fn test_read_all_inputs() {
        let pins = SimulatedPins::new();
        pins.set_inputs(0b1000_0000_1000_0001);
        let mut module = IoModule::new(pins);

        assert_eq!(
            run(&mut module, "read").data,
            ResultData::UShort(0b1000_0000_1000_0001)
        );
    }

    #[test]
    fn test_set_output_pin() {
        let pins = SimulatedPins::new();
        let mut module = IoModule::new(pins.clone());

        let resp = run(&mut module, "so 3 1");
        assert_eq!(resp.data, ResultData::Byte(1));
        assert!(pins.output(3));

        let resp = run(&mut module, "setoutput 3 0");
        assert_eq!(resp.data, ResultData::Byte(0));
        assert!(!pins.output(3));

        assert_eq!(run(&mut module, "so 3").code, ResultCode::ParameterMissing);
        assert_eq!(run(&mut module, "so 20 1").code, ResultCode::ParameterError);
        assert_eq!(run(&mut module, "so 3 on").code, ResultCode::ParameterError);
    }

    #[test]
    fn test_pin_map() {
        let mut module = IoModule::new(SimulatedPins::new());

        let input = run(&mut module, "getpinmap input").display_text();
        assert!(input.starts_with("Input Pin  0 = PB5\n"));
        assert!(!input.contains("Output"));

        let output = run(&mut module, "getpinmap output").display_text();
        assert!(output.contains("Output Pin 15 = PC9"));

        let both = run(&mut module, "getpinmap").display_text();
        assert_eq!(both.lines().count(), 2 * PIN_COUNT);
    }

    #[test]
    fn test_hardware_fault_becomes_internal_exception() {
        let mut module = IoModule::new(FaultyPins);
        let resp = run(&mut module, "read");
        assert_eq!(resp.code, ResultCode::InternalException);
        assert!(resp.display_text().contains("bus fault"));
    }

    proptest! {
        #[test]
        fn prop_set_then_read_outputs(bits in "[01]{16}") {
            let pins = SimulatedPins::new();
            let mut module = IoModule::new(pins.clone());
            let line = format!("set {}", bits);
            let resp = run(&mut module, &line);
            prop_assert_eq!(resp.data, ResultData::String(bits.clone()));
            for (pin, c) in bits.chars().enumerate() {
                prop_assert_eq!(pins.output(pin), c == '1');
            }
        }
    }
}
