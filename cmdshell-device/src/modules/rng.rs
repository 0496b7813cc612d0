//! Hardware random number command.

use crate::error::DeviceError;
use crate::module::{CommandDef, CommandModule, HandlerContext, HandlerState};
use cmdshell_protocol::{Message, ResultData, Response};
use rand::rngs::OsRng;
use rand::RngCore;

/// A source of 32-bit random values.
pub trait RandomSource: Send {
    fn next_u32(&mut self) -> Result<u32, DeviceError>;
}

/// Operating-system entropy.
#[derive(Debug, Default, Clone, Copy)]
pub struct OsRandom;

impl RandomSource for OsRandom {
    fn next_u32(&mut self) -> Result<u32, DeviceError> {
        let mut raw = [0u8; 4];
        OsRng
            .try_fill_bytes(&mut raw)
            .map_err(|e| DeviceError::Hardware(e.to_string()))?;
        Ok(u32::from_be_bytes(raw))
    }
}

/// Built-in RNG command module. Unusable until started.
pub struct RngModule {
    source: Box<dyn RandomSource>,
    started: bool,
    state: HandlerState,
}

impl RngModule {
    pub fn new(source: impl RandomSource + 'static) -> Self {
        Self {
            source: Box::new(source),
            started: false,
            state: HandlerState::default(),
        }
    }

    fn get_random(
        &mut self,
        msg: &Message,
        _: &HandlerContext<'_>,
    ) -> Result<Option<Response>, DeviceError> {
        if !self.started {
            return Err(DeviceError::NotStarted(Self::NAME));
        }
        let value = self.source.next_u32()?;
        Ok(Some(Response::success(
            msg.sequence,
            msg.callback_id,
            ResultData::UInt(value),
        )))
    }
}

static COMMANDS: [CommandDef<RngModule>; 1] = [CommandDef::new(
    "getrnd",
    "Get a hardware generated random number (uint)",
    RngModule::get_random,
)];

impl CommandModule for RngModule {
    const NAME: &'static str = "rng";

    fn commands() -> &'static [CommandDef<Self>] {
        &COMMANDS
    }

    fn state(&self) -> &HandlerState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut HandlerState {
        &mut self.state
    }

    /// Draws and discards the first value, as the generator requires.
    fn start(&mut self) -> Result<(), DeviceError> {
        self.source.next_u32()?;
        self.started = true;
        Ok(())
    }

    fn stop(&mut self) {
        self.started = false;
    }
}
