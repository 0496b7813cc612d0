//! Built-in command modules.

pub mod io;
pub mod rng;
pub mod system;

pub use io::{IoModule, PinBank, SimulatedPins, PIN_COUNT};
pub use rng::{OsRandom, RandomSource, RngModule};
pub use system::{DeviceClock, SystemModule};

use crate::error::DeviceError;
use crate::module::{self, CommandModule, HandlerContext};
use cmdshell_protocol::{Message, Response};

/// The closed set of modules a device can host.
pub enum Module {
    Io(IoModule),
    System(SystemModule),
    Rng(RngModule),
}

/// Name and help of one command, as registered in the dispatch table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Descriptor {
    pub name: &'static str,
    pub help: &'static str,
}

fn descriptors_of<M: CommandModule + 'static>() -> Vec<Descriptor> {
    M::commands()
        .iter()
        .map(|def| Descriptor {
            name: def.name,
            help: def.help,
        })
        .collect()
}

impl Module {
    pub fn name(&self) -> &'static str {
        match self {
            Module::Io(_) => IoModule::NAME,
            Module::System(_) => SystemModule::NAME,
            Module::Rng(_) => RngModule::NAME,
        }
    }

    /// Commands in declaration order; indices are stable.
    pub fn descriptors(&self) -> Vec<Descriptor> {
        match self {
            Module::Io(_) => descriptors_of::<IoModule>(),
            Module::System(_) => descriptors_of::<SystemModule>(),
            Module::Rng(_) => descriptors_of::<RngModule>(),
        }
    }

    pub fn start(&mut self) -> Result<(), DeviceError> {
        match self {
            Module::Io(m) => m.start(),
            Module::System(m) => m.start(),
            Module::Rng(m) => m.start(),
        }
    }

    pub fn stop(&mut self) {
        match self {
            Module::Io(m) => m.stop(),
            Module::System(m) => m.stop(),
            Module::Rng(m) => m.stop(),
        }
    }

    pub fn ready_for_command(&self) -> bool {
        match self {
            Module::Io(m) => m.ready_for_command(),
            Module::System(m) => m.ready_for_command(),
            Module::Rng(m) => m.ready_for_command(),
        }
    }

    pub fn last_result(&self) -> Option<&Response> {
        match self {
            Module::Io(m) => m.last_result(),
            Module::System(m) => m.last_result(),
            Module::Rng(m) => m.last_result(),
        }
    }

    /// Runs the command at `index` of this module's descriptors.
    pub(crate) fn invoke(
        &mut self,
        index: usize,
        msg: &Message,
        ctx: &HandlerContext<'_>,
    ) -> Option<Response> {
        match self {
            Module::Io(m) => module::invoke(m, index, msg, ctx),
            Module::System(m) => module::invoke(m, index, msg, ctx),
            Module::Rng(m) => module::invoke(m, index, msg, ctx),
        }
    }
}

impl From<IoModule> for Module {
    fn from(m: IoModule) -> Self {
        Module::Io(m)
    }
}

impl From<SystemModule> for Module {
    fn from(m: SystemModule) -> Self {
        Module::System(m)
    }
}

impl From<RngModule> for Module {
    fn from(m: RngModule) -> Self {
        Module::Rng(m)
    }
}
