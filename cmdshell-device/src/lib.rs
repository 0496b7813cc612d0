//! # cmdshell-device
//!
//! Device side of the cmdshell serial command link.
//!
//! This crate provides:
//! - A receiver that scans link bytes into framed Messages
//! - Command dispatch to pluggable modules
//! - Built-in system, GPIO and RNG modules
//! - A device loop over a TCP bridge or a serial device node

pub mod config;
pub mod device;
pub mod dispatcher;
pub mod error;
pub mod module;
pub mod modules;
pub mod receiver;
pub mod stream;

pub use config::{Config, ConfigError, DispatchConfig, InfoConfig, ReceiverConfig, TransportConfig};
pub use device::{Device, DeviceExit, DeviceStats};
pub use dispatcher::{CommandTable, Dispatched, Dispatcher};
pub use error::DeviceError;
pub use module::{CommandDef, CommandModule, ControlCommand, HandlerContext, HandlerState, Outbound};
pub use modules::Module;
pub use receiver::{Receiver, ReceiverStats};
pub use stream::SerialStream;
