//! # cmdshell-client
//!
//! Host side of the cmdshell serial command link.
//!
//! This crate provides:
//! - A connection over a TCP bridge or a serial device node
//! - Sequence-correlated requests with bounded re-sends
//! - A typed API for the built-in device commands

pub mod client;
pub mod connection;
pub mod error;
pub mod stream;

pub use client::Client;
pub use connection::{Connection, ConnectionConfig};
pub use error::ClientError;
pub use stream::{ClientStream, Endpoint};
