//! An embedded-class Modbus RTU server and client stack.
//!
//! The crate is split along the same lines as the protocol itself: a
//! [`transport`] layer that speaks RTU framing over an abstract
//! [`port::SerialPort`], an [`event`] queue that carries frame-lifecycle
//! notifications from interrupt context to task context, and a [`channel`]
//! layer (server and/or client, gated by feature) that turns validated PDUs
//! into responses or completed requests.
//!
//! Nothing here talks to real hardware. Callers provide a [`port::SerialPort`]
//! and a [`port::TickSource`] backed by their own UART driver and timer.
#![cfg_attr(not(test), no_std)]
#![warn(rust_2018_idioms)]
#![allow(clippy::missing_safety_doc)]

#[macro_use]
extern crate log;

pub mod channel;
pub mod crc;
pub mod error;
pub mod event;
pub mod packet;
pub mod pool;
pub mod port;
pub mod transport;

#[cfg(feature = "server")]
pub mod server;

#[cfg(feature = "client")]
pub mod client;

pub use error::{ConfigError, PoolError, TransportError};
pub use event::{Event, EventId, EventQueue};
pub use packet::Packet;
pub use port::{CriticalSection, Parity, SerialPort, StopBits, TickSource};
pub use transport::rtu::{RtuConfig, RtuTransport};

/// Modbus node address reserved for broadcast requests.
pub const BROADCAST_ADDRESS: u8 = 0;

/// Maximum size of an RTU ADU on the wire (address + function + data + CRC).
pub const MAX_ADU_LEN: usize = 256;

/// Maximum size of a PDU's data section.
pub const MAX_PDU_DATA_LEN: usize = 252;
