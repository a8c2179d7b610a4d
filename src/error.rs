//! Error taxonomy.
//!
//! Transport-local failures (CRC mismatch, short frame, wrong address,
//! timing violations) are not represented here: the transport discards
//! those frames silently per the Modbus specification and only logs them
//! at `trace!` under the `modbus::transport` target. The types below cover
//! everything that *is* reported to a caller: construction failures, pool
//! exhaustion, a rejected `transmit()`, and (in `client`) request outcomes.

use thiserror::Error;

/// Failure constructing a transport or channel.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
	/// Baud rate of zero, or otherwise unrepresentable as a character time.
	#[error("invalid baud rate {0}")]
	InvalidBaud(u32),
	/// Server node address must be in 1..=247; broadcast and reserved
	/// addresses are not valid local addresses.
	#[error("invalid node address {0}")]
	InvalidNodeAddress(u8),
	/// The UART port id is already owned by another transport (Invariant 1).
	#[error("port {0} is already owned by another transport")]
	PortAlreadyOwned(u8),
	/// A channel is already bound to this transport (Invariant 2).
	#[error("transport already has a bound channel")]
	ChannelAlreadyBound,
	/// The underlying [`crate::port::SerialPort::init`] call failed.
	#[error("serial port initialization failed")]
	PortInitFailed,
	/// Context or port-lookup pool exhaustion that survived one grow-and-retry.
	#[error("resource pool exhausted: {0}")]
	PoolExhausted(#[from] PoolError),
}

/// Failure allocating from a [`crate::pool::Pool`].
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum PoolError {
	/// The pool's fixed backing array had no free slot even after the
	/// single grow-and-retry described in the data model's lifecycle notes.
	#[error("pool exhausted")]
	Exhausted,
	/// A handle's generation did not match the slot's current generation;
	/// the context behind it has since been freed and reused or is empty.
	#[error("stale or invalid handle")]
	StaleHandle,
}

/// Failure calling [`crate::transport::rtu::RtuTransport::transmit`].
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum TransportError {
	/// The transport is not in a state that can start a transmission
	/// (not `Idle`, or a transmission is already in flight).
	#[error("transport busy")]
	Busy,
	/// The response PDU does not fit in the 256-byte ADU buffer.
	#[error("PDU too large ({0} bytes of data)")]
	PduTooLarge(usize),
	/// The underlying [`crate::port::SerialPort::transmit`] call failed.
	#[error("serial port transmit failed")]
	PortTransmitFailed,
	/// `transmit()` was attempted before the bounded INIT-to-IDLE wait
	/// elapsed (see `SPEC_FULL.md` §4.5 / §9 Open Questions).
	#[error("timed out waiting for line to leave INIT")]
	InitTimeout,
}

/// Modbus exception codes, carried in byte 2 of an exception response PDU.
#[derive(Debug, Clone, Copy, PartialEq, Eq, num_enum::IntoPrimitive, num_enum::TryFromPrimitive)]
#[repr(u8)]
pub enum ExceptionCode {
	IllegalFunction = 0x01,
	IllegalDataAddress = 0x02,
	IllegalDataValue = 0x03,
	ServerDeviceFailure = 0x04,
}
