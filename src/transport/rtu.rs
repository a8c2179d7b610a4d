//! The RTU frame state machine: byte reception under interrupt, end-of-frame
//! detection and validation under task-level polling, CRC-protected framing,
//! and the `tx_in_progress` / buffer-ownership handoff between the two.

use crate::error::TransportError;
use crate::event::{ContextKind, ContextRef, EventId, EventQueue};
use crate::packet::Packet;
use crate::port::{CriticalSection, Parity, SerialPort, StopBits, TickSource};
use crate::transport::{Role, RtuState};
use crate::{BROADCAST_ADDRESS, MAX_ADU_LEN};

/// How many times [`RtuTransport::transmit`] re-samples the tick source
/// while waiting for the line to leave `INIT` on its first call, per the
/// bounded-wait resolution of the INIT-to-IDLE open question.
const INIT_WAIT_MAX_SAMPLES: u32 = 64;

/// Construction parameters for an [`RtuTransport`].
#[derive(Debug, Clone, Copy)]
pub struct RtuConfig {
	pub baud: u32,
	pub parity: Parity,
	pub stop_bits: StopBits,
	/// 0 selects the client/master role; 1..=247 selects the server/slave
	/// role with that node address.
	pub node_address: u8,
	/// Identifies the UART port this transport owns, for the
	/// [`crate::pool::PortRegistry`] the embedder registers it with at
	/// [`crate::channel::Runtime::new`] time (Invariant 1).
	pub port_id: u8,
}

/// Character time derived timing, in 50 µs ticks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timing {
	pub t1_5: u16,
	pub t3_5: u16,
}

fn ceil_div(numerator: u32, denominator: u32) -> u32 {
	(numerator + denominator - 1) / denominator
}

impl Timing {
	/// Derive `t1.5`/`t3.5` from a baud rate, in 50 µs ticks.
	///
	/// Above 19200 bps the character time floor no longer dominates and the
	/// thresholds are pinned at 750 µs / 1750 µs. At or below it, `t3.5`
	/// carries one extra tick of slack beyond its raw ceiling so the gap
	/// between `t1.5` and `t3.5` never collapses near the low-baud/high-baud
	/// boundary; `t1.5` does not need the same margin.
	pub fn for_baud(baud: u32) -> Self {
		if baud > 19200 {
			Self { t1_5: 16, t3_5: 36 }
		} else {
			let t1_5 = ceil_div(330_000, baud) as u16;
			let t3_5 = ceil_div(770_000, baud) as u16 + 1;
			Self { t1_5, t3_5 }
		}
	}
}

/// The RTU frame-level state machine (component C3).
///
/// Generic over the [`SerialPort`] and [`TickSource`] the embedder supplies.
/// `on_rx_data` and `on_tx_complete` are the two entry points an ISR calls;
/// every other method runs at task level and expects to be called with a
/// [`CriticalSection`] guard in hand so it is never interleaved with those
/// two.
pub struct RtuTransport<P, T> {
	port: P,
	tick: T,
	role: Role,
	node_address: u8,
	port_id: u8,
	state: RtuState,
	timing: Timing,
	construct_time: u16,
	last_rx_time: u16,
	write_cursor: usize,
	rx_frame_ok: bool,
	tx_in_progress: bool,
	rx: Packet,
	tx: Packet,
	self_ref: Option<ContextRef>,
	bound_channel: Option<ContextRef>,
	/// Set by a bound client channel before each request; `validate()`
	/// enforces that an inbound frame's address matches it. `None` means no
	/// reply is currently expected (a server ignores this field entirely).
	client_expected_address: Option<u8>,
}

impl<P, T> RtuTransport<P, T>
where
	P: SerialPort,
	T: TickSource,
{
	/// Construct and initialize the UART, entering `INIT`. Does not yet post
	/// `StartPolling`: call [`Self::start`] once the context has a handle.
	pub fn new(mut port: P, tick: T, config: RtuConfig) -> Result<Self, crate::ConfigError> {
		if config.baud == 0 {
			error!(target: "modbus::transport", "construction failed: invalid baud {}", config.baud);
			return Err(crate::ConfigError::InvalidBaud(config.baud));
		}
		let role = if config.node_address == BROADCAST_ADDRESS {
			Role::Client
		} else if config.node_address <= 247 {
			Role::Server
		} else {
			error!(target: "modbus::transport", "construction failed: invalid node address {}", config.node_address);
			return Err(crate::ConfigError::InvalidNodeAddress(config.node_address));
		};
		port.init(config.baud, config.stop_bits, config.parity).map_err(|_| {
			error!(target: "modbus::transport", "construction failed: port init failed");
			crate::ConfigError::PortInitFailed
		})?;
		let now = tick.ticks();
		Ok(Self {
			port,
			tick,
			role,
			node_address: config.node_address,
			port_id: config.port_id,
			state: RtuState::Init,
			timing: Timing::for_baud(config.baud),
			construct_time: now,
			last_rx_time: now,
			write_cursor: 0,
			rx_frame_ok: false,
			tx_in_progress: false,
			rx: Packet::new(),
			tx: Packet::new(),
			self_ref: None,
			bound_channel: None,
			client_expected_address: None,
		})
	}

	pub fn role(&self) -> Role {
		self.role
	}

	/// The UART port identifier this transport was constructed with.
	pub fn port_id(&self) -> u8 {
		self.port_id
	}

	pub fn state(&self) -> RtuState {
		self.state
	}

	pub fn timing(&self) -> Timing {
		self.timing
	}

	/// Current reading of the bound tick source, for callers (the client
	/// channel's deadline logic) that need to timestamp their own events.
	pub fn ticks(&self) -> u16 {
		self.tick.ticks()
	}

	/// The underlying port, for embedders (and tests) that need to inspect
	/// or reconfigure it directly.
	pub fn port(&self) -> &P {
		&self.port
	}

	/// Register this transport's own handle and post the initial
	/// `StartPolling` that watches for the INIT-to-IDLE silence.
	pub fn start<const N: usize>(&mut self, self_ref: ContextRef, queue: &mut EventQueue<N>) {
		debug_assert_eq!(self_ref.kind, ContextKind::Transport);
		self.self_ref = Some(self_ref);
		let _ = queue.post(self_ref, EventId::StartPolling, false);
	}

	/// Bind a server or client channel (Invariant 2: exactly one).
	pub fn bind_channel(&mut self, channel: ContextRef) -> Result<(), crate::ConfigError> {
		if self.bound_channel.is_some() {
			error!(target: "modbus::transport", "construction failed: channel already bound");
			return Err(crate::ConfigError::ChannelAlreadyBound);
		}
		self.bound_channel = Some(channel);
		Ok(())
	}

	/// Used by a bound client channel to arm the address filter for the
	/// reply to an outstanding request.
	pub(crate) fn client_expect_reply_from(&mut self, addr: u8) {
		self.client_expected_address = Some(addr);
	}

	pub(crate) fn client_clear_expected_reply(&mut self) {
		self.client_expected_address = None;
	}

	/// The most recently validated inbound PDU. Valid to read while in
	/// `Validation`.
	pub fn rx_packet(&self) -> &Packet {
		&self.rx
	}

	/// The packet a channel fills in before calling [`Self::transmit`].
	pub fn tx_packet_mut(&mut self) -> &mut Packet {
		&mut self.tx
	}

	// ---- ISR context -------------------------------------------------

	/// Byte(s) arrived on the wire. Called directly from the embedder's UART
	/// rx ISR — never wrapped in a critical section, per the concurrency
	/// model's ISR/task priority invariant.
	pub fn on_rx_data<const N: usize>(&mut self, data: &[u8], queue: &mut EventQueue<N>) {
		if data.is_empty() {
			return;
		}
		let now = self.tick.ticks();
		let prev_rx_time = self.last_rx_time;
		self.last_rx_time = now;

		match self.state {
			RtuState::Reception => {
				if now.wrapping_sub(prev_rx_time) >= self.timing.t1_5 {
					trace!(target: "modbus::transport", "inter-character timeout, frame NOK");
					self.rx_frame_ok = false;
				}
				if self.write_cursor + data.len() > MAX_ADU_LEN {
					trace!(target: "modbus::transport", "rx buffer overflow, frame NOK");
					self.rx_frame_ok = false;
				}
				if self.rx_frame_ok {
					let end = self.write_cursor + data.len();
					self.rx.raw_mut()[self.write_cursor..end].copy_from_slice(data);
					self.write_cursor = end;
				}
			}
			RtuState::Idle => {
				let len = data.len().min(MAX_ADU_LEN);
				self.rx.raw_mut()[..len].copy_from_slice(&data[..len]);
				self.write_cursor = len;
				self.rx_frame_ok = true;
				self.state = RtuState::Reception;
				if let Some(self_ref) = self.self_ref {
					let _ = queue.post(self_ref, EventId::StartPolling, true);
				}
			}
			RtuState::Init | RtuState::Validation | RtuState::Transmission => {
				// Line is owned by INIT silence-watch, the validator, or tx.
			}
		}
	}

	/// UART reports the pending transmission is complete. Called directly
	/// from the embedder's tx-complete ISR.
	pub fn on_tx_complete<const N: usize>(&mut self, queue: &mut EventQueue<N>) {
		self.tx_in_progress = false;
		self.state = RtuState::Idle;
		if let Some(channel) = self.bound_channel {
			let _ = queue.post(channel, EventId::PduTransmitted, true);
		}
	}

	// ---- task context --------------------------------------------------

	/// Periodic poll callback: detects end-of-frame (3.5 char idle) and the
	/// INIT-to-IDLE transition. Must be called with `cs` held.
	pub fn poll<const N: usize>(&mut self, cs: &impl CriticalSection, queue: &mut EventQueue<N>) {
		cs.with(|| self.poll_locked(queue));
	}

	fn poll_locked<const N: usize>(&mut self, queue: &mut EventQueue<N>) {
		let now = self.tick.ticks();
		match self.state {
			RtuState::Init => {
				if now.wrapping_sub(self.construct_time) >= self.timing.t3_5 {
					debug!(target: "modbus::transport", "INIT silence elapsed, entering IDLE");
					self.state = RtuState::Idle;
					self.stop_polling_self(queue);
				}
			}
			RtuState::Reception => {
				if now.wrapping_sub(self.last_rx_time) >= self.timing.t3_5 {
					if self.rx_frame_ok {
						self.state = RtuState::Validation;
						self.stop_polling_self(queue);
						self.validate(queue);
					} else {
						debug!(target: "modbus::transport", "discarding NOK frame, back to IDLE");
						self.state = RtuState::Idle;
						self.write_cursor = 0;
						self.stop_polling_self(queue);
					}
				}
			}
			RtuState::Idle | RtuState::Validation | RtuState::Transmission => {}
		}
	}

	fn stop_polling_self<const N: usize>(&self, queue: &mut EventQueue<N>) {
		if let Some(self_ref) = self.self_ref {
			let _ = queue.post(self_ref, EventId::StopPolling, false);
		}
	}

	/// Validate the buffered frame: length, CRC, destination address. On
	/// success publishes the PDU view and posts `PduReceived`; on any
	/// failure silently discards and returns to `IDLE`. Must run with `cs`
	/// held (called inline from [`Self::poll_locked`], which already holds
	/// it).
	fn validate<const N: usize>(&mut self, queue: &mut EventQueue<N>) {
		if self.write_cursor < 4 {
			trace!(target: "modbus::transport", "short frame ({} bytes), discarding", self.write_cursor);
			self.discard_to_idle();
			return;
		}
		let body = &self.rx.raw()[0..self.write_cursor - 2];
		let computed = crate::crc::crc16(body);
		let wire = [self.rx.raw()[self.write_cursor - 2], self.rx.raw()[self.write_cursor - 1]];
		if computed.to_le_bytes() != wire {
			trace!(target: "modbus::transport", "CRC mismatch, discarding");
			self.discard_to_idle();
			return;
		}
		let address = self.rx.raw()[0];
		let accept = match self.role {
			Role::Server => address == self.node_address || address == BROADCAST_ADDRESS,
			Role::Client => self.client_expected_address == Some(address),
		};
		if !accept {
			trace!(target: "modbus::transport", "address {address} not ours, discarding");
			self.discard_to_idle();
			return;
		}
		self.rx.set_data_len(self.write_cursor - 4);
		if let Some(channel) = self.bound_channel {
			let _ = queue.post(channel, EventId::PduReceived, false);
		}
		// Remains in Validation until the channel calls reception_done().
	}

	fn discard_to_idle(&mut self) {
		self.state = RtuState::Idle;
		self.write_cursor = 0;
	}

	/// Called by the bound channel once it has finished reading `rx_packet`.
	/// Must run with `cs` held.
	pub fn reception_done(&mut self, cs: &impl CriticalSection) {
		cs.with(|| {
			debug_assert_eq!(self.state, RtuState::Validation);
			self.state = RtuState::Idle;
			self.write_cursor = 0;
		});
	}

	/// Busy-wait (bounded) for the line to leave `INIT`, sampling the tick
	/// source directly rather than relying on the polling loop having run.
	/// Resolves the "wait for INIT-to-IDLE on first transmit" open question.
	fn ensure_out_of_init(&mut self) -> Result<(), TransportError> {
		if self.state != RtuState::Init {
			return Ok(());
		}
		for _ in 0..INIT_WAIT_MAX_SAMPLES {
			let now = self.tick.ticks();
			if now.wrapping_sub(self.construct_time) >= self.timing.t3_5 {
				self.state = RtuState::Idle;
				return Ok(());
			}
		}
		Err(TransportError::InitTimeout)
	}

	/// Frame and transmit whatever has been written into the tx packet
	/// (via [`Self::tx_packet_mut`]) to `address`. Must run with `cs` held.
	pub fn transmit(&mut self, cs: &impl CriticalSection, address: u8) -> Result<(), TransportError> {
		cs.with(|| {
			self.ensure_out_of_init()?;
			if self.state != RtuState::Idle || self.tx_in_progress {
				return Err(TransportError::Busy);
			}
			if self.tx.data_len() > Packet::MAX_DATA_LEN {
				return Err(TransportError::PduTooLarge(self.tx.data_len()));
			}
			self.tx_in_progress = true;
			self.tx.set_address(address);
			let len = self.tx.append_crc();
			self.state = RtuState::Transmission;
			match self.port.transmit(&self.tx.raw()[..len]) {
				Ok(()) => Ok(()),
				Err(_) => {
					self.tx_in_progress = false;
					self.state = RtuState::Idle;
					Err(TransportError::PortTransmitFailed)
				}
			}
		})
	}
}
