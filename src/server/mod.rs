//! Server channel (component C5): the stateless-between-requests side that
//! turns a validated inbound PDU into a response PDU via the function-code
//! handlers in [`function`].

pub mod function;

use crate::channel::Dispatch;
use crate::error::ExceptionCode;
use crate::event::{ContextKind, EventQueue};
use crate::port::{CriticalSection, SerialPort, TickSource};
use crate::transport::rtu::RtuTransport;
use crate::BROADCAST_ADDRESS;
use function::Outcome;

/// Outcome of a single data-model callback invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerResult {
	Ok,
	IllegalDataAddr,
	DeviceFailure,
}

/// User-registered data-model callbacks. Any left `None` make their
/// function code respond with Illegal Function.
#[derive(Default)]
pub struct ServerCallbacks<'a> {
	pub read_coil: Option<&'a mut dyn FnMut(u16, &mut bool) -> ServerResult>,
	pub read_discrete_input: Option<&'a mut dyn FnMut(u16, &mut bool) -> ServerResult>,
	pub write_coil: Option<&'a mut dyn FnMut(u16, bool) -> ServerResult>,
	pub read_holding_register: Option<&'a mut dyn FnMut(u16, &mut u16) -> ServerResult>,
	pub read_input_register: Option<&'a mut dyn FnMut(u16, &mut u16) -> ServerResult>,
	pub write_holding_register: Option<&'a mut dyn FnMut(u16, u16) -> ServerResult>,
	/// Receives the full request PDU (function byte included) and the tx
	/// packet's raw scratch area; returns `None` to decline (no response)
	/// or `Some(len)` for the response PDU length it wrote, function byte
	/// included.
	pub custom: Option<&'a mut dyn FnMut(&[u8], &mut [u8]) -> Option<usize>>,
}

/// The server side of a bound transport. Holds no per-request state: every
/// field it touches lives on the transport's packets for the duration of
/// `on_pdu_received`.
pub struct ServerChannel<'a> {
	callbacks: ServerCallbacks<'a>,
}

impl<'a> ServerChannel<'a> {
	pub fn new(callbacks: ServerCallbacks<'a>) -> Self {
		Self { callbacks }
	}
}

impl<'a, P, T> Dispatch<P, T> for ServerChannel<'a>
where
	P: SerialPort,
	T: TickSource,
{
	fn kind(&self) -> ContextKind {
		ContextKind::ServerChannel
	}

	fn on_pdu_received<const N: usize>(&mut self, transport: &mut RtuTransport<P, T>, cs: &impl CriticalSection, _queue: &mut EventQueue<N>) {
		let rx = transport.rx_packet().clone();
		let broadcast = rx.address() == BROADCAST_ADDRESS;
		let function = rx.function();
		let is_standard = (0x01..=0x06).contains(&function);

		// `has_response` tracks whether a reply was actually framed into
		// the tx packet; a declining custom handler leaves it false even
		// though it ran without touching `function::dispatch` at all.
		let has_response = if is_standard {
			match function::dispatch(function, rx.data(), &mut self.callbacks, transport.tx_packet_mut().data_mut()) {
				Outcome::Response(len) => {
					transport.tx_packet_mut().set_function(function);
					transport.tx_packet_mut().set_data_len(len);
					true
				}
				Outcome::Exception(code) => {
					debug!(target: "modbus::server", "function {function:#04x} -> exception {code:?}");
					transport.tx_packet_mut().set_function(function | 0x80);
					transport.tx_packet_mut().set_data_len(1);
					transport.tx_packet_mut().data_mut()[0] = code.into();
					true
				}
				Outcome::NoResponse => false,
			}
		} else if let Some(custom) = self.callbacks.custom.as_deref_mut() {
			match custom(rx.pdu(), transport.tx_packet_mut().pdu_scratch_mut()) {
				Some(len) => {
					transport.tx_packet_mut().commit_pdu_len(len);
					true
				}
				None => false,
			}
		} else {
			debug!(target: "modbus::server", "function {function:#04x} -> exception IllegalFunction");
			transport.tx_packet_mut().set_function(function | 0x80);
			transport.tx_packet_mut().set_data_len(1);
			transport.tx_packet_mut().data_mut()[0] = ExceptionCode::IllegalFunction.into();
			true
		};

		transport.reception_done(cs);

		if !broadcast && has_response {
			if let Err(err) = transport.transmit(cs, rx.address()) {
				warn!(target: "modbus::server", "response transmit failed: {err:?}");
			}
		}
	}

	fn on_pdu_transmitted<const N: usize>(&mut self, _transport: &mut RtuTransport<P, T>, _cs: &impl CriticalSection, _queue: &mut EventQueue<N>) {
		// Stateless between requests: nothing to do.
	}

	fn poll<const N: usize>(&mut self, _transport: &mut RtuTransport<P, T>, _cs: &impl CriticalSection, _queue: &mut EventQueue<N>) {
		// The server never joins the polling set.
	}
}
