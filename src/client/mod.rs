//! Client channel (component C7): one outstanding request at a time, a
//! response-timeout deadline driven by the polling loop, and the
//! success/exception/timeout resolution the caller picks up via
//! [`ClientChannel::take_outcome`].

use crate::channel::Dispatch;
use crate::error::{ExceptionCode, TransportError};
use crate::event::{ContextKind, ContextRef, EventId, EventQueue};
use crate::packet::Packet;
use crate::port::{CriticalSection, SerialPort, TickSource};
use crate::transport::rtu::RtuTransport;
use core::ops::RangeInclusive;
use heapless::Vec;

/// Failure returned synchronously from [`ClientChannel::request`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ClientError {
	/// A request is already pending (Invariant 8).
	#[error("a request is already pending")]
	Busy,
	/// The bounded wait for the transport to leave `INIT` was exceeded.
	#[error("timed out waiting for the line to become ready")]
	Timeout,
	/// The request body does not fit the packet buffer.
	#[error("request body too large ({0} bytes)")]
	TooLarge(usize),
	/// The underlying transport rejected the send.
	#[error(transparent)]
	Transport(#[from] TransportError),
}

/// Resolution of a completed request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientOutcome {
	/// The response PDU's data section (function byte excluded).
	Ok(Vec<u8, { Packet::MAX_DATA_LEN }>),
	/// The peer returned an exception response.
	Exception(ExceptionCode),
	/// No matching reply arrived before the deadline.
	Timeout,
}

struct Pending {
	function: u8,
	/// Acceptable length of a successful reply's data section. A reply
	/// whose function code matches but whose length falls outside this
	/// range is treated like any other malformed stray reply: dropped,
	/// kept waiting for the real one.
	expected_response_len: RangeInclusive<usize>,
	timeout_ticks: u16,
	/// Tick the deadline clock started at, set once the request frame has
	/// actually gone out; `None` while still waiting on `PduTransmitted`.
	armed_at: Option<u16>,
}

/// The client side of a bound transport. Generic only over nothing of its
/// own: every call takes the bound `RtuTransport` it should act on, so one
/// `ClientChannel` works with whatever `SerialPort`/`TickSource` pair the
/// embedder picked for that transport.
pub struct ClientChannel {
	pending: Option<Pending>,
	outcome: Option<ClientOutcome>,
	self_ref: Option<ContextRef>,
}

impl ClientChannel {
	pub fn new() -> Self {
		Self {
			pending: None,
			outcome: None,
			self_ref: None,
		}
	}

	/// Register this channel's own handle, needed before a deadline can be
	/// armed via `StartPolling`.
	pub fn set_self_ref(&mut self, self_ref: ContextRef) {
		debug_assert_eq!(self_ref.kind, ContextKind::ClientChannel);
		self.self_ref = Some(self_ref);
	}

	/// `true` once a request has been issued and not yet resolved.
	pub fn is_pending(&self) -> bool {
		self.pending.is_some()
	}

	/// Take the outcome of a previously completed request, if any.
	pub fn take_outcome(&mut self) -> Option<ClientOutcome> {
		self.outcome.take()
	}

	/// Encode `function`/`body` for `slave_addr` into the transport's tx
	/// packet and kick off transmission. The timeout deadline is armed once
	/// `PduTransmitted` confirms the frame actually left. `expected_response_len`
	/// bounds the data section of a successful reply; a same-function reply
	/// outside that range is dropped like any other stray reply.
	#[allow(clippy::too_many_arguments)]
	pub fn request<P, T>(
		&mut self,
		transport: &mut RtuTransport<P, T>,
		cs: &impl CriticalSection,
		slave_addr: u8,
		function: u8,
		body: &[u8],
		expected_response_len: RangeInclusive<usize>,
		timeout_ticks: u16,
	) -> Result<(), ClientError>
	where
		P: SerialPort,
		T: TickSource,
	{
		if self.pending.is_some() {
			return Err(ClientError::Busy);
		}
		if body.len() > Packet::MAX_DATA_LEN {
			return Err(ClientError::TooLarge(body.len()));
		}
		transport.tx_packet_mut().set_function(function);
		transport.tx_packet_mut().set_data(body);
		transport.client_expect_reply_from(slave_addr);
		match transport.transmit(cs, slave_addr) {
			Ok(()) => {
				self.pending = Some(Pending {
					function,
					expected_response_len,
					timeout_ticks,
					armed_at: None,
				});
				Ok(())
			}
			Err(err) => {
				transport.client_clear_expected_reply();
				Err(match err {
					TransportError::Busy => ClientError::Busy,
					TransportError::InitTimeout => ClientError::Timeout,
					other => ClientError::Transport(other),
				})
			}
		}
	}

	fn resolve<const N: usize>(&mut self, outcome: ClientOutcome, queue: &mut EventQueue<N>) {
		self.outcome = Some(outcome);
		self.pending = None;
		if let Some(self_ref) = self.self_ref {
			let _ = queue.post(self_ref, EventId::StopPolling, false);
		}
	}
}

impl Default for ClientChannel {
	fn default() -> Self {
		Self::new()
	}
}

impl<P, T> Dispatch<P, T> for ClientChannel
where
	P: SerialPort,
	T: TickSource,
{
	fn kind(&self) -> ContextKind {
		ContextKind::ClientChannel
	}

	fn bind_self(&mut self, self_ref: ContextRef) {
		self.set_self_ref(self_ref);
	}

	fn on_pdu_received<const N: usize>(&mut self, transport: &mut RtuTransport<P, T>, cs: &impl CriticalSection, queue: &mut EventQueue<N>) {
		let rx = transport.rx_packet().clone();
		// The transport's own address filter (client_expected_address) has
		// already rejected anything not from the expected slave before this
		// event is posted; only the function code remains to check.
		let matched = self.pending.as_ref().and_then(|pending| {
			if rx.function() == pending.function {
				if !pending.expected_response_len.contains(&rx.data().len()) {
					return None;
				}
				let mut data = Vec::new();
				let _ = data.extend_from_slice(rx.data());
				Some(ClientOutcome::Ok(data))
			} else if rx.function() == pending.function | 0x80 {
				let code = rx
					.data()
					.first()
					.copied()
					.and_then(|byte| ExceptionCode::try_from(byte).ok())
					.unwrap_or(ExceptionCode::ServerDeviceFailure);
				Some(ClientOutcome::Exception(code))
			} else {
				None
			}
		});

		transport.reception_done(cs);

		if let Some(outcome) = matched {
			transport.client_clear_expected_reply();
			self.resolve(outcome, queue);
		}
		// else: a stray reply while still waiting; transport is free again
		// to receive the real one before the deadline.
	}

	fn on_pdu_transmitted<const N: usize>(&mut self, transport: &mut RtuTransport<P, T>, _cs: &impl CriticalSection, queue: &mut EventQueue<N>) {
		if let Some(pending) = &mut self.pending {
			pending.armed_at = Some(transport.ticks());
			if let Some(self_ref) = self.self_ref {
				let _ = queue.post(self_ref, EventId::StartPolling, true);
			}
		}
	}

	fn poll<const N: usize>(&mut self, transport: &mut RtuTransport<P, T>, _cs: &impl CriticalSection, queue: &mut EventQueue<N>) {
		let now = transport.ticks();
		let timed_out = match &self.pending {
			Some(Pending { armed_at: Some(armed_at), timeout_ticks, .. }) => now.wrapping_sub(*armed_at) >= *timeout_ticks,
			_ => false,
		};
		if timed_out {
			warn!(target: "modbus::client", "response deadline elapsed, resolving Timeout");
			transport.client_clear_expected_reply();
			self.resolve(ClientOutcome::Timeout, queue);
		}
	}
}
