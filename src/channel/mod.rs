//! Channel dispatch (component C4) and a single-transport runtime that ties
//! the event queue, polling set and a bound channel together.
//!
//! A channel (server or client, [`crate::server::ServerChannel`] /
//! [`crate::client::ClientChannel`]) implements [`Dispatch`]. [`Runtime`] is
//! the "one task, one transport, one channel" wiring most embedders need:
//! it owns the [`EventQueue`]/[`PollingSet`] pair and drains them the way
//! the teacher's executor drains its own ready queue, without requiring the
//! caller to hand-roll `run_one`/`run_polling`.

use crate::event::{ContextKind, ContextRef, Event, EventId, EventQueue, PollingSet};
use crate::pool::{Pool, PortRegistry};
use crate::port::{CriticalSection, SerialPort, TickSource};
use crate::transport::rtu::RtuTransport;

/// Something that can react to the two channel-facing events a transport
/// raises, and optionally wants a slice of the polling loop (a client uses
/// this for its response-timeout deadline; a server does not poll at all).
pub trait Dispatch<P, T> {
	fn kind(&self) -> ContextKind;

	/// Told its own handle once, at [`Runtime::new`] time. A channel that
	/// never posts `StartPolling`/`StopPolling` about itself (a server) can
	/// leave this as a no-op.
	fn bind_self(&mut self, self_ref: ContextRef) {
		let _ = self_ref;
	}

	/// `PduReceived`: a validated inbound frame is sitting in the bound
	/// transport's rx packet. `queue` lets a client drop its deadline poll
	/// as soon as a reply resolves the request, instead of waiting for the
	/// timeout to fire.
	fn on_pdu_received<const N: usize>(&mut self, transport: &mut RtuTransport<P, T>, cs: &impl CriticalSection, queue: &mut EventQueue<N>);

	/// `PduTransmitted`: the bound transport finished sending. Servers
	/// ignore this (stateless between requests); a client arms its
	/// response-timeout deadline here.
	fn on_pdu_transmitted<const N: usize>(&mut self, transport: &mut RtuTransport<P, T>, cs: &impl CriticalSection, queue: &mut EventQueue<N>);

	/// Called once per drain for every context currently in the polling
	/// set. Implementations that never call `queue.post(self_ref,
	/// StartPolling, ..)` are simply never polled.
	fn poll<const N: usize>(&mut self, transport: &mut RtuTransport<P, T>, cs: &impl CriticalSection, queue: &mut EventQueue<N>);
}

/// Owns one transport, one bound channel, and the event plumbing between
/// them. `N` bounds the event queue depth, `M` the polling set size (2 is
/// enough for a transport plus one client channel; a server only ever polls
/// its transport).
pub struct Runtime<D, P, T, const N: usize, const M: usize> {
	transport: RtuTransport<P, T>,
	channel: D,
	queue: EventQueue<N>,
	polling: PollingSet<M>,
	transport_ref: ContextRef,
	channel_ref: ContextRef,
}

impl<D, P, T, const N: usize, const M: usize> Runtime<D, P, T, N, M>
where
	P: SerialPort,
	T: TickSource,
{
	/// Bind `channel` to `transport`, register both with the event queue,
	/// and claim `transport`'s UART port in `registry` (Invariant 1).
	/// `transport` must not already have a bound channel, and its port id
	/// must not already be registered.
	pub fn new<const R: usize>(mut transport: RtuTransport<P, T>, mut channel: D, registry: &mut PortRegistry<R>) -> Result<Self, crate::ConfigError>
	where
		D: Dispatch<P, T>,
	{
		let mut handles: Pool<(), 2> = Pool::new(2);
		let transport_ref = ContextRef {
			kind: ContextKind::Transport,
			handle: handles.alloc(()).expect("two handles always fit a two-slot pool"),
		};
		let channel_ref = ContextRef {
			kind: channel.kind(),
			handle: handles.alloc(()).expect("two handles always fit a two-slot pool"),
		};
		registry.register(transport.port_id(), transport_ref.handle)?;
		channel.bind_self(channel_ref);
		let mut queue = EventQueue::new();
		transport.start(transport_ref, &mut queue);
		if let Err(err) = transport.bind_channel(channel_ref) {
			registry.unregister(transport.port_id());
			return Err(err);
		}
		Ok(Self {
			transport,
			channel,
			queue,
			polling: PollingSet::new(),
			transport_ref,
			channel_ref,
		})
	}

	/// Release `transport`'s UART port from `registry` and consume the
	/// runtime. Call this when tearing down a channel permanently.
	pub fn stop<const R: usize>(self, registry: &mut PortRegistry<R>) {
		registry.unregister(self.transport.port_id());
	}

	pub fn transport(&self) -> &RtuTransport<P, T> {
		&self.transport
	}

	pub fn transport_mut(&mut self) -> &mut RtuTransport<P, T> {
		&mut self.transport
	}

	pub fn channel_mut(&mut self) -> &mut D {
		&mut self.channel
	}

	/// Forward a UART rx-data ISR callback.
	pub fn on_rx_data(&mut self, data: &[u8]) {
		self.transport.on_rx_data(data, &mut self.queue);
	}

	/// Forward a UART tx-complete ISR callback.
	pub fn on_tx_complete(&mut self) {
		self.transport.on_tx_complete(&mut self.queue);
	}

	/// Drain the event queue, then run every currently polling-enabled
	/// context once. Call this from the task loop (or whatever wakes the
	/// event task per the concurrency model's suspension points).
	pub fn pump(&mut self, cs: &impl CriticalSection)
	where
		D: Dispatch<P, T>,
	{
		while let Some(event) = self.queue.pop() {
			self.dispatch_one(event, cs);
		}
		for ctx in self.polling.iter() {
			if ctx == self.transport_ref {
				self.transport.poll(cs, &mut self.queue);
			} else if ctx == self.channel_ref {
				self.channel.poll(&mut self.transport, cs, &mut self.queue);
			}
		}
	}

	fn dispatch_one(&mut self, event: Event, cs: &impl CriticalSection)
	where
		D: Dispatch<P, T>,
	{
		match event.id {
			EventId::StartPolling => self.polling.add(event.context),
			EventId::StopPolling => self.polling.remove(event.context),
			EventId::PduReceived if event.context == self.channel_ref => {
				self.channel.on_pdu_received(&mut self.transport, cs, &mut self.queue);
			}
			EventId::PduTransmitted if event.context == self.channel_ref => {
				self.channel.on_pdu_transmitted(&mut self.transport, cs, &mut self.queue);
			}
			EventId::PduReceived | EventId::PduTransmitted => {
				trace!(target: "modbus::event", "event for unbound context dropped");
			}
		}
	}
}
