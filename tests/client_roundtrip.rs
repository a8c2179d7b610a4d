//! Integration tests driving a client channel against a real transport:
//! request framing, busy-rejection, exception matching, and deadline
//! timeout.

use core::cell::Cell;
use modbus_rtu_stack::channel::Dispatch;
use modbus_rtu_stack::client::{ClientChannel, ClientError, ClientOutcome};
use modbus_rtu_stack::error::ExceptionCode;
use modbus_rtu_stack::event::{ContextKind, ContextRef, EventQueue};
use modbus_rtu_stack::pool::Pool;
use modbus_rtu_stack::port::{NoopCriticalSection, Parity, SerialPort, StopBits, TickSource};
use modbus_rtu_stack::transport::rtu::{RtuConfig, RtuTransport};

#[derive(Default)]
struct RecordingPort {
	sent: heapless::Vec<u8, 256>,
}

impl SerialPort for RecordingPort {
	type Error = ();
	fn init(&mut self, _baud: u32, _stop_bits: StopBits, _parity: Parity) -> Result<(), ()> {
		Ok(())
	}
	fn transmit(&mut self, data: &[u8]) -> Result<(), ()> {
		self.sent.clear();
		self.sent.extend_from_slice(data).unwrap();
		Ok(())
	}
}

/// A tick source that advances by one tick on every read.
struct AutoTick(Cell<u16>);
impl TickSource for AutoTick {
	fn ticks(&self) -> u16 {
		let now = self.0.get();
		self.0.set(now.wrapping_add(1));
		now
	}
}

fn framed(address: u8, function: u8, data: &[u8]) -> heapless::Vec<u8, 16> {
	let mut body = heapless::Vec::<u8, 16>::new();
	body.push(address).unwrap();
	body.push(function).unwrap();
	body.extend_from_slice(data).unwrap();
	let crc = modbus_rtu_stack::crc::crc16(&body).to_le_bytes();
	body.extend_from_slice(&crc).unwrap();
	body
}

/// Node address 0 selects the client/master role.
fn client_transport() -> RtuTransport<RecordingPort, AutoTick> {
	let cfg = RtuConfig {
		baud: 19200,
		parity: Parity::None,
		stop_bits: StopBits::One,
		node_address: 0,
		port_id: 0,
	};
	RtuTransport::new(RecordingPort::default(), AutoTick(Cell::new(0)), cfg).unwrap()
}

fn dummy_client_ref() -> ContextRef {
	let mut pool: Pool<(), 1> = Pool::new(1);
	ContextRef {
		kind: ContextKind::ClientChannel,
		handle: pool.alloc(()).unwrap(),
	}
}

/// Feed a reply frame in and poll the transport out of the 3.5-character
/// idle gap so it lands in `Validation`, ready for `on_pdu_received`.
fn deliver_reply(transport: &mut RtuTransport<RecordingPort, AutoTick>, reply: &[u8]) {
	let cs = NoopCriticalSection;
	let mut q: EventQueue<8> = EventQueue::new();
	transport.on_rx_data(reply, &mut q);
	let t3_5 = transport.timing().t3_5;
	for _ in 0..(t3_5 as u32 + 2) {
		transport.poll(&cs, &mut q);
	}
}

/// Issue a request and simulate the ISR/task handoff that normally arms the
/// deadline: transmit completes, then the channel's `PduTransmitted` hook
/// runs.
fn request_and_arm(
	client: &mut ClientChannel,
	transport: &mut RtuTransport<RecordingPort, AutoTick>,
	slave_addr: u8,
	function: u8,
	body: &[u8],
	expected_len: core::ops::RangeInclusive<usize>,
	timeout_ticks: u16,
) -> Result<(), ClientError> {
	let cs = NoopCriticalSection;
	let mut q: EventQueue<8> = EventQueue::new();
	client.request(transport, &cs, slave_addr, function, body, expected_len, timeout_ticks)?;
	transport.on_tx_complete(&mut q);
	client.on_pdu_transmitted(transport, &cs, &mut q);
	Ok(())
}

#[test]
fn request_while_pending_is_rejected_as_busy() {
	let mut client = ClientChannel::new();
	client.set_self_ref(dummy_client_ref());
	let mut transport = client_transport();

	request_and_arm(&mut client, &mut transport, 17, 0x04, &[0x00, 0x02, 0x00, 0x01], 4..=4, 50).unwrap();
	assert!(client.is_pending());

	let cs = NoopCriticalSection;
	let err = client.request(&mut transport, &cs, 17, 0x04, &[0x00, 0x00, 0x00, 0x01], 2..=2, 50);
	assert_eq!(err, Err(ClientError::Busy));
}

#[test]
fn matching_exception_reply_resolves_outcome() {
	let mut client = ClientChannel::new();
	client.set_self_ref(dummy_client_ref());
	let mut transport = client_transport();

	request_and_arm(&mut client, &mut transport, 17, 0x04, &[0x00, 0x02, 0x00, 0x01], 4..=4, 50).unwrap();

	let reply = framed(17, 0x04 | 0x80, &[0x02]); // IllegalDataAddress
	deliver_reply(&mut transport, &reply);

	let cs = NoopCriticalSection;
	let mut q: EventQueue<8> = EventQueue::new();
	client.on_pdu_received(&mut transport, &cs, &mut q);

	assert!(!client.is_pending());
	assert_eq!(client.take_outcome(), Some(ClientOutcome::Exception(ExceptionCode::IllegalDataAddress)));
}

#[test]
fn stray_reply_with_wrong_length_is_ignored_until_real_one_arrives() {
	let mut client = ClientChannel::new();
	client.set_self_ref(dummy_client_ref());
	let mut transport = client_transport();

	// Expect exactly 4 data bytes back; a same-function reply that carries
	// only 2 must not resolve the request.
	request_and_arm(&mut client, &mut transport, 17, 0x04, &[0x00, 0x02, 0x00, 0x01], 4..=4, 50).unwrap();

	let too_short = framed(17, 0x04, &[0xBE, 0xEF]);
	deliver_reply(&mut transport, &too_short);
	let cs = NoopCriticalSection;
	let mut q: EventQueue<8> = EventQueue::new();
	client.on_pdu_received(&mut transport, &cs, &mut q);
	assert!(client.is_pending());
	assert_eq!(client.take_outcome(), None);

	let real = framed(17, 0x04, &[0xDE, 0xAD, 0xBE, 0xEF]);
	deliver_reply(&mut transport, &real);
	client.on_pdu_received(&mut transport, &cs, &mut q);
	assert!(!client.is_pending());
	match client.take_outcome() {
		Some(ClientOutcome::Ok(data)) => assert_eq!(&data[..], &[0xDE, 0xAD, 0xBE, 0xEF]),
		other => panic!("expected Ok outcome, got {other:?}"),
	}
}

#[test]
fn deadline_elapses_without_reply_resolves_timeout() {
	let mut client = ClientChannel::new();
	client.set_self_ref(dummy_client_ref());
	let mut transport = client_transport();

	request_and_arm(&mut client, &mut transport, 17, 0x04, &[0x00, 0x02, 0x00, 0x01], 4..=4, 5).unwrap();
	assert!(client.is_pending());

	let cs = NoopCriticalSection;
	let mut q: EventQueue<8> = EventQueue::new();
	for _ in 0..6 {
		client.poll(&mut transport, &cs, &mut q);
	}

	assert!(!client.is_pending());
	assert_eq!(client.take_outcome(), Some(ClientOutcome::Timeout));
}
