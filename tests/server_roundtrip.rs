//! Integration tests driving a server channel against a real transport: a
//! framed request in, a real framed response out (or correctly withheld).

use core::cell::Cell;
use modbus_rtu_stack::channel::Dispatch;
use modbus_rtu_stack::event::EventQueue;
use modbus_rtu_stack::port::{NoopCriticalSection, Parity, SerialPort, StopBits, TickSource};
use modbus_rtu_stack::server::{ServerCallbacks, ServerChannel, ServerResult};
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

/// A tick source that advances by one tick on every read, so repeated
/// `poll()` calls simulate the passage of time without an external clock
/// handle (the transport owns the tick source once constructed).
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

fn server_transport(node_address: u8) -> RtuTransport<RecordingPort, AutoTick> {
	let cfg = RtuConfig {
		baud: 19200,
		parity: Parity::None,
		stop_bits: StopBits::One,
		node_address,
		port_id: 0,
	};
	RtuTransport::new(RecordingPort::default(), AutoTick(Cell::new(0)), cfg).unwrap()
}

/// Run `transport` out of `INIT`, feed it `req`, then poll it out of the
/// 3.5-character idle gap so it lands in `Validation`.
fn deliver(transport: &mut RtuTransport<RecordingPort, AutoTick>, req: &[u8]) {
	let cs = NoopCriticalSection;
	let mut q: EventQueue<8> = EventQueue::new();
	// Run INIT to completion first.
	let t3_5 = transport.timing().t3_5;
	for _ in 0..(t3_5 as u32 + 2) {
		transport.poll(&cs, &mut q);
		while q.pop().is_some() {}
	}
	assert_eq!(transport.state(), modbus_rtu_stack::transport::RtuState::Idle);

	transport.on_rx_data(req, &mut q);
	while q.pop().is_some() {}
	for _ in 0..(t3_5 as u32 + 2) {
		transport.poll(&cs, &mut q);
	}
}

#[test]
fn fc04_request_produces_framed_response() {
	let mut registers = [0u16; 4];
	registers[2] = 0xBEEF;
	let mut read_input = |addr: u16, out: &mut u16| {
		*out = *registers.get(addr as usize).unwrap_or(&0);
		ServerResult::Ok
	};
	let callbacks = ServerCallbacks {
		read_input_register: Some(&mut read_input),
		..Default::default()
	};
	let mut server = ServerChannel::new(callbacks);
	let mut transport = server_transport(17);

	let req = framed(17, 0x04, &[0x00, 0x02, 0x00, 0x01]);
	deliver(&mut transport, &req);
	assert_eq!(transport.state(), modbus_rtu_stack::transport::RtuState::Validation);

	let cs = NoopCriticalSection;
	let mut q: EventQueue<8> = EventQueue::new();
	server.on_pdu_received(&mut transport, &cs, &mut q);

	assert_eq!(transport.state(), modbus_rtu_stack::transport::RtuState::Transmission);
	let sent = &transport.port().sent;
	assert_eq!(&sent[0..3], &[17, 0x04, 0x02]);
	assert_eq!(&sent[3..5], &0xBEEFu16.to_be_bytes());
}

#[test]
fn fc04_bad_quantity_yields_exception_response() {
	let mut read_input = |_: u16, _: &mut u16| ServerResult::Ok;
	let callbacks = ServerCallbacks {
		read_input_register: Some(&mut read_input),
		..Default::default()
	};
	let mut server = ServerChannel::new(callbacks);
	let mut transport = server_transport(17);

	let req = framed(17, 0x04, &[0x00, 0x00, 0x00, 0x00]); // count = 0
	deliver(&mut transport, &req);

	let cs = NoopCriticalSection;
	let mut q: EventQueue<8> = EventQueue::new();
	server.on_pdu_received(&mut transport, &cs, &mut q);

	let sent = &transport.port().sent;
	assert_eq!(sent[0], 17);
	assert_eq!(sent[1], 0x04 | 0x80);
	assert_eq!(sent[2], 0x03); // IllegalDataValue
}

#[test]
fn broadcast_write_runs_but_withholds_response() {
	let last_write: Cell<Option<(u16, u16)>> = Cell::new(None);
	let mut write_holding = |addr: u16, value: u16| {
		last_write.set(Some((addr, value)));
		ServerResult::Ok
	};
	let callbacks = ServerCallbacks {
		write_holding_register: Some(&mut write_holding),
		..Default::default()
	};
	let mut server = ServerChannel::new(callbacks);
	let mut transport = server_transport(9);

	let req = framed(0, 0x06, &[0x00, 0x05, 0x00, 0x7B]);
	deliver(&mut transport, &req);

	let cs = NoopCriticalSection;
	let mut q: EventQueue<8> = EventQueue::new();
	server.on_pdu_received(&mut transport, &cs, &mut q);

	// No transmission was triggered: the transport went back to idle
	// instead of entering Transmission.
	assert_eq!(transport.state(), modbus_rtu_stack::transport::RtuState::Idle);
	assert_eq!(last_write.get(), Some((5, 0x7B)));
}
