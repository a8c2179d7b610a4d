//! Per-function-code request handling (component C6).
//!
//! Every handler here follows the same skeleton: validate the request body,
//! call the matching data-model callback once per item, and translate the
//! first failure into the mapping the server uses uniformly — an absent
//! callback or an illegal-address report becomes an exception response, a
//! device failure becomes `ServerDeviceFailure`. FC04 (read input
//! registers) is the reference implementation the others are patterned on.

use crate::error::ExceptionCode;
use crate::server::{ServerCallbacks, ServerResult};

/// Result of dispatching one request to a function handler.
pub enum Outcome {
	/// A normal or exception response body of this many bytes was written
	/// into the caller-supplied buffer (data only, function byte excluded).
	Response(usize),
	/// No data-model work was done; emit `function | 0x80, code`.
	Exception(ExceptionCode),
	/// A custom handler declined to answer; the server must not transmit.
	NoResponse,
}

fn read_u16_be(data: &[u8], at: usize) -> Option<u16> {
	let bytes = data.get(at..at + 2)?;
	Some(u16::from_be_bytes([bytes[0], bytes[1]]))
}

fn map_failure(result: ServerResult) -> Outcome {
	match result {
		ServerResult::Ok => unreachable!("map_failure called only on a non-Ok result"),
		ServerResult::IllegalDataAddr => Outcome::Exception(ExceptionCode::IllegalDataAddress),
		ServerResult::DeviceFailure => Outcome::Exception(ExceptionCode::ServerDeviceFailure),
	}
}

fn read_registers(data: &[u8], callback: Option<&mut dyn FnMut(u16, &mut u16) -> ServerResult>, resp: &mut [u8]) -> Outcome {
	let Some(callback) = callback else {
		return Outcome::Exception(ExceptionCode::IllegalFunction);
	};
	let (Some(start), Some(count)) = (read_u16_be(data, 0), read_u16_be(data, 2)) else {
		return Outcome::Exception(ExceptionCode::IllegalDataValue);
	};
	if count == 0 || count > 125 || resp.len() < 1 + 2 * count as usize {
		return Outcome::Exception(ExceptionCode::IllegalDataValue);
	}
	resp[0] = (count * 2) as u8;
	for i in 0..count {
		let mut value = 0u16;
		match callback(start.wrapping_add(i), &mut value) {
			ServerResult::Ok => {
				let at = 1 + 2 * i as usize;
				resp[at..at + 2].copy_from_slice(&value.to_be_bytes());
			}
			other => return map_failure(other),
		}
	}
	Outcome::Response(1 + 2 * count as usize)
}

pub fn read_holding_registers(data: &[u8], callback: Option<&mut dyn FnMut(u16, &mut u16) -> ServerResult>, resp: &mut [u8]) -> Outcome {
	read_registers(data, callback, resp)
}

pub fn read_input_registers(data: &[u8], callback: Option<&mut dyn FnMut(u16, &mut u16) -> ServerResult>, resp: &mut [u8]) -> Outcome {
	read_registers(data, callback, resp)
}

fn read_bits(data: &[u8], callback: Option<&mut dyn FnMut(u16, &mut bool) -> ServerResult>, resp: &mut [u8]) -> Outcome {
	let Some(callback) = callback else {
		return Outcome::Exception(ExceptionCode::IllegalFunction);
	};
	let (Some(start), Some(count)) = (read_u16_be(data, 0), read_u16_be(data, 2)) else {
		return Outcome::Exception(ExceptionCode::IllegalDataValue);
	};
	let count = count as usize;
	let byte_count = count.div_ceil(8);
	if count == 0 || count > 2000 || resp.len() < 1 + byte_count {
		return Outcome::Exception(ExceptionCode::IllegalDataValue);
	}
	resp[0] = byte_count as u8;
	resp[1..1 + byte_count].fill(0);
	for i in 0..count {
		let mut bit = false;
		match callback(start.wrapping_add(i as u16), &mut bit) {
			ServerResult::Ok => {
				if bit {
					resp[1 + i / 8] |= 1 << (i % 8);
				}
			}
			other => return map_failure(other),
		}
	}
	Outcome::Response(1 + byte_count)
}

pub fn read_coils(data: &[u8], callback: Option<&mut dyn FnMut(u16, &mut bool) -> ServerResult>, resp: &mut [u8]) -> Outcome {
	read_bits(data, callback, resp)
}

pub fn read_discrete_inputs(data: &[u8], callback: Option<&mut dyn FnMut(u16, &mut bool) -> ServerResult>, resp: &mut [u8]) -> Outcome {
	read_bits(data, callback, resp)
}

pub fn write_single_coil(data: &[u8], callback: Option<&mut dyn FnMut(u16, bool) -> ServerResult>, resp: &mut [u8]) -> Outcome {
	let Some(callback) = callback else {
		return Outcome::Exception(ExceptionCode::IllegalFunction);
	};
	let (Some(address), Some(value)) = (read_u16_be(data, 0), read_u16_be(data, 2)) else {
		return Outcome::Exception(ExceptionCode::IllegalDataValue);
	};
	let on = match value {
		0x0000 => false,
		0xFF00 => true,
		_ => return Outcome::Exception(ExceptionCode::IllegalDataValue),
	};
	match callback(address, on) {
		ServerResult::Ok => {
			resp[0..4].copy_from_slice(&data[0..4]);
			Outcome::Response(4)
		}
		other => map_failure(other),
	}
}

pub fn write_single_register(data: &[u8], callback: Option<&mut dyn FnMut(u16, u16) -> ServerResult>, resp: &mut [u8]) -> Outcome {
	let Some(callback) = callback else {
		return Outcome::Exception(ExceptionCode::IllegalFunction);
	};
	let (Some(address), Some(value)) = (read_u16_be(data, 0), read_u16_be(data, 2)) else {
		return Outcome::Exception(ExceptionCode::IllegalDataValue);
	};
	match callback(address, value) {
		ServerResult::Ok => {
			resp[0..4].copy_from_slice(&data[0..4]);
			Outcome::Response(4)
		}
		other => map_failure(other),
	}
}

/// Dispatch a request body to its handler by function code.
pub fn dispatch(function: u8, data: &[u8], callbacks: &mut ServerCallbacks<'_>, resp: &mut [u8]) -> Outcome {
	match function {
		0x01 => read_coils(
			data,
			match callbacks.read_coil {
				Some(ref mut cb) => Some(&mut **cb),
				None => None,
			},
			resp,
		),
		0x02 => read_discrete_inputs(
			data,
			match callbacks.read_discrete_input {
				Some(ref mut cb) => Some(&mut **cb),
				None => None,
			},
			resp,
		),
		0x03 => read_holding_registers(
			data,
			match callbacks.read_holding_register {
				Some(ref mut cb) => Some(&mut **cb),
				None => None,
			},
			resp,
		),
		0x04 => read_input_registers(
			data,
			match callbacks.read_input_register {
				Some(ref mut cb) => Some(&mut **cb),
				None => None,
			},
			resp,
		),
		0x05 => write_single_coil(
			data,
			match callbacks.write_coil {
				Some(ref mut cb) => Some(&mut **cb),
				None => None,
			},
			resp,
		),
		0x06 => write_single_register(
			data,
			match callbacks.write_holding_register {
				Some(ref mut cb) => Some(&mut **cb),
				None => None,
			},
			resp,
		),
		_ => Outcome::Exception(ExceptionCode::IllegalFunction),
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn fc04_happy_path_reads_sequential_registers() {
		let mut resp = [0u8; 8];
		let mut cb = |addr: u16, out: &mut u16| {
			*out = 100 + addr;
			ServerResult::Ok
		};
		let req = [0x00, 0x00, 0x00, 0x02];
		match read_input_registers(&req, Some(&mut cb), &mut resp) {
			Outcome::Response(len) => {
				assert_eq!(len, 5);
				assert_eq!(&resp[..5], &[0x04, 0x00, 100, 0x00, 101]);
			}
			_ => panic!("expected a response"),
		}
	}

	#[test]
	fn fc04_rejects_out_of_range_quantity() {
		let mut resp = [0u8; 8];
		let mut cb = |_: u16, _: &mut u16| ServerResult::Ok;
		let req = [0x00, 0x00, 0x00, 0x00]; // count = 0
		match read_input_registers(&req, Some(&mut cb), &mut resp) {
			Outcome::Exception(ExceptionCode::IllegalDataValue) => {}
			_ => panic!("expected IllegalDataValue"),
		}
	}

	#[test]
	fn fc04_missing_callback_is_illegal_function() {
		let mut resp = [0u8; 8];
		let req = [0x00, 0x00, 0x00, 0x01];
		match read_input_registers(&req, None, &mut resp) {
			Outcome::Exception(ExceptionCode::IllegalFunction) => {}
			_ => panic!("expected IllegalFunction"),
		}
	}

	#[test]
	fn fc01_packs_bits_lsb_first() {
		let mut resp = [0u8; 4];
		let mut cb = |addr: u16, out: &mut bool| {
			*out = addr % 2 == 0;
			ServerResult::Ok
		};
		let req = [0x00, 0x00, 0x00, 0x05]; // 5 coils
		match read_coils(&req, Some(&mut cb), &mut resp) {
			Outcome::Response(len) => {
				assert_eq!(len, 2);
				assert_eq!(resp[0], 1); // byte count
				assert_eq!(resp[1], 0b0001_0101);
			}
			_ => panic!("expected a response"),
		}
	}

	#[test]
	fn fc05_rejects_non_canonical_value() {
		let mut resp = [0u8; 4];
		let mut cb = |_: u16, _: bool| ServerResult::Ok;
		let req = [0x00, 0x01, 0x12, 0x34];
		match write_single_coil(&req, Some(&mut cb), &mut resp) {
			Outcome::Exception(ExceptionCode::IllegalDataValue) => {}
			_ => panic!("expected IllegalDataValue"),
		}
	}

	#[test]
	fn fc06_echoes_request_on_success() {
		let mut resp = [0u8; 4];
		let mut cb = |_: u16, _: u16| ServerResult::Ok;
		let req = [0x00, 0x05, 0x00, 0x7B];
		match write_single_register(&req, Some(&mut cb), &mut resp) {
			Outcome::Response(4) => assert_eq!(resp, req),
			_ => panic!("expected echo"),
		}
	}

	#[test]
	fn device_failure_maps_to_exception_04() {
		let mut resp = [0u8; 4];
		let mut cb = |_: u16, _: u16| ServerResult::DeviceFailure;
		let req = [0x00, 0x05, 0x00, 0x7B];
		match write_single_register(&req, Some(&mut cb), &mut resp) {
			Outcome::Exception(ExceptionCode::ServerDeviceFailure) => {}
			_ => panic!("expected ServerDeviceFailure"),
		}
	}
}
