//! The single reusable ADU/PDU buffer each transport owns.
//!
//! The buffer is laid out so the ADU view (`[address][function][data][crc]`)
//! and the PDU view (`[function][data]`) are two overlapping slices of the
//! same backing array, with the PDU view starting exactly one byte after
//! the ADU view. Framing a response is then just writing the address byte
//! and appending the CRC around whatever the handler already wrote into the
//! PDU view — no copy between an "application buffer" and a "wire buffer".

use crate::MAX_ADU_LEN;

/// Reusable RTU packet storage: one 256-byte area plus a length counter.
#[derive(Clone)]
pub struct Packet {
	buf: [u8; MAX_ADU_LEN],
	/// Length of the PDU's data section, i.e. excluding address, function
	/// code and CRC.
	data_len: usize,
}

impl Packet {
	pub const fn new() -> Self {
		Self {
			buf: [0u8; MAX_ADU_LEN],
			data_len: 0,
		}
	}

	/// Maximum `data_len` this buffer can hold: `MAX_ADU_LEN` minus address,
	/// function and the two CRC bytes.
	pub const MAX_DATA_LEN: usize = MAX_ADU_LEN - 4;

	pub const fn data_len(&self) -> usize {
		self.data_len
	}

    pub fn set_data_len(&mut self, len: usize) {
		debug_assert!(len <= Self::MAX_DATA_LEN);
		self.data_len = len;
	}

	/// Total ADU length: address + function + data + crc.
	pub const fn adu_len(&self) -> usize {
		4 + self.data_len
	}

	pub fn address(&self) -> u8 {
		self.buf[0]
	}

	pub fn set_address(&mut self, addr: u8) {
		self.buf[0] = addr;
	}

	pub fn function(&self) -> u8 {
		self.buf[1]
	}

	pub fn set_function(&mut self, function: u8) {
		self.buf[1] = function;
	}

	/// The PDU's data bytes (excludes function code, address, CRC).
	pub fn data(&self) -> &[u8] {
		&self.buf[2..2 + self.data_len]
	}

	pub fn data_mut(&mut self) -> &mut [u8] {
		&mut self.buf[2..2 + self.data_len]
	}

	/// The full PDU view: function code followed by data.
	pub fn pdu(&self) -> &[u8] {
		&self.buf[1..2 + self.data_len]
	}

	/// Raw backing storage, for the transport's byte-at-a-time reception.
	pub(crate) fn raw_mut(&mut self) -> &mut [u8; MAX_ADU_LEN] {
		&mut self.buf
	}

	pub(crate) fn raw(&self) -> &[u8; MAX_ADU_LEN] {
		&self.buf
	}

	/// The portion of the buffer that carries CRC bytes once `data_len` and
	/// the address/function bytes are set: `[addr][func][data]`.
	pub fn crc_covered(&self) -> &[u8] {
		&self.buf[0..2 + self.data_len]
	}

	/// Append the CRC-16 of the current `[addr][func][data]` prefix,
	/// little-endian, directly after the data bytes. Returns the resulting
	/// ADU length.
	pub fn append_crc(&mut self) -> usize {
		let crc = crate::crc::crc16(self.crc_covered());
		let [lo, hi] = crc.to_le_bytes();
		let at = 2 + self.data_len;
		self.buf[at] = lo;
		self.buf[at + 1] = hi;
		self.adu_len()
	}

	/// Copy `data` into the PDU data section and set `data_len` accordingly.
	pub fn set_data(&mut self, data: &[u8]) {
		self.set_data_len(data.len());
		self.data_mut().copy_from_slice(data);
	}

	/// Scratch area for a custom function-code handler: function byte
	/// followed by up to [`Self::MAX_DATA_LEN`] bytes of data, mutable.
	/// Pair with [`Self::commit_pdu_len`] once the handler reports how much
	/// of it it actually wrote.
	pub fn pdu_scratch_mut(&mut self) -> &mut [u8] {
		&mut self.buf[1..1 + 1 + Self::MAX_DATA_LEN]
	}

	/// Record that a custom handler wrote `len` bytes (function byte
	/// included) into [`Self::pdu_scratch_mut`].
	pub fn commit_pdu_len(&mut self, len: usize) {
		debug_assert!(len >= 1 && len - 1 <= Self::MAX_DATA_LEN);
		self.data_len = len - 1;
	}
}

impl Default for Packet {
	fn default() -> Self {
		Self::new()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn append_crc_matches_known_vector() {
		let mut p = Packet::new();
		p.set_address(0x01);
		p.set_function(0x04);
		p.set_data(&[0x00, 0x00, 0x00, 0x01]);
		let len = p.append_crc();
		assert_eq!(len, 8);
		assert_eq!(&p.raw()[0..8], &[0x01, 0x04, 0x00, 0x00, 0x00, 0x01, 0x31, 0xCA]);
	}

	#[test]
	fn pdu_view_starts_one_byte_after_adu_view() {
		let mut p = Packet::new();
		p.set_address(0x11);
		p.set_function(0x04);
		p.set_data(&[0xAA, 0xBB]);
		assert_eq!(p.pdu(), &[0x04, 0xAA, 0xBB]);
		assert_eq!(&p.raw()[1..1 + p.pdu().len()], p.pdu());
	}
}
