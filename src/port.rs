//! Hardware port abstraction (component C1).
//!
//! The crate never talks to a UART register block directly. Instead it is
//! generic over a [`SerialPort`] implementation supplied by the caller, the
//! same split the teacher codebase uses between its driver-agnostic
//! `SerialPort` wrapper (`arch::x86_64::kernel::serial::SerialPort`) and the
//! concrete `uart_16550`/`arm-pl011-uart` crates it wraps on each
//! architecture. A [`TickSource`] stands in for the free-running 20 kHz
//! counter the timing rules in [`crate::transport::rtu`] are built on.
//!
//! Critical-section primitives are explicitly out of scope for this crate
//! (per the specification's component boundary): [`CriticalSection`] is a
//! trait the embedder implements against whatever interrupt-masking
//! mechanism its target provides.

/// Serial parity setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Parity {
	None,
	Even,
	Odd,
}

/// Number of stop bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopBits {
	One,
	Two,
}

/// An abstract UART port.
///
/// Implementations own the register-level driver. This crate calls
/// [`Self::init`] once at transport construction and [`Self::transmit`]
/// from task context; it never touches the hardware from interrupt context
/// itself. The embedder's rx/tx-complete ISRs are expected to call
/// [`crate::transport::rtu::RtuTransport::on_rx_data`] and
/// [`crate::transport::rtu::RtuTransport::on_tx_complete`] directly, the way
/// the teacher's `serial_interrupt` handler calls into its `SerialPort`
/// object rather than registering a callback pointer.
pub trait SerialPort {
	/// Port-specific error type (register fault, DMA setup failure, ...).
	type Error: core::fmt::Debug;

	/// Configure baud rate and framing. Called once, before the transport
	/// leaves `INIT`.
	fn init(
		&mut self,
		baud: u32,
		stop_bits: StopBits,
		parity: Parity,
	) -> Result<(), Self::Error>;

	/// Start transmitting `data`. Must be non-blocking: completion is
	/// reported later through `on_tx_complete`.
	fn transmit(&mut self, data: &[u8]) -> Result<(), Self::Error>;
}

/// A free-running 20 kHz (50 µs) tick counter.
///
/// The counter is expected to wrap at `u16::MAX`; every duration computed
/// from it in this crate is taken modulo 2^16 so wraparound needs no special
/// casing at call sites.
pub trait TickSource {
	/// Current tick count.
	fn ticks(&self) -> u16;
}

/// A guard-based critical section, used to protect the handful of fields
/// the task side must not observe mid-update from the UART ISR (rx cursor,
/// `tx_in_progress`, the port→transport lookup table). The ISR side never
/// takes this lock: per the concurrency model, the ISR always runs at a
/// priority at or above whatever wakes the task, so the ISR can never be
/// interrupted by the task.
pub trait CriticalSection {
	/// Run `f` with interrupts (or equivalent task preemption) disabled.
	fn with<R>(&self, f: impl FnOnce() -> R) -> R;
}

/// A [`CriticalSection`] for single-threaded, uninterrupted test and host
/// builds where no real masking is needed.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopCriticalSection;

impl CriticalSection for NoopCriticalSection {
	fn with<R>(&self, f: impl FnOnce() -> R) -> R {
		f()
	}
}
