//! Fixed-size context pool addressed by generation-checked handles.
//!
//! The specification's lifecycle notes call for per-context "type tag"
//! fields that get zeroed on free to catch use-after-free. Represented as a
//! raw pointer plus a magic number that would need `unsafe` to check; here
//! it is a generation counter bumped on every free, checked against the
//! one baked into the [`Handle`] returned by [`Pool::alloc`] — the same
//! idea the design notes describe, without the pointer. The pool itself is
//! named and shaped after the teacher's `object_pool::ObjectPool`, adapted
//! from an unbounded `Vec`-backed cache to a fixed-capacity array so the
//! crate never needs a global allocator.

use crate::error::PoolError;

/// An opaque reference to a pooled context.
///
/// Two handles compare equal only if they address the same slot *and* were
/// issued for the same generation of that slot, so a handle to a freed and
/// reused context never silently aliases the new occupant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Handle {
	index: u8,
	generation: u16,
}

enum Slot<T> {
	Empty { generation: u16 },
	Occupied { generation: u16, value: T },
}

/// A fixed-capacity pool of `N` slots of `T`.
///
/// [`Pool::alloc`] models the specification's "grow once on exhaustion"
/// resource policy within the hard upper bound `N`: a pool constructed with
/// `reserved < N` treats `[reserved, N)` as headroom it hands out only
/// after a first `alloc()` would otherwise fail, so construction code can
/// ask for a small initial pool and still recover from a burst without a
/// real allocator.
pub struct Pool<T, const N: usize> {
	slots: [Slot<T>; N],
	reserved: usize,
}

impl<T, const N: usize> Pool<T, N> {
	/// Creates a pool where only the first `reserved` slots are available
	/// until the first allocation failure triggers the one-time grow.
	pub fn new(reserved: usize) -> Self {
		Self {
			slots: core::array::from_fn(|_| Slot::Empty { generation: 0 }),
			reserved: if reserved > N { N } else { reserved },
		}
	}

	fn capacity_for(&self, grown: bool) -> usize {
		if grown { N } else { self.reserved }
	}

	fn try_alloc_within(&mut self, limit: usize, value: T) -> Result<Handle, T> {
		for (index, slot) in self.slots.iter_mut().enumerate().take(limit) {
			if let Slot::Empty { generation } = slot {
				let generation = *generation;
				*slot = Slot::Occupied { generation, value };
				return Ok(Handle {
					index: index as u8,
					generation,
				});
			}
		}
		Err(value)
	}

	/// Allocate a slot for `value`, growing the pool once into its reserved
	/// headroom if the initially-reserved region is full.
	pub fn alloc(&mut self, value: T) -> Result<Handle, PoolError> {
		match self.try_alloc_within(self.capacity_for(false), value) {
			Ok(handle) => Ok(handle),
			Err(value) => self.try_alloc_within(self.capacity_for(true), value).map_err(|_| {
				error!(target: "modbus::pool", "pool exhausted after grow-and-retry");
				PoolError::Exhausted
			}),
		}
	}

	/// Free the context at `handle`, bumping its slot's generation so any
	/// stale handle to it becomes invalid.
	pub fn free(&mut self, handle: Handle) -> Result<T, PoolError> {
		let slot = self
			.slots
			.get_mut(handle.index as usize)
			.ok_or(PoolError::StaleHandle)?;
		match core::mem::replace(slot, Slot::Empty { generation: 0 }) {
			Slot::Occupied { generation, value } if generation == handle.generation => {
				*slot = Slot::Empty {
					generation: generation.wrapping_add(1),
				};
				Ok(value)
			}
			other @ Slot::Occupied { .. } => {
				*slot = other;
				Err(PoolError::StaleHandle)
			}
			Slot::Empty { generation } => {
				*slot = Slot::Empty { generation };
				Err(PoolError::StaleHandle)
			}
		}
	}

	pub fn get(&self, handle: Handle) -> Result<&T, PoolError> {
		match self.slots.get(handle.index as usize) {
			Some(Slot::Occupied { generation, value }) if *generation == handle.generation => {
				Ok(value)
			}
			_ => Err(PoolError::StaleHandle),
		}
	}

	pub fn get_mut(&mut self, handle: Handle) -> Result<&mut T, PoolError> {
		match self.slots.get_mut(handle.index as usize) {
			Some(Slot::Occupied { generation, value }) if *generation == handle.generation => {
				Ok(value)
			}
			_ => Err(PoolError::StaleHandle),
		}
	}
}

/// Fixed-size `port id -> transport handle` lookup (§4.6), mutated only
/// under a critical section by construction/teardown. UART ISRs use this to
/// find which transport context owns the port that just interrupted.
pub struct PortRegistry<const N: usize> {
	entries: [Option<(u8, Handle)>; N],
}

impl<const N: usize> PortRegistry<N> {
	pub const fn new() -> Self {
		Self { entries: [None; N] }
	}

	/// Claim `port_id` for `handle`. Fails with
	/// [`crate::error::ConfigError::PortAlreadyOwned`] if another handle
	/// already holds it (Invariant 1), or with
	/// [`crate::error::ConfigError::PoolExhausted`] if the table is full.
	pub fn register(&mut self, port_id: u8, handle: Handle) -> Result<(), crate::error::ConfigError> {
		if self.entries.iter().flatten().any(|(id, _)| *id == port_id) {
			error!(target: "modbus::pool", "port {port_id} is already owned");
			return Err(crate::error::ConfigError::PortAlreadyOwned(port_id));
		}
		let slot = self.entries.iter_mut().find(|slot| slot.is_none()).ok_or_else(|| {
			error!(target: "modbus::pool", "port registry exhausted registering port {port_id}");
			crate::error::ConfigError::PoolExhausted(PoolError::Exhausted)
		})?;
		*slot = Some((port_id, handle));
		Ok(())
	}

	pub fn lookup(&self, port_id: u8) -> Option<Handle> {
		self.entries.iter().flatten().find(|(id, _)| *id == port_id).map(|(_, handle)| *handle)
	}

	pub fn unregister(&mut self, port_id: u8) {
		for slot in &mut self.entries {
			if matches!(slot, Some((id, _)) if *id == port_id) {
				*slot = None;
			}
		}
	}
}

impl<const N: usize> Default for PortRegistry<N> {
	fn default() -> Self {
		Self::new()
	}
}
