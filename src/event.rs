//! Event queue and polling set (component C2).
//!
//! A single FIFO queue carries `{context, event-id}` tuples from interrupt
//! context (UART rx/tx-complete) and task context (channel-to-transport
//! calls) to the one task that drains it. A second, small fixed-size set
//! tracks which contexts currently want their `poll_fn` called after every
//! drain — the lazy-timer mechanism the design notes describe as a
//! stand-in for a real scheduled wakeup.

use crate::pool::Handle;
use heapless::Deque;

/// What kind of context an [`Event`] or polling-set entry targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextKind {
	Transport,
	ServerChannel,
	ClientChannel,
}

/// An opaque reference to a transport or channel context, stable across the
/// event queue and the polling set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextRef {
	pub kind: ContextKind,
	pub handle: Handle,
}

/// Why an event was posted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventId {
	/// Add `context` to the polling set.
	StartPolling,
	/// Remove `context` from the polling set.
	StopPolling,
	/// A transport validated an inbound frame; `context` is the bound channel.
	PduReceived,
	/// A transport finished transmitting; `context` is the bound channel.
	PduTransmitted,
}

/// A `{context, event-id}` tuple.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Event {
	pub context: ContextRef,
	pub id: EventId,
}

/// Error returned when the queue's fixed capacity is exceeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueFull;

/// A fixed-capacity FIFO of at most `N` pending events.
///
/// `post` is safe to call both from task context and from an ISR — callers
/// are expected to wrap ISR-side calls in a [`crate::port::CriticalSection`]
/// the way the transport's rx/tx-complete handlers do, since the queue's
/// internal `Deque` is not itself interrupt-safe.
pub struct EventQueue<const N: usize> {
	queue: Deque<Event, N>,
}

impl<const N: usize> EventQueue<N> {
	pub const fn new() -> Self {
		Self { queue: Deque::new() }
	}

	/// Append an event. `from_isr` only affects logging verbosity: the
	/// actual push is identical either way.
	pub fn post(&mut self, context: ContextRef, id: EventId, from_isr: bool) -> Result<(), QueueFull> {
		if from_isr {
			trace!(target: "modbus::event", "post from ISR: {id:?}");
		} else {
			trace!(target: "modbus::event", "post from task: {id:?}");
		}
		self.queue.push_back(Event { context, id }).map_err(|_| QueueFull)
	}

	/// Pop the oldest pending event, if any.
	pub fn pop(&mut self) -> Option<Event> {
		self.queue.pop_front()
	}

	pub fn is_empty(&self) -> bool {
		self.queue.is_empty()
	}

	pub fn len(&self) -> usize {
		self.queue.len()
	}
}

impl<const N: usize> Default for EventQueue<N> {
	fn default() -> Self {
		Self::new()
	}
}

/// The set of contexts currently enabled for polling.
///
/// `add`/`remove` are idempotent: adding an already-present context or
/// removing an absent one is a no-op rather than an error, matching the
/// specification's "polling toggles are idempotent" invariant.
pub struct PollingSet<const M: usize> {
	entries: [Option<ContextRef>; M],
}

impl<const M: usize> PollingSet<M> {
	pub const fn new() -> Self {
		Self { entries: [None; M] }
	}

	pub fn add(&mut self, context: ContextRef) {
		if self.entries.iter().flatten().any(|c| *c == context) {
			return;
		}
		if let Some(slot) = self.entries.iter_mut().find(|s| s.is_none()) {
			*slot = Some(context);
		} else {
			warn!(target: "modbus::event", "polling set full, dropping StartPolling");
		}
	}

	pub fn remove(&mut self, context: ContextRef) {
		for slot in &mut self.entries {
			if *slot == Some(context) {
				*slot = None;
			}
		}
	}

	pub fn iter(&self) -> impl Iterator<Item = ContextRef> + '_ {
		self.entries.iter().filter_map(|c| *c)
	}
}

impl<const M: usize> Default for PollingSet<M> {
	fn default() -> Self {
		Self::new()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::pool::Pool;

	fn ctx() -> ContextRef {
		let mut pool: Pool<(), 8> = Pool::new(8);
		let handle = pool.alloc(()).unwrap();
		ContextRef {
			kind: ContextKind::Transport,
			handle,
		}
	}

	#[test]
	fn fifo_ordering() {
		let mut q: EventQueue<4> = EventQueue::new();
		let c = ctx();
		q.post(c, EventId::StartPolling, false).unwrap();
		q.post(c, EventId::PduReceived, true).unwrap();
		assert_eq!(q.pop().unwrap().id, EventId::StartPolling);
		assert_eq!(q.pop().unwrap().id, EventId::PduReceived);
		assert!(q.pop().is_none());
	}

    #[test]
    fn stop_polling_posted_before_another_event_still_fires_in_order() {
        let mut q: EventQueue<4> = EventQueue::new();
        let c = ctx();
        q.post(c, EventId::StopPolling, false).unwrap();
        q.post(c, EventId::PduReceived, false).unwrap();
        assert_eq!(q.pop().unwrap().id, EventId::StopPolling);
        assert_eq!(q.pop().unwrap().id, EventId::PduReceived);
    }

	#[test]
	fn polling_toggles_are_idempotent() {
		let mut set: PollingSet<4> = PollingSet::new();
		let c = ctx();
		set.add(c);
		set.add(c);
		assert_eq!(set.iter().count(), 1);
		set.remove(c);
		set.remove(c);
		assert_eq!(set.iter().count(), 0);
	}
}
