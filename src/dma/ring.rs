//! Circular slot ring tracking buffer ownership.
//!
//! Every pool buffer has a slot recording which side owns it. Three cursors
//! walk the ring in the same direction: the producer cursor (next buffer to
//! fill), the CPU cursor (next buffer handed to the CPU) and the consumer
//! cursor (next buffer to drain). Ownership only ever moves forward in ring
//! order.

use super::buffer::BufferFlags;

/// Owner of a ring slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SlotOwner {
    /// Empty, waiting for the producer (hardware socket or CPU)
    Producer,
    /// Filled by a hardware producer, waiting for the CPU
    Filled,
    /// Held by the CPU through a `Buffer` view
    Cpu,
    /// Committed, waiting for the consumer socket
    Consumer,
    /// Dropped by the CPU, waiting for the consumer cursor to pass it
    Discarded,
    /// Held by a `Buffer` view that predates the last reset
    Orphaned,
}

/// Ownership and fill state of one pool buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Slot {
    pub(crate) owner: SlotOwner,
    /// Bytes of valid data (payload while producing, total once committed)
    pub(crate) count: usize,
    pub(crate) flags: BufferFlags,
}

impl Slot {
    const EMPTY: Self = Self {
        owner: SlotOwner::Producer,
        count: 0,
        flags: BufferFlags::NONE,
    };

    pub(crate) fn clear(&mut self) {
        *self = Self::EMPTY;
    }
}

/// Ring of up to `N` slots, `len` of which are in use.
pub(crate) struct SlotRing<const N: usize> {
    slots: [Slot; N],
    len: usize,
    pub(crate) prod: usize,
    pub(crate) cpu: usize,
    pub(crate) cons: usize,
}

impl<const N: usize> SlotRing<N> {
    pub(crate) const fn new() -> Self {
        Self {
            slots: [Slot::EMPTY; N],
            len: 0,
            prod: 0,
            cpu: 0,
            cons: 0,
        }
    }

    /// Use the first `len` slots, all empty.
    pub(crate) fn configure(&mut self, len: usize) {
        debug_assert!(len <= N);
        self.len = len;
        for slot in &mut self.slots {
            slot.clear();
        }
        self.rewind();
    }

    /// Number of slots in use
    #[inline(always)]
    pub(crate) fn len(&self) -> usize {
        self.len
    }

    /// Index following `index`, wrapping around
    #[inline(always)]
    pub(crate) fn next(&self, index: usize) -> usize {
        (index + 1) % self.len
    }

    #[inline(always)]
    pub(crate) fn slot(&self, index: usize) -> &Slot {
        &self.slots[index]
    }

    #[inline(always)]
    pub(crate) fn slot_mut(&mut self, index: usize) -> &mut Slot {
        &mut self.slots[index]
    }

    fn rewind(&mut self) {
        self.prod = 0;
        self.cpu = 0;
        self.cons = 0;
    }

    /// Flush the ring: every slot returns to the producer except those still
    /// referenced by a CPU view, which become orphans until the view is
    /// released.
    pub(crate) fn flush(&mut self) {
        for slot in &mut self.slots[..self.len] {
            match slot.owner {
                SlotOwner::Cpu | SlotOwner::Orphaned => {
                    slot.owner = SlotOwner::Orphaned;
                    slot.count = 0;
                    slot.flags = BufferFlags::NONE;
                }
                _ => slot.clear(),
            }
        }
        self.rewind();
    }

    /// Advance the consumer cursor over buffers the CPU discarded.
    pub(crate) fn reclaim_discarded(&mut self) {
        if self.len == 0 {
            return;
        }
        for _ in 0..self.len {
            let cons = self.cons;
            if self.slots[cons].owner != SlotOwner::Discarded {
                break;
            }
            self.slots[cons].clear();
            self.cons = self.next(cons);
        }
    }

    /// Number of slots owned by `owner`
    pub(crate) fn count_owned(&self, owner: SlotOwner) -> usize {
        self.slots[..self.len]
            .iter()
            .filter(|s| s.owner == owner)
            .count()
    }

    /// True when no slot holds data in flight
    pub(crate) fn is_idle(&self) -> bool {
        self.slots[..self.len].iter().all(|s| {
            !matches!(
                s.owner,
                SlotOwner::Filled | SlotOwner::Cpu | SlotOwner::Consumer
            )
        })
    }
}
