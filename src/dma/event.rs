//! Channel notifications.
//!
//! Events are raised while the channel lock is held, collected into a small
//! batch, and delivered to the channel's [`DmaNotify`] handler after the lock
//! is released. Handlers may therefore call back into the channel (commit a
//! buffer, fetch the next one) without deadlocking.

use super::buffer::BufferInfo;
use super::channel::DmaChannel;
use super::config::EventMask;
use crate::sync::EventFlags;

/// Notification delivered to a channel's handler
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DmaEvent {
    /// Finite transfer reached its size and the ring drained
    TransferComplete,
    /// Override send was fully consumed
    SendComplete,
    /// Override receive finished with this many bytes
    RecvComplete {
        /// Bytes received
        count: usize,
    },
    /// Producer completed a buffer
    ProducedBuffer(BufferInfo),
    /// Consumer drained a buffer
    ConsumedBuffer(BufferInfo),
    /// Channel was aborted
    Aborted,
    /// Hardware fault; channel entered the error state
    Error,
    /// Producer socket suspended itself
    ProducerSuspended,
    /// Consumer socket suspended itself
    ConsumerSuspended,
}

impl DmaEvent {
    /// Mask bit selecting this event kind
    #[must_use]
    pub const fn mask(&self) -> EventMask {
        match self {
            DmaEvent::TransferComplete => EventMask::TRANSFER_COMPLETE,
            DmaEvent::SendComplete => EventMask::SEND_COMPLETE,
            DmaEvent::RecvComplete { .. } => EventMask::RECV_COMPLETE,
            DmaEvent::ProducedBuffer(_) => EventMask::PRODUCED,
            DmaEvent::ConsumedBuffer(_) => EventMask::CONSUMED,
            DmaEvent::Aborted => EventMask::ABORTED,
            DmaEvent::Error => EventMask::ERROR,
            DmaEvent::ProducerSuspended => EventMask::PROD_SUSPENDED,
            DmaEvent::ConsumerSuspended => EventMask::CONS_SUSPENDED,
        }
    }
}

/// Channel notification handler.
///
/// Called from whatever context drives the channel: socket providers run in
/// interrupt context, so implementations must not block. Long work belongs
/// in a thread woken through [`EventFlags`] (see [`FlagNotify`]).
pub trait DmaNotify<const SLOTS: usize, const BYTES: usize>: Sync {
    /// Handle one event raised by `channel`.
    fn notify(&self, channel: &DmaChannel<'_, SLOTS, BYTES>, event: DmaEvent);
}

/// Handler that posts each event kind as a flag bit.
///
/// The bit for an event is its [`EventMask`] value, so a worker thread can
/// `wait_any(EventMask::RECV_COMPLETE.bits().into(), ..)`.
pub struct FlagNotify<'f> {
    flags: &'f EventFlags,
}

impl<'f> FlagNotify<'f> {
    /// Post events into `flags`
    pub const fn new(flags: &'f EventFlags) -> Self {
        Self { flags }
    }
}

impl<const SLOTS: usize, const BYTES: usize> DmaNotify<SLOTS, BYTES> for FlagNotify<'_> {
    fn notify(&self, _channel: &DmaChannel<'_, SLOTS, BYTES>, event: DmaEvent) {
        self.flags.set(u32::from(event.mask().bits()));
    }
}

/// Upper bound of events raised by one channel operation.
const BATCH_LEN: usize = 4;

/// Events collected under the channel lock.
pub(crate) struct EventBatch {
    events: [Option<DmaEvent>; BATCH_LEN],
    len: usize,
}

impl EventBatch {
    pub(crate) const fn new() -> Self {
        Self {
            events: [None; BATCH_LEN],
            len: 0,
        }
    }

    /// Queue `event` if `mask` selects it.
    pub(crate) fn push(&mut self, mask: EventMask, event: DmaEvent) {
        if !mask.contains(event.mask()) {
            return;
        }
        debug_assert!(self.len < BATCH_LEN, "event batch overflow");
        if let Some(slot) = self.events.get_mut(self.len) {
            *slot = Some(event);
            self.len += 1;
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = DmaEvent> + '_ {
        self.events[..self.len].iter().flatten().copied()
    }
}
