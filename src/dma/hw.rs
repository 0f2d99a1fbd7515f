//! Socket side of a DMA channel.
//!
//! These entry points are what a socket provider (USB endpoint FIFO,
//! peripheral port, or a test harness) calls when hardware moves data. They
//! run in notification context: they never wait, and report back-pressure
//! as [`DmaError::NoBufferAvailable`] so the provider can retry on its next
//! interrupt.

use super::buffer::{BufferFlags, BufferInfo};
use super::channel::{ChannelState, DmaChannel, Inner, LentDir, account};
use super::config::{ChannelType, SuspendOption, TransferMode};
use super::event::{DmaEvent, EventBatch};
use super::ring::SlotOwner;
use crate::error::{DmaError, Result};

/// Result of one consumer drain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Drained {
    /// Bytes copied out
    pub count: usize,
    /// Flags of the drained buffer
    pub flags: BufferFlags,
}

impl<'a, const SLOTS: usize, const BYTES: usize> DmaChannel<'a, SLOTS, BYTES> {
    /// Feed `data` from the producer socket.
    ///
    /// Returns the number of bytes accepted. A buffer is completed when it is
    /// full or when `eop` is set and all of `data` fit; EOP buffers are never
    /// merged with following data.
    pub fn socket_produce(&self, data: &[u8], eop: bool) -> Result<usize> {
        if !self.config.channel_type.has_hw_producer() {
            return Err(DmaError::NotSupported.into());
        }
        self.locked(|inner, batch| {
            if inner.state == ChannelState::ConsumerOverride {
                return Ok(self.produce_override(inner, data, eop, batch));
            }
            inner.ensure_active()?;
            self.produce_ring(inner, data, eop, batch)
        })
    }

    /// Drain the next buffer into `out` for the consumer socket.
    ///
    /// `out` must hold the whole buffer; partial drains are not supported.
    pub fn socket_consume(&self, out: &mut [u8]) -> Result<Drained> {
        if !self.config.channel_type.has_hw_consumer() {
            return Err(DmaError::NotSupported.into());
        }
        self.locked(|inner, batch| {
            if inner.state == ChannelState::ProducerOverride {
                return self.consume_override(inner, out, batch);
            }
            inner.ensure_active()?;
            self.consume_ring(inner, out, batch)
        })
    }

    /// Report a hardware fault on either socket.
    ///
    /// A running channel moves to `Error`; waiters return
    /// [`DmaError::DmaFailure`].
    pub fn socket_fault(&self) {
        self.locked(|inner, batch| {
            if !inner.state.is_running() {
                return;
            }
            inner.state = ChannelState::Error;
            batch.push(self.config.notification, DmaEvent::Error);

            #[cfg(feature = "log")]
            log::warn!("dma: socket fault, channel in error state");
        });
    }

    fn produce_ring(
        &self,
        inner: &mut Inner<'a, SLOTS>,
        data: &[u8],
        eop: bool,
        batch: &mut EventBatch,
    ) -> Result<usize> {
        if inner.prod_suspended {
            return Err(DmaError::SocketSuspended.into());
        }
        if inner.xfer_size != 0 && inner.prod_count >= inner.xfer_size {
            return Err(DmaError::NoBufferAvailable.into());
        }

        let index = inner.ring.prod;
        let slot = *inner.ring.slot(index);
        if slot.owner != SlotOwner::Producer {
            return Err(DmaError::NoBufferAvailable.into());
        }
        let avail = self.config.prod_avail_count;
        if slot.count == 0 && avail > 0 && inner.ring.count_owned(SlotOwner::Producer) < avail {
            return Err(DmaError::NoBufferAvailable.into());
        }

        let capacity = self.config.payload_capacity();
        let start = self.config.prod_header + slot.count;
        let mut n = (capacity - slot.count).min(data.len());
        // A finite byte transfer never takes more than its size; the last
        // buffer closes short.
        let mut limited = false;
        if inner.xfer_size != 0 && self.config.mode == TransferMode::Byte {
            let left = ((inner.xfer_size - inner.prod_count) as usize).saturating_sub(slot.count);
            if left <= n {
                n = left;
                limited = true;
            }
        }
        // SAFETY: slot `index` is owned by the producer side, which only runs
        // under the channel lock.
        let mem = unsafe { self.pool.slot_mut(index) };
        mem[start..start + n].copy_from_slice(&data[..n]);

        let count = slot.count + n;
        inner.ring.slot_mut(index).count = count;
        let ended = limited || (eop && n == data.len());
        if count == capacity || ended {
            let flags = if ended { BufferFlags::EOP } else { BufferFlags::NONE };
            self.finish_produced(inner, index, flags, batch);
        }
        Ok(n)
    }

    /// Hand the producer buffer at `index` on and apply pending suspends.
    pub(crate) fn finish_produced(
        &self,
        inner: &mut Inner<'a, SLOTS>,
        index: usize,
        flags: BufferFlags,
        batch: &mut EventBatch,
    ) {
        let ty = self.config.channel_type;
        let mask = self.config.notification;

        let slot = inner.ring.slot_mut(index);
        slot.flags = flags;
        slot.owner = match ty {
            ChannelType::Auto | ChannelType::AutoSignal => SlotOwner::Consumer,
            _ => SlotOwner::Filled,
        };
        let count = slot.count;
        inner.ring.prod = inner.ring.next(index);
        inner.prod_count = inner.prod_count.wrapping_add(account(self.config.mode, count));

        if ty != ChannelType::Auto {
            batch.push(
                mask,
                DmaEvent::ProducedBuffer(BufferInfo {
                    index,
                    count,
                    size: self.pool.buffer_size(),
                    flags,
                }),
            );
        }
        if suspend_due(inner.prod_suspend, flags) {
            inner.prod_suspend = SuspendOption::None;
            inner.prod_suspended = true;
            batch.push(mask, DmaEvent::ProducerSuspended);
        }
        inner.check_completion(ty, mask, batch);
    }

    fn consume_ring(
        &self,
        inner: &mut Inner<'a, SLOTS>,
        out: &mut [u8],
        batch: &mut EventBatch,
    ) -> Result<Drained> {
        if inner.cons_suspended {
            return Err(DmaError::SocketSuspended.into());
        }
        let index = inner.ring.cons;
        let slot = *inner.ring.slot(index);
        if slot.owner != SlotOwner::Consumer {
            return Err(DmaError::NoBufferAvailable.into());
        }
        if out.len() < slot.count {
            return Err(DmaError::BufferTooSmall.into());
        }

        let ty = self.config.channel_type;
        let mask = self.config.notification;
        let start = if ty.is_manual() {
            self.config.cons_header
        } else {
            0
        };
        // SAFETY: slot `index` is owned by the consumer side, which only runs
        // under the channel lock.
        let mem = unsafe { self.pool.slot(index) };
        out[..slot.count].copy_from_slice(&mem[start..start + slot.count]);

        inner.ring.slot_mut(index).clear();
        inner.ring.cons = inner.ring.next(index);
        inner.ring.reclaim_discarded();
        inner.cons_count = inner.cons_count.wrapping_add(account(self.config.mode, slot.count));

        if ty != ChannelType::Auto {
            batch.push(
                mask,
                DmaEvent::ConsumedBuffer(BufferInfo {
                    index,
                    count: slot.count,
                    size: self.pool.buffer_size(),
                    flags: slot.flags,
                }),
            );
        }
        if suspend_due(inner.cons_suspend, slot.flags) {
            inner.cons_suspend = SuspendOption::None;
            inner.cons_suspended = true;
            batch.push(mask, DmaEvent::ConsumerSuspended);
        }
        inner.check_completion(ty, mask, batch);

        Ok(Drained {
            count: slot.count,
            flags: slot.flags,
        })
    }

    fn produce_override(
        &self,
        inner: &mut Inner<'a, SLOTS>,
        data: &[u8],
        eop: bool,
        batch: &mut EventBatch,
    ) -> usize {
        let Some(lent) = inner.lent.as_mut().filter(|l| l.dir == LentDir::Recv && !l.done) else {
            return 0;
        };
        let n = (lent.limit - lent.count).min(data.len());
        lent.data[lent.count..lent.count + n].copy_from_slice(&data[..n]);
        lent.count += n;

        let finished = lent.count == lent.limit || (eop && n == data.len());
        if finished {
            lent.done = true;
            let count = lent.count;
            inner.state = ChannelState::Configured;
            inner.prod_count = inner.prod_count.wrapping_add(account(self.config.mode, count));
            batch.push(self.config.notification, DmaEvent::RecvComplete { count });
        }
        n
    }

    fn consume_override(
        &self,
        inner: &mut Inner<'a, SLOTS>,
        out: &mut [u8],
        batch: &mut EventBatch,
    ) -> Result<Drained> {
        let Some(lent) = inner.lent.as_mut().filter(|l| l.dir == LentDir::Send && !l.done) else {
            return Err(DmaError::NoBufferAvailable.into());
        };
        if out.len() < lent.count {
            return Err(DmaError::BufferTooSmall.into());
        }
        let count = lent.count;
        out[..count].copy_from_slice(&lent.data[..count]);
        lent.done = true;

        inner.state = ChannelState::Configured;
        inner.cons_count = inner.cons_count.wrapping_add(account(self.config.mode, count));
        batch.push(self.config.notification, DmaEvent::SendComplete);
        Ok(Drained {
            count,
            flags: BufferFlags::EOP,
        })
    }
}

/// Whether an armed suspend option fires on a buffer with `flags`.
fn suspend_due(option: SuspendOption, flags: BufferFlags) -> bool {
    match option {
        SuspendOption::AfterBuffer | SuspendOption::Now => true,
        SuspendOption::AfterEop => flags.is_eop(),
        SuspendOption::None => false,
    }
}
