//! DMA channel: buffer ring state machine and thread-side API.
//!
//! A channel moves data from a producer socket to a consumer socket through
//! a ring of pool buffers, or through a single caller-supplied buffer in
//! override mode. The socket side lives in [`super::hw`]; this module holds
//! the state machine and everything an application thread calls.
//!
//! # State machine
//!
//! ```text
//!              create                set_transfer
//! NotConfigured ----> Configured -------------------> Active
//!       ^               ^  ^  |  setup_send/recv_buffer   |
//!       |     destroy   |  |  +------> *Override ---------+
//!       +---------------+  |                 |            | socket_fault
//!                          |                 v            v
//!                          +---- reset --- Aborted <--- Error
//!                                             ^
//!                                  abort -----+ (from any configured state)
//! ```
//!
//! Finite transfers and overrides return to `Configured` on their own.

use embedded_hal::delay::DelayNs;

use super::buffer::{Buffer, BufferFlags, RecvBuffer};
use super::config::{ChannelConfig, ChannelType, EventMask, SuspendOption, TransferMode};
use super::event::{DmaEvent, DmaNotify, EventBatch};
use super::pool::BufferPool;
use super::ring::{SlotOwner, SlotRing};
use super::socket::{Socket, SocketId};
use crate::error::{ConfigError, DmaError, Error, IoError, Result};
use crate::internal::constants::DMA_GRANULARITY;
use crate::sync::{CriticalSectionCell, Poll, WaitOption, block_on};

/// Channel lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ChannelState {
    /// Not created, or destroyed
    #[default]
    NotConfigured,
    /// Created and idle
    Configured,
    /// Ring transfer running
    Active,
    /// One-shot send from a caller buffer running
    ProducerOverride,
    /// One-shot receive into a caller buffer running
    ConsumerOverride,
    /// Hardware fault; only `reset()` recovers
    Error,
    /// Aborted; only `reset()` recovers
    Aborted,
}

impl ChannelState {
    /// Whether an override transfer is running
    #[must_use]
    pub const fn is_override(self) -> bool {
        matches!(
            self,
            ChannelState::ProducerOverride | ChannelState::ConsumerOverride
        )
    }

    /// Whether any transfer is running
    #[must_use]
    pub const fn is_running(self) -> bool {
        matches!(self, ChannelState::Active) || self.is_override()
    }
}

/// Snapshot returned by [`DmaChannel::get_status`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ChannelStatus {
    /// Channel state
    pub state: ChannelState,
    /// Data completed by the hardware producer (bytes or buffers)
    pub prod_count: u32,
    /// Data drained by the hardware consumer (bytes or buffers)
    pub cons_count: u32,
    /// Ring buffers holding data or held by the CPU
    pub buffers_in_flight: usize,
}

/// Caller memory rejected by an override setup, handed back with the reason.
pub struct OverrideError<'a> {
    /// Why the override was refused
    pub error: Error,
    /// The caller's buffer, unchanged
    pub buffer: &'a mut [u8],
}

impl core::fmt::Debug for OverrideError<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("OverrideError")
            .field("error", &self.error)
            .field("len", &self.buffer.len())
            .finish()
    }
}

impl From<OverrideError<'_>> for Error {
    fn from(e: OverrideError<'_>) -> Self {
        e.error
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LentDir {
    Send,
    Recv,
}

/// Caller buffer lent to the channel for one override transfer.
pub(crate) struct Lent<'a> {
    pub(crate) data: &'a mut [u8],
    /// Bytes sent or received so far
    pub(crate) count: usize,
    /// Bytes to move before the override completes
    pub(crate) limit: usize,
    pub(crate) dir: LentDir,
    pub(crate) done: bool,
}

/// Channel bookkeeping, guarded by the channel's critical section.
pub(crate) struct Inner<'a, const SLOTS: usize> {
    pub(crate) state: ChannelState,
    pub(crate) ring: SlotRing<SLOTS>,
    /// Transfer size; zero means infinite
    pub(crate) xfer_size: u32,
    pub(crate) prod_count: u32,
    pub(crate) cons_count: u32,
    /// Bumped by `abort()` and `reset()` to cancel waiters and stale views
    pub(crate) epoch: u32,
    pub(crate) prod_suspend: SuspendOption,
    pub(crate) cons_suspend: SuspendOption,
    pub(crate) prod_suspended: bool,
    pub(crate) cons_suspended: bool,
    pub(crate) lent: Option<Lent<'a>>,
}

impl<'a, const SLOTS: usize> Inner<'a, SLOTS> {
    const fn new() -> Self {
        Self {
            state: ChannelState::NotConfigured,
            ring: SlotRing::new(),
            xfer_size: 0,
            prod_count: 0,
            cons_count: 0,
            epoch: 0,
            prod_suspend: SuspendOption::None,
            cons_suspend: SuspendOption::None,
            prod_suspended: false,
            cons_suspended: false,
            lent: None,
        }
    }

    fn clear_transfer(&mut self) {
        self.xfer_size = 0;
        self.prod_count = 0;
        self.cons_count = 0;
        self.prod_suspend = SuspendOption::None;
        self.cons_suspend = SuspendOption::None;
        self.prod_suspended = false;
        self.cons_suspended = false;
    }

    /// Gate for ring data operations.
    pub(crate) fn ensure_active(&self) -> Result<()> {
        match self.state {
            ChannelState::Active => Ok(()),
            ChannelState::NotConfigured => Err(ConfigError::NotConfigured.into()),
            ChannelState::Configured => Err(IoError::NotStarted.into()),
            ChannelState::Error => Err(DmaError::DmaFailure.into()),
            ChannelState::ProducerOverride
            | ChannelState::ConsumerOverride
            | ChannelState::Aborted => Err(DmaError::InvalidSequence.into()),
        }
    }

    /// Gate for operations that start a transfer.
    fn ensure_idle(&self) -> Result<()> {
        match self.state {
            ChannelState::Configured => Ok(()),
            ChannelState::NotConfigured => Err(ConfigError::NotConfigured.into()),
            ChannelState::Active
            | ChannelState::ProducerOverride
            | ChannelState::ConsumerOverride => Err(IoError::AlreadyStarted.into()),
            ChannelState::Error => Err(DmaError::DmaFailure.into()),
            ChannelState::Aborted => Err(DmaError::InvalidSequence.into()),
        }
    }

    fn cancelled(&self, epoch: Option<u32>) -> bool {
        matches!(epoch, Some(e) if e != self.epoch)
    }

    /// Validate a CPU view against the current ring.
    fn check_view(&self, index: usize, epoch: u32) -> Result<()> {
        self.ensure_active()?;
        let held = index < self.ring.len()
            && self.ring.cpu == index
            && self.ring.slot(index).owner == SlotOwner::Cpu;
        if epoch != self.epoch || !held {
            return Err(DmaError::InvalidSequence.into());
        }
        Ok(())
    }

    /// Give a CPU-held or orphaned slot back to the ring.
    pub(crate) fn release_slot(&mut self, ty: ChannelType, index: usize) {
        if index >= self.ring.len() {
            return;
        }
        let slot = self.ring.slot_mut(index);
        match slot.owner {
            SlotOwner::Orphaned => slot.clear(),
            SlotOwner::Cpu if ty == ChannelType::ManualOut => slot.clear(),
            SlotOwner::Cpu => {
                slot.owner = SlotOwner::Discarded;
                slot.count = 0;
                self.ring.cpu = self.ring.next(index);
                self.ring.reclaim_discarded();
            }
            _ => {}
        }
    }

    /// Finish a finite transfer once its last hardware socket reached the
    /// size and nothing is left in flight.
    pub(crate) fn check_completion(&mut self, ty: ChannelType, mask: EventMask, batch: &mut EventBatch) {
        if self.state != ChannelState::Active || self.xfer_size == 0 {
            return;
        }
        let done = if ty.has_hw_consumer() {
            self.cons_count
        } else {
            self.prod_count
        };
        if done >= self.xfer_size && self.ring.is_idle() {
            self.state = ChannelState::Configured;
            self.ring.flush();
            batch.push(mask, DmaEvent::TransferComplete);
        }
    }
}

/// Amount to add to a transfer counter for `bytes` moved in one buffer.
pub(crate) fn account(mode: TransferMode, bytes: usize) -> u32 {
    match mode {
        TransferMode::Byte => u32::try_from(bytes).unwrap_or(u32::MAX),
        TransferMode::Buffer => 1,
    }
}

/// DMA channel with up to `SLOTS` ring buffers carved from `BYTES` bytes of
/// buffer memory.
///
/// `'a` is the lifetime of everything lent to the channel: the notification
/// handler and override buffers.
pub struct DmaChannel<'a, const SLOTS: usize, const BYTES: usize> {
    pub(crate) pool: BufferPool<BYTES>,
    pub(crate) config: ChannelConfig,
    notify: Option<&'a dyn DmaNotify<SLOTS, BYTES>>,
    pub(crate) inner: CriticalSectionCell<Inner<'a, SLOTS>>,
}

// SAFETY: all bookkeeping lives in the critical-section cell. Pool memory is
// only accessed by the side that owns the slot according to that bookkeeping
// (hardware sides under the lock, CPU views through their exclusive borrow),
// and `create`/`destroy` take `&mut self`.
unsafe impl<const SLOTS: usize, const BYTES: usize> Sync for DmaChannel<'_, SLOTS, BYTES> {}

impl<'a, const SLOTS: usize, const BYTES: usize> DmaChannel<'a, SLOTS, BYTES> {
    /// Create an unconfigured channel (const, suitable for static storage).
    #[must_use]
    pub const fn new() -> Self {
        Self {
            pool: BufferPool::new(),
            config: ChannelConfig::new(
                Socket::producer(SocketId::UsbOut(1)),
                Socket::consumer(SocketId::UsbIn(1)),
            ),
            notify: None,
            inner: CriticalSectionCell::new(Inner::new()),
        }
    }

    /// Configure the channel and lay out its buffer pool.
    ///
    /// Nothing changes on failure.
    pub fn create(
        &mut self,
        config: ChannelConfig,
        notify: Option<&'a dyn DmaNotify<SLOTS, BYTES>>,
    ) -> Result<()> {
        if self.inner.get_mut().state != ChannelState::NotConfigured {
            return Err(IoError::AlreadyStarted.into());
        }
        config.validate::<SLOTS>()?;
        self.pool.allocate(config.buffer_size, config.buffer_count)?;

        self.config = config;
        self.notify = notify;
        let inner = self.inner.get_mut();
        let lent = inner.lent.take();
        *inner = Inner::new();
        inner.lent = lent;
        inner.ring.configure(config.buffer_count);
        inner.state = ChannelState::Configured;

        #[cfg(feature = "log")]
        log::debug!(
            "dma: created {:?} channel, {} x {} bytes",
            config.channel_type,
            config.buffer_count,
            config.buffer_size
        );
        Ok(())
    }

    /// Tear the channel down.
    ///
    /// Override memory still lent to the channel stays reclaimable through
    /// [`Self::take_override_buffer`], also across a later `create`.
    pub fn destroy(&mut self) {
        self.pool.release();
        self.notify = None;
        let inner = self.inner.get_mut();
        let lent = inner.lent.take();
        *inner = Inner::new();
        inner.lent = lent;
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// Current state
    pub fn state(&self) -> ChannelState {
        self.inner.with_ref(|inner| inner.state)
    }

    /// State and transfer counters
    pub fn get_status(&self) -> ChannelStatus {
        self.inner.with_ref(|inner| ChannelStatus {
            state: inner.state,
            prod_count: inner.prod_count,
            cons_count: inner.cons_count,
            buffers_in_flight: inner.ring.len()
                - inner.ring.count_owned(SlotOwner::Producer)
                - inner.ring.count_owned(SlotOwner::Discarded)
                - inner.ring.count_owned(SlotOwner::Orphaned),
        })
    }

    /// Active configuration
    pub fn config(&self) -> &ChannelConfig {
        &self.config
    }

    /// Channel type
    pub fn channel_type(&self) -> ChannelType {
        self.config.channel_type
    }

    /// Ring buffer size in bytes (zero when not configured)
    pub fn buffer_size(&self) -> usize {
        self.pool.buffer_size()
    }

    /// Number of ring buffers (zero when not configured)
    pub fn buffer_count(&self) -> usize {
        self.pool.buffer_count()
    }

    fn epoch(&self) -> u32 {
        self.inner.with_ref(|inner| inner.epoch)
    }

    // =========================================================================
    // Transfer control
    // =========================================================================

    /// Start a ring transfer of `count` bytes or buffers; zero is infinite.
    pub fn set_transfer(&self, count: u32) -> Result<()> {
        let buffers = self.pool.buffer_count();
        self.inner.with(|inner| {
            inner.ensure_idle()?;
            if buffers == 0 {
                return Err(ConfigError::NoBuffers.into());
            }
            inner.clear_transfer();
            inner.xfer_size = count;
            inner.state = ChannelState::Active;
            Ok(())
        })
    }

    /// Switch byte/buffer accounting. Only while `Configured`.
    pub fn update_mode(&mut self, mode: TransferMode) -> Result<()> {
        self.inner.get_mut().ensure_idle()?;
        self.config.mode = mode;
        Ok(())
    }

    /// Stop every transfer and cancel all waiters.
    ///
    /// Buffers stay where they are until `reset()`.
    pub fn abort(&self) -> Result<()> {
        self.locked(|inner, batch| {
            if inner.state == ChannelState::NotConfigured {
                return Err(ConfigError::NotConfigured.into());
            }
            inner.state = ChannelState::Aborted;
            inner.epoch = inner.epoch.wrapping_add(1);
            batch.push(self.config.notification, DmaEvent::Aborted);

            #[cfg(feature = "log")]
            log::debug!("dma: channel aborted");
            Ok(())
        })
    }

    /// Flush the ring and return to `Configured` from any state.
    ///
    /// Waiters are cancelled. Buffers still held through a [`Buffer`] view
    /// become orphans and rejoin the ring when the view is released.
    pub fn reset(&self) -> Result<()> {
        self.inner.with(|inner| {
            if inner.state == ChannelState::NotConfigured {
                return Err(ConfigError::NotConfigured.into());
            }
            inner.epoch = inner.epoch.wrapping_add(1);
            inner.ring.flush();
            inner.clear_transfer();
            inner.state = ChannelState::Configured;
            Ok(())
        })
    }

    /// Suspend the producer and/or consumer socket.
    pub fn set_suspend(&self, prod: SuspendOption, cons: SuspendOption) -> Result<()> {
        let ty = self.config.channel_type;
        let mask = self.config.notification;
        self.locked(|inner, batch| {
            inner.ensure_active()?;
            if (prod != SuspendOption::None && !ty.has_hw_producer())
                || (cons != SuspendOption::None && !ty.has_hw_consumer())
            {
                return Err(DmaError::NotSupported.into());
            }

            match prod {
                SuspendOption::None => {}
                SuspendOption::Now => {
                    let slot = inner.ring.slot(inner.ring.prod);
                    if slot.owner == SlotOwner::Producer && slot.count > 0 {
                        inner.prod_suspend = SuspendOption::AfterBuffer;
                    } else {
                        inner.prod_suspended = true;
                        batch.push(mask, DmaEvent::ProducerSuspended);
                    }
                }
                later => inner.prod_suspend = later,
            }
            match cons {
                SuspendOption::None => {}
                SuspendOption::Now => {
                    inner.cons_suspended = true;
                    batch.push(mask, DmaEvent::ConsumerSuspended);
                }
                later => inner.cons_suspend = later,
            }
            Ok(())
        })
    }

    /// Resume suspended sockets and drop pending suspend requests.
    pub fn resume(&self, prod: bool, cons: bool) -> Result<()> {
        self.inner.with(|inner| {
            inner.ensure_active()?;
            if prod {
                inner.prod_suspended = false;
                inner.prod_suspend = SuspendOption::None;
            }
            if cons {
                inner.cons_suspended = false;
                inner.cons_suspend = SuspendOption::None;
            }
            Ok(())
        })
    }

    /// Push a partially filled producer buffer out as a short buffer.
    pub fn set_wrap_up(&self) -> Result<()> {
        if !self.config.channel_type.has_hw_producer() {
            return Err(DmaError::NotSupported.into());
        }
        self.locked(|inner, batch| {
            inner.ensure_active()?;
            let index = inner.ring.prod;
            let slot = inner.ring.slot(index);
            if slot.owner == SlotOwner::Producer && slot.count > 0 {
                self.finish_produced(inner, index, BufferFlags::NONE, batch);
            }
            Ok(())
        })
    }

    // =========================================================================
    // CPU buffer access
    // =========================================================================

    /// Take the next buffer for the CPU without waiting.
    ///
    /// MANUAL and MANUAL_IN channels return the next produced buffer;
    /// MANUAL_OUT returns the next empty buffer to fill. Only one buffer may
    /// be held at a time.
    pub fn try_get_buffer(&self) -> Result<Buffer<'_, 'a, SLOTS, BYTES>> {
        match self.poll_buffer(None) {
            Poll::Ready(result) => result,
            Poll::Pending => Err(DmaError::NoBufferAvailable.into()),
        }
    }

    /// Take the next buffer for the CPU, waiting up to `wait`.
    pub fn get_buffer<D: DelayNs>(
        &self,
        wait: WaitOption,
        delay: &mut D,
    ) -> Result<Buffer<'_, 'a, SLOTS, BYTES>> {
        let epoch = self.epoch();
        block_on(wait, delay, || self.poll_buffer(Some(epoch)))?
    }

    fn poll_buffer(&self, epoch: Option<u32>) -> Poll<Result<Buffer<'_, 'a, SLOTS, BYTES>>> {
        let ty = self.config.channel_type;
        let grant: Poll<Result<(usize, u32, usize, BufferFlags)>> = self.inner.with(|inner| {
            if inner.cancelled(epoch) {
                return Poll::Ready(Err(IoError::Aborted.into()));
            }
            if let Err(e) = inner.ensure_active() {
                return Poll::Ready(Err(e));
            }
            if !ty.is_manual() {
                return Poll::Ready(Err(DmaError::NotSupported.into()));
            }

            let wanted = if ty == ChannelType::ManualOut {
                SlotOwner::Producer
            } else {
                SlotOwner::Filled
            };
            let index = inner.ring.cpu;
            let current = inner.epoch;
            let slot = inner.ring.slot_mut(index);
            if slot.owner == SlotOwner::Cpu {
                Poll::Ready(Err(DmaError::InvalidSequence.into()))
            } else if slot.owner == wanted {
                slot.owner = SlotOwner::Cpu;
                Poll::Ready(Ok((index, current, slot.count, slot.flags)))
            } else {
                Poll::Pending
            }
        });

        match grant {
            Poll::Ready(Ok((index, epoch, count, flags))) => {
                // SAFETY: slot `index` now belongs to the CPU. The ring hands it
                // to no other side until this view is committed, discarded or
                // dropped, and `reset()` only orphans it.
                let data = unsafe { self.pool.slot_mut(index) };
                Poll::Ready(Ok(Buffer::new(
                    self,
                    data,
                    index,
                    epoch,
                    count,
                    self.config.prod_header,
                    self.config.prod_footer,
                    flags,
                )))
            }
            Poll::Ready(Err(e)) => Poll::Ready(Err(e)),
            Poll::Pending => Poll::Pending,
        }
    }

    /// Hand a CPU buffer to the consumer.
    ///
    /// The consumer sends `count` bytes starting at the configured consumer
    /// header offset. MANUAL and MANUAL_OUT only. On error the buffer is
    /// discarded.
    pub fn commit_buffer(
        &self,
        buffer: Buffer<'_, 'a, SLOTS, BYTES>,
        count: usize,
        flags: BufferFlags,
    ) -> Result<()> {
        let (index, epoch) = buffer.into_parts();
        let ty = self.config.channel_type;
        let size = self.pool.buffer_size();
        let cons_header = self.config.cons_header;

        self.locked(|inner, batch| {
            let checked = inner.check_view(index, epoch).and_then(|()| {
                if !matches!(ty, ChannelType::Manual | ChannelType::ManualOut) {
                    Err(DmaError::NotSupported.into())
                } else if cons_header.checked_add(count).is_none_or(|end| end > size) {
                    Err(ConfigError::BadArgument.into())
                } else {
                    Ok(())
                }
            });
            if let Err(e) = checked {
                inner.release_slot(ty, index);
                inner.check_completion(ty, self.config.notification, batch);
                return Err(e);
            }

            let slot = inner.ring.slot_mut(index);
            slot.owner = SlotOwner::Consumer;
            slot.count = count;
            slot.flags = flags;
            inner.ring.cpu = inner.ring.next(index);
            Ok(())
        })
    }

    /// Drop a CPU buffer without forwarding it.
    pub fn discard_buffer(&self, buffer: Buffer<'_, 'a, SLOTS, BYTES>) -> Result<()> {
        let (index, epoch) = buffer.into_parts();
        let ty = self.config.channel_type;
        self.locked(|inner, batch| {
            let checked = inner.check_view(index, epoch);
            inner.release_slot(ty, index);
            inner.check_completion(ty, self.config.notification, batch);
            checked
        })
    }

    /// Release path of a dropped [`Buffer`] view.
    pub(crate) fn release_dropped(&self, index: usize) {
        let ty = self.config.channel_type;
        self.locked(|inner, batch| {
            inner.release_slot(ty, index);
            inner.check_completion(ty, self.config.notification, batch);
        });
    }

    // =========================================================================
    // Override mode
    // =========================================================================

    /// Send `count` bytes of `buffer` to the consumer socket, bypassing the
    /// ring. The buffer is lent until the send completes, the channel is
    /// reset, or it is aborted; reclaim it with [`Self::take_override_buffer`].
    pub fn setup_send_buffer(
        &self,
        buffer: &'a mut [u8],
        count: usize,
    ) -> core::result::Result<(), OverrideError<'a>> {
        let ty = self.config.channel_type;
        self.inner.with(|inner| {
            let checked = inner.ensure_idle().and_then(|()| {
                if !ty.has_hw_consumer() {
                    Err(DmaError::NotSupported.into())
                } else if count > buffer.len() {
                    Err(ConfigError::BadArgument.into())
                } else if inner.lent.is_some() {
                    Err(DmaError::InvalidSequence.into())
                } else {
                    Ok(())
                }
            });
            match checked {
                Ok(()) => {
                    inner.clear_transfer();
                    inner.lent = Some(Lent {
                        data: buffer,
                        count,
                        limit: count,
                        dir: LentDir::Send,
                        done: false,
                    });
                    inner.state = ChannelState::ProducerOverride;
                    Ok(())
                }
                Err(error) => Err(OverrideError { error, buffer }),
            }
        })
    }

    /// Receive into `buffer` from the producer socket, bypassing the ring.
    ///
    /// The buffer must be a non-empty multiple of 16 bytes. Reception ends
    /// when the buffer is full or the producer signals EOP.
    pub fn setup_recv_buffer(&self, buffer: &'a mut [u8]) -> core::result::Result<(), OverrideError<'a>> {
        let size = buffer.len();
        self.setup_recv_prefix(buffer, size)
    }

    /// Like [`Self::setup_recv_buffer`], but reception also ends after `size`
    /// bytes. `size` must be a non-zero multiple of 16 no larger than the
    /// buffer.
    pub fn setup_recv_prefix(
        &self,
        buffer: &'a mut [u8],
        size: usize,
    ) -> core::result::Result<(), OverrideError<'a>> {
        let ty = self.config.channel_type;
        self.inner.with(|inner| {
            let checked = inner.ensure_idle().and_then(|()| {
                if !ty.has_hw_producer() {
                    Err(DmaError::NotSupported.into())
                } else if size == 0 || size % DMA_GRANULARITY != 0 || size > buffer.len() {
                    Err(ConfigError::BadArgument.into())
                } else if inner.lent.is_some() {
                    Err(DmaError::InvalidSequence.into())
                } else {
                    Ok(())
                }
            });
            match checked {
                Ok(()) => {
                    inner.clear_transfer();
                    inner.lent = Some(Lent {
                        data: buffer,
                        count: 0,
                        limit: size,
                        dir: LentDir::Recv,
                        done: false,
                    });
                    inner.state = ChannelState::ConsumerOverride;
                    Ok(())
                }
                Err(error) => Err(OverrideError { error, buffer }),
            }
        })
    }

    /// Reclaim lent override memory once the override is no longer running.
    pub fn take_override_buffer(&self) -> Option<&'a mut [u8]> {
        self.inner.with(|inner| {
            let reclaimable = match &inner.lent {
                Some(lent) => lent.done || !inner.state.is_override(),
                None => false,
            };
            if reclaimable {
                inner.lent.take().map(|lent| lent.data)
            } else {
                None
            }
        })
    }

    // =========================================================================
    // Waits
    // =========================================================================

    fn poll_completion(&self, epoch: Option<u32>) -> Poll<Result<()>> {
        self.inner.with_ref(|inner| {
            if inner.cancelled(epoch) {
                return Poll::Ready(Err(IoError::Aborted.into()));
            }
            match inner.state {
                ChannelState::Configured => Poll::Ready(Ok(())),
                ChannelState::Active
                | ChannelState::ProducerOverride
                | ChannelState::ConsumerOverride => Poll::Pending,
                ChannelState::Error => Poll::Ready(Err(DmaError::DmaFailure.into())),
                ChannelState::Aborted => Poll::Ready(Err(IoError::Aborted.into())),
                ChannelState::NotConfigured => Poll::Ready(Err(ConfigError::NotConfigured.into())),
            }
        })
    }

    /// Check whether the running transfer or override has finished.
    pub fn try_wait_for_completion(&self) -> Result<()> {
        match self.poll_completion(None) {
            Poll::Ready(result) => result,
            Poll::Pending => Err(IoError::Timeout.into()),
        }
    }

    /// Wait for a finite transfer or an override to finish.
    pub fn wait_for_completion<D: DelayNs>(&self, wait: WaitOption, delay: &mut D) -> Result<()> {
        let epoch = self.epoch();
        block_on(wait, delay, || self.poll_completion(Some(epoch)))?
    }

    fn poll_recv(&self, epoch: Option<u32>) -> Poll<Result<RecvBuffer<'a>>> {
        self.inner.with(|inner| {
            if inner.cancelled(epoch) {
                return Poll::Ready(Err(IoError::Aborted.into()));
            }
            let received = matches!(
                inner.lent,
                Some(Lent {
                    dir: LentDir::Recv,
                    done: true,
                    ..
                })
            );
            if received {
                if let Some(lent) = inner.lent.take() {
                    return Poll::Ready(Ok(RecvBuffer {
                        data: lent.data,
                        count: lent.count,
                    }));
                }
            }
            match inner.state {
                ChannelState::ConsumerOverride => Poll::Pending,
                ChannelState::Error => Poll::Ready(Err(DmaError::DmaFailure.into())),
                ChannelState::Aborted => Poll::Ready(Err(IoError::Aborted.into())),
                ChannelState::NotConfigured => Poll::Ready(Err(ConfigError::NotConfigured.into())),
                _ => Poll::Ready(Err(DmaError::InvalidSequence.into())),
            }
        })
    }

    /// Take a completed override receive without waiting.
    pub fn try_wait_for_recv_buffer(&self) -> Result<RecvBuffer<'a>> {
        match self.poll_recv(None) {
            Poll::Ready(result) => result,
            Poll::Pending => Err(IoError::Timeout.into()),
        }
    }

    /// Wait for an override receive to finish and take the buffer back.
    pub fn wait_for_recv_buffer<D: DelayNs>(
        &self,
        wait: WaitOption,
        delay: &mut D,
    ) -> Result<RecvBuffer<'a>> {
        let epoch = self.epoch();
        block_on(wait, delay, || self.poll_recv(Some(epoch)))?
    }

    // =========================================================================
    // Internals
    // =========================================================================

    /// Run `f` under the channel lock, then deliver the events it raised.
    pub(crate) fn locked<R>(&self, f: impl FnOnce(&mut Inner<'a, SLOTS>, &mut EventBatch) -> R) -> R {
        let mut batch = EventBatch::new();
        let result = self.inner.with(|inner| f(inner, &mut batch));
        self.dispatch(&batch);
        result
    }

    fn dispatch(&self, batch: &EventBatch) {
        if batch.is_empty() {
            return;
        }
        if let Some(handler) = self.notify {
            for event in batch.iter() {
                handler.notify(self, event);
            }
        }
    }
}

impl<const SLOTS: usize, const BYTES: usize> Default for DmaChannel<'_, SLOTS, BYTES> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[allow(clippy::std_instead_of_core, clippy::std_instead_of_alloc)]
mod tests {
    extern crate std;

    use super::*;
    use crate::dma::{Drained, SocketKind};
    use crate::testing::{MockDelay, RecordingNotify, StdDelay};
    use std::thread;
    use std::time::Duration;

    type Channel<'a> = DmaChannel<'a, 4, 4096>;

    fn auto(size: usize, count: usize) -> ChannelConfig {
        ChannelConfig::new(
            Socket::producer(SocketId::UsbOut(1)),
            Socket::consumer(SocketId::Peripheral(0)),
        )
        .with_buffers(size, count)
    }

    fn manual(size: usize, count: usize) -> ChannelConfig {
        auto(size, count).with_type(ChannelType::Manual)
    }

    fn manual_out(size: usize, count: usize) -> ChannelConfig {
        ChannelConfig::new(
            Socket::producer(SocketId::Cpu),
            Socket::consumer(SocketId::UsbIn(1)),
        )
        .with_type(ChannelType::ManualOut)
        .with_buffers(size, count)
    }

    fn manual_in(size: usize, count: usize) -> ChannelConfig {
        ChannelConfig::new(
            Socket::producer(SocketId::UsbOut(1)),
            Socket::consumer(SocketId::Cpu),
        )
        .with_type(ChannelType::ManualIn)
        .with_buffers(size, count)
    }

    fn started<'a>(config: ChannelConfig) -> Channel<'a> {
        let mut channel = Channel::new();
        channel.create(config, None).unwrap();
        channel.set_transfer(0).unwrap();
        channel
    }

    // -------------------------------------------------------------------------
    // Creation
    // -------------------------------------------------------------------------

    #[test]
    fn create_rejects_unaligned_size_without_side_effects() {
        let mut channel = Channel::new();
        let result = channel.create(manual_out(1000, 4), None);

        assert_eq!(result, Err(Error::Config(ConfigError::BadArgument)));
        assert_eq!(channel.state(), ChannelState::NotConfigured);
        assert_eq!(channel.buffer_count(), 0);
        assert_eq!(channel.buffer_size(), 0);
        assert_eq!(channel.set_transfer(0), Err(Error::Config(ConfigError::NotConfigured)));
    }

    #[test]
    fn create_rejects_pool_over_budget() {
        let mut channel: DmaChannel<'_, 4, 1024> = DmaChannel::new();
        assert_eq!(
            channel.create(auto(512, 4), None),
            Err(Error::Config(ConfigError::AllocationFailed))
        );
        assert_eq!(channel.state(), ChannelState::NotConfigured);
    }

    #[test]
    fn create_twice_requires_destroy() {
        let mut channel = Channel::new();
        channel.create(auto(512, 2), None).unwrap();
        assert_eq!(
            channel.create(auto(512, 2), None),
            Err(Error::Io(IoError::AlreadyStarted))
        );
        channel.destroy();
        assert_eq!(channel.state(), ChannelState::NotConfigured);
        channel.create(auto(256, 4), None).unwrap();
        assert_eq!(channel.buffer_size(), 256);
        assert_eq!(channel.channel_type(), ChannelType::Auto);
        assert_eq!(channel.config().consumer.kind, SocketKind::Consumer);
    }

    #[test]
    fn destroy_keeps_lent_memory_reclaimable() {
        let mut mem = [0u8; 32];
        let mut other = [0u8; 32];
        let mut channel = Channel::new();
        channel.create(manual_in(64, 0), None).unwrap();
        channel.setup_recv_buffer(&mut mem).unwrap();
        channel.destroy();
        channel.create(manual_in(64, 0), None).unwrap();

        assert_eq!(
            channel.setup_recv_buffer(&mut other).unwrap_err().error,
            Error::Dma(DmaError::InvalidSequence)
        );
        assert_eq!(channel.take_override_buffer().map(|b| b.len()), Some(32));
        assert_eq!(channel.take_override_buffer(), None);
    }

    // -------------------------------------------------------------------------
    // State machine
    // -------------------------------------------------------------------------

    #[test]
    fn set_transfer_only_from_configured() {
        let channel = started(auto(64, 2));
        assert_eq!(channel.state(), ChannelState::Active);
        assert_eq!(channel.set_transfer(0), Err(Error::Io(IoError::AlreadyStarted)));
    }

    #[test]
    fn data_ops_before_start_report_not_started() {
        let mut channel = Channel::new();
        channel.create(manual(64, 2), None).unwrap();
        assert_eq!(
            channel.try_get_buffer().map(|_| ()),
            Err(Error::Io(IoError::NotStarted))
        );
        assert_eq!(
            channel.socket_produce(&[1, 2, 3], true),
            Err(Error::Io(IoError::NotStarted))
        );
    }

    #[test]
    fn aborted_channel_rejects_data_ops_until_reset() {
        let channel = started(manual(64, 2));
        channel.abort().unwrap();
        assert_eq!(channel.state(), ChannelState::Aborted);

        let seq = Err(Error::Dma(DmaError::InvalidSequence));
        assert_eq!(channel.try_get_buffer().map(|_| ()), seq);
        assert_eq!(channel.socket_produce(&[0; 8], false), seq.map(|()| 0));
        assert_eq!(channel.set_transfer(0), seq);

        channel.reset().unwrap();
        assert_eq!(channel.state(), ChannelState::Configured);
        channel.set_transfer(0).unwrap();
        assert_eq!(channel.state(), ChannelState::Active);
    }

    #[test]
    fn reset_recovers_from_any_state() {
        // Active with data in flight
        let channel = started(auto(64, 4));
        channel.socket_produce(&[7; 64], false).unwrap();
        channel.socket_produce(&[7; 10], true).unwrap();
        assert_eq!(channel.get_status().buffers_in_flight, 2);
        channel.reset().unwrap();
        let status = channel.get_status();
        assert_eq!(status.state, ChannelState::Configured);
        assert_eq!(status.buffers_in_flight, 0);
        assert_eq!((status.prod_count, status.cons_count), (0, 0));

        // Error
        channel.set_transfer(0).unwrap();
        channel.socket_fault();
        assert_eq!(channel.state(), ChannelState::Error);
        assert_eq!(
            channel.socket_produce(&[1], true),
            Err(Error::Dma(DmaError::DmaFailure))
        );
        channel.reset().unwrap();
        assert_eq!(channel.state(), ChannelState::Configured);

        // Aborted, and reset of an idle channel
        channel.abort().unwrap();
        channel.reset().unwrap();
        channel.reset().unwrap();
        assert_eq!(channel.state(), ChannelState::Configured);
    }

    #[test]
    fn reset_on_unconfigured_channel_fails() {
        let channel = Channel::new();
        assert_eq!(channel.reset(), Err(Error::Config(ConfigError::NotConfigured)));
        assert_eq!(channel.abort(), Err(Error::Config(ConfigError::NotConfigured)));
    }

    #[test]
    fn update_mode_only_while_configured() {
        let mut channel = Channel::new();
        channel.create(auto(64, 2), None).unwrap();
        channel.update_mode(TransferMode::Buffer).unwrap();
        assert_eq!(channel.config().mode, TransferMode::Buffer);
        channel.set_transfer(0).unwrap();
        assert_eq!(
            channel.update_mode(TransferMode::Byte),
            Err(Error::Io(IoError::AlreadyStarted))
        );
    }

    // -------------------------------------------------------------------------
    // Ring transfers
    // -------------------------------------------------------------------------

    #[test]
    fn manual_commits_follow_production_order() {
        let channel = started(manual(64, 4));
        let packets: [&[u8]; 5] = [&[1; 64], &[2; 10], &[3; 33], &[4; 1], &[5; 64]];
        let mut produced = 0usize;
        let mut committed = 0usize;
        let mut drained = std::vec::Vec::new();
        let mut out = [0u8; 64];

        for packet in packets {
            let eop = packet.len() < 64;
            assert_eq!(channel.socket_produce(packet, eop), Ok(packet.len()));
            produced += packet.len();

            let buffer = channel.try_get_buffer().unwrap();
            assert_eq!(buffer.payload(), packet);
            let count = buffer.count();
            channel.commit_buffer(buffer, count, buffer_flags(eop)).unwrap();
            committed += count;
            assert!(committed <= produced);

            let Drained { count, .. } = channel.socket_consume(&mut out).unwrap();
            drained.push(out[0]);
            assert_eq!(count, packet.len());
        }

        assert_eq!(drained, [1, 2, 3, 4, 5]);
        assert_eq!(channel.get_status().cons_count as usize, committed);
    }

    fn buffer_flags(eop: bool) -> BufferFlags {
        if eop { BufferFlags::EOP } else { BufferFlags::NONE }
    }

    #[test]
    fn only_one_cpu_buffer_at_a_time() {
        let channel = started(manual(64, 4));
        channel.socket_produce(&[1; 4], true).unwrap();
        channel.socket_produce(&[2; 4], true).unwrap();

        let held = channel.try_get_buffer().unwrap();
        assert_eq!(
            channel.try_get_buffer().map(|_| ()),
            Err(Error::Dma(DmaError::InvalidSequence))
        );
        channel.discard_buffer(held).unwrap();

        let next = channel.try_get_buffer().unwrap();
        assert_eq!(next.payload(), &[2; 4]);
    }

    #[test]
    fn eop_short_buffers_are_not_coalesced() {
        let channel = started(auto(64, 4));
        channel.socket_produce(&[0xAA; 10], true).unwrap();
        channel.socket_produce(&[0xBB; 20], true).unwrap();

        let mut out = [0u8; 64];
        let first = channel.socket_consume(&mut out).unwrap();
        assert_eq!(first.count, 10);
        assert!(first.flags.is_eop());
        assert!(out[..10].iter().all(|&b| b == 0xAA));

        let second = channel.socket_consume(&mut out).unwrap();
        assert_eq!(second.count, 20);
        assert_eq!(channel.get_status().cons_count, 30);
    }

    #[test]
    fn producer_spills_into_next_buffer() {
        let channel = started(auto(64, 4));
        assert_eq!(channel.socket_produce(&[9; 100], true), Ok(64));
        assert_eq!(channel.socket_produce(&[9; 36], true), Ok(36));
        let mut out = [0u8; 64];
        assert_eq!(channel.socket_consume(&mut out).unwrap().count, 64);
        assert_eq!(channel.socket_consume(&mut out).unwrap().count, 36);
    }

    #[test]
    fn manual_out_preload_and_drain() {
        let channel = started(manual_out(1024, 4));

        for _ in 0..4 {
            let mut buffer = channel.try_get_buffer().unwrap();
            assert_eq!(buffer.count(), 0);
            buffer.payload_mut().fill(0x5A);
            channel.commit_buffer(buffer, 1024, BufferFlags::NONE).unwrap();
        }
        assert_eq!(
            channel.try_get_buffer().map(|_| ()),
            Err(Error::Dma(DmaError::NoBufferAvailable))
        );

        let mut out = [0u8; 1024];
        for _ in 0..4 {
            assert_eq!(channel.socket_consume(&mut out).unwrap().count, 1024);
            assert!(out.iter().all(|&b| b == 0x5A));
        }

        let status = channel.get_status();
        assert_eq!(status.prod_count, 0);
        assert_eq!(status.cons_count, 4096);
    }

    #[test]
    fn consumer_needs_room_for_whole_buffer() {
        let channel = started(auto(64, 2));
        channel.socket_produce(&[1; 40], true).unwrap();
        let mut small = [0u8; 16];
        assert_eq!(
            channel.socket_consume(&mut small),
            Err(Error::Dma(DmaError::BufferTooSmall))
        );
        let mut out = [0u8; 64];
        assert_eq!(channel.socket_consume(&mut out).unwrap().count, 40);
    }

    #[test]
    fn empty_ring_reports_no_buffer() {
        let channel = started(auto(64, 2));
        let mut out = [0u8; 64];
        assert_eq!(
            channel.socket_consume(&mut out),
            Err(Error::Dma(DmaError::NoBufferAvailable))
        );
        channel.socket_produce(&[0; 64], false).unwrap();
        channel.socket_produce(&[0; 64], false).unwrap();
        assert_eq!(
            channel.socket_produce(&[0; 1], true),
            Err(Error::Dma(DmaError::NoBufferAvailable))
        );
    }

    #[test]
    fn prod_avail_count_holds_back_producer() {
        let channel = started(auto(64, 4).with_prod_avail_count(2));
        for _ in 0..3 {
            channel.socket_produce(&[0; 64], false).unwrap();
        }
        assert_eq!(
            channel.socket_produce(&[0; 64], false),
            Err(Error::Dma(DmaError::NoBufferAvailable))
        );
        let mut out = [0u8; 64];
        channel.socket_consume(&mut out).unwrap();
        assert_eq!(channel.socket_produce(&[0; 64], false), Ok(64));
    }

    #[test]
    fn framing_regions_surround_payload() {
        let channel = started(manual(128, 2).with_framing(16, 16, 0));
        channel.socket_produce(&[0xCC; 10], true).unwrap();

        let mut buffer = channel.try_get_buffer().unwrap();
        assert_eq!(buffer.payload(), &[0xCC; 10]);
        assert_eq!(buffer.header_mut().len(), 16);
        buffer.header_mut().fill(0x11);
        buffer.footer_mut().fill(0x22);
        let framed = buffer.framed_len();
        assert_eq!(framed, 42);
        channel.commit_buffer(buffer, framed, BufferFlags::EOP).unwrap();

        let mut out = [0u8; 128];
        assert_eq!(channel.socket_consume(&mut out).unwrap().count, 42);
        assert!(out[..16].iter().all(|&b| b == 0x11));
        assert!(out[16..26].iter().all(|&b| b == 0xCC));
        assert!(out[26..42].iter().all(|&b| b == 0x22));
    }

    #[test]
    fn commit_larger_than_buffer_discards() {
        let channel = started(manual_out(64, 2));
        let buffer = channel.try_get_buffer().unwrap();
        assert_eq!(
            channel.commit_buffer(buffer, 65, BufferFlags::NONE),
            Err(Error::Config(ConfigError::BadArgument))
        );
        assert_eq!(channel.get_status().buffers_in_flight, 0);
        assert!(channel.try_get_buffer().is_ok());
    }

    #[test]
    fn commit_count_overflow_is_rejected() {
        let channel = started(manual_out(64, 2).with_framing(0, 0, 16));
        let buffer = channel.try_get_buffer().unwrap();
        assert_eq!(
            channel.commit_buffer(buffer, usize::MAX, BufferFlags::NONE),
            Err(Error::Config(ConfigError::BadArgument))
        );
        assert_eq!(channel.get_status().buffers_in_flight, 0);
        assert!(channel.try_get_buffer().is_ok());
    }

    #[test]
    fn commit_on_manual_in_is_not_supported() {
        let channel = started(manual_in(64, 2));
        channel.socket_produce(&[1; 8], true).unwrap();
        let buffer = channel.try_get_buffer().unwrap();
        assert_eq!(
            channel.commit_buffer(buffer, 8, BufferFlags::NONE),
            Err(Error::Dma(DmaError::NotSupported))
        );
        assert_eq!(channel.get_status().buffers_in_flight, 0);
    }

    #[test]
    fn auto_channel_has_no_cpu_buffers() {
        let channel = started(auto(64, 2));
        assert_eq!(
            channel.try_get_buffer().map(|_| ()),
            Err(Error::Dma(DmaError::NotSupported))
        );
    }

    #[test]
    fn dropping_a_buffer_discards_it() {
        let channel = started(manual(64, 2));
        channel.socket_produce(&[1; 8], true).unwrap();
        channel.socket_produce(&[2; 8], true).unwrap();
        {
            let _buffer = channel.try_get_buffer().unwrap();
        }
        assert_eq!(channel.try_get_buffer().unwrap().payload(), &[2; 8]);
    }

    #[test]
    fn view_held_across_reset_becomes_orphan() {
        let channel = started(manual_out(64, 2));
        let stale = channel.try_get_buffer().unwrap();
        assert_eq!(stale.index(), 0);

        channel.reset().unwrap();
        channel.set_transfer(0).unwrap();

        // Slot 0 is still referenced by the stale view.
        assert_eq!(
            channel.try_get_buffer().map(|_| ()),
            Err(Error::Dma(DmaError::NoBufferAvailable))
        );
        assert_eq!(
            channel.commit_buffer(stale, 64, BufferFlags::NONE),
            Err(Error::Dma(DmaError::InvalidSequence))
        );

        let fresh = channel.try_get_buffer().unwrap();
        assert_eq!(fresh.index(), 0);
    }

    // -------------------------------------------------------------------------
    // Completion
    // -------------------------------------------------------------------------

    #[test]
    fn infinite_transfer_never_completes() {
        let channel = started(auto(64, 2));
        let mut out = [0u8; 64];
        for _ in 0..10 {
            channel.socket_produce(&[0; 64], false).unwrap();
            channel.socket_consume(&mut out).unwrap();
        }
        let mut delay = MockDelay::new();
        assert_eq!(
            channel.wait_for_completion(WaitOption::Ticks(3), &mut delay),
            Err(Error::Io(IoError::Timeout))
        );
        assert_eq!(channel.state(), ChannelState::Active);
        assert_eq!(channel.get_status().cons_count, 640);
    }

    #[test]
    fn finite_transfer_completes_when_consumer_drains() {
        let notify = RecordingNotify::new();
        let mut channel = Channel::new();
        channel
            .create(
                auto(64, 2).with_notification(EventMask::TRANSFER_COMPLETE),
                Some(&notify),
            )
            .unwrap();
        channel.set_transfer(128).unwrap();

        let mut out = [0u8; 64];
        channel.socket_produce(&[0; 64], false).unwrap();
        channel.socket_produce(&[0; 64], false).unwrap();
        assert_eq!(
            channel.socket_produce(&[0; 1], false),
            Err(Error::Dma(DmaError::NoBufferAvailable))
        );
        channel.socket_consume(&mut out).unwrap();
        assert_eq!(channel.try_wait_for_completion(), Err(Error::Io(IoError::Timeout)));
        channel.socket_consume(&mut out).unwrap();

        assert_eq!(channel.state(), ChannelState::Configured);
        assert_eq!(notify.events(), [DmaEvent::TransferComplete]);
        let mut delay = MockDelay::new();
        assert_eq!(channel.wait_for_completion(WaitOption::NoWait, &mut delay), Ok(()));
    }

    #[test]
    fn finite_byte_transfer_stops_at_size() {
        let mut channel = Channel::new();
        channel.create(auto(64, 2), None).unwrap();
        channel.set_transfer(100).unwrap();

        assert_eq!(channel.socket_produce(&[7; 200], false), Ok(64));
        assert_eq!(channel.socket_produce(&[7; 200], false), Ok(36));
        assert_eq!(
            channel.socket_produce(&[7; 1], false),
            Err(Error::Dma(DmaError::NoBufferAvailable))
        );

        let mut out = [0u8; 64];
        assert_eq!(channel.socket_consume(&mut out).unwrap().count, 64);
        let last = channel.socket_consume(&mut out).unwrap();
        assert_eq!(last.count, 36);
        assert!(last.flags.is_eop());

        let status = channel.get_status();
        assert_eq!((status.prod_count, status.cons_count), (100, 100));
        assert_eq!(status.state, ChannelState::Configured);
    }

    #[test]
    fn buffer_mode_counts_buffers() {
        let mut channel = Channel::new();
        channel.create(auto(64, 4).with_mode(TransferMode::Buffer), None).unwrap();
        channel.set_transfer(2).unwrap();
        let mut out = [0u8; 64];
        channel.socket_produce(&[0; 5], true).unwrap();
        channel.socket_produce(&[0; 7], true).unwrap();
        assert_eq!(channel.get_status().prod_count, 2);
        channel.socket_consume(&mut out).unwrap();
        channel.socket_consume(&mut out).unwrap();
        assert_eq!(channel.state(), ChannelState::Configured);
    }

    #[test]
    fn manual_in_completes_on_producer_count() {
        let mut channel = Channel::new();
        channel.create(manual_in(64, 2), None).unwrap();
        channel.set_transfer(64).unwrap();
        channel.socket_produce(&[3; 64], false).unwrap();

        // Producer reached the size but the CPU still owes a discard.
        assert_eq!(channel.state(), ChannelState::Active);
        let buffer = channel.try_get_buffer().unwrap();
        channel.discard_buffer(buffer).unwrap();
        assert_eq!(channel.state(), ChannelState::Configured);
        assert_eq!(channel.get_status().cons_count, 0);
    }

    // -------------------------------------------------------------------------
    // Notifications, suspend, wrap-up
    // -------------------------------------------------------------------------

    #[test]
    fn notifications_respect_mask() {
        let notify = RecordingNotify::new();
        let mut channel = Channel::new();
        channel
            .create(
                auto(64, 2)
                    .with_type(ChannelType::AutoSignal)
                    .with_notification(EventMask::CONSUMED),
                Some(&notify),
            )
            .unwrap();
        channel.set_transfer(0).unwrap();
        channel.socket_produce(&[0; 16], true).unwrap();
        assert!(notify.events().is_empty());

        let mut out = [0u8; 64];
        channel.socket_consume(&mut out).unwrap();
        assert_eq!(
            notify.events(),
            [DmaEvent::ConsumedBuffer(crate::dma::BufferInfo {
                index: 0,
                count: 16,
                size: 64,
                flags: BufferFlags::EOP,
            })]
        );
    }

    #[test]
    fn abort_raises_event() {
        let notify = RecordingNotify::new();
        let mut channel = Channel::new();
        channel
            .create(auto(64, 2).with_notification(EventMask::ALL), Some(&notify))
            .unwrap();
        channel.abort().unwrap();
        assert_eq!(notify.events(), [DmaEvent::Aborted]);
    }

    #[test]
    fn producer_suspends_after_eop() {
        let notify = RecordingNotify::new();
        let mut channel = Channel::new();
        channel
            .create(
                auto(64, 4).with_notification(EventMask::PROD_SUSPENDED),
                Some(&notify),
            )
            .unwrap();
        channel.set_transfer(0).unwrap();
        channel
            .set_suspend(SuspendOption::AfterEop, SuspendOption::None)
            .unwrap();

        channel.socket_produce(&[0; 64], false).unwrap();
        assert!(notify.events().is_empty());
        channel.socket_produce(&[0; 8], true).unwrap();
        assert_eq!(notify.events(), [DmaEvent::ProducerSuspended]);
        assert_eq!(
            channel.socket_produce(&[0; 8], true),
            Err(Error::Dma(DmaError::SocketSuspended))
        );

        channel.resume(true, false).unwrap();
        assert_eq!(channel.socket_produce(&[0; 8], true), Ok(8));
    }

    #[test]
    fn consumer_suspend_now() {
        let channel = started(auto(64, 2));
        channel.socket_produce(&[0; 8], true).unwrap();
        channel
            .set_suspend(SuspendOption::None, SuspendOption::Now)
            .unwrap();
        let mut out = [0u8; 64];
        assert_eq!(
            channel.socket_consume(&mut out),
            Err(Error::Dma(DmaError::SocketSuspended))
        );
        channel.resume(false, true).unwrap();
        assert_eq!(channel.socket_consume(&mut out).unwrap().count, 8);
    }

    #[test]
    fn suspend_cpu_side_is_not_supported() {
        let channel = started(manual_out(64, 2));
        assert_eq!(
            channel.set_suspend(SuspendOption::Now, SuspendOption::None),
            Err(Error::Dma(DmaError::NotSupported))
        );
    }

    #[test]
    fn wrap_up_flushes_partial_buffer() {
        let channel = started(auto(64, 2));
        channel.socket_produce(&[4; 20], false).unwrap();
        let mut out = [0u8; 64];
        assert_eq!(
            channel.socket_consume(&mut out),
            Err(Error::Dma(DmaError::NoBufferAvailable))
        );
        channel.set_wrap_up().unwrap();
        let drained = channel.socket_consume(&mut out).unwrap();
        assert_eq!(drained.count, 20);
        assert!(!drained.flags.is_eop());
    }

    // -------------------------------------------------------------------------
    // Override mode
    // -------------------------------------------------------------------------

    #[test]
    fn override_send_round_trip() {
        let mut mem = [0x42u8; 64];
        let notify = RecordingNotify::new();
        let mut channel = Channel::new();
        channel
            .create(
                manual_out(64, 0).with_notification(EventMask::SEND_COMPLETE),
                Some(&notify),
            )
            .unwrap();
        channel.setup_send_buffer(&mut mem, 13).unwrap();
        assert_eq!(channel.state(), ChannelState::ProducerOverride);
        assert_eq!(channel.take_override_buffer(), None);

        let mut small = [0u8; 8];
        assert_eq!(
            channel.socket_consume(&mut small),
            Err(Error::Dma(DmaError::BufferTooSmall))
        );
        let mut out = [0u8; 64];
        assert_eq!(channel.socket_consume(&mut out).unwrap().count, 13);
        assert!(out[..13].iter().all(|&b| b == 0x42));

        let mut delay = MockDelay::new();
        assert_eq!(channel.wait_for_completion(WaitOption::NoWait, &mut delay), Ok(()));
        assert_eq!(notify.events(), [DmaEvent::SendComplete]);
        assert_eq!(channel.take_override_buffer().map(|b| b.len()), Some(64));
    }

    #[test]
    fn override_recv_ends_on_eop() {
        let mut mem = [0u8; 32];
        let mut channel = Channel::new();
        channel.create(manual_in(64, 0), None).unwrap();
        channel.setup_recv_buffer(&mut mem).unwrap();

        assert_eq!(channel.socket_produce(&[1; 20], false), Ok(20));
        assert_eq!(channel.try_wait_for_recv_buffer().map(|_| ()), Err(Error::Io(IoError::Timeout)));
        assert_eq!(channel.socket_produce(&[2; 5], true), Ok(5));

        let mut delay = MockDelay::new();
        let recv = channel
            .wait_for_recv_buffer(WaitOption::Ticks(1), &mut delay)
            .unwrap();
        assert_eq!(recv.count, 25);
        assert_eq!(&recv.received()[18..], &[1, 1, 2, 2, 2, 2, 2]);
        assert_eq!(channel.state(), ChannelState::Configured);
        assert_eq!(channel.get_status().prod_count, 25);
    }

    #[test]
    fn override_recv_ends_when_full() {
        let mut mem = [0u8; 16];
        let mut channel = Channel::new();
        channel.create(manual_in(64, 0), None).unwrap();
        channel.setup_recv_buffer(&mut mem).unwrap();
        assert_eq!(channel.socket_produce(&[7; 40], false), Ok(16));
        assert_eq!(channel.try_wait_for_recv_buffer().unwrap().count, 16);
    }

    #[test]
    fn override_recv_prefix_stops_at_size() {
        let mut mem = [0u8; 64];
        let mut odd = [0u8; 64];
        let mut channel = Channel::new();
        channel.create(manual_in(64, 0), None).unwrap();
        assert_eq!(
            channel.setup_recv_prefix(&mut odd, 24).unwrap_err().error,
            Error::Config(ConfigError::BadArgument)
        );
        channel.setup_recv_prefix(&mut mem, 32).unwrap();
        assert_eq!(channel.socket_produce(&[9; 48], false), Ok(32));
        let recv = channel.try_wait_for_recv_buffer().unwrap();
        assert_eq!(recv.count, 32);
        assert_eq!(recv.data.len(), 64);
    }

    #[test]
    fn override_recv_rejects_unaligned_buffer() {
        let mut mem = [0u8; 20];
        let mut channel = Channel::new();
        channel.create(manual_in(64, 0), None).unwrap();
        let rejected = channel.setup_recv_buffer(&mut mem).unwrap_err();
        assert_eq!(rejected.error, Error::Config(ConfigError::BadArgument));
        assert_eq!(rejected.buffer.len(), 20);
        assert_eq!(channel.state(), ChannelState::Configured);
    }

    #[test]
    fn override_requires_idle_channel() {
        let mut mem = [0u8; 64];
        let channel = started(manual_out(64, 2));
        let rejected = channel.setup_send_buffer(&mut mem, 64).unwrap_err();
        assert_eq!(rejected.error, Error::Io(IoError::AlreadyStarted));
    }

    #[test]
    fn override_direction_must_have_hardware_side() {
        let mut mem = [0u8; 64];
        let mut channel = Channel::new();
        channel.create(manual_out(64, 0), None).unwrap();
        let rejected = channel.setup_recv_buffer(&mut mem).unwrap_err();
        assert_eq!(rejected.error, Error::Dma(DmaError::NotSupported));
    }

    #[test]
    fn ring_transfer_needs_buffers() {
        let mut channel = Channel::new();
        channel.create(manual_in(64, 0), None).unwrap();
        assert_eq!(channel.set_transfer(0), Err(Error::Config(ConfigError::NoBuffers)));
    }

    #[test]
    fn abort_wakes_blocked_receiver() {
        let mut mem = [0u8; 64];
        let mut channel = Channel::new();
        channel.create(manual_in(64, 0), None).unwrap();
        channel.setup_recv_buffer(&mut mem).unwrap();

        let channel = &channel;
        let result = thread::scope(|s| {
            let waiter = s.spawn(|| {
                channel
                    .wait_for_recv_buffer(WaitOption::Forever, &mut StdDelay)
                    .map(|recv| recv.count)
            });
            thread::sleep(Duration::from_millis(10));
            channel.abort().unwrap();
            waiter.join().unwrap()
        });

        assert_eq!(result, Err(Error::Io(IoError::Aborted)));
        assert_eq!(channel.take_override_buffer().map(|b| b.len()), Some(64));
    }

    #[test]
    fn reset_wakes_blocked_buffer_wait() {
        let channel = started(manual(64, 2));
        let channel = &channel;
        let result = thread::scope(|s| {
            let waiter = s.spawn(|| {
                channel
                    .get_buffer(WaitOption::Forever, &mut StdDelay)
                    .map(|b| b.index())
            });
            thread::sleep(Duration::from_millis(10));
            channel.reset().unwrap();
            waiter.join().unwrap()
        });
        assert_eq!(result, Err(Error::Io(IoError::Aborted)));
    }

    #[test]
    fn blocked_get_buffer_sees_new_data() {
        let channel = started(manual(64, 2));
        let channel = &channel;
        let count = thread::scope(|s| {
            let waiter = s.spawn(|| {
                channel
                    .get_buffer(WaitOption::Ticks(1000), &mut StdDelay)
                    .map(|b| b.count())
            });
            thread::sleep(Duration::from_millis(5));
            channel.socket_produce(&[1; 12], true).unwrap();
            waiter.join().unwrap()
        });
        assert_eq!(count, Ok(12));
    }
}
