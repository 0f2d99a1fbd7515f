//! Buffer views handed to the CPU.
//!
//! A [`Buffer`] is a token for one ring buffer currently owned by the CPU. It
//! borrows the channel, so it cannot outlive the channel configuration, and it
//! is consumed by [`DmaChannel::commit_buffer`] or
//! [`DmaChannel::discard_buffer`]. Dropping it without either discards it.
//!
//! The view splits the buffer into three regions:
//!
//! ```text
//! |<- prod_header ->|<------ payload ------>|<- prod_footer ->|
//! 0                 header            header + count
//! ```
//!
//! so protocol framing can be written in place around produced data.

use super::channel::DmaChannel;

/// Per-buffer status flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BufferFlags(u8);

impl BufferFlags {
    /// No flags
    pub const NONE: Self = Self(0);
    /// Buffer ends a packet (short or exact-size terminated transfer)
    pub const EOP: Self = Self(1 << 0);
    /// Producer flagged the data as corrupt
    pub const ERROR: Self = Self(1 << 1);

    /// Union of two flag sets
    #[must_use]
    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    /// Whether all bits of `other` are set
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Whether the EOP flag is set
    #[must_use]
    pub const fn is_eop(self) -> bool {
        self.contains(Self::EOP)
    }
}

impl core::ops::BitOr for BufferFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        self.union(rhs)
    }
}

/// Descriptor of a buffer carried by produce/consume notifications
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BufferInfo {
    /// Ring index of the buffer
    pub index: usize,
    /// Valid bytes (payload for produce events, total for consume events)
    pub count: usize,
    /// Buffer capacity in bytes
    pub size: usize,
    /// Status flags
    pub flags: BufferFlags,
}

/// A ring buffer owned by the CPU.
pub struct Buffer<'c, 'a, const SLOTS: usize, const BYTES: usize> {
    channel: &'c DmaChannel<'a, SLOTS, BYTES>,
    data: &'c mut [u8],
    index: usize,
    epoch: u32,
    count: usize,
    header: usize,
    footer: usize,
    flags: BufferFlags,
    released: bool,
}

impl<'c, 'a, const SLOTS: usize, const BYTES: usize> Buffer<'c, 'a, SLOTS, BYTES> {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        channel: &'c DmaChannel<'a, SLOTS, BYTES>,
        data: &'c mut [u8],
        index: usize,
        epoch: u32,
        count: usize,
        header: usize,
        footer: usize,
        flags: BufferFlags,
    ) -> Self {
        Self {
            channel,
            data,
            index,
            epoch,
            count,
            header,
            footer,
            flags,
            released: false,
        }
    }

    /// Ring index of this buffer
    #[inline(always)]
    pub fn index(&self) -> usize {
        self.index
    }

    /// Payload bytes written by the producer (zero for MANUAL_OUT buffers)
    #[inline(always)]
    pub fn count(&self) -> usize {
        self.count
    }

    /// Whole buffer capacity in bytes
    #[inline(always)]
    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// Status flags set by the producer
    #[inline(always)]
    pub fn flags(&self) -> BufferFlags {
        self.flags
    }

    /// Whether the producer ended a packet in this buffer
    #[inline(always)]
    pub fn is_eop(&self) -> bool {
        self.flags.is_eop()
    }

    /// Whole buffer, header and footer included
    pub fn data(&self) -> &[u8] {
        self.data
    }

    /// Whole buffer, mutable
    pub fn data_mut(&mut self) -> &mut [u8] {
        self.data
    }

    /// Reserved header region in front of the payload
    pub fn header_mut(&mut self) -> &mut [u8] {
        &mut self.data[..self.header]
    }

    /// Produced payload
    pub fn payload(&self) -> &[u8] {
        &self.data[self.header..self.header + self.count]
    }

    /// Whole payload region, for CPU producers filling the buffer
    pub fn payload_mut(&mut self) -> &mut [u8] {
        let end = self.data.len() - self.footer;
        &mut self.data[self.header..end]
    }

    /// Footer region directly after the produced payload
    pub fn footer_mut(&mut self) -> &mut [u8] {
        let start = self.header + self.count;
        &mut self.data[start..start + self.footer]
    }

    /// Bytes spanned by header, payload and footer; the natural commit count
    /// for a framed buffer forwarded in place.
    pub fn framed_len(&self) -> usize {
        self.header + self.count + self.footer
    }

    /// Mark the token consumed and return its identity.
    pub(crate) fn into_parts(mut self) -> (usize, u32) {
        self.released = true;
        (self.index, self.epoch)
    }
}

impl<const SLOTS: usize, const BYTES: usize> Drop for Buffer<'_, '_, SLOTS, BYTES> {
    fn drop(&mut self) {
        if !self.released {
            self.channel.release_dropped(self.index);
        }
    }
}

impl<const SLOTS: usize, const BYTES: usize> core::fmt::Debug for Buffer<'_, '_, SLOTS, BYTES> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Buffer")
            .field("index", &self.index)
            .field("count", &self.count)
            .field("size", &self.data.len())
            .field("flags", &self.flags)
            .finish()
    }
}

/// Caller memory returned by a completed override receive
#[derive(Debug)]
pub struct RecvBuffer<'a> {
    /// The lent buffer, handed back
    pub data: &'a mut [u8],
    /// Bytes received into `data`
    pub count: usize,
}

impl RecvBuffer<'_> {
    /// Received bytes
    pub fn received(&self) -> &[u8] {
        &self.data[..self.count]
    }
}
