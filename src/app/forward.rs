//! Pass-through forwarder for MANUAL channels.
//!
//! Each produced buffer is committed to the consumer unchanged from the
//! notification path. This is the shape of a CPU-inspected loopback between
//! a USB endpoint and an on-chip port: the CPU sees every buffer but does not
//! copy it.

use crate::dma::{DmaChannel, DmaEvent, DmaNotify};
use crate::sync::CriticalSectionCell;

#[derive(Clone, Copy, Default)]
struct Counters {
    buffers: u32,
    bytes: u32,
    dropped: u32,
}

/// Forwards every produced buffer of a MANUAL channel
pub struct ManualForwarder {
    counters: CriticalSectionCell<Counters>,
}

impl ManualForwarder {
    /// Create a forwarder
    pub const fn new() -> Self {
        Self {
            counters: CriticalSectionCell::new(Counters {
                buffers: 0,
                bytes: 0,
                dropped: 0,
            }),
        }
    }

    /// Buffers forwarded
    pub fn forwarded(&self) -> u32 {
        self.counters.with_ref(|c| c.buffers)
    }

    /// Payload bytes forwarded (wrapping)
    pub fn forwarded_bytes(&self) -> u32 {
        self.counters.with_ref(|c| c.bytes)
    }

    /// Produced notifications whose buffer could not be forwarded
    pub fn dropped(&self) -> u32 {
        self.counters.with_ref(|c| c.dropped)
    }
}

impl Default for ManualForwarder {
    fn default() -> Self {
        Self::new()
    }
}

impl<const SLOTS: usize, const BYTES: usize> DmaNotify<SLOTS, BYTES> for ManualForwarder {
    fn notify(&self, channel: &DmaChannel<'_, SLOTS, BYTES>, event: DmaEvent) {
        if !matches!(event, DmaEvent::ProducedBuffer(_)) {
            return;
        }
        let forwarded = channel.try_get_buffer().and_then(|buffer| {
            let count = buffer.count();
            let flags = buffer.flags();
            channel.commit_buffer(buffer, count, flags).map(|()| count)
        });
        self.counters.with(|c| match forwarded {
            Ok(count) => {
                c.buffers = c.buffers.wrapping_add(1);
                c.bytes = c.bytes.wrapping_add(count as u32);
            }
            Err(_) => c.dropped = c.dropped.wrapping_add(1),
        });

        if let Err(_e) = forwarded {
            #[cfg(feature = "log")]
            log::warn!("forward: produced buffer dropped: {}", _e);
        }
    }
}
