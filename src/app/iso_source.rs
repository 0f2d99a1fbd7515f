//! Constant-pattern isochronous source.
//!
//! Every ring buffer of a MANUAL_OUT channel is filled with one byte pattern
//! once. From then on each `ConsumedBuffer` notification immediately hands the
//! next buffer back to the consumer, untouched, so the endpoint streams the
//! pattern forever without waking any thread.

use crate::dma::{BufferFlags, DmaChannel, DmaEvent, DmaNotify};
use crate::error::Result;
use crate::sync::CriticalSectionCell;

#[derive(Clone, Copy, Default)]
struct Counters {
    commits: u32,
    misses: u32,
}

/// Pattern source driven entirely from the notification path
pub struct IsoPatternSource {
    pattern: u8,
    counters: CriticalSectionCell<Counters>,
}

impl IsoPatternSource {
    /// Source streaming `pattern`
    pub const fn new(pattern: u8) -> Self {
        Self {
            pattern,
            counters: CriticalSectionCell::new(Counters {
                commits: 0,
                misses: 0,
            }),
        }
    }

    /// Fill and commit every ring buffer. The channel must be a running
    /// MANUAL_OUT channel. Returns the number of buffers committed.
    pub fn prime<const SLOTS: usize, const BYTES: usize>(
        &self,
        channel: &DmaChannel<'_, SLOTS, BYTES>,
    ) -> Result<usize> {
        for primed in 0..channel.buffer_count() {
            let mut buffer = match channel.try_get_buffer() {
                Ok(buffer) => buffer,
                Err(_) if primed > 0 => return Ok(primed),
                Err(e) => return Err(e),
            };
            buffer.data_mut().fill(self.pattern);
            let size = buffer.size();
            channel.commit_buffer(buffer, size, BufferFlags::NONE)?;
            self.counters.with(|c| c.commits = c.commits.wrapping_add(1));
        }

        #[cfg(feature = "log")]
        log::debug!("iso: primed {} buffers", channel.buffer_count());
        Ok(channel.buffer_count())
    }

    /// Buffers committed so far, priming included
    pub fn commit_count(&self) -> u32 {
        self.counters.with_ref(|c| c.commits)
    }

    /// Consumed notifications that found no buffer to recommit
    pub fn miss_count(&self) -> u32 {
        self.counters.with_ref(|c| c.misses)
    }
}

impl<const SLOTS: usize, const BYTES: usize> DmaNotify<SLOTS, BYTES> for IsoPatternSource {
    fn notify(&self, channel: &DmaChannel<'_, SLOTS, BYTES>, event: DmaEvent) {
        if !matches!(event, DmaEvent::ConsumedBuffer(_)) {
            return;
        }
        let committed = channel.try_get_buffer().and_then(|buffer| {
            let size = buffer.size();
            channel.commit_buffer(buffer, size, BufferFlags::NONE)
        });
        self.counters.with(|c| match committed {
            Ok(()) => c.commits = c.commits.wrapping_add(1),
            Err(_) => c.misses = c.misses.wrapping_add(1),
        });
    }
}
