//! Synchronization and Concurrency Support
//!
//! The channel core runs in two kinds of context: application threads, which
//! may block with a timeout, and the notification path (DMA and USB
//! interrupts), which must never block. This module holds the primitives
//! shared by both:
//!
//! - [`CriticalSectionCell`] - ISR-safe interior mutability
//! - [`EventFlags`] - non-blocking "post a flag, let the thread act" deferral
//! - [`WaitOption`] - poll / forever / bounded-tick waits
//!
//! # Example
//!
//! ```ignore
//! use ph_usb_dma::sync::{EventFlags, WaitOption};
//!
//! static EVENTS: EventFlags = EventFlags::new();
//! const CBW_EVENT: u32 = 1 << 0;
//!
//! // Notification context: never blocks
//! EVENTS.set(CBW_EVENT);
//!
//! // Worker thread
//! let hit = EVENTS.wait_any(CBW_EVENT, WaitOption::Forever, &mut delay)?;
//! ```

mod primitives;

pub use primitives::{CriticalSectionCell, EventFlags, WaitOption};
pub(crate) use primitives::{Poll, block_on};
