//! USB DMA Channel Core
//!
//! A `no_std`, `no_alloc` DMA channel layer for USB 3.0 peripheral
//! controllers, and the endpoint glue that sits on top of it.
//!
//! A channel moves data between a producer socket and a consumer socket
//! through a ring of equal-sized buffers. AUTO channels stream hardware to
//! hardware without CPU involvement; MANUAL channels hand every buffer to the
//! CPU, which may inspect, trim, or re-frame it before committing it onward.
//! Override mode bypasses the ring for one-shot transfers from or into caller
//! memory.
//!
//! # Architecture
//!
//! 1. **Channel layer** ([`dma`]): buffer pool, ring, [`DmaChannel`], events
//! 2. **Endpoint layer** ([`usb`]): [`EndpointController`] owns the channels
//!    behind a USB function's endpoints and performs stall recovery
//! 3. **Applications** ([`app`]): isochronous source, MANUAL forwarder and a
//!    Bulk-Only mass storage executor
//!
//! Blocking waits are driven by an [`embedded_hal::delay::DelayNs`]
//! implementation and a [`WaitOption`]; shared state is protected with
//! `critical-section`, so every operation is safe to call from interrupt
//! context unless it says otherwise.
//!
//! # Features
//!
//! - `defmt`: Enable defmt formatting for public types
//! - `log`: Emit diagnostics through the `log` facade
//!
//! # Example
//!
//! ```ignore
//! use ph_usb_dma::dma::{ChannelConfig, ChannelType, DmaChannel, Socket, SocketId};
//!
//! static mut CHANNEL: DmaChannel<'static, 8, 8192> = DmaChannel::new();
//!
//! let config = ChannelConfig::new(
//!     Socket::producer(SocketId::UsbOut(1)),
//!     Socket::consumer(SocketId::Cpu),
//! )
//! .with_type(ChannelType::ManualIn)
//! .with_buffers(1024, 4);
//!
//! let channel = unsafe { &mut *core::ptr::addr_of_mut!(CHANNEL) };
//! channel.create(config, None)?;
//! channel.set_transfer(0)?;
//!
//! let buffer = channel.get_buffer(WaitOption::Forever, &mut delay)?;
//! process(buffer.data());
//! channel.discard_buffer(buffer)?;
//! ```
//!
//! # Memory Requirements
//!
//! Each channel embeds its pool: `BYTES` bytes of 32-byte aligned storage plus
//! `SLOTS` ring entries. Size `BYTES` for `buffer_size * buffer_count` of the
//! largest configuration the channel will be created with.

#![no_std]
#![deny(missing_docs)]
#![allow(unsafe_code)]
#![deny(unsafe_op_in_unsafe_fn)]
// Clippy lint levels live here; thresholds and config are in Cargo.toml.
#![deny(clippy::correctness)]
#![warn(
    clippy::suspicious,
    clippy::style,
    clippy::complexity,
    clippy::perf,
    clippy::cloned_instead_of_copied,
    clippy::explicit_iter_loop,
    clippy::implicit_clone,
    clippy::inconsistent_struct_constructor,
    clippy::manual_assert,
    clippy::manual_let_else,
    clippy::match_same_arms,
    clippy::needless_pass_by_value,
    clippy::semicolon_if_nothing_returned,
    clippy::uninlined_format_args,
    clippy::unnested_or_patterns,
    clippy::std_instead_of_core,
    clippy::std_instead_of_alloc,
    clippy::alloc_instead_of_core
)]
#![allow(
    clippy::mod_module_files,
    clippy::self_named_module_files,
    clippy::similar_names,
    clippy::too_many_arguments,
    clippy::struct_excessive_bools,
    clippy::fn_params_excessive_bools,
    clippy::type_complexity,
    clippy::must_use_candidate,
    clippy::assertions_on_constants,
    clippy::cast_possible_truncation,
    clippy::cast_possible_wrap,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss,
    clippy::cast_lossless,
    clippy::panic_in_result_fn,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::module_name_repetitions,
    clippy::wildcard_imports,
    clippy::items_after_statements
)]

// =============================================================================
// Modules
// =============================================================================

pub mod app;
pub mod dma;
pub mod error;
pub mod sync;
pub mod usb;

// Internal implementation details (pub(crate) only)
mod internal;

// Test utilities (only available during testing)
#[cfg(test)]
pub mod testing;

// =============================================================================
// Re-exports
// =============================================================================

pub use dma::{ChannelConfig, ChannelState, ChannelType, DmaChannel, DmaEvent, DmaNotify};
pub use error::{
    ConfigError, ConfigResult, DmaError, DmaResult, Error, IoError, IoResult, Result, UsbError,
};
pub use sync::WaitOption;
pub use usb::{EndpointController, PipeConfig};

/// Shared constants.
///
/// Grouped into a dedicated module to keep the top-level facade focused on
/// channel and endpoint types.
pub mod constants {
    pub use crate::internal::constants::{
        // Bulk-Only Transport
        CBW_LEN,
        CSW_LEN,
        // Ring geometry
        DEFAULT_BUFFER_COUNT,
        DMA_GRANULARITY,
        ISO_BUFFER_COUNT,
        // USB packet sizes
        MAX_BURST_LEN,
        // Timing
        NAK_SETTLE_US,
        POOL_ALIGNMENT,
        WAIT_TICK_US,
    };
}
