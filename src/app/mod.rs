//! Endpoint Applications
//!
//! Data-path clients built on [`DmaChannel`](crate::dma::DmaChannel):
//!
//! - [`IsoPatternSource`]: isochronous IN source that recommits buffers from
//!   the consumed notification
//! - [`ManualForwarder`]: MANUAL pass-through from a USB endpoint to an
//!   on-chip port
//! - [`MscExecutor`]: USB mass storage (Bulk-Only Transport) over two
//!   override-mode pipes
//!
//! The first two run entirely from channel notifications. The mass storage
//! executor is stepped from a worker thread.

mod forward;
mod iso_source;
mod msc;

pub use forward::ManualForwarder;
pub use iso_source::IsoPatternSource;
pub use msc::{BlockDevice, CommandBlock, CswStatus, MscExecutor, MscPhase, MscStall, MscStep, Sense};
