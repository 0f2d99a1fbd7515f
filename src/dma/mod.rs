//! DMA Channels
//!
//! This module provides the buffer-ring DMA channel that moves data between a
//! producer socket and a consumer socket. All memory is statically allocated
//! using const generics.
//!
//! # Architecture
//!
//! - [`DmaChannel`]: ring state machine, CPU buffer access and override mode
//! - [`BufferPool`]: fixed-size buffers carved from an aligned memory region
//! - [`Socket`]: producer/consumer endpoint descriptors
//! - [`Buffer`]: view of a ring buffer owned by the CPU
//! - [`DmaNotify`]: notification handler, invoked outside the channel lock
//!
//! The socket side (`socket_produce`, `socket_consume`, `socket_fault`) is
//! what a USB endpoint FIFO or peripheral port drives from interrupt context.
//!
//! # Example
//!
//! ```ignore
//! use ph_usb_dma::dma::{ChannelConfig, ChannelType, DmaChannel, Socket, SocketId};
//!
//! // 4 buffers of up to 1 KiB each
//! let mut channel: DmaChannel<'_, 4, 4096> = DmaChannel::new();
//! channel.create(
//!     ChannelConfig::new(Socket::producer(SocketId::Cpu), Socket::consumer(SocketId::UsbIn(3)))
//!         .with_type(ChannelType::ManualOut)
//!         .with_buffers(1024, 4),
//!     None,
//! )?;
//! channel.set_transfer(0)?;
//!
//! let mut buffer = channel.get_buffer(WaitOption::Forever, &mut delay)?;
//! buffer.payload_mut().fill(0xAA);
//! channel.commit_buffer(buffer, 1024, BufferFlags::NONE)?;
//! ```

mod buffer;
mod channel;
mod config;
mod event;
mod hw;
mod pool;
mod ring;
mod socket;

pub use buffer::{Buffer, BufferFlags, BufferInfo, RecvBuffer};
pub use channel::{ChannelState, ChannelStatus, DmaChannel, OverrideError};
pub use config::{ChannelConfig, ChannelType, EventMask, SuspendOption, TransferMode};
pub use event::{DmaEvent, DmaNotify, FlagNotify};
pub use hw::Drained;
pub use pool::BufferPool;
pub use socket::{Socket, SocketCaps, SocketId, SocketKind};
