//! USB Endpoint Control
//!
//! Glue between a device-side USB stack and the DMA channels behind its
//! endpoints.
//!
//! # Architecture
//!
//! - [`UsbStack`]: what the controller needs from the USB stack
//! - [`EndpointController`]: owns one channel per pipe and the active flag
//! - [`ControlMailbox`]: callback-side mailbox; callbacks post, the worker
//!   thread services
//! - [`SetupPacket`]: decoder for the standard requests handled here
//!
//! # Example
//!
//! ```ignore
//! static MAILBOX: ControlMailbox = ControlMailbox::new();
//!
//! // USB callbacks (interrupt context)
//! fn on_event(event: UsbEvent) { MAILBOX.on_bus_event(event) }
//! fn on_setup(bytes: &[u8]) -> bool { MAILBOX.on_setup_request(bytes) }
//!
//! // Worker thread
//! let mut ctrl: EndpointController<'_, _, 1, 8, 8192> = EndpointController::new(
//!     stack,
//!     [PipeConfig::new(EndpointAddress::in_ep(3), EndpointType::Isochronous, SocketId::Cpu)
//!         .with_channel_type(ChannelType::ManualOut)],
//! );
//! loop {
//!     MAILBOX.wait(WaitOption::Forever, &mut delay)?;
//!     ctrl.service(&MAILBOX, &mut delay)?;
//! }
//! ```

mod controller;
mod mailbox;
mod setup;
mod stack;

pub use controller::{EndpointController, PipeConfig, ServiceOutcome};
pub use mailbox::ControlMailbox;
pub use setup::{ControlRequest, Recipient, SetupPacket};
pub use stack::{EP0, EndpointAddress, EndpointConfig, EndpointType, LinkSpeed, UsbEvent, UsbStack};
