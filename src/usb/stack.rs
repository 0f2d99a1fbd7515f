//! USB stack interface and endpoint types.
//!
//! The endpoint controller drives the device-side USB stack only through the
//! [`UsbStack`] trait, so any controller driver (or a mock) can sit behind it.

use crate::error::Result;
use crate::internal::constants::{
    BULK_PACKET_FULL_SPEED, BULK_PACKET_HIGH_SPEED, BULK_PACKET_SUPER_SPEED,
    CONTROL_PACKET_SUPER_SPEED, INTERRUPT_PACKET_FULL_SPEED, ISO_PACKET_FULL_SPEED,
    ISO_PACKET_HIGH_SPEED, MAX_BURST_LEN,
};

// =============================================================================
// Link Speed
// =============================================================================

/// Negotiated bus speed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LinkSpeed {
    /// USB 1.1 full speed (12 Mbit/s)
    #[default]
    Full,
    /// USB 2.0 high speed (480 Mbit/s)
    High,
    /// USB 3.x SuperSpeed (5 Gbit/s)
    Super,
}

impl LinkSpeed {
    /// Whether bursts apply at this speed
    #[must_use]
    pub const fn supports_burst(self) -> bool {
        matches!(self, LinkSpeed::Super)
    }
}

// =============================================================================
// Endpoint Address
// =============================================================================

/// Endpoint address as it appears in descriptors: bit 7 set for IN endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct EndpointAddress(u8);

impl EndpointAddress {
    const DIR_IN: u8 = 0x80;

    /// Wrap a raw address byte
    #[must_use]
    pub const fn from_raw(raw: u8) -> Self {
        Self(raw & (Self::DIR_IN | 0x0F))
    }

    /// IN (device to host) endpoint `number`
    #[must_use]
    pub const fn in_ep(number: u8) -> Self {
        Self(Self::DIR_IN | (number & 0x0F))
    }

    /// OUT (host to device) endpoint `number`
    #[must_use]
    pub const fn out_ep(number: u8) -> Self {
        Self(number & 0x0F)
    }

    /// Endpoint number (0-15)
    #[must_use]
    pub const fn number(self) -> u8 {
        self.0 & 0x0F
    }

    /// Whether this is an IN endpoint
    #[must_use]
    pub const fn is_in(self) -> bool {
        self.0 & Self::DIR_IN != 0
    }

    /// Raw address byte
    #[must_use]
    pub const fn raw(self) -> u8 {
        self.0
    }

    /// Bit of this endpoint in a 32-bit per-endpoint mask (OUT in the low
    /// half, IN in the high half).
    #[must_use]
    pub(crate) const fn mask_bit(self) -> u32 {
        let shift = self.number() as u32 + if self.is_in() { 16 } else { 0 };
        1 << shift
    }

    /// Inverse of [`Self::mask_bit`] for bit `bit`.
    pub(crate) const fn from_mask_bit(bit: u32) -> Self {
        if bit >= 16 {
            Self::in_ep((bit - 16) as u8)
        } else {
            Self::out_ep(bit as u8)
        }
    }
}

/// Control endpoint 0 (either direction)
pub const EP0: EndpointAddress = EndpointAddress::out_ep(0);

// =============================================================================
// Endpoint Configuration
// =============================================================================

/// Endpoint transfer type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum EndpointType {
    /// Control
    Control,
    /// Isochronous
    Isochronous,
    /// Bulk
    Bulk,
    /// Interrupt
    Interrupt,
}

impl EndpointType {
    /// Largest packet size this endpoint type may use at `speed`
    #[must_use]
    pub const fn max_packet_size(self, speed: LinkSpeed) -> u16 {
        match (self, speed) {
            (EndpointType::Control, LinkSpeed::Super) => CONTROL_PACKET_SUPER_SPEED,
            (EndpointType::Control, _) => INTERRUPT_PACKET_FULL_SPEED,
            (EndpointType::Bulk, LinkSpeed::Full) => BULK_PACKET_FULL_SPEED,
            (EndpointType::Bulk, LinkSpeed::High) => BULK_PACKET_HIGH_SPEED,
            (EndpointType::Bulk, LinkSpeed::Super) => BULK_PACKET_SUPER_SPEED,
            (EndpointType::Isochronous, LinkSpeed::Full) => ISO_PACKET_FULL_SPEED,
            (EndpointType::Interrupt, LinkSpeed::Full) => INTERRUPT_PACKET_FULL_SPEED,
            (EndpointType::Isochronous | EndpointType::Interrupt, _) => ISO_PACKET_HIGH_SPEED,
        }
    }
}

/// Endpoint configuration handed to the USB stack
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct EndpointConfig {
    /// Transfer type
    pub ep_type: EndpointType,
    /// Maximum packet size in bytes
    pub packet_size: u16,
    /// SuperSpeed burst length (1-16)
    pub burst_len: u8,
    /// SuperSpeed bulk streams (0 = none)
    pub streams: u8,
    /// Isochronous packets per service interval (1-3)
    pub iso_mult: u8,
}

impl EndpointConfig {
    /// Single-packet endpoint of `ep_type`
    #[must_use]
    pub const fn new(ep_type: EndpointType, packet_size: u16) -> Self {
        Self {
            ep_type,
            packet_size,
            burst_len: 1,
            streams: 0,
            iso_mult: 1,
        }
    }

    /// Set the burst length, clamped to 1-16
    #[must_use]
    pub const fn with_burst(mut self, burst_len: u8) -> Self {
        self.burst_len = if burst_len == 0 {
            1
        } else if burst_len > MAX_BURST_LEN {
            MAX_BURST_LEN
        } else {
            burst_len
        };
        self
    }

    /// Set the number of bulk streams
    #[must_use]
    pub const fn with_streams(mut self, streams: u8) -> Self {
        self.streams = streams;
        self
    }

    /// Set the isochronous multiplier
    #[must_use]
    pub const fn with_iso_mult(mut self, iso_mult: u8) -> Self {
        self.iso_mult = iso_mult;
        self
    }
}

// =============================================================================
// Bus Events
// =============================================================================

/// Bus-level events reported by the USB stack
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum UsbEvent {
    /// Host selected a configuration; zero deconfigures the device
    SetConfiguration(u8),
    /// Bus reset
    Reset,
    /// Cable disconnected
    Disconnect,
    /// Cable connected
    Connect,
    /// Bus suspended
    Suspend,
    /// Bus resumed
    Resume,
}

// =============================================================================
// USB Stack Trait
// =============================================================================

/// Device-side USB stack operations used by the endpoint controller.
///
/// Implementations map errors to [`crate::UsbError::StackFailure`] (or a
/// more specific error) and must be callable from thread context.
pub trait UsbStack {
    /// Speed negotiated with the host
    fn link_speed(&self) -> LinkSpeed;

    /// Enable `ep` with `config`
    fn configure_endpoint(&mut self, ep: EndpointAddress, config: &EndpointConfig) -> Result<()>;

    /// Disable `ep`
    fn disable_endpoint(&mut self, ep: EndpointAddress) -> Result<()>;

    /// NAK (or stop NAKing) every host request to `ep`
    fn set_endpoint_nak(&mut self, ep: EndpointAddress, nak: bool) -> Result<()>;

    /// Drop whatever sits in the endpoint FIFO
    fn flush_endpoint_fifo(&mut self, ep: EndpointAddress) -> Result<()>;

    /// Reset the endpoint's sequence state
    fn reset_endpoint(&mut self, ep: EndpointAddress) -> Result<()>;

    /// Set or clear the endpoint stall, optionally resetting the data toggle
    /// (sequence number)
    fn stall_endpoint(&mut self, ep: EndpointAddress, stall: bool, clear_toggle: bool) -> Result<()>;

    /// Complete the status stage of the current control request
    fn ack_setup_status(&mut self) -> Result<()>;
}
