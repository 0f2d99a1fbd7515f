//! Setup packet parsing.
//!
//! Only the standard requests that touch DMA-backed endpoints are decoded:
//! endpoint halt clearing and interface function suspend. Everything else
//! belongs to the USB stack's own request handling.

use super::stack::EndpointAddress;
use crate::internal::constants::{
    FEATURE_ENDPOINT_HALT, FEATURE_FUNCTION_SUSPEND, REQ_CLEAR_FEATURE, REQ_SET_CONFIGURATION,
    REQ_SET_FEATURE, SETUP_PACKET_LEN,
};

/// Request recipient (bmRequestType bits 4:0)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Recipient {
    /// Device
    Device,
    /// Interface
    Interface,
    /// Endpoint
    Endpoint,
    /// Other or reserved
    Other,
}

/// Parsed 8-byte setup packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SetupPacket {
    /// bmRequestType
    pub request_type: u8,
    /// bRequest
    pub request: u8,
    /// wValue
    pub value: u16,
    /// wIndex
    pub index: u16,
    /// wLength
    pub length: u16,
}

/// Requests the endpoint controller acts on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ControlRequest {
    /// CLEAR_FEATURE(ENDPOINT_HALT) on an endpoint
    ClearEndpointHalt(EndpointAddress),
    /// SET_FEATURE/CLEAR_FEATURE(FUNCTION_SUSPEND) on an interface
    FunctionSuspend {
        /// Interface number
        interface: u8,
        /// SET_FEATURE rather than CLEAR_FEATURE
        set: bool,
    },
    /// SET_CONFIGURATION, normally reported as a bus event
    SetConfiguration(u8),
    /// Not ours
    Other,
}

impl SetupPacket {
    /// Parse a little-endian setup packet; `None` if `bytes` is short.
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        let raw: &[u8; SETUP_PACKET_LEN] = bytes.get(..SETUP_PACKET_LEN)?.try_into().ok()?;
        Some(Self {
            request_type: raw[0],
            request: raw[1],
            value: u16::from_le_bytes([raw[2], raw[3]]),
            index: u16::from_le_bytes([raw[4], raw[5]]),
            length: u16::from_le_bytes([raw[6], raw[7]]),
        })
    }

    /// Request recipient
    #[must_use]
    pub const fn recipient(&self) -> Recipient {
        match self.request_type & 0x1F {
            0 => Recipient::Device,
            1 => Recipient::Interface,
            2 => Recipient::Endpoint,
            _ => Recipient::Other,
        }
    }

    /// Whether this is a standard (chapter 9) request
    #[must_use]
    pub const fn is_standard(&self) -> bool {
        (self.request_type >> 5) & 0x03 == 0
    }

    /// Classify the request
    #[must_use]
    pub fn decode(&self) -> ControlRequest {
        if !self.is_standard() {
            return ControlRequest::Other;
        }
        match (self.recipient(), self.request) {
            (Recipient::Endpoint, REQ_CLEAR_FEATURE) if self.value == FEATURE_ENDPOINT_HALT => {
                ControlRequest::ClearEndpointHalt(EndpointAddress::from_raw(self.index as u8))
            }
            (Recipient::Interface, REQ_SET_FEATURE | REQ_CLEAR_FEATURE)
                if self.value == FEATURE_FUNCTION_SUSPEND =>
            {
                ControlRequest::FunctionSuspend {
                    interface: self.index as u8,
                    set: self.request == REQ_SET_FEATURE,
                }
            }
            (Recipient::Device, REQ_SET_CONFIGURATION) => {
                ControlRequest::SetConfiguration(self.value as u8)
            }
            _ => ControlRequest::Other,
        }
    }
}
