//! Centralized Constants
//!
//! This module provides a single source of truth for all magic numbers and
//! configuration constants used throughout the DMA channel core.
//!
//! # Organization
//!
//! Constants are grouped by category:
//! - **DMA geometry**: buffer granularity, alignment, default ring depth
//! - **Timing**: wait tick and endpoint settle delays
//! - **USB packet sizes**: maximum packet size per link speed and endpoint type
//! - **Standard requests**: USB chapter 9 request and feature selectors
//! - **Bulk-Only Transport**: CBW/CSW signatures and lengths

// =============================================================================
// DMA Geometry
// =============================================================================

/// DMA buffer sizes must be a multiple of this many bytes
pub const DMA_GRANULARITY: usize = 16;

/// Alignment of the pool backing memory (cache line size)
pub const POOL_ALIGNMENT: usize = 32;

/// Default number of buffers in a streaming ring
pub const DEFAULT_BUFFER_COUNT: usize = 4;

/// Buffer count used by the isochronous pattern source
pub const ISO_BUFFER_COUNT: usize = 8;

// =============================================================================
// Timing Constants
// =============================================================================

/// Duration of one wait tick in microseconds (1 ms RTOS tick)
pub const WAIT_TICK_US: u32 = 1_000;

/// Settle time after NAKing an endpoint before its FIFO is touched
pub const NAK_SETTLE_US: u32 = 125;

// =============================================================================
// USB Packet Sizes
// =============================================================================

/// Bulk maximum packet size at full speed
pub const BULK_PACKET_FULL_SPEED: u16 = 64;

/// Bulk maximum packet size at high speed
pub const BULK_PACKET_HIGH_SPEED: u16 = 512;

/// Bulk maximum packet size at SuperSpeed
pub const BULK_PACKET_SUPER_SPEED: u16 = 1024;

/// Isochronous maximum packet size at full speed
pub const ISO_PACKET_FULL_SPEED: u16 = 1023;

/// Isochronous/interrupt maximum packet size at high and SuperSpeed
pub const ISO_PACKET_HIGH_SPEED: u16 = 1024;

/// Interrupt maximum packet size at full speed
pub const INTERRUPT_PACKET_FULL_SPEED: u16 = 64;

/// Control endpoint maximum packet size at SuperSpeed
pub const CONTROL_PACKET_SUPER_SPEED: u16 = 512;

/// Largest SuperSpeed burst length
pub const MAX_BURST_LEN: u8 = 16;

// =============================================================================
// Standard Requests (USB 3.x chapter 9)
// =============================================================================

/// CLEAR_FEATURE request code
pub const REQ_CLEAR_FEATURE: u8 = 0x01;

/// SET_FEATURE request code
pub const REQ_SET_FEATURE: u8 = 0x03;

/// SET_CONFIGURATION request code
pub const REQ_SET_CONFIGURATION: u8 = 0x09;

/// ENDPOINT_HALT feature selector (endpoint recipient)
pub const FEATURE_ENDPOINT_HALT: u16 = 0x00;

/// FUNCTION_SUSPEND feature selector (interface recipient)
pub const FEATURE_FUNCTION_SUSPEND: u16 = 0x00;

/// Setup packet length in bytes
pub const SETUP_PACKET_LEN: usize = 8;

// =============================================================================
// Bulk-Only Transport (mass storage)
// =============================================================================

/// CBW signature ("USBC", little endian)
pub const CBW_SIGNATURE: u32 = 0x4342_5355;

/// CSW signature ("USBS", little endian)
pub const CSW_SIGNATURE: u32 = 0x5342_5355;

/// CBW length in bytes
pub const CBW_LEN: usize = 31;

/// CSW length in bytes
pub const CSW_LEN: usize = 13;

/// Largest command block carried by a CBW
pub const CDB_MAX_LEN: usize = 16;

// =============================================================================
// Tests
// =============================================================================
