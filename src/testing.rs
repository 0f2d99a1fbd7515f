//! Testing utilities and mock implementations
//!
//! This module provides mock implementations for testing the channel core
//! and the endpoint controller on the host without a USB controller.
//!
//! Only available when running `cargo test`.

// Note: The #[cfg(test)] attribute is applied in lib.rs where this module is declared
#![allow(missing_docs)]
#![allow(clippy::std_instead_of_core, clippy::std_instead_of_alloc)]

extern crate std;

use core::cell::RefCell;
use std::collections::HashSet;
use std::sync::Mutex;
use std::vec;
use std::vec::Vec;

use crate::app::BlockDevice;
use crate::dma::{DmaChannel, DmaEvent, DmaNotify};
use crate::error::{Result, UsbError};
use crate::usb::{EndpointAddress, EndpointConfig, LinkSpeed, UsbStack};

// =============================================================================
// Mock USB Stack
// =============================================================================

/// One call made on [`MockUsbStack`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StackCall {
    Configure(EndpointAddress, EndpointConfig),
    Disable(EndpointAddress),
    Nak(EndpointAddress, bool),
    Flush(EndpointAddress),
    ResetEp(EndpointAddress),
    Stall(EndpointAddress, bool, bool),
    AckStatus,
}

/// Mock USB stack recording every call in order
///
/// # Example
///
/// ```ignore
/// let mut usb = MockUsbStack::new(LinkSpeed::High);
/// usb.fail_configure(EndpointAddress::in_ep(1));
/// ```
#[derive(Debug, Default)]
pub struct MockUsbStack {
    speed: LinkSpeed,
    calls: Vec<StackCall>,
    failing: HashSet<EndpointAddress>,
    failing_flush: HashSet<EndpointAddress>,
}

impl MockUsbStack {
    /// Create a mock stack that negotiated `speed`
    pub fn new(speed: LinkSpeed) -> Self {
        Self {
            speed,
            ..Self::default()
        }
    }

    /// Calls made so far
    pub fn calls(&self) -> Vec<StackCall> {
        self.calls.clone()
    }

    /// Forget recorded calls
    pub fn clear_calls(&mut self) {
        self.calls.clear();
    }

    /// Make `configure_endpoint` fail for `ep`
    pub fn fail_configure(&mut self, ep: EndpointAddress) {
        self.failing.insert(ep);
    }

    /// Make `flush_endpoint_fifo` fail for `ep`
    pub fn fail_flush(&mut self, ep: EndpointAddress) {
        self.failing_flush.insert(ep);
    }

    /// Whether `ep` is currently stalled according to the recorded calls
    pub fn is_stalled(&self, ep: EndpointAddress) -> bool {
        self.calls
            .iter()
            .rev()
            .find_map(|call| match *call {
                StackCall::Stall(e, stall, _) if e == ep => Some(stall),
                _ => None,
            })
            .unwrap_or(false)
    }
}

impl UsbStack for MockUsbStack {
    fn link_speed(&self) -> LinkSpeed {
        self.speed
    }

    fn configure_endpoint(&mut self, ep: EndpointAddress, config: &EndpointConfig) -> Result<()> {
        if self.failing.contains(&ep) {
            return Err(UsbError::StackFailure.into());
        }
        self.calls.push(StackCall::Configure(ep, *config));
        Ok(())
    }

    fn disable_endpoint(&mut self, ep: EndpointAddress) -> Result<()> {
        self.calls.push(StackCall::Disable(ep));
        Ok(())
    }

    fn set_endpoint_nak(&mut self, ep: EndpointAddress, nak: bool) -> Result<()> {
        self.calls.push(StackCall::Nak(ep, nak));
        Ok(())
    }

    fn flush_endpoint_fifo(&mut self, ep: EndpointAddress) -> Result<()> {
        if self.failing_flush.contains(&ep) {
            return Err(UsbError::StackFailure.into());
        }
        self.calls.push(StackCall::Flush(ep));
        Ok(())
    }

    fn reset_endpoint(&mut self, ep: EndpointAddress) -> Result<()> {
        self.calls.push(StackCall::ResetEp(ep));
        Ok(())
    }

    fn stall_endpoint(&mut self, ep: EndpointAddress, stall: bool, clear_toggle: bool) -> Result<()> {
        self.calls.push(StackCall::Stall(ep, stall, clear_toggle));
        Ok(())
    }

    fn ack_setup_status(&mut self) -> Result<()> {
        self.calls.push(StackCall::AckStatus);
        Ok(())
    }
}

// =============================================================================
// Delays
// =============================================================================

/// Mock delay for testing without actual timing
///
/// Records delays for verification without actually waiting.
#[derive(Debug, Default)]
pub struct MockDelay {
    /// Total nanoseconds delayed
    total_ns: RefCell<u64>,
}

impl MockDelay {
    /// Create a new mock delay
    pub fn new() -> Self {
        Self::default()
    }

    /// Get total nanoseconds that were "delayed"
    pub fn total_ns(&self) -> u64 {
        *self.total_ns.borrow()
    }

    /// Get total milliseconds that were "delayed"
    pub fn total_ms(&self) -> u64 {
        self.total_ns() / 1_000_000
    }

    /// Reset the delay counter
    pub fn reset(&self) {
        *self.total_ns.borrow_mut() = 0;
    }
}

impl embedded_hal::delay::DelayNs for MockDelay {
    fn delay_ns(&mut self, ns: u32) {
        *self.total_ns.borrow_mut() += ns as u64;
    }
}

/// Delay that really sleeps, for tests where another thread has to make
/// progress while a wait is blocked
#[derive(Debug, Default, Clone, Copy)]
pub struct StdDelay;

impl embedded_hal::delay::DelayNs for StdDelay {
    fn delay_ns(&mut self, ns: u32) {
        std::thread::sleep(std::time::Duration::from_nanos(u64::from(ns)));
    }
}

// =============================================================================
// Recording Notify
// =============================================================================

/// Notification handler that keeps every event it receives
#[derive(Debug, Default)]
pub struct RecordingNotify {
    events: Mutex<Vec<DmaEvent>>,
}

impl RecordingNotify {
    pub fn new() -> Self {
        Self::default()
    }

    /// Events received so far, oldest first
    pub fn events(&self) -> Vec<DmaEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    pub fn clear(&self) {
        if let Ok(mut events) = self.events.lock() {
            events.clear();
        }
    }
}

impl<const SLOTS: usize, const BYTES: usize> DmaNotify<SLOTS, BYTES> for RecordingNotify {
    fn notify(&self, _channel: &DmaChannel<'_, SLOTS, BYTES>, event: DmaEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

// =============================================================================
// RAM Disk
// =============================================================================

/// Block device backed by host memory
#[derive(Debug)]
pub struct RamDisk {
    block_size: u32,
    data: Vec<u8>,
    ready: bool,
    fail_io: bool,
}

impl RamDisk {
    /// Zero-filled disk of `blocks` blocks of `block_size` bytes
    pub fn new(block_size: u32, blocks: u32) -> Self {
        Self {
            block_size,
            data: vec![0; (block_size * blocks) as usize],
            ready: true,
            fail_io: false,
        }
    }

    pub fn set_ready(&mut self, ready: bool) {
        self.ready = ready;
    }

    /// Make every read and write fail
    pub fn set_fail_io(&mut self, fail: bool) {
        self.fail_io = fail;
    }

    /// Contents of block `lba`
    pub fn block(&self, lba: u32) -> &[u8] {
        let bs = self.block_size as usize;
        let start = lba as usize * bs;
        &self.data[start..start + bs]
    }

    /// Fill block `lba` with `byte`
    pub fn fill_block(&mut self, lba: u32, byte: u8) {
        let bs = self.block_size as usize;
        let start = lba as usize * bs;
        self.data[start..start + bs].fill(byte);
    }

    fn span(&self, lba: u32, len: usize) -> Result<core::ops::Range<usize>> {
        let start = lba as usize * self.block_size as usize;
        if self.fail_io || start + len > self.data.len() {
            return Err(UsbError::Storage.into());
        }
        Ok(start..start + len)
    }
}

impl BlockDevice for RamDisk {
    fn block_size(&self) -> u32 {
        self.block_size
    }

    fn block_count(&self) -> u32 {
        self.data.len() as u32 / self.block_size
    }

    fn is_ready(&self) -> bool {
        self.ready
    }

    fn read_blocks(&mut self, lba: u32, buf: &mut [u8]) -> Result<()> {
        let range = self.span(lba, buf.len())?;
        buf.copy_from_slice(&self.data[range]);
        Ok(())
    }

    fn write_blocks(&mut self, lba: u32, buf: &[u8]) -> Result<()> {
        let range = self.span(lba, buf.len())?;
        self.data[range].copy_from_slice(buf);
        Ok(())
    }
}
