//! Control mailbox between the USB callback path and the worker thread.
//!
//! USB event and setup callbacks run in interrupt-like context and must not
//! touch endpoints or channels themselves. They record what happened here and
//! return; the worker drains the mailbox with
//! [`EndpointController::service`](super::EndpointController::service).
//!
//! Pending work is coalesced: a stop cancels a start that has not been
//! serviced yet, while a start posted after a stop keeps the stop, so the
//! worker tears down before bringing the pipes back up.

use super::setup::{ControlRequest, SetupPacket};
use super::stack::{EndpointAddress, UsbEvent};
use crate::error::IoResult;
use crate::sync::{CriticalSectionCell, EventFlags, Poll, WaitOption, block_on};
use embedded_hal::delay::DelayNs;

/// Request bits posted to the worker
pub(crate) const START: u32 = 1 << 0;
pub(crate) const STOP: u32 = 1 << 1;
pub(crate) const HALT: u32 = 1 << 2;
pub(crate) const FUNC_SUSPEND: u32 = 1 << 3;
pub(crate) const ALL: u32 = START | STOP | HALT | FUNC_SUSPEND;

struct Payload {
    configuration: u8,
    halted: u32,
    suspend_set: bool,
}

/// Work taken from the mailbox in one go
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) struct Pending {
    pub(crate) bits: u32,
    pub(crate) configuration: u8,
    pub(crate) halted: u32,
    pub(crate) suspend_set: bool,
}

/// ISR-to-thread mailbox for USB control work.
pub struct ControlMailbox {
    flags: EventFlags,
    payload: CriticalSectionCell<Payload>,
}

impl ControlMailbox {
    /// Create an empty mailbox (const, suitable for static storage).
    pub const fn new() -> Self {
        Self {
            flags: EventFlags::new(),
            payload: CriticalSectionCell::new(Payload {
                configuration: 0,
                halted: 0,
                suspend_set: false,
            }),
        }
    }

    /// Record a bus event. Never blocks.
    pub fn on_bus_event(&self, event: UsbEvent) {
        match event {
            UsbEvent::SetConfiguration(value) if value != 0 => {
                self.payload.with(|p| p.configuration = value);
                self.flags.set(START);
            }
            UsbEvent::SetConfiguration(_) | UsbEvent::Reset | UsbEvent::Disconnect => {
                self.flags.take(START);
                self.flags.set(STOP);
            }
            UsbEvent::Connect | UsbEvent::Suspend | UsbEvent::Resume => {}
        }

        #[cfg(feature = "defmt")]
        defmt::trace!("usb: bus event {:?}", event);
    }

    /// Inspect a setup packet. Returns `true` when the request was taken over;
    /// its status stage is then completed by the worker.
    pub fn on_setup_request(&self, request: &[u8]) -> bool {
        let Some(packet) = SetupPacket::parse(request) else {
            return false;
        };
        match packet.decode() {
            ControlRequest::ClearEndpointHalt(ep) if ep.number() != 0 => {
                self.payload.with(|p| p.halted |= ep.mask_bit());
                self.flags.set(HALT);
                true
            }
            ControlRequest::FunctionSuspend { set, .. } => {
                self.payload.with(|p| p.suspend_set = set);
                self.flags.set(FUNC_SUSPEND);
                true
            }
            _ => false,
        }
    }

    /// Whether any work is waiting
    pub fn has_pending(&self) -> bool {
        self.flags.peek() & ALL != 0
    }

    /// Wait until work is posted, without consuming it.
    pub fn wait<D: DelayNs>(&self, wait: WaitOption, delay: &mut D) -> IoResult<()> {
        block_on(wait, delay, || {
            if self.has_pending() {
                Poll::Ready(())
            } else {
                Poll::Pending
            }
        })
    }

    /// Take everything posted so far.
    pub(crate) fn take(&self) -> Pending {
        let bits = self.flags.take(ALL);
        self.payload.with(|p| {
            let pending = Pending {
                bits,
                configuration: p.configuration,
                halted: if bits & HALT != 0 { p.halted } else { 0 },
                suspend_set: p.suspend_set,
            };
            if bits & HALT != 0 {
                p.halted = 0;
            }
            pending
        })
    }
}

impl Default for ControlMailbox {
    fn default() -> Self {
        Self::new()
    }
}

impl Pending {
    /// Halted endpoints, lowest mask bit first
    pub(crate) fn halted_endpoints(&self) -> impl Iterator<Item = EndpointAddress> + '_ {
        (0..32u32)
            .filter(move |bit| self.halted & (1 << bit) != 0)
            .map(EndpointAddress::from_mask_bit)
    }
}
