//! Endpoint controller.
//!
//! Owns one DMA channel per logical pipe and keeps them in step with the USB
//! device state: pipes come up on SET_CONFIGURATION, go down on reset,
//! disconnect or deconfiguration, and are recovered in place when the host
//! clears an endpoint halt.

use embedded_hal::delay::DelayNs;

use super::mailbox::{ControlMailbox, FUNC_SUSPEND, HALT, START, STOP};
use super::stack::{EP0, EndpointAddress, EndpointConfig, EndpointType, LinkSpeed, UsbEvent, UsbStack};
use crate::dma::{
    ChannelConfig, ChannelType, DmaChannel, DmaNotify, EventMask, Socket, SocketId, TransferMode,
};
use crate::error::{ConfigError, Error, IoError, Result, UsbError};
use crate::internal::constants::{DEFAULT_BUFFER_COUNT, DMA_GRANULARITY, NAK_SETTLE_US};

// =============================================================================
// Pipe Configuration
// =============================================================================

/// One USB endpoint wired to an on-chip socket through a DMA channel.
///
/// IN endpoints consume from `peer`; OUT endpoints produce into it. Use
/// [`SocketId::Cpu`] as the peer with a MANUAL_OUT / MANUAL_IN channel type
/// when the CPU feeds or drains the endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PipeConfig {
    /// USB endpoint
    pub endpoint: EndpointAddress,
    /// Endpoint transfer type
    pub ep_type: EndpointType,
    /// DMA channel type
    pub channel_type: ChannelType,
    /// Socket on the other side of the channel
    pub peer: SocketId,
    /// Ring buffers
    pub buffer_count: usize,
    /// Requested SuperSpeed burst length
    pub burst_len: u8,
    /// Notifications for the channel
    pub notification: EventMask,
    /// Accounting mode for the channel
    pub mode: TransferMode,
    /// Start an infinite transfer whenever the pipe comes up or recovers
    pub streaming: bool,
}

impl PipeConfig {
    /// AUTO streaming pipe between `endpoint` and `peer`
    #[must_use]
    pub const fn new(endpoint: EndpointAddress, ep_type: EndpointType, peer: SocketId) -> Self {
        Self {
            endpoint,
            ep_type,
            channel_type: ChannelType::Auto,
            peer,
            buffer_count: DEFAULT_BUFFER_COUNT,
            burst_len: 1,
            notification: EventMask::NONE,
            mode: TransferMode::Byte,
            streaming: true,
        }
    }

    /// Set the channel type
    #[must_use]
    pub const fn with_channel_type(mut self, channel_type: ChannelType) -> Self {
        self.channel_type = channel_type;
        self
    }

    /// Set the ring depth
    #[must_use]
    pub const fn with_buffer_count(mut self, count: usize) -> Self {
        self.buffer_count = count;
        self
    }

    /// Set the SuperSpeed burst length
    #[must_use]
    pub const fn with_burst(mut self, burst_len: u8) -> Self {
        self.burst_len = burst_len;
        self
    }

    /// Set the notification mask
    #[must_use]
    pub const fn with_notification(mut self, mask: EventMask) -> Self {
        self.notification = mask;
        self
    }

    /// Set the accounting mode
    #[must_use]
    pub const fn with_mode(mut self, mode: TransferMode) -> Self {
        self.mode = mode;
        self
    }

    /// Choose whether the controller starts a transfer on the pipe.
    ///
    /// Pipes driven through override sends and receives leave this off.
    #[must_use]
    pub const fn with_streaming(mut self, streaming: bool) -> Self {
        self.streaming = streaming;
        self
    }

    /// Endpoint configuration for `speed`
    #[must_use]
    pub const fn endpoint_config(&self, speed: LinkSpeed) -> EndpointConfig {
        let burst = if speed.supports_burst() { self.burst_len } else { 1 };
        EndpointConfig::new(self.ep_type, self.ep_type.max_packet_size(speed)).with_burst(burst)
    }

    /// Channel configuration for `speed`: one buffer holds one burst.
    #[must_use]
    pub const fn channel_config(&self, speed: LinkSpeed) -> ChannelConfig {
        let ep = self.endpoint_config(speed);
        let raw = ep.packet_size as usize * ep.burst_len as usize;
        let size = raw.div_ceil(DMA_GRANULARITY) * DMA_GRANULARITY;

        let n = self.endpoint.number();
        let (producer, consumer) = if self.endpoint.is_in() {
            (Socket::producer(self.peer), Socket::consumer(SocketId::UsbIn(n)))
        } else {
            (Socket::producer(SocketId::UsbOut(n)), Socket::consumer(self.peer))
        };
        ChannelConfig::new(producer, consumer)
            .with_type(self.channel_type)
            .with_buffers(size, self.buffer_count)
            .with_mode(self.mode)
            .with_notification(self.notification)
    }
}

// =============================================================================
// Service Outcome
// =============================================================================

/// What one [`EndpointController::service`] pass did
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ServiceOutcome {
    /// Pipes were torn down
    pub stopped: bool,
    /// Pipes were brought up for this configuration value
    pub started: Option<u8>,
    /// Pipes whose halt was cleared, one bit per pipe index
    pub halts_cleared: u32,
    /// Function suspend request answered (`true` for SET_FEATURE)
    pub function_suspend: Option<bool>,
}

impl ServiceOutcome {
    /// Whether nothing was pending
    #[must_use]
    pub fn is_idle(&self) -> bool {
        *self == Self::default()
    }
}

// =============================================================================
// Endpoint Controller
// =============================================================================

/// Owns the DMA channel of every pipe and the device's active state.
///
/// All methods run in thread context. USB callbacks post into a
/// [`ControlMailbox`] instead and the owning thread calls
/// [`Self::service`].
pub struct EndpointController<'a, U: UsbStack, const PIPES: usize, const SLOTS: usize, const BYTES: usize> {
    usb: U,
    pipes: [PipeConfig; PIPES],
    channels: [DmaChannel<'a, SLOTS, BYTES>; PIPES],
    notify: [Option<&'a dyn DmaNotify<SLOTS, BYTES>>; PIPES],
    active: bool,
    speed: LinkSpeed,
}

impl<'a, U: UsbStack, const PIPES: usize, const SLOTS: usize, const BYTES: usize>
    EndpointController<'a, U, PIPES, SLOTS, BYTES>
{
    /// Create an inactive controller for `pipes`.
    pub fn new(usb: U, pipes: [PipeConfig; PIPES]) -> Self {
        Self {
            usb,
            pipes,
            channels: core::array::from_fn(|_| DmaChannel::new()),
            notify: [None; PIPES],
            active: false,
            speed: LinkSpeed::Full,
        }
    }

    /// Install the notification handler used for `pipe` from the next start.
    pub fn set_notify(&mut self, pipe: usize, notify: &'a dyn DmaNotify<SLOTS, BYTES>) -> Result<()> {
        let slot = self.notify.get_mut(pipe).ok_or(ConfigError::BadArgument)?;
        *slot = Some(notify);
        Ok(())
    }

    /// Whether the host configured the device and the pipes are up
    #[inline(always)]
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Link speed the pipes were sized for
    #[inline(always)]
    pub fn link_speed(&self) -> LinkSpeed {
        self.speed
    }

    /// Channel of `pipe`
    pub fn channel(&self, pipe: usize) -> Option<&DmaChannel<'a, SLOTS, BYTES>> {
        self.channels.get(pipe)
    }

    /// Configuration of `pipe`
    pub fn pipe(&self, pipe: usize) -> Option<&PipeConfig> {
        self.pipes.get(pipe)
    }

    /// Pipe index serving `ep`
    pub fn pipe_for(&self, ep: EndpointAddress) -> Option<usize> {
        self.pipes.iter().position(|p| p.endpoint == ep)
    }

    /// The USB stack
    pub fn usb(&self) -> &U {
        &self.usb
    }

    /// The USB stack, mutably
    pub fn usb_mut(&mut self) -> &mut U {
        &mut self.usb
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Configure every endpoint for the negotiated speed and create its
    /// channel. On failure everything brought up so far is torn down again.
    pub fn start(&mut self) -> Result<()> {
        if self.active {
            return Err(IoError::AlreadyStarted.into());
        }
        self.speed = self.usb.link_speed();

        for index in 0..PIPES {
            if let Err(e) = self.start_pipe(index) {
                #[cfg(feature = "log")]
                log::warn!("usb: pipe {} failed to start: {}", index, e);

                for up in 0..=index {
                    // Best effort; the first failure is what gets reported.
                    let _ = self.stop_pipe(up);
                }
                return Err(e);
            }
        }
        self.active = true;

        #[cfg(feature = "log")]
        log::info!("usb: {} pipes started at {:?}", PIPES, self.speed);
        #[cfg(feature = "defmt")]
        defmt::info!("usb: pipes started at {}", self.speed);
        Ok(())
    }

    fn start_pipe(&mut self, index: usize) -> Result<()> {
        let pipe = self.pipes[index];
        self.usb
            .configure_endpoint(pipe.endpoint, &pipe.endpoint_config(self.speed))?;
        let channel = &mut self.channels[index];
        channel.create(pipe.channel_config(self.speed), self.notify[index])?;
        if pipe.streaming {
            channel.set_transfer(0)?;
        }
        Ok(())
    }

    /// Destroy every channel and disable every endpoint. A no-op when the
    /// pipes are not up.
    pub fn stop(&mut self) -> Result<()> {
        if !self.active {
            return Ok(());
        }
        self.active = false;

        let mut first = None;
        for index in 0..PIPES {
            if let Err(e) = self.stop_pipe(index) {
                first.get_or_insert(e);
            }
        }

        #[cfg(feature = "log")]
        log::info!("usb: pipes stopped");
        first.map_or(Ok(()), Err)
    }

    fn stop_pipe(&mut self, index: usize) -> Result<()> {
        let ep = self.pipes[index].endpoint;
        self.channels[index].destroy();
        self.usb.flush_endpoint_fifo(ep)?;
        self.usb.disable_endpoint(ep)
    }

    /// Apply a bus event directly from thread context.
    pub fn handle_bus_event(&mut self, event: UsbEvent) -> Result<()> {
        match event {
            UsbEvent::SetConfiguration(value) if value != 0 => {
                self.stop()?;
                self.start()
            }
            UsbEvent::SetConfiguration(_) | UsbEvent::Reset | UsbEvent::Disconnect => self.stop(),
            UsbEvent::Connect | UsbEvent::Suspend | UsbEvent::Resume => Ok(()),
        }
    }

    // =========================================================================
    // Control requests
    // =========================================================================

    /// Recover `ep` after CLEAR_FEATURE(ENDPOINT_HALT) and complete the
    /// request.
    ///
    /// The endpoint is NAKed while its channel and FIFO are reset, so no host
    /// packet can reach a half-reset channel. A streaming pipe restarts its
    /// transfer; other pipes stay `Configured` for their owner to re-arm.
    pub fn clear_endpoint_halt<D: DelayNs>(&mut self, ep: EndpointAddress, delay: &mut D) -> Result<()> {
        let Some(index) = self.pipe_for(ep) else {
            self.usb.stall_endpoint(EP0, true, false)?;
            return Err(UsbError::UnknownEndpoint.into());
        };

        if self.active {
            self.usb.set_endpoint_nak(ep, true)?;
            delay.delay_us(NAK_SETTLE_US);

            let channel = &self.channels[index];
            let usb = &mut self.usb;
            let streaming = self.pipes[index].streaming;
            let recovered = (|| -> Result<()> {
                channel.abort()?;
                usb.flush_endpoint_fifo(ep)?;
                usb.reset_endpoint(ep)?;
                channel.reset()?;
                if streaming {
                    channel.set_transfer(0)?;
                }
                Ok(())
            })();

            // The endpoint is un-NAKed and the channel left Configured even
            // when a step failed; the halt itself stays set.
            let mut first = recovered.err();
            if first.is_some() {
                let _ = channel.reset();
            }
            if let Err(e) = self.usb.set_endpoint_nak(ep, false) {
                first.get_or_insert(e);
            }
            if let Some(e) = first {
                #[cfg(feature = "log")]
                log::warn!("usb: halt recovery on ep {:#04x} failed: {}", ep.raw(), e);
                self.usb.stall_endpoint(EP0, true, false)?;
                return Err(e);
            }
        }

        self.usb.stall_endpoint(ep, false, true)?;
        self.usb.ack_setup_status()?;

        #[cfg(feature = "log")]
        log::debug!("usb: halt cleared on ep {:#04x}", ep.raw());
        Ok(())
    }

    /// Answer SET/CLEAR_FEATURE(FUNCTION_SUSPEND): acknowledged only while the
    /// pipes are up, otherwise EP0 is stalled.
    pub fn function_suspend(&mut self, set: bool) -> Result<()> {
        #[cfg(feature = "log")]
        log::debug!("usb: function suspend {}", set);
        #[cfg(not(feature = "log"))]
        let _ = set;

        if self.active {
            self.usb.ack_setup_status()
        } else {
            self.usb.stall_endpoint(EP0, true, false)
        }
    }

    /// Stall the endpoint of `pipe` until the host clears the halt.
    pub fn stall_pipe(&mut self, pipe: usize) -> Result<()> {
        let ep = self.pipes.get(pipe).ok_or(ConfigError::BadArgument)?.endpoint;
        if !self.active {
            return Err(UsbError::NotActive.into());
        }
        self.usb.stall_endpoint(ep, true, false)
    }

    /// Do everything posted to `mailbox` since the last pass.
    ///
    /// Teardown runs before bring-up. Every request is attempted even when an
    /// earlier one fails; the first error is returned.
    pub fn service<D: DelayNs>(&mut self, mailbox: &ControlMailbox, delay: &mut D) -> Result<ServiceOutcome> {
        let pending = mailbox.take();
        let mut outcome = ServiceOutcome::default();
        let mut first: Option<Error> = None;

        if pending.bits & (STOP | START) != 0 && self.active {
            keep_first(&mut first, self.stop());
            outcome.stopped = true;
        }
        if pending.bits & START != 0 {
            match self.start() {
                Ok(()) => outcome.started = Some(pending.configuration),
                Err(e) => keep_first(&mut first, Err(e)),
            }
        }
        if pending.bits & HALT != 0 {
            for ep in pending.halted_endpoints() {
                let result = self.clear_endpoint_halt(ep, delay);
                if result.is_ok() {
                    if let Some(index) = self.pipe_for(ep) {
                        outcome.halts_cleared |= 1 << index;
                    }
                }
                keep_first(&mut first, result);
            }
        }
        if pending.bits & FUNC_SUSPEND != 0 {
            keep_first(&mut first, self.function_suspend(pending.suspend_set));
            outcome.function_suspend = Some(pending.suspend_set);
        }

        first.map_or(Ok(outcome), Err)
    }
}

fn keep_first(first: &mut Option<Error>, result: Result<()>) {
    if let Err(e) = result {
        #[cfg(feature = "log")]
        log::warn!("usb: service step failed: {}", e);
        first.get_or_insert(e);
    }
}
