//! Configuration types for DMA channels

use super::socket::{Socket, SocketId};
use crate::error::{ConfigError, ConfigResult};
use crate::internal::constants::{DEFAULT_BUFFER_COUNT, DMA_GRANULARITY};

/// DMA channel type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ChannelType {
    /// Hardware forwards every buffer; no CPU involvement, no per-buffer events
    #[default]
    Auto,
    /// Hardware forwards every buffer and signals each one to the CPU
    AutoSignal,
    /// CPU sees every produced buffer and commits or discards it
    Manual,
    /// Hardware producer, CPU consumer
    ManualIn,
    /// CPU producer, hardware consumer
    ManualOut,
}

impl ChannelType {
    /// Whether the CPU must touch every buffer
    #[must_use]
    pub const fn is_manual(self) -> bool {
        matches!(
            self,
            ChannelType::Manual | ChannelType::ManualIn | ChannelType::ManualOut
        )
    }

    /// Whether the producer is a hardware socket
    #[must_use]
    pub const fn has_hw_producer(self) -> bool {
        !matches!(self, ChannelType::ManualOut)
    }

    /// Whether the consumer is a hardware socket
    #[must_use]
    pub const fn has_hw_consumer(self) -> bool {
        !matches!(self, ChannelType::ManualIn)
    }
}

/// Transfer accounting mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TransferMode {
    /// Transfer sizes and counters are in bytes
    #[default]
    Byte,
    /// Transfer sizes and counters are in buffers
    Buffer,
}

/// Bitset of notification kinds the channel owner wants callbacks for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct EventMask(u16);

impl EventMask {
    /// No notifications
    pub const NONE: Self = Self(0);
    /// Finite transfer reached its size
    pub const TRANSFER_COMPLETE: Self = Self(1 << 0);
    /// Override send finished
    pub const SEND_COMPLETE: Self = Self(1 << 1);
    /// Override receive finished
    pub const RECV_COMPLETE: Self = Self(1 << 2);
    /// Producer filled a buffer
    pub const PRODUCED: Self = Self(1 << 3);
    /// Consumer drained a buffer
    pub const CONSUMED: Self = Self(1 << 4);
    /// Channel was aborted
    pub const ABORTED: Self = Self(1 << 5);
    /// Hardware fault
    pub const ERROR: Self = Self(1 << 6);
    /// Producer socket suspended
    pub const PROD_SUSPENDED: Self = Self(1 << 7);
    /// Consumer socket suspended
    pub const CONS_SUSPENDED: Self = Self(1 << 8);
    /// Every notification
    pub const ALL: Self = Self(0x01FF);

    /// Union of two masks
    #[must_use]
    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    /// Whether all bits of `other` are set
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Raw bit value
    #[must_use]
    pub const fn bits(self) -> u16 {
        self.0
    }
}

impl core::ops::BitOr for EventMask {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        self.union(rhs)
    }
}

/// When a socket suspends itself
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SuspendOption {
    /// Leave the socket's suspend setting unchanged
    #[default]
    None,
    /// Suspend after the next buffer that carries an EOP
    AfterEop,
    /// Suspend after the next buffer boundary
    AfterBuffer,
    /// Suspend immediately (takes effect at the current buffer boundary)
    Now,
}

/// DMA channel configuration
///
/// Use the builder methods to configure the channel:
///
/// ```ignore
/// let config = ChannelConfig::new(
///     Socket::producer(SocketId::Cpu),
///     Socket::consumer(SocketId::UsbIn(3)),
/// )
/// .with_type(ChannelType::ManualOut)
/// .with_buffers(1024, 4)
/// .with_notification(EventMask::CONSUMED);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ChannelConfig {
    /// Channel type
    pub channel_type: ChannelType,
    /// Producer socket
    pub producer: Socket,
    /// Consumer socket
    pub consumer: Socket,
    /// Size of each ring buffer in bytes (multiple of 16)
    pub buffer_size: usize,
    /// Number of ring buffers
    pub buffer_count: usize,
    /// Empty buffers required before the producer starts a new buffer
    pub prod_avail_count: usize,
    /// Bytes reserved in front of produced data (manual channels)
    pub prod_header: usize,
    /// Bytes reserved after produced data (manual channels)
    pub prod_footer: usize,
    /// Offset the consumer starts reading from (manual channels)
    pub cons_header: usize,
    /// Accounting mode
    pub mode: TransferMode,
    /// Notifications to deliver
    pub notification: EventMask,
}

impl ChannelConfig {
    /// Create an AUTO channel configuration between two sockets
    #[must_use]
    pub const fn new(producer: Socket, consumer: Socket) -> Self {
        Self {
            channel_type: ChannelType::Auto,
            producer,
            consumer,
            buffer_size: 512,
            buffer_count: DEFAULT_BUFFER_COUNT,
            prod_avail_count: 0,
            prod_header: 0,
            prod_footer: 0,
            cons_header: 0,
            mode: TransferMode::Byte,
            notification: EventMask::NONE,
        }
    }

    /// Set the channel type
    #[must_use]
    pub const fn with_type(mut self, channel_type: ChannelType) -> Self {
        self.channel_type = channel_type;
        self
    }

    /// Set buffer size and count
    #[must_use]
    pub const fn with_buffers(mut self, size: usize, count: usize) -> Self {
        self.buffer_size = size;
        self.buffer_count = count;
        self
    }

    /// Set header/footer reservation for in-place protocol framing
    #[must_use]
    pub const fn with_framing(mut self, prod_header: usize, prod_footer: usize, cons_header: usize) -> Self {
        self.prod_header = prod_header;
        self.prod_footer = prod_footer;
        self.cons_header = cons_header;
        self
    }

    /// Set the producer back-pressure threshold
    #[must_use]
    pub const fn with_prod_avail_count(mut self, count: usize) -> Self {
        self.prod_avail_count = count;
        self
    }

    /// Set the accounting mode
    #[must_use]
    pub const fn with_mode(mut self, mode: TransferMode) -> Self {
        self.mode = mode;
        self
    }

    /// Set the notification mask
    #[must_use]
    pub const fn with_notification(mut self, mask: EventMask) -> Self {
        self.notification = mask;
        self
    }

    /// Payload bytes the producer may write per buffer
    #[must_use]
    pub const fn payload_capacity(&self) -> usize {
        self.buffer_size - self.prod_header - self.prod_footer
    }

    /// Check the configuration without touching any channel state.
    pub fn validate<const SLOTS: usize>(&self) -> ConfigResult<()> {
        if self.buffer_size == 0 || self.buffer_size % DMA_GRANULARITY != 0 {
            return Err(ConfigError::BadArgument);
        }
        if self.buffer_count > SLOTS {
            return Err(ConfigError::BadArgument);
        }
        if self.buffer_count == 0 && !self.channel_type.is_manual() {
            return Err(ConfigError::NoBuffers);
        }
        if self.prod_avail_count > self.buffer_count {
            return Err(ConfigError::BadArgument);
        }

        let framed = self.prod_header != 0 || self.prod_footer != 0 || self.cons_header != 0;
        if framed && !self.channel_type.is_manual() {
            return Err(ConfigError::BadArgument);
        }
        if self.prod_header + self.prod_footer >= self.buffer_size
            || self.cons_header >= self.buffer_size
        {
            return Err(ConfigError::BadArgument);
        }

        self.validate_sockets()
    }

    fn validate_sockets(&self) -> ConfigResult<()> {
        let (prod, cons) = (&self.producer, &self.consumer);
        if !prod.direction_ok() || !cons.direction_ok() || prod.id == cons.id {
            return Err(ConfigError::SocketMismatch);
        }

        let cpu_ok = match self.channel_type {
            ChannelType::ManualOut => prod.is_cpu() && !cons.is_cpu(),
            ChannelType::ManualIn => cons.is_cpu() && !prod.is_cpu(),
            _ => !prod.is_cpu() && !cons.is_cpu(),
        };
        if !cpu_ok {
            return Err(ConfigError::SocketMismatch);
        }
        Ok(())
    }
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self::new(
            Socket::producer(SocketId::UsbOut(1)),
            Socket::consumer(SocketId::UsbIn(1)),
        )
    }
}
