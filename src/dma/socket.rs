//! DMA socket descriptors.
//!
//! A socket is one end of a DMA channel: the producer that fills buffers or
//! the consumer that drains them. Sockets are purely descriptive; the
//! channel only uses them to validate its wiring.

/// Socket identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SocketId {
    /// USB IN endpoint (device to host), by endpoint number
    UsbIn(u8),
    /// USB OUT endpoint (host to device), by endpoint number
    UsbOut(u8),
    /// On-chip peripheral FIFO (GPIF thread, storage port, serial block)
    Peripheral(u8),
    /// CPU pseudo-socket used by MANUAL_IN/MANUAL_OUT channels
    Cpu,
}

impl SocketId {
    /// Whether this socket can act as a producer.
    #[must_use]
    pub const fn can_produce(self) -> bool {
        !matches!(self, SocketId::UsbIn(_))
    }

    /// Whether this socket can act as a consumer.
    #[must_use]
    pub const fn can_consume(self) -> bool {
        !matches!(self, SocketId::UsbOut(_))
    }

    /// Whether this is the CPU pseudo-socket.
    #[must_use]
    pub const fn is_cpu(self) -> bool {
        matches!(self, SocketId::Cpu)
    }
}

/// Which side of the channel a socket sits on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SocketKind {
    /// Fills buffers
    Producer,
    /// Drains buffers
    Consumer,
}

/// Socket capability flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SocketCaps(u8);

impl SocketCaps {
    /// No special capabilities
    pub const NONE: Self = Self(0);
    /// Socket reports packet boundaries (EOP) to the channel
    pub const PACKET_AWARE: Self = Self(1 << 0);
    /// Socket moves an unframed byte stream
    pub const STREAM_ONLY: Self = Self(1 << 1);

    /// Union of two capability sets
    #[must_use]
    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    /// Whether all bits of `other` are present
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

/// One end of a DMA channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Socket {
    /// Socket identity
    pub id: SocketId,
    /// Producer or consumer
    pub kind: SocketKind,
    /// Capability flags
    pub caps: SocketCaps,
}

impl Socket {
    /// Producer socket with packet-boundary awareness
    #[must_use]
    pub const fn producer(id: SocketId) -> Self {
        Self {
            id,
            kind: SocketKind::Producer,
            caps: SocketCaps::PACKET_AWARE,
        }
    }

    /// Consumer socket with packet-boundary awareness
    #[must_use]
    pub const fn consumer(id: SocketId) -> Self {
        Self {
            id,
            kind: SocketKind::Consumer,
            caps: SocketCaps::PACKET_AWARE,
        }
    }

    /// Replace the capability flags
    #[must_use]
    pub const fn with_caps(mut self, caps: SocketCaps) -> Self {
        self.caps = caps;
        self
    }

    /// Whether the socket is the CPU pseudo-socket
    #[must_use]
    pub const fn is_cpu(&self) -> bool {
        self.id.is_cpu()
    }

    /// Whether the socket's identity allows the role it claims
    #[must_use]
    pub const fn direction_ok(&self) -> bool {
        match self.kind {
            SocketKind::Producer => self.id.can_produce(),
            SocketKind::Consumer => self.id.can_consume(),
        }
    }
}
