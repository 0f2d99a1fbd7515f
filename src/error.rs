//! Error types for the USB DMA channel core
//!
//! Errors are organized by domain for better diagnostics:
//! - [`ConfigError`]: Channel, pool and socket configuration failures
//! - [`DmaError`]: Buffer ring sequencing and hardware faults
//! - [`IoError`]: Transient and transfer-state failures (timeouts, aborts)
//! - [`UsbError`]: Failures reported by the USB stack or the endpoint controller
//!
//! The unified [`Error`] enum wraps all domain errors and is returned
//! by most channel and controller methods.

// =============================================================================
// Configuration Errors
// =============================================================================

/// Configuration errors
///
/// Detected synchronously at channel creation, pool allocation or transfer
/// setup. They are never retried automatically.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConfigError {
    /// Invalid parameter (buffer size not a multiple of 16, header/footer
    /// larger than the buffer, too many buffers)
    BadArgument,
    /// Requested pool does not fit the buffer memory budget
    AllocationFailed,
    /// Producer/consumer sockets do not match the channel type or direction
    SocketMismatch,
    /// Zero buffer count on a channel type that needs a ring
    NoBuffers,
    /// Channel has not been created
    NotConfigured,
}

impl core::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl ConfigError {
    /// Returns a human-readable description of the error
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            ConfigError::BadArgument => "bad argument",
            ConfigError::AllocationFailed => "buffer memory exhausted",
            ConfigError::SocketMismatch => "socket direction mismatch",
            ConfigError::NoBuffers => "zero buffer count",
            ConfigError::NotConfigured => "channel not configured",
        }
    }
}

// =============================================================================
// DMA Errors
// =============================================================================

/// Buffer ring and DMA hardware errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DmaError {
    /// No buffer is ready at the head of the ring
    NoBufferAvailable,
    /// Operation issued out of ring order, on a stale buffer, or in a state
    /// that forbids it
    InvalidSequence,
    /// Operation not supported by this channel type
    NotSupported,
    /// Destination too small for the buffer being drained
    BufferTooSmall,
    /// Socket is suspended
    SocketSuspended,
    /// Hardware fault detected mid-transfer; only `reset()` recovers
    DmaFailure,
}

impl core::fmt::Display for DmaError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl DmaError {
    /// Returns a human-readable description of the error
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            DmaError::NoBufferAvailable => "no buffer available",
            DmaError::InvalidSequence => "invalid buffer sequence",
            DmaError::NotSupported => "not supported by channel type",
            DmaError::BufferTooSmall => "buffer too small",
            DmaError::SocketSuspended => "socket suspended",
            DmaError::DmaFailure => "DMA hardware failure",
        }
    }
}

// =============================================================================
// I/O Errors
// =============================================================================

/// Transient and transfer-state errors
///
/// Retryable by the caller; the channel itself never retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum IoError {
    /// Operation timed out
    Timeout,
    /// A transfer is already running on the channel
    AlreadyStarted,
    /// No transfer is running on the channel
    NotStarted,
    /// Wait was cancelled by `abort()` or `reset()`
    Aborted,
}

impl core::fmt::Display for IoError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl IoError {
    /// Returns a human-readable description of the error
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            IoError::Timeout => "operation timed out",
            IoError::AlreadyStarted => "transfer already started",
            IoError::NotStarted => "transfer not started",
            IoError::Aborted => "operation aborted",
        }
    }
}

// =============================================================================
// USB Errors
// =============================================================================

/// Endpoint controller and USB stack errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum UsbError {
    /// The USB stack rejected an endpoint operation
    StackFailure,
    /// Endpoint is not backed by any pipe
    UnknownEndpoint,
    /// Application is not active (no SET_CONFIGURATION yet)
    NotActive,
    /// Backing storage reported a failure
    Storage,
}

impl core::fmt::Display for UsbError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl UsbError {
    /// Returns a human-readable description of the error
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            UsbError::StackFailure => "USB stack failure",
            UsbError::UnknownEndpoint => "unknown endpoint",
            UsbError::NotActive => "application not active",
            UsbError::Storage => "storage failure",
        }
    }
}

// =============================================================================
// Unified Error Type
// =============================================================================

/// This enum wraps all domain-specific errors for unified error handling.
///
/// Match on the inner domain error for specific handling:
/// ```ignore
/// match channel.get_buffer(WaitOption::Ticks(10), &mut delay) {
///     Err(Error::Io(IoError::Timeout)) => { /* retry */ }
///     Err(Error::Dma(DmaError::DmaFailure)) => { channel.reset()?; }
///     _ => {}
/// }
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    /// Configuration error
    Config(ConfigError),
    /// DMA error
    Dma(DmaError),
    /// I/O error
    Io(IoError),
    /// USB error
    Usb(UsbError),
}

impl core::fmt::Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Error::Config(e) => write!(f, "config: {}", e.as_str()),
            Error::Dma(e) => write!(f, "dma: {}", e.as_str()),
            Error::Io(e) => write!(f, "io: {}", e.as_str()),
            Error::Usb(e) => write!(f, "usb: {}", e.as_str()),
        }
    }
}

impl From<ConfigError> for Error {
    fn from(e: ConfigError) -> Self {
        Error::Config(e)
    }
}

impl From<DmaError> for Error {
    fn from(e: DmaError) -> Self {
        Error::Dma(e)
    }
}

impl From<IoError> for Error {
    fn from(e: IoError) -> Self {
        Error::Io(e)
    }
}

impl From<UsbError> for Error {
    fn from(e: UsbError) -> Self {
        Error::Usb(e)
    }
}

/// Result type alias for channel and controller operations
pub type Result<T> = core::result::Result<T, Error>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = core::result::Result<T, ConfigError>;

/// Result type alias for DMA operations
pub type DmaResult<T> = core::result::Result<T, DmaError>;

/// Result type alias for I/O operations
pub type IoResult<T> = core::result::Result<T, IoError>;

// =============================================================================
// Unit Tests
// =============================================================================
