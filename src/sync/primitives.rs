//! Synchronization primitives for ISR-safe access.
//!
//! Low-level primitives shared by the DMA channels, the control mailbox and
//! the stream applications.

use core::cell::RefCell;
use critical_section::Mutex;
use embedded_hal::delay::DelayNs;

use crate::error::{IoError, IoResult};
use crate::internal::constants::WAIT_TICK_US;

/// Cell providing interior mutability with critical section protection.
///
/// Combines `critical_section::Mutex` with `RefCell` for safe mutable access
/// from both thread code and notification (interrupt) context.
pub struct CriticalSectionCell<T> {
    inner: Mutex<RefCell<T>>,
}

impl<T> CriticalSectionCell<T> {
    /// Create a new cell (const, suitable for static initialization).
    pub const fn new(value: T) -> Self {
        Self {
            inner: Mutex::new(RefCell::new(value)),
        }
    }

    /// Execute a closure with exclusive mutable access.
    ///
    /// Interrupts are disabled for the duration of the closure.
    #[inline]
    pub fn with<R, F>(&self, f: F) -> R
    where
        F: FnOnce(&mut T) -> R,
    {
        critical_section::with(|cs| {
            let mut value = self.inner.borrow_ref_mut(cs);
            f(&mut value)
        })
    }

    /// Try to execute a closure, returning `None` if already borrowed.
    #[inline]
    pub fn try_with<R, F>(&self, f: F) -> Option<R>
    where
        F: FnOnce(&mut T) -> R,
    {
        critical_section::with(|cs| {
            self.inner
                .borrow(cs)
                .try_borrow_mut()
                .ok()
                .map(|mut value| f(&mut value))
        })
    }

    /// Execute a closure with immutable access.
    #[inline]
    pub fn with_ref<R, F>(&self, f: F) -> R
    where
        F: FnOnce(&T) -> R,
    {
        critical_section::with(|cs| {
            let value = self.inner.borrow_ref(cs);
            f(&value)
        })
    }

    /// Get mutable access without a critical section.
    ///
    /// Exclusive access is already proven by `&mut self`.
    #[inline]
    pub fn get_mut(&mut self) -> &mut T {
        self.inner.get_mut().get_mut()
    }
}

// SAFETY: CriticalSectionCell uses critical sections to protect all access.
unsafe impl<T: Send> Sync for CriticalSectionCell<T> {}

// =============================================================================
// Wait Options
// =============================================================================

/// How long a blocking operation may wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum WaitOption {
    /// Poll once and return immediately
    #[default]
    NoWait,
    /// Wait until the condition is met or the wait is cancelled
    Forever,
    /// Wait at most this many ticks of [`WAIT_TICK_US`](crate::constants::WAIT_TICK_US)
    Ticks(u32),
}

/// Outcome of one poll of a blocking condition.
pub(crate) enum Poll<T> {
    Ready(T),
    Pending,
}

/// Poll `f` once per tick until it is ready or the wait expires.
///
/// `f` runs outside any critical section; it takes its own locks.
pub(crate) fn block_on<T, D, F>(wait: WaitOption, delay: &mut D, mut f: F) -> IoResult<T>
where
    D: DelayNs,
    F: FnMut() -> Poll<T>,
{
    let mut ticks_left = match wait {
        WaitOption::NoWait => 0,
        WaitOption::Forever => u32::MAX,
        WaitOption::Ticks(n) => n,
    };

    loop {
        if let Poll::Ready(value) = f() {
            return Ok(value);
        }
        if ticks_left == 0 {
            return Err(IoError::Timeout);
        }
        if wait != WaitOption::Forever {
            ticks_left -= 1;
        }
        delay.delay_us(WAIT_TICK_US);
    }
}

// =============================================================================
// Event Flags
// =============================================================================

/// ISR-safe event flag word.
///
/// Notification context sets bits; the owning thread consumes them. This is
/// the deferral path used by callbacks that must not block.
pub struct EventFlags {
    bits: CriticalSectionCell<u32>,
}

impl EventFlags {
    /// Create an empty flag word (const, suitable for static initialization).
    pub const fn new() -> Self {
        Self {
            bits: CriticalSectionCell::new(0),
        }
    }

    /// Set `mask` bits. Never blocks.
    #[inline]
    pub fn set(&self, mask: u32) {
        self.bits.with(|bits| *bits |= mask);
    }

    /// Clear and return the bits of `mask` that were set.
    #[inline]
    pub fn take(&self, mask: u32) -> u32 {
        self.bits.with(|bits| {
            let hit = *bits & mask;
            *bits &= !mask;
            hit
        })
    }

    /// Return the currently set bits without clearing them.
    #[inline]
    pub fn peek(&self) -> u32 {
        self.bits.with_ref(|bits| *bits)
    }

    /// Wait until any bit of `mask` is set, then clear and return those bits.
    pub fn wait_any<D: DelayNs>(&self, mask: u32, wait: WaitOption, delay: &mut D) -> IoResult<u32> {
        block_on(wait, delay, || match self.take(mask) {
            0 => Poll::Pending,
            hit => Poll::Ready(hit),
        })
    }
}

impl Default for EventFlags {
    fn default() -> Self {
        Self::new()
    }
}
