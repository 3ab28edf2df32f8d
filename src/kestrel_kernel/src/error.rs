use core::fmt;

use crate::KernelTraits;

/// A condition the kernel can't continue from. Every such condition is passed
/// to the configured fatal error entry point, which never returns.
#[derive(PartialEq, Eq, Copy, Clone, Debug)]
pub enum FatalError {
    /// An object id doesn't refer to a configured object.
    BadId,
    /// The operation was called from an interrupt context, before boot, or
    /// while preemption is disabled.
    BadContext,
    /// The configuration is inconsistent.
    InvalidConfig,
    /// A task tried to lock a mutex it already holds.
    MutexDeadlock,
    /// A task tried to unlock a mutex it doesn't hold.
    MutexNotOwner,
    /// A task tried to lock a mutex whose priority ceiling is lower than its
    /// own priority.
    CeilingViolation,
    /// A post would push a semaphore beyond its maximum value.
    SemaphoreMaxExceeded,
    /// A semaphore maximum of zero or below the current value.
    SemaphoreMaxInvalid,
    /// The semaphore's maximum has already been set.
    SemaphoreMaxAlreadyInit,
    /// The message buffer's length isn't the queue's element size.
    MessageSizeMismatch,
    /// The source and the destination of a message copy overlap.
    MessageBufferOverlap,
    /// More than one tick elapsed between two services of the tick counter.
    TickOverflow,
    /// A timeout longer than [`MAX_TIMEOUT`](crate::MAX_TIMEOUT).
    InvalidTimeout,
    /// A task's entry point returned.
    TaskReturned,
    /// An internal consistency check failed (`validate` builds only).
    InvariantViolation,
    /// An application-defined error, raised by a watchdog timer.
    Application(u32),
}

impl FatalError {
    /// Get the numeric error code. The lower 8 bits identify the variant; the
    /// payload of [`Self::Application`] occupies bits 8 to 39.
    pub const fn code(self) -> u64 {
        match self {
            Self::BadId => 1,
            Self::BadContext => 2,
            Self::InvalidConfig => 3,
            Self::MutexDeadlock => 4,
            Self::MutexNotOwner => 5,
            Self::CeilingViolation => 6,
            Self::SemaphoreMaxExceeded => 7,
            Self::SemaphoreMaxInvalid => 8,
            Self::SemaphoreMaxAlreadyInit => 9,
            Self::MessageSizeMismatch => 10,
            Self::MessageBufferOverlap => 11,
            Self::TickOverflow => 12,
            Self::InvalidTimeout => 13,
            Self::TaskReturned => 14,
            Self::InvariantViolation => 15,
            Self::Application(payload) => 0x80 | ((payload as u64) << 8),
        }
    }
}

impl fmt::Display for FatalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Application(payload) => write!(f, "application error {payload}"),
            _ => write!(f, "{self:?} (code {})", self.code()),
        }
    }
}

/// Call the fatal error entry point.
#[cold]
pub(super) fn fatal<Traits: KernelTraits>(error: FatalError) -> ! {
    Traits::fatal_error(error)
}
