//! Kernel-wide error type.
//!
//! Every fallible kernel entry point -- VM fault handling, interrupt vector
//! allocation, driver attach, the `npk_*` ABI -- returns a [`KernelError`]
//! instead of rolling its own enum, so callers across module boundaries can
//! match on a single, small vocabulary of failure modes.

use core::fmt;

/// Coarse-grained kernel error code shared by the VM, scheduler, interrupt,
/// driver and ABI layers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelError {
    /// A physical or virtual allocation could not be satisfied.
    OutOfMemory,
    /// No interrupt vector was available to allocate.
    OutOfVectors,
    /// A requested region overlaps an existing one.
    Overlap,
    /// The requested object does not exist.
    NotFound,
    /// The caller does not hold the rights required for this operation.
    PermissionDenied,
    /// The resource exists but is currently in use.
    Busy,
    /// An argument failed validation.
    InvalidArgument,
    /// The operation is recognized but not implemented for this object.
    NotSupported,
    /// The operation did not complete within its deadline.
    TimedOut,
    /// An unrecoverable condition; the caller should treat this as fatal.
    Fatal,
}

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            KernelError::OutOfMemory => "out of memory",
            KernelError::OutOfVectors => "out of interrupt vectors",
            KernelError::Overlap => "range overlaps an existing mapping",
            KernelError::NotFound => "not found",
            KernelError::PermissionDenied => "permission denied",
            KernelError::Busy => "resource busy",
            KernelError::InvalidArgument => "invalid argument",
            KernelError::NotSupported => "not supported",
            KernelError::TimedOut => "timed out",
            KernelError::Fatal => "fatal error",
        };

        f.write_str(msg)
    }
}

/// Convenience alias used throughout the modules that return [`KernelError`].
pub type Result<T> = core::result::Result<T, KernelError>;

/// Maps a [`KernelError`] onto the stable `npk_status_t` values crossing the
/// driver ABI boundary (see [`crate::abi`]).
impl KernelError {
    pub const fn to_status(self) -> i32 {
        match self {
            KernelError::OutOfMemory => -1,
            KernelError::OutOfVectors => -2,
            KernelError::Overlap => -3,
            KernelError::NotFound => -4,
            KernelError::PermissionDenied => -5,
            KernelError::Busy => -6,
            KernelError::InvalidArgument => -7,
            KernelError::NotSupported => -8,
            KernelError::TimedOut => -9,
            KernelError::Fatal => -10,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_are_distinct() {
        let all = [
            KernelError::OutOfMemory,
            KernelError::OutOfVectors,
            KernelError::Overlap,
            KernelError::NotFound,
            KernelError::PermissionDenied,
            KernelError::Busy,
            KernelError::InvalidArgument,
            KernelError::NotSupported,
            KernelError::TimedOut,
            KernelError::Fatal,
        ];

        for (i, a) in all.iter().enumerate() {
            for (j, b) in all.iter().enumerate() {
                if i != j {
                    assert_ne!(a.to_status(), b.to_status());
                }
            }
        }
    }
}
