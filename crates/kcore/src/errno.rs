//! Recoverable error taxonomy.
//!
//! Syscall-style operations return `Result<T, KernelError>`; the codes here
//! cover everything a caller can observe and recover from. Broken kernel
//! invariants (unregistered interrupt raised, id pool exhausted, scheduler
//! with nothing to run) are panics, never `KernelError` values.

use thiserror::Error;

/// Error codes visible across the syscall surface.
///
/// `Retry`, `WouldBlock` and `Ignored` are outcomes rather than faults:
/// a blocking call that parked the caller reports `Retry` and is expected
/// to be re-issued after the thread is released; `Ignored` reports a
/// message or signal that was filtered by the destination's threshold.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum KernelError {
    #[error("invalid handle")]
    InvalidHandle,
    #[error("object does not exist")]
    DontExist,
    #[error("out of memory")]
    NoMemory,
    #[error("invalid argument")]
    InvalidArgument,
    #[error("invalid destination or source type")]
    InvalidType,
    #[error("message larger than supplied buffer")]
    TooBig,
    #[error("nothing available")]
    Empty,
    #[error("thread not finished")]
    NotFinished,
    #[error("caller was parked, retry the request")]
    Retry,
    #[error("operation would block")]
    WouldBlock,
    #[error("filtered by destination threshold")]
    Ignored,
}

impl KernelError {
    /// Negative code used by callers that expect the classic numeric form.
    pub const fn code(self) -> i32 {
        match self {
            Self::InvalidHandle => -1,
            Self::DontExist => -2,
            Self::NoMemory => -3,
            Self::InvalidArgument => -4,
            Self::InvalidType => -5,
            Self::TooBig => -6,
            Self::Empty => -7,
            Self::NotFinished => -8,
            Self::Retry => -9,
            Self::WouldBlock => -10,
            Self::Ignored => -11,
        }
    }

    /// True for the codes that report progress conventions, not faults.
    pub const fn is_outcome(self) -> bool {
        matches!(self, Self::Retry | Self::WouldBlock | Self::Ignored)
    }
}

pub type KernelResult<T> = Result<T, KernelError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_negative_and_distinct() {
        let all = [
            KernelError::InvalidHandle,
            KernelError::DontExist,
            KernelError::NoMemory,
            KernelError::InvalidArgument,
            KernelError::InvalidType,
            KernelError::TooBig,
            KernelError::Empty,
            KernelError::NotFinished,
            KernelError::Retry,
            KernelError::WouldBlock,
            KernelError::Ignored,
        ];
        let mut seen = std::collections::HashSet::new();
        for err in all {
            assert!(err.code() < 0);
            assert!(seen.insert(err.code()), "duplicate code for {err:?}");
        }
    }

    #[test]
    fn outcome_classification() {
        assert!(KernelError::Retry.is_outcome());
        assert!(KernelError::Ignored.is_outcome());
        assert!(!KernelError::InvalidHandle.is_outcome());
    }
}
