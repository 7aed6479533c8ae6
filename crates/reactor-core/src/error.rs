//! Error types for the reactor engine core.

use std::fmt;

/// Result type for engine operations.
pub type ReactorResult<T> = Result<T, ReactorError>;

/// Errors surfaced by the engine core.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReactorError {
    /// Allocation failure during registration (heap/timer-heap/pid-map
    /// capacity exhausted). Reservation APIs exist to move this failure
    /// mode before the point of no return.
    ResourceExhausted,

    /// The requested operation is not supported by the active backend,
    /// e.g. a bidi watch where emulation was not requested.
    Unsupported(&'static str),

    /// A kernel primitive (`epoll_ctl`, `kevent`, `waitid`, ...) failed,
    /// wrapping the raw `errno`.
    Os(i32),

    /// The engine was asked to operate on a watcher that is not
    /// currently registered.
    NotRegistered,

    /// The engine has already been shut down.
    Closed,
}

impl fmt::Display for ReactorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReactorError::ResourceExhausted => write!(f, "resource exhausted"),
            ReactorError::Unsupported(what) => write!(f, "unsupported operation: {}", what),
            ReactorError::Os(errno) => write!(f, "OS error: errno {}", errno),
            ReactorError::NotRegistered => write!(f, "watcher not registered"),
            ReactorError::Closed => write!(f, "event loop closed"),
        }
    }
}

impl std::error::Error for ReactorError {}

impl From<std::io::Error> for ReactorError {
    fn from(e: std::io::Error) -> Self {
        match e.raw_os_error() {
            Some(errno) => ReactorError::Os(errno),
            None => ReactorError::Os(-1),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_matches_kind() {
        assert_eq!(format!("{}", ReactorError::ResourceExhausted), "resource exhausted");
        assert_eq!(format!("{}", ReactorError::Os(5)), "OS error: errno 5");
        assert_eq!(
            format!("{}", ReactorError::Unsupported("bidi watch")),
            "unsupported operation: bidi watch"
        );
    }

    #[test]
    fn io_error_conversion_carries_errno() {
        let io_err = std::io::Error::from_raw_os_error(13);
        let err: ReactorError = io_err.into();
        assert_eq!(err, ReactorError::Os(13));
    }
}
