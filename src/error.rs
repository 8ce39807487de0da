//! Error types of the simulator.
//!
//! Every error here is fatal to a run: the simulator performs its own
//! bounded retries (head rotation, destination re-acquisition) before
//! surfacing one of these, and never retries past that point.

use core::fmt;

/// Semantic error kinds.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Errno {
    /// No destination block available to service a host write after GC attempts.
    OutOfSpace,
    /// GC requested but every block is empty.
    NoVictim,
    /// GC cannot acquire a migration target, even after erasing all-invalid candidates.
    NoDestination,
    /// A FREE slot was expected but not found after rotating heads. Unreachable
    /// unless a counter invariant is broken.
    AllocatorInconsistency,
    /// Invalid configuration detected at construction time.
    InvalidConfig,
}

/// The error with an errno and an optional message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Error {
    errno: Errno,
    msg: Option<&'static str>,
}

impl Error {
    pub const fn new(errno: Errno) -> Self {
        Error { errno, msg: None }
    }

    pub const fn with_msg(errno: Errno, msg: &'static str) -> Self {
        Error {
            errno,
            msg: Some(msg),
        }
    }

    pub const fn errno(&self) -> Errno {
        self.errno
    }
}

impl From<Errno> for Error {
    fn from(errno: Errno) -> Self {
        Error::new(errno)
    }
}

impl fmt::Display for Errno {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Errno::OutOfSpace => "OutOfSpace",
            Errno::NoVictim => "NoVictim",
            Errno::NoDestination => "NoDestination",
            Errno::AllocatorInconsistency => "AllocatorInconsistency",
            Errno::InvalidConfig => "InvalidConfig",
        };
        write!(f, "{}", name)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.msg {
            Some(msg) => write!(f, "{}: {}", self.errno, msg),
            None => write!(f, "{}", self.errno),
        }
    }
}

impl std::error::Error for Error {}

pub type Result<T> = core::result::Result<T, Error>;

/// Return early with an `Error` carrying the given errno and message.
#[macro_export]
macro_rules! return_errno_with_msg {
    ($errno:ident, $msg:literal) => {
        return core::result::Result::Err($crate::error::Error::with_msg(
            $crate::error::Errno::$errno,
            $msg,
        ))
    };
}
