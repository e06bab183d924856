use std::fmt;
use std::io;
use std::result;

/// Error kinds produced by the mirror core.
///
/// `TransientFull` is never returned across the public `BaseBdev`/`Mirror`
/// boundary to a caller of a `mirror_io` — every internal submit path
/// converts it into a [`crate::waitqueue`] park instead. It exists as a
/// variant so [`crate::device::SubmitOutcome`] has a place to put the
/// ENOMEM signal before the dispatcher sees it.
#[derive(Debug)]
pub enum Error {
    /// No healthy replica available to satisfy a read, or the leg-specific
    /// base channel was absent for a write/unmap/flush leg.
    MissingReplica,
    /// Submission-time ENOMEM; always converted to back-pressure.
    TransientFull,
    /// Any other submission or completion failure.
    PermanentIo(io::Error),
    /// A delta-bitmap (or other) allocation failed.
    AllocFail,
    /// Caller-supplied argument was invalid (fragmap misalignment, range
    /// out of bounds, zero-capacity bit-array index, ...).
    InvalidArg(String),
    /// No device by that name.
    NoSuchDevice,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use Error::*;

        match self {
            MissingReplica => write!(f, "no healthy replica available"),
            TransientFull => write!(f, "submission queue full, retry later"),
            PermanentIo(e) => write!(f, "I/O error: {e}"),
            AllocFail => write!(f, "allocation failure"),
            InvalidArg(msg) => write!(f, "invalid argument: {msg}"),
            NoSuchDevice => write!(f, "no such device"),
        }
    }
}

impl std::error::Error for Error {}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        if e.kind() == io::ErrorKind::OutOfMemory {
            Error::TransientFull
        } else {
            Error::PermanentIo(e)
        }
    }
}

pub type Result<T> = result::Result<T, Error>;
