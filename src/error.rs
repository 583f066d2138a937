//! Crate-wide error type.
//!
//! Every module in this crate returns [`Result<T>`] rather than catching
//! and swallowing errors locally. Per the error taxonomy: fatal storage
//! errors (durability-critical I/O, checksum failures) are represented
//! here but are expected to propagate all the way up to the engine root,
//! which aborts the process rather than attempting recovery in place.
//! Logical operation failures (stored/not_stored/exists/...) are *not*
//! represented as [`Error`] variants; they are returned as plain enums
//! from the btree/kv layer (see `btree::Outcome`) since they are not
//! errors from the engine's point of view.

use std::{fmt, io, sync::mpsc};

#[derive(Debug)]
pub enum Error {
    /// I/O failure underneath a commit-critical write or a checksum-verified
    /// read. Per spec this is always fatal to the caller.
    IoError(io::Error),
    /// `read`/`write` returned fewer bytes than requested.
    PartialIo(String, usize, usize),
    /// Checksum mismatch while recovering a metablock, LBA entry or block image.
    Corruption(String),
    /// Decoding a serialized record failed.
    DecodeFail(String),
    /// Encoding a serialized record failed.
    EncodeFail(String),
    /// Conversion between integer widths failed (file too large, etc).
    FailConversion(String),
    /// Path does not name a usable file/directory.
    InvalidFile(String),
    /// On-disk format did not match what this build expects.
    InvalidFormat(String),
    /// Attempt to read a free/unallocated/tombstoned block-id.
    KeyNotFound,
    /// A block-id used in `index_read`/`block_read` has never been allocated.
    InvalidBlockId(u64),
    /// CAS mismatch: `(expected, found)`.
    InvalidCAS(u64, u64),
    /// B-tree invariant violated; indicates a bug, not user error.
    InvalidTree(String),
    /// Value exceeds the configured maximum.
    TooLarge(usize, usize),
    /// A fiber waited on a signal that was pulsed for cancellation.
    Interrupted,
    /// A blocking wait exceeded its deadline.
    Timeout,
    /// A background thread terminated unexpectedly.
    ThreadFail(String),
    /// The other end of a channel has gone away.
    Disconnected,
    /// Code path that should be impossible to reach outside of a bug.
    UnReachable(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::IoError(err) => write!(f, "IoError: {}", err),
            Error::PartialIo(msg, want, got) => {
                write!(f, "PartialIo: {} want:{} got:{}", msg, want, got)
            }
            Error::Corruption(msg) => write!(f, "Corruption: {}", msg),
            Error::DecodeFail(msg) => write!(f, "DecodeFail: {}", msg),
            Error::EncodeFail(msg) => write!(f, "EncodeFail: {}", msg),
            Error::FailConversion(msg) => write!(f, "FailConversion: {}", msg),
            Error::InvalidFile(msg) => write!(f, "InvalidFile: {}", msg),
            Error::InvalidFormat(msg) => write!(f, "InvalidFormat: {}", msg),
            Error::KeyNotFound => write!(f, "KeyNotFound"),
            Error::InvalidBlockId(id) => write!(f, "InvalidBlockId: {}", id),
            Error::InvalidCAS(want, got) => {
                write!(f, "InvalidCAS: expected:{} found:{}", want, got)
            }
            Error::InvalidTree(msg) => write!(f, "InvalidTree: {}", msg),
            Error::TooLarge(n, max) => write!(f, "TooLarge: {} > {}", n, max),
            Error::Interrupted => write!(f, "Interrupted"),
            Error::Timeout => write!(f, "Timeout"),
            Error::ThreadFail(msg) => write!(f, "ThreadFail: {}", msg),
            Error::Disconnected => write!(f, "Disconnected"),
            Error::UnReachable(msg) => write!(f, "UnReachable: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

impl PartialEq for Error {
    fn eq(&self, other: &Self) -> bool {
        format!("{:?}", self) == format!("{:?}", other)
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Error {
        Error::IoError(err)
    }
}

impl<T> From<mpsc::SendError<T>> for Error {
    fn from(_: mpsc::SendError<T>) -> Error {
        Error::Disconnected
    }
}

impl From<mpsc::RecvError> for Error {
    fn from(_: mpsc::RecvError) -> Error {
        Error::Disconnected
    }
}

impl From<mpsc::RecvTimeoutError> for Error {
    fn from(err: mpsc::RecvTimeoutError) -> Error {
        match err {
            mpsc::RecvTimeoutError::Timeout => Error::Timeout,
            mpsc::RecvTimeoutError::Disconnected => Error::Disconnected,
        }
    }
}
