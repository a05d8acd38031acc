//! Error types for fprust-core

use crate::print::PrintKind;

/// Result type alias for print and matching operations
pub type Result<T> = std::result::Result<T, Error>;

/// Print data and matching errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Unknown format tag or buffer shorter than the fixed header
    #[error("Invalid print format: {0}")]
    InvalidFormat(String),

    /// Item list inconsistent with the buffer length
    #[error("Corrupt print data: {0}")]
    CorruptData(String),

    /// Driver, devtype or kind mismatch between two prints
    #[error("Incompatible print: {0}")]
    Incompatible(String),

    /// Input the operation cannot handle (e.g. a multi-template probe)
    #[error("Unsupported input: {0}")]
    UnsupportedInput(String),

    /// The scorer failed while processing a template
    #[error("Matcher failure: {0}")]
    MatchError(String),

    /// Nothing to serialize
    #[error("Print holds no data items")]
    EmptyPrint,

    /// The print kind can only be assigned once
    #[error("Print kind already set to {current:?}")]
    KindAlreadySet {
        current: PrintKind,
    },

    /// Payload mutation for the wrong kind of print
    #[error("Print kind mismatch: expected {expected:?}, print is {actual:?}")]
    KindMismatch {
        expected: PrintKind,
        actual: PrintKind,
    },

    /// Caller supplied data the operation cannot use
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl Error {
    /// Check if error comes from a malformed stored buffer
    pub fn is_data_error(&self) -> bool {
        matches!(self, Self::InvalidFormat(_) | Self::CorruptData(_))
    }
}
