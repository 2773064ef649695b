//! Error types for exact-match engine operations

use crate::parity::ParityError;
use thiserror::Error;

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, ExmError>;

/// Errors that can occur while configuring or querying the engine
#[derive(Debug, Error)]
pub enum ExmError {
    /// Configuration refused (missing or mis-sized matrix, width mismatch)
    #[error("Configuration error: {reason}")]
    Config {
        /// Reason for refusal
        reason: String,
    },

    /// Computed or requested address outside the physical array
    #[error("{what} index {index} out of range (limit {limit})")]
    Range {
        /// Which coordinate overflowed
        what: &'static str,
        /// Offending index
        index: u64,
        /// Exclusive upper bound
        limit: u64,
    },

    /// Stored parity does not match recomputed parity
    #[error(transparent)]
    Parity(#[from] ParityError),

    /// Config-write journal could not be decoded
    #[error("Journal error at byte {offset}: {reason}")]
    Journal {
        /// Byte offset of the failing record
        offset: usize,
        /// Reason for failure
        reason: String,
    },

    /// I/O error while reading or writing a journal
    #[error("I/O error: {source}")]
    Io {
        /// Underlying I/O error
        #[from]
        source: std::io::Error,
    },
}

impl ExmError {
    /// Create a configuration error
    pub fn config(reason: impl Into<String>) -> Self {
        Self::Config {
            reason: reason.into(),
        }
    }

    /// Create a range error
    pub fn range(what: &'static str, index: impl Into<u64>, limit: impl Into<u64>) -> Self {
        Self::Range {
            what,
            index: index.into(),
            limit: limit.into(),
        }
    }

    /// Create a journal decode error
    pub fn journal(offset: usize, reason: impl Into<String>) -> Self {
        Self::Journal {
            offset,
            reason: reason.into(),
        }
    }

    /// True for errors that must abort the configuring transaction.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::Parity(_))
    }
}
