//! Error types for identifier codecs and sequence allocation.

use thiserror::Error;

/// Errors that can occur when building a codec or advancing a sequence.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IdError {
    /// The prefix is empty.
    #[error("ID prefix cannot be empty")]
    EmptyPrefix,

    /// The prefix contains characters that would make suffix parsing ambiguous.
    #[error("invalid ID prefix '{prefix}': only ASCII letters, '-' and '_' are allowed")]
    InvalidPrefix { prefix: String },

    /// The padding width is outside the supported range.
    #[error("invalid ID width {width}: expected 1..={max}")]
    InvalidWidth { width: usize, max: usize },

    /// The sequence has reached the largest representable number.
    #[error("sequence for prefix '{prefix}' is exhausted")]
    Exhausted { prefix: String },
}
