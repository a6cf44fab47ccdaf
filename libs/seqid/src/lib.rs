//! # hms-seqid
//!
//! Human-readable sequential identifiers for hospital records.
//!
//! ## ID Format
//!
//! Every business identifier is `{prefix}{digits}`, where the digits are the
//! base-10 sequence number left-padded with zeros to a fixed width:
//!
//! - `P0001` (patients)
//! - `BLD0042` (bill details)
//! - `RAD12345` (receipt adjustments, past the nominal width)
//!
//! The numeric space is not capped: once a sequence number needs more digits
//! than the nominal width, the identifier simply grows.
//!
//! Allocation is derived from the identifiers currently in use (see
//! [`next_in_sequence`]), never from a persisted counter, so deleting the
//! record holding the highest number frees that number for reuse.

mod codec;
mod error;
mod sequence;

pub use codec::{format_id, parse_id, SequenceCodec, MAX_WIDTH};
pub use error::IdError;
pub use sequence::{max_suffix, next_in_sequence};
