//! Next-identifier computation over the identifiers currently in use.

use crate::{IdError, SequenceCodec};

/// Returns the greatest sequence number among `existing`.
///
/// Only identifiers shaped like `^prefix\d+$` (prefix matched without regard
/// to case) take part. A matching identifier whose digits cannot be parsed
/// counts as `0`. Returns `0` when nothing matches.
pub fn max_suffix<'a, I>(codec: &SequenceCodec, existing: I) -> u64
where
    I: IntoIterator<Item = &'a str>,
{
    existing
        .into_iter()
        .filter(|id| codec.matches_ignore_case(id))
        .map(|id| codec.parse_ignore_case(id).unwrap_or(0))
        .max()
        .unwrap_or(0)
}

/// Computes the next unused identifier: one past [`max_suffix`].
///
/// The result is unused at the time `existing` was captured; it is not
/// reserved.
pub fn next_in_sequence<'a, I>(codec: &SequenceCodec, existing: I) -> Result<String, IdError>
where
    I: IntoIterator<Item = &'a str>,
{
    let next = max_suffix(codec, existing)
        .checked_add(1)
        .ok_or_else(|| IdError::Exhausted {
            prefix: codec.prefix().to_string(),
        })?;
    Ok(codec.format(next))
}
