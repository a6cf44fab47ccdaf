//! Formatting and parsing of `{prefix}{zero-padded digits}` identifiers.

use std::fmt;

use crate::IdError;

/// Largest supported padding width (`u64::MAX` has 20 decimal digits).
pub const MAX_WIDTH: usize = 20;

/// Formats `n` as `prefix` followed by `n` zero-padded to at least `width` digits.
///
/// Numbers wider than `width` are never truncated.
#[must_use]
pub fn format_id(prefix: &str, width: usize, n: u64) -> String {
    format!("{prefix}{n:0width$}")
}

/// Parses the numeric suffix of `candidate`.
///
/// Returns `None` unless `candidate` is exactly `prefix` followed by one or
/// more ASCII digits. Leading zeros are ignored. Suffixes that do not fit in a
/// `u64` are also rejected.
#[must_use]
pub fn parse_id(prefix: &str, candidate: &str) -> Option<u64> {
    parse_digits(candidate.strip_prefix(prefix)?)
}

fn parse_digits(digits: &str) -> Option<u64> {
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// A validated prefix/width pair for one entity's business identifiers.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SequenceCodec {
    prefix: String,
    width: usize,
}

impl SequenceCodec {
    /// Creates a codec, validating the prefix and width.
    ///
    /// Prefixes are restricted to ASCII letters, `-` and `_` so that the
    /// boundary between prefix and digits is unambiguous.
    pub fn new(prefix: impl Into<String>, width: usize) -> Result<Self, IdError> {
        let prefix = prefix.into();
        if prefix.is_empty() {
            return Err(IdError::EmptyPrefix);
        }
        if !prefix
            .chars()
            .all(|c| c.is_ascii_alphabetic() || c == '-' || c == '_')
        {
            return Err(IdError::InvalidPrefix { prefix });
        }
        if !(1..=MAX_WIDTH).contains(&width) {
            return Err(IdError::InvalidWidth {
                width,
                max: MAX_WIDTH,
            });
        }
        Ok(Self { prefix, width })
    }

    /// The identifier prefix, e.g. `"BLD"`.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// The nominal zero-padding width.
    pub fn width(&self) -> usize {
        self.width
    }

    /// Formats sequence number `n`.
    #[must_use]
    pub fn format(&self, n: u64) -> String {
        format_id(&self.prefix, self.width, n)
    }

    /// Parses an identifier with an exact-case prefix.
    #[must_use]
    pub fn parse(&self, candidate: &str) -> Option<u64> {
        parse_id(&self.prefix, candidate)
    }

    /// Parses an identifier, accepting the prefix in any ASCII case.
    #[must_use]
    pub fn parse_ignore_case(&self, candidate: &str) -> Option<u64> {
        parse_digits(self.strip_prefix_ignore_case(candidate)?)
    }

    /// Returns true if `candidate` has the shape `^prefix\d+$`, ignoring the
    /// case of the prefix. Unlike [`Self::parse_ignore_case`] this accepts
    /// digit runs too long to fit a `u64`.
    #[must_use]
    pub fn matches_ignore_case(&self, candidate: &str) -> bool {
        self.strip_prefix_ignore_case(candidate)
            .is_some_and(|digits| !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()))
    }

    fn strip_prefix_ignore_case<'a>(&self, candidate: &'a str) -> Option<&'a str> {
        let head = candidate.get(..self.prefix.len())?;
        if head.eq_ignore_ascii_case(&self.prefix) {
            candidate.get(self.prefix.len()..)
        } else {
            None
        }
    }
}

impl fmt::Display for SequenceCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.prefix, "#".repeat(self.width))
    }
}
