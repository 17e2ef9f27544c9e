//! Strict decimal parsing shared by embedding layers.

use crate::error::RingError;

/// Parses a textual decimal into an `f64`.
///
/// Accepts `inf`, `-inf` and `nan` case-insensitively so that every
/// embedding language observes the same spellings. Surrounding whitespace
/// is ignored; any other trailing character rejects the whole input. Not
/// locale sensitive.
pub fn parse_float(s: &str) -> Result<f64, RingError> {
    s.trim()
        .parse()
        .map_err(|_| RingError::BadFloat(s.to_string()))
}
