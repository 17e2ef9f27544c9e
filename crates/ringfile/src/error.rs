//! Error types for ring buffer operations.

use thiserror::Error;

/// Errors surfaced by ring buffer operations.
#[derive(Debug, Error)]
pub enum RingError {
    /// The ring is full (archive mode) and cannot accept the reservation.
    #[error("no more room in ring buffer")]
    NoMoreRoom,

    /// No committed record is available yet.
    #[error("ring buffer is empty")]
    Empty,

    /// The streaming cursor caught up with the last committed record and no
    /// producer is active.
    #[error("end of stream")]
    EndOfStream,

    /// The mapped content is inconsistent (bad length prefix, impossible tag).
    /// The ring is unusable without external intervention.
    #[error("invalid ring buffer content: {0}")]
    InvalidBuffer(&'static str),

    /// Creating, mapping or unmapping the backing file failed.
    #[error("ring buffer file error: {0}")]
    Io(#[from] std::io::Error),

    /// A textual decimal could not be parsed as a 64-bit float.
    #[error("cannot parse {0:?} as a float")]
    BadFloat(String),
}

impl RingError {
    /// Returns `true` if the caller may simply retry later (`NoMoreRoom`,
    /// `Empty`).
    #[inline]
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::NoMoreRoom | Self::Empty)
    }

    /// Returns `true` if the ring is unusable without operator intervention.
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::InvalidBuffer(_) | Self::Io(_))
    }
}
