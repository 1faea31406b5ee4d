//! SPDZ error type.

use std::fmt;
use std::io;

#[derive(Debug)]
pub enum SpdzError {
    /// The pre-allocated triple budget ran out mid-operation. Fatal.
    TriplesExhausted,
    /// Channel failure while opening shares or dealing triples.
    Io(io::Error),
    /// A wire value was not a valid curve point or field element.
    Point(String),
}

impl fmt::Display for SpdzError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SpdzError::TriplesExhausted => write!(f, "beaver triple supply exhausted"),
            SpdzError::Io(e) => write!(f, "spdz channel: {}", e),
            SpdzError::Point(m) => write!(f, "bad point: {}", m),
        }
    }
}

impl From<io::Error> for SpdzError {
    fn from(e: io::Error) -> SpdzError {
        SpdzError::Io(e)
    }
}
