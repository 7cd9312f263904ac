//! Structured error types shared by producer and observer.

use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum FactError {
    #[error("fact value {0} is outside (0, 2^53]")]
    OutOfRange(u64),
}

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("delta expects {expected} but target is {found}")]
    TypeMismatch { expected: &'static str, found: &'static str },

    #[error("array item is missing identity field `{0}`")]
    MissingKey(String),

    #[error("no array item with identity `{0}`")]
    UnknownKey(String),

    #[error("insert index {index} is past the end of an array of length {len}")]
    IndexOutOfRange { index: usize, len: usize },

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}
