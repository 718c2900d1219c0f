use thiserror::Error;

/// errors raised by the layout engine and the page selection logic
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// unknown preset/mode name, non-positive dimension, bad list position
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// malformed page range specification
    #[error("{0}")]
    ParseError(String),

    /// request is well formed but cannot be carried out
    #[error("{0}")]
    InvalidOperation(String),
}

pub type Result<T> = std::result::Result<T, Error>;
