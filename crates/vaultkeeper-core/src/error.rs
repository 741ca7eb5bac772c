//! Error types for the Vaultkeeper core.

use thiserror::Error;

/// Core errors raised while decoding or interpreting model values.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    #[error("unknown {kind}: {value}")]
    UnknownVariant { kind: &'static str, value: String },

    #[error("encoding error: {0}")]
    EncodingError(String),

    #[error("decoding error: {0}")]
    DecodingError(String),
}

/// Validation errors for grant rows and permission requests.
///
/// These are rejected at the API boundary, before anything is persisted.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("partial grant for {0} cannot carry write access")]
    PartialWithWrite(String),

    #[error("principal {0} appears more than once in the request")]
    DuplicatePrincipal(String),

    #[error("request leaves no principal with full write access")]
    NoWriter,

    #[error("request is empty")]
    Empty,

    #[error("mandatory field {0} is missing or empty")]
    MissingField(String),
}
