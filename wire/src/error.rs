use thiserror::Error;

/// Errors raised while decoding or validating wire-level data.
#[derive(Debug, Error)]
pub enum WireError {
    #[error("invalid user id {0:?}: expected 16 uppercase hex characters")]
    InvalidUserId(String),

    #[error("invalid base64 in field `{field}`: {source}")]
    InvalidBase64 {
        field: &'static str,
        #[source]
        source: base64::DecodeError,
    },

    #[error("field `{field}` has length {actual}, expected {expected}")]
    WrongLength {
        field: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("failed to decode frame: {0}")]
    Decode(#[from] serde_json::Error),
}
