use thiserror::Error;

/// Kinds of failure the crypto engine can report.
#[derive(Debug, Error, PartialEq, Eq, Clone, Copy)]
pub enum CryptoErrorKind {
    #[error("invalid input")]
    InvalidInput,
    #[error("identity missing")]
    MissingIdentity,
    #[error("underlying primitive failed")]
    Primitive,
}

#[derive(Debug, Error)]
#[error("crypto error: {kind}")]
pub struct CryptoError {
    pub kind: CryptoErrorKind,
}

impl CryptoError {
    pub fn new(kind: CryptoErrorKind) -> Self {
        CryptoError { kind }
    }
}

/// Signature or MAC failure on ingress. Never surfaced to
/// history; the offending message is discarded and logged.
#[derive(Debug, Error)]
#[error("integrity check failed: {0}")]
pub struct IntegrityError(pub String);

/// Corrupted or inaccessible key storage.
#[derive(Debug, Error)]
pub enum VaultError {
    #[error("vault entry `{0}` not found")]
    NotFound(&'static str),
    #[error("vault entry `{field}` has wrong length: expected {expected}, got {actual}")]
    WrongLength {
        field: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("vault I/O failure: {0}")]
    Io(String),
}

/// Missing identity, bad signature, stale timestamp. Identity is
/// preserved; the caller is expected to prompt for a new session.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("no identity available")]
    NoIdentity,
    #[error("hub rejected authentication")]
    Rejected,
    #[error("authentication timed out")]
    TimedOut,
}

/// Transport-level failures: recovered via reconnect, surfaced
/// only as `connected=false` to callers.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("not connected")]
    NotConnected,
    #[error("connect failed: {0}")]
    ConnectFailed(String),
    #[error("send failed: {0}")]
    SendFailed(String),
    #[error("request timed out")]
    Timeout,
}

/// Malformed frame, unknown `type`, missing field. The offending
/// frame is dropped and logged; the connection is retained.
#[derive(Debug, Error)]
#[error("protocol error: {0}")]
pub struct ProtocolError(pub String);

/// Hub rejected `register`; surfaced to the caller as a dedicated
/// error rather than folded into the generic protocol error.
#[derive(Debug, Error)]
pub enum RegistrationError {
    #[error("hub rejected registration: {0}")]
    Rejected(String),
    #[error("registration timed out")]
    TimedOut,
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Crypto(#[from] CryptoError),
    #[error(transparent)]
    Integrity(#[from] IntegrityError),
    #[error(transparent)]
    Vault(#[from] VaultError),
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error(transparent)]
    Registration(#[from] RegistrationError),
    #[error(transparent)]
    Wire(#[from] wire::WireError),
}
