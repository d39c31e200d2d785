// Error taxonomy for the verification protocol.
//
// Validation errors are recoverable by the caller; session errors close the
// connection with a policy code; transient infrastructure errors are retried
// with a bounded budget before escalating to a terminal ERROR.

use thiserror::Error;

/// A single inbound frame could not be turned into a raw image.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("frame payload is empty")]
    Empty,
    #[error("frame payload is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("frame payload is not a decodable image: {0}")]
    Image(#[from] image::ImageError),
}

#[derive(Debug, Error)]
pub enum ChallengeError {
    #[error("challenge catalog needs at least 2 distinct kinds, found {0}")]
    CatalogTooSmall(usize),
}

/// Failure of one external scoring capability on one frame.
#[derive(Debug, Error)]
pub enum CapabilityError {
    #[error("scoring capability '{name}' timed out after {timeout_ms}ms")]
    Timeout { name: &'static str, timeout_ms: u64 },
    #[error("scoring capability '{name}' failed: {reason}")]
    Failed { name: &'static str, reason: String },
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("session {0} not found")]
    SessionNotFound(String),
    #[error("store backend unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("failed to encode token claims: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport closed: {0}")]
    Closed(String),
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}
