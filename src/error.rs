//! Error types for mtwire-client.

use thiserror::Error;

use crate::codec::TypeTag;
use crate::rpc::RequestId;

/// Main error type for all mtwire operations.
#[derive(Debug, Error)]
pub enum MtwireError {
    /// Requested bucket is larger than the biggest configured size class.
    #[error("Requested {requested} bytes but the largest bucket is {max} bytes")]
    SizeExceeded { requested: usize, max: usize },

    /// A bucket request was cancelled before a bucket became free.
    #[error("Bucket request cancelled")]
    Cancelled,

    /// Cursor or used-length would leave the bucket's capacity.
    #[error("Range {offset}+{length} does not fit bucket capacity {capacity}")]
    InvalidRange {
        offset: usize,
        length: usize,
        capacity: usize,
    },

    /// A decoded message had no pending request waiting for it.
    #[error("No pending request for response type {0}")]
    UnmatchedResponse(TypeTag),

    /// Length or checksum mismatch while reassembling a packet.
    #[error("Framing corruption: {0}")]
    FramingCorruption(String),

    /// Arena or session configuration rejected at construction.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// A pending request already holds a response.
    #[error("Request {0} is already resolved")]
    AlreadyResolved(RequestId),

    /// The request id is not tracked (consumed, cancelled or never registered).
    #[error("Unknown request {0}")]
    UnknownRequest(RequestId),

    /// No decoder registered for the type tag.
    #[error("No decoder registered for type {0}")]
    UnknownType(TypeTag),

    /// Malformed message envelope or body.
    #[error("Decode error: {0}")]
    Decode(String),

    /// I/O error on the underlying stream.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error (configuration loading).
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// MsgPack serialization error.
    #[error("MsgPack encode error: {0}")]
    MsgPackEncode(#[from] rmp_serde::encode::Error),

    /// MsgPack deserialization error.
    #[error("MsgPack decode error: {0}")]
    MsgPackDecode(#[from] rmp_serde::decode::Error),

    /// Connection closed unexpectedly.
    #[error("Connection closed")]
    ConnectionClosed,

    /// No response arrived within the request timeout.
    #[error("Request timed out")]
    Timeout,
}

/// Result type alias using MtwireError.
pub type Result<T> = std::result::Result<T, MtwireError>;
