use std::time::Duration;

use thiserror::Error;

use crate::messaging::request_id::RequestId;


/// Reasons why a datagram could not be turned into a message. These are contained where they
///  occur: the datagram is logged and dropped, never answered.
#[derive(Error, Debug, Clone, Eq, PartialEq)]
pub enum DecodeError {
    #[error("datagram is truncated")]
    Truncated,
    #[error("unsupported protocol version {0}")]
    UnsupportedVersion(u8),
    #[error("invalid {what} discriminator {value}")]
    InvalidDiscriminator { what: &'static str, value: u8 },
    #[error("invalid varint")]
    InvalidVarInt,
    #[error("string is not valid UTF-8")]
    InvalidUtf8,
    #[error("checksum mismatch: expected {expected:016x}, was {actual:016x}")]
    ChecksumMismatch { expected: u64, actual: u64 },
    #[error("{0} unexpected trailing bytes")]
    TrailingBytes(usize),
    #[error("expected a {expected} message, was {actual}")]
    UnexpectedMessage { expected: &'static str, actual: &'static str },
}

impl From<bytes::TryGetError> for DecodeError {
    fn from(_: bytes::TryGetError) -> Self {
        DecodeError::Truncated
    }
}

/// Failure of a single logical client call.
#[derive(Error, Debug)]
pub enum ClientError {
    /// No matching response arrived in time. The call may be retried with a fresh request.
    #[error("no response for request {request_id} within {timeout:?}")]
    Timeout { request_id: RequestId, timeout: Duration },
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),
    #[error("could not encode request: {0}")]
    Encode(anyhow::Error),
    #[error("request id {0} is already pending")]
    DuplicateRequest(RequestId),
    #[error(transparent)]
    Command(#[from] CommandExecuteError),
    #[error("client is shutting down")]
    Shutdown,
}

impl ClientError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, ClientError::Timeout { .. })
    }
}

/// Rejection of a hand-off between pipeline stages.
#[derive(Error, Debug, Clone, Eq, PartialEq)]
pub enum SubmitError {
    #[error("queue of stage '{stage}' is full")]
    QueueFull { stage: &'static str },
    #[error("stage '{stage}' is shut down")]
    Closed { stage: &'static str },
}

/// Client-side failure to turn user input into a request body.
#[derive(Error, Debug, Clone, Eq, PartialEq)]
pub enum CommandExecuteError {
    #[error("unknown command '{0}'")]
    UnknownCommand(String),
    #[error("{0}")]
    WrongArguments(String),
}
