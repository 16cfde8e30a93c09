use std::fmt::Display;

use alloy::primitives::B256;
use displaydoc::Display;
use serde::Serialize;
use thiserror::Error;

/// Result type used across the SDK.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Failures of the transport between the client and the chain endpoint.
#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    /// Endpoint is unreachable: {0}
    Unreachable(String),
    /// Request timed out: {0}
    Timeout(String),
    /// TLS handshake failed: {0}
    Tls(String),
    /// Transport failure: {0}
    Transport(String),
}

/// Reasons a node refused to accept a signed transaction.
#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum SubmissionError {
    /// Insufficient funds to cover gas: {0}
    InsufficientFunds(String),
    /// Nonce too low: {0}
    NonceTooLow(String),
    /// Nonce too high: {0}
    NonceTooHigh(String),
    /// Nonce is already used by a pending transaction: {0}
    NonceConflict(String),
    /// Malformed transaction: {0}
    Malformed(String),
    /// Transaction rejected by the node: {0}
    Rejected(String),
}

impl SubmissionError {
    /// Nonce problems go away once the caller refreshes the nonce.
    pub fn is_nonce_error(&self) -> bool {
        matches!(
            self,
            SubmissionError::NonceTooLow(_)
                | SubmissionError::NonceTooHigh(_)
                | SubmissionError::NonceConflict(_)
        )
    }
}

/// Represents every failure the DID registry client can report.
#[derive(Debug, Display, Error)]
pub enum Error {
    /// Invalid argument: {0}
    InvalidArgument(String),
    /// Connection error: {0}
    Connection(#[from] ConnectionError),
    /// Node returned an error response (code {code}): {message}
    Rpc {
        code: i64,
        message: String,
        data: Option<String>,
    },
    /// Invalid private key: {0}
    Key(String),
    /// Failed to encode call: {0}
    Encoding(String),
    /// Failed to decode response: {0}
    Decoding(String),
    /// Transaction submission failed: {0}
    Submission(#[from] SubmissionError),
    /// Execution reverted: {0}
    Reverted(String),
    /// DID {0} already exists
    AlreadyExists(String),
    /// DID {0} does not exist
    NotFound(String),
    /// Transaction {tx_hash} not confirmed after {elapsed}, outcome unknown
    Timeout {
        tx_hash: B256,
        elapsed: humantime::Duration,
    },
    /// Confirmation polling for transaction {0} was cancelled
    Cancelled(B256),
}

/// Stable numeric status codes reported next to every operation result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[repr(u64)]
pub enum ErrorCode {
    Success = 0,
    InvalidArgument = 1,
    Connection = 2,
    Rpc = 3,
    Decoding = 4,
    Encoding = 5,
    Key = 6,
    Submission = 7,
    Reverted = 8,
    AlreadyExists = 9,
    NotFound = 10,
    Timeout = 11,
    Cancelled = 12,
}

impl Error {
    pub fn code(&self) -> ErrorCode {
        match self {
            Error::InvalidArgument(_) => ErrorCode::InvalidArgument,
            Error::Connection(_) => ErrorCode::Connection,
            Error::Rpc { .. } => ErrorCode::Rpc,
            Error::Key(_) => ErrorCode::Key,
            Error::Encoding(_) => ErrorCode::Encoding,
            Error::Decoding(_) => ErrorCode::Decoding,
            Error::Submission(_) => ErrorCode::Submission,
            Error::Reverted(_) => ErrorCode::Reverted,
            Error::AlreadyExists(_) => ErrorCode::AlreadyExists,
            Error::NotFound(_) => ErrorCode::NotFound,
            Error::Timeout { .. } => ErrorCode::Timeout,
            Error::Cancelled(_) => ErrorCode::Cancelled,
        }
    }

    /// Whether repeating the same call may succeed.
    ///
    /// Connection failures are transient. Nonce errors clear after the nonce is refreshed.
    /// A confirmation timeout leaves the outcome unknown, so polling again is safe.
    /// Everything else is terminal and must not be retried silently.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Connection(_) => true,
            Error::Submission(e) => e.is_nonce_error(),
            Error::Timeout { .. } => true,
            _ => false,
        }
    }
}

/// Flat result of a registry operation: a payload, a numeric code and a message.
///
/// An empty message and code `0` mean success.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OperationResult {
    pub payload: String,
    pub code: u64,
    pub message: String,
}

impl OperationResult {
    pub fn success(payload: impl Into<String>) -> Self {
        Self {
            payload: payload.into(),
            code: ErrorCode::Success as u64,
            message: String::new(),
        }
    }

    pub fn failure(error: &Error) -> Self {
        Self {
            payload: String::new(),
            code: error.code() as u64,
            message: error.to_string(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.code == ErrorCode::Success as u64
    }
}

impl<T: Display> From<Result<T>> for OperationResult {
    fn from(result: Result<T>) -> Self {
        match result {
            Ok(payload) => Self::success(payload.to_string()),
            Err(e) => Self::failure(&e),
        }
    }
}
