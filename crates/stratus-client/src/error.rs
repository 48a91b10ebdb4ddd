//! Client error types

use stratus_crypto::CryptoError;
use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, ClientError>;

/// Client errors
#[derive(Error, Debug)]
pub enum ClientError {
    /// No hierarchy key could decrypt a metadata blob
    #[error("key mismatch: no available key could decrypt the metadata")]
    KeyMismatch,

    /// A single chunk failed to upload; the caller may retry that index
    #[error("chunk {index} failed to upload: {reason}")]
    ChunkUploadFailed { index: u64, reason: String },

    /// Cancelled while waiting for a storage assignment
    #[error("upload aborted before a storage location was assigned")]
    UploadAborted,

    /// The server rejected the completion request
    #[error("upload completion rejected: {0}")]
    UploadFinalizeFailed(String),

    /// A first attempt at a chunk skipped ahead of the read order
    #[error("chunk {index} sent before chunk {expected}")]
    OutOfOrderChunk { index: u64, expected: u64 },

    /// Finalize was called on a non-empty file with no successful chunk
    #[error("no chunk of the upload succeeded")]
    NoChunksUploaded,

    /// One target of a propagation fan-out failed
    #[error("propagation failed for {target}: {source}")]
    PropagationPartialFailure {
        target: String,
        #[source]
        source: Box<ClientError>,
    },

    /// The object variant is not valid for the operation
    #[error("unsupported object variant: {0}")]
    UnsupportedObjectVariant(&'static str),

    /// Transport-level failure outside HTTP (e.g. injected by a test transport)
    #[error("transport error: {0}")]
    Transport(String),

    /// API error envelope
    #[error("API error ({code}): {message}")]
    Api { code: String, message: String },

    /// HTTP request error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Encryption error
    #[error("Encryption error: {0}")]
    Encryption(CryptoError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid response
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// The caller's cancellation token fired
    #[error("operation cancelled")]
    Cancelled,
}

impl From<CryptoError> for ClientError {
    fn from(err: CryptoError) -> Self {
        match err {
            CryptoError::KeyMismatch => ClientError::KeyMismatch,
            other => ClientError::Encryption(other),
        }
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(err: serde_json::Error) -> Self {
        ClientError::Encryption(CryptoError::Serialization(err.to_string()))
    }
}

impl ClientError {
    /// Parse an API error from a JSON envelope body
    pub fn from_api_body(body: &str, status: u16) -> Self {
        let envelope: Option<serde_json::Value> = serde_json::from_str(body).ok();
        let field = |name: &str| {
            envelope
                .as_ref()
                .and_then(|v| v.get(name))
                .and_then(|v| v.as_str())
                .map(str::to_string)
        };

        Self::Api {
            code: field("code").unwrap_or_else(|| format!("HTTP{}", status)),
            message: field("message").unwrap_or_else(|| "Unknown error".to_string()),
        }
    }

    /// Wrap a fan-out failure with the target it was working on
    pub fn propagation(target: impl Into<String>, source: ClientError) -> Self {
        match source {
            // Already attributed by a nested fan-out, or not a target failure
            err @ (Self::PropagationPartialFailure { .. } | Self::Cancelled) => err,
            other => Self::PropagationPartialFailure {
                target: target.into(),
                source: Box::new(other),
            },
        }
    }

    /// Check if this is a key mismatch, possibly inside a fan-out failure
    pub fn is_key_mismatch(&self) -> bool {
        match self {
            Self::KeyMismatch => true,
            Self::PropagationPartialFailure { source, .. } => source.is_key_mismatch(),
            _ => false,
        }
    }

    /// Check if this error is terminal for an upload session
    pub fn is_terminal_for_upload(&self) -> bool {
        matches!(
            self,
            Self::UploadAborted | Self::UploadFinalizeFailed(_) | Self::NoChunksUploaded
        )
    }
}
