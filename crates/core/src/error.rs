//! Unified error types for doccache.
//!
//! Every variant renders with an upper-case code prefix so log lines and
//! tool responses can be matched on the code alone.

use rmcp::model::{ErrorCode, ErrorData as McpError};

/// Unified error type for the cache engine.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid input parameters (e.g., an empty cache name).
    #[error("INVALID_INPUT: {0}")]
    InvalidInput(String),

    /// No stored entry (or archive) for the requested key.
    #[error("CACHE_MISS: {0}")]
    CacheMiss(String),

    /// The named cache is not configured.
    #[error("UNKNOWN_CACHE: {0}")]
    UnknownCache(String),

    /// The document id cannot be mapped onto the shard layout.
    #[error("INVALID_DOC_ID: {0}")]
    InvalidDocId(String),

    /// Filesystem operation failed.
    #[error("IO_ERROR: {0}")]
    Io(#[from] std::io::Error),

    /// The remote document source returned an error.
    #[error("SOURCE_FAILED: {0}")]
    SourceFailed(String),

    /// The remote document source did not answer in time.
    #[error("SOURCE_TIMEOUT: {0}")]
    SourceTimeout(String),

    /// A transform pipeline rejected or failed on a document.
    #[error("TRANSFORM_FAILED: {0}")]
    TransformFailed(String),

    /// Building or replacing a snapshot archive failed.
    #[error("ARCHIVE_FAILED: {0}")]
    ArchiveFailed(String),

    /// A forced refresh finished with failed documents.
    #[error("REFRESH_INCOMPLETE: {failed} of {total} documents failed in cache '{cache}'")]
    RefreshIncomplete { cache: String, failed: usize, total: usize },

    /// A blocking filesystem task was cancelled or panicked.
    #[error("TASK_FAILED: {0}")]
    TaskFailed(String),
}

impl From<zip::result::ZipError> for Error {
    fn from(err: zip::result::ZipError) -> Self {
        Error::ArchiveFailed(err.to_string())
    }
}

impl From<tokio::task::JoinError> for Error {
    fn from(err: tokio::task::JoinError) -> Self {
        Error::TaskFailed(err.to_string())
    }
}

impl Error {
    /// Whether this error means "nothing stored here" rather than a failure.
    pub fn is_miss(&self) -> bool {
        matches!(self, Error::CacheMiss(_))
    }
}

impl From<Error> for McpError {
    fn from(err: Error) -> Self {
        let (code, message) = match &err {
            Error::InvalidInput(msg) => (-32602, msg.clone()),
            Error::InvalidDocId(msg) => (-32602, format!("invalid document id: {msg}")),
            Error::CacheMiss(msg) => (-32001, msg.clone()),
            Error::UnknownCache(name) => (-32003, format!("unknown cache: {name}")),
            Error::Io(e) => (-32002, e.to_string()),
            Error::SourceFailed(msg) => (-32004, msg.clone()),
            Error::SourceTimeout(msg) => (-32005, msg.clone()),
            Error::TransformFailed(msg) => (-32006, msg.clone()),
            Error::ArchiveFailed(msg) => (-32007, msg.clone()),
            Error::RefreshIncomplete { .. } => (-32008, err.to_string()),
            Error::TaskFailed(msg) => (-32000, msg.clone()),
        };

        McpError { code: ErrorCode(code), message: message.into(), data: None }
    }
}
