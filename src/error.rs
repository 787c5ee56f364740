//! Error types for the export engine.
//!
//! - [`ServiceError`] - a single call to the export service failed
//! - [`ExportError`] - why an export attempt could not deliver a file
//!
//! The engine converts every [`ExportError`] into a state reset plus an error
//! notice. Only [`ExportError::Busy`] is returned to the session's caller.

use thiserror::Error;

/// Errors from one call to the export service.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Connection, timeout, or body read failure.
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// The service answered with a non-success status.
    #[error("server returned {status}: {body}")]
    Status { status: u16, body: String },

    /// The response body could not be interpreted.
    #[error("invalid response: {0}")]
    Decode(String),
}

/// Errors that end (or, for transient poll failures, interrupt) an attempt.
#[derive(Debug, Error)]
pub enum ExportError {
    /// Job creation failed; no polling was started.
    #[error("export job submission failed: {0}")]
    Submission(#[source] ServiceError),

    /// A single status query failed and is retried on the next tick.
    #[error("progress query failed ({consecutive} in a row): {source}")]
    PollTransient {
        consecutive: u32,
        #[source]
        source: ServiceError,
    },

    /// Too many status queries failed in a row.
    #[error("progress query failed {failures} times in a row")]
    PollExhausted { failures: u32 },

    /// The server ran the job and reported failure.
    #[error("export job failed: {message}")]
    JobFailed { message: String },

    /// The direct export request failed.
    #[error("export failed: {0}")]
    SyncExport(#[source] ServiceError),

    /// Fetching the finished job's file failed.
    #[error("download failed: {0}")]
    Download(#[source] ServiceError),

    /// The file arrived but could not be written.
    #[error("failed to save export: {0}")]
    Save(#[from] std::io::Error),

    /// Another attempt is still running in this session.
    #[error("an export is already in progress")]
    Busy,
}
