//! Error types for the correlation engine

use thiserror::Error;

/// Errors surfaced by the engine to its callers.
///
/// Internal ring and matching logic never fails; only operations that cross
/// into an external collaborator can, and those are surfaced here without
/// being retried.
#[derive(Debug, Error)]
pub enum Error {
    /// The pair queue holds no complete buffer/metadata pair.
    #[error("no complete capture pair available to reprocess")]
    NothingToReprocess,

    /// A previously dispatched pair is still being reprocessed.
    #[error("a reprocess request is already in flight")]
    ReprocessInFlight,

    /// The reprocess sink refused the buffer hand-off.
    #[error("reprocess sink rejected buffer submission")]
    SinkSubmission(#[source] SubmitError),

    /// The capture pipeline refused the reprocess request.
    #[error("capture pipeline rejected reprocess request")]
    CaptureSubmission(#[source] SubmitError),

    /// A weakly held collaborator has been torn down.
    #[error("{0} is no longer alive")]
    CollaboratorGone(&'static str),
}

/// Failure reported by an external collaborator, status code preserved.
#[derive(Debug, Clone, Error)]
#[error("{message} ({code})")]
pub struct SubmitError {
    pub code: i32,
    pub message: String,
}

impl SubmitError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// Errors from the external buffer source.
#[derive(Debug, Error)]
pub enum SourceError {
    /// The producer has nothing queued right now. Ends a drain cycle and is
    /// not logged as an error.
    #[error("no buffer available")]
    Empty,

    /// Any other producer-side failure.
    #[error("buffer source failure: {0}")]
    Device(String),
}
