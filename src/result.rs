use miette::Diagnostic;
use thiserror::Error;

use crate::job::{JobId, JobState};

/// Failure to turn a remote reference into a list of streams
#[derive(Debug, Error, Diagnostic)]
pub enum ResolutionError {
    #[error("Invalid video reference: {0}")]
    #[diagnostic(help("Check that the URL points to a single video"))]
    InvalidReference(String),

    #[error("Video is unavailable: {0}")]
    Unavailable(String),

    #[error("Could not parse the video metadata: {0}")]
    Parse(String),

    #[error("Could not reach the video source: {0}")]
    Transient(String),
}

/// Failure to fetch one stream to local storage
#[derive(Debug, Error, Diagnostic)]
pub enum FetchError {
    #[error("I/O error while fetching: {0}")]
    Io(#[from] std::io::Error),

    #[error("Network error while fetching: {0}")]
    Network(String),

    #[error("Fetch canceled")]
    Canceled,
}

/// Failure of the external transcoder
#[derive(Debug, Error, Diagnostic)]
pub enum TranscodeError {
    #[error("{program} failed (code={code:?}): {stderr}")]
    Process {
        program: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("Could not probe the media duration: {0}")]
    Probe(String),

    #[error("Transcode canceled")]
    Canceled,
}

/// Request rejected because of work already in flight
#[derive(Debug, Error, Diagnostic)]
pub enum ConcurrencyError {
    #[error("A video is already loading")]
    LoadBusy,

    #[error("Job {0} is already downloading")]
    AlreadyDownloading(JobId),
}

#[derive(Debug, Error, Diagnostic)]
pub enum Error {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Resolution(#[from] ResolutionError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Transcode(#[from] TranscodeError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Concurrency(#[from] ConcurrencyError),

    #[error("Row {index} is out of bounds (length is {len})")]
    Index { index: usize, len: usize },

    #[error("No job with id {0}")]
    UnknownJob(JobId),

    #[error("Job {id} cannot go from {from:?} to {to:?}")]
    InvalidTransition {
        id: JobId,
        from: JobState,
        to: JobState,
    },

    #[error("Invalid selection: {0}")]
    InvalidSelection(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether the error comes from a cancellation request rather than a real failure
    pub fn is_canceled(&self) -> bool {
        matches!(
            self,
            Error::Fetch(FetchError::Canceled) | Error::Transcode(TranscodeError::Canceled)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
