use std::sync::Arc;

use thiserror::Error;

use self::extract::Extractor;
use self::session::{orchestrator::Orchestrator, tracker::ProgressTracker};

pub mod catalog;
pub mod extract;
pub mod session;
pub mod util;

pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced to the presentation layer.
/// The first three are returned by `Orchestrator::start`, the rest end up
/// as the `error` message of a failed or cancelled item.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("Unknown quality key: '{0}'")]
    UnknownQuality(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("A download session is already running")]
    SessionInProgress,
    #[error("Extraction failed for '{url}': {message}")]
    Extraction { url: String, message: String },
    #[error("Merging streams failed for '{url}': {message}")]
    Merge { url: String, message: String },
    #[error("Download was cancelled")]
    Cancelled,
}

impl Error {
    /// Configuration errors are the only ones fatal to a `start` call.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            Error::UnknownQuality(_) | Error::InvalidConfig(_) | Error::SessionInProgress
        )
    }

    pub(crate) fn from_extract(url: &str, err: extract::Error) -> Self {
        match err {
            extract::Error::Cancelled => Error::Cancelled,
            extract::Error::Merge(message) => Error::Merge {
                url: url.to_owned(),
                message,
            },
            other => Error::Extraction {
                url: url.to_owned(),
                message: other.to_string(),
            },
        }
    }
}

/// Wires a tracker and an orchestrator around the given extractor.
/// Must be called from within a tokio runtime, the tracker spawns its publisher task.
pub fn init(extractor: impl Extractor + 'static) -> (Orchestrator, ProgressTracker) {
    let tracker = ProgressTracker::new();
    let orchestrator = Orchestrator::new(Arc::new(extractor), tracker.clone());
    (orchestrator, tracker)
}
