//! Custom error types and result handling for Tankobon operations.
//!
//! The taxonomy follows the pipeline's failure scoping: configuration
//! problems abort before any page is touched, page-level problems are
//! reported and skipped, volume-level problems degrade one output file,
//! and missing collaborators fall back where a fallback exists.

use std::path::PathBuf;

/// Type alias for Results with Tankobon errors.
pub type Result<T> = std::result::Result<T, Error>;

/// Comprehensive error type for all Tankobon operations.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// I/O errors from the standard library
    #[error(transparent)]
    Io(#[from] std::io::Error),
    /// Image decode/encode/processing errors
    #[error(transparent)]
    Image(#[from] image::ImageError),
    /// EPUB generation errors
    #[error(transparent)]
    Epub(#[from] epub_builder::Error),
    /// ZIP file operation errors
    #[error(transparent)]
    Zip(#[from] zip::result::ZipError),
    /// Async task join errors
    #[error(transparent)]
    Join(#[from] tokio::task::JoinError),
    #[error(transparent)]
    Semaphore(#[from] tokio::sync::AcquireError),
    #[error(transparent)]
    ConfigBuilder(#[from] crate::tankobon::TankobonConfigBuilderError),
    /// Contradictory or otherwise invalid configuration, fatal before any
    /// page is processed
    #[error("Fatal configuration error: {0}")]
    FatalConfig(String),
    /// Unrecognized device profile identifier, fatal for the run
    #[error("Unknown device profile '{0}'")]
    UnknownProfile(String),
    /// Failure scoped to a single page; the run continues without it
    #[error("Page '{page}' failed: {reason}")]
    Page { page: String, reason: String },
    /// Failure scoped to a single volume; other volumes continue
    #[error("Volume {volume} ('{title}') failed: {reason}")]
    Volume {
        volume: usize,
        title: String,
        reason: String,
    },
    /// An external collaborator (archive tool, ebook compiler) is missing
    /// or refused to run
    #[error("Collaborator unavailable: {0}")]
    CollaboratorUnavailable(String),
    /// The run was cancelled; partially completed volumes are discarded
    #[error("Run cancelled")]
    Cancelled,
    /// Error for invalid file or directory paths
    #[error("The given path '{0:?}' is invalid: {1}")]
    InvalidPath(PathBuf, String),
    /// Error for failed asynchronous tasks
    #[error("Asynchronous task failed: {0}")]
    AsyncTaskError(String),
    /// Error for unsupported operations or formats
    #[error("Unsupported: {0}")]
    Unsupported(String),
    /// Error for resources that couldn't be found
    #[error("Not found: {0}")]
    NotFound(String),
    /// Other errors that don't fit into specific categories
    #[error("Other error: {0}")]
    Other(String),
}

impl From<String> for Error {
    fn from(error: String) -> Self {
        Error::Other(error)
    }
}

impl From<&str> for Error {
    fn from(error: &str) -> Self {
        Error::Other(error.to_string())
    }
}

impl Error {
    /// True for errors that abort the run before any page is touched.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::FatalConfig(_) | Error::UnknownProfile(_))
    }
}

#[cfg(feature = "serde")]
impl serde::Serialize for Error {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.to_string().as_ref())
    }
}
