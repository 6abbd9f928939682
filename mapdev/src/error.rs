//! The two error kinds crossing the public API, plus the consumer-cancel
//! sentinel for asynchronous reads.

use thiserror::Error;

/// Errors returned by devices, accessors and subscriptions.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum Error {
    /// A precondition the caller can and must fix: bad map file, unknown
    /// register, illegal access mode combination, API misuse.
    #[error("{0}")]
    Logic(String),
    /// A transient or environmental fault: open failure, transport I/O
    /// failure. These are the only errors delivered to async subscribers.
    #[error("{0}")]
    Runtime(String),
    /// A pending asynchronous read was unblocked by `interrupt()`.
    #[error("async read was interrupted")]
    Interrupted,
}

impl Error {
    pub(crate) fn logic(message: impl Into<String>) -> Self {
        Error::Logic(message.into())
    }

    pub(crate) fn runtime(message: impl Into<String>) -> Self {
        Error::Runtime(message.into())
    }

    /// True for [`Error::Runtime`].
    #[must_use]
    pub fn is_runtime(&self) -> bool {
        matches!(self, Error::Runtime(_))
    }
}

impl From<mapdev_utils::mapfile::MapFileError> for Error {
    fn from(e: mapdev_utils::mapfile::MapFileError) -> Self {
        Error::Logic(e.to_string())
    }
}

impl From<mapdev_utils::catalogue::CatalogueError> for Error {
    fn from(e: mapdev_utils::catalogue::CatalogueError) -> Self {
        Error::Logic(e.to_string())
    }
}

impl From<crate::codec::CodecError> for Error {
    fn from(e: crate::codec::CodecError) -> Self {
        Error::Logic(e.to_string())
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
