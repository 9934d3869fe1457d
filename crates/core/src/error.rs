//! Error taxonomy shared by every kubeassert crate.

use std::path::PathBuf;

/// Errors produced while resolving, dispatching or polling resources.
///
/// `Validation`, `Decode`, `Discovery`, `Format` and `UnsupportedOperation` are terminal:
/// callers never retry them. `Timeout` is only produced by the convergence poller.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("validation: {0}")]
    Validation(String),
    #[error("decode: {0}")]
    Decode(String),
    #[error("discovery: {0}")]
    Discovery(String),
    #[error("not_found: {0}")]
    NotFound(String),
    /// Remote classification only; create treats it as success.
    #[error("already_exists: {0}")]
    AlreadyExists(String),
    #[error("format: {0}")]
    Format(String),
    #[error("unsupported operation: {0}")]
    UnsupportedOperation(String),
    #[error("timeout: {0}")]
    Timeout(String),
    #[error("unexpected result: {0}")]
    UnexpectedResult(String),
    #[error("template: {0}")]
    Template(String),
    #[error("io: {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// Opaque pass-through from the orchestration API.
    #[error("remote ({code}): {message}")]
    Remote { code: u16, message: String },
}

impl Error {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, Error::AlreadyExists(_))
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io { path: path.into(), source }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
