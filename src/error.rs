use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Failure reported by the host object model for a single node or element.
///
/// These are always transient from the engine's point of view: the node is
/// skipped and processing carries on.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HostError {
    #[error("node {0} is no longer valid")]
    StaleNode(u64),

    #[error("property '{property}' unavailable on node {node}")]
    PropertyUnavailable { node: u64, property: &'static str },

    #[error("node {0} is not a physical file")]
    NotAFile(u64),

    #[error("operation not supported by host: {0}")]
    Unsupported(&'static str),

    #[error("host error: {0}")]
    Other(String),
}

#[derive(Error, Debug)]
pub enum LocatorError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error(transparent)]
    Host(#[from] HostError),

    #[error("operation cancelled")]
    Cancelled,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Caller thread is gone, cannot dispatch")]
    Dispatch,

    #[error("Failed to read source outline '{path}': {source}")]
    Outline {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("An unexpected error occurred: {0}")]
    Other(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl LocatorError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, LocatorError::Cancelled)
    }
}

pub type Result<T> = std::result::Result<T, LocatorError>;
