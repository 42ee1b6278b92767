use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Missing, unreadable or invalid configuration. Fatal before a network exists.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// An input source could not be set up (or fed a malformed frame).
#[derive(Debug, Error)]
pub enum StimulusError {
    #[error("live capture unavailable: {0}")]
    LiveUnavailable(String),
    #[error("pattern set is empty")]
    NoPatterns,
    #[error("frame has {actual} pixels, expected {expected}")]
    FrameSize { expected: usize, actual: usize },
    #[error("failed to load patterns: {0}")]
    Patterns(#[from] PersistenceError),
}

/// The array store could not be read/written, or does not match the live network.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("store i/o failed: {0}")]
    Io(#[from] io::Error),
    #[error("store has no array named {0:?}")]
    MissingKey(String),
    #[error("array {key:?} is not of type {expected}")]
    KindMismatch { key: String, expected: &'static str },
    #[error("corrupt store: {0}")]
    Corrupt(&'static str),
    #[error("projection {projection}: stored {stored} weights, network has {expected}")]
    LengthMismatch {
        projection: usize,
        stored: usize,
        expected: usize,
    },
    #[error("stored {stored} weights, field table holds {expected}")]
    FieldSize { stored: usize, expected: usize },
    #[error("store holds {stored} projection arrays, network has {expected}")]
    ProjectionCount { stored: usize, expected: usize },
    #[error("stored time is not a single non-negative value")]
    BadTime,
}
