use std::path::PathBuf;
use thiserror::Error;

use crate::session::Phase;

/// Failures that end a single transcode job; the batch always continues
#[derive(Debug, Error)]
pub enum JobError {
    #[error("cannot read media properties of {path}: {detail}")]
    Probe { path: PathBuf, detail: String },

    #[error("cannot create output directory {path}: {source}")]
    Directory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to launch encoder {program}: {source}")]
    Spawn {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("encoder exited with code {code}: {diagnostics}")]
    RuntimeFailure { code: i32, diagnostics: String },

    #[error("encoder reported success but {path} is {problem}")]
    OutputIntegrity { path: PathBuf, problem: &'static str },

    #[error("output {0} is already being written by another job")]
    OutputClaimed(PathBuf),
}

/// Reasons a batch is refused before any job starts
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SubmitError {
    #[error("no main videos have been added")]
    EmptyMain,

    #[error("no overlay videos have been added")]
    EmptyOverlay,

    #[error("a batch is already active (phase {0:?})")]
    AlreadyActive(Phase),

    #[error("invalid settings: {0}")]
    InvalidSettings(String),
}

/// A pause / resume / stop / configure request that the current phase does not allow
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("cannot {action} while {from:?}")]
    InvalidTransition { from: Phase, action: &'static str },

    #[error("invalid settings: {0}")]
    InvalidSettings(String),
}

/// Collection mutation failures surfaced to the presentation layer
#[derive(Debug, Error)]
pub enum LibraryError {
    #[error("unreadable or invalid video: {0}")]
    Probe(PathBuf),

    #[error("{0} is not in the collection")]
    NotFound(PathBuf),

    #[error("file operation failed on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
