use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to read {}: {source}", path.display())]
    ReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid trace in {}: {reason}", path.display())]
    InvalidTrace { path: PathBuf, reason: String },

    #[error("invalid profile in {}: {reason}", path.display())]
    InvalidProfile { path: PathBuf, reason: String },

    #[error("{kind} '{name}' is defined twice")]
    DuplicateDefinition { kind: &'static str, name: String },

    #[error("event {index} refers to undefined {kind} '{name}'")]
    Undefined {
        index: usize,
        kind: &'static str,
        name: String,
    },

    #[error("event {index} refers to unknown location {location}")]
    UnknownLocation { index: usize, location: u32 },

    #[error("event {index} refers to unknown task {task}")]
    UnknownTask { index: usize, task: u64 },

    #[error("event {index} refers to unknown allocation {id}")]
    UnknownAllocation { index: usize, id: u64 },

    #[error("event {index}: {reason}")]
    InvalidEvent { index: usize, reason: String },

    #[error("no thread {0} in profile -- run arbor report without --thread to list threads")]
    NoSuchThread(u64),

    #[error(transparent)]
    Runtime(#[from] arbor_runtime::Error),

    #[error("{0}")]
    Io(#[from] std::io::Error),
}
