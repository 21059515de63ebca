//! Error types shared by the tessera crates.

use thiserror::Error;

/// Errors raised by the core utilities.
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid or unparsable configuration value.
    #[error("Config error: {0}")]
    Config(String),

    /// IO errors, including failure to spawn a worker thread.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// One or more jobs panicked on a worker since the last barrier.
    #[error("{count} job(s) panicked on worker {worker}")]
    WorkerPanicked {
        /// Index of the first worker that reported a panic.
        worker: usize,
        /// Number of panicked jobs on that worker.
        count: usize,
    },
}

/// Result type alias using the core Error type.
pub type Result<T> = std::result::Result<T, Error>;
