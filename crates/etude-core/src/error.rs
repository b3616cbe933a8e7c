use std::io;
use thiserror::Error;

/// Central error type for the etude engine.
///
/// Protocol-level failures (bad request lines, missing files, permission
/// problems) never surface here; they are rendered into responses by the
/// connection itself. Only transport and lifecycle failures do.
#[derive(Debug, Error)]
pub enum EtudeError {
    /// Underlying I/O error from the OS or network.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Invalid or inconsistent server configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A bounded-wait acquire found no free resource in time.
    #[error("Resource pool exhausted")]
    PoolExhausted,

    /// The dispatcher queue is at capacity.
    #[error("Dispatcher queue is full")]
    QueueFull,

    /// A worker thread panicked while processing a connection.
    #[error("Worker panic: {0}")]
    WorkerPanic(String),
}

pub type EtudeResult<T> = Result<T, EtudeError>;
