//! Fifo error types.

use std::path::PathBuf;

/// Errors that can occur while using the fifo channel.
#[derive(thiserror::Error, Debug)]
pub enum FifoError {
    /// No fifo is connected.
    #[error("Fifo is not connected")]
    NotConnected,

    /// The fifo path no longer exists.
    #[error("Fifo file {0} could not be found")]
    Missing(PathBuf),

    /// The named pipe could not be created.
    #[error("Failed to create fifo {path}: {source}")]
    Create {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The fifo could not be opened for reading and writing.
    #[error("Failed to open fifo {path}: {source}")]
    Open {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Notify watcher error.
    #[error("Fifo watch error: {0}")]
    Watch(#[from] notify::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
