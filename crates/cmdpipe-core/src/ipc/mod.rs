//! Inter-thread and inter-process plumbing for the command pipe
//!
//! The [`server`] owns the socket on its own thread, the [`channel`]
//! carries requests to the execution thread and responses back, and the
//! [`client`] is the controller side of the same protocol.

pub mod channel;
pub mod client;
pub mod protocol;
pub mod server;

pub use channel::IpcChannel;
pub use client::{ClientError, PipeClient};
pub use server::{ConnectionState, PipeServer, ShutdownOutcome};

use std::path::PathBuf;

use thiserror::Error;

/// Transport-level failures on a pipe connection
#[derive(Debug, Error)]
pub enum IpcError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Frame exceeds {limit} bytes")]
    FrameTooLarge { limit: usize },

    #[error("Failed to bind IPC socket {}: {source}", path.display())]
    Bind {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Another cmdpipe server is already running (socket {} is active)", path.display())]
    AlreadyRunning { path: PathBuf },
}
