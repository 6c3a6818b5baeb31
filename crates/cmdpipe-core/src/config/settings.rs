use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::ipc::protocol::{
    self, PIPE_BUFFER_SIZE, PIPE_TIMEOUT_MS, RESPONSE_POLL_ATTEMPTS, RESPONSE_POLL_INTERVAL_MS,
    SHUTDOWN_TIMEOUT_MS,
};

/// Pipe endpoint settings (`[ipc]` section of the config file)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IpcSettings {
    /// Socket path override (defaults to the per-user state directory)
    #[serde(default)]
    pub socket_path: Option<PathBuf>,

    /// Read/write buffer size in bytes
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,

    /// How long a client waits for the endpoint (milliseconds)
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,

    /// Number of response checks per command
    #[serde(default = "default_poll_attempts")]
    pub poll_attempts: u32,

    /// Interval between response checks (milliseconds)
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    /// Bound on waiting for the IPC thread at shutdown (milliseconds)
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_ms: u64,
}

fn default_buffer_size() -> usize {
    PIPE_BUFFER_SIZE
}

fn default_connect_timeout() -> u64 {
    PIPE_TIMEOUT_MS
}

fn default_poll_attempts() -> u32 {
    RESPONSE_POLL_ATTEMPTS
}

fn default_poll_interval() -> u64 {
    RESPONSE_POLL_INTERVAL_MS
}

fn default_shutdown_timeout() -> u64 {
    SHUTDOWN_TIMEOUT_MS
}

impl Default for IpcSettings {
    fn default() -> Self {
        Self {
            socket_path: None,
            buffer_size: default_buffer_size(),
            connect_timeout_ms: default_connect_timeout(),
            poll_attempts: default_poll_attempts(),
            poll_interval_ms: default_poll_interval(),
            shutdown_timeout_ms: default_shutdown_timeout(),
        }
    }
}

impl IpcSettings {
    /// Settings for a specific socket path, everything else default
    pub fn with_socket_path(path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: Some(path.into()),
            ..Default::default()
        }
    }

    /// Socket path to bind or connect to
    pub fn resolved_socket_path(&self) -> PathBuf {
        self.socket_path
            .clone()
            .unwrap_or_else(protocol::socket_path)
    }

    /// Longest accepted command frame (one byte of the buffer is reserved)
    pub fn max_frame_len(&self) -> usize {
        self.buffer_size.saturating_sub(1)
    }

    /// Interval between response checks
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Total time to wait for a response
    pub fn poll_window(&self) -> Duration {
        self.poll_interval()
            .checked_mul(self.poll_attempts)
            .unwrap_or(Duration::MAX)
    }

    /// Client connect timeout
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Shutdown join bound
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    /// Validate and normalize settings values
    ///
    /// Keeps the buffer large enough for every command grammar, the poll
    /// loop from spinning, and every wait bounded.
    pub fn validate(&mut self) {
        const MIN_BUFFER_SIZE: usize = 128;
        const MAX_BUFFER_SIZE: usize = 1024 * 1024;
        const MIN_POLL_INTERVAL: u64 = 1;
        const MAX_POLL_INTERVAL: u64 = 60_000;
        const MIN_POLL_ATTEMPTS: u32 = 1;
        const MAX_POLL_ATTEMPTS: u32 = 10_000;
        const MAX_TIMEOUT: u64 = 600_000;

        self.buffer_size = self.buffer_size.clamp(MIN_BUFFER_SIZE, MAX_BUFFER_SIZE);
        self.poll_interval_ms = self.poll_interval_ms.clamp(MIN_POLL_INTERVAL, MAX_POLL_INTERVAL);
        self.poll_attempts = self.poll_attempts.clamp(MIN_POLL_ATTEMPTS, MAX_POLL_ATTEMPTS);
        self.connect_timeout_ms = self.connect_timeout_ms.min(MAX_TIMEOUT);
        self.shutdown_timeout_ms = self.shutdown_timeout_ms.min(MAX_TIMEOUT);
    }
}
