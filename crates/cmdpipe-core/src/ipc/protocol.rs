//! Wire protocol definitions for the command pipe
//!
//! Commands and responses are plain text frames terminated by a single
//! NUL byte, exchanged over a Unix domain socket.

use std::io::{BufRead, Read};
use std::path::PathBuf;

use crate::ipc::IpcError;

/// File name of the socket inside the state directory
pub const PIPE_NAME: &str = "cmdpipe.sock";

/// Read/write buffer size; a command frame may use all but one byte of it
pub const PIPE_BUFFER_SIZE: usize = 4096;

/// How long a client waits for the endpoint to accept a connection
pub const PIPE_TIMEOUT_MS: u64 = 5000;

/// Number of response checks after a command has been queued
pub const RESPONSE_POLL_ATTEMPTS: u32 = 50;

/// Interval between response checks
pub const RESPONSE_POLL_INTERVAL_MS: u64 = 10;

/// Upper bound on waiting for the IPC thread during shutdown
pub const SHUTDOWN_TIMEOUT_MS: u64 = 2000;

/// Byte appended to every frame on the wire
pub const FRAME_TERMINATOR: u8 = b'\0';

/// Leading tokens of tagged responses
pub mod tag {
    pub const PONG: &str = "PONG";
    pub const ERROR: &str = "ERR:";
    pub const TIME_MS: &str = "TIME_MS:";
    pub const COOLDOWN: &str = "CD:";
    pub const IN_RANGE: &str = "IN_RANGE:";
    pub const SPELL_INFO: &str = "SPELL_INFO:";
    pub const CAST_RESULT: &str = "CAST_RESULT:";
    pub const CAST_ERROR: &str = "CAST_RESULT:ERROR:";
    pub const COMBO_POINTS: &str = "CP:";
    pub const TARGET_GUID: &str = "TARGET_GUID:";
    pub const BEHIND_TARGET_OK: &str = "[IS_BEHIND_TARGET_OK:";
    pub const BEHIND_TARGET_ERR: &str = "[IS_BEHIND_TARGET_ERR:";
    pub const MOVE_TO_RESULT: &str = "MOVE_TO_RESULT:";
    pub const MOVE_TO_ERROR: &str = "MOVE_TO_RESULT:ERROR:";
    pub const LUA_RESULT: &str = "LUA_RESULT:";
    pub const LUA_ERROR: &str = "LUA_RESULT:ERROR:";
    pub const UNKNOWN_COMMAND: &str = "ERR:Unknown command type";
    pub const BUSY: &str = "ERR:Server busy";
}

/// Get the base state directory, preferring XDG_RUNTIME_DIR for security
pub fn state_dir() -> PathBuf {
    if let Ok(xdg) = std::env::var("XDG_RUNTIME_DIR") {
        PathBuf::from(xdg).join("cmdpipe")
    } else {
        let uid = unsafe { libc::getuid() };
        PathBuf::from(format!("/tmp/cmdpipe-{}", uid))
    }
}

/// Get the default socket path
pub fn socket_path() -> PathBuf {
    state_dir().join(PIPE_NAME)
}

/// Encode a text message as a frame (text + terminator)
pub fn encode_frame(text: &str) -> Vec<u8> {
    let mut frame = Vec::with_capacity(text.len() + 1);
    frame.extend_from_slice(text.as_bytes());
    frame.push(FRAME_TERMINATOR);
    frame
}

/// Decode the body of a frame (terminator already removed)
///
/// Invalid UTF-8 is replaced rather than rejected, and trailing line
/// endings are dropped so that line-oriented tools can talk to the pipe.
pub fn decode_frame(body: &[u8]) -> String {
    String::from_utf8_lossy(body)
        .trim_end_matches(['\r', '\n'])
        .to_string()
}

/// Read one frame of at most `max_len` bytes
///
/// Returns `Ok(None)` on a clean EOF. A frame cut short by EOF is still
/// returned, since a client may close right after its last write.
pub fn read_frame<R: BufRead>(reader: &mut R, max_len: usize) -> Result<Option<String>, IpcError> {
    let mut body = Vec::new();
    let read = reader
        .by_ref()
        .take(max_len as u64 + 1)
        .read_until(FRAME_TERMINATOR, &mut body)?;

    if read == 0 {
        return Ok(None);
    }

    if body.last() == Some(&FRAME_TERMINATOR) {
        body.pop();
    } else if body.len() > max_len {
        return Err(IpcError::FrameTooLarge { limit: max_len });
    }

    Ok(Some(decode_frame(&body)))
}

/// Truncate text for log output
pub(crate) fn preview(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
