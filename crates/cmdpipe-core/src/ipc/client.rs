//! Blocking client for the command pipe
//!
//! One command in flight at a time. Responses that do not answer the
//! current command (left over from an earlier timed-out exchange) are
//! discarded while waiting.

use std::io::{BufReader, ErrorKind, Write};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use thiserror::Error;

use crate::command::response::{self, CastResult, CooldownStatus, ResponseError, SpellInfo};
use crate::command::{parse_command, Request};
use crate::ipc::protocol::{encode_frame, preview, read_frame, PIPE_BUFFER_SIZE};
use crate::ipc::IpcError;

const CONNECT_RETRY_INTERVAL: Duration = Duration::from_millis(50);

const PING_TIMEOUT: Duration = Duration::from_millis(2000);
const TIME_TIMEOUT: Duration = Duration::from_millis(500);
const SPELL_TIMEOUT: Duration = Duration::from_millis(1000);
const ACTION_TIMEOUT: Duration = Duration::from_millis(1500);
const LUA_TIMEOUT: Duration = Duration::from_millis(15000);

/// Timeout used by helpers without a more specific one
pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_millis(10000);

/// Client-side failures
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Not connected")]
    NotConnected,

    #[error("Pipe {} not available after {timeout_ms}ms", path.display())]
    Unavailable { path: PathBuf, timeout_ms: u128 },

    #[error("No response within {0}ms")]
    Timeout(u128),

    #[error("Connection closed by server")]
    Closed,

    #[error(transparent)]
    Ipc(#[from] IpcError),

    #[error(transparent)]
    Response(#[from] ResponseError),
}

impl From<std::io::Error> for ClientError {
    fn from(e: std::io::Error) -> Self {
        ClientError::Ipc(IpcError::Io(e))
    }
}

struct Connection {
    writer: UnixStream,
    reader: BufReader<UnixStream>,
}

/// Connection to a running pipe server
pub struct PipeClient {
    connection: Option<Connection>,
    max_frame_len: usize,
}

impl PipeClient {
    /// Connect, retrying until the server accepts or `timeout` expires
    pub fn connect(path: &Path, timeout: Duration) -> Result<Self, ClientError> {
        let deadline = Instant::now() + timeout;
        let stream = loop {
            match UnixStream::connect(path) {
                Ok(stream) => break stream,
                Err(e)
                    if matches!(e.kind(), ErrorKind::NotFound | ErrorKind::ConnectionRefused) =>
                {
                    if Instant::now() >= deadline {
                        return Err(ClientError::Unavailable {
                            path: path.to_path_buf(),
                            timeout_ms: timeout.as_millis(),
                        });
                    }
                    thread::sleep(CONNECT_RETRY_INTERVAL);
                }
                Err(e) => return Err(e.into()),
            }
        };
        tracing::debug!("Connected to {}", path.display());

        let writer = stream.try_clone()?;
        Ok(Self {
            connection: Some(Connection {
                writer,
                reader: BufReader::new(stream),
            }),
            max_frame_len: PIPE_BUFFER_SIZE,
        })
    }

    /// Whether the connection is still usable
    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    /// Close the connection
    pub fn disconnect(&mut self) {
        if self.connection.take().is_some() {
            tracing::debug!("Disconnected from pipe");
        }
    }

    /// Send one command frame
    pub fn send_command(&mut self, command: &str) -> Result<(), ClientError> {
        let connection = self.connection.as_mut().ok_or(ClientError::NotConnected)?;
        let result = connection
            .writer
            .write_all(&encode_frame(command))
            .and_then(|_| connection.writer.flush());
        if let Err(e) = result {
            self.connection = None;
            return Err(e.into());
        }
        tracing::debug!("Sent command: [{}]", preview(command, 100));
        Ok(())
    }

    /// Read the next response frame, waiting at most `timeout`
    pub fn receive_response(&mut self, timeout: Duration) -> Result<String, ClientError> {
        let max_frame_len = self.max_frame_len;
        let connection = self.connection.as_mut().ok_or(ClientError::NotConnected)?;

        // A zero read timeout means "block forever" to the OS
        let wait = timeout.max(Duration::from_millis(1));
        connection.reader.get_ref().set_read_timeout(Some(wait))?;

        match read_frame(&mut connection.reader, max_frame_len) {
            Ok(Some(response)) => Ok(response),
            Ok(None) => {
                self.connection = None;
                Err(ClientError::Closed)
            }
            Err(IpcError::Io(e))
                if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) =>
            {
                Err(ClientError::Timeout(timeout.as_millis()))
            }
            Err(e) => {
                self.connection = None;
                Err(e.into())
            }
        }
    }

    /// Send a request and wait for the response that answers it
    ///
    /// Frames that cannot answer `request` are dropped. Any `ERR:`
    /// response is accepted as the answer.
    pub fn send_receive(
        &mut self,
        request: &Request,
        timeout: Duration,
    ) -> Result<String, ClientError> {
        let command = request.to_string();
        self.exchange(&command, request, timeout)
    }

    /// Send raw command text and wait for the response that answers it
    pub fn send_receive_raw(
        &mut self,
        command: &str,
        timeout: Duration,
    ) -> Result<String, ClientError> {
        let request = parse_command(command);
        self.exchange(command, &request, timeout)
    }

    fn exchange(
        &mut self,
        command: &str,
        request: &Request,
        timeout: Duration,
    ) -> Result<String, ClientError> {
        self.send_command(command)?;

        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(ClientError::Timeout(timeout.as_millis()));
            }
            let response = match self.receive_response(remaining) {
                Err(ClientError::Timeout(_)) => {
                    return Err(ClientError::Timeout(timeout.as_millis()))
                }
                other => other?,
            };
            if response::answers(request, &response) {
                return Ok(response);
            }
            tracing::debug!(
                "Discarding stale response [{}] while waiting for {:?}",
                preview(&response, 50),
                request.kind()
            );
        }
    }

    /// Check that the server is alive
    pub fn ping(&mut self) -> Result<(), ClientError> {
        let response = self.send_receive(&Request::Ping, PING_TIMEOUT)?;
        Ok(response::parse_pong(&response)?)
    }

    /// Host time in milliseconds
    pub fn time_ms(&mut self) -> Result<i64, ClientError> {
        let response = self.send_receive(&Request::GetTimeMs, TIME_TIMEOUT)?;
        Ok(response::parse_time_ms(&response)?)
    }

    /// Cooldown state of a spell
    pub fn spell_cooldown(&mut self, spell_id: i32) -> Result<CooldownStatus, ClientError> {
        let response = self.send_receive(&Request::GetCooldown { spell_id }, SPELL_TIMEOUT)?;
        Ok(response::parse_cooldown(&response)?)
    }

    /// Name, rank, ranges and cost of a spell
    pub fn spell_info(&mut self, spell_id: i32) -> Result<SpellInfo, ClientError> {
        let response = self.send_receive(&Request::GetSpellInfo { spell_id }, SPELL_TIMEOUT)?;
        Ok(response::parse_spell_info(&response)?)
    }

    /// Whether `spell_id` can reach `unit_id` (e.g. `"target"`)
    pub fn is_spell_in_range(&mut self, spell_id: i32, unit_id: &str) -> Result<bool, ClientError> {
        let request = Request::IsInRange {
            spell_id,
            unit_id: unit_id.to_string(),
        };
        let response = self.send_receive(&request, DEFAULT_RESPONSE_TIMEOUT)?;
        Ok(response::parse_in_range(&response)?)
    }

    /// Cast a spell; a `target_guid` of 0 casts on the current target
    pub fn cast_spell(
        &mut self,
        spell_id: i32,
        target_guid: u64,
    ) -> Result<CastResult, ClientError> {
        let request = Request::CastSpell {
            spell_id,
            target_guid,
        };
        let response = self.send_receive(&request, ACTION_TIMEOUT)?;
        Ok(response::parse_cast_result(&response)?)
    }

    /// Combo points on the current target
    pub fn combo_points(&mut self) -> Result<i32, ClientError> {
        let response = self.send_receive(&Request::GetComboPoints, DEFAULT_RESPONSE_TIMEOUT)?;
        Ok(response::parse_combo_points(&response)?)
    }

    /// GUID of the current target, 0 when there is none
    pub fn target_guid(&mut self) -> Result<u64, ClientError> {
        let response = self.send_receive(&Request::GetTargetGuid, DEFAULT_RESPONSE_TIMEOUT)?;
        Ok(response::parse_target_guid(&response)?)
    }

    /// Whether the player stands behind the given target
    pub fn is_behind_target(&mut self, target_guid: u64) -> Result<bool, ClientError> {
        let request = Request::IsBehindTarget { target_guid };
        let response = self.send_receive(&request, DEFAULT_RESPONSE_TIMEOUT)?;
        Ok(response::parse_behind_target(&response)?)
    }

    /// Request a click-to-move; true if the host accepted it
    pub fn move_to(&mut self, x: f32, y: f32, z: f32) -> Result<bool, ClientError> {
        let response = self.send_receive(&Request::MoveTo { x, y, z }, ACTION_TIMEOUT)?;
        Ok(response::parse_move_to(&response)?)
    }

    /// Run Lua code and return its comma-separated results
    pub fn execute(&mut self, code: &str) -> Result<Vec<String>, ClientError> {
        let request = Request::ExecLua {
            code: code.to_string(),
        };
        let response = self.send_receive(&request, LUA_TIMEOUT)?;
        Ok(response::parse_lua(&response)?)
    }
}
