//! Pipe server for the command endpoint
//!
//! Listens on a Unix domain socket, serves one client at a time, and
//! hands each command to the execution thread through the [`IpcChannel`].
//! All blocking I/O happens on a dedicated IPC thread.

use std::io::{self, BufReader, Write};
use std::net::Shutdown;
use std::os::unix::fs::PermissionsExt;
use std::os::unix::io::AsRawFd;
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use parking_lot::Mutex;

use crate::command::{parse_command, RequestKind};
use crate::config::IpcSettings;
use crate::ipc::protocol::{self, encode_frame, preview, read_frame, tag};
use crate::ipc::{IpcChannel, IpcError};

const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Phase of the connection state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Endpoint created, waiting for a client
    Listening,
    /// Client accepted
    Connected,
    /// Reading commands and sending responses
    Communicating,
    /// Client gone, releasing the connection
    Disconnecting,
    /// IPC thread has exited
    Stopped,
}

/// Result of a shutdown request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownOutcome {
    /// The IPC thread exited within the bound
    Stopped,
    /// The IPC thread did not exit in time and was abandoned
    TimedOut,
    /// Shutdown had already been performed
    AlreadyStopped,
}

/// Cloned handle of the connected client, kept so shutdown can unblock a read
type ActiveConnection = Arc<Mutex<Option<UnixStream>>>;

/// Running pipe server
///
/// Dropping the server shuts it down.
pub struct PipeServer {
    channel: Arc<IpcChannel>,
    socket: PathBuf,
    active: ActiveConnection,
    state: Arc<Mutex<ConnectionState>>,
    thread: Option<JoinHandle<()>>,
    shutdown_timeout: Duration,
}

impl PipeServer {
    /// Create the endpoint and start the IPC thread
    pub fn start(channel: Arc<IpcChannel>, settings: &IpcSettings) -> Result<Self> {
        let socket = settings.resolved_socket_path();
        prepare_socket_dir(&socket)?;

        // Clean up stale socket
        if socket.exists() {
            match UnixStream::connect(&socket) {
                Ok(_) => return Err(IpcError::AlreadyRunning { path: socket }.into()),
                Err(_) => {
                    std::fs::remove_file(&socket).with_context(|| {
                        format!("Failed to remove stale socket: {}", socket.display())
                    })?;
                }
            }
        }

        let listener = UnixListener::bind(&socket).map_err(|source| IpcError::Bind {
            path: socket.clone(),
            source,
        })?;

        // Set socket permissions to owner-only
        std::fs::set_permissions(&socket, std::fs::Permissions::from_mode(0o700))
            .context("Failed to set socket permissions")?;

        let active: ActiveConnection = Arc::new(Mutex::new(None));
        let state = Arc::new(Mutex::new(ConnectionState::Listening));

        let worker = Worker {
            listener,
            channel: channel.clone(),
            active: active.clone(),
            state: state.clone(),
            settings: settings.clone(),
        };
        let thread = thread::Builder::new()
            .name("cmdpipe-ipc".to_string())
            .spawn(move || worker.run())
            .context("Failed to spawn IPC thread")?;

        tracing::debug!("IPC server started on {}", socket.display());

        Ok(Self {
            channel,
            socket,
            active,
            state,
            thread: Some(thread),
            shutdown_timeout: settings.shutdown_timeout(),
        })
    }

    /// Path of the bound socket
    pub fn socket_path(&self) -> &Path {
        &self.socket
    }

    /// Current phase of the connection state machine
    pub fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    /// Channel shared with the execution thread
    pub fn channel(&self) -> &Arc<IpcChannel> {
        &self.channel
    }

    /// Stop the server and release the endpoint
    ///
    /// Clears the run flag, unblocks the IPC thread wherever it is parked,
    /// waits for it up to the configured bound, then removes the socket.
    /// Only the first call does any work.
    pub fn shutdown(&mut self) -> ShutdownOutcome {
        let Some(thread) = self.thread.take() else {
            return ShutdownOutcome::AlreadyStopped;
        };

        tracing::debug!("Stopping IPC server");
        self.channel.stop();

        // Unblock a pending read
        if let Some(stream) = self.active.lock().take() {
            tracing::debug!("Closing active client connection");
            let _ = stream.shutdown(Shutdown::Both);
        }

        // Unblock a pending accept
        match UnixStream::connect(&self.socket) {
            Ok(_) => tracing::debug!("Signalled IPC thread to leave accept"),
            Err(e)
                if matches!(
                    e.kind(),
                    std::io::ErrorKind::NotFound | std::io::ErrorKind::ConnectionRefused
                ) => {}
            Err(e) => tracing::debug!("Failed to signal IPC thread: {}", e),
        }

        let joined = join_thread_with_timeout(thread, self.shutdown_timeout);
        release_endpoint(&self.socket);

        if joined {
            tracing::debug!("IPC server stopped");
            ShutdownOutcome::Stopped
        } else {
            tracing::warn!(
                "IPC thread did not exit within {}ms, abandoning it",
                self.shutdown_timeout.as_millis()
            );
            ShutdownOutcome::TimedOut
        }
    }
}

impl Drop for PipeServer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// State owned by the IPC thread
struct Worker {
    listener: UnixListener,
    channel: Arc<IpcChannel>,
    active: ActiveConnection,
    state: Arc<Mutex<ConnectionState>>,
    settings: IpcSettings,
}

impl Worker {
    /// Accept loop: one client at a time until the run flag clears
    fn run(self) {
        while self.channel.is_running() {
            self.set_state(ConnectionState::Listening);
            tracing::debug!("Waiting for client connection");

            let stream = match self.listener.accept() {
                Ok((stream, _)) => stream,
                Err(e) => {
                    if !self.channel.is_running() {
                        break;
                    }
                    tracing::warn!("IPC accept error: {}", e);
                    thread::sleep(ACCEPT_RETRY_DELAY);
                    continue;
                }
            };

            if !self.channel.is_running() {
                tracing::debug!("Shutting down after client connected");
                break;
            }

            self.set_state(ConnectionState::Connected);
            if !self.track(&stream) {
                tracing::debug!("Shutdown started while client was connecting");
                break;
            }
            tracing::info!("IPC client connected");

            self.set_state(ConnectionState::Communicating);
            if let Err(e) = self.communicate(stream) {
                if self.channel.is_running() {
                    tracing::debug!("IPC connection ended: {}", e);
                }
            }

            self.set_state(ConnectionState::Disconnecting);
            self.active.lock().take();
            tracing::info!("IPC client disconnected");

            // Peers that queued up while the client was attached are stale
            if self.channel.is_running() {
                self.turn_away_waiting_clients();
            }
        }

        self.set_state(ConnectionState::Stopped);
        tracing::debug!("IPC thread finished");
    }

    /// Record the connection for shutdown; false if shutdown already began
    fn track(&self, stream: &UnixStream) -> bool {
        let mut active = self.active.lock();
        match stream.try_clone() {
            Ok(clone) => *active = Some(clone),
            Err(e) => tracing::warn!("Failed to track IPC connection: {}", e),
        }
        // Checked under the lock: shutdown clears the flag before taking it
        if self.channel.is_running() {
            true
        } else {
            active.take();
            false
        }
    }

    /// Read/process/reply loop for one client
    fn communicate(&self, stream: UnixStream) -> Result<(), IpcError> {
        let mut writer = stream.try_clone()?;
        let mut reader = BufReader::with_capacity(self.settings.buffer_size, stream);
        let window = self.settings.poll_window();

        while self.channel.is_running() {
            if reader.buffer().is_empty() {
                self.wait_for_input(reader.get_ref())?;
                if !self.channel.is_running() {
                    break;
                }
            }

            let Some(command) = read_frame(&mut reader, self.settings.max_frame_len())? else {
                tracing::debug!("Client closed the connection");
                return Ok(());
            };
            tracing::debug!("Received raw: [{}]", preview(&command, 100));

            let request = parse_command(&command);
            let expects_reply = request.kind() != RequestKind::ExecLua;
            self.channel.push_request(request);

            match self
                .channel
                .wait_response(window, self.settings.poll_interval())
            {
                Some(response) => send_response(&mut writer, &response)?,
                None if !self.channel.is_running() => {}
                None if expects_reply => {
                    tracing::warn!(
                        "No response generated for command [{}] within {}ms",
                        preview(&command, 50),
                        window.as_millis()
                    );
                }
                None => {}
            }
        }

        Ok(())
    }

    /// Block until the client has input (or hung up)
    ///
    /// Extra peers connecting meanwhile are turned away, so only one client
    /// is ever attached. Also returns once shutdown has begun.
    fn wait_for_input(&self, client: &UnixStream) -> Result<(), IpcError> {
        loop {
            let mut fds = [
                libc::pollfd {
                    fd: self.listener.as_raw_fd(),
                    events: libc::POLLIN,
                    revents: 0,
                },
                libc::pollfd {
                    fd: client.as_raw_fd(),
                    events: libc::POLLIN,
                    revents: 0,
                },
            ];
            let rc = unsafe { libc::poll(fds.as_mut_ptr(), fds.len() as libc::nfds_t, -1) };
            if rc < 0 {
                let err = io::Error::last_os_error();
                if err.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(err.into());
            }

            // Listener first: a peer queued before the client hung up is stale
            if fds[0].revents != 0 {
                self.turn_away_waiting_clients();
                if !self.channel.is_running() {
                    return Ok(());
                }
            }
            if fds[1].revents != 0 {
                return Ok(());
            }
        }
    }

    /// Accept every pending connection and close it with a busy error
    fn turn_away_waiting_clients(&self) -> usize {
        if let Err(e) = self.listener.set_nonblocking(true) {
            tracing::debug!("Failed to make listener non-blocking: {}", e);
            return 0;
        }

        let mut refused = 0;
        loop {
            match self.listener.accept() {
                Ok((mut stream, _)) => {
                    refused += 1;
                    if self.channel.is_running() {
                        tracing::warn!("Refused extra IPC client: another client is attached");
                    }
                    let _ = stream.write_all(&encode_frame(tag::BUSY));
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    tracing::debug!("IPC accept error while refusing clients: {}", e);
                    break;
                }
            }
        }

        if let Err(e) = self.listener.set_nonblocking(false) {
            tracing::warn!("Failed to restore blocking listener: {}", e);
        }
        refused
    }

    fn set_state(&self, state: ConnectionState) {
        *self.state.lock() = state;
    }
}

/// Write one response frame and flush it
fn send_response<W: Write>(writer: &mut W, response: &str) -> Result<(), IpcError> {
    if response.is_empty() {
        tracing::warn!("Refusing to send an empty response");
        return Ok(());
    }
    let frame = encode_frame(response);
    writer.write_all(&frame)?;
    writer.flush()?;
    tracing::debug!(
        "Sent response: [{}] ({} bytes)",
        preview(response, 100),
        frame.len()
    );
    Ok(())
}

/// Make sure the socket's directory exists
///
/// The default state directory is locked down to the owner.
fn prepare_socket_dir(socket: &Path) -> Result<()> {
    let Some(dir) = socket.parent().filter(|p| !p.as_os_str().is_empty()) else {
        return Ok(());
    };
    if dir == protocol::state_dir() {
        return ensure_state_dir(dir);
    }
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create socket directory: {}", dir.display()))
}

/// Ensure state directory exists with proper permissions
fn ensure_state_dir(dir: &Path) -> Result<()> {
    // Check for symlink attack before creating
    if dir.exists() {
        let meta = std::fs::symlink_metadata(dir)
            .with_context(|| format!("Failed to read metadata for: {}", dir.display()))?;
        if meta.is_symlink() {
            anyhow::bail!(
                "State directory is a symlink (possible attack): {}",
                dir.display()
            );
        }
    }
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create state directory: {}", dir.display()))?;
    let metadata = std::fs::metadata(dir)
        .with_context(|| format!("Failed to read metadata for: {}", dir.display()))?;
    if !metadata.is_dir() {
        anyhow::bail!("State path is not a directory: {}", dir.display());
    }
    let mode = metadata.permissions().mode() & 0o777;
    if mode != 0o700 {
        std::fs::set_permissions(dir, std::fs::Permissions::from_mode(0o700))
            .with_context(|| format!("Failed to set permissions on: {}", dir.display()))?;
    }
    Ok(())
}

/// Remove the socket file, tolerating it being gone already
fn release_endpoint(socket: &Path) {
    match std::fs::remove_file(socket) {
        Ok(()) => tracing::debug!("Released IPC endpoint {}", socket.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::debug!("Failed to remove socket {}: {}", socket.display(), e),
    }
}

/// Join a thread with a timeout, abandoning it if it doesn't finish in time
fn join_thread_with_timeout<T>(handle: JoinHandle<T>, timeout: Duration) -> bool {
    let start = Instant::now();
    loop {
        if handle.is_finished() {
            let _ = handle.join();
            return true;
        }
        if start.elapsed() >= timeout {
            // Thread will be leaked but we can't block forever
            return false;
        }
        thread::sleep(Duration::from_millis(10));
    }
}
