//! cmdpipe-core: command bridge between an external controller and a host
//! execution thread.
//!
//! A [`PipeServer`] accepts one client on a Unix domain socket and reads
//! NUL-terminated text commands. Each command is parsed into a [`Request`]
//! and queued on the shared [`IpcChannel`]. The host drains that queue once
//! per tick with a [`Dispatcher`], whose [`CommandHandlers`] produce tagged
//! responses that the server sends back.

pub mod command;
pub mod config;
pub mod dispatch;
pub mod ipc;

pub use command::{parse_command, Request, RequestKind};
pub use config::IpcSettings;
pub use dispatch::{CommandHandlers, Dispatcher, HandlerError, HandlerResult};
pub use ipc::{ClientError, IpcChannel, IpcError, PipeClient, PipeServer, ShutdownOutcome};
