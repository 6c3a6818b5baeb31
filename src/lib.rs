//! cmdpipe: command pipe server with a simulated host, plus a small client CLI

pub mod config;
pub mod host;
