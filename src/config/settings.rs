use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use cmdpipe_core::config::IpcSettings;

/// Command line arguments
#[derive(Parser, Debug)]
#[command(author, version, about = "Command pipe with tick-driven dispatch")]
pub struct Config {
    /// Enable debug mode
    #[arg(short, long, global = true)]
    pub debug: bool,

    /// Path to config file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Socket path (overrides the config file)
    #[arg(short, long, global = true)]
    pub socket: Option<PathBuf>,

    /// Subcommand (defaults to `serve`)
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Subcommands
#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Run the pipe server with the simulated host
    Serve {
        /// Host tick interval in milliseconds
        #[arg(long)]
        tick_ms: Option<u64>,
    },
    /// Send one command and print the response
    Send {
        /// Command text, e.g. "GET_CD:133"
        command: String,

        /// How long to wait for the response
        #[arg(long, default_value_t = 10_000)]
        timeout_ms: u64,

        /// Print the decoded response as JSON
        #[arg(long)]
        json: bool,
    },
    /// Check that a server is answering
    Ping,
}

impl Config {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Subcommand to run
    pub fn command(&self) -> Command {
        self.command
            .clone()
            .unwrap_or(Command::Serve { tick_ms: None })
    }
}

/// Application settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    /// Pipe endpoint settings
    #[serde(default)]
    pub ipc: IpcSettings,

    /// Execution thread settings
    #[serde(default)]
    pub host: HostSettings,
}

/// Execution thread settings (`[host]` section)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostSettings {
    /// Interval between drains of the request queue
    #[serde(default = "default_tick_interval")]
    pub tick_interval_ms: u64,
}

fn default_tick_interval() -> u64 {
    16
}

impl Default for HostSettings {
    fn default() -> Self {
        Self {
            tick_interval_ms: default_tick_interval(),
        }
    }
}

impl HostSettings {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }
}

impl Settings {
    /// Load settings from config file
    pub fn load(path: Option<&PathBuf>) -> Result<Self> {
        // Try custom path first
        if let Some(p) = path {
            if p.exists() {
                return Self::load_file(p);
            }
            tracing::warn!("Config file {:?} not found, trying defaults", p);
        }

        // Try default config locations
        let default_paths = [
            dirs::config_dir().map(|p| p.join("cmdpipe/config.toml")),
            dirs::home_dir().map(|p| p.join(".config/cmdpipe/config.toml")),
            dirs::home_dir().map(|p| p.join(".cmdpipe.toml")),
        ];

        for path in default_paths.iter().flatten() {
            if path.exists() {
                return Self::load_file(path);
            }
        }

        // Return defaults if no config file found
        Ok(Self::default())
    }

    fn load_file(path: &PathBuf) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse config file: {:?}", path))
    }

    /// Merge CLI config into settings (CLI takes precedence)
    pub fn merge_cli(&mut self, cli: &Config) {
        if let Some(socket) = &cli.socket {
            self.ipc.socket_path = Some(socket.clone());
        }
        if let Some(Command::Serve {
            tick_ms: Some(tick_ms),
        }) = &cli.command
        {
            self.host.tick_interval_ms = *tick_ms;
        }
    }

    /// Validate and normalize settings values
    ///
    /// Ensures the tick interval has a minimum value to prevent CPU exhaustion.
    pub fn validate(&mut self) {
        const MIN_TICK_INTERVAL: u64 = 1;

        self.ipc.validate();
        if self.host.tick_interval_ms < MIN_TICK_INTERVAL {
            self.host.tick_interval_ms = MIN_TICK_INTERVAL;
        }
    }
}
