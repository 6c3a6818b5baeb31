use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use cmdpipe::config::{Command, Config, Settings};
use cmdpipe::host::{spawn_execution_thread, SimulatedHost};
use cmdpipe_core::command::response::parse_response;
use cmdpipe_core::{parse_command, IpcChannel, PipeClient, PipeServer, ShutdownOutcome};

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let cli = Config::parse_args();

    // Setup logging
    setup_logging(cli.debug);

    // Load settings
    let mut settings = Settings::load(cli.config.as_ref())?;
    settings.merge_cli(&cli);
    settings.validate();

    match cli.command() {
        Command::Serve { .. } => serve(settings).await,
        Command::Send {
            command,
            timeout_ms,
            json,
        } => send(&settings, &command, Duration::from_millis(timeout_ms), json),
        Command::Ping => ping(&settings),
    }
}

fn setup_logging(debug: bool) {
    let filter = if debug {
        EnvFilter::new("cmdpipe=debug,cmdpipe_core=debug")
    } else {
        EnvFilter::new("cmdpipe=info,cmdpipe_core=info")
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();
}

/// Run the server and execution thread until Ctrl-C
async fn serve(settings: Settings) -> Result<()> {
    let channel = Arc::new(IpcChannel::new());
    let mut server = PipeServer::start(channel.clone(), &settings.ipc)?;
    let executor = spawn_execution_thread(
        channel.clone(),
        SimulatedHost::new(),
        settings.host.tick_interval(),
    )?;

    tracing::info!(
        "Listening on {} (tick {}ms)",
        server.socket_path().display(),
        settings.host.tick_interval_ms
    );

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;

    tracing::info!("Shutting down");
    if server.shutdown() == ShutdownOutcome::TimedOut {
        tracing::warn!("IPC thread was abandoned during shutdown");
    }
    if executor.join().is_err() {
        tracing::warn!("Execution thread panicked");
    }
    Ok(())
}

fn connect(settings: &Settings) -> Result<PipeClient> {
    let path = settings.ipc.resolved_socket_path();
    PipeClient::connect(&path, settings.ipc.connect_timeout())
        .with_context(|| format!("Failed to connect to {}", path.display()))
}

/// Send one command and print the raw or decoded response
fn send(settings: &Settings, command: &str, timeout: Duration, json: bool) -> Result<()> {
    let mut client = connect(settings)?;
    let response = client
        .send_receive_raw(command, timeout)
        .with_context(|| format!("No answer to {:?}", command))?;

    if !json {
        println!("{}", response);
        return Ok(());
    }

    let request = parse_command(command);
    let output = match parse_response(&request, &response) {
        Ok(parsed) => serde_json::json!({
            "command": command,
            "response": response,
            "parsed": parsed,
        }),
        Err(e) => serde_json::json!({
            "command": command,
            "response": response,
            "error": e.to_string(),
        }),
    };
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

fn ping(settings: &Settings) -> Result<()> {
    let mut client = connect(settings)?;
    client.ping().context("Ping failed")?;
    println!("PONG");
    Ok(())
}
