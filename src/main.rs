// src/main.rs - Keyboard teleop entry point
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::broadcast;
use tokio::task::JoinError;

use keyteleop::config::{self, Config};
use keyteleop::gate::{self, GateController};
use keyteleop::{
    CommandMapper, LoopExit, LoopSummary, LoopTiming, StartupError, TcpGateClient,
    TerminalKeyReader, UdpCommandPublisher, WatchdogLoop,
};

/// Status for a failure before the first tick.
const EXIT_STARTUP_FAILURE: u8 = 2;
/// Status after SIGINT/SIGTERM, following the shell's 128 + SIGINT convention.
const EXIT_SIGNALLED: u8 = 130;
/// Status when the control task panicked, matching Rust's own panic status.
const EXIT_CRASHED: u8 = 101;

/// How a session that got past startup ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionEnd {
    Loop(LoopExit),
    Crashed,
}

/// Keyboard teleop CLI
#[derive(Parser, Debug)]
#[command(name = "keyteleop", about = "Drive a mobility base with the arrow keys, with a dead-man's switch.")]
struct Cli {
    /// Path to a TOML config file (built-in defaults otherwise)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log at debug level, including raw key bytes
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main(flavor = "multi_thread", worker_threads = 2)]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_max_level(if cli.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        })
        .init();

    tracing::info!("Starting keyboard teleop");
    tracing::info!("Version: {}", env!("CARGO_PKG_VERSION"));

    match run(cli).await {
        Ok(SessionEnd::Loop(LoopExit::UserRequested)) => {
            eprintln!("\n keyboard control ended");
            ExitCode::SUCCESS
        }
        Ok(SessionEnd::Loop(LoopExit::Shutdown)) => {
            tracing::info!("Keyboard control stopped by signal");
            ExitCode::from(EXIT_SIGNALLED)
        }
        Ok(SessionEnd::Crashed) => {
            tracing::error!("Keyboard control crashed");
            ExitCode::from(EXIT_CRASHED)
        }
        Err(e) => {
            tracing::error!("Startup failed: {}", e);
            ExitCode::from(EXIT_STARTUP_FAILURE)
        }
    }
}

async fn run(cli: Cli) -> Result<SessionEnd, StartupError> {
    let config = match cli.config {
        Some(path) => {
            tracing::info!("Loading configuration from: {}", path.display());
            config::load_config(&path.to_string_lossy())?
        }
        None => Config::default(),
    };
    tracing::info!(
        "Tick {} ms, key wait {} ms, topic '{}'",
        config.control.tick_period_ms,
        config.control.key_timeout_ms,
        config.transport.topic
    );

    let reader = TerminalKeyReader::open(config.mapper.quit_sequences())?;
    let restore = reader.restore_handle();

    let publisher = UdpCommandPublisher::bind(
        &config.transport.topic,
        config.transport.publish_socket_addr()?,
    )
    .map_err(StartupError::Publisher)?;

    let client = Arc::new(TcpGateClient::from_config(&config.transport)?);
    gate::wait_for_service(
        client.as_ref(),
        config.transport.service_wait(),
        config.transport.service_max_attempts,
    )
    .await?;

    let gate = GateController::new(client, Handle::current());
    // Issued before the first tick; the acknowledgement is not awaited.
    if let Err(e) = gate.enable() {
        tracing::warn!("Could not request gate enable: {}", e);
    }

    let timing = LoopTiming::from(&config.control);
    let grace = config.transport.shutdown_grace();
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let watchdog = WatchdogLoop::new(
        reader,
        CommandMapper::new(config.mapper.clone()),
        publisher,
        gate.clone(),
        timing,
    );
    let mut control = tokio::spawn(watchdog.run(shutdown_rx));

    let exit = tokio::select! {
        joined = &mut control => session_end(joined),
        _ = shutdown_signal() => {
            let _ = shutdown_tx.send(());
            // The loop sees the request once the current key wait ends.
            let bound = timing.key_timeout + timing.tick_period;
            match tokio::time::timeout(bound, &mut control).await {
                Ok(Err(e)) => session_end(Err(e)),
                Ok(Ok(_)) => SessionEnd::Loop(LoopExit::Shutdown),
                Err(_) => {
                    tracing::warn!("Watchdog loop did not stop within {:?}", bound);
                    SessionEnd::Loop(LoopExit::Shutdown)
                }
            }
        }
    };

    gate.shutdown(grace).await;
    if let Err(e) = restore.restore() {
        tracing::warn!("Failed to restore terminal mode: {}", e);
    }
    Ok(exit)
}

fn session_end(joined: Result<LoopSummary, JoinError>) -> SessionEnd {
    match joined {
        Ok(summary) => {
            tracing::info!(
                "{} commands sent ({} mapped, {} unmapped, {} timeouts)",
                summary.stats.commands_emitted,
                summary.stats.mapped,
                summary.stats.unmapped,
                summary.stats.timeouts
            );
            SessionEnd::Loop(summary.exit)
        }
        Err(e) => {
            tracing::error!("Watchdog loop aborted: {}", e);
            SessionEnd::Crashed
        }
    }
}

async fn shutdown_signal() {
    let mut terminate = match signal(SignalKind::terminate()) {
        Ok(stream) => Some(stream),
        Err(e) => {
            tracing::warn!("Cannot listen for SIGTERM: {}", e);
            None
        }
    };
    let sigterm = async {
        match terminate.as_mut() {
            Some(stream) => {
                stream.recv().await;
            }
            None => std::future::pending::<()>().await,
        }
    };

    tokio::select! {
        result = tokio::signal::ctrl_c() => match result {
            Ok(()) => tracing::info!("Received SIGINT"),
            Err(e) => {
                tracing::warn!("Cannot listen for SIGINT: {}", e);
                std::future::pending::<()>().await
            }
        },
        _ = sigterm => tracing::info!("Received SIGTERM"),
    }
}
