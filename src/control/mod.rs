//! Watchdog tick loop.
//!
//! Every tick waits a bounded time for one key and emits exactly one command.
//! No key in time is indistinguishable, downstream, from an explicit stop.

// src/control/mod.rs - Fixed-period driver around the key reader
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::MissedTickBehavior;

use crate::command::{Direction, MotionCommand};
use crate::config::ControlConfig;
use crate::gate::GateController;
use crate::keys::{KeySource, ReadOutcome};
use crate::mapper::CommandMapper;
use crate::transport::CommandPublisher;


#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickState {
    Idle,
    AwaitingKey,
    Dispatching,
    Stopping,
    Terminal,
}

/// Why the loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopExit {
    /// A quit key was pressed.
    UserRequested,
    /// The process was asked to stop from outside.
    Shutdown,
}

/// What a single tick decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    Continue(MotionCommand),
    Exit(MotionCommand),
}

impl Tick {
    pub fn command(&self) -> MotionCommand {
        match self {
            Tick::Continue(cmd) | Tick::Exit(cmd) => *cmd,
        }
    }
}

/// Loop statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoopStats {
    pub ticks: u64,
    pub commands_emitted: u64,
    pub mapped: u64,
    pub unmapped: u64,
    pub timeouts: u64,
    pub read_errors: u64,
    pub publish_errors: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopTiming {
    pub tick_period: Duration,
    pub key_timeout: Duration,
}

impl From<&ControlConfig> for LoopTiming {
    fn from(config: &ControlConfig) -> Self {
        Self {
            tick_period: config.tick_period(),
            key_timeout: config.key_timeout(),
        }
    }
}

impl Default for LoopTiming {
    fn default() -> Self {
        Self::from(&ControlConfig::default())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopSummary {
    pub exit: LoopExit,
    pub stats: LoopStats,
}

pub struct WatchdogLoop<K, P> {
    reader: K,
    mapper: CommandMapper,
    publisher: P,
    gate: GateController,
    timing: LoopTiming,
    state: TickState,
    stats: LoopStats,
}

impl<K, P> WatchdogLoop<K, P>
where
    K: KeySource,
    P: CommandPublisher,
{
    pub fn new(
        reader: K,
        mapper: CommandMapper,
        publisher: P,
        gate: GateController,
        timing: LoopTiming,
    ) -> Self {
        Self {
            reader,
            mapper,
            publisher,
            gate,
            timing,
            state: TickState::Idle,
            stats: LoopStats::default(),
        }
    }

    pub fn state(&self) -> TickState {
        self.state
    }

    pub fn stats(&self) -> &LoopStats {
        &self.stats
    }

    pub fn reader(&self) -> &K {
        &self.reader
    }

    /// Run one tick: wait for a key, decide, emit exactly one command.
    ///
    /// Blocks the calling thread for up to the key timeout.
    pub fn tick(&mut self) -> Tick {
        self.stats.ticks += 1;
        self.state = TickState::AwaitingKey;

        let outcome = match self.reader.read_key(self.timing.key_timeout) {
            Ok(outcome) => outcome,
            Err(e) => {
                // Treated like silence: the device still gets its stop.
                tracing::warn!("Key read failed: {}", e);
                self.stats.read_errors += 1;
                ReadOutcome::Timeout
            }
        };

        match outcome {
            ReadOutcome::Timeout => {
                self.state = TickState::Stopping;
                self.stats.timeouts += 1;
                let command = MotionCommand::origin();
                self.emit(Direction::Idle, &command);
                self.state = TickState::Idle;
                Tick::Continue(command)
            }
            ReadOutcome::Data(event) => {
                self.state = TickState::Dispatching;
                tracing::debug!("Key bytes: {}", event);
                let (direction, command) = self.mapper.classify(&event);
                if direction == Direction::Unknown {
                    self.stats.unmapped += 1;
                } else {
                    self.stats.mapped += 1;
                }
                self.emit(direction, &command);
                self.state = TickState::Idle;
                Tick::Continue(command)
            }
            ReadOutcome::ExitRequested => {
                self.state = TickState::Stopping;
                let command = MotionCommand::origin();
                self.emit(Direction::Idle, &command);
                tracing::info!("Quit key pressed, stopping keyboard control");
                if let Err(e) = self.gate.disable() {
                    tracing::warn!("Could not request gate disable: {}", e);
                }
                self.state = TickState::Terminal;
                Tick::Exit(command)
            }
        }
    }

    fn emit(&mut self, direction: Direction, command: &MotionCommand) {
        self.stats.commands_emitted += 1;
        if let Err(e) = self.publisher.publish(command) {
            self.stats.publish_errors += 1;
            tracing::warn!("Failed to publish command: {}", e);
        }
        tracing::info!(
            "dir: {} js_zone:{}| Publishing: {} {}",
            direction,
            command.zone().code(),
            command.forward_back(),
            command.left_right()
        );
    }

    /// Drive ticks at the fixed period until a quit key or a shutdown signal.
    ///
    /// Must run on a multi-threaded runtime: the key wait is done with
    /// `block_in_place` so gate requests keep completing elsewhere.
    pub async fn run(mut self, mut shutdown_rx: broadcast::Receiver<()>) -> LoopSummary {
        let mut interval = tokio::time::interval(self.timing.tick_period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tracing::info!(
            "Watchdog loop running: tick {:?}, key wait {:?}",
            self.timing.tick_period,
            self.timing.key_timeout
        );

        let exit = loop {
            tokio::select! {
                biased;
                _ = shutdown_rx.recv() => {
                    tracing::info!("Watchdog loop shutting down");
                    break LoopExit::Shutdown;
                }
                _ = interval.tick() => {
                    if let Tick::Exit(_) = tokio::task::block_in_place(|| self.tick()) {
                        break LoopExit::UserRequested;
                    }
                }
            }
        };

        tracing::info!(
            "Watchdog loop stopped after {} ticks ({} timeouts)",
            self.stats.ticks,
            self.stats.timeouts
        );
        LoopSummary {
            exit,
            stats: self.stats,
        }
    }
}
