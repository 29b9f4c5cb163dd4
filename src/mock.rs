//! In-memory collaborators for exercising the control loop without a
//! terminal or network.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use crate::command::MotionCommand;
use crate::gate::{GateError, GateOp, GateService};
use crate::keys::{KeyEvent, KeyReaderError, KeySource, ReadOutcome};
use crate::transport::{CommandPublisher, PublishError};

/// Gate service that records every call.
#[derive(Debug, Default)]
pub struct MockGateService {
    calls: Mutex<Vec<GateOp>>,
    delay: Duration,
    fail: bool,
    available: bool,
}

impl MockGateService {
    pub fn new() -> Self {
        Self {
            available: true,
            ..Self::default()
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn failing(mut self) -> Self {
        self.fail = true;
        self
    }

    pub fn unavailable(mut self) -> Self {
        self.available = false;
        self
    }

    pub fn calls(&self) -> Vec<GateOp> {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

#[async_trait]
impl GateService for MockGateService {
    async fn call(&self, op: GateOp) -> Result<(), GateError> {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).push(op);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.fail {
            return Err(GateError::Rejected(format!("{} refused", op)));
        }
        Ok(())
    }

    async fn probe(&self, _wait: Duration) -> bool {
        self.available
    }
}

/// Publisher that keeps every command it was given.
#[derive(Debug, Clone, Default)]
pub struct MockPublisher {
    published: Arc<Mutex<Vec<MotionCommand>>>,
    fail: bool,
}

impl MockPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the command, then reports a send failure.
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn published(&self) -> Vec<MotionCommand> {
        self.published.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

impl CommandPublisher for MockPublisher {
    fn publish(&self, command: &MotionCommand) -> Result<(), PublishError> {
        self.published.lock().unwrap_or_else(PoisonError::into_inner).push(*command);
        if self.fail {
            return Err(PublishError::Io(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                "mock publisher down",
            )));
        }
        Ok(())
    }
}

/// One scripted step for [`ScriptedKeys`].
#[derive(Debug)]
pub enum Scripted {
    Outcome(ReadOutcome),
    Error(KeyReaderError),
}

/// Key source that replays a fixed script, then times out forever.
#[derive(Debug, Default)]
pub struct ScriptedKeys {
    script: VecDeque<Scripted>,
    waits: Vec<Duration>,
}

impl ScriptedKeys {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn key(mut self, bytes: &[u8]) -> Self {
        self.script
            .push_back(Scripted::Outcome(ReadOutcome::Data(KeyEvent::new(bytes.to_vec()))));
        self
    }

    pub fn timeout(mut self) -> Self {
        self.script.push_back(Scripted::Outcome(ReadOutcome::Timeout));
        self
    }

    pub fn quit(mut self) -> Self {
        self.script.push_back(Scripted::Outcome(ReadOutcome::ExitRequested));
        self
    }

    pub fn error(mut self, error: KeyReaderError) -> Self {
        self.script.push_back(Scripted::Error(error));
        self
    }

    /// Timeouts passed to each `read_key` call so far.
    pub fn waits(&self) -> &[Duration] {
        &self.waits
    }
}

impl KeySource for ScriptedKeys {
    fn read_key(&mut self, timeout: Duration) -> Result<ReadOutcome, KeyReaderError> {
        self.waits.push(timeout);
        match self.script.pop_front() {
            Some(Scripted::Outcome(outcome)) => Ok(outcome),
            Some(Scripted::Error(e)) => Err(e),
            None => Ok(ReadOutcome::Timeout),
        }
    }
}
