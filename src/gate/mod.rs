// src/gate/mod.rs - Manual-input permission gate
pub mod controller;

use async_trait::async_trait;
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tokio::time::{sleep, Instant};

pub use controller::GateController;

#[derive(Debug, Error)]
pub enum GateError {
    #[error("gate service {0} unavailable")]
    Unavailable(String),
    #[error("a {0} request is still pending")]
    RequestPending(GateOp),
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),
    #[error("request rejected: {0}")]
    Rejected(String),
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("request task cancelled")]
    Cancelled,
}

/// The two remote operations on the gate. Neither carries a payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GateOp {
    Enable,
    Disable,
}

impl GateOp {
    /// State the gate is in once this operation has been acknowledged.
    pub fn target(self) -> GateState {
        match self {
            GateOp::Enable => GateState::Enabled,
            GateOp::Disable => GateState::Disabled,
        }
    }
}

impl fmt::Display for GateOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GateOp::Enable => write!(f, "enable manual input"),
            GateOp::Disable => write!(f, "disable manual input"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum GateState {
    Enabled,
    #[default]
    Disabled,
}

/// Remote endpoint that grants or revokes manual input.
#[async_trait]
pub trait GateService: Send + Sync {
    /// Issue one operation and wait for its acknowledgement.
    async fn call(&self, op: GateOp) -> Result<(), GateError>;

    /// Whether the endpoint is reachable, waiting at most `wait`.
    async fn probe(&self, wait: Duration) -> bool;

    /// Name used in log lines.
    fn name(&self, op: GateOp) -> String {
        op.to_string()
    }
}

/// Poll until the gate endpoint answers. `max_attempts == 0` waits forever.
pub async fn wait_for_service(
    service: &dyn GateService,
    wait: Duration,
    max_attempts: u32,
) -> Result<(), GateError> {
    let mut attempts = 0u32;
    loop {
        let started = Instant::now();
        if service.probe(wait).await {
            tracing::info!("Gate service {} is available", service.name(GateOp::Enable));
            return Ok(());
        }
        attempts += 1;
        if max_attempts != 0 && attempts >= max_attempts {
            return Err(GateError::Unavailable(service.name(GateOp::Enable)));
        }
        tracing::info!("Waiting for {} service...", service.name(GateOp::Enable));
        // A refused connection returns at once; keep the poll rate at `wait`.
        let elapsed = started.elapsed();
        if elapsed < wait {
            sleep(wait - elapsed).await;
        }
    }
}
