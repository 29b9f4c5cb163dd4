// src/error.rs - Fatal startup failures
use thiserror::Error;

use crate::config::ConfigError;
use crate::gate::GateError;
use crate::keys::KeyReaderError;

/// Anything that stops the controller before the first tick.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("terminal error: {0}")]
    Terminal(#[from] KeyReaderError),
    #[error("cannot open command publisher: {0}")]
    Publisher(#[source] std::io::Error),
    #[error("gate error: {0}")]
    Gate(#[from] GateError),
}
