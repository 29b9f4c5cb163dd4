// src/keys/mod.rs - Single-keypress input with a bounded wait
pub mod terminal;

use std::fmt;
use std::time::Duration;
use thiserror::Error;

pub use terminal::{TerminalKeyReader, TerminalRestore};

#[derive(Debug, Error)]
pub enum KeyReaderError {
    #[error("stdin is not a terminal")]
    NotATerminal,
    #[error("cannot configure terminal: {0}")]
    RawMode(std::io::Error),
    #[error("poll failed: {0}")]
    Poll(std::io::Error),
    #[error("read failed: {0}")]
    Read(std::io::Error),
}

/// Raw codes produced by one keypress. Arrow keys arrive as a three byte
/// escape sequence, printable keys as a single byte.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyEvent {
    bytes: Vec<u8>,
}

impl KeyEvent {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self { bytes: bytes.into() }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

impl fmt::Display for KeyEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.bytes.escape_ascii())
    }
}

/// Result of one bounded wait. Exactly one per tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadOutcome {
    Data(KeyEvent),
    Timeout,
    ExitRequested,
}

impl ReadOutcome {
    /// Sort a fully assembled key into data or an exit request.
    pub fn classify(bytes: Vec<u8>, quit_sequences: &[Vec<u8>]) -> Self {
        if quit_sequences.iter().any(|q| *q == bytes) {
            ReadOutcome::ExitRequested
        } else {
            ReadOutcome::Data(KeyEvent::new(bytes))
        }
    }
}

/// Anything that can hand the control loop one keypress at a time.
pub trait KeySource: Send {
    /// Wait at most `timeout` for input and report the newest key. Bytes
    /// read by one call are never seen by the next.
    fn read_key(&mut self, timeout: Duration) -> Result<ReadOutcome, KeyReaderError>;
}

impl<K: KeySource + ?Sized> KeySource for Box<K> {
    fn read_key(&mut self, timeout: Duration) -> Result<ReadOutcome, KeyReaderError> {
        (**self).read_key(timeout)
    }
}
