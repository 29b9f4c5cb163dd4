// src/mapper.rs - Keypress to motion command mapping
use crate::command::{Direction, MotionCommand};
use crate::config::MapperConfig;
use crate::keys::KeyEvent;

pub const ARROW_UP: &[u8] = b"\x1b[A";
pub const ARROW_DOWN: &[u8] = b"\x1b[B";
pub const ARROW_RIGHT: &[u8] = b"\x1b[C";
pub const ARROW_LEFT: &[u8] = b"\x1b[D";

/// Pure, total mapping from a key to a command.
///
/// Arrow keys are matched on their exact escape sequence; every other input,
/// including partial sequences, maps to the stop command.
#[derive(Debug, Clone)]
pub struct CommandMapper {
    config: MapperConfig,
}

impl CommandMapper {
    pub fn new(config: MapperConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &MapperConfig {
        &self.config
    }

    pub fn map(&self, event: &KeyEvent) -> MotionCommand {
        self.classify(event).1
    }

    /// Map a key and report which direction it was recognised as.
    pub fn classify(&self, event: &KeyEvent) -> (Direction, MotionCommand) {
        let cfg = &self.config;
        match event.as_bytes() {
            ARROW_UP => (Direction::Forward, MotionCommand::new(cfg.up_magnitude, 0)),
            ARROW_DOWN => (Direction::Back, MotionCommand::new(cfg.down_magnitude, 0)),
            ARROW_LEFT => (Direction::Left, MotionCommand::new(0, -cfg.lateral_magnitude)),
            ARROW_RIGHT => (Direction::Right, MotionCommand::new(0, cfg.lateral_magnitude)),
            _ => (Direction::Unknown, MotionCommand::origin()),
        }
    }
}

impl Default for CommandMapper {
    fn default() -> Self {
        Self::new(MapperConfig::default())
    }
}
