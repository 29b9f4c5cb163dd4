//! Keyboard teleoperation for a mobility base.
//!
//! Arrow keys become joystick-equivalent motion commands, sent at a fixed
//! cadence. When no key arrives within the wait, a stop command goes out
//! instead, so the base never keeps moving on stale input.

pub mod command;
pub mod config;
pub mod control;
pub mod error;
pub mod gate;
pub mod keys;
pub mod mapper;
pub mod mock;
pub mod transport;

pub use command::{Direction, InputSource, JoystickZone, MotionCommand};
pub use config::{load_config, Config, ConfigError};
pub use control::{LoopExit, LoopSummary, LoopTiming, Tick, TickState, WatchdogLoop};
pub use error::StartupError;
pub use gate::{GateController, GateError, GateOp, GateService, GateState};
pub use keys::{KeyEvent, KeySource, ReadOutcome, TerminalKeyReader};
pub use mapper::CommandMapper;
pub use transport::{CommandPublisher, TcpGateClient, UdpCommandPublisher};
