//! Outward wiring: the motion command topic and the gate service client.
//!
//! # Wire Format
//!
//! Commands go out as one JSON object per UDP datagram, tagged with the
//! logical topic:
//!
//! ```text
//! {"topic":"luci/remote_joystick","forward_back":100,"left_right":0,"joystick_zone":0,"input_source":1}
//! ```
//!
//! Gate requests are one JSON line per TCP connection, answered by one line:
//!
//! ```text
//! -> {"service":"/luci/set_auto_remote_input"}
//! <- {"ok":true}
//! ```

pub mod gate_client;
pub mod udp;

use serde::Serialize;
use thiserror::Error;

use crate::command::MotionCommand;

pub use gate_client::TcpGateClient;
pub use udp::UdpCommandPublisher;

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("encode error: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Sends one command outward. Fire-and-forget: no acknowledgement is awaited.
pub trait CommandPublisher: Send + Sync {
    fn publish(&self, command: &MotionCommand) -> Result<(), PublishError>;
}

impl<P: CommandPublisher + ?Sized> CommandPublisher for std::sync::Arc<P> {
    fn publish(&self, command: &MotionCommand) -> Result<(), PublishError> {
        (**self).publish(command)
    }
}

impl<P: CommandPublisher + ?Sized> CommandPublisher for Box<P> {
    fn publish(&self, command: &MotionCommand) -> Result<(), PublishError> {
        (**self).publish(command)
    }
}

#[derive(Debug, Serialize)]
struct TopicMessage<'a> {
    topic: &'a str,
    #[serde(flatten)]
    command: &'a MotionCommand,
}

/// Encode a command for `topic` in the datagram format above.
pub fn encode_command(topic: &str, command: &MotionCommand) -> Result<Vec<u8>, serde_json::Error> {
    serde_json::to_vec(&TopicMessage { topic, command })
}
