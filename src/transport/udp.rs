// src/transport/udp.rs - UDP publisher for motion commands
use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::sync::Mutex;

use super::{encode_command, CommandPublisher, PublishError};
use crate::command::MotionCommand;

/// Publisher statistics
#[derive(Debug, Clone, Default)]
pub struct PublishStats {
    pub messages_sent: u64,
    pub bytes_sent: u64,
    pub errors: u64,
}

/// Sends each command as one datagram to a fixed peer.
///
/// The socket is non-blocking so a slow or absent receiver can never stall
/// the control loop; a full send buffer counts as a dropped command.
pub struct UdpCommandPublisher {
    socket: UdpSocket,
    topic: String,
    peer: SocketAddr,
    stats: Mutex<PublishStats>,
}

impl UdpCommandPublisher {
    pub fn bind(topic: &str, peer: SocketAddr) -> io::Result<Self> {
        let local: SocketAddr = if peer.is_ipv4() {
            SocketAddr::from(([0, 0, 0, 0], 0))
        } else {
            SocketAddr::from(([0u16; 8], 0))
        };
        let socket = UdpSocket::bind(local)?;
        socket.connect(peer)?;
        socket.set_nonblocking(true)?;
        tracing::info!("Publishing '{}' to udp://{}", topic, peer);
        Ok(Self {
            socket,
            topic: topic.to_string(),
            peer,
            stats: Mutex::new(PublishStats::default()),
        })
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn stats(&self) -> PublishStats {
        self.stats.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl CommandPublisher for UdpCommandPublisher {
    fn publish(&self, command: &MotionCommand) -> Result<(), PublishError> {
        let payload = encode_command(&self.topic, command)?;
        let result = self.socket.send(&payload);
        let mut stats = self.stats.lock().unwrap_or_else(|e| e.into_inner());
        match result {
            Ok(sent) => {
                stats.messages_sent += 1;
                stats.bytes_sent += sent as u64;
                Ok(())
            }
            Err(e) => {
                stats.errors += 1;
                Err(PublishError::Io(e))
            }
        }
    }
}

impl std::fmt::Debug for UdpCommandPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UdpCommandPublisher")
            .field("topic", &self.topic)
            .field("peer", &self.peer)
            .finish()
    }
}
