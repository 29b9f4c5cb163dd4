// src/transport/gate_client.rs - TCP client for the manual-input gate service
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::config::{ConfigError, TransportConfig};
use crate::gate::{GateError, GateOp, GateService};

#[derive(Debug, Serialize)]
struct GateRequest<'a> {
    service: &'a str,
}

#[derive(Debug, Deserialize)]
struct GateReply {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
}

/// One connection per request, one JSON line each way.
#[derive(Debug, Clone)]
pub struct TcpGateClient {
    addr: SocketAddr,
    enable_service: String,
    disable_service: String,
    request_timeout: Duration,
}

impl TcpGateClient {
    pub fn new(
        addr: SocketAddr,
        enable_service: impl Into<String>,
        disable_service: impl Into<String>,
        request_timeout: Duration,
    ) -> Self {
        Self {
            addr,
            enable_service: enable_service.into(),
            disable_service: disable_service.into(),
            request_timeout,
        }
    }

    pub fn from_config(config: &TransportConfig) -> Result<Self, ConfigError> {
        Ok(Self::new(
            config.gate_socket_addr()?,
            config.enable_service.clone(),
            config.disable_service.clone(),
            config.service_wait(),
        ))
    }

    fn service_for(&self, op: GateOp) -> &str {
        match op {
            GateOp::Enable => &self.enable_service,
            GateOp::Disable => &self.disable_service,
        }
    }

    async fn exchange(&self, op: GateOp) -> Result<(), GateError> {
        let mut stream = TcpStream::connect(self.addr).await?;
        let mut line = serde_json::to_vec(&GateRequest {
            service: self.service_for(op),
        })
        .map_err(|e| GateError::Protocol(e.to_string()))?;
        line.push(b'\n');
        stream.write_all(&line).await?;
        stream.flush().await?;

        let mut reader = BufReader::new(stream);
        let mut reply = String::new();
        if reader.read_line(&mut reply).await? == 0 {
            return Err(GateError::Protocol("connection closed before reply".to_string()));
        }
        tracing::debug!("Gate RX: {}", reply.trim());
        let reply: GateReply =
            serde_json::from_str(reply.trim()).map_err(|e| GateError::Protocol(e.to_string()))?;
        if reply.ok {
            Ok(())
        } else {
            Err(GateError::Rejected(
                reply.error.unwrap_or_else(|| "no reason given".to_string()),
            ))
        }
    }
}

#[async_trait]
impl GateService for TcpGateClient {
    async fn call(&self, op: GateOp) -> Result<(), GateError> {
        match timeout(self.request_timeout, self.exchange(op)).await {
            Ok(result) => result,
            Err(_) => Err(GateError::Transport(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                format!("no reply from {} within {:?}", self.service_for(op), self.request_timeout),
            ))),
        }
    }

    async fn probe(&self, wait: Duration) -> bool {
        matches!(timeout(wait, TcpStream::connect(self.addr)).await, Ok(Ok(_)))
    }

    fn name(&self, op: GateOp) -> String {
        self.service_for(op).to_string()
    }
}
