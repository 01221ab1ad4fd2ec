//! TCP reachability probe used as the path monitor.

use async_trait::async_trait;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout};
use tracing::debug;

use crate::network::PathMonitor;

/// Reports connectivity by opening a TCP connection to a known host.
///
/// The first update is produced immediately, later ones every `interval`.
#[derive(Debug, Clone)]
pub struct TcpProbe {
    address: String,
    interval: Duration,
    connect_timeout: Duration,
    started: bool,
}

impl TcpProbe {
    /// Create a probe for `host:port`.
    pub fn new(host: &str, port: u16, interval: Duration, connect_timeout: Duration) -> Self {
        Self {
            address: format!("{}:{}", host, port),
            interval,
            connect_timeout,
            started: false,
        }
    }

    /// Probe once.
    pub async fn check(&self) -> bool {
        match timeout(self.connect_timeout, TcpStream::connect(&self.address)).await {
            Ok(Ok(_)) => true,
            Ok(Err(e)) => {
                debug!("Probe to {} failed: {}", self.address, e);
                false
            }
            Err(_) => {
                debug!("Probe to {} timed out", self.address);
                false
            }
        }
    }
}

#[async_trait]
impl PathMonitor for TcpProbe {
    async fn next_update(&mut self) -> Option<bool> {
        if self.started {
            sleep(self.interval).await;
        }
        self.started = true;
        Some(self.check().await)
    }
}
