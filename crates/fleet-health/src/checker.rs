//! Reachability probe logic.
//!
//! A bare TCP connect against the instance's administrative port is the
//! boot-completion signal. No protocol handshake is attempted; the
//! connection is dropped as soon as it opens.

use std::time::Duration;

use tokio::net::TcpStream;
use tracing::debug;

/// Result of a single reachability probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeResult {
    /// A connection was established.
    Reachable,
    /// The connection was refused, failed, or timed out.
    Failed,
}

/// Network check used by the readiness prober. Injected for testability.
#[allow(async_fn_in_trait)]
pub trait NetworkProbe {
    async fn probe(&self, host: &str, port: u16, timeout: Duration) -> ProbeResult;
}

/// Probes by opening a TCP connection.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpProbe;

impl NetworkProbe for TcpProbe {
    async fn probe(&self, host: &str, port: u16, timeout: Duration) -> ProbeResult {
        tcp_probe(host, port, timeout).await
    }
}

/// Attempt one TCP connection to `host:port`.
pub async fn tcp_probe(host: &str, port: u16, timeout: Duration) -> ProbeResult {
    match tokio::time::timeout(timeout, TcpStream::connect((host, port))).await {
        Ok(Ok(stream)) => {
            drop(stream);
            ProbeResult::Reachable
        }
        Ok(Err(e)) => {
            debug!(error = %e, %host, port, "reachability probe connection failed");
            ProbeResult::Failed
        }
        Err(_) => {
            debug!(%host, port, "reachability probe timed out");
            ProbeResult::Failed
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn open_port_is_reachable() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let result = tcp_probe("127.0.0.1", port, Duration::from_secs(1)).await;
        assert_eq!(result, ProbeResult::Reachable);
    }

    #[tokio::test]
    async fn closed_port_fails() {
        // Port 1 won't be listening.
        let result = TcpProbe.probe("127.0.0.1", 1, Duration::from_millis(200)).await;
        assert_eq!(result, ProbeResult::Failed);
    }
}
