//! WireGuard reachability probes
//!
//! TCP and TLS transports terminate on a TCP listener, so a completed
//! connect is enough. A UDP probe needs a real handshake with the server's
//! X25519 key and is delegated to a `WireguardPinger`.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tracing::debug;

use super::checker::AvailabilityChecker;
use crate::models::protocol::{VpnProtocol, WireGuardTransport};
use crate::models::server::ServerIp;

/// Performs a WireGuard handshake over UDP
#[async_trait]
pub trait WireguardPinger: Send + Sync {
    async fn ping(&self, host: &str, port: u16, server_public_key: &str) -> bool;
}

/// Connect-only probe for WireGuard over TCP or TLS
pub struct WireguardStreamChecker {
    transport: WireGuardTransport,
    timeout: Duration,
}

impl WireguardStreamChecker {
    /// `None` for UDP, which cannot be probed with a connect
    pub fn new(transport: WireGuardTransport, timeout: Duration) -> Option<Self> {
        match transport {
            WireGuardTransport::Udp => None,
            WireGuardTransport::Tcp | WireGuardTransport::Tls => Some(Self { transport, timeout }),
        }
    }
}

#[async_trait]
impl AvailabilityChecker for WireguardStreamChecker {
    fn protocol(&self) -> VpnProtocol {
        VpnProtocol::WireGuard(self.transport)
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn ping(&self, server_ip: &ServerIp, port: u16) -> bool {
        let Some(host) = server_ip.entry_ip(self.protocol()) else {
            return false;
        };
        match TcpStream::connect((host, port)).await {
            Ok(_) => true,
            Err(e) => {
                debug!(host = host, port = port, "WireGuard connect failed: {}", e);
                false
            }
        }
    }
}

pub struct WireguardUdpChecker {
    pinger: Arc<dyn WireguardPinger>,
    timeout: Duration,
}

impl WireguardUdpChecker {
    pub fn new(pinger: Arc<dyn WireguardPinger>, timeout: Duration) -> Self {
        Self { pinger, timeout }
    }
}

#[async_trait]
impl AvailabilityChecker for WireguardUdpChecker {
    fn protocol(&self) -> VpnProtocol {
        VpnProtocol::WireGuard(WireGuardTransport::Udp)
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn ping(&self, server_ip: &ServerIp, port: u16) -> bool {
        let Some(host) = server_ip.entry_ip(self.protocol()) else {
            return false;
        };
        let Some(key) = server_ip.x25519_public_key.as_deref() else {
            debug!(server = %server_ip.domain, "No X25519 key published, skipping UDP probe");
            return false;
        };
        self.pinger.ping(host, port, key).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    struct RecordingPinger;

    #[async_trait]
    impl WireguardPinger for RecordingPinger {
        async fn ping(&self, _host: &str, port: u16, server_public_key: &str) -> bool {
            port == 51820 && server_public_key == "server-key"
        }
    }

    fn local_ip(key: Option<&str>) -> ServerIp {
        ServerIp {
            id: "local".to_string(),
            entry_ip: Some("127.0.0.1".to_string()),
            exit_ip: "127.0.0.1".to_string(),
            domain: "localhost".to_string(),
            status: 1,
            x25519_public_key: key.map(str::to_string),
            label: None,
            entry_per_protocol: None,
        }
    }

    #[test]
    fn test_udp_has_no_stream_checker() {
        assert!(WireguardStreamChecker::new(WireGuardTransport::Udp, Duration::from_secs(1)).is_none());
    }

    #[tokio::test]
    async fn test_tcp_connect_means_available() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let checker = WireguardStreamChecker::new(WireGuardTransport::Tls, Duration::from_secs(1)).unwrap();

        assert!(checker.ping(&local_ip(None), port).await);

        drop(listener);
        assert!(!checker.ping(&local_ip(None), port).await);
    }

    #[tokio::test]
    async fn test_udp_probe_requires_server_key() {
        let checker = WireguardUdpChecker::new(Arc::new(RecordingPinger), Duration::from_secs(1));

        assert!(checker.ping(&local_ip(Some("server-key")), 51820).await);
        assert!(!checker.ping(&local_ip(None), 51820).await);
    }
}
