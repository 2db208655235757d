//! Reachability probing of one protocol against one server IP
//!
//! A probing round pings every candidate port concurrently, in shuffled
//! order, and collects the ports that answered before the checker's timeout.

use async_trait::async_trait;
use rand::seq::SliceRandom;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::models::protocol::VpnProtocol;
use crate::models::server::ServerIp;

/// Outcome of a probing round
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Availability {
    Available { ports: Vec<u16> },
    Unavailable,
}

impl Availability {
    pub fn ports(&self) -> &[u16] {
        match self {
            Availability::Available { ports } => ports,
            Availability::Unavailable => &[],
        }
    }

    pub fn is_available(&self) -> bool {
        matches!(self, Availability::Available { .. })
    }
}

/// Probes a single protocol
#[async_trait]
pub trait AvailabilityChecker: Send + Sync {
    fn protocol(&self) -> VpnProtocol;

    /// Upper bound for one ping; slower answers count as unreachable
    fn timeout(&self) -> Duration;

    /// Whether `port` on the IP's entry point for this protocol answers
    async fn ping(&self, server_ip: &ServerIp, port: u16) -> bool;
}

/// Runs one probing round over `ports`
#[tracing::instrument(skip_all, fields(protocol = %checker.protocol(), server = %server_ip.domain))]
pub async fn check_availability(
    checker: Arc<dyn AvailabilityChecker>,
    server_ip: Arc<ServerIp>,
    ports: &[u16],
) -> Availability {
    let mut shuffled = ports.to_vec();
    shuffled.shuffle(&mut rand::thread_rng());

    let timeout = checker.timeout();
    let mut pings = JoinSet::new();
    for port in shuffled {
        let checker = checker.clone();
        let server_ip = server_ip.clone();
        pings.spawn(async move {
            let answered = tokio::time::timeout(timeout, checker.ping(&server_ip, port))
                .await
                .unwrap_or(false);
            (port, answered)
        });
    }

    let mut available = Vec::new();
    while let Some(result) = pings.join_next().await {
        match result {
            Ok((port, true)) => {
                debug!(port = port, "Port answered");
                available.push(port);
            }
            Ok((port, false)) => debug!(port = port, "Port did not answer"),
            Err(e) => warn!("Ping task failed: {}", e),
        }
    }

    if available.is_empty() {
        Availability::Unavailable
    } else {
        Availability::Available { ports: available }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::protocol::OpenVpnTransport;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct OddPortsAnswer {
        pings: AtomicUsize,
    }

    #[async_trait]
    impl AvailabilityChecker for OddPortsAnswer {
        fn protocol(&self) -> VpnProtocol {
            VpnProtocol::OpenVpn(OpenVpnTransport::Udp)
        }

        fn timeout(&self) -> Duration {
            Duration::from_secs(3)
        }

        async fn ping(&self, _server_ip: &ServerIp, port: u16) -> bool {
            self.pings.fetch_add(1, Ordering::SeqCst);
            if port == 9 {
                // never answers
                std::future::pending::<()>().await;
            }
            port % 2 == 1
        }
    }

    fn server_ip() -> Arc<ServerIp> {
        Arc::new(ServerIp {
            id: "ip".to_string(),
            entry_ip: Some("127.0.0.1".to_string()),
            exit_ip: "127.0.0.2".to_string(),
            domain: "node.example.net".to_string(),
            status: 1,
            x25519_public_key: None,
            label: None,
            entry_per_protocol: None,
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_round_collects_answering_ports() {
        // Given a checker where odd ports answer and port 9 hangs
        let checker = Arc::new(OddPortsAnswer {
            pings: AtomicUsize::new(0),
        });

        // When probing five ports
        let availability = check_availability(checker.clone(), server_ip(), &[1, 2, 3, 4, 9]).await;

        // Then every port was pinged once and the hanging one timed out
        assert_eq!(checker.pings.load(Ordering::SeqCst), 5);
        let mut ports = availability.ports().to_vec();
        ports.sort_unstable();
        assert_eq!(ports, vec![1, 3]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_round_without_answers_is_unavailable() {
        let checker = Arc::new(OddPortsAnswer {
            pings: AtomicUsize::new(0),
        });

        let availability = check_availability(checker, server_ip(), &[2, 4]).await;

        assert_eq!(availability, Availability::Unavailable);
        assert!(!availability.is_available());
    }
}
