//! OpenVPN reachability probe
//!
//! Sends a tls-auth signed P_CONTROL_HARD_RESET_CLIENT_V2 and treats any
//! reply as proof that the port is served. The signature uses the last 64
//! bytes of the static key with HMAC-SHA512.

use async_trait::async_trait;
use chrono::Utc;
use data_encoding::HEXLOWER_PERMISSIVE;
use std::io;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, UdpSocket};
use tracing::debug;

use super::checker::AvailabilityChecker;
use super::hmac::hmac_sha512;
use crate::error::ConfigValidationError;
use crate::models::protocol::{OpenVpnTransport, VpnProtocol};
use crate::models::server::ServerIp;

const P_CONTROL_HARD_RESET_CLIENT_V2: u8 = 7 << 3;
const HMAC_KEY_LEN: usize = 64;
const PACKET_ID: [u8; 4] = [0, 0, 0, 1];
const TRAILER: [u8; 5] = [0; 5];

/// Signing key for probes: the trailing 64 bytes of the hex static key
pub fn tls_auth_key(static_key: &str) -> Result<Vec<u8>, ConfigValidationError> {
    let bytes = HEXLOWER_PERMISSIVE
        .decode(static_key.trim().as_bytes())
        .map_err(|e| ConfigValidationError::InvalidStaticKey(e.to_string()))?;
    if bytes.len() < HMAC_KEY_LEN {
        return Err(ConfigValidationError::InvalidStaticKey(format!(
            "{} bytes",
            bytes.len()
        )));
    }
    Ok(bytes[bytes.len() - HMAC_KEY_LEN..].to_vec())
}

pub struct OpenVpnAvailabilityChecker {
    transport: OpenVpnTransport,
    key: Vec<u8>,
    timeout: Duration,
}

impl OpenVpnAvailabilityChecker {
    pub fn new(
        transport: OpenVpnTransport,
        static_key: &str,
        timeout: Duration,
    ) -> Result<Self, ConfigValidationError> {
        Ok(Self {
            transport,
            key: tls_auth_key(static_key)?,
            timeout,
        })
    }

    /// Hard reset handshake; TCP framing adds a big-endian length prefix
    fn handshake(&self, session_id: [u8; 8], timestamp: u32) -> Vec<u8> {
        let mut signed = Vec::with_capacity(22);
        signed.extend_from_slice(&PACKET_ID);
        signed.extend_from_slice(&timestamp.to_be_bytes());
        signed.push(P_CONTROL_HARD_RESET_CLIENT_V2);
        signed.extend_from_slice(&session_id);
        signed.extend_from_slice(&TRAILER);

        let hash = hmac_sha512(&self.key, &signed);

        let mut packet = Vec::with_capacity(2 + 1 + 8 + hash.len() + 13);
        packet.push(P_CONTROL_HARD_RESET_CLIENT_V2);
        packet.extend_from_slice(&session_id);
        packet.extend_from_slice(&hash);
        packet.extend_from_slice(&PACKET_ID);
        packet.extend_from_slice(&timestamp.to_be_bytes());
        packet.extend_from_slice(&TRAILER);

        match self.transport {
            OpenVpnTransport::Udp => packet,
            OpenVpnTransport::Tcp => {
                let mut framed = (packet.len() as u16).to_be_bytes().to_vec();
                framed.extend_from_slice(&packet);
                framed
            }
        }
    }
}

async fn udp_exchange(host: &str, port: u16, probe: &[u8]) -> io::Result<usize> {
    let socket = UdpSocket::bind(("0.0.0.0", 0)).await?;
    socket.connect((host, port)).await?;
    socket.send(probe).await?;
    let mut buffer = [0u8; 1024];
    socket.recv(&mut buffer).await
}

async fn tcp_exchange(host: &str, port: u16, probe: &[u8]) -> io::Result<usize> {
    let mut stream = TcpStream::connect((host, port)).await?;
    stream.write_all(probe).await?;
    let mut buffer = [0u8; 1024];
    stream.read(&mut buffer).await
}

#[async_trait]
impl AvailabilityChecker for OpenVpnAvailabilityChecker {
    fn protocol(&self) -> VpnProtocol {
        VpnProtocol::OpenVpn(self.transport)
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn ping(&self, server_ip: &ServerIp, port: u16) -> bool {
        let Some(host) = server_ip.entry_ip(self.protocol()) else {
            return false;
        };
        let probe = self.handshake(rand::random(), Utc::now().timestamp() as u32);

        let exchange = match self.transport {
            OpenVpnTransport::Udp => udp_exchange(host, port, &probe).await,
            OpenVpnTransport::Tcp => tcp_exchange(host, port, &probe).await,
        };
        match exchange {
            Ok(received) => received > 0,
            Err(e) => {
                debug!(host = host, port = port, "OpenVPN probe failed: {}", e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_OPENVPN_STATIC_KEY;
    use tokio::net::TcpListener;

    fn checker(transport: OpenVpnTransport) -> OpenVpnAvailabilityChecker {
        OpenVpnAvailabilityChecker::new(transport, DEFAULT_OPENVPN_STATIC_KEY, Duration::from_secs(3))
            .unwrap()
    }

    fn local_ip() -> ServerIp {
        ServerIp {
            id: "local".to_string(),
            entry_ip: Some("127.0.0.1".to_string()),
            exit_ip: "127.0.0.1".to_string(),
            domain: "localhost".to_string(),
            status: 1,
            x25519_public_key: None,
            label: None,
            entry_per_protocol: None,
        }
    }

    #[test]
    fn test_tls_auth_key_uses_trailing_bytes() {
        let key = tls_auth_key(DEFAULT_OPENVPN_STATIC_KEY).unwrap();
        assert_eq!(key.len(), HMAC_KEY_LEN);
        assert_eq!(key[0], 0xc3);
        assert_eq!(key[HMAC_KEY_LEN - 1], 0xeb);
    }

    #[test]
    fn test_tls_auth_key_rejects_short_keys() {
        assert!(tls_auth_key("abcd").is_err());
        assert!(tls_auth_key("not hex").is_err());
    }

    #[test]
    fn test_udp_handshake_layout() {
        let checker = checker(OpenVpnTransport::Udp);
        let sid = [1, 2, 3, 4, 5, 6, 7, 8];

        let packet = checker.handshake(sid, 0x0102_0304);

        assert_eq!(packet.len(), 1 + 8 + 64 + 4 + 4 + 5);
        assert_eq!(packet[0], 0x38);
        assert_eq!(&packet[1..9], &sid);
        assert_eq!(&packet[73..77], &PACKET_ID);
        assert_eq!(&packet[77..81], &[1, 2, 3, 4]);

        let mut signed = vec![0, 0, 0, 1, 1, 2, 3, 4, 0x38];
        signed.extend_from_slice(&sid);
        signed.extend_from_slice(&[0; 5]);
        assert_eq!(&packet[9..73], &hmac_sha512(&checker.key, &signed)[..]);
    }

    #[test]
    fn test_tcp_handshake_is_length_prefixed() {
        let packet = checker(OpenVpnTransport::Tcp).handshake([0; 8], 7);

        let length = u16::from_be_bytes([packet[0], packet[1]]) as usize;
        assert_eq!(length, packet.len() - 2);
        assert_eq!(packet[2], 0x38);
    }

    #[tokio::test]
    async fn test_udp_ping_succeeds_when_server_replies() {
        // Given a UDP socket that answers any datagram
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = server.local_addr().unwrap().port();
        tokio::spawn(async move {
            let mut buffer = [0u8; 1024];
            if let Ok((_, peer)) = server.recv_from(&mut buffer).await {
                let _ = server.send_to(b"reset", peer).await;
            }
        });

        // When pinging it
        let answered = checker(OpenVpnTransport::Udp).ping(&local_ip(), port).await;

        // Then the port is reachable
        assert!(answered);
    }

    #[tokio::test]
    async fn test_tcp_ping_reads_reply() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            if let Ok((mut stream, _)) = listener.accept().await {
                let mut buffer = [0u8; 256];
                let _ = stream.read(&mut buffer).await;
                let _ = stream.write_all(b"reset").await;
            }
        });

        assert!(checker(OpenVpnTransport::Tcp).ping(&local_ip(), port).await);
    }

    #[tokio::test]
    async fn test_tcp_ping_fails_on_closed_port() {
        // Given a port nobody listens on anymore
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        // Then the ping reports it unreachable
        assert!(!checker(OpenVpnTransport::Tcp).ping(&local_ip(), port).await);
    }
}
