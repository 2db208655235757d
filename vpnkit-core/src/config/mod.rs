//! Configuration module
//!
//! Tunable timing, probing and protocol settings, loaded from TOML. Every
//! delay the connection core uses lives here rather than in constants.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::ConfigValidationError;
use crate::models::protocol::{OpenVpnTransport, VpnProtocol, WireGuardTransport};

pub mod toml_config;

/// Timing policy for connection attempts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionTiming {
    /// Countdown started by `prepare_to_connect`
    #[serde(default = "default_attempt_timeout")]
    pub attempt_timeout_secs: u64,

    /// Slack allowed on top of the countdown before the attempt is aborted
    #[serde(default = "default_attempt_leeway")]
    pub attempt_leeway_secs: u64,

    /// Window during which a reported "disconnecting" is not yet reflected
    #[serde(default = "default_quick_reconnect")]
    pub quick_reconnect_ms: u64,

    /// Extra wait when the re-check finds the tunnel connecting again
    #[serde(default = "default_quick_update")]
    pub quick_update_ms: u64,

    /// Pause between disconnect and connect while the kill switch is on
    #[serde(default = "default_protocol_switch_pause")]
    pub protocol_switch_pause_ms: u64,

    /// Delay before reconnecting with a different protocol
    #[serde(default = "default_protocol_change_delay")]
    pub protocol_change_delay_secs: u64,

    /// Upper bound on waiting for the tunnel to report disconnected
    #[serde(default = "default_disconnect_timeout")]
    pub disconnect_timeout_secs: u64,
}

fn default_attempt_timeout() -> u64 {
    30
}
fn default_attempt_leeway() -> u64 {
    5
}
fn default_quick_reconnect() -> u64 {
    500
}
fn default_quick_update() -> u64 {
    1000
}
fn default_protocol_switch_pause() -> u64 {
    1000
}
fn default_protocol_change_delay() -> u64 {
    2
}
fn default_disconnect_timeout() -> u64 {
    10
}

impl Default for ConnectionTiming {
    fn default() -> Self {
        Self {
            attempt_timeout_secs: default_attempt_timeout(),
            attempt_leeway_secs: default_attempt_leeway(),
            quick_reconnect_ms: default_quick_reconnect(),
            quick_update_ms: default_quick_update(),
            protocol_switch_pause_ms: default_protocol_switch_pause(),
            protocol_change_delay_secs: default_protocol_change_delay(),
            disconnect_timeout_secs: default_disconnect_timeout(),
        }
    }
}

impl ConnectionTiming {
    /// Time after which an attempt without a terminal state is aborted
    pub fn attempt_deadline(&self) -> Duration {
        Duration::from_secs(self.attempt_timeout_secs + self.attempt_leeway_secs)
    }

    pub fn quick_reconnect(&self) -> Duration {
        Duration::from_millis(self.quick_reconnect_ms)
    }

    pub fn quick_update(&self) -> Duration {
        Duration::from_millis(self.quick_update_ms)
    }

    pub fn protocol_switch_pause(&self) -> Duration {
        Duration::from_millis(self.protocol_switch_pause_ms)
    }

    pub fn protocol_change_delay(&self) -> Duration {
        Duration::from_secs(self.protocol_change_delay_secs)
    }

    pub fn disconnect_timeout(&self) -> Duration {
        Duration::from_secs(self.disconnect_timeout_secs)
    }

    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        if !(5..=300).contains(&self.attempt_timeout_secs) {
            return Err(ConfigValidationError::InvalidAttemptTimeout(
                self.attempt_timeout_secs,
            ));
        }
        if self.attempt_leeway_secs > self.attempt_timeout_secs {
            return Err(ConfigValidationError::LeewayExceedsTimeout(
                self.attempt_leeway_secs,
                self.attempt_timeout_secs,
            ));
        }
        if !(100..=10_000).contains(&self.quick_reconnect_ms) {
            return Err(ConfigValidationError::InvalidQuickReconnect(
                self.quick_reconnect_ms,
            ));
        }
        Ok(())
    }
}

/// Protocols smart selection may pick
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SmartProtocolConfig {
    #[serde(default = "enabled")]
    pub ikev2: bool,
    #[serde(default = "enabled")]
    pub openvpn_udp: bool,
    #[serde(default = "enabled")]
    pub openvpn_tcp: bool,
    #[serde(default = "enabled")]
    pub wireguard_udp: bool,
    #[serde(default = "enabled")]
    pub wireguard_tcp: bool,
    #[serde(default = "enabled")]
    pub wireguard_tls: bool,
}

fn enabled() -> bool {
    true
}

impl Default for SmartProtocolConfig {
    fn default() -> Self {
        Self {
            ikev2: true,
            openvpn_udp: true,
            openvpn_tcp: true,
            wireguard_udp: true,
            wireguard_tcp: true,
            wireguard_tls: true,
        }
    }
}

impl SmartProtocolConfig {
    pub fn is_enabled(&self, protocol: VpnProtocol) -> bool {
        match protocol {
            VpnProtocol::Ike => self.ikev2,
            VpnProtocol::OpenVpn(OpenVpnTransport::Udp) => self.openvpn_udp,
            VpnProtocol::OpenVpn(OpenVpnTransport::Tcp) => self.openvpn_tcp,
            VpnProtocol::WireGuard(WireGuardTransport::Udp) => self.wireguard_udp,
            VpnProtocol::WireGuard(WireGuardTransport::Tcp) => self.wireguard_tcp,
            VpnProtocol::WireGuard(WireGuardTransport::Tls) => self.wireguard_tls,
        }
    }

    /// Enabled protocols in smart priority order
    pub fn enabled_protocols(&self) -> Vec<VpnProtocol> {
        VpnProtocol::SMART_ORDER
            .iter()
            .copied()
            .filter(|protocol| self.is_enabled(*protocol))
            .collect()
    }

    pub fn without_wireguard(&self) -> Self {
        Self {
            wireguard_udp: false,
            wireguard_tcp: false,
            wireguard_tls: false,
            ..self.clone()
        }
    }

    pub fn includes_wireguard(&self) -> bool {
        self.wireguard_udp || self.wireguard_tcp || self.wireguard_tls
    }
}

/// Public tls-auth key shared by all OpenVPN servers; only used to sign
/// reachability probes
pub const DEFAULT_OPENVPN_STATIC_KEY: &str = concat!(
    "6acef03f62675b4b1bbd03e53b187727",
    "423cea742242106cb2916a8a4c829756",
    "3d22c7e5cef430b1103c6f66eb1fc5b3",
    "75a672f158e2e2e936c3faa48b035a6d",
    "e17beaac23b5f03b10b868d53d03521d",
    "8ba115059da777a60cbfd7b2c9c57472",
    "78a15b8f6e68a3ef7fd583ec9f398c8b",
    "d4735dab40cbd1e3c62a822e97489186",
    "c30a0b48c7c38ea32ceb056d3fa5a710",
    "e10ccc7a0ddb363b08c3d2777a3395e1",
    "0c0b6080f56309192ab5aacd4b45f55d",
    "a61fc77af39bd81a19218a79762c3386",
    "2df55785075f37d8c71dc8a42097ee43",
    "344739a0dd48d03025b0450cf1fb5e8c",
    "aeb893d9a96d1f15519bb3c4dcb40ee3",
    "16672ea16c012664f8a9f11255518deb",
);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenVpnConfig {
    #[serde(default = "default_openvpn_udp_ports")]
    pub default_udp_ports: Vec<u16>,
    #[serde(default = "default_openvpn_tcp_ports")]
    pub default_tcp_ports: Vec<u16>,
    #[serde(default = "default_static_key")]
    pub static_key: String,
}

fn default_openvpn_udp_ports() -> Vec<u16> {
    vec![80, 51820, 4569, 1194, 5060]
}
fn default_openvpn_tcp_ports() -> Vec<u16> {
    vec![443, 7770, 8443]
}
fn default_static_key() -> String {
    DEFAULT_OPENVPN_STATIC_KEY.to_string()
}

impl Default for OpenVpnConfig {
    fn default() -> Self {
        Self {
            default_udp_ports: default_openvpn_udp_ports(),
            default_tcp_ports: default_openvpn_tcp_ports(),
            static_key: default_static_key(),
        }
    }
}

impl OpenVpnConfig {
    pub fn default_ports(&self, transport: OpenVpnTransport) -> &[u16] {
        match transport {
            OpenVpnTransport::Udp => &self.default_udp_ports,
            OpenVpnTransport::Tcp => &self.default_tcp_ports,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireguardConfig {
    #[serde(default = "default_wireguard_udp_ports")]
    pub default_udp_ports: Vec<u16>,
    #[serde(default = "default_wireguard_tcp_ports")]
    pub default_tcp_ports: Vec<u16>,
    #[serde(default = "default_wireguard_tls_ports")]
    pub default_tls_ports: Vec<u16>,
}

fn default_wireguard_udp_ports() -> Vec<u16> {
    vec![51820]
}
fn default_wireguard_tcp_ports() -> Vec<u16> {
    vec![443]
}
fn default_wireguard_tls_ports() -> Vec<u16> {
    vec![443]
}

impl Default for WireguardConfig {
    fn default() -> Self {
        Self {
            default_udp_ports: default_wireguard_udp_ports(),
            default_tcp_ports: default_wireguard_tcp_ports(),
            default_tls_ports: default_wireguard_tls_ports(),
        }
    }
}

impl WireguardConfig {
    pub fn default_ports(&self, transport: WireGuardTransport) -> &[u16] {
        match transport {
            WireGuardTransport::Udp => &self.default_udp_ports,
            WireGuardTransport::Tcp => &self.default_tcp_ports,
            WireGuardTransport::Tls => &self.default_tls_ports,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeConfig {
    /// Per-port probe timeout
    #[serde(default = "default_probe_timeout")]
    pub timeout_ms: u64,
}

fn default_probe_timeout() -> u64 {
    3000
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_probe_timeout(),
        }
    }
}

impl ProbeConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_api_timeout")]
    pub timeout_secs: u64,
}

fn default_base_url() -> String {
    "https://vpn-api.example.com".to_string()
}
fn default_api_timeout() -> u64 {
    30
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout_secs: default_api_timeout(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformConfig {
    /// The OS tunnel stack is known to misbehave with WireGuard while the
    /// kill switch is on
    #[serde(default)]
    pub wireguard_kill_switch_unstable: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Tag appended to credential usernames so the server can tell clients apart
    #[serde(default = "default_client_label")]
    pub label: String,
}

fn default_client_label() -> String {
    "pi".to_string()
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            label: default_client_label(),
        }
    }
}

/// Complete vpnkit configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoreConfig {
    #[serde(default)]
    pub connection: ConnectionTiming,
    #[serde(default)]
    pub smart_protocol: SmartProtocolConfig,
    #[serde(default)]
    pub openvpn: OpenVpnConfig,
    #[serde(default)]
    pub wireguard: WireguardConfig,
    #[serde(default)]
    pub probe: ProbeConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub platform: PlatformConfig,
    #[serde(default)]
    pub client: ClientConfig,
}

impl CoreConfig {
    /// Validate the entire configuration
    ///
    /// Returns the first validation error encountered.
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        self.connection.validate()?;
        self.validate_probe_timeout()?;
        self.validate_ports()?;
        self.validate_static_key()?;
        self.validate_base_url()?;
        self.validate_client_label()?;
        Ok(())
    }

    fn validate_probe_timeout(&self) -> Result<(), ConfigValidationError> {
        if !(100..=30_000).contains(&self.probe.timeout_ms) {
            Err(ConfigValidationError::InvalidProbeTimeout(self.probe.timeout_ms))
        } else {
            Ok(())
        }
    }

    fn validate_ports(&self) -> Result<(), ConfigValidationError> {
        let lists = [
            (VpnProtocol::OpenVpn(OpenVpnTransport::Udp), &self.openvpn.default_udp_ports),
            (VpnProtocol::OpenVpn(OpenVpnTransport::Tcp), &self.openvpn.default_tcp_ports),
            (VpnProtocol::WireGuard(WireGuardTransport::Udp), &self.wireguard.default_udp_ports),
            (VpnProtocol::WireGuard(WireGuardTransport::Tcp), &self.wireguard.default_tcp_ports),
            (VpnProtocol::WireGuard(WireGuardTransport::Tls), &self.wireguard.default_tls_ports),
        ];
        match lists.iter().find(|(_, ports)| ports.is_empty()) {
            Some((protocol, _)) => Err(ConfigValidationError::EmptyPortList {
                protocol: protocol.to_string(),
            }),
            None => Ok(()),
        }
    }

    fn validate_static_key(&self) -> Result<(), ConfigValidationError> {
        let key = self.openvpn.static_key.trim();
        let valid = key.len() >= 128 && key.len() % 2 == 0 && key.chars().all(|c| c.is_ascii_hexdigit());
        if valid {
            Ok(())
        } else {
            Err(ConfigValidationError::InvalidStaticKey(format!(
                "{} characters",
                key.len()
            )))
        }
    }

    fn validate_base_url(&self) -> Result<(), ConfigValidationError> {
        use url::Url;

        match Url::parse(&self.api.base_url) {
            Ok(url) => match url.scheme() {
                "http" | "https" => Ok(()),
                scheme => Err(ConfigValidationError::InvalidBaseUrl(format!(
                    "URL scheme must be http or https, got: {}",
                    scheme
                ))),
            },
            Err(e) => Err(ConfigValidationError::InvalidBaseUrl(format!(
                "Failed to parse URL: {}",
                e
            ))),
        }
    }

    fn validate_client_label(&self) -> Result<(), ConfigValidationError> {
        let label = &self.client.label;
        if label.is_empty() || label.len() > 8 || !label.chars().all(|c| c.is_ascii_alphanumeric()) {
            Err(ConfigValidationError::InvalidClientLabel(label.clone()))
        } else {
            Ok(())
        }
    }
}
