//! Maps protocols to their availability checkers and default ports

use std::collections::HashMap;
use std::sync::Arc;

use super::checker::AvailabilityChecker;
use super::openvpn::OpenVpnAvailabilityChecker;
use super::wireguard::{WireguardPinger, WireguardStreamChecker, WireguardUdpChecker};
use crate::config::{CoreConfig, OpenVpnConfig, WireguardConfig};
use crate::error::ConfigValidationError;
use crate::models::protocol::{OpenVpnTransport, VpnProtocol, WireGuardTransport, IKEV2_PORTS};

pub struct AvailabilityCheckerResolver {
    checkers: HashMap<VpnProtocol, Arc<dyn AvailabilityChecker>>,
    openvpn: OpenVpnConfig,
    wireguard: WireguardConfig,
}

impl AvailabilityCheckerResolver {
    /// Resolver without checkers; every protocol falls back to default ports
    pub fn new(config: &CoreConfig) -> Self {
        Self {
            checkers: HashMap::new(),
            openvpn: config.openvpn.clone(),
            wireguard: config.wireguard.clone(),
        }
    }

    /// Network probes for every protocol that can be probed from here
    ///
    /// WireGuard UDP is only probed when a `pinger` is supplied.
    pub fn native(
        config: &CoreConfig,
        pinger: Option<Arc<dyn WireguardPinger>>,
    ) -> Result<Self, ConfigValidationError> {
        let timeout = config.probe.timeout();
        let mut resolver = Self::new(config);

        for transport in [OpenVpnTransport::Udp, OpenVpnTransport::Tcp] {
            resolver = resolver.with_checker(Arc::new(OpenVpnAvailabilityChecker::new(
                transport,
                &config.openvpn.static_key,
                timeout,
            )?));
        }
        for transport in [WireGuardTransport::Tcp, WireGuardTransport::Tls] {
            if let Some(checker) = WireguardStreamChecker::new(transport, timeout) {
                resolver = resolver.with_checker(Arc::new(checker));
            }
        }
        if let Some(pinger) = pinger {
            resolver = resolver.with_checker(Arc::new(WireguardUdpChecker::new(pinger, timeout)));
        }
        Ok(resolver)
    }

    /// Registers `checker` for its protocol, replacing any previous one
    pub fn with_checker(mut self, checker: Arc<dyn AvailabilityChecker>) -> Self {
        self.checkers.insert(checker.protocol(), checker);
        self
    }

    pub fn checker(&self, protocol: VpnProtocol) -> Option<Arc<dyn AvailabilityChecker>> {
        self.checkers.get(&protocol).cloned()
    }

    pub fn default_ports(&self, protocol: VpnProtocol) -> Vec<u16> {
        match protocol {
            VpnProtocol::Ike => IKEV2_PORTS.to_vec(),
            VpnProtocol::OpenVpn(transport) => self.openvpn.default_ports(transport).to_vec(),
            VpnProtocol::WireGuard(transport) => self.wireguard.default_ports(transport).to_vec(),
        }
    }
}
