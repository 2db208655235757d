//! Policies consulted before a connection is prepared

use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

use crate::alerts::{AlertService, KillSwitchChoice};
use crate::config::SmartProtocolConfig;
use crate::models::protocol::{ConnectionProtocol, OpenVpnTransport, VpnProtocol};
use crate::models::request::ConnectionRequest;
use crate::properties::PropertiesManager;

/// Request and smart configuration a policy may rewrite
#[derive(Debug, Clone, PartialEq)]
pub struct InterceptContext {
    pub request: ConnectionRequest,
    pub smart_config: SmartProtocolConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterceptResult {
    Allow,
    Cancel,
}

#[async_trait]
pub trait ConnectionInterceptPolicy: Send + Sync {
    async fn intercept(&self, context: &mut InterceptContext) -> InterceptResult;
}

/// Asks the user how to proceed when WireGuard would run with the kill
/// switch on a platform where that combination is unstable
pub struct KillSwitchWireguardPolicy {
    unstable: bool,
    properties: PropertiesManager,
    alerts: Arc<dyn AlertService>,
}

impl KillSwitchWireguardPolicy {
    pub fn new(unstable: bool, properties: PropertiesManager, alerts: Arc<dyn AlertService>) -> Self {
        Self {
            unstable,
            properties,
            alerts,
        }
    }

    fn uses_wireguard(context: &InterceptContext) -> bool {
        match context.request.connection_protocol {
            ConnectionProtocol::Smart => context.smart_config.includes_wireguard(),
            ConnectionProtocol::Vpn(VpnProtocol::WireGuard(_)) => true,
            ConnectionProtocol::Vpn(_) => false,
        }
    }
}

#[async_trait]
impl ConnectionInterceptPolicy for KillSwitchWireguardPolicy {
    async fn intercept(&self, context: &mut InterceptContext) -> InterceptResult {
        if !self.unstable || !self.properties.kill_switch() || !Self::uses_wireguard(context) {
            return InterceptResult::Allow;
        }

        match self.alerts.prompt_kill_switch().await {
            KillSwitchChoice::DisableKillSwitch => {
                info!("Kill switch disabled to connect with WireGuard");
                self.properties.set_kill_switch(false);
                InterceptResult::Allow
            }
            KillSwitchChoice::UseOpenVpn => {
                match context.request.connection_protocol {
                    ConnectionProtocol::Smart => {
                        context.smart_config = context.smart_config.without_wireguard();
                    }
                    ConnectionProtocol::Vpn(_) => {
                        context.request = context.request.with_changed_protocol(ConnectionProtocol::Vpn(
                            VpnProtocol::OpenVpn(OpenVpnTransport::Udp),
                        ));
                    }
                }
                info!(protocol = %context.request.connection_protocol, "Avoiding WireGuard while the kill switch is on");
                InterceptResult::Allow
            }
            KillSwitchChoice::Cancel => InterceptResult::Cancel,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::LoggingAlertService;
    use crate::models::features::{NatType, NetShieldType};
    use crate::models::protocol::WireGuardTransport;
    use crate::models::request::ConnectionRequestType;
    use crate::models::server::ServerType;

    fn context(protocol: ConnectionProtocol) -> InterceptContext {
        InterceptContext {
            request: ConnectionRequest {
                server_type: ServerType::Standard,
                connection_type: ConnectionRequestType::Fastest,
                connection_protocol: protocol,
                netshield: NetShieldType::Off,
                nat_type: NatType::Strict,
                safe_mode: None,
                profile_id: None,
            },
            smart_config: SmartProtocolConfig::default(),
        }
    }

    fn make_policy(choice: KillSwitchChoice, kill_switch: bool) -> (KillSwitchWireguardPolicy, PropertiesManager) {
        let properties = PropertiesManager::in_memory();
        properties.set_kill_switch(kill_switch);
        let policy = KillSwitchWireguardPolicy::new(
            true,
            properties.clone(),
            Arc::new(LoggingAlertService::new(choice)),
        );
        (policy, properties)
    }

    #[tokio::test]
    async fn test_use_openvpn_strips_wireguard_from_smart() {
        let (policy, _) = make_policy(KillSwitchChoice::UseOpenVpn, true);
        let mut context = context(ConnectionProtocol::Smart);

        let result = policy.intercept(&mut context).await;

        assert_eq!(result, InterceptResult::Allow);
        assert!(!context.smart_config.includes_wireguard());
        assert!(context.smart_config.openvpn_udp);
    }

    #[tokio::test]
    async fn test_use_openvpn_replaces_explicit_wireguard() {
        let (policy, _) = make_policy(KillSwitchChoice::UseOpenVpn, true);
        let mut context = context(ConnectionProtocol::Vpn(VpnProtocol::WireGuard(WireGuardTransport::Udp)));

        policy.intercept(&mut context).await;

        assert_eq!(
            context.request.connection_protocol,
            ConnectionProtocol::Vpn(VpnProtocol::OpenVpn(OpenVpnTransport::Udp))
        );
    }

    #[tokio::test]
    async fn test_disable_kill_switch_keeps_request() {
        let (policy, properties) = make_policy(KillSwitchChoice::DisableKillSwitch, true);
        let mut context = context(ConnectionProtocol::Smart);
        let before = context.clone();

        let result = policy.intercept(&mut context).await;

        assert_eq!(result, InterceptResult::Allow);
        assert_eq!(context, before);
        assert!(!properties.kill_switch());
    }

    #[tokio::test]
    async fn test_no_prompt_without_kill_switch() {
        // Cancel would be returned if the user were asked
        let (policy, _) = make_policy(KillSwitchChoice::Cancel, false);
        let mut context = context(ConnectionProtocol::Smart);

        assert_eq!(policy.intercept(&mut context).await, InterceptResult::Allow);

        let (policy, _) = make_policy(KillSwitchChoice::Cancel, true);
        assert_eq!(policy.intercept(&mut context).await, InterceptResult::Cancel);
    }
}
