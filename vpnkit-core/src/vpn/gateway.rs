//! User intent entry point
//!
//! `VpnGateway` turns intent into a `ConnectionRequest`, selects a server,
//! runs the intercept policies and drives the preparer and the state
//! machine. It also reacts to plan changes and to reconnect requests from
//! the `VpnManager`.

use std::sync::{Arc, Weak};

use tracing::{debug, error, info, warn};

use super::app_state::AppStateManager;
use super::intercept::{ConnectionInterceptPolicy, InterceptContext, InterceptResult};
use super::manager::VpnManager;
use super::preparer::VpnConnectionPreparer;
use super::selector::{ResolutionUnavailable, VpnServerSelector};
use super::tier::ServerTierChecker;
use crate::alerts::{Alert, AlertService, ReconnectInfo};
use crate::api::VpnApi;
use crate::auth::store::VpnKeychain;
use crate::config::ConnectionTiming;
use crate::models::credentials::{AccountEvent, DowngradeInfo};
use crate::models::features::{tier, NatType, NetShieldType};
use crate::models::protocol::ConnectionProtocol;
use crate::models::request::{ConnectionRequest, ConnectionRequestType, CountryRequestType, Profile};
use crate::models::server::{CountryGroup, ServerModel, ServerType};
use crate::properties::PropertiesManager;

pub struct VpnGatewayDependencies {
    pub app_state: Arc<AppStateManager>,
    pub vpn_manager: Arc<VpnManager>,
    pub preparer: Arc<VpnConnectionPreparer>,
    pub tier_checker: Arc<ServerTierChecker>,
    pub keychain: Arc<dyn VpnKeychain>,
    pub api: Arc<dyn VpnApi>,
    pub properties: PropertiesManager,
    pub alerts: Arc<dyn AlertService>,
    pub intercept_policies: Vec<Arc<dyn ConnectionInterceptPolicy>>,
}

pub struct VpnGateway {
    #[allow(dead_code)]
    me: Weak<VpnGateway>,
    app_state: Arc<AppStateManager>,
    vpn_manager: Arc<VpnManager>,
    preparer: Arc<VpnConnectionPreparer>,
    tier_checker: Arc<ServerTierChecker>,
    keychain: Arc<dyn VpnKeychain>,
    api: Arc<dyn VpnApi>,
    properties: PropertiesManager,
    alerts: Arc<dyn AlertService>,
    intercept_policies: Vec<Arc<dyn ConnectionInterceptPolicy>>,
    timing: ConnectionTiming,
}

impl VpnGateway {
    pub fn new(dependencies: VpnGatewayDependencies, timing: ConnectionTiming) -> Arc<Self> {
        let gateway = Arc::new_cyclic(|me| Self {
            me: me.clone(),
            app_state: dependencies.app_state,
            vpn_manager: dependencies.vpn_manager,
            preparer: dependencies.preparer,
            tier_checker: dependencies.tier_checker,
            keychain: dependencies.keychain,
            api: dependencies.api,
            properties: dependencies.properties,
            alerts: dependencies.alerts,
            intercept_policies: dependencies.intercept_policies,
            timing,
        });

        let me = Arc::downgrade(&gateway);
        gateway.keychain.account_events().subscribe(move |event| {
            let Some(gateway) = me.upgrade() else { return };
            let Ok(runtime) = tokio::runtime::Handle::try_current() else {
                warn!("Account change outside the runtime, not reacting");
                return;
            };
            let event = event.clone();
            runtime.spawn(async move {
                match event {
                    AccountEvent::PlanDowngraded(info) => gateway.user_plan_changed(info).await,
                    AccountEvent::UserDelinquent(info) => gateway.user_became_delinquent(info).await,
                }
            });
        });

        let me = Arc::downgrade(&gateway);
        gateway.vpn_manager.reconnect_requests().subscribe(move |_| {
            let Some(gateway) = me.upgrade() else { return };
            tokio::spawn(async move {
                info!("Reconnecting after new keys were issued");
                gateway.retry_connection().await;
            });
        });

        gateway
    }

    pub fn server_type_toggle(&self) -> ServerType {
        if self.properties.secure_core() {
            ServerType::SecureCore
        } else {
            ServerType::Standard
        }
    }

    pub fn change_active_server_type(&self, server_type: ServerType) {
        if self.server_type_toggle() == server_type {
            return;
        }
        debug!(server_type = ?server_type, "Active server type changed");
        self.properties.set_secure_core(server_type == ServerType::SecureCore);
    }

    fn request(&self, connection_type: ConnectionRequestType) -> ConnectionRequest {
        ConnectionRequest {
            server_type: self.server_type_toggle(),
            connection_type,
            connection_protocol: self.properties.connection_protocol(),
            netshield: self.properties.netshield(),
            nat_type: self.properties.nat_type(),
            safe_mode: self.properties.safe_mode(),
            profile_id: None,
        }
    }

    /// The quick-connect profile when one is set, otherwise the fastest
    /// server of the toggled type with the global protocol
    pub fn quick_connect_request(&self) -> ConnectionRequest {
        let profile = self
            .properties
            .quick_connect_profile()
            .and_then(|id| self.properties.profile(&id));
        match profile {
            Some(profile) => self.profile_request(&profile),
            None => self.request(ConnectionRequestType::Fastest),
        }
    }

    fn profile_request(&self, profile: &Profile) -> ConnectionRequest {
        profile.connection_request(
            self.properties.netshield(),
            self.properties.nat_type(),
            self.properties.safe_mode(),
        )
    }

    pub async fn quick_connect(&self) {
        self.connect(Some(self.quick_connect_request())).await;
    }

    pub async fn connect_to_country(&self, code: &str, kind: CountryRequestType) {
        self.connect(Some(self.request(ConnectionRequestType::Country {
            code: code.to_string(),
            kind,
        })))
        .await;
    }

    pub async fn connect_to_city(&self, country: &str, city: &str) {
        self.connect(Some(self.request(ConnectionRequestType::City {
            country: country.to_string(),
            city: city.to_string(),
        })))
        .await;
    }

    pub async fn connect_to_server(&self, server: ServerModel) {
        let mut request = self.request(ConnectionRequestType::Country {
            code: server.country_code().to_string(),
            kind: CountryRequestType::Server(Box::new(server.clone())),
        });
        request.server_type = server.server_type();
        self.connect(Some(request)).await;
    }

    pub async fn connect_to_profile(&self, profile: &Profile) {
        self.connect(Some(self.profile_request(profile))).await;
    }

    pub async fn retry_connection(&self) {
        self.connect(self.properties.last_connection_request()).await;
    }

    fn connected_request(&self) -> Option<ConnectionRequest> {
        if !self.app_state.state().is_connected() {
            return None;
        }
        self.properties.last_connection_request()
    }

    pub async fn reconnect_with_netshield(&self, netshield: NetShieldType) {
        if self.connected_request().is_some_and(|request| request.netshield == netshield) {
            debug!("NetShield unchanged, keeping the connection");
            return;
        }
        self.properties.set_netshield(netshield);
        let request = self
            .properties
            .last_connection_request()
            .map(|request| request.with_changed_netshield(netshield));
        self.connect(request).await;
    }

    pub async fn reconnect_with_nat_type(&self, nat_type: NatType) {
        if self.connected_request().is_some_and(|request| request.nat_type == nat_type) {
            debug!("NAT type unchanged, keeping the connection");
            return;
        }
        self.properties.set_nat_type(nat_type);
        let request = self
            .properties
            .last_connection_request()
            .map(|request| request.with_changed_nat_type(nat_type));
        self.connect(request).await;
    }

    pub async fn reconnect_with_safe_mode(&self, safe_mode: bool) {
        if self
            .connected_request()
            .is_some_and(|request| request.safe_mode == Some(safe_mode))
        {
            debug!("Safe mode unchanged, keeping the connection");
            return;
        }
        self.properties.set_safe_mode(Some(safe_mode));
        let request = self
            .properties
            .last_connection_request()
            .map(|request| request.with_changed_safe_mode(Some(safe_mode)));
        self.connect(request).await;
    }

    /// Disconnect, wait for the protocol change delay, then reconnect
    pub async fn reconnect_with_protocol(&self, protocol: ConnectionProtocol) {
        self.disconnect().await;
        tokio::time::sleep(self.timing.protocol_change_delay()).await;
        let request = self
            .properties
            .last_connection_request()
            .map(|request| request.with_changed_protocol(protocol));
        self.connect(request).await;
    }

    /// Connect for `request`; `None` reconnects to the active server as before
    #[tracing::instrument(skip_all)]
    pub async fn connect(&self, request: Option<ConnectionRequest>) {
        self.properties.set_last_connection_request(request.as_ref());

        let Some(request) = request else {
            let Some(active) = self.app_state.active_connection() else {
                debug!("Nothing to reconnect to");
                return;
            };
            let server = active.server().clone();
            let mut request = self.request(ConnectionRequestType::Country {
                code: server.country_code().to_string(),
                kind: CountryRequestType::Server(Box::new(server.clone())),
            });
            request.server_type = server.server_type();
            self.gather_parameters_and_connect(request, server).await;
            return;
        };

        let Some(server) = self.select_server(&request) else {
            return;
        };
        self.gather_parameters_and_connect(request, server).await;
    }

    fn selector(&self, user_tier: u8) -> VpnServerSelector {
        VpnServerSelector::new(
            self.server_type_toggle(),
            user_tier,
            CountryGroup::group(&self.properties.servers()),
            self.properties.smart_protocol_config(),
        )
    }

    fn select_server(&self, request: &ConnectionRequest) -> Option<ServerModel> {
        match self.selector(self.tier_checker.user_tier()).select_server(request) {
            Ok(selection) => {
                let selected_type = if selection.server.is_secure_core() {
                    ServerType::SecureCore
                } else {
                    ServerType::Standard
                };
                self.change_active_server_type(selected_type);
                Some(selection.server)
            }
            Err(ResolutionUnavailable {
                for_specific_country,
                server_type,
                reason,
            }) => {
                self.tier_checker
                    .notify_resolution_unavailable(for_specific_country, server_type, reason);
                None
            }
        }
    }

    async fn gather_parameters_and_connect(&self, request: ConnectionRequest, server: ServerModel) {
        let mut context = InterceptContext {
            request,
            smart_config: self.properties.smart_protocol_config(),
        };
        for policy in &self.intercept_policies {
            if policy.intercept(&mut context).await == InterceptResult::Cancel {
                info!("Connection cancelled before preparation");
                return;
            }
        }

        self.properties.set_last_prepared_server(Some(&server));
        if !self.app_state.prepare_to_connect() {
            info!("Recovering a stale tunnel instead of connecting");
            return;
        }
        self.preparer
            .connect(&server, &context.request, &context.smart_config)
            .await;
    }

    /// Cancel the attempt in flight
    pub async fn stop_connecting(&self) {
        self.app_state.cancel_connection_attempt().await;
    }

    /// Disconnect, then refresh the server list in the background when the
    /// public IP changed
    pub async fn disconnect(&self) {
        self.app_state.disconnect().await;

        let api = self.api.clone();
        let properties = self.properties.clone();
        tokio::spawn(async move {
            if let Err(e) = api.refresh_server_info_if_ip_changed(&properties).await {
                debug!("Server info refresh after disconnect failed: {}", e);
            }
        });
    }

    fn connected_server(&self) -> Option<ServerModel> {
        if !self.app_state.state().is_connected() {
            return None;
        }
        self.app_state
            .active_connection()
            .map(|connection| connection.server().clone())
    }

    #[tracing::instrument(skip_all, fields(from = info.from.max_tier, to = info.to.max_tier))]
    async fn user_plan_changed(&self, info: DowngradeInfo) {
        let max_tier = info.to.max_tier;
        if max_tier < tier::PLUS {
            self.properties.set_secure_core(false);
        }
        if max_tier < NetShieldType::REQUIRED_TIER {
            self.properties.set_netshield(NetShieldType::default());
        }
        if max_tier < NatType::REQUIRED_TIER {
            self.properties.set_nat_type(NatType::default());
            self.properties.set_safe_mode(None);
        }
        if max_tier >= info.from.max_tier {
            return;
        }

        info!("Plan downgraded");
        let replacement = self
            .connected_server()
            .filter(|server| server.tier > max_tier)
            .and_then(|server| self.replacement_server(max_tier, server));
        match replacement {
            Some((reconnect_info, request)) => {
                let server = reconnect_info.to_server.clone();
                self.alerts.push(Alert::PlanDowngraded {
                    reconnect_info: Some(reconnect_info),
                });
                self.properties.set_last_connection_request(Some(&request));
                self.gather_parameters_and_connect(request, server).await;
            }
            None => self.alerts.push(Alert::PlanDowngraded {
                reconnect_info: None,
            }),
        }
    }

    #[tracing::instrument(skip_all)]
    async fn user_became_delinquent(&self, _info: DowngradeInfo) {
        // Captured first, the disconnect clears the active connection
        let previous = self.connected_server();
        self.disconnect().await;

        let credentials = match self.api.client_credentials().await {
            Ok(credentials) => credentials,
            Err(e) => {
                error!("Failed to refresh credentials after delinquency: {}", e);
                return;
            }
        };
        if let Err(e) = self.keychain.store(&credentials) {
            warn!("Failed to store refreshed credentials: {}", e);
        }

        // Delinquent accounts stay disconnected; the alert only suggests
        // where the user could go
        let reconnect_info = previous
            .filter(|server| server.tier > credentials.max_tier)
            .and_then(|server| self.replacement_server(credentials.max_tier, server))
            .map(|(reconnect_info, _)| reconnect_info);
        self.alerts.push(Alert::UserDelinquent { reconnect_info });
    }

    /// Fastest server within `max_tier`, and the request that selects it
    fn replacement_server(
        &self,
        max_tier: u8,
        from_server: ServerModel,
    ) -> Option<(ReconnectInfo, ConnectionRequest)> {
        let request = self.request(ConnectionRequestType::Fastest);
        match self.selector(max_tier).select_server(&request) {
            Ok(selection) => {
                info!(from = %from_server.name, to = %selection.server.name, "Moving to a server within the plan");
                Some((
                    ReconnectInfo {
                        from_server,
                        to_server: selection.server,
                    },
                    request,
                ))
            }
            Err(unavailable) => {
                warn!(reason = ?unavailable.reason, "No replacement server within the plan");
                None
            }
        }
    }
}
