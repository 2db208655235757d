//! Tunnel lifecycle and LocalAgent integration
//!
//! Tunnel configuration is sequenced through a connection lane so save,
//! start and stop never interleave. The LocalAgent has its own lane so a
//! disconnect racing a reconnect cannot leave two live sessions.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use chrono::{DateTime, Utc};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use super::local_agent::{LocalAgent, LocalAgentConfiguration, LocalAgentConnectionFactory, LocalAgentEvent, LocalAgentState};
use super::state::{ServerDescriptor, VpnState};
use super::tunnel::{ProviderMessage, TunnelConfiguration, TunnelProvider, TunnelStatus};
use crate::alerts::{Alert, AlertService};
use crate::auth::certificate::{VpnAuthentication, VpnAuthenticationData};
use crate::auth::store::VpnKeychain;
use crate::config::ConnectionTiming;
use crate::error::{CertificateError, LocalAgentError, VpnError};
use crate::models::connection::VpnManagerConfiguration;
use crate::models::features::{FeatureChanges, NetShieldType, VpnConnectionFeatures};
use crate::models::protocol::{AuthenticationType, ProtocolFamily, VpnProtocol};
use crate::observers::Observers;
use crate::properties::PropertiesManager;

/// Collaborators of the `VpnManager`
pub struct VpnManagerDependencies {
    pub provider: Arc<dyn TunnelProvider>,
    pub authentication: Arc<dyn VpnAuthentication>,
    pub keychain: Arc<dyn VpnKeychain>,
    pub properties: PropertiesManager,
    pub alerts: Arc<dyn AlertService>,
    pub agent_factory: Arc<dyn LocalAgentConnectionFactory>,
}

#[derive(Default)]
struct Inner {
    state: VpnState,
    configuration: Option<VpnManagerConfiguration>,
    connect_allowed: bool,
    quick_reconnection: bool,
    local_agent_connected: bool,
}

pub struct VpnManager {
    me: Weak<VpnManager>,
    provider: Arc<dyn TunnelProvider>,
    authentication: Arc<dyn VpnAuthentication>,
    keychain: Arc<dyn VpnKeychain>,
    properties: PropertiesManager,
    alerts: Arc<dyn AlertService>,
    agent_factory: Arc<dyn LocalAgentConnectionFactory>,
    timing: ConnectionTiming,
    connection_lane: tokio::sync::Mutex<()>,
    agent_lane: tokio::sync::Mutex<Option<LocalAgent>>,
    agent_generation: AtomicU64,
    inner: Mutex<Inner>,
    state_tx: watch::Sender<VpnState>,
    state_changes: Observers<VpnState>,
    local_agent_changes: Observers<LocalAgentState>,
    reconnect_requests: Observers<()>,
}

impl VpnManager {
    /// Creates the manager and starts following tunnel status changes
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(dependencies: VpnManagerDependencies, timing: ConnectionTiming) -> Arc<Self> {
        let (state_tx, _) = watch::channel(VpnState::Invalid);
        let manager = Arc::new_cyclic(|me| Self {
            me: me.clone(),
            provider: dependencies.provider,
            authentication: dependencies.authentication,
            keychain: dependencies.keychain,
            properties: dependencies.properties,
            alerts: dependencies.alerts,
            agent_factory: dependencies.agent_factory,
            timing,
            connection_lane: tokio::sync::Mutex::new(()),
            agent_lane: tokio::sync::Mutex::new(None),
            agent_generation: AtomicU64::new(0),
            inner: Mutex::new(Inner::default()),
            state_tx,
            state_changes: Observers::new(),
            local_agent_changes: Observers::new(),
            reconnect_requests: Observers::new(),
        });

        let mut changes = manager.provider.status_changes();
        let me = Arc::downgrade(&manager);
        tokio::spawn(async move {
            loop {
                match changes.recv().await {
                    Ok(_) | Err(RecvError::Lagged(_)) => {}
                    Err(RecvError::Closed) => break,
                }
                let Some(manager) = me.upgrade() else { break };
                manager.refresh_state().await;
            }
        });

        manager
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self) -> VpnState {
        self.lock().state.clone()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<VpnState> {
        self.state_tx.subscribe()
    }

    pub fn state_changes(&self) -> &Observers<VpnState> {
        &self.state_changes
    }

    pub fn local_agent_changes(&self) -> &Observers<LocalAgentState> {
        &self.local_agent_changes
    }

    /// Fired after a rekey, when the whole connection should be re-established
    pub fn reconnect_requests(&self) -> &Observers<()> {
        &self.reconnect_requests
    }

    pub fn current_protocol(&self) -> Option<VpnProtocol> {
        self.lock().configuration.as_ref().map(|c| c.vpn_protocol)
    }

    /// `None` when the active protocol has no LocalAgent
    pub fn local_agent_connected(&self) -> Option<bool> {
        let inner = self.lock();
        let protocol = inner.configuration.as_ref()?.vpn_protocol;
        (protocol.authentication_type() == AuthenticationType::Certificate)
            .then_some(inner.local_agent_connected)
    }

    pub fn is_on_demand_enabled(&self) -> bool {
        self.current_protocol()
            .is_some_and(|protocol| self.provider.is_on_demand_enabled(protocol.family()))
    }

    pub fn connected_since(&self) -> Option<DateTime<Utc>> {
        let protocol = self.current_protocol()?;
        match self.state() {
            VpnState::Connected(_) => self.provider.connected_since(protocol.family()),
            _ => None,
        }
    }

    /// Tear down whatever is running, then save and start `configuration`
    #[tracing::instrument(skip_all, fields(protocol = %configuration.vpn_protocol, server = %configuration.hostname))]
    pub async fn connect(&self, configuration: VpnManagerConfiguration) {
        self.disconnect().await;
        let _lane = self.connection_lane.lock().await;

        let family = configuration.vpn_protocol.family();
        {
            let mut inner = self.lock();
            inner.connect_allowed = true;
            inner.local_agent_connected = false;
            inner.configuration = Some(configuration.clone());
        }

        let kill_switch = self.properties.kill_switch();
        if kill_switch {
            tokio::time::sleep(self.timing.protocol_switch_pause()).await;
        }

        let tunnel = TunnelConfiguration {
            manager: configuration,
            on_demand: self.properties.has_connected(),
            kill_switch,
            exclude_local_networks: self.properties.exclude_local_networks(),
        };
        if let Err(e) = self.provider.save(family, &tunnel).await {
            error!("Failed to save tunnel configuration: {}", e);
            self.set_error_state(e);
            return;
        }

        if !self.lock().connect_allowed {
            debug!("Connection cancelled before the tunnel started");
            return;
        }
        info!("Starting tunnel");
        if let Err(e) = self.provider.start(family).await {
            error!("Failed to start tunnel: {}", e);
            self.set_error_state(e);
        }
    }

    /// Stop the tunnel and wait until it reports a settled state
    #[tracing::instrument(skip(self))]
    pub async fn disconnect(&self) {
        let family = {
            let mut inner = self.lock();
            inner.connect_allowed = false;
            inner.configuration.as_ref().map(|c| c.vpn_protocol.family())
        };
        let _lane = self.connection_lane.lock().await;
        self.disconnect_local_agent().await;

        let Some(family) = family else {
            return;
        };
        if let Err(e) = self.provider.set_on_demand(family, false).await {
            warn!("Failed to disable on-demand: {}", e);
        }
        if matches!(
            self.provider.status(family),
            TunnelStatus::Disconnected | TunnelStatus::Invalid
        ) {
            return;
        }

        let mut state = self.state_tx.subscribe();
        self.provider.stop(family).await;
        let settled = tokio::time::timeout(
            self.timing.disconnect_timeout(),
            state.wait_for(VpnState::is_settled),
        )
        .await;
        match settled {
            Ok(_) => debug!("Tunnel disconnected"),
            Err(_) => warn!("Tunnel did not report disconnected in time"),
        }
    }

    /// Delete the saved configuration of every protocol family
    ///
    /// Succeeds when at least one removal succeeded.
    pub async fn remove_configurations(&self) -> Result<(), VpnError> {
        let _lane = self.connection_lane.lock().await;
        let mut removed = false;
        let mut last_error = None;
        for family in ProtocolFamily::ALL {
            match self.provider.remove(family).await {
                Ok(()) => removed = true,
                Err(e) => {
                    warn!(family = ?family, "Failed to remove tunnel configuration: {}", e);
                    last_error = Some(e);
                }
            }
        }
        if removed {
            Ok(())
        } else {
            Err(last_error.unwrap_or(VpnError::RemoveConfigurationFailed))
        }
    }

    /// Re-read the tunnel status, smoothing a transient "disconnecting"
    pub async fn refresh_state(&self) {
        let Some(new_state) = self.determine_state() else {
            return;
        };
        // Disconnecting may be the first half of a quick reconnection, so
        // it is held back for a moment instead of published right away
        let deferred = {
            let mut inner = self.lock();
            if inner.quick_reconnection || new_state == inner.state {
                return;
            }
            let deferred = new_state.is_disconnecting();
            inner.quick_reconnection = deferred;
            deferred
        };
        if !deferred {
            self.update_state().await;
            return;
        }

        let me = self.me.clone();
        let timing = self.timing.clone();
        tokio::spawn(async move {
            tokio::time::sleep(timing.quick_reconnect()).await;
            let Some(manager) = me.upgrade() else { return };
            if matches!(manager.determine_state(), Some(VpnState::Connecting(_))) {
                tokio::time::sleep(timing.quick_update()).await;
            }
            manager.update_state().await;
        });
    }

    fn determine_state(&self) -> Option<VpnState> {
        let (family, descriptor) = {
            let inner = self.lock();
            let configuration = inner.configuration.as_ref()?;
            (
                configuration.vpn_protocol.family(),
                ServerDescriptor {
                    username: configuration.username.clone(),
                    address: configuration.entry_server_address.clone(),
                },
            )
        };
        let state = match self.provider.status(family) {
            TunnelStatus::Invalid => VpnState::Invalid,
            TunnelStatus::Disconnected => match self.provider.last_disconnect_error(family) {
                Some(e @ (VpnError::TlsServerVerification | VpnError::TlsInitialisation)) => {
                    VpnState::Error(e)
                }
                _ => VpnState::Disconnected,
            },
            TunnelStatus::Connecting => VpnState::Connecting(descriptor),
            TunnelStatus::Connected => VpnState::Connected(descriptor),
            TunnelStatus::Reasserting => VpnState::Reasserting(descriptor),
            TunnelStatus::Disconnecting => VpnState::Disconnecting(descriptor),
        };
        Some(state)
    }

    async fn update_state(&self) {
        let new_state = self.determine_state();
        let (new_state, protocol, connect_allowed) = {
            let mut inner = self.lock();
            inner.quick_reconnection = false;
            let Some(new_state) = new_state else { return };
            if new_state == inner.state {
                return;
            }
            inner.state = new_state.clone();
            let protocol = inner.configuration.as_ref().map(|c| c.vpn_protocol);
            (new_state, protocol, inner.connect_allowed)
        };
        self.state_tx.send_replace(new_state.clone());
        info!(state = %new_state, "Tunnel state changed");

        match &new_state {
            VpnState::Connecting(_) if !connect_allowed => {
                debug!("Tunnel connecting while not allowed, disconnecting");
                self.spawn_disconnect();
                return;
            }
            VpnState::Connecting(_) => {
                if protocol == Some(VpnProtocol::Ike) && !self.properties.has_connected() {
                    self.properties.set_has_connected(true);
                }
            }
            VpnState::Error(VpnError::TlsServerVerification) => {
                self.spawn_disconnect();
                self.alerts.push(Alert::InsecureConnection);
            }
            VpnState::Error(VpnError::TlsInitialisation) => self.spawn_disconnect(),
            VpnState::Disconnected | VpnState::Invalid | VpnState::Error(_) => {
                self.disconnect_local_agent().await;
            }
            VpnState::Connected(_) => {
                let me = self.me.clone();
                tokio::spawn(async move {
                    if let Some(manager) = me.upgrade() {
                        manager.connect_local_agent(None).await;
                    }
                });
            }
            VpnState::Reasserting(_) | VpnState::Disconnecting(_) => {}
        }
        self.state_changes.notify(&new_state);
    }

    fn set_error_state(&self, error: VpnError) {
        let state = VpnState::Error(error);
        self.lock().state = state.clone();
        self.state_tx.send_replace(state.clone());
        self.state_changes.notify(&state);
    }

    fn spawn_disconnect(&self) {
        let me = self.me.clone();
        tokio::spawn(async move {
            if let Some(manager) = me.upgrade() {
                manager.disconnect().await;
            }
        });
    }

    // LocalAgent

    fn current_features(&self) -> Option<VpnConnectionFeatures> {
        let inner = self.lock();
        let configuration = inner.configuration.as_ref()?;
        Some(configuration.features(self.properties.nat_type(), self.properties.safe_mode()))
    }

    #[tracing::instrument(skip_all)]
    async fn connect_local_agent(&self, data: Option<VpnAuthenticationData>) {
        let target = {
            let inner = self.lock();
            inner.configuration.as_ref().map(|c| (c.vpn_protocol, c.hostname.clone()))
        };
        let (Some((protocol, hostname)), Some(features)) = (target, self.current_features()) else {
            return;
        };
        if protocol.authentication_type() != AuthenticationType::Certificate {
            debug!(protocol = %protocol, "Protocol does not use the LocalAgent");
            return;
        }

        let data = match data {
            Some(data) => data,
            None => match self.authentication.load_authentication_data(Some(&features)).await {
                Ok(data) => data,
                Err(CertificateError::NeedNewKeys) => {
                    self.reconnect_with_new_keys().await;
                    return;
                }
                Err(CertificateError::TooManyRequests { retry_after }) => {
                    self.alerts.push(Alert::TooManyCertificateRequests { retry_after });
                    return;
                }
                Err(e) => {
                    error!("Failed to load authentication data for the LocalAgent: {}", e);
                    return;
                }
            },
        };

        if !matches!(self.state(), VpnState::Connected(_)) {
            debug!("Tunnel no longer connected, not opening the LocalAgent");
            return;
        }

        let configuration = LocalAgentConfiguration::new(hostname, features);
        let (events, receiver) = mpsc::unbounded_channel();
        let mut slot = self.agent_lane.lock().await;
        slot.take();
        let generation = self.agent_generation.fetch_add(1, Ordering::SeqCst) + 1;
        match LocalAgent::connect(self.agent_factory.as_ref(), &data, &configuration, events) {
            Ok(agent) => {
                *slot = Some(agent);
                drop(slot);
                info!("LocalAgent connecting");
                self.spawn_agent_events(generation, receiver);
            }
            Err(e) => error!("Failed to open the LocalAgent: {}", e),
        }
    }

    fn spawn_agent_events(&self, generation: u64, mut receiver: mpsc::UnboundedReceiver<LocalAgentEvent>) {
        let me = self.me.clone();
        tokio::spawn(async move {
            while let Some(event) = receiver.recv().await {
                let Some(manager) = me.upgrade() else { return };
                if manager.agent_generation.load(Ordering::SeqCst) != generation {
                    return;
                }
                manager.handle_local_agent_event(event).await;
            }
        });
    }

    async fn disconnect_local_agent(&self) {
        let agent = self.agent_lane.lock().await.take();
        self.agent_generation.fetch_add(1, Ordering::SeqCst);
        self.lock().local_agent_connected = false;
        if agent.is_some() {
            debug!("Closing LocalAgent");
        }
    }

    async fn handle_local_agent_event(&self, event: LocalAgentEvent) {
        match event {
            LocalAgentEvent::StateChanged(state) => {
                info!(state = %state, "LocalAgent state changed");
                self.lock().local_agent_connected = state == LocalAgentState::Connected;
                self.local_agent_changes.notify(&state);
                match state {
                    LocalAgentState::ClientCertificateError => {
                        self.handle_local_agent_error(LocalAgentError::CertificateExpired).await;
                    }
                    LocalAgentState::ServerCertificateError => {
                        error!("LocalAgent could not verify the server certificate");
                    }
                    _ => {}
                }
            }
            LocalAgentEvent::Error(error) => self.handle_local_agent_error(error).await,
            LocalAgentEvent::Features(features) => self.reconcile_features(features).await,
        }
    }

    async fn handle_local_agent_error(&self, error: LocalAgentError) {
        warn!(error = %error, "LocalAgent reported an error");
        match error {
            LocalAgentError::CertificateExpired | LocalAgentError::CertificateNotProvided => {
                if let Some(data) = self.refresh_certificate(true).await {
                    self.connect_local_agent(Some(data)).await;
                }
            }
            LocalAgentError::BadCertificateSignature
            | LocalAgentError::CertificateRevoked
            | LocalAgentError::KeyUsedMultipleTimes
            | LocalAgentError::ServerSessionDoesNotMatch => self.reconnect_with_new_keys().await,
            LocalAgentError::MaxSessions(reported) => {
                let plan = self
                    .keychain
                    .fetch_cached()
                    .map(|credentials| credentials.plan)
                    .unwrap_or(reported);
                self.alerts.push(Alert::MaxSessions { plan });
                self.disconnect().await;
            }
            LocalAgentError::ServerError => {
                self.alerts.push(Alert::VpnServerError);
                self.disconnect().await;
            }
            LocalAgentError::PolicyViolationDelinquent => {
                self.alerts.push(Alert::UserDelinquent { reconnect_info: None });
                self.disconnect().await;
            }
            LocalAgentError::PolicyViolationLowPlan => {
                self.alerts.push(Alert::SubscriptionError);
                self.disconnect().await;
            }
            LocalAgentError::UserTorrentNotAllowed | LocalAgentError::UserBadBehavior => {
                self.disconnect().await;
            }
            LocalAgentError::RestrictedServer => {
                debug!("Restricted server, waiting for the agent to recover");
            }
            LocalAgentError::GuestSession => {
                error!("LocalAgent reported a guest session, which should never happen");
                self.disconnect().await;
            }
            LocalAgentError::SystemError(message) => {
                self.alerts.push(Alert::LocalAgentSystemError { message });
            }
            LocalAgentError::ChannelUnavailable(message) => {
                error!("LocalAgent channel unavailable: {}", message);
            }
        }
    }

    /// New certificate for the current features
    ///
    /// `NeedNewKeys` triggers the rekey path only when `allow_rekey` is set,
    /// which bounds automatic recovery to one round per event.
    #[tracing::instrument(skip(self))]
    async fn refresh_certificate(&self, allow_rekey: bool) -> Option<VpnAuthenticationData> {
        let features = self.current_features();
        match self.authentication.refresh_certificates(features.as_ref()).await {
            Ok(data) => {
                self.notify_certificate_refreshed().await;
                Some(data)
            }
            Err(CertificateError::NeedNewKeys) if allow_rekey => {
                self.reconnect_with_new_keys().await;
                None
            }
            Err(CertificateError::TooManyRequests { retry_after }) => {
                self.alerts.push(Alert::TooManyCertificateRequests { retry_after });
                None
            }
            Err(e) => {
                error!("Certificate refresh failed: {}", e);
                self.alerts.push(Alert::CertificateRefreshError);
                self.disconnect().await;
                None
            }
        }
    }

    async fn notify_certificate_refreshed(&self) {
        let Some(VpnProtocol::WireGuard(_)) = self.current_protocol() else {
            return;
        };
        if let Err(e) = self
            .provider
            .send_message(ProtocolFamily::WireGuard, ProviderMessage::CertificateRefreshed)
            .await
        {
            warn!("Could not tell the tunnel about the new certificate: {}", e);
        }
    }

    /// Clear keys and certificate, obtain fresh ones, reopen the agent and
    /// ask for the connection to be re-established
    fn reconnect_with_new_keys(&self) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(async move {
            info!("Regenerating client keys and certificate");
            self.authentication.clear_everything().await;
            if let Some(data) = self.refresh_certificate(false).await {
                self.connect_local_agent(Some(data)).await;
                self.reconnect_requests.notify(&());
            }
        })
    }

    async fn reconcile_features(&self, reported: VpnConnectionFeatures) {
        let Some(cached) = self.current_features() else {
            return;
        };
        let changes = FeatureChanges::between(&cached, &reported);
        if changes.is_empty() {
            return;
        }
        info!(changes = ?changes, "Server reported different connection features");

        if let Some(netshield) = changes.netshield {
            self.properties.set_netshield(netshield);
        }
        if let Some(vpn_accelerator) = changes.vpn_accelerator {
            self.properties.set_vpn_accelerator(vpn_accelerator);
        }
        if let Some(nat_type) = changes.nat_type {
            self.properties.set_nat_type(nat_type);
        }
        if let Some(safe_mode) = changes.safe_mode {
            self.properties.set_safe_mode(safe_mode);
        }
        self.update_active_connection(&changes);
        self.refresh_certificate(true).await;
    }

    /// Write feature changes into the live and the persisted connection
    fn update_active_connection(&self, changes: &FeatureChanges) {
        let family = {
            let mut inner = self.lock();
            let Some(configuration) = inner.configuration.as_mut() else {
                return;
            };
            if let Some(netshield) = changes.netshield {
                configuration.netshield = netshield;
            }
            if let Some(vpn_accelerator) = changes.vpn_accelerator {
                configuration.vpn_accelerator = vpn_accelerator;
            }
            configuration.vpn_protocol.family()
        };

        if let Some(mut connection) = self.properties.last_connection(family) {
            if let Some(netshield) = changes.netshield {
                connection = connection.with_changed_netshield(netshield);
            }
            if let Some(nat_type) = changes.nat_type {
                connection = connection.with_changed_nat_type(nat_type);
            }
            if let Some(safe_mode) = changes.safe_mode {
                connection = connection.with_changed_safe_mode(safe_mode);
            }
            self.properties.set_last_connection(family, Some(&connection));
        }
        if let Some(mut request) = self.properties.last_connection_request() {
            if let Some(netshield) = changes.netshield {
                request = request.with_changed_netshield(netshield);
            }
            if let Some(nat_type) = changes.nat_type {
                request = request.with_changed_nat_type(nat_type);
            }
            if let Some(safe_mode) = changes.safe_mode {
                request = request.with_changed_safe_mode(safe_mode);
            }
            self.properties.set_last_connection_request(Some(&request));
        }
    }

    /// Push a NetShield level to the live session without reconnecting
    pub async fn set_netshield(&self, netshield: NetShieldType) {
        self.apply_live_changes(FeatureChanges {
            netshield: Some(netshield),
            ..FeatureChanges::default()
        })
        .await;
    }

    pub async fn set_vpn_accelerator(&self, vpn_accelerator: bool) {
        self.apply_live_changes(FeatureChanges {
            vpn_accelerator: Some(vpn_accelerator),
            ..FeatureChanges::default()
        })
        .await;
    }

    async fn apply_live_changes(&self, changes: FeatureChanges) {
        self.update_active_connection(&changes);
        if let Some(agent) = self.agent_lane.lock().await.as_ref() {
            agent.update(&changes);
        }
    }
}
