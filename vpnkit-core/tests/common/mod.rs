//! In-memory collaborators for driving the connection core end to end
#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};

use vpnkit_core::alerts::{Alert, AlertService, KillSwitchChoice};
use vpnkit_core::api::{ActiveSession, ClientFeatureConfig, UserLocation, VpnApi};
use vpnkit_core::auth::certificate::{VpnAuthentication, VpnAuthenticationData};
use vpnkit_core::auth::keys::ClientKeyPair;
use vpnkit_core::auth::store::VpnKeychain;
use vpnkit_core::config::{ConnectionTiming, CoreConfig};
use vpnkit_core::error::{ApiError, CertificateError, CoreError, LocalAgentError, VpnError};
use vpnkit_core::models::credentials::{AccountEvent, AccountPlan, VpnCertificate, VpnCredentials};
use vpnkit_core::models::features::{FeatureChanges, VpnConnectionFeatures};
use vpnkit_core::models::protocol::{ProtocolFamily, VpnProtocol};
use vpnkit_core::models::server::{ServerFeatures, ServerIp, ServerModel};
use vpnkit_core::observers::Observers;
use vpnkit_core::properties::PropertiesManager;
use vpnkit_core::smart::{AvailabilityChecker, AvailabilityCheckerResolver};
use vpnkit_core::types::{ClientPrivateKey, VpnPassword};
use vpnkit_core::vpn::intercept::ConnectionInterceptPolicy;
use vpnkit_core::vpn::local_agent::{
    AgentMessage, LocalAgentConfiguration, LocalAgentConnection, LocalAgentConnectionFactory,
};
use vpnkit_core::vpn::{
    AlwaysReachable, AppState, AppStateDependencies, AppStateManager, KillSwitchWireguardPolicy,
    ProviderMessage, ServerTierChecker, TunnelConfiguration, TunnelProvider, TunnelStatus,
    VpnConnectionPreparer, VpnGateway, VpnGatewayDependencies, VpnManager, VpnManagerDependencies,
};

// Fixtures

pub fn server_ip(id: &str) -> ServerIp {
    ServerIp {
        id: id.to_string(),
        entry_ip: Some("192.0.2.10".to_string()),
        exit_ip: "192.0.2.20".to_string(),
        domain: format!("{}.example.net", id),
        status: 1,
        x25519_public_key: Some("c2VydmVyLXB1YmxpYy1rZXk=".to_string()),
        label: None,
        entry_per_protocol: None,
    }
}

pub fn server(name: &str, country: &str, tier: u8, score: f64) -> ServerModel {
    let id = name.to_lowercase().replace('#', "-");
    ServerModel {
        id: id.clone(),
        name: name.to_string(),
        domain: format!("{}.example.net", id),
        load: 20,
        entry_country: country.to_string(),
        exit_country: country.to_string(),
        city: None,
        tier,
        features: ServerFeatures::default(),
        score,
        status: 1,
        ips: vec![server_ip(&format!("{}-ip", id))],
        restricted: false,
    }
}

pub fn credentials(tier: u8, password: &str) -> VpnCredentials {
    VpnCredentials {
        name: "user".to_string(),
        password: VpnPassword::new(password.to_string()),
        plan: AccountPlan::Plus,
        max_tier: tier,
        max_connect: 10,
        delinquent: false,
    }
}

fn certificate(serial: usize) -> VpnCertificate {
    let now = Utc::now();
    VpnCertificate {
        certificate: format!("-----BEGIN CERTIFICATE-----\n{}\n-----END CERTIFICATE-----", serial),
        valid_until: now + ChronoDuration::hours(24),
        refresh_time: now + ChronoDuration::hours(12),
        features: None,
    }
}

// Tunnel provider

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartBehavior {
    Connect,
    /// The tunnel reports connecting and never gets further
    HangConnecting,
}

pub struct FakeTunnelProvider {
    behavior: Mutex<StartBehavior>,
    statuses: Mutex<HashMap<ProtocolFamily, TunnelStatus>>,
    on_demand: Mutex<HashMap<ProtocolFamily, bool>>,
    saved: Mutex<Vec<TunnelConfiguration>>,
    messages: Mutex<Vec<ProviderMessage>>,
    starts: AtomicUsize,
    stops: AtomicUsize,
    changes: broadcast::Sender<ProtocolFamily>,
}

impl FakeTunnelProvider {
    pub fn new(behavior: StartBehavior) -> Self {
        let (changes, _) = broadcast::channel(64);
        Self {
            behavior: Mutex::new(behavior),
            statuses: Mutex::new(HashMap::new()),
            on_demand: Mutex::new(HashMap::new()),
            saved: Mutex::new(Vec::new()),
            messages: Mutex::new(Vec::new()),
            starts: AtomicUsize::new(0),
            stops: AtomicUsize::new(0),
            changes,
        }
    }

    pub fn set_behavior(&self, behavior: StartBehavior) {
        *self.behavior.lock().unwrap() = behavior;
    }

    /// Change the reported status and announce it
    pub fn set_status(&self, family: ProtocolFamily, status: TunnelStatus) {
        self.statuses.lock().unwrap().insert(family, status);
        let _ = self.changes.send(family);
    }

    pub fn saved(&self) -> Vec<TunnelConfiguration> {
        self.saved.lock().unwrap().clone()
    }

    pub fn last_saved_protocol(&self) -> Option<VpnProtocol> {
        self.saved.lock().unwrap().last().map(|c| c.manager.vpn_protocol)
    }

    pub fn messages(&self) -> Vec<ProviderMessage> {
        self.messages.lock().unwrap().clone()
    }

    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TunnelProvider for FakeTunnelProvider {
    async fn save(
        &self,
        family: ProtocolFamily,
        configuration: &TunnelConfiguration,
    ) -> Result<(), VpnError> {
        self.saved.lock().unwrap().push(configuration.clone());
        self.statuses
            .lock()
            .unwrap()
            .entry(family)
            .or_insert(TunnelStatus::Disconnected);
        Ok(())
    }

    async fn set_on_demand(&self, family: ProtocolFamily, enabled: bool) -> Result<(), VpnError> {
        self.on_demand.lock().unwrap().insert(family, enabled);
        Ok(())
    }

    fn is_on_demand_enabled(&self, family: ProtocolFamily) -> bool {
        self.on_demand.lock().unwrap().get(&family).copied().unwrap_or(false)
    }

    async fn start(&self, family: ProtocolFamily) -> Result<(), VpnError> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        self.set_status(family, TunnelStatus::Connecting);
        let behavior = *self.behavior.lock().unwrap();
        if behavior == StartBehavior::Connect {
            self.set_status(family, TunnelStatus::Connected);
        }
        Ok(())
    }

    async fn stop(&self, family: ProtocolFamily) {
        self.stops.fetch_add(1, Ordering::SeqCst);
        self.set_status(family, TunnelStatus::Disconnected);
    }

    async fn remove(&self, family: ProtocolFamily) -> Result<(), VpnError> {
        self.statuses.lock().unwrap().remove(&family);
        Ok(())
    }

    fn status(&self, family: ProtocolFamily) -> TunnelStatus {
        self.statuses
            .lock()
            .unwrap()
            .get(&family)
            .copied()
            .unwrap_or(TunnelStatus::Disconnected)
    }

    fn last_disconnect_error(&self, _family: ProtocolFamily) -> Option<VpnError> {
        None
    }

    fn connected_since(&self, _family: ProtocolFamily) -> Option<DateTime<Utc>> {
        None
    }

    async fn send_message(
        &self,
        _family: ProtocolFamily,
        message: ProviderMessage,
    ) -> Result<(), VpnError> {
        self.messages.lock().unwrap().push(message);
        Ok(())
    }

    fn status_changes(&self) -> broadcast::Receiver<ProtocolFamily> {
        self.changes.subscribe()
    }
}

// Remote API

pub struct FakeApi {
    credentials: Mutex<VpnCredentials>,
    sessions: Mutex<Vec<ActiveSession>>,
    servers: Mutex<Vec<ServerModel>>,
    credential_requests: AtomicUsize,
}

impl FakeApi {
    pub fn new(credentials: VpnCredentials, servers: Vec<ServerModel>) -> Self {
        Self {
            credentials: Mutex::new(credentials),
            sessions: Mutex::new(Vec::new()),
            servers: Mutex::new(servers),
            credential_requests: AtomicUsize::new(0),
        }
    }

    pub fn set_credentials(&self, credentials: VpnCredentials) {
        *self.credentials.lock().unwrap() = credentials;
    }

    pub fn set_session_count(&self, count: usize) {
        *self.sessions.lock().unwrap() = (0..count)
            .map(|i| ActiveSession {
                session_id: format!("session-{}", i),
                exit_ip: None,
                protocol: None,
            })
            .collect();
    }

    pub fn credential_requests(&self) -> usize {
        self.credential_requests.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VpnApi for FakeApi {
    async fn servers(&self) -> Result<Vec<ServerModel>, ApiError> {
        Ok(self.servers.lock().unwrap().clone())
    }

    async fn client_credentials(&self) -> Result<VpnCredentials, ApiError> {
        self.credential_requests.fetch_add(1, Ordering::SeqCst);
        Ok(self.credentials.lock().unwrap().clone())
    }

    async fn sessions(&self) -> Result<Vec<ActiveSession>, ApiError> {
        Ok(self.sessions.lock().unwrap().clone())
    }

    async fn location(&self) -> Result<UserLocation, ApiError> {
        Ok(UserLocation {
            ip: "198.51.100.7".to_string(),
            country: Some("CH".to_string()),
            isp: None,
        })
    }

    async fn client_config(&self) -> Result<ClientFeatureConfig, ApiError> {
        Ok(ClientFeatureConfig::default())
    }
}

// Keychain

pub struct MemoryKeychain {
    credentials: Mutex<Option<VpnCredentials>>,
    keys: Mutex<Option<ClientKeyPair>>,
    certificate: Mutex<Option<VpnCertificate>>,
    events: Observers<AccountEvent>,
}

impl MemoryKeychain {
    pub fn new(credentials: VpnCredentials) -> Self {
        Self {
            credentials: Mutex::new(Some(credentials)),
            keys: Mutex::new(None),
            certificate: Mutex::new(None),
            events: Observers::new(),
        }
    }
}

impl VpnKeychain for MemoryKeychain {
    fn fetch(&self) -> Result<VpnCredentials, CoreError> {
        self.fetch_cached()
    }

    fn fetch_cached(&self) -> Result<VpnCredentials, CoreError> {
        self.credentials
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| CoreError::Keyring(vpnkit_core::error::KeyringError::NotFound))
    }

    fn store(&self, credentials: &VpnCredentials) -> Result<(), CoreError> {
        let previous = self.credentials.lock().unwrap().replace(credentials.clone());
        if let Some(event) = previous.and_then(|previous| AccountEvent::classify(&previous, credentials)) {
            self.events.notify(&event);
        }
        Ok(())
    }

    fn store_keys(&self, keys: &ClientKeyPair) -> Result<(), CoreError> {
        *self.keys.lock().unwrap() = Some(keys.clone());
        Ok(())
    }

    fn fetch_keys(&self) -> Result<Option<ClientKeyPair>, CoreError> {
        Ok(self.keys.lock().unwrap().clone())
    }

    fn delete_keys(&self) -> Result<(), CoreError> {
        *self.keys.lock().unwrap() = None;
        Ok(())
    }

    fn store_certificate(&self, certificate: &VpnCertificate) -> Result<(), CoreError> {
        *self.certificate.lock().unwrap() = Some(certificate.clone());
        Ok(())
    }

    fn fetch_certificate(&self) -> Result<Option<VpnCertificate>, CoreError> {
        Ok(self.certificate.lock().unwrap().clone())
    }

    fn delete_certificate(&self) -> Result<(), CoreError> {
        *self.certificate.lock().unwrap() = None;
        Ok(())
    }

    fn account_events(&self) -> &Observers<AccountEvent> {
        &self.events
    }
}

// Certificates

/// Hands out numbered certificates; queued errors are returned by the
/// next refreshes, in order
#[derive(Default)]
pub struct FakeAuthentication {
    loads: AtomicUsize,
    refreshes: AtomicUsize,
    clears: AtomicUsize,
    refresh_errors: Mutex<VecDeque<CertificateError>>,
}

impl FakeAuthentication {
    pub fn fail_next_refresh(&self, error: CertificateError) {
        self.refresh_errors.lock().unwrap().push_back(error);
    }

    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    pub fn refreshes(&self) -> usize {
        self.refreshes.load(Ordering::SeqCst)
    }

    pub fn clears(&self) -> usize {
        self.clears.load(Ordering::SeqCst)
    }

    fn data(&self, serial: usize) -> VpnAuthenticationData {
        VpnAuthenticationData {
            client_key: ClientPrivateKey::new(format!("client-key-{}", self.clears())),
            client_certificate: certificate(serial),
        }
    }
}

#[async_trait]
impl VpnAuthentication for FakeAuthentication {
    async fn load_authentication_data(
        &self,
        _features: Option<&VpnConnectionFeatures>,
    ) -> Result<VpnAuthenticationData, CertificateError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        Ok(self.data(0))
    }

    async fn refresh_certificates(
        &self,
        _features: Option<&VpnConnectionFeatures>,
    ) -> Result<VpnAuthenticationData, CertificateError> {
        let serial = self.refreshes.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(error) = self.refresh_errors.lock().unwrap().pop_front() {
            return Err(error);
        }
        Ok(self.data(serial))
    }

    async fn clear_everything(&self) {
        self.clears.fetch_add(1, Ordering::SeqCst);
    }
}

// LocalAgent

pub struct FakeAgentConnection {
    closed: Arc<AtomicBool>,
    pushed: Arc<Mutex<Vec<FeatureChanges>>>,
}

impl LocalAgentConnection for FakeAgentConnection {
    fn set_features(&self, changes: &FeatureChanges) {
        self.pushed.lock().unwrap().push(changes.clone());
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

struct OpenedAgent {
    messages: mpsc::UnboundedSender<AgentMessage>,
    closed: Arc<AtomicBool>,
    certificate: String,
}

#[derive(Default)]
pub struct FakeAgentFactory {
    opened: Mutex<Vec<OpenedAgent>>,
    pushed: Arc<Mutex<Vec<FeatureChanges>>>,
}

impl FakeAgentFactory {
    pub fn opened(&self) -> usize {
        self.opened.lock().unwrap().len()
    }

    pub fn open_sessions(&self) -> usize {
        self.opened
            .lock()
            .unwrap()
            .iter()
            .filter(|agent| !agent.closed.load(Ordering::SeqCst))
            .count()
    }

    /// Certificate presented by the most recent session
    pub fn last_certificate(&self) -> Option<String> {
        self.opened.lock().unwrap().last().map(|agent| agent.certificate.clone())
    }

    pub fn pushed_features(&self) -> Vec<FeatureChanges> {
        self.pushed.lock().unwrap().clone()
    }

    /// Deliver a raw message on the most recent session
    pub fn send(&self, message: AgentMessage) {
        if let Some(agent) = self.opened.lock().unwrap().last() {
            let _ = agent.messages.send(message);
        }
    }

    pub fn send_state(&self, state: &str, features: Option<VpnConnectionFeatures>) {
        self.send(AgentMessage::State {
            state: state.to_string(),
            features,
        });
    }
}

impl LocalAgentConnectionFactory for FakeAgentFactory {
    fn make_connection(
        &self,
        data: &VpnAuthenticationData,
        _configuration: &LocalAgentConfiguration,
        messages: mpsc::UnboundedSender<AgentMessage>,
    ) -> Result<Box<dyn LocalAgentConnection>, LocalAgentError> {
        let closed = Arc::new(AtomicBool::new(false));
        self.opened.lock().unwrap().push(OpenedAgent {
            messages,
            closed: closed.clone(),
            certificate: data.client_certificate.certificate.clone(),
        });
        Ok(Box::new(FakeAgentConnection {
            closed,
            pushed: self.pushed.clone(),
        }))
    }
}

// Alerts

pub struct RecordingAlerts {
    alerts: Mutex<Vec<Alert>>,
    choice: KillSwitchChoice,
    prompts: AtomicUsize,
}

impl RecordingAlerts {
    pub fn new(choice: KillSwitchChoice) -> Self {
        Self {
            alerts: Mutex::new(Vec::new()),
            choice,
            prompts: AtomicUsize::new(0),
        }
    }

    pub fn alerts(&self) -> Vec<Alert> {
        self.alerts.lock().unwrap().clone()
    }

    pub fn prompts(&self) -> usize {
        self.prompts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AlertService for RecordingAlerts {
    fn push(&self, alert: Alert) {
        self.alerts.lock().unwrap().push(alert);
    }

    async fn prompt_kill_switch(&self) -> KillSwitchChoice {
        self.prompts.fetch_add(1, Ordering::SeqCst);
        self.choice
    }
}

// Probing

/// Answers only on the configured ports, or on every port when none are set
pub struct ScriptedChecker {
    protocol: VpnProtocol,
    ports: Option<HashSet<u16>>,
    pings: AtomicUsize,
}

impl ScriptedChecker {
    pub fn answering(protocol: VpnProtocol) -> Arc<Self> {
        Arc::new(Self {
            protocol,
            ports: None,
            pings: AtomicUsize::new(0),
        })
    }

    pub fn answering_on(protocol: VpnProtocol, ports: &[u16]) -> Arc<Self> {
        Arc::new(Self {
            protocol,
            ports: Some(ports.iter().copied().collect()),
            pings: AtomicUsize::new(0),
        })
    }

    pub fn silent(protocol: VpnProtocol) -> Arc<Self> {
        Self::answering_on(protocol, &[])
    }

    pub fn pings(&self) -> usize {
        self.pings.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AvailabilityChecker for ScriptedChecker {
    fn protocol(&self) -> VpnProtocol {
        self.protocol
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(1)
    }

    async fn ping(&self, _server_ip: &ServerIp, port: u16) -> bool {
        self.pings.fetch_add(1, Ordering::SeqCst);
        self.ports.as_ref().map_or(true, |ports| ports.contains(&port))
    }
}

// Wiring

pub struct HarnessOptions {
    pub servers: Vec<ServerModel>,
    pub credentials: VpnCredentials,
    pub checkers: Vec<Arc<dyn AvailabilityChecker>>,
    pub start_behavior: StartBehavior,
    pub kill_switch_choice: KillSwitchChoice,
    pub wireguard_kill_switch_unstable: bool,
}

impl Default for HarnessOptions {
    fn default() -> Self {
        Self {
            servers: vec![server("CH#1", "CH", 0, 1.0)],
            credentials: credentials(2, "secret"),
            checkers: Vec::new(),
            start_behavior: StartBehavior::Connect,
            kill_switch_choice: KillSwitchChoice::Cancel,
            wireguard_kill_switch_unstable: false,
        }
    }
}

pub struct Harness {
    pub provider: Arc<FakeTunnelProvider>,
    pub api: Arc<FakeApi>,
    pub keychain: Arc<MemoryKeychain>,
    pub authentication: Arc<FakeAuthentication>,
    pub agents: Arc<FakeAgentFactory>,
    pub alerts: Arc<RecordingAlerts>,
    pub properties: PropertiesManager,
    pub timing: ConnectionTiming,
    pub vpn_manager: Arc<VpnManager>,
    pub app_state: Arc<AppStateManager>,
    pub gateway: Arc<VpnGateway>,
    states: Arc<Mutex<Vec<AppState>>>,
}

impl Harness {
    /// Must be called from within a tokio runtime
    pub fn new(options: HarnessOptions) -> Self {
        let timing = ConnectionTiming::default();
        let provider = Arc::new(FakeTunnelProvider::new(options.start_behavior));
        let api = Arc::new(FakeApi::new(options.credentials.clone(), options.servers.clone()));
        let keychain = Arc::new(MemoryKeychain::new(options.credentials));
        let authentication = Arc::new(FakeAuthentication::default());
        let agents = Arc::new(FakeAgentFactory::default());
        let alerts = Arc::new(RecordingAlerts::new(options.kill_switch_choice));
        let properties = PropertiesManager::in_memory();
        properties.set_servers(&options.servers);
        properties.set_has_connected(true);

        let mut resolver = AvailabilityCheckerResolver::new(&CoreConfig::default());
        for checker in options.checkers {
            resolver = resolver.with_checker(checker);
        }

        let vpn_manager = VpnManager::new(
            VpnManagerDependencies {
                provider: provider.clone(),
                authentication: authentication.clone(),
                keychain: keychain.clone(),
                properties: properties.clone(),
                alerts: alerts.clone(),
                agent_factory: agents.clone(),
            },
            timing.clone(),
        );
        let app_state = AppStateManager::new(
            AppStateDependencies {
                vpn_manager: vpn_manager.clone(),
                keychain: keychain.clone(),
                authentication: authentication.clone(),
                api: api.clone(),
                properties: properties.clone(),
                alerts: alerts.clone(),
                reachability: Arc::new(AlwaysReachable),
            },
            timing.clone(),
            "pc",
        );
        let tier_checker = Arc::new(ServerTierChecker::new(alerts.clone(), keychain.clone()));
        let preparer = Arc::new(VpnConnectionPreparer::new(
            app_state.clone(),
            tier_checker.clone(),
            Arc::new(resolver),
            alerts.clone(),
        ));
        let policy: Arc<dyn ConnectionInterceptPolicy> = Arc::new(KillSwitchWireguardPolicy::new(
            options.wireguard_kill_switch_unstable,
            properties.clone(),
            alerts.clone(),
        ));
        let gateway = VpnGateway::new(
            VpnGatewayDependencies {
                app_state: app_state.clone(),
                vpn_manager: vpn_manager.clone(),
                preparer,
                tier_checker,
                keychain: keychain.clone(),
                api: api.clone(),
                properties: properties.clone(),
                alerts: alerts.clone(),
                intercept_policies: vec![policy],
            },
            timing.clone(),
        );

        let states = Arc::new(Mutex::new(Vec::new()));
        let recorded = states.clone();
        app_state.state_changes().subscribe(move |state| {
            recorded.lock().unwrap().push(state.clone());
        });

        Self {
            provider,
            api,
            keychain,
            authentication,
            agents,
            alerts,
            properties,
            timing,
            vpn_manager,
            app_state,
            gateway,
            states,
        }
    }

    /// Every `AppState` published so far, in order
    pub fn states(&self) -> Vec<AppState> {
        self.states.lock().unwrap().clone()
    }

    pub fn alerts(&self) -> Vec<Alert> {
        self.alerts.alerts()
    }

    /// Replace the stored credentials as a refresh from the API would
    pub fn keychain_store(&self, credentials: VpnCredentials) {
        self.keychain.store(&credentials).unwrap();
    }
}

/// Polls `condition` until it holds, letting spawned work run in between
pub async fn eventually<F: Fn() -> bool>(condition: F) -> bool {
    for _ in 0..500 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
