//! Application connection state machine
//!
//! `AppStateManager` is the only writer of `AppState`. It follows the
//! tunnel through the `VpnManager` observers, bounds every attempt with a
//! countdown and diagnoses failed attempts against the remote API.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use chrono::{DateTime, Utc};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::manager::VpnManager;
use super::reachability::NetworkReachability;
use super::state::{AppDisplayState, AppState, ConnectionAttempt, StuckDisconnect, VpnState};
use crate::alerts::{Alert, AlertService};
use crate::api::VpnApi;
use crate::auth::certificate::{VpnAuthentication, VpnAuthenticationData};
use crate::auth::store::VpnKeychain;
use crate::config::ConnectionTiming;
use crate::error::{ApiError, CertificateError, VpnError};
use crate::models::connection::{ConnectionConfiguration, VpnManagerConfiguration};
use crate::models::credentials::VpnCredentials;
use crate::models::features::VpnConnectionFeatures;
use crate::models::protocol::AuthenticationType;
use crate::observers::Observers;
use crate::properties::PropertiesManager;
use crate::types::PASSWORD_REFERENCE;

pub struct AppStateDependencies {
    pub vpn_manager: Arc<VpnManager>,
    pub keychain: Arc<dyn VpnKeychain>,
    pub authentication: Arc<dyn VpnAuthentication>,
    pub api: Arc<dyn VpnApi>,
    pub properties: PropertiesManager,
    pub alerts: Arc<dyn AlertService>,
    pub reachability: Arc<dyn NetworkReachability>,
}

#[derive(Default)]
struct Inner {
    state: AppState,
    display_state: AppDisplayState,
    vpn_state: VpnState,
    attempt: ConnectionAttempt,
    last_attempted: Option<ConnectionConfiguration>,
    stuck: StuckDisconnect,
    /// Set once an attempt was retried with refreshed credentials
    credentials_retried: bool,
    attempts_started: u64,
}

pub struct AppStateManager {
    me: Weak<AppStateManager>,
    vpn_manager: Arc<VpnManager>,
    keychain: Arc<dyn VpnKeychain>,
    authentication: Arc<dyn VpnAuthentication>,
    api: Arc<dyn VpnApi>,
    properties: PropertiesManager,
    alerts: Arc<dyn AlertService>,
    reachability: Arc<dyn NetworkReachability>,
    timing: ConnectionTiming,
    client_label: String,
    inner: Mutex<Inner>,
    state_changes: Observers<AppState>,
    display_changes: Observers<AppDisplayState>,
}

impl AppStateManager {
    pub fn new(
        dependencies: AppStateDependencies,
        timing: ConnectionTiming,
        client_label: impl Into<String>,
    ) -> Arc<Self> {
        let manager = Arc::new_cyclic(|me| Self {
            me: me.clone(),
            vpn_manager: dependencies.vpn_manager,
            keychain: dependencies.keychain,
            authentication: dependencies.authentication,
            api: dependencies.api,
            properties: dependencies.properties,
            alerts: dependencies.alerts,
            reachability: dependencies.reachability,
            timing,
            client_label: client_label.into(),
            inner: Mutex::new(Inner::default()),
            state_changes: Observers::new(),
            display_changes: Observers::new(),
        });

        let me = Arc::downgrade(&manager);
        manager.vpn_manager.state_changes().subscribe(move |state| {
            if let Some(manager) = me.upgrade() {
                manager.vpn_state_changed(state);
            }
        });
        let me = Arc::downgrade(&manager);
        manager.vpn_manager.local_agent_changes().subscribe(move |_| {
            if let Some(manager) = me.upgrade() {
                manager.refresh_display_state();
            }
        });

        manager
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self) -> AppState {
        self.lock().state.clone()
    }

    pub fn display_state(&self) -> AppDisplayState {
        self.lock().display_state
    }

    pub fn is_attempting(&self) -> bool {
        self.lock().attempt.is_attempting()
    }

    pub fn state_changes(&self) -> &Observers<AppState> {
        &self.state_changes
    }

    pub fn display_changes(&self) -> &Observers<AppDisplayState> {
        &self.display_changes
    }

    pub fn is_on_demand_enabled(&self) -> bool {
        self.vpn_manager.is_on_demand_enabled()
    }

    pub async fn refresh_state(&self) {
        self.vpn_manager.refresh_state().await;
    }

    /// Persisted configuration of the protocol the tunnel currently uses
    pub fn active_connection(&self) -> Option<ConnectionConfiguration> {
        let protocol = self.vpn_manager.current_protocol()?;
        self.properties.last_connection(protocol.family())
    }

    /// Later of the tunnel's connected-since and the persisted timestamp
    pub fn connected_date(&self) -> Option<DateTime<Utc>> {
        let saved = self.properties.last_connected_at();
        match self.vpn_manager.connected_since() {
            Some(date) if saved.map_or(true, |saved| date > saved) => {
                self.properties.set_last_connected_at(Some(date));
                Some(date)
            }
            _ => saved,
        }
    }

    /// Enter `PreparingConnection` and start the attempt countdown
    ///
    /// Returns false when a stale tunnel is being recovered instead; the
    /// caller must not start a connection of its own then.
    pub fn prepare_to_connect(&self) -> bool {
        let vpn_disconnecting = self.lock().vpn_state.is_disconnecting();
        if !self.properties.has_connected() {
            if vpn_disconnecting {
                let me = self.me.clone();
                tokio::spawn(async move {
                    if let Some(manager) = me.upgrade() {
                        manager.vpn_stuck().await;
                    }
                });
                return false;
            }
            self.alerts.push(Alert::FirstTimeConnecting);
        }

        {
            let mut inner = self.lock();
            if vpn_disconnecting && inner.stuck == StuckDisconnect::NotStuck {
                inner.stuck = StuckDisconnect::Suspected;
            }
            inner.credentials_retried = false;
        }
        debug!("Preparing connection");
        self.begin_attempt();
        true
    }

    /// Arm a fresh countdown and enter `PreparingConnection`, replacing any
    /// attempt or abort still recorded
    fn begin_attempt(&self) {
        let deadline = Instant::now() + self.timing.attempt_deadline();
        {
            let mut inner = self.lock();
            inner.attempt.finish(false);
            inner.attempts_started += 1;
            let id = inner.attempts_started;

            let me = self.me.clone();
            let countdown = tokio::spawn(async move {
                tokio::time::sleep_until(deadline).await;
                if let Some(manager) = me.upgrade() {
                    manager.attempt_timed_out(id);
                }
            });
            inner.attempt = ConnectionAttempt::Attempting {
                id,
                timeout: Some(countdown.abort_handle()),
            };
            inner.state = AppState::PreparingConnection;
        }
        self.notify();
    }

    /// Connect again to the last attempted configuration under a new
    /// countdown
    async fn retry_last_attempt(&self, configuration: ConnectionConfiguration) {
        self.begin_attempt();
        self.connect(configuration).await;
    }

    /// User cancelled the attempt in flight
    pub async fn cancel_connection_attempt(&self) {
        {
            let mut inner = self.lock();
            inner.state = AppState::Aborted {
                user_initiated: true,
            };
            inner.attempt.finish(false);
        }
        info!("Connection attempt cancelled");
        self.notify();
        self.disconnect().await;
    }

    pub async fn disconnect(&self) {
        debug!("Disconnect started");
        self.properties.set_intentionally_disconnected(true);
        self.vpn_manager.disconnect().await;
    }

    /// Check network and credentials, load authentication data when the
    /// protocol needs it, then start the tunnel
    #[tracing::instrument(skip_all, fields(server = %configuration.server().name, protocol = %configuration.vpn_protocol()))]
    pub async fn connect(&self, configuration: ConnectionConfiguration) {
        if matches!(self.state(), AppState::Aborted { .. }) {
            debug!("Attempt was aborted, not connecting");
            return;
        }
        if !self.reachability.is_reachable().await {
            self.notify_network_unreachable();
            return;
        }

        let credentials = match self.keychain.fetch() {
            Ok(credentials) if credentials.delinquent => {
                self.alerts.push(Alert::UserDelinquent {
                    reconnect_info: None,
                });
                self.connection_failed(VpnError::ConnectionFailed {
                    reason: "account is delinquent".to_string(),
                });
                return;
            }
            Ok(credentials) => credentials,
            Err(e) => {
                error!("Cannot read VPN credentials: {}", e);
                self.connection_failed(VpnError::ConnectionFailed {
                    reason: "VPN credentials unavailable".to_string(),
                });
                self.alerts.push(Alert::CannotAccessVpnCredentials);
                return;
            }
        };

        self.lock().last_attempted = Some(configuration.clone());

        let auth_data = match configuration.vpn_protocol().authentication_type() {
            AuthenticationType::Credentials => None,
            AuthenticationType::Certificate => {
                debug!("Checking authentication keys and certificate");
                let features = self.certificate_features(&configuration);
                match self.authentication.load_authentication_data(Some(&features)).await {
                    Ok(data) => Some(data),
                    Err(CertificateError::TooManyRequests { retry_after }) => {
                        self.connection_failed(VpnError::MissingAuthenticationData);
                        self.alerts.push(Alert::TooManyCertificateRequests { retry_after });
                        return;
                    }
                    Err(e) => {
                        error!("Failed to load authentication data: {}", e);
                        self.connection_failed(VpnError::MissingAuthenticationData);
                        self.alerts.push(Alert::CertificateRefreshError);
                        return;
                    }
                }
            }
        };

        self.make_connection(configuration, &credentials, auth_data).await;
    }

    /// Fail the attempt in flight, for callers that detect a terminal error
    /// before a configuration exists
    pub fn fail_attempt(&self, error: VpnError) {
        self.connection_failed(error);
    }

    fn certificate_features(&self, configuration: &ConnectionConfiguration) -> VpnConnectionFeatures {
        VpnConnectionFeatures {
            netshield: configuration.netshield(),
            vpn_accelerator: self.properties.vpn_accelerator(),
            bouncing: configuration.server_ip().label.clone(),
            nat_type: configuration.nat_type(),
            safe_mode: configuration.safe_mode(),
        }
    }

    async fn make_connection(
        &self,
        configuration: ConnectionConfiguration,
        credentials: &VpnCredentials,
        auth_data: Option<VpnAuthenticationData>,
    ) {
        let tunnel = match VpnManagerConfiguration::derive(
            &configuration,
            credentials,
            PASSWORD_REFERENCE,
            auth_data,
            &self.client_label,
            self.properties.vpn_accelerator(),
        ) {
            Ok(tunnel) => tunnel,
            Err(e) => {
                error!("Cannot build tunnel configuration: {}", e);
                self.connection_failed(e);
                return;
            }
        };

        self.properties
            .set_last_connection(configuration.vpn_protocol().family(), Some(&configuration));
        info!("Connect started");
        self.vpn_manager.connect(tunnel).await;
    }

    fn vpn_state_changed(&self, new_state: &VpnState) {
        let (previous, attempting) = {
            let mut inner = self.lock();
            let previous = std::mem::replace(&mut inner.vpn_state, new_state.clone());
            (previous, inner.attempt.is_attempting())
        };

        if let VpnState::Error(e) = new_state {
            if previous == VpnState::Invalid {
                debug!(error = %e, "Ignoring error reported before the first tunnel state");
                return;
            }
            if attempting {
                self.stop_attempting_connection();
            }
        }
        self.handle_vpn_state_change(new_state);
    }

    fn handle_vpn_state_change(&self, vpn_state: &VpnState) {
        let mut stop_attempt = false;
        let mut connected = false;
        {
            let mut inner = self.lock();
            if !vpn_state.is_disconnecting() {
                inner.stuck = StuckDisconnect::NotStuck;
            }
            let attempting = inner.attempt.is_attempting();
            match vpn_state {
                VpnState::Invalid | VpnState::Reasserting(_) => return,
                // Transient while the OS sets the tunnel up
                VpnState::Disconnected if attempting => {
                    inner.state = AppState::PreparingConnection;
                    return;
                }
                VpnState::Disconnected => inner.state = AppState::Disconnected,
                VpnState::Connecting(descriptor) => {
                    inner.state = AppState::Connecting(descriptor.clone());
                }
                VpnState::Connected(descriptor) => {
                    inner.attempt.finish(true);
                    inner.state = AppState::Connected(descriptor.clone());
                    connected = true;
                }
                // The old tunnel must go before the new attempt can start
                VpnState::Disconnecting(_) if attempting => {
                    if matches!(inner.state, AppState::Connecting(_)) {
                        stop_attempt = true;
                    } else {
                        inner.state = AppState::PreparingConnection;
                    }
                }
                VpnState::Disconnecting(descriptor) => {
                    inner.state = AppState::Disconnecting(descriptor.clone());
                }
                VpnState::Error(e) => inner.state = AppState::Error(e.clone()),
            }
        }

        if connected {
            self.properties.set_intentionally_disconnected(false);
            if !self.properties.has_connected() {
                self.properties.set_has_connected(true);
            }
        }
        if stop_attempt {
            self.stop_attempting_connection();
        }
        self.notify();
    }

    /// Cancel the countdown, then tear down and diagnose in the background
    fn stop_attempting_connection(&self) {
        let vpn_state = {
            let mut inner = self.lock();
            if let ConnectionAttempt::Attempting { timeout, .. } = &mut inner.attempt {
                if let Some(countdown) = timeout.take() {
                    countdown.abort();
                }
            }
            inner.vpn_state.clone()
        };
        debug!("Stop attempting connection");

        let me = self.me.clone();
        tokio::spawn(async move {
            if let Some(manager) = me.upgrade() {
                manager.handle_vpn_error(&vpn_state).await;
            }
        });
    }

    fn attempt_timed_out(&self, id: u64) {
        {
            let mut inner = self.lock();
            match inner.attempt {
                ConnectionAttempt::Attempting { id: current, .. } if current == id => {}
                _ => return,
            }
            // Plain replacement: this runs on the countdown task itself
            inner.attempt = ConnectionAttempt::Idle;
            inner.state = AppState::Aborted {
                user_initiated: false,
            };
        }
        warn!("Connection attempt timed out");
        self.stop_attempting_connection();
        self.notify();
    }

    /// The failed tunnel is stopped while the API is asked why it failed;
    /// a retry only starts once the teardown is over
    async fn handle_vpn_error(&self, vpn_state: &VpnState) {
        let stuck = vpn_state.is_disconnecting() && self.lock().stuck != StuckDisconnect::NotStuck;
        if stuck {
            warn!("Stale tunnel failing to disconnect");
            self.vpn_stuck().await;
            return;
        }

        self.lock().attempt.finish(false);

        let cached = match self.keychain.fetch() {
            Ok(credentials) => credentials,
            Err(e) => {
                error!("Cannot read VPN credentials: {}", e);
                self.connection_failed(VpnError::ConnectionFailed {
                    reason: "VPN credentials unavailable".to_string(),
                });
                self.alerts.push(Alert::CannotAccessVpnCredentials);
                self.disconnect().await;
                return;
            }
        };

        let (_, sessions, fresh) = tokio::join!(
            self.disconnect(),
            self.api.sessions(),
            self.api.client_credentials()
        );
        let session_count = match sessions {
            Ok(sessions) => Some(sessions.len()),
            Err(e) => {
                self.report_api_failure(&e);
                None
            }
        };
        let fresh = match fresh {
            Ok(credentials) => Some(credentials),
            Err(e) => {
                self.report_api_failure(&e);
                None
            }
        };

        if let Some(last) = self.check_api_for_failure_reason(cached, session_count, fresh) {
            info!("Credentials changed, retrying the last connection");
            self.retry_last_attempt(last).await;
        }
    }

    /// Returns the configuration to retry when the failure came from
    /// credentials rotated since the attempt started
    fn check_api_for_failure_reason(
        &self,
        cached: VpnCredentials,
        session_count: Option<usize>,
        fresh: Option<VpnCredentials>,
    ) -> Option<ConnectionConfiguration> {
        // A newer attempt, a connection or the user owns the state now
        let superseded = self.is_attempting()
            || matches!(
                self.state(),
                AppState::Connected(_) | AppState::Aborted { user_initiated: true }
            );
        if superseded {
            return None;
        }

        let current = fresh.as_ref().unwrap_or(&cached);
        if let Some(count) = session_count {
            if count >= current.max_connect as usize {
                info!(sessions = count, max = current.max_connect, "Session limit reached");
                self.alerts.push(Alert::MaxSessions { plan: current.plan });
                self.connection_failed(VpnError::ConnectionFailed {
                    reason: "session limit reached".to_string(),
                });
                return None;
            }
        }

        let fresh = fresh?;
        if fresh.password == cached.password {
            return None;
        }
        if let Err(e) = self.keychain.store(&fresh) {
            warn!("Failed to store refreshed credentials: {}", e);
        }

        if self.vpn_manager.is_on_demand_enabled() {
            return None;
        }
        let mut inner = self.lock();
        if inner.credentials_retried {
            debug!("Already retried with refreshed credentials");
            return None;
        }
        let last = inner.last_attempted.clone()?;
        inner.credentials_retried = true;
        Some(last)
    }

    fn report_api_failure(&self, error: &ApiError) {
        match error {
            ApiError::TlsVerification => {
                self.alerts.push(Alert::InsecureConnection);
                let me = self.me.clone();
                tokio::spawn(async move {
                    if let Some(manager) = me.upgrade() {
                        manager.disconnect().await;
                    }
                });
            }
            e => debug!("No data from the API while diagnosing: {}", e),
        }
    }

    async fn vpn_stuck(&self) {
        let removed = self.vpn_manager.remove_configurations().await;
        if let Err(e) = &removed {
            error!("Failed to remove tunnel configurations: {}", e);
        }

        let retry = {
            let mut inner = self.lock();
            match (&removed, inner.stuck, inner.last_attempted.clone()) {
                (Ok(()), stuck, Some(last)) if stuck != StuckDisconnect::Retried => {
                    inner.stuck = StuckDisconnect::Retried;
                    Some(last)
                }
                _ => None,
            }
        };
        match retry {
            Some(last) => {
                info!("Removed stale configurations, retrying the last connection");
                self.retry_last_attempt(last).await;
            }
            None => {
                self.alerts.push(Alert::VpnStuck);
                self.connection_failed(VpnError::ConnectionFailed {
                    reason: "tunnel stuck disconnecting".to_string(),
                });
            }
        }
    }

    fn connection_failed(&self, error: VpnError) {
        {
            let mut inner = self.lock();
            inner.attempt.finish(false);
            inner.state = AppState::Error(error);
        }
        self.notify();
    }

    fn notify_network_unreachable(&self) {
        warn!("Network unreachable, not connecting");
        self.connection_failed(VpnError::NetworkUnreachable);
        self.alerts.push(Alert::NetworkUnreachable);
    }

    /// Publish the current state, and the display state when it moved
    fn notify(&self) {
        let local_agent = self.vpn_manager.local_agent_connected();
        let (state, display, display_changed) = {
            let mut inner = self.lock();
            let display = AppDisplayState::derive(&inner.state, local_agent);
            let changed = display != inner.display_state;
            inner.display_state = display;
            (inner.state.clone(), display, changed)
        };
        info!(state = %state, "App state changed");
        self.state_changes.notify(&state);
        if display_changed {
            self.display_changes.notify(&display);
        }
    }

    fn refresh_display_state(&self) {
        let local_agent = self.vpn_manager.local_agent_connected();
        let new_display = {
            let mut inner = self.lock();
            let display = AppDisplayState::derive(&inner.state, local_agent);
            if display == inner.display_state {
                return;
            }
            inner.display_state = display;
            display
        };
        debug!(display = %new_display, "Display state changed");
        self.display_changes.notify(&new_display);
    }
}
