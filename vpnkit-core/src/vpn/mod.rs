//! Connection orchestration
//!
//! `VpnGateway` takes user intent, `VpnServerSelector` and
//! `VpnConnectionPreparer` turn it into a `ConnectionConfiguration`,
//! `AppStateManager` tracks the attempt and `VpnManager` drives the tunnel
//! provider and the local agent.

pub mod app_state;
pub mod gateway;
pub mod intercept;
pub mod local_agent;
pub mod manager;
pub mod preparer;
pub mod reachability;
pub mod selector;
pub mod state;
pub mod tier;
pub mod tunnel;

// Public re-exports
pub use app_state::{AppStateDependencies, AppStateManager};
pub use gateway::{VpnGateway, VpnGatewayDependencies};
pub use intercept::{ConnectionInterceptPolicy, InterceptContext, InterceptResult, KillSwitchWireguardPolicy};
pub use manager::{VpnManager, VpnManagerDependencies};
pub use preparer::VpnConnectionPreparer;
pub use reachability::{AlwaysReachable, NetworkManagerReachability, NetworkReachability};
pub use selector::{ResolutionUnavailable, ServerSelection, VpnServerSelector};
pub use state::{AppDisplayState, AppState, VpnState};
pub use tier::{ResolutionUnavailableReason, ServerTierChecker};
pub use tunnel::{ProviderMessage, TunnelConfiguration, TunnelProvider, TunnelStatus};
