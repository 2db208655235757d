//! Protocol and port negotiation
//!
//! Availability checkers probe a single protocol; `SmartPortSelector` finds
//! ports for an explicit protocol and `SmartProtocol` walks the fallback
//! ladder when the user left the choice to us.

pub mod checker;
pub mod hmac;
pub mod openvpn;
pub mod port_selector;
pub mod protocol;
pub mod resolver;
pub mod wireguard;

pub use checker::{Availability, AvailabilityChecker};
pub use port_selector::SmartPortSelector;
pub use protocol::{ProtocolSelection, SmartProtocol};
pub use resolver::AvailabilityCheckerResolver;
pub use wireguard::WireguardPinger;
