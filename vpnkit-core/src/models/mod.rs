//! Value types shared across the connection core

pub mod connection;
pub mod credentials;
pub mod features;
pub mod protocol;
pub mod request;
pub mod server;
