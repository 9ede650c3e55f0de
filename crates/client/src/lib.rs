//! The discovery client: drives one peer through connect, session
//! creation/joining, negotiation, host/participant role, and migration
//! recovery over the wire protocol implemented in `dss_codec`.

pub mod connection;
pub mod discovery;

pub use codec::message::{NatQuality, SessionType};
pub use discovery::{DiscoveryClient, DiscoveryConfig, DiscoveryError, State};
