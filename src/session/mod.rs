//! Device-session data model and store (§3, §4.1).

pub mod store;
pub mod types;

pub use store::{InMemorySessionStore, SessionStore};
pub use types::{
    AesKey, ChannelConfig, DeviceSession, DevAddr, DevEui, GatewayQuality, JoinEui, MacVersion,
    UplinkHistorySample,
};
