//! Uplink Pipeline (§4.2): decode, identify, validate, dispatch, fan-out,
//! and (for Class A/B) synchronously trigger a downlink.

pub mod lock;
pub mod uplink;

pub use lock::DeviceLockRegistry;
pub use uplink::{UplinkPipeline, UplinkResult};
