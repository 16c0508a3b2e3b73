//! Downlink Builder and Scheduler (§4.4, §4.5), plus the narrow Multicast
//! Downlink slice (SPEC_FULL §4.8).

pub mod builder;
pub mod multicast;
pub mod scheduler;

pub use builder::{
    build_downlink, BuildOutcome, BuiltDownlink, DownlinkBuildResult, DeviceClass, RxWindow,
    RxWindowPlan, UplinkContext,
};
pub use scheduler::schedule;
