//! # lorawan-ns
//!
//! Core MAC-layer protocol engine of a LoRaWAN network server: uplink
//! validation and dispatch, MAC-command handling, ADR, downlink
//! construction and scheduling, and Class-B ping-slot timing.
//!
//! This crate is the protocol core only. Gateway transport, application
//! server integration, session/queue persistence, and join handling are
//! out-of-scope collaborators this crate consumes through the traits in
//! [`transport`], [`session::store`], [`queue::store`], and
//! [`mac::registry`].
//!
//! ## Usage
//!
//! ```toml
//! [dependencies]
//! lorawan-ns = "0.1.0"
//! ```
//!
//! A network-server binary wires up its own storage and transport
//! implementations and drives one [`pipeline::UplinkPipeline`] per inbound
//! frame:
//!
//! ```ignore
//! use lorawan_ns::pipeline::{DeviceLockRegistry, UplinkPipeline};
//!
//! let device_locks = DeviceLockRegistry::new();
//! let pipeline = UplinkPipeline {
//!     session_store: &session_store,
//!     queue_store: &queue_store,
//!     mac_store: &mac_store,
//!     band: &band,
//!     config: &config,
//!     clock: &clock,
//!     gateway: &gateway,
//!     app_server: &app_server,
//!     network_controller: &network_controller,
//!     device_locks: &device_locks,
//! };
//! let outcome = pipeline.process(frame).await;
//! ```

pub mod adr;
pub mod band;
pub mod classb;
pub mod clock;
pub mod config;
pub mod constants;
pub mod crypto;
pub mod downlink;
pub mod error;
pub mod logging;
pub mod mac;
pub mod phy;
pub mod pipeline;
pub mod queue;
pub mod session;
pub mod transport;

pub use crate::error::{NsError, PipelineOutcome};
pub use crate::logging::init_logger;
pub use crate::pipeline::{UplinkPipeline, UplinkResult};
