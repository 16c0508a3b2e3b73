//! # External Collaborators (§6)
//!
//! The gateway transport, application-server transport, and
//! network-controller transport are out-of-scope collaborators whose
//! interfaces this crate only consumes through narrow traits. Production
//! MQTT/gRPC bindings live outside this crate; the in-memory mocks here
//! exist solely to drive this crate's own test suite.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::NsError;
use crate::session::types::DevEui;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GatewayRxMetadata {
    pub gateway_id: [u8; 8],
    pub rssi: i32,
    pub snr: f32,
    pub rx_timestamp_micros: u64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UplinkTxMetadata {
    pub frequency_hz: u32,
    pub dr: u8,
}

/// One uplink delivered by the gateway transport, with RX metadata already
/// sorted by SNR descending for downlink-gateway selection (§3).
#[derive(Debug, Clone)]
pub struct GatewayUplinkFrame {
    pub phy_payload: Vec<u8>,
    pub tx_info: UplinkTxMetadata,
    pub rx_info: Vec<GatewayRxMetadata>,
}

impl GatewayUplinkFrame {
    pub fn new(phy_payload: Vec<u8>, tx_info: UplinkTxMetadata, mut rx_info: Vec<GatewayRxMetadata>) -> Self {
        rx_info.sort_by(|a, b| b.snr.partial_cmp(&a.snr).unwrap_or(std::cmp::Ordering::Equal));
        Self {
            phy_payload,
            tx_info,
            rx_info,
        }
    }

    pub fn best_snr(&self) -> Option<f32> {
        self.rx_info.first().map(|r| r.snr)
    }

    pub fn earliest_rx_timestamp(&self) -> Option<u64> {
        self.rx_info.first().map(|r| r.rx_timestamp_micros)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DownlinkTxMetadata {
    pub frequency_hz: u32,
    pub dr: u8,
    pub tx_power_dbm: i8,
    /// Gateway-clock timestamp to transmit at (Class A/C immediate).
    pub timestamp_micros: Option<u64>,
    /// GPS-epoch time to transmit at (Class B ping slots).
    pub time_since_gps_epoch: Option<Duration>,
}

#[derive(Debug, Clone)]
pub struct GatewayDownlinkFrame {
    pub token: u16,
    pub gateway_id: [u8; 8],
    pub tx_info: DownlinkTxMetadata,
    pub phy_payload: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DownlinkTxAck {
    pub token: u16,
    pub error: bool,
}

#[async_trait]
pub trait GatewayTransport: Send + Sync {
    async fn send_downlink(&self, frame: GatewayDownlinkFrame) -> Result<(), NsError>;
}

/// `HandleError` error kinds (§6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppErrorKind {
    DeviceQueueItemSize,
    MacCommandError,
    SessionError,
}

#[async_trait]
pub trait ApplicationServerTransport: Send + Sync {
    #[allow(clippy::too_many_arguments)]
    async fn handle_uplink_data(
        &self,
        dev_eui: DevEui,
        f_cnt: u32,
        f_port: u8,
        dr: u8,
        tx_info: UplinkTxMetadata,
        rx_info: Vec<GatewayRxMetadata>,
        data: Vec<u8>,
    ) -> Result<(), NsError>;

    async fn handle_downlink_ack(&self, dev_eui: DevEui, f_cnt: u32, acknowledged: bool) -> Result<(), NsError>;

    async fn handle_error(
        &self,
        dev_eui: DevEui,
        kind: AppErrorKind,
        error: String,
        f_cnt: u32,
    ) -> Result<(), NsError>;

    async fn handle_proprietary_uplink(
        &self,
        mac_payload: Vec<u8>,
        mic: [u8; 4],
        tx_info: UplinkTxMetadata,
        rx_info: Vec<GatewayRxMetadata>,
    ) -> Result<(), NsError>;

    async fn set_device_status(
        &self,
        dev_eui: DevEui,
        battery: u8,
        margin_db: i8,
        battery_level_percent: Option<u8>,
    ) -> Result<(), NsError>;
}

#[async_trait]
pub trait NetworkControllerTransport: Send + Sync {
    async fn handle_uplink_meta_data(
        &self,
        dev_eui: DevEui,
        tx_info: UplinkTxMetadata,
        rx_info: Vec<GatewayRxMetadata>,
    ) -> Result<(), NsError>;

    /// Called only for proprietary CIDs (>= 0x80) or explicitly enqueued
    /// commands (§6).
    async fn handle_uplink_mac_command(
        &self,
        dev_eui: DevEui,
        cid: u8,
        commands: Vec<Vec<u8>>,
    ) -> Result<(), NsError>;
}

/// Recorded call, for assertions in this crate's own integration tests.
#[derive(Debug, Clone)]
pub enum RecordedCall {
    Downlink(GatewayDownlinkFrame),
    UplinkData { dev_eui: DevEui, f_cnt: u32, f_port: u8, data: Vec<u8> },
    DownlinkAck { dev_eui: DevEui, f_cnt: u32, acknowledged: bool },
    Error { dev_eui: DevEui, kind: AppErrorKind, f_cnt: u32 },
    DeviceStatus { dev_eui: DevEui, battery: u8, margin_db: i8 },
}

#[derive(Default)]
pub struct MockTransports {
    pub calls: Mutex<Vec<RecordedCall>>,
}

impl MockTransports {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl GatewayTransport for MockTransports {
    async fn send_downlink(&self, frame: GatewayDownlinkFrame) -> Result<(), NsError> {
        self.calls.lock().unwrap().push(RecordedCall::Downlink(frame));
        Ok(())
    }
}

#[async_trait]
impl ApplicationServerTransport for MockTransports {
    async fn handle_uplink_data(
        &self,
        dev_eui: DevEui,
        f_cnt: u32,
        f_port: u8,
        _dr: u8,
        _tx_info: UplinkTxMetadata,
        _rx_info: Vec<GatewayRxMetadata>,
        data: Vec<u8>,
    ) -> Result<(), NsError> {
        self.calls.lock().unwrap().push(RecordedCall::UplinkData {
            dev_eui,
            f_cnt,
            f_port,
            data,
        });
        Ok(())
    }

    async fn handle_downlink_ack(&self, dev_eui: DevEui, f_cnt: u32, acknowledged: bool) -> Result<(), NsError> {
        self.calls.lock().unwrap().push(RecordedCall::DownlinkAck {
            dev_eui,
            f_cnt,
            acknowledged,
        });
        Ok(())
    }

    async fn handle_error(
        &self,
        dev_eui: DevEui,
        kind: AppErrorKind,
        _error: String,
        f_cnt: u32,
    ) -> Result<(), NsError> {
        self.calls.lock().unwrap().push(RecordedCall::Error { dev_eui, kind, f_cnt });
        Ok(())
    }

    async fn handle_proprietary_uplink(
        &self,
        _mac_payload: Vec<u8>,
        _mic: [u8; 4],
        _tx_info: UplinkTxMetadata,
        _rx_info: Vec<GatewayRxMetadata>,
    ) -> Result<(), NsError> {
        Ok(())
    }

    async fn set_device_status(
        &self,
        dev_eui: DevEui,
        battery: u8,
        margin_db: i8,
        _battery_level_percent: Option<u8>,
    ) -> Result<(), NsError> {
        self.calls.lock().unwrap().push(RecordedCall::DeviceStatus {
            dev_eui,
            battery,
            margin_db,
        });
        Ok(())
    }
}

#[async_trait]
impl NetworkControllerTransport for MockTransports {
    async fn handle_uplink_meta_data(
        &self,
        _dev_eui: DevEui,
        _tx_info: UplinkTxMetadata,
        _rx_info: Vec<GatewayRxMetadata>,
    ) -> Result<(), NsError> {
        Ok(())
    }

    async fn handle_uplink_mac_command(
        &self,
        _dev_eui: DevEui,
        _cid: u8,
        _commands: Vec<Vec<u8>>,
    ) -> Result<(), NsError> {
        Ok(())
    }
}
