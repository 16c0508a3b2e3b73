//! # Uplink Pipeline (§4.2)
//!
//! One uplink task, start to finish: identify the session, validate the
//! MIC and frame counter together (the Session Store binds both), decrypt
//! FOpts, update ADR history, dispatch MAC commands, fan out application
//! data, consume ACKs, track Class-B beacon lock, and — for Class A/B —
//! synchronously build and schedule the response downlink.
//!
//! Modeled as a typed state threaded through explicit steps rather than a
//! shared mutable context object (Design Note 9): each fallible step
//! returns early via [`PipelineOutcome`], and only the step whose contract
//! says it may mutate a given session field does so.

use crate::adr;
use crate::band::Band;
use crate::classb;
use crate::clock::Clock;
use crate::config::NetworkServerConfig;
use crate::crypto::{self, Direction};
use crate::downlink::builder::{self, DeviceClass, DownlinkBuildResult, UplinkContext};
use crate::downlink::scheduler;
use crate::error::{NsError, PipelineOutcome};
use crate::logging::{log_debug, log_error, log_warn};
use crate::mac::commands::{decode_uplink_commands, Cid, MacCommandBlock};
use crate::mac::processor;
use crate::mac::registry::MacCommandStore;
use crate::phy::{self, ParsedUplink};
use crate::pipeline::lock::DeviceLockRegistry;
use crate::queue::QueueStore;
use crate::session::store::{SessionStore, UplinkMicInput};
use crate::session::types::UplinkHistorySample;
use crate::transport::{
    AppErrorKind, ApplicationServerTransport, DownlinkTxMetadata, GatewayDownlinkFrame,
    GatewayTransport, GatewayUplinkFrame, NetworkControllerTransport,
};

#[derive(Debug, Clone, Copy, Default)]
pub struct UplinkResult {
    pub downlink_sent: bool,
}

pub struct UplinkPipeline<'a> {
    pub session_store: &'a dyn SessionStore,
    pub queue_store: &'a dyn QueueStore,
    pub mac_store: &'a dyn MacCommandStore,
    pub band: &'a dyn Band,
    pub config: &'a NetworkServerConfig,
    pub clock: &'a dyn Clock,
    pub gateway: &'a dyn GatewayTransport,
    pub app_server: &'a dyn ApplicationServerTransport,
    pub network_controller: &'a dyn NetworkControllerTransport,
    pub device_locks: &'a DeviceLockRegistry,
}

macro_rules! try_store {
    ($e:expr) => {
        match $e {
            Ok(v) => v,
            Err(e) => {
                log_error(&format!("uplink pipeline aborted: {e}"));
                return PipelineOutcome::Fail(e);
            }
        }
    };
}

impl<'a> UplinkPipeline<'a> {
    /// Processes one inbound uplink to completion. Never panics on
    /// malformed input; every recoverable condition is a
    /// [`PipelineOutcome::Dropped`] or [`PipelineOutcome::Fail`], never a
    /// partial session mutation.
    pub async fn process(&self, frame: GatewayUplinkFrame) -> PipelineOutcome<UplinkResult> {
        // Step 1: Identify.
        let parsed = match phy::parse_uplink(&frame.phy_payload) {
            Ok(p) => p,
            Err(e) => {
                let reason = format!("malformed PHY payload: {e}");
                log_debug(&reason);
                return PipelineOutcome::Dropped { reason };
            }
        };

        let tx_ch = self.channel_index(frame.tx_info.frequency_hz);
        let mic_input = UplinkMicInput {
            wire_f_cnt: parsed.wire_f_cnt,
            mic_msg: &parsed.mic_msg,
            received_mic: parsed.mic,
            tx_dr: frame.tx_info.dr,
            tx_ch,
        };

        let (mut session, full_fcnt) = match self.session_store.resolve(parsed.dev_addr, &mic_input).await {
            Ok(Some(pair)) => pair,
            Ok(None) => {
                let reason = "no session resolved this DevAddr/MIC combination".to_string();
                log_debug(&reason);
                return PipelineOutcome::Dropped { reason };
            }
            Err(e) => {
                log_error(&format!("session store lookup failed: {e}"));
                return PipelineOutcome::Fail(e);
            }
        };

        // §8 property 8: replaying an already-processed uplink changes nothing.
        if !session.skip_fcnt_validation && full_fcnt + 1 <= session.f_cnt_up {
            let reason = "stale/replayed frame counter".to_string();
            log_debug(&reason);
            return PipelineOutcome::Dropped { reason };
        }

        // §5: at most one uplink task per DevEUI runs steps 3-9 (including
        // its own downlink build) concurrently; held until this function
        // returns, never across an external notification's retry loop.
        let _device_lock = self.device_locks.lock(session.dev_eui).await;

        // Step 2: decrypt FOpts for 1.1+.
        let mut f_opts = parsed.f_opts.clone();
        if session.mac_version.is_1_1_or_later() && !f_opts.is_empty() {
            crypto::crypt_payload(&session.nwk_s_enc_key, Direction::Up, session.dev_addr, full_fcnt, &mut f_opts);
        }

        // Step 3: counter check — persist the new FCntUp only now that the
        // MIC (and therefore the claimed counter) has verified.
        session.f_cnt_up = full_fcnt + 1;

        // Step 4: ADR history update.
        let snr_max = frame.best_snr().unwrap_or(0.0);
        session.push_uplink_history(UplinkHistorySample {
            snr_max,
            dr: frame.tx_info.dr,
            f_cnt: full_fcnt,
            gateway_count: frame.rx_info.len() as u32,
        });

        // Step 5: MAC-command dispatch.
        let outcome = self.dispatch_mac_commands(&mut session, &parsed, &f_opts, &frame).await;
        if let Err(e) = outcome {
            log_error(&format!("MAC-command dispatch failed: {e}"));
            return PipelineOutcome::Fail(e);
        }

        // Step 6: fan-out application data. FRMPayload at FPort>0 is
        // encrypted with AppSKey, which this server never holds — forward
        // the ciphertext untouched (§6 glossary).
        if let Some(port) = parsed.f_port {
            if port > 0 && !parsed.frm_payload.is_empty() {
                let res = self
                    .app_server
                    .handle_uplink_data(
                        session.dev_eui,
                        full_fcnt,
                        port,
                        frame.tx_info.dr,
                        frame.tx_info,
                        frame.rx_info.clone(),
                        parsed.frm_payload.clone(),
                    )
                    .await;
                try_store!(res);
            }
        }

        // Step 7: ACK consumption.
        if parsed.ack {
            let taken = try_store!(self.queue_store.take_pending(session.dev_eui).await);
            if let Some(item) = taken {
                try_store!(
                    self.app_server
                        .handle_downlink_ack(session.dev_eui, item.f_cnt, true)
                        .await
                );
                session.conf_f_cnt = None;
            }
        }

        // Step 8: Class-B tracking — on the rising edge, stamp every
        // pending queue item with its next ping-slot time.
        let was_locked = session.beacon_locked;
        session.beacon_locked = parsed.class_b;
        if !was_locked && session.beacon_locked {
            let beacon = classb::beacon_start(self.clock.time_since_gps_epoch());
            let slots = classb::ping_slots_in_beacon(beacon, session.dev_addr, session.ping_slot_nb as u32);
            let slot_secs: Vec<u64> = slots.iter().map(|d| d.as_secs()).collect();
            try_store!(self.queue_store.stamp_class_b_slots(session.dev_eui, &slot_secs).await);
        }

        // Step 9: synchronous downlink for Class A/B.
        let class = if session.beacon_locked { DeviceClass::B } else { DeviceClass::A };
        let uplink_ctx = UplinkContext {
            ack_requested: parsed.mtype.is_confirmed_up(),
            dr: frame.tx_info.dr,
            adr_bit_set: parsed.adr,
        };
        let now = self.clock.now();
        let build_result = builder::build_downlink(
            &mut session,
            self.queue_store,
            self.mac_store,
            self.band,
            self.config,
            class,
            Some(uplink_ctx),
            false,
            now,
        )
        .await;

        let mut downlink_sent = false;
        match build_result {
            Ok(DownlinkBuildResult::Built(outcome)) => {
                if let Some(primary) = outcome.candidates.first() {
                    let scheduled = match scheduler::schedule(
                        primary,
                        &session,
                        class,
                        self.clock,
                        self.config,
                        frame.earliest_rx_timestamp(),
                    ) {
                        Ok(s) => s,
                        Err(e) => {
                            log_warn(&format!("downlink scheduling aborted: {e}"));
                            return PipelineOutcome::Fail(e);
                        }
                    };
                    let gw_frame = GatewayDownlinkFrame {
                        token: rand::random(),
                        gateway_id: frame
                            .rx_info
                            .first()
                            .map(|r| r.gateway_id)
                            .unwrap_or([0; 8]),
                        tx_info: DownlinkTxMetadata {
                            frequency_hz: primary.frequency_hz,
                            dr: primary.dr,
                            tx_power_dbm: self.band.tx_power_dbm(session.tx_power_index),
                            timestamp_micros: scheduled.timestamp_micros,
                            time_since_gps_epoch: scheduled.time_since_gps_epoch,
                        },
                        phy_payload: primary.phy_payload.clone(),
                    };
                    try_store!(self.gateway.send_downlink(gw_frame).await);
                    session.last_downlink_tx = Some(now);
                    downlink_sent = true;
                }
            }
            Ok(DownlinkBuildResult::QueueItemTooLarge { item_id, len, max }) => {
                log_debug(&format!(
                    "queue item {item_id} ({len} bytes) exceeds max payload {max} for dev {}; reporting and dropping",
                    session.dev_eui
                ));
                try_store!(
                    self.app_server
                        .handle_error(
                            session.dev_eui,
                            AppErrorKind::DeviceQueueItemSize,
                            format!("{len} > {max}"),
                            full_fcnt,
                        )
                        .await
                );
                try_store!(self.queue_store.delete(item_id).await);
            }
            Ok(DownlinkBuildResult::Nothing) => {}
            Err(e) => {
                log_error(&format!("downlink build failed: {e}"));
                return PipelineOutcome::Fail(e);
            }
        }

        try_store!(self.session_store.save(session).await);

        PipelineOutcome::Continue(UplinkResult { downlink_sent })
    }

    fn channel_index(&self, frequency_hz: u32) -> u8 {
        self.band
            .default_uplink_channels()
            .iter()
            .position(|f| *f == frequency_hz)
            .map(|i| i as u8)
            .unwrap_or(0)
    }

    fn log_protocol_warning(dev_eui: crate::session::types::DevEui, outcome: &processor::HandlerOutcome) {
        if let Some(warning) = &outcome.warning {
            log_warn(&format!("{dev_eui}: {warning}"));
        }
    }

    async fn dispatch_mac_commands(
        &self,
        session: &mut crate::session::types::DeviceSession,
        parsed: &ParsedUplink,
        f_opts: &[u8],
        frame: &GatewayUplinkFrame,
    ) -> Result<(), NsError> {
        let mac_bytes = if parsed.f_port == Some(0) {
            let mut frm = parsed.frm_payload.clone();
            crypto::crypt_payload(&session.nwk_s_enc_key, Direction::Up, session.dev_addr, session.f_cnt_up - 1, &mut frm);
            frm
        } else {
            f_opts.to_vec()
        };

        let commands = decode_uplink_commands(&mac_bytes);
        for cmd in &commands {
            match cmd.cid {
                Cid::LinkCheck => {
                    let ans = processor::handle_link_check_req(session, self.band, frame.rx_info.len() as u8);
                    self.mac_store
                        .enqueue(
                            session.dev_eui,
                            MacCommandBlock {
                                cid: Cid::LinkCheck,
                                commands: vec![ans],
                                external: false,
                            },
                        )
                        .await?;
                }
                Cid::LinkAdr => {
                    let pending = self.mac_store.get_pending(session.dev_eui, Cid::LinkAdr).await?;
                    let outcome = processor::handle_link_adr_ans(
                        session,
                        &cmd.payload,
                        pending.as_ref(),
                        self.config.network_settings.rn2483_txpower0_workaround,
                    );
                    Self::log_protocol_warning(session.dev_eui, &outcome);
                    if outcome.warning.is_none() {
                        self.mac_store.take_pending(session.dev_eui, Cid::LinkAdr).await?;
                    }
                }
                Cid::DevStatus => {
                    if let Some(processor::MacNotification::DevStatus { battery, margin_db }) =
                        processor::handle_dev_status_ans(&cmd.payload)
                    {
                        self.app_server
                            .set_device_status(session.dev_eui, battery, margin_db, None)
                            .await?;
                        self.mac_store.take_pending(session.dev_eui, Cid::DevStatus).await?;
                    }
                }
                cid if cid.is_proprietary() => {
                    self.network_controller
                        .handle_uplink_mac_command(session.dev_eui, cid.wire_value(true), vec![cmd.payload.clone()])
                        .await?;
                }
                Cid::RxParamSetup => {
                    let pending = self.mac_store.get_pending(session.dev_eui, Cid::RxParamSetup).await?;
                    let outcome = processor::handle_rx_param_setup_ans(session, &cmd.payload, pending.as_ref());
                    Self::log_protocol_warning(session.dev_eui, &outcome);
                    self.mac_store.take_pending(session.dev_eui, Cid::RxParamSetup).await?;
                }
                Cid::RxTimingSetup => {
                    let pending = self.mac_store.get_pending(session.dev_eui, Cid::RxTimingSetup).await?;
                    let outcome = processor::handle_rx_timing_setup_ans(session, pending.as_ref());
                    Self::log_protocol_warning(session.dev_eui, &outcome);
                    self.mac_store.take_pending(session.dev_eui, Cid::RxTimingSetup).await?;
                }
                Cid::NewChannel => {
                    let pending = self.mac_store.get_pending(session.dev_eui, Cid::NewChannel).await?;
                    let outcome = processor::handle_new_channel_ans(session, &cmd.payload, pending.as_ref());
                    Self::log_protocol_warning(session.dev_eui, &outcome);
                    self.mac_store.take_pending(session.dev_eui, Cid::NewChannel).await?;
                }
                Cid::PingSlotChannel => {
                    let pending = self.mac_store.get_pending(session.dev_eui, Cid::PingSlotChannel).await?;
                    let outcome = processor::handle_ping_slot_channel_ans(session, &cmd.payload, pending.as_ref());
                    Self::log_protocol_warning(session.dev_eui, &outcome);
                    self.mac_store.take_pending(session.dev_eui, Cid::PingSlotChannel).await?;
                }
                Cid::RejoinParamSetup => {
                    let pending = self.mac_store.get_pending(session.dev_eui, Cid::RejoinParamSetup).await?;
                    let outcome = processor::handle_rejoin_param_setup_ans(session, &cmd.payload, pending.as_ref());
                    Self::log_protocol_warning(session.dev_eui, &outcome);
                    self.mac_store.take_pending(session.dev_eui, Cid::RejoinParamSetup).await?;
                }
                _other => {
                    // DutyCycleAns, TxParamSetupAns, AdrParamSetupAns,
                    // DeviceTimeReq, PingSlotInfoReq, BeaconFreqAns, RekeyInd:
                    // acknowledged implicitly (no session field to commit);
                    // clear any matching pending entry so it does not linger.
                }
            }
        }
        Ok(())
    }
}
