//! # Downlink Builder (§4.4)
//!
//! Assembles a PHYPayload for one downlink transmission: selects candidate
//! RX windows, allocates MAC commands, picks a queue item, assigns the down
//! FCnt, and computes the MIC. Timing (when to transmit) is the Downlink
//! Scheduler's job (§4.5); this module never reads the clock.

use std::time::{Duration, SystemTime};

use crate::adr;
use crate::band::Band;
use crate::config::NetworkServerConfig;
use crate::crypto::{self, Direction};
use crate::mac::commands::{Cid, MacCommand, MacCommandBlock};
use crate::mac::registry::MacCommandStore;
use crate::phy::{self, DownlinkFields};
use crate::queue::{DeviceQueueItem, QueueStore};
use crate::session::types::DeviceSession;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RxWindow {
    Rx1,
    Rx2,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceClass {
    A,
    B,
    C,
}

#[derive(Debug, Clone, Copy)]
pub struct UplinkContext {
    pub ack_requested: bool,
    pub dr: u8,
    pub adr_bit_set: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct RxWindowPlan {
    pub window: RxWindow,
    pub frequency_hz: u32,
    pub dr: u8,
    pub max_payload: usize,
}

#[derive(Debug, Clone)]
pub struct BuiltDownlink {
    pub phy_payload: Vec<u8>,
    pub f_cnt: u32,
    pub confirmed: bool,
    pub queue_item_id: Option<u64>,
    pub window: RxWindow,
    pub frequency_hz: u32,
    pub dr: u8,
}

#[derive(Debug, Clone)]
pub struct BuildOutcome {
    /// Primary candidate (first in window preference order) plus an
    /// optional fallback the gateway scheduler may replay (§4.4 step 7).
    pub candidates: Vec<BuiltDownlink>,
}

#[derive(Debug, Clone)]
pub enum DownlinkBuildResult {
    Built(BuildOutcome),
    QueueItemTooLarge { item_id: u64, len: usize, max: usize },
    Nothing,
}

/// Computes the candidate RX windows for a device class, honoring the
/// configured `RxWindowPreference` (§4.4 step 1).
pub fn compute_rx_windows(
    session: &DeviceSession,
    band: &dyn Band,
    config: &NetworkServerConfig,
    class: DeviceClass,
    uplink: Option<UplinkContext>,
) -> Vec<RxWindowPlan> {
    use crate::config::RxWindowPreference;

    match class {
        DeviceClass::B => {
            let dr = session.ping_slot_dr;
            return vec![RxWindowPlan {
                window: RxWindow::Rx2,
                frequency_hz: session.ping_slot_frequency_hz,
                dr,
                max_payload: band.max_payload_size(dr),
            }];
        }
        DeviceClass::C => {
            let dr = session.rx2_dr;
            return vec![RxWindowPlan {
                window: RxWindow::Rx2,
                frequency_hz: session.rx2_frequency_hz,
                dr,
                max_payload: band.max_payload_size(dr),
            }];
        }
        DeviceClass::A => {}
    }

    let uplink_dr = uplink.map(|u| u.dr).unwrap_or(session.dr);
    let rx1_dr = band.rx1_dr(uplink_dr, session.rx1_dr_offset);
    let rx1_freq = band
        .uplink_channel_frequency(0)
        .unwrap_or_else(|| band.default_uplink_channels()[0]);
    let rx1 = RxWindowPlan {
        window: RxWindow::Rx1,
        frequency_hz: rx1_freq,
        dr: rx1_dr,
        max_payload: band.max_payload_size(rx1_dr),
    };
    let rx2 = RxWindowPlan {
        window: RxWindow::Rx2,
        frequency_hz: session.rx2_frequency_hz,
        dr: session.rx2_dr,
        max_payload: band.max_payload_size(session.rx2_dr),
    };

    match config.network_settings.rx_window {
        RxWindowPreference::Rx1Only => vec![rx1],
        RxWindowPreference::Rx2Only => vec![rx2],
        RxWindowPreference::PreferRx1 => vec![rx1, rx2],
    }
}

/// MAC-command allocation result: bytes ready to place in FOpts, in the
/// generator's fixed order, with any commands that did not fit requeued to
/// the enqueued store by the caller.
pub struct MacAllocation {
    pub f_opts: Vec<u8>,
    pub included: Vec<MacCommandBlock>,
    pub deferred: Vec<MacCommandBlock>,
}

/// Runs the fixed-order generator set (§4.4 step 3): ADR, dev-status, then
/// the external enqueued store, discarding mutually-exclusive CIDs and
/// capping FOpts at 15 bytes.
#[allow(clippy::too_many_arguments)]
pub async fn allocate_mac_commands(
    session: &mut DeviceSession,
    band: &dyn Band,
    mac_store: &dyn MacCommandStore,
    disable_mac_commands: bool,
    adr_bit_set: bool,
    disable_adr: bool,
    dev_status_req_freq_per_day: u32,
    now: SystemTime,
) -> Result<MacAllocation, crate::error::NsError> {
    if disable_mac_commands {
        return Ok(MacAllocation {
            f_opts: Vec::new(),
            included: Vec::new(),
            deferred: Vec::new(),
        });
    }

    let mut generated: Vec<MacCommandBlock> = Vec::new();

    if !disable_adr {
        if let Some(target) = adr::evaluate(session, band, adr_bit_set, adr::DEFAULT_INSTALLATION_MARGIN_DB) {
            let req = adr::build_link_adr_req(session, target);
            generated.push(MacCommandBlock {
                cid: Cid::LinkAdr,
                commands: vec![req],
                external: false,
            });
        }
    }

    if dev_status_req_freq_per_day > 0 && dev_status_due(session, dev_status_req_freq_per_day, now) {
        generated.push(MacCommandBlock {
            cid: Cid::DevStatus,
            commands: vec![MacCommand::new(Cid::DevStatus, Vec::new())],
            external: false,
        });
        session.last_dev_status_requested = Some(now);
    }

    let mut external = mac_store.take_enqueued(session.dev_eui).await?;

    // Mutual exclusion: NewChannelReq and LinkADRReq may not coexist.
    if external.iter().any(|b| b.cid == Cid::NewChannel) {
        generated.retain(|b| b.cid != Cid::LinkAdr);
    }

    generated.append(&mut external);

    let mut f_opts = Vec::new();
    let mut included = Vec::new();
    let mut deferred = Vec::new();

    for block in generated {
        let block_len: usize = block.commands.iter().map(|c| c.wire_len(false)).sum();
        if f_opts.len() + block_len <= 15 {
            for cmd in &block.commands {
                cmd.encode(false, &mut f_opts);
            }
            for cmd in &block.commands {
                mac_store
                    .set_pending(session.dev_eui, MacCommandBlock {
                        cid: cmd.cid,
                        commands: vec![cmd.clone()],
                        external: block.external,
                    })
                    .await?;
            }
            included.push(block);
        } else {
            deferred.push(block);
        }
    }

    Ok(MacAllocation {
        f_opts,
        included,
        deferred,
    })
}

/// Whether a periodic `DevStatusReq` is due, per the configured cadence
/// (requests/day; 0 disables it).
fn dev_status_due(session: &DeviceSession, req_freq_per_day: u32, now: SystemTime) -> bool {
    let interval = Duration::from_secs(86_400 / req_freq_per_day.max(1) as u64);
    match session.last_dev_status_requested {
        None => true,
        Some(last) => now.duration_since(last).unwrap_or(Duration::ZERO) >= interval,
    }
}

/// Builds the primary + fallback PHY frames for one transmission
/// opportunity. Returns `Nothing` when there is truly nothing to send
/// (§4.4 step 4: no queue item, no MAC commands, no ACK owed, not forced).
#[allow(clippy::too_many_arguments)]
pub async fn build_downlink(
    session: &mut DeviceSession,
    queue: &dyn QueueStore,
    mac_store: &dyn MacCommandStore,
    band: &dyn Band,
    config: &NetworkServerConfig,
    class: DeviceClass,
    uplink: Option<UplinkContext>,
    must_send: bool,
    now: SystemTime,
) -> Result<DownlinkBuildResult, crate::error::NsError> {
    let windows = compute_rx_windows(session, band, config, class, uplink);
    let Some(primary) = windows.first().copied() else {
        return Ok(DownlinkBuildResult::Nothing);
    };

    let allocation = allocate_mac_commands(
        session,
        band,
        mac_store,
        config.network_settings.disable_mac_commands,
        uplink.map(|u| u.adr_bit_set).unwrap_or(false),
        config.network_settings.disable_adr,
        config.dev_status.req_freq_per_day,
        now,
    )
    .await?;
    for block in &allocation.deferred {
        mac_store.enqueue(session.dev_eui, block.clone()).await?;
    }

    let remaining_for_fopts = primary.max_payload.saturating_sub(allocation.f_opts.len());
    let queue_item = queue.next_unsent(session.dev_eui).await?;

    // Invariant 3: never emit a second confirmed frame while one is still
    // awaiting its ACK. An unconfirmed item behind it is free to go out.
    let queue_item = match queue_item {
        Some(item) if item.confirmed && queue.has_pending(session.dev_eui).await? => None,
        other => other,
    };

    let (queue_item, too_large): (Option<DeviceQueueItem>, bool) = match queue_item {
        Some(item) if item.frm_payload.len() > remaining_for_fopts => (Some(item), true),
        other => (other, false),
    };

    if too_large {
        let item = queue_item.unwrap();
        return Ok(DownlinkBuildResult::QueueItemTooLarge {
            item_id: item.id,
            len: item.frm_payload.len(),
            max: remaining_for_fopts,
        });
    }

    let ack_owed = uplink.map(|u| u.ack_requested).unwrap_or(false);
    if queue_item.is_none() && allocation.f_opts.is_empty() && !ack_owed && !must_send {
        return Ok(DownlinkBuildResult::Nothing);
    }

    let (f_port, frm_payload, confirmed, queue_item_id) = match &queue_item {
        Some(item) => (
            Some(item.f_port),
            item.frm_payload.clone(),
            item.confirmed,
            Some(item.id),
        ),
        None => (None, Vec::new(), false, None),
    };

    let f_cnt = session.advance_down_fcnt(f_port.unwrap_or(1));
    let remaining_after = queue.count_remaining(session.dev_eui).await?.saturating_sub(1);

    let mut candidates = Vec::new();
    for plan in &windows {
        let mut f_opts = allocation.f_opts.clone();
        if session.mac_version.is_1_1_or_later() && !f_opts.is_empty() {
            crypto::crypt_payload(&session.nwk_s_enc_key, Direction::Down, session.dev_addr, f_cnt, &mut f_opts);
        }

        let mut frm = frm_payload.clone();
        if f_port == Some(0) && !frm.is_empty() {
            crypto::crypt_payload(&session.nwk_s_enc_key, Direction::Down, session.dev_addr, f_cnt, &mut frm);
        }

        let fields = DownlinkFields {
            confirmed,
            dev_addr: session.dev_addr,
            adr: !config.network_settings.disable_adr,
            ack: ack_owed,
            f_pending: remaining_after > 0,
            f_cnt,
            f_opts,
            f_port,
            frm_payload: frm,
        };
        let msg = phy::marshal_downlink_without_mic(&fields);
        let conf_f_cnt = session.conf_f_cnt.unwrap_or(0) as u16;
        let mic = crypto::compute_downlink_mic(
            &session.s_nwk_s_int_key,
            session.dev_addr,
            f_cnt,
            conf_f_cnt,
            session.mac_version.is_1_1_or_later(),
            &msg,
        );
        let phy_payload = phy::append_mic(msg, mic);

        candidates.push(BuiltDownlink {
            phy_payload,
            f_cnt,
            confirmed,
            queue_item_id,
            window: plan.window,
            frequency_hz: plan.frequency_hz,
            dr: plan.dr,
        });
    }

    // RX1's payload may exceed RX2's limit; strip the RX2 fallback's MAC
    // commands down if the primary was built for a higher-payload window
    // than the fallback supports (§4.4 tie-break).
    if candidates.len() == 2 && candidates[1].phy_payload.len() > windows[1].max_payload + 13 {
        candidates.truncate(1);
    }

    if let Some(item) = &queue_item {
        if item.confirmed {
            session.conf_f_cnt = Some(f_cnt);
            let timeout = match class {
                DeviceClass::C => Some(now + std::time::Duration::from_secs(config.scheduler.class_c.default_timeout_secs)),
                _ => item.timeout_after,
            };
            queue.mark_pending(item.id, timeout).await?;
        } else {
            queue.delete(item.id).await?;
        }
    }

    Ok(DownlinkBuildResult::Built(BuildOutcome { candidates }))
}
