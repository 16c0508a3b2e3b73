//! # Session Store (§4.1)
//!
//! Resolves inbound frames from `(DevAddr, MIC)` to a session by trying the
//! uplink MIC against every candidate sharing that DevAddr — identification
//! is bound to cryptographic validity, never read off the wire payload
//! alone.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

use crate::crypto;
use crate::error::NsError;
use crate::phy::full_fcnt_candidates;
use crate::session::types::{DevAddr, DevEui, DeviceSession, MacVersion};

/// The subset of a parsed uplink the store needs to recompute a candidate's
/// MIC, kept decoupled from `ParsedUplink` so the store does not need to
/// know about FOpts/FPort framing.
pub struct UplinkMicInput<'a> {
    pub wire_f_cnt: u16,
    pub mic_msg: &'a [u8],
    pub received_mic: [u8; 4],
    pub tx_dr: u8,
    pub tx_ch: u8,
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    /// All sessions currently registered under this DevAddr; a DevAddr can
    /// collide across devices, so callers must disambiguate via `resolve`.
    async fn get_by_dev_addr(&self, dev_addr: DevAddr) -> Result<Vec<DeviceSession>, NsError>;

    /// Finds the one candidate session whose keys produce a MIC matching
    /// the uplink, trying the forward-window FCnt (and, if the candidate is
    /// in relaxed mode, a counter reset) for each candidate in turn.
    async fn resolve(
        &self,
        dev_addr: DevAddr,
        mic_input: &UplinkMicInput<'_>,
    ) -> Result<Option<(DeviceSession, u32)>, NsError> {
        let candidates = self.get_by_dev_addr(dev_addr).await?;
        for session in candidates {
            if let Some(full_fcnt) = try_resolve_one(&session, mic_input) {
                return Ok(Some((session, full_fcnt)));
            }
        }
        Ok(None)
    }

    /// Persists a session atomically. Implementations must reject a write
    /// whose `version` does not match the currently stored one
    /// (`SessionConflict`) rather than silently overwriting.
    async fn save(&self, session: DeviceSession) -> Result<(), NsError>;

    async fn get_by_dev_eui(&self, dev_eui: DevEui) -> Result<Option<DeviceSession>, NsError>;

    async fn delete(&self, dev_eui: DevEui) -> Result<(), NsError>;
}

fn try_resolve_one(session: &DeviceSession, input: &UplinkMicInput<'_>) -> Option<u32> {
    let fcnt_candidates = full_fcnt_candidates(
        session.f_cnt_up,
        input.wire_f_cnt,
        session.skip_fcnt_validation,
    );

    for full_fcnt in fcnt_candidates {
        let mic_matches = match session.mac_version {
            MacVersion::Lorawan1_0 => {
                let computed = crypto::compute_uplink_mic_1_0(
                    &session.f_nwk_s_int_key,
                    session.dev_addr,
                    full_fcnt,
                    input.mic_msg,
                );
                computed == input.received_mic
            }
            MacVersion::Lorawan1_1 => {
                let conf_f_cnt = session.conf_f_cnt.unwrap_or(0) as u16;
                let computed = crypto::compute_uplink_mic_1_1(
                    &session.f_nwk_s_int_key,
                    &session.s_nwk_s_int_key,
                    session.dev_addr,
                    full_fcnt,
                    conf_f_cnt,
                    input.tx_dr,
                    input.tx_ch,
                    input.mic_msg,
                );
                computed == input.received_mic
            }
        };
        if mic_matches {
            return Some(full_fcnt);
        }
    }
    None
}

/// Reference in-memory implementation for this crate's own test suite.
/// Production SQL/KV bindings are an out-of-scope collaborator (§6).
#[derive(Default)]
pub struct InMemorySessionStore {
    by_dev_eui: RwLock<HashMap<DevEui, DeviceSession>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, session: DeviceSession) {
        self.by_dev_eui.write().unwrap().insert(session.dev_eui, session);
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn get_by_dev_addr(&self, dev_addr: DevAddr) -> Result<Vec<DeviceSession>, NsError> {
        let guard = self.by_dev_eui.read().unwrap();
        Ok(guard
            .values()
            .filter(|s| s.dev_addr == dev_addr)
            .cloned()
            .collect())
    }

    async fn save(&self, session: DeviceSession) -> Result<(), NsError> {
        let mut guard = self.by_dev_eui.write().unwrap();
        if let Some(existing) = guard.get(&session.dev_eui) {
            if existing.version != session.version {
                return Err(NsError::SessionConflict(session.dev_eui.to_string()));
            }
        }
        let mut next = session;
        next.version += 1;
        guard.insert(next.dev_eui, next);
        Ok(())
    }

    async fn get_by_dev_eui(&self, dev_eui: DevEui) -> Result<Option<DeviceSession>, NsError> {
        Ok(self.by_dev_eui.read().unwrap().get(&dev_eui).cloned())
    }

    async fn delete(&self, dev_eui: DevEui) -> Result<(), NsError> {
        self.by_dev_eui.write().unwrap().remove(&dev_eui);
        Ok(())
    }
}
