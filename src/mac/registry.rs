//! # MAC-Command Registry (§4.1 component table, §3 `MACCommandBlock`)
//!
//! Two substores per DevEUI: `enqueued` (explicit injection awaiting its
//! first downlink opportunity) and `pending` (sent, awaiting the device's
//! Ans — consumed in place by the processor that applies that Ans).

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

use crate::error::NsError;
use crate::mac::commands::{Cid, MacCommandBlock};
use crate::session::types::DevEui;

#[async_trait]
pub trait MacCommandStore: Send + Sync {
    async fn enqueue(&self, dev_eui: DevEui, block: MacCommandBlock) -> Result<(), NsError>;

    async fn take_enqueued(&self, dev_eui: DevEui) -> Result<Vec<MacCommandBlock>, NsError>;

    /// Records a block as pending an Ans. A later call for the same CID
    /// overwrites the previous pending entry (§3 invariant 5).
    async fn set_pending(&self, dev_eui: DevEui, block: MacCommandBlock) -> Result<(), NsError>;

    async fn get_pending(&self, dev_eui: DevEui, cid: Cid) -> Result<Option<MacCommandBlock>, NsError>;

    /// Consumes (removes) the pending block for a CID — called once a
    /// matching Ans has been successfully applied (idempotence: a second
    /// Ans for the same CID then finds nothing pending and is a protocol
    /// warning, not a state mutation).
    async fn take_pending(&self, dev_eui: DevEui, cid: Cid) -> Result<Option<MacCommandBlock>, NsError>;
}

#[derive(Default)]
struct DeviceCommandState {
    enqueued: Vec<MacCommandBlock>,
    pending: HashMap<Cid, MacCommandBlock>,
}

#[derive(Default)]
pub struct InMemoryMacCommandStore {
    devices: RwLock<HashMap<DevEui, DeviceCommandState>>,
}

impl InMemoryMacCommandStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MacCommandStore for InMemoryMacCommandStore {
    async fn enqueue(&self, dev_eui: DevEui, block: MacCommandBlock) -> Result<(), NsError> {
        let mut guard = self.devices.write().unwrap();
        guard.entry(dev_eui).or_default().enqueued.push(block);
        Ok(())
    }

    async fn take_enqueued(&self, dev_eui: DevEui) -> Result<Vec<MacCommandBlock>, NsError> {
        let mut guard = self.devices.write().unwrap();
        Ok(guard
            .entry(dev_eui)
            .or_default()
            .enqueued
            .drain(..)
            .collect())
    }

    async fn set_pending(&self, dev_eui: DevEui, block: MacCommandBlock) -> Result<(), NsError> {
        let mut guard = self.devices.write().unwrap();
        guard.entry(dev_eui).or_default().pending.insert(block.cid, block);
        Ok(())
    }

    async fn get_pending(&self, dev_eui: DevEui, cid: Cid) -> Result<Option<MacCommandBlock>, NsError> {
        let guard = self.devices.read().unwrap();
        Ok(guard
            .get(&dev_eui)
            .and_then(|s| s.pending.get(&cid))
            .cloned())
    }

    async fn take_pending(&self, dev_eui: DevEui, cid: Cid) -> Result<Option<MacCommandBlock>, NsError> {
        let mut guard = self.devices.write().unwrap();
        Ok(guard.entry(dev_eui).or_default().pending.remove(&cid))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn pending_overwritten_by_same_cid_next_send() {
        let store = InMemoryMacCommandStore::new();
        let dev_eui = DevEui::from_bytes([1; 8]);
        store
            .set_pending(
                dev_eui,
                MacCommandBlock {
                    cid: Cid::LinkAdr,
                    commands: vec![],
                    external: false,
                },
            )
            .await
            .unwrap();
        store
            .set_pending(
                dev_eui,
                MacCommandBlock {
                    cid: Cid::LinkAdr,
                    commands: vec![],
                    external: false,
                },
            )
            .await
            .unwrap();
        let pending = store.get_pending(dev_eui, Cid::LinkAdr).await.unwrap();
        assert!(pending.is_some());

        store.take_pending(dev_eui, Cid::LinkAdr).await.unwrap();
        assert!(store.get_pending(dev_eui, Cid::LinkAdr).await.unwrap().is_none());
    }
}
