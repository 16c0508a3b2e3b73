//! Queue Store contract (§4.1 sibling, §3 `DeviceQueueItem` invariants).

use std::collections::HashMap;
use std::sync::{Mutex, RwLock};

use async_trait::async_trait;

use crate::error::NsError;
use crate::queue::DeviceQueueItem;
use crate::session::types::DevEui;

#[async_trait]
pub trait QueueStore: Send + Sync {
    async fn enqueue(&self, item: DeviceQueueItem) -> Result<DeviceQueueItem, NsError>;

    /// Oldest (by insertion order) item that is not already pending.
    async fn next_unsent(&self, dev_eui: DevEui) -> Result<Option<DeviceQueueItem>, NsError>;

    /// Whether any item for this device is currently pending ack
    /// (invariant 3: at most one confirmed frame in flight at a time).
    async fn has_pending(&self, dev_eui: DevEui) -> Result<bool, NsError>;

    async fn mark_pending(&self, item_id: u64, timeout_after: Option<std::time::SystemTime>) -> Result<(), NsError>;

    async fn delete(&self, item_id: u64) -> Result<(), NsError>;

    /// Deletes the pending confirmed item for a device, if any, and returns
    /// it (called on ACK consumption, §4.2 step 7).
    async fn take_pending(&self, dev_eui: DevEui) -> Result<Option<DeviceQueueItem>, NsError>;

    async fn count_remaining(&self, dev_eui: DevEui) -> Result<usize, NsError>;

    /// Stamps every pending (non-pending-ack) Class-B item for the device
    /// with a GPS-epoch emit time (§4.2 step 8, beacon-lock rising edge).
    async fn stamp_class_b_slots(
        &self,
        dev_eui: DevEui,
        slots: &[u64],
    ) -> Result<(), NsError>;
}

#[derive(Default)]
pub struct InMemoryQueueStore {
    items: RwLock<HashMap<u64, DeviceQueueItem>>,
    next_id: Mutex<u64>,
    insertion_order: Mutex<Vec<u64>>,
}

impl InMemoryQueueStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl QueueStore for InMemoryQueueStore {
    async fn enqueue(&self, mut item: DeviceQueueItem) -> Result<DeviceQueueItem, NsError> {
        let mut next_id = self.next_id.lock().unwrap();
        *next_id += 1;
        item.id = *next_id;
        self.insertion_order.lock().unwrap().push(item.id);
        self.items.write().unwrap().insert(item.id, item.clone());
        Ok(item)
    }

    async fn next_unsent(&self, dev_eui: DevEui) -> Result<Option<DeviceQueueItem>, NsError> {
        let order = self.insertion_order.lock().unwrap();
        let items = self.items.read().unwrap();
        for id in order.iter() {
            if let Some(item) = items.get(id) {
                if item.dev_eui == dev_eui && !item.is_pending {
                    return Ok(Some(item.clone()));
                }
            }
        }
        Ok(None)
    }

    async fn has_pending(&self, dev_eui: DevEui) -> Result<bool, NsError> {
        let items = self.items.read().unwrap();
        Ok(items.values().any(|i| i.dev_eui == dev_eui && i.is_pending))
    }

    async fn mark_pending(
        &self,
        item_id: u64,
        timeout_after: Option<std::time::SystemTime>,
    ) -> Result<(), NsError> {
        let mut items = self.items.write().unwrap();
        if let Some(item) = items.get_mut(&item_id) {
            item.is_pending = true;
            item.timeout_after = timeout_after;
        }
        Ok(())
    }

    async fn delete(&self, item_id: u64) -> Result<(), NsError> {
        self.items.write().unwrap().remove(&item_id);
        self.insertion_order.lock().unwrap().retain(|id| *id != item_id);
        Ok(())
    }

    async fn take_pending(&self, dev_eui: DevEui) -> Result<Option<DeviceQueueItem>, NsError> {
        let id = {
            let items = self.items.read().unwrap();
            items
                .values()
                .find(|i| i.dev_eui == dev_eui && i.is_pending)
                .map(|i| i.id)
        };
        if let Some(id) = id {
            let item = self.items.write().unwrap().remove(&id);
            self.insertion_order.lock().unwrap().retain(|i| *i != id);
            Ok(item)
        } else {
            Ok(None)
        }
    }

    async fn count_remaining(&self, dev_eui: DevEui) -> Result<usize, NsError> {
        let items = self.items.read().unwrap();
        Ok(items.values().filter(|i| i.dev_eui == dev_eui).count())
    }

    async fn stamp_class_b_slots(&self, dev_eui: DevEui, slots: &[u64]) -> Result<(), NsError> {
        let order = self.insertion_order.lock().unwrap().clone();
        let mut items = self.items.write().unwrap();
        let mut slot_iter = slots.iter();
        for id in order {
            if let Some(item) = items.get_mut(&id) {
                if item.dev_eui == dev_eui && !item.is_pending {
                    if let Some(slot) = slot_iter.next() {
                        item.emit_at_time_since_gps_epoch = Some(*slot);
                    } else {
                        break;
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn at_most_one_pending_confirmed_item() {
        let store = InMemoryQueueStore::new();
        let dev_eui = DevEui::from_bytes([1; 8]);
        let a = store
            .enqueue(DeviceQueueItem::new(dev_eui, 1, vec![1], true, 0))
            .await
            .unwrap();
        store.mark_pending(a.id, None).await.unwrap();
        assert!(store.has_pending(dev_eui).await.unwrap());

        let taken = store.take_pending(dev_eui).await.unwrap().unwrap();
        assert_eq!(taken.id, a.id);
        assert!(!store.has_pending(dev_eui).await.unwrap());
    }

    #[tokio::test]
    async fn next_unsent_is_oldest_non_pending() {
        let store = InMemoryQueueStore::new();
        let dev_eui = DevEui::from_bytes([1; 8]);
        store
            .enqueue(DeviceQueueItem::new(dev_eui, 1, vec![1], false, 0))
            .await
            .unwrap();
        let second = store
            .enqueue(DeviceQueueItem::new(dev_eui, 1, vec![2], false, 1))
            .await
            .unwrap();

        let first = store.next_unsent(dev_eui).await.unwrap().unwrap();
        store.delete(first.id).await.unwrap();
        let next = store.next_unsent(dev_eui).await.unwrap().unwrap();
        assert_eq!(next.id, second.id);
    }
}
