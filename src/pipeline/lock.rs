//! # Per-DevEUI Lock Registry (§5)
//!
//! At most one uplink task per DevEUI may run the mutating section of the
//! pipeline (steps 3-9) concurrently with its own downlink build. This is a
//! keyed async-mutex registry: a `std::sync::Mutex`-guarded map from
//! `DevEui` to an `Arc<tokio::Mutex<()>>`, matching the interior-locking
//! shape of the teacher crate's `wmbus::handle::WMBusHandle` (a single
//! `tokio::sync::Mutex` guarding handle state) generalized from one lock to
//! one lock per key.
//!
//! Entries are pruned lazily on release: once the last outstanding guard for
//! a DevEUI drops, its map entry is removed so the registry does not grow
//! without bound across the lifetime of a long-running server.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as SyncMutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::session::types::DevEui;

#[derive(Default)]
pub struct DeviceLockRegistry {
    locks: SyncMutex<HashMap<DevEui, Arc<AsyncMutex<()>>>>,
}

impl DeviceLockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&self, dev_eui: DevEui) -> Arc<AsyncMutex<()>> {
        self.locks
            .lock()
            .unwrap()
            .entry(dev_eui)
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    /// Acquires the per-device lock, blocking (asynchronously) until any
    /// other task holding it for the same DevEUI releases it. The returned
    /// guard must be held for the duration of the pipeline's mutating steps
    /// and dropped before returning to the caller.
    pub async fn lock(&self, dev_eui: DevEui) -> DeviceLockGuard<'_> {
        let arc = self.entry(dev_eui);
        let guard = arc.clone().lock_owned().await;
        DeviceLockGuard {
            guard: Some(guard),
            registry: self,
            dev_eui,
            arc,
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.locks.lock().unwrap().len()
    }
}

pub struct DeviceLockGuard<'a> {
    guard: Option<OwnedMutexGuard<()>>,
    registry: &'a DeviceLockRegistry,
    dev_eui: DevEui,
    arc: Arc<AsyncMutex<()>>,
}

impl Drop for DeviceLockGuard<'_> {
    fn drop(&mut self) {
        // Release the async lock first so a task that was waiting on this
        // DevEUI observes the map cleanup at worst one entry stale, never
        // deadlocked behind the prune below.
        self.guard.take();
        let mut map = self.registry.locks.lock().unwrap();
        // Strong refs at this point: one held by `map`, one by `self.arc`.
        // Anything above that means another waiter cloned the Arc before we
        // got here, so leave the entry for them to prune on their own release.
        if Arc::strong_count(&self.arc) <= 2 {
            map.remove(&self.dev_eui);
        }
    }
}
