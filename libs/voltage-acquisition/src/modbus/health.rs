//! Slave health tracking
//!
//! Per-slave consecutive failed-cycle counters and time-boxed skip state.
//! A degraded slave gets one reactivation task that clears the skip flag
//! when its window lapses; the task only holds a weak reference to the
//! table and is aborted when the table is dropped.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::info;

#[derive(Debug, Default)]
struct SlaveHealth {
    failed_cycles: u32,
    skipped: bool,
    reactivation: Option<JoinHandle<()>>,
}

type Slaves = Mutex<HashMap<u8, SlaveHealth>>;

/// Snapshot of one slave's health
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SlaveStatus {
    pub failed_cycles: u32,
    pub skipped: bool,
}

/// Health table of one device instance
#[derive(Debug, Default)]
pub struct SlaveHealthTable {
    slaves: Arc<Slaves>,
}

impl SlaveHealthTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// True while the slave sits out its degrade window
    pub fn is_skipped(&self, slave_id: u8) -> bool {
        self.slaves
            .lock()
            .get(&slave_id)
            .is_some_and(|health| health.skipped)
    }

    /// Reset the consecutive failure counter after a successful read
    pub fn record_success(&self, slave_id: u8) {
        if let Some(health) = self.slaves.lock().get_mut(&slave_id) {
            health.failed_cycles = 0;
        }
    }

    /// Count one failed cycle; returns true when the slave just got degraded
    ///
    /// Reaching `threshold` marks the slave skipped and schedules its
    /// reactivation after `window`.
    pub fn record_failed_cycle(&self, slave_id: u8, threshold: u32, window: Duration) -> bool {
        let mut slaves = self.slaves.lock();
        let health = slaves.entry(slave_id).or_default();
        health.failed_cycles = health.failed_cycles.saturating_add(1);

        if health.skipped || health.failed_cycles < threshold {
            return false;
        }

        health.skipped = true;
        let weak = Arc::downgrade(&self.slaves);
        health.reactivation = Some(tokio::spawn(async move {
            tokio::time::sleep(window).await;
            reactivate_weak(&weak, slave_id);
        }));
        info!(
            "Slave {} degraded after {} failed cycles, skipped for {}ms",
            slave_id,
            health.failed_cycles,
            window.as_millis()
        );
        true
    }

    /// Clear the skip state and counter immediately
    pub fn reactivate(&self, slave_id: u8) {
        if let Some(health) = self.slaves.lock().get_mut(&slave_id) {
            if let Some(handle) = health.reactivation.take() {
                handle.abort();
            }
            health.skipped = false;
            health.failed_cycles = 0;
        }
    }

    pub fn status(&self, slave_id: u8) -> SlaveStatus {
        self.slaves
            .lock()
            .get(&slave_id)
            .map(|health| SlaveStatus {
                failed_cycles: health.failed_cycles,
                skipped: health.skipped,
            })
            .unwrap_or_default()
    }
}

fn reactivate_weak(slaves: &Weak<Slaves>, slave_id: u8) {
    let Some(slaves) = slaves.upgrade() else {
        return;
    };
    let mut guard = slaves.lock();
    if let Some(health) = guard.get_mut(&slave_id) {
        health.skipped = false;
        health.failed_cycles = 0;
        health.reactivation = None;
        info!("Slave {} reactivated", slave_id);
    }
}

impl Drop for SlaveHealthTable {
    fn drop(&mut self) {
        for health in self.slaves.lock().values_mut() {
            if let Some(handle) = health.reactivation.take() {
                handle.abort();
            }
        }
    }
}
