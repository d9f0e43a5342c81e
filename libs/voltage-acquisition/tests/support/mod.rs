//! Shared helpers for integration tests

#![allow(dead_code)]

pub mod mock_transport;
pub mod simulator;

use parking_lot::Mutex;
use voltage_acquisition::{CycleMetrics, ErrorCode, OutputSink, Reading, RequestToken};

// Each test crate uses a different subset
#[allow(unused_imports)]
pub use mock_transport::{Behavior, MockTransport};
#[allow(unused_imports)]
pub use simulator::DeviceSimulator;

/// Sink that records everything it receives
#[derive(Default)]
pub struct RecordingSink {
    pub updates: Mutex<Vec<(String, String, Reading)>>,
    pub writes: Mutex<Vec<(RequestToken, Result<(), ErrorCode>)>>,
    pub metrics: Mutex<Vec<(String, CycleMetrics)>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Most recent reading delivered for a tag
    pub fn last(&self, tag: &str) -> Option<Reading> {
        self.updates
            .lock()
            .iter()
            .rev()
            .find(|(_, t, _)| t == tag)
            .map(|(_, _, r)| r.clone())
    }

    /// Number of readings delivered for a tag
    pub fn count(&self, tag: &str) -> usize {
        self.updates.lock().iter().filter(|(_, t, _)| t == tag).count()
    }

    pub fn clear(&self) {
        self.updates.lock().clear();
    }
}

impl OutputSink for RecordingSink {
    fn update(&self, group: &str, tag: &str, reading: Reading) {
        self.updates
            .lock()
            .push((group.to_string(), tag.to_string(), reading));
    }

    fn write_response(&self, token: RequestToken, result: Result<(), ErrorCode>) {
        self.writes.lock().push((token, result));
    }

    fn publish_metrics(&self, device: &str, metrics: &CycleMetrics) {
        self.metrics.lock().push((device.to_string(), *metrics));
    }
}
