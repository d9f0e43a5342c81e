//! Output sink that publishes acquisition results to the log
//!
//! Values go out at debug level under the `acq_values` target so they can
//! be enabled separately with `RUST_LOG=acq_values=debug`.

use tracing::{debug, info, warn};
use voltage_acquisition::{CycleMetrics, ErrorCode, OutputSink, Reading, RequestToken, TraceToken};

const VALUE_TARGET: &str = "acq_values";

#[derive(Debug, Default)]
pub struct LogSink;

impl OutputSink for LogSink {
    fn update(&self, group: &str, tag: &str, reading: Reading) {
        match reading {
            Reading::Value(value) => {
                debug!(target: VALUE_TARGET, "{}.{} = {}", group, tag, value);
            },
            Reading::Error(code) => {
                warn!(target: VALUE_TARGET, "{}.{}: {}", group, tag, code);
            },
        }
    }

    fn update_with_trace(&self, group: &str, tag: &str, reading: Reading, trace: &TraceToken) {
        debug!(target: VALUE_TARGET, "trace {}", trace.0);
        self.update(group, tag, reading);
    }

    fn write_response(&self, token: RequestToken, result: Result<(), ErrorCode>) {
        match result {
            Ok(()) => info!("Write request {} completed", token.0),
            Err(code) => warn!("Write request {} failed: {}", token.0, code),
        }
    }

    fn publish_metrics(&self, device: &str, metrics: &CycleMetrics) {
        debug!(
            "Device {} cycle: {} sent, {} failed, {}B out, {}B in, rtt {}ms",
            device,
            metrics.commands_sent,
            metrics.commands_failed,
            metrics.bytes_sent,
            metrics.bytes_received,
            metrics.last_rtt_ms
        );
    }
}
