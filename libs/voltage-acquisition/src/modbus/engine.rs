//! Poll/write execution engine
//!
//! Runs a `ReadSet` once per tick: commands go out strictly in build order,
//! retryable failures are re-sent after a fixed delay, every point receives
//! either a decoded value or an explicit error, and failing slaves are
//! degraded through the health table. Client-mode devices with a backup
//! link alternate between primary and backup on disconnects.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use super::codec;
use super::command_batcher::{self, ReadCommand, ReadSet};
use super::constants::RTT_MAX_SENTINEL_MS;
use super::frame::{self, ExchangeError, FrameProcessor};
use super::health::SlaveHealthTable;
use super::point;
use super::types::{ModbusSettings, TagDeclaration};
use crate::error::ErrorCode;
use crate::sink::{CycleMetrics, OutputSink, Reading, RequestToken, Value};
use crate::transport::{ConnectionParams, LinkMode, Transport};

/// Primary/backup link bookkeeping of one device
#[derive(Debug, Clone)]
struct LinkSwitch {
    primary: ConnectionParams,
    backup: Option<ConnectionParams>,
    on_backup: bool,
    first_attempt_done: bool,
}

/// Final outcome of one command after retries
type CommandOutcome = Result<Vec<u8>, ExchangeError>;

/// Modbus execution engine for one device instance
pub struct ModbusEngine {
    device: String,
    settings: ModbusSettings,
    transport: Arc<dyn Transport>,
    frames: FrameProcessor,
    health: SlaveHealthTable,
    links: LinkSwitch,
    last_metrics: CycleMetrics,
}

impl ModbusEngine {
    /// Create an engine; the transport's current parameters are the primary link
    pub fn new(
        device: impl Into<String>,
        settings: ModbusSettings,
        transport: Arc<dyn Transport>,
        backup: Option<ConnectionParams>,
    ) -> Self {
        let primary = transport.params();
        Self {
            device: device.into(),
            frames: FrameProcessor::new(settings.frame_mode),
            settings,
            transport,
            health: SlaveHealthTable::new(),
            links: LinkSwitch {
                primary,
                backup,
                on_backup: false,
                first_attempt_done: false,
            },
            last_metrics: CycleMetrics::default(),
        }
    }

    pub fn device(&self) -> &str {
        &self.device
    }

    pub fn settings(&self) -> &ModbusSettings {
        &self.settings
    }

    /// Replace the settings; framing restarts when the frame mode changes
    pub fn apply_settings(&mut self, settings: ModbusSettings) {
        if settings.frame_mode != self.frames.mode() {
            self.frames = FrameProcessor::new(settings.frame_mode);
        }
        self.settings = settings;
    }

    pub fn health(&self) -> &SlaveHealthTable {
        &self.health
    }

    pub fn last_metrics(&self) -> CycleMetrics {
        self.last_metrics
    }

    /// True while the transport points at the backup link
    pub fn is_on_backup(&self) -> bool {
        self.links.on_backup
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    // ========================================================================
    // Polling
    // ========================================================================

    /// Execute one polling cycle of a group
    pub async fn poll(&mut self, group: &str, set: &ReadSet, sink: &dyn OutputSink) -> CycleMetrics {
        let stats_before = self.transport.stats();
        let mut metrics = CycleMetrics::default();
        let mut failed_this_cycle: HashSet<u8> = HashSet::new();
        let mut sent_any = false;

        for cmd in &set.commands {
            let slave = cmd.slave_id;

            if failed_this_cycle.contains(&slave) || self.health.is_skipped(slave) {
                debug!(
                    "Skip slave {} {}@{}x{}",
                    slave, cmd.area, cmd.start_address, cmd.count
                );
                dispatch_error(sink, group, set, cmd, ErrorCode::DeviceNotResponse);
                continue;
            }

            if sent_any && self.settings.command_interval_ms > 0 {
                sleep(Duration::from_millis(self.settings.command_interval_ms)).await;
            }
            sent_any = true;

            let outcome = self.run_read(cmd, &mut metrics).await;
            match outcome {
                Ok(data) => {
                    self.health.record_success(slave);
                    for point in set.points_of(cmd) {
                        let reading = match codec::decode_from_response(
                            &data,
                            cmd.start_address,
                            point,
                            self.settings.byte_order,
                        ) {
                            Ok(value) => Reading::Value(value),
                            Err(code) => Reading::Error(code),
                        };
                        sink.update(group, &point.name, reading);
                    }
                },
                Err(err) => {
                    metrics.commands_failed += 1;
                    let code = read_error_code(&err);
                    warn!(
                        "Read {} slave {} {}@{}x{} failed: {:?}",
                        self.device, slave, cmd.area, cmd.start_address, cmd.count, err
                    );
                    if err == ExchangeError::NoResponse {
                        failed_this_cycle.insert(slave);
                    }
                    dispatch_error(sink, group, set, cmd, code);
                },
            }

            if self.settings.degrade_enabled && failed_this_cycle.contains(&slave) {
                self.health.record_failed_cycle(
                    slave,
                    self.settings.degrade_cycles,
                    Duration::from_millis(self.settings.degrade_time_ms),
                );
            }
        }

        let stats_after = self.transport.stats();
        metrics.bytes_sent = stats_after.bytes_sent.saturating_sub(stats_before.bytes_sent);
        metrics.bytes_received = stats_after
            .bytes_received
            .saturating_sub(stats_before.bytes_received);
        if !sent_any {
            metrics.last_rtt_ms = self.last_metrics.last_rtt_ms;
        }

        self.last_metrics = metrics;
        sink.publish_metrics(&self.device, &metrics);
        metrics
    }

    async fn run_read(&mut self, cmd: &ReadCommand, metrics: &mut CycleMetrics) -> CommandOutcome {
        let pdu = frame::read_pdu(cmd)
            .map_err(|e| ExchangeError::DecodeFailure(e.to_string()))?;
        let response = self
            .run_with_retries(cmd.slave_id, &pdu, metrics, |resp| {
                frame::read_response_data(resp, cmd).map(|_| ())
            })
            .await?;
        Ok(response.get(2..).map(<[u8]>::to_vec).unwrap_or_default())
    }

    /// Send one request, retrying retryable failures
    ///
    /// `validate` runs on every response; its failure counts as a decode
    /// failure. Disconnects are never retried here.
    async fn run_with_retries<F>(
        &mut self,
        slave: u8,
        pdu: &[u8],
        metrics: &mut CycleMetrics,
        validate: F,
    ) -> CommandOutcome
    where
        F: Fn(&[u8]) -> Result<(), ExchangeError>,
    {
        let mut attempt: u32 = 0;
        loop {
            let result = match self.execute_once(slave, pdu, metrics).await {
                Ok(response) => validate(&response).map(|()| response),
                Err(err) => Err(err),
            };

            let retryable = match &result {
                Ok(_) | Err(ExchangeError::Disconnected) => false,
                Err(ExchangeError::DecodeFailure(reason)) => {
                    debug!("Decode failure from slave {}: {}", slave, reason);
                    metrics.last_rtt_ms = RTT_MAX_SENTINEL_MS;
                    self.transport.disconnect().await;
                    true
                },
                Err(_) => true,
            };

            if !retryable || attempt >= self.settings.max_retries {
                return result;
            }
            attempt += 1;
            debug!(
                "Retry {}/{} for slave {}",
                attempt, self.settings.max_retries, slave
            );
            sleep(Duration::from_millis(self.settings.retry_interval_ms)).await;
        }
    }

    /// One attempt: connect if needed, send, receive
    async fn execute_once(
        &mut self,
        slave: u8,
        pdu: &[u8],
        metrics: &mut CycleMetrics,
    ) -> CommandOutcome {
        if !self.transport.is_connected() {
            if let Err(e) = self.transport.connect().await {
                warn!("Connect {} failed: {}", self.transport.params(), e);
                self.handle_disconnect(metrics).await;
                return Err(ExchangeError::Disconnected);
            }
        }

        let started = Instant::now();
        metrics.commands_sent += 1;
        let timeout = Duration::from_millis(self.settings.response_timeout_ms);
        let result = self
            .frames
            .exchange(self.transport.as_ref(), slave, pdu, timeout)
            .await;

        if result == Err(ExchangeError::Disconnected) {
            self.handle_disconnect(metrics).await;
        } else {
            metrics.last_rtt_ms = started.elapsed().as_millis() as u64;
        }
        result
    }

    /// Drop the link and alternate between primary and backup
    async fn handle_disconnect(&mut self, metrics: &mut CycleMetrics) {
        metrics.last_rtt_ms = RTT_MAX_SENTINEL_MS;
        self.transport.disconnect().await;

        let Some(backup) = self.links.backup.clone() else {
            return;
        };
        if self.links.primary.link_mode() != LinkMode::Client {
            return;
        }

        let target = if !self.links.on_backup {
            if self.links.first_attempt_done {
                return;
            }
            self.links.on_backup = true;
            backup
        } else {
            self.links.on_backup = false;
            self.links.first_attempt_done = true;
            self.links.primary.clone()
        };

        info!("Device {} switching link to {}", self.device, target);
        if let Err(e) = self.transport.reconfigure(target).await {
            warn!("Link switch for {} failed: {}", self.device, e);
        }
    }

    // ========================================================================
    // Writing
    // ========================================================================

    /// Write a batch of tag values and complete the request once
    ///
    /// Every command is executed regardless of slave health. The response
    /// carries the first error met, or success when every tag was written.
    pub async fn write_tags(
        &mut self,
        entries: Vec<(TagDeclaration, Value)>,
        token: RequestToken,
        sink: &dyn OutputSink,
    ) -> Result<(), ErrorCode> {
        let mut first_error: Option<ErrorCode> = None;
        let mut compiled = Vec::with_capacity(entries.len());
        for (tag, value) in entries {
            match point::compile(&tag, self.settings.address_base) {
                Ok(point) => compiled.push((point, value)),
                Err(e) => {
                    warn!("Write {}: {}", tag.name, e);
                    first_error.get_or_insert(ErrorCode::InvalidAddress);
                },
            }
        }

        let set = command_batcher::build_writes(compiled, self.settings.byte_order);
        for (name, code) in &set.rejected {
            warn!("Write {} rejected: {}", name, code);
            first_error.get_or_insert(*code);
        }

        let mut metrics = CycleMetrics::default();
        for cmd in &set.commands {
            let pdu = match frame::write_pdu(cmd) {
                Ok(pdu) => pdu,
                Err(e) => {
                    warn!("Write frame for slave {}: {}", cmd.slave_id, e);
                    first_error.get_or_insert(ErrorCode::WriteFailure);
                    continue;
                },
            };
            let outcome = self
                .run_with_retries(cmd.slave_id, &pdu, &mut metrics, |resp| {
                    frame::check_write_echo(resp, cmd)
                })
                .await;
            if let Err(err) = outcome {
                warn!(
                    "Write {} slave {} @{}x{} failed: {:?}",
                    self.device, cmd.slave_id, cmd.start_address, cmd.count, err
                );
                first_error.get_or_insert(write_error_code(&err));
            } else {
                debug!(
                    "Wrote slave {} @{}x{} fc={:02X}",
                    cmd.slave_id, cmd.start_address, cmd.count, cmd.function_code
                );
            }
        }

        let result = match first_error {
            Some(code) => Err(code),
            None => Ok(()),
        };
        sink.write_response(token, result);
        result
    }

    /// Write a single tag
    pub async fn write_tag(
        &mut self,
        tag: TagDeclaration,
        value: Value,
        token: RequestToken,
        sink: &dyn OutputSink,
    ) -> Result<(), ErrorCode> {
        self.write_tags(vec![(tag, value)], token, sink).await
    }
}

fn dispatch_error(sink: &dyn OutputSink, group: &str, set: &ReadSet, cmd: &ReadCommand, code: ErrorCode) {
    for point in set.points_of(cmd) {
        sink.update(group, &point.name, Reading::Error(code));
    }
}

fn read_error_code(err: &ExchangeError) -> ErrorCode {
    match err {
        ExchangeError::Disconnected => ErrorCode::PluginDisconnected,
        ExchangeError::NoResponse => ErrorCode::DeviceNotResponse,
        ExchangeError::DecodeFailure(_) => ErrorCode::ProtocolDecodeFailure,
        ExchangeError::Exception(_) => ErrorCode::ReadFailure,
    }
}

fn write_error_code(err: &ExchangeError) -> ErrorCode {
    match err {
        ExchangeError::Exception(_) => ErrorCode::WriteFailure,
        other => read_error_code(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_mapping() {
        assert_eq!(
            read_error_code(&ExchangeError::Disconnected),
            ErrorCode::PluginDisconnected
        );
        assert_eq!(
            read_error_code(&ExchangeError::NoResponse),
            ErrorCode::DeviceNotResponse
        );
        assert_eq!(
            read_error_code(&ExchangeError::DecodeFailure("x".into())),
            ErrorCode::ProtocolDecodeFailure
        );
        assert_eq!(
            read_error_code(&ExchangeError::Exception(2)),
            ErrorCode::ReadFailure
        );
        assert_eq!(
            write_error_code(&ExchangeError::Exception(2)),
            ErrorCode::WriteFailure
        );
        assert_eq!(
            write_error_code(&ExchangeError::NoResponse),
            ErrorCode::DeviceNotResponse
        );
    }
}
