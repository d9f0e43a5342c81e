//! Driver abstraction
//!
//! A driver is one protocol family's implementation of the operations the
//! poller needs: tag validation, the per-group timer callback, writes and
//! settings updates. `ModbusDriver` wraps the Modbus engine.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::error::{ErrorCode, Result};
use crate::modbus::command_batcher::{self, ReadSet};
use crate::modbus::{point, ModbusEngine, ModbusSettings, TagDeclaration};
use crate::sink::{CycleMetrics, OutputSink, Reading, RequestToken, Value};
use crate::transport::{ConnectionParams, Transport};

/// Shortest poll interval a group accepts
pub const MIN_GROUP_INTERVAL: Duration = Duration::from_millis(1);

/// Polling group: tags read together on one interval
///
/// The compiled plan is built lazily on the first tick and cached until the
/// tags change or the driver decides it is stale.
#[derive(Debug)]
pub struct Group<T, P> {
    name: String,
    interval: Duration,
    tags: Vec<T>,
    plan: Option<P>,
}

impl<T, P> Group<T, P> {
    /// Intervals below `MIN_GROUP_INTERVAL` are raised to it
    pub fn new(name: impl Into<String>, interval: Duration, tags: Vec<T>) -> Self {
        Self {
            name: name.into(),
            interval: interval.max(MIN_GROUP_INTERVAL),
            tags,
            plan: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn tags(&self) -> &[T] {
        &self.tags
    }

    /// Replace the tag list; the cached plan is dropped
    pub fn set_tags(&mut self, tags: Vec<T>) {
        self.tags = tags;
        self.plan = None;
    }

    pub fn plan(&self) -> Option<&P> {
        self.plan.as_ref()
    }

    /// Drop the cached plan so the next tick rebuilds it
    pub fn invalidate(&mut self) {
        self.plan = None;
    }
}

/// Protocol driver operations
///
/// @lifecycle validate tags → group_timer per tick → write on demand
#[async_trait]
pub trait Driver: Send {
    /// Declared tag type
    type Tag: Send + Sync + 'static;
    /// Driver settings
    type Settings: Send + 'static;
    /// Cached per-group command plan
    type Plan: Send + Sync + 'static;

    fn name(&self) -> &str;

    /// Check that a tag can be compiled under the current settings
    fn validate_tag(&self, tag: &Self::Tag) -> Result<()>;

    /// Run one polling cycle for a group
    ///
    /// @input group - group whose cached plan may be (re)built
    /// @output metrics of the cycle
    async fn group_timer(
        &mut self,
        group: &mut Group<Self::Tag, Self::Plan>,
        sink: &dyn OutputSink,
    ) -> CycleMetrics;

    /// Write several tags and complete `token` once
    async fn write_tags(
        &mut self,
        entries: Vec<(Self::Tag, Value)>,
        token: RequestToken,
        sink: &dyn OutputSink,
    ) -> std::result::Result<(), ErrorCode>;

    /// Write a single tag
    async fn write_tag(
        &mut self,
        tag: Self::Tag,
        value: Value,
        token: RequestToken,
        sink: &dyn OutputSink,
    ) -> std::result::Result<(), ErrorCode> {
        self.write_tags(vec![(tag, value)], token, sink).await
    }

    /// Validate and apply new settings
    fn apply_settings(&mut self, settings: Self::Settings) -> Result<()>;
}

/// Modbus implementation of `Driver`
pub struct ModbusDriver {
    engine: ModbusEngine,
}

impl ModbusDriver {
    pub fn new(
        device: impl Into<String>,
        settings: ModbusSettings,
        transport: Arc<dyn Transport>,
        backup: Option<ConnectionParams>,
    ) -> Self {
        Self {
            engine: ModbusEngine::new(device, settings, transport, backup),
        }
    }

    pub fn engine(&self) -> &ModbusEngine {
        &self.engine
    }

    fn plan_is_current(&self, plan: &ReadSet) -> bool {
        let settings = self.engine.settings();
        plan.address_base == settings.address_base && plan.max_payload == settings.max_read_payload
    }
}

#[async_trait]
impl Driver for ModbusDriver {
    type Tag = TagDeclaration;
    type Settings = ModbusSettings;
    type Plan = ReadSet;

    fn name(&self) -> &str {
        self.engine.device()
    }

    fn validate_tag(&self, tag: &TagDeclaration) -> Result<()> {
        point::compile(tag, self.engine.settings().address_base).map(|_| ())
    }

    async fn group_timer(
        &mut self,
        group: &mut Group<TagDeclaration, ReadSet>,
        sink: &dyn OutputSink,
    ) -> CycleMetrics {
        let stale = group
            .plan
            .as_ref()
            .map_or(true, |plan| !self.plan_is_current(plan));

        if stale {
            let settings = self.engine.settings();
            let plan = command_batcher::compile_reads(
                &group.tags,
                settings.address_base,
                settings.max_read_payload,
            );
            debug!(
                "Group {} compiled: {} points, {} commands",
                group.name,
                plan.points.len(),
                plan.commands.len()
            );
            // Compile failures are reported once, not every cycle
            for (tag, code) in &plan.rejected {
                warn!("Group {} tag {} excluded: {}", group.name, tag, code);
                sink.update(&group.name, tag, Reading::Error(*code));
            }
            group.plan = Some(plan);
        }

        match group.plan.as_ref() {
            Some(plan) => self.engine.poll(&group.name, plan, sink).await,
            None => CycleMetrics::default(),
        }
    }

    async fn write_tags(
        &mut self,
        entries: Vec<(TagDeclaration, Value)>,
        token: RequestToken,
        sink: &dyn OutputSink,
    ) -> std::result::Result<(), ErrorCode> {
        self.engine.write_tags(entries, token, sink).await
    }

    fn apply_settings(&mut self, settings: ModbusSettings) -> Result<()> {
        settings.validate()?;
        self.engine.apply_settings(settings);
        Ok(())
    }
}
