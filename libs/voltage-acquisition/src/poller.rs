//! Device poller
//!
//! One tokio task per polling group, all sharing the device's driver behind
//! an async mutex: a tick never overlaps another tick or a write on the same
//! device, and ticks that overrun are delayed rather than bunched up.

use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::driver::{Driver, Group};
use crate::error::ErrorCode;
use crate::sink::{OutputSink, RequestToken, Value};

/// Drives the groups of one device until cancelled
pub struct DevicePoller<D: Driver> {
    driver: Arc<Mutex<D>>,
    sink: Arc<dyn OutputSink>,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl<D> DevicePoller<D>
where
    D: Driver + 'static,
{
    /// `cancel` is usually a child of the service-wide shutdown token
    pub fn new(driver: D, sink: Arc<dyn OutputSink>, cancel: CancellationToken) -> Self {
        Self {
            driver: Arc::new(Mutex::new(driver)),
            sink,
            cancel,
            tasks: Vec::new(),
        }
    }

    /// Shared handle to the driver, for inspection and writes
    pub fn driver(&self) -> Arc<Mutex<D>> {
        Arc::clone(&self.driver)
    }

    /// Start polling a group on its interval; the first tick fires immediately
    pub fn add_group(&mut self, mut group: Group<D::Tag, D::Plan>) {
        let driver = Arc::clone(&self.driver);
        let sink = Arc::clone(&self.sink);
        let cancel = self.cancel.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = interval(group.interval());
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            debug!("Group {} polling every {:?}", group.name(), group.interval());

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let mut driver = driver.lock().await;
                        driver.group_timer(&mut group, sink.as_ref()).await;
                    }
                }
            }
            debug!("Group {} stopped", group.name());
        });
        self.tasks.push(handle);
    }

    /// Write tags between polling cycles
    pub async fn write_tags(
        &self,
        entries: Vec<(D::Tag, Value)>,
        token: RequestToken,
    ) -> Result<(), ErrorCode> {
        let mut driver = self.driver.lock().await;
        driver.write_tags(entries, token, self.sink.as_ref()).await
    }

    /// Write one tag between polling cycles
    pub async fn write_tag(
        &self,
        tag: D::Tag,
        value: Value,
        token: RequestToken,
    ) -> Result<(), ErrorCode> {
        let mut driver = self.driver.lock().await;
        driver.write_tag(tag, value, token, self.sink.as_ref()).await
    }

    /// Stop every group and wait for running cycles to finish
    pub async fn shutdown(self) {
        self.cancel.cancel();
        for task in self.tasks {
            let _ = task.await;
        }
        let driver = self.driver.lock().await;
        info!("Device {} stopped", driver.name());
    }
}
