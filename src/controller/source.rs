//! # Work sources
//!
//! A [`WorkSource`] tells a controller when there is work. The controller
//! loop races `next()` against its stop token, so implementations may simply
//! await; they are dropped mid-await when the controller stops.
//!
//! - [`BusSource`]: one work item per record on a channel.
//! - [`IntervalSource`]: a tick immediately, then a tick one interval after
//!   each following `next()` call. With a sequential controller the interval
//!   therefore runs from the end of the previous session.
//! - [`StartupSource`]: a fixed set of ticks once, then nothing.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::BusError;
use crate::messaging::{BusRecord, MessageBus, Subscription};

/// One unit of work to turn into a session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WorkItem {
    /// Inbound bus record.
    Record(BusRecord),
    /// Timer or startup trigger with its ordinal.
    Tick(u64),
}

/// Produces work for a controller.
#[async_trait]
pub trait WorkSource: Send + 'static {
    /// What this source listens to, for reports.
    fn describe(&self) -> String;

    /// Acquires whatever `next()` needs (e.g. a bus subscription) ahead of
    /// the first poll, so nothing published after this returns is missed.
    async fn prepare(&mut self) -> Result<(), BusError> {
        Ok(())
    }

    /// Next batch of work; an empty batch means "nothing yet".
    async fn next(&mut self) -> Result<Vec<WorkItem>, BusError>;
}

/// Records from one bus channel.
pub struct BusSource {
    bus: Arc<dyn MessageBus>,
    channel: String,
    poll_timeout: Duration,
    subscription: Option<Box<dyn Subscription>>,
}

impl BusSource {
    pub fn new(bus: Arc<dyn MessageBus>, channel: impl Into<String>, poll_timeout: Duration) -> Self {
        Self {
            bus,
            channel: channel.into(),
            poll_timeout,
            subscription: None,
        }
    }
}

#[async_trait]
impl WorkSource for BusSource {
    fn describe(&self) -> String {
        self.channel.clone()
    }

    async fn prepare(&mut self) -> Result<(), BusError> {
        if self.subscription.is_none() {
            self.subscription = Some(self.bus.subscribe(&self.channel).await?);
        }
        Ok(())
    }

    async fn next(&mut self) -> Result<Vec<WorkItem>, BusError> {
        self.prepare().await?;
        let Some(sub) = self.subscription.as_mut() else {
            return Ok(Vec::new());
        };
        match sub.poll(self.poll_timeout).await {
            Ok(batch) => Ok(batch.into_iter().map(WorkItem::Record).collect()),
            Err(e) => {
                self.subscription = None;
                Err(e)
            }
        }
    }
}

/// Periodic trigger.
pub struct IntervalSource {
    interval: Duration,
    ticks: u64,
}

impl IntervalSource {
    pub fn new(interval: Duration) -> Self {
        Self { interval, ticks: 0 }
    }
}

#[async_trait]
impl WorkSource for IntervalSource {
    fn describe(&self) -> String {
        format!("interval {}ms", self.interval.as_millis())
    }

    async fn next(&mut self) -> Result<Vec<WorkItem>, BusError> {
        if self.ticks > 0 {
            tokio::time::sleep(self.interval).await;
        }
        self.ticks += 1;
        Ok(vec![WorkItem::Tick(self.ticks)])
    }
}

/// Fixed set of ticks at startup, then idles forever.
pub struct StartupSource {
    label: String,
    count: u64,
    fired: bool,
}

impl StartupSource {
    pub fn new(label: impl Into<String>, count: u64) -> Self {
        Self {
            label: label.into(),
            count,
            fired: false,
        }
    }
}

#[async_trait]
impl WorkSource for StartupSource {
    fn describe(&self) -> String {
        self.label.clone()
    }

    async fn next(&mut self) -> Result<Vec<WorkItem>, BusError> {
        if self.fired {
            return std::future::pending().await;
        }
        self.fired = true;
        Ok((0..self.count).map(WorkItem::Tick).collect())
    }
}
