//! ==============================================================================
//! scheduler.rs - the update loop
//! ==============================================================================
//!
//! purpose:
//!     drives refreshes. every refresh is: producer -> store -> fan-out,
//!     done while holding the context lock so it is atomic with respect to
//!     subscriber admission and snapshot reads.
//!
//!     ┌────────┐  cadence tick / line   ┌────────────┐   lock   ┌──────────────┐
//!     │  Idle  │ ─────────────────────► │ Refreshing │ ───────► │ store + push │
//!     └────────┘ ◄───────────────────── └────────────┘          └──────────────┘
//!                       done
//!
//!     demo / probe: a refresh every `producer.interval_ms`
//!     serial:       a refresh for every received line
//!
//!     inbound connections are handled by the web server task, concurrently;
//!     the only meeting point is the context mutex.
//!
//! ==============================================================================

use anyhow::Result;
use std::time::Duration;
use tokio::time::MissedTickBehavior;

use crate::broadcast::PublishReport;
use crate::context::SharedContext;
use crate::domain::Reading;
use crate::producer::{self, Producer};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Refreshing,
}

pub struct Scheduler {
    producer: Producer,
    context: SharedContext,
    interval: Duration,
    show_data: bool,
    state: SchedulerState,
}

impl Scheduler {
    pub fn new(producer: Producer, context: SharedContext, interval: Duration, show_data: bool) -> Self {
        Self {
            producer,
            context,
            interval,
            show_data,
            state: SchedulerState::Idle,
        }
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    /// run until the line source ends (serial mode) or forever (timed modes)
    pub async fn run(mut self) -> Result<()> {
        tracing::info!(
            mode = ?self.producer.mode(),
            interval_ms = self.interval.as_millis() as u64,
            "update scheduler started"
        );

        if matches!(self.producer, Producer::Lines(_)) {
            return self.run_lines().await;
        }

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            // first tick completes immediately: the store is filled at boot
            ticker.tick().await;
            if let Err(e) = self.tick().await {
                tracing::warn!("refresh failed: {:#}", e);
            }
        }
    }

    async fn run_lines(&mut self) -> Result<()> {
        loop {
            let line = match &mut self.producer {
                Producer::Lines(source) => source.next_line().await?,
                _ => return Ok(()),
            };
            let Some(raw) = line else {
                tracing::warn!("line source closed");
                return Ok(());
            };
            match producer::decode_line(&raw) {
                Ok(text) => {
                    self.handle_line(text).await;
                }
                Err(e) => tracing::warn!(len = raw.len(), "{}", e),
            }
        }
    }

    /// one cadence step for timed producers
    pub async fn tick(&mut self) -> Result<Option<PublishReport>> {
        // sampling may touch hardware; do it before taking the context lock
        let Some(reading) = self.producer.sample().await? else {
            return Ok(None);
        };
        Ok(Some(self.refresh(reading).await))
    }

    /// one line-protocol input. a rejected line changes nothing and
    /// publishes nothing.
    pub async fn handle_line(&mut self, line: &str) -> Option<PublishReport> {
        match producer::parse_line(line) {
            Ok(reading) => Some(self.refresh(reading).await),
            Err(e) => {
                tracing::warn!(line = %line.trim_end(), "{}", e);
                None
            }
        }
    }

    async fn refresh(&mut self, reading: Reading) -> PublishReport {
        let mut ctx = self.context.lock().await;
        self.state = SchedulerState::Refreshing;
        tracing::trace!(state = ?self.state(), "refresh started");

        let report = ctx.refresh(reading);
        let stored = ctx.reading();
        drop(ctx);

        self.state = SchedulerState::Idle;

        if self.show_data {
            tracing::info!(
                temperature = stored.temperature,
                ph = stored.ph,
                turbidity = stored.turbidity,
                water_level = stored.water_level,
                "reading updated"
            );
        }
        tracing::debug!(
            delivered = report.delivered,
            lagged = report.lagged,
            pruned = report.pruned,
            "broadcast complete"
        );
        report
    }
}
