//! ==============================================================================
//! relay.rs - cloud telemetry upload
//! ==============================================================================
//!
//! purpose:
//!     every `relay.interval_seconds`, send the current reading to a
//!     ThingSpeak-style endpoint:
//!
//!         GET <base_url>/update?api_key=K&field1=T&field2=pH&field3=NTU&field4=cm
//!
//!     an upload is accepted when the endpoint answers 2xx and the body is not
//!     "0" (ThingSpeak answers 0 when it drops an update, e.g. rate limiting).
//!
//! failure policy:
//!     - rejected upload: logged, the next cycle tries again
//!     - endpoint unreachable / timed out: retried every `retry_delay_ms`,
//!       at most `max_retries` times. past that the relay gives up and returns
//!       an error, which stops the node so the service manager restarts it.
//!
//! indicators:
//!     the led of every valid field is lit while an upload is in flight.
//!
//! ==============================================================================

use anyhow::{Context, Result};
use std::time::Duration;

use crate::config::{IndicatorPins, RelayConfig};
use crate::context::SharedContext;
use crate::domain::Reading;
use crate::hal::{self, SharedHal};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadOutcome {
    Accepted,
    Rejected,
}

pub struct CloudRelay {
    client: reqwest::Client,
    config: RelayConfig,
    leds: IndicatorPins,
    hal: SharedHal,
    context: SharedContext,
}

/// build the update url for one reading
pub fn update_url(base_url: &str, api_key: &str, reading: &Reading) -> Result<reqwest::Url> {
    let endpoint = format!("{}/update", base_url.trim_end_matches('/'));
    let fields = [
        ("api_key", api_key.to_string()),
        ("field1", format!("{:.2}", reading.temperature)),
        ("field2", format!("{:.2}", reading.ph)),
        ("field3", format!("{:.2}", reading.turbidity)),
        ("field4", format!("{:.2}", reading.water_level)),
    ];
    reqwest::Url::parse_with_params(&endpoint, &fields)
        .with_context(|| format!("invalid relay base url {}", base_url))
}

pub fn is_accepted(status: reqwest::StatusCode, body: &str) -> bool {
    status.is_success() && body.trim() != "0"
}

impl CloudRelay {
    pub fn new(
        config: RelayConfig,
        leds: IndicatorPins,
        hal: SharedHal,
        context: SharedContext,
    ) -> Result<Self> {
        let timeout = Duration::from_millis(config.timeout_ms);
        let client = reqwest::Client::builder()
            .connect_timeout(timeout)
            .timeout(timeout)
            .build()
            .context("Failed to build http client")?;
        Ok(Self { client, config, leds, hal, context })
    }

    /// upload forever; returns only when the endpoint stayed unreachable
    /// for the whole retry budget
    pub async fn run(self) -> Result<()> {
        tracing::info!(
            url = %self.config.base_url,
            interval_s = self.config.interval_seconds,
            "cloud relay started"
        );
        let mut ticker = tokio::time::interval(Duration::from_secs(self.config.interval_seconds));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            self.cycle().await?;
        }
    }

    /// one upload of the current reading, with bounded retries on
    /// connectivity errors
    pub async fn cycle(&self) -> Result<UploadOutcome> {
        let reading = self.context.lock().await.reading();
        let url = update_url(&self.config.base_url, &self.config.api_key, &reading)?;

        self.show_indicators(&reading).await;
        let outcome = self.upload_with_retry(url).await;
        self.clear_indicators().await;

        match &outcome {
            Ok(UploadOutcome::Accepted) => tracing::info!("readings sent to cloud"),
            Ok(UploadOutcome::Rejected) => tracing::warn!("cloud endpoint rejected the update"),
            Err(e) => tracing::error!("cloud endpoint unreachable: {:#}", e),
        }
        outcome
    }

    async fn upload_with_retry(&self, url: reqwest::Url) -> Result<UploadOutcome> {
        let attempts = self.config.max_retries.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.upload(url.clone()).await {
                Ok(outcome) => return Ok(outcome),
                Err(e) if attempt < attempts => {
                    tracing::warn!(attempt, max = attempts, "upload failed: {}", e);
                    tokio::time::sleep(Duration::from_millis(self.config.retry_delay_ms)).await;
                }
                Err(e) => {
                    return Err(anyhow::Error::new(e))
                        .with_context(|| format!("gave up after {} attempts", attempts));
                }
            }
        }
    }

    async fn upload(&self, url: reqwest::Url) -> Result<UploadOutcome, reqwest::Error> {
        let response = self.client.get(url).send().await?;
        let status = response.status();
        let body = response.text().await?;
        tracing::debug!(%status, body = %body.trim(), "cloud response");
        Ok(if is_accepted(status, &body) { UploadOutcome::Accepted } else { UploadOutcome::Rejected })
    }

    async fn show_indicators(&self, reading: &Reading) {
        let valid = reading.validity();
        let pins = self.leds;
        let states = [
            (pins.temperature, valid.temperature),
            (pins.ph, valid.ph),
            (pins.turbidity, valid.turbidity),
            (pins.water_level, valid.water_level),
        ];
        self.set_indicators(states).await;
    }

    async fn clear_indicators(&self) {
        let pins = self.leds;
        let states = [pins.temperature, pins.ph, pins.turbidity, pins.water_level].map(|p| (p, false));
        self.set_indicators(states).await;
    }

    async fn set_indicators(&self, states: [(u8, bool); 4]) {
        let result = hal::with_hal(&self.hal, move |h| {
            states.iter().try_for_each(|(pin, on)| h.set_indicator(*pin, *on))
        })
        .await;
        if let Err(e) = result.and_then(|r| r) {
            tracing::warn!("indicator update failed: {:#}", e);
        }
    }
}
