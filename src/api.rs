//! Palgate cloud API client.
//! One client per physical gate. `open_gate` / `invert_gate` send the gate trigger over HTTPS;
//! the gate itself reports nothing back, so opening/closing/closed is derived from the configured timings
//! measured from the last successful trigger.
//! Errors from the API are returned to the caller, there are no retries at this layer.

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Number;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::config::ConfigRecord;

pub const DEFAULT_BASE_URL: &str = "https://api1.pal-es.com/v1/bt";
const TIMEOUT_SECS: u64 = 10;
const OPEN_BY: &str = "100";
const OUTPUT_NUM: &str = "1";

/// Longest accepted phase timing, in seconds.
pub const MAX_TIMING_SECS: f64 = 86_400.0;

// *************** Public Types ***************

/// Gate operations a cover entity delegates to.
#[async_trait]
pub trait GateClient: Send + Sync {
    async fn open_gate(&self) -> Result<()>;

    /// Re-triggers the gate; used as "stop".
    async fn invert_gate(&self) -> Result<()>;

    fn is_opening(&self) -> bool;
    fn is_closing(&self) -> bool;
    fn is_closed(&self) -> bool;
}

/// Credentials and timings shared by every gate of one config entry.
#[derive(Clone, Debug, PartialEq)]
pub struct GateSettings {
    pub token: String,
    pub token_type: String,
    pub phone_number: String,
    pub seconds_to_open: f64,
    pub seconds_open: f64,
    pub seconds_to_close: f64,
    pub allow_invert_as_stop: bool,
}

impl GateSettings {
    pub fn from_record(record: &ConfigRecord) -> Result<Self> {
        let advanced = record
            .advanced
            .as_ref()
            .context("Config entry has no advanced block")?;

        Ok(Self {
            token: record.token.clone().context("Config entry has no API token")?,
            token_type: record
                .token_type
                .clone()
                .context("Config entry has no token type")?,
            phone_number: record
                .phone_number
                .clone()
                .context("Config entry has no phone number")?,
            seconds_to_open: timing("seconds_to_open", &advanced.seconds_to_open)?,
            seconds_open: timing("seconds_open", &advanced.seconds_open)?,
            seconds_to_close: timing("seconds_to_close", &advanced.seconds_to_close)?,
            allow_invert_as_stop: advanced.allow_invert_as_stop,
        })
    }
}

fn timing(name: &str, value: &Number) -> Result<f64> {
    let seconds = value
        .as_f64()
        .with_context(|| format!("{} is not a usable number: {}", name, value))?;
    if !(0.0..=MAX_TIMING_SECS).contains(&seconds) {
        bail!(
            "{} = {} is out of range (0..={} seconds)",
            name,
            value,
            MAX_TIMING_SECS
        );
    }
    Ok(seconds)
}

/// Builds one client per gate id.
pub trait GateClientFactory {
    fn create(&self, device_id: &str, settings: &GateSettings) -> Arc<dyn GateClient>;
}

// *************** Movement Timeline ***************

/// Instants at which the current movement cycle changes phase.
#[derive(Clone, Copy, Debug)]
struct Cycle {
    opened_at: Instant,
    closing_at: Instant,
    closed_at: Instant,
}

fn secs(value: f64) -> Duration {
    // negative or NaN timings count as zero, anything longer than the cap as the cap
    if value.is_nan() || value <= 0.0 {
        return Duration::ZERO;
    }
    Duration::from_secs_f64(value.min(MAX_TIMING_SECS))
}

fn after(at: Instant, seconds: f64) -> Instant {
    at.checked_add(secs(seconds)).unwrap_or(at)
}

impl Cycle {
    fn opening(now: Instant, settings: &GateSettings) -> Self {
        let opened_at = after(now, settings.seconds_to_open);
        let closing_at = after(opened_at, settings.seconds_open);
        Self {
            opened_at,
            closing_at,
            closed_at: after(closing_at, settings.seconds_to_close),
        }
    }

    fn closing(now: Instant, settings: &GateSettings) -> Self {
        Self {
            opened_at: now,
            closing_at: now,
            closed_at: after(now, settings.seconds_to_close),
        }
    }

    fn is_opening(&self, now: Instant) -> bool {
        now < self.opened_at
    }

    fn is_open(&self, now: Instant) -> bool {
        self.opened_at <= now && now < self.closing_at
    }

    fn is_closing(&self, now: Instant) -> bool {
        self.closing_at <= now && now < self.closed_at
    }
}

// *************** HTTP Client ***************

#[derive(Deserialize)]
struct ApiResponse {
    status: String,
    #[serde(default)]
    msg: Option<String>,
}

/// Shared HTTP session for all gate clients.
pub fn http_client() -> Result<Client> {
    Client::builder()
        .timeout(Duration::from_secs(TIMEOUT_SECS))
        .build()
        .context("Failed to create HTTP client")
}

pub struct PalgateApiClient {
    device_id: String,
    settings: GateSettings,
    http: Client,
    base_url: String,
    cycle: Mutex<Option<Cycle>>,
}

impl PalgateApiClient {
    pub fn new(device_id: &str, settings: GateSettings, http: Client, base_url: &str) -> Self {
        Self {
            device_id: device_id.to_string(),
            settings,
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            cycle: Mutex::new(None),
        }
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    fn current_cycle(&self) -> Option<Cycle> {
        *self.cycle.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_cycle(&self, cycle: Cycle) {
        *self.cycle.lock().unwrap_or_else(|e| e.into_inner()) = Some(cycle);
    }

    async fn trigger(&self) -> Result<()> {
        let url = format!("{}/device/{}/open-gate", self.base_url, self.device_id);

        let response = self
            .http
            .get(&url)
            .query(&[("openBy", OPEN_BY), ("outputNum", OUTPUT_NUM)])
            .header("x-bt-token", &self.settings.token)
            .header("x-bt-token-type", &self.settings.token_type)
            .send()
            .await
            .with_context(|| format!("Failed to send gate request for {}", self.device_id))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            bail!("Palgate API error {} for gate {}: {}", status, self.device_id, body);
        }

        let api_response: ApiResponse = response
            .json()
            .await
            .context("Failed to parse Palgate response")?;

        if api_response.status != "ok" {
            bail!(
                "Palgate API refused gate {}: {}",
                self.device_id,
                api_response.msg.unwrap_or(api_response.status)
            );
        }

        Ok(())
    }
}

#[async_trait]
impl GateClient for PalgateApiClient {
    async fn open_gate(&self) -> Result<()> {
        self.trigger().await?;
        self.set_cycle(Cycle::opening(Instant::now(), &self.settings));
        tracing::info!("Gate {} opening", self.device_id);
        Ok(())
    }

    async fn invert_gate(&self) -> Result<()> {
        if !self.settings.allow_invert_as_stop {
            bail!(
                "Stop is not allowed for gate {} (allow_invert_as_stop is off)",
                self.device_id
            );
        }

        self.trigger().await?;

        let now = Instant::now();
        let moving_up = self
            .current_cycle()
            .is_some_and(|c| c.is_opening(now) || c.is_open(now));
        if moving_up {
            self.set_cycle(Cycle::closing(now, &self.settings));
            tracing::info!("Gate {} inverted, now closing", self.device_id);
        } else {
            self.set_cycle(Cycle::opening(now, &self.settings));
            tracing::info!("Gate {} inverted, now opening", self.device_id);
        }
        Ok(())
    }

    fn is_opening(&self) -> bool {
        self.current_cycle()
            .is_some_and(|c| c.is_opening(Instant::now()))
    }

    fn is_closing(&self) -> bool {
        self.current_cycle()
            .is_some_and(|c| c.is_closing(Instant::now()))
    }

    fn is_closed(&self) -> bool {
        self.current_cycle()
            .is_none_or(|c| Instant::now() >= c.closed_at)
    }
}

/// Creates [`PalgateApiClient`]s sharing one HTTP session.
pub struct PalgateClientFactory {
    http: Client,
    base_url: String,
}

impl PalgateClientFactory {
    pub fn new(http: Client, base_url: &str) -> Self {
        Self {
            http,
            base_url: base_url.to_string(),
        }
    }
}

impl GateClientFactory for PalgateClientFactory {
    fn create(&self, device_id: &str, settings: &GateSettings) -> Arc<dyn GateClient> {
        Arc::new(PalgateApiClient::new(
            device_id,
            settings.clone(),
            self.http.clone(),
            &self.base_url,
        ))
    }
}

// *************** Tests ***************
