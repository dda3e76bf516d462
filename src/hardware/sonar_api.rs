//! Imaging sonar control plane
//!
//! The sonar exposes a small REST API next to its video stream. Three calls are
//! used, all `PUT` with a JSON body:
//!
//! | Call | Path | Body |
//! |------|------|------|
//! | select stream transport | `{base}/datastream` | `{"stream_type": "rtsp"}` |
//! | power on with range | `{base}/transceiver` | `{"power_state": "on", "range": 3.0}` |
//! | power off | `{base}/transceiver/power` | `{"power_state": "off"}` |
//!
//! Each request is bounded by a connect timeout and a total timeout, and any
//! non-2xx status is treated as a failure. Retrying is left to
//! [`LifecycleController`](crate::lifecycle::LifecycleController).

use crate::config::ControlConfig;
use crate::hardware::capabilities::{DeviceLifecycle, LifecycleState, PowerState};
use anyhow::{Context, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use std::time::Duration;

#[derive(Debug, Serialize)]
struct DatastreamRequest<'a> {
    stream_type: &'a str,
}

#[derive(Debug, Serialize)]
struct TransceiverOn {
    power_state: &'static str,
    range: f64,
}

#[derive(Debug, Serialize)]
struct TransceiverOff {
    power_state: &'static str,
}

/// REST client for the sonar's control API.
#[derive(Debug)]
pub struct SonarController {
    client: reqwest::Client,
    base_url: String,
    state: Mutex<LifecycleState>,
}

impl SonarController {
    /// Build a client for `base_url` with explicit connect and total timeouts.
    pub fn new(base_url: impl Into<String>, connect_timeout: Duration, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .timeout(timeout)
            .build()
            .context("Failed to build control-plane HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            state: Mutex::new(LifecycleState::default()),
        })
    }

    /// Build a client from the `[sonar.control]` section.
    pub fn from_config(config: &ControlConfig) -> Result<Self> {
        Self::new(
            config.base_url.clone(),
            Duration::from_millis(config.connect_timeout_ms),
            Duration::from_millis(config.request_timeout_ms),
        )
    }

    /// Base URL requests are issued against.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn put<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<()> {
        let url = format!("{}/{}", self.base_url, path);
        let response = self
            .client
            .put(&url)
            .json(body)
            .send()
            .await
            .with_context(|| format!("PUT {url}"))?;

        let status = response.status();
        response
            .error_for_status()
            .with_context(|| format!("PUT {url} returned {status}"))?;

        tracing::debug!(url = %url, status = status.as_u16(), "Control request acknowledged");
        Ok(())
    }
}

#[async_trait]
impl DeviceLifecycle for SonarController {
    fn name(&self) -> &str {
        "sonar"
    }

    async fn configure(&self, stream_mode: &str) -> Result<()> {
        self.put("datastream", &DatastreamRequest { stream_type: stream_mode })
            .await?;
        self.state.lock().stream_mode = Some(stream_mode.to_string());
        tracing::info!(stream_mode, "Sonar stream transport configured");
        Ok(())
    }

    async fn set_power(&self, state: PowerState) -> Result<()> {
        match state {
            PowerState::On { range_m } => {
                self.put(
                    "transceiver",
                    &TransceiverOn {
                        power_state: "on",
                        range: range_m,
                    },
                )
                .await?;
            }
            PowerState::Off => {
                self.put("transceiver/power", &TransceiverOff { power_state: "off" })
                    .await?;
            }
        }
        self.state.lock().power = Some(state);
        tracing::info!(power = %state, "Sonar transceiver power set");
        Ok(())
    }

    fn state(&self) -> LifecycleState {
        self.state.lock().clone()
    }
}
