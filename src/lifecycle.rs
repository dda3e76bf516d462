//! Device lifecycle controller
//!
//! Owns the policy around a [`DeviceLifecycle`] capability:
//!
//! - start-of-run setup (stream transport, then power on with the configured range)
//!   is attempted once and failures are logged, never fatal
//! - range changes from the console re-issue the power-on request
//! - power-off is retried with a fixed backoff and happens at most once per
//!   process, whichever shutdown path reaches it first
//!
//! A controller without a device (the camera, or any daemon in `--debug`) turns
//! every operation into a no-op.

use crate::config::ControlConfig;
use crate::error::{CaptureError, CaptureResult};
use crate::hardware::capabilities::{DeviceLifecycle, PowerState};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Retry policy for the safety-critical power-off.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Fixed delay between attempts.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::from_millis(500),
        }
    }
}

/// Desired device state for the run.
#[derive(Debug, Clone, PartialEq)]
pub struct LifecyclePlan {
    /// Stream transport to select.
    pub stream_mode: String,
    /// Range applied at power-on.
    pub range_m: f64,
}

/// How the power-off request ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerOffOutcome {
    /// The device acknowledged power-off.
    Confirmed {
        /// Attempts used.
        attempts: u32,
    },
    /// Every attempt failed.
    Failed {
        /// Attempts used.
        attempts: u32,
    },
    /// No device to power off.
    Skipped,
    /// Power-off already ran on another shutdown path.
    AlreadyAttempted,
}

/// Lifecycle policy wrapped around an optional device.
pub struct LifecycleController {
    device: Option<Arc<dyn DeviceLifecycle>>,
    plan: LifecyclePlan,
    retry: RetryPolicy,
    power_off_attempted: AtomicBool,
}

impl std::fmt::Debug for LifecycleController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LifecycleController")
            .field("device", &self.device.as_ref().map(|d| d.name().to_string()))
            .field("plan", &self.plan)
            .field("retry", &self.retry)
            .field("power_off_attempted", &self.power_off_attempted)
            .finish()
    }
}

impl LifecycleController {
    /// Manage `device` according to `plan`.
    pub fn new(device: Arc<dyn DeviceLifecycle>, plan: LifecyclePlan, retry: RetryPolicy) -> Self {
        Self {
            device: Some(device),
            plan,
            retry,
            power_off_attempted: AtomicBool::new(false),
        }
    }

    /// Manage `device` with the plan and retry policy from `[*.control]`.
    pub fn from_config(device: Arc<dyn DeviceLifecycle>, config: &ControlConfig) -> Self {
        Self::new(
            device,
            LifecyclePlan {
                stream_mode: config.stream_mode.clone(),
                range_m: config.range_m,
            },
            RetryPolicy {
                max_attempts: config.power_off_attempts.max(1),
                backoff: Duration::from_millis(config.power_off_backoff_ms),
            },
        )
    }

    /// A controller with nothing to control.
    pub fn disabled() -> Self {
        Self {
            device: None,
            plan: LifecyclePlan {
                stream_mode: String::new(),
                range_m: 0.0,
            },
            retry: RetryPolicy::default(),
            power_off_attempted: AtomicBool::new(false),
        }
    }

    /// Whether a device is attached.
    pub fn has_device(&self) -> bool {
        self.device.is_some()
    }

    /// The device, if any.
    pub fn device(&self) -> Option<&Arc<dyn DeviceLifecycle>> {
        self.device.as_ref()
    }

    /// Whether power-off has run (or is running).
    pub fn power_off_attempted(&self) -> bool {
        self.power_off_attempted.load(Ordering::SeqCst)
    }

    /// Configure the stream transport and power the device on.
    ///
    /// Returns `true` if both requests were acknowledged. Failures are logged and
    /// the run continues; the stream open that follows decides whether the run is
    /// viable.
    pub async fn start(&self) -> bool {
        let Some(device) = &self.device else {
            return true;
        };

        let mut ok = true;
        if let Err(e) = device.configure(&self.plan.stream_mode).await {
            tracing::error!(device = device.name(), error = %e, "Failed to set stream mode");
            ok = false;
        }
        let power = PowerState::On {
            range_m: self.plan.range_m,
        };
        if let Err(e) = device.set_power(power).await {
            tracing::error!(device = device.name(), error = %e, "Failed to enable transceiver");
            ok = false;
        }
        ok
    }

    /// Re-issue power-on with a new range.
    ///
    /// Refused once power-off has started, so a late console command can never
    /// switch a device back on during shutdown.
    pub async fn apply_range(&self, range_m: f64) -> CaptureResult<()> {
        if !(range_m.is_finite() && range_m > 0.0) {
            return Err(CaptureError::InvalidCommand(format!("range {range_m} must be positive")));
        }
        let Some(device) = &self.device else {
            tracing::debug!(range_m, "No controllable device; range change ignored");
            return Ok(());
        };
        if self.power_off_attempted() {
            tracing::warn!(range_m, "Range change after power-off ignored");
            return Ok(());
        }

        device
            .set_power(PowerState::On { range_m })
            .await
            .map_err(|e| CaptureError::ControlPlane {
                url: device.name().to_string(),
                reason: format!("{e:#}"),
            })?;
        tracing::info!(device = device.name(), range_m, "Range updated");
        Ok(())
    }

    /// Power the device off, retrying with a fixed backoff.
    ///
    /// Runs at most once per controller; later calls return
    /// [`PowerOffOutcome::AlreadyAttempted`] immediately. Never blocks longer than
    /// `max_attempts` request timeouts plus the backoffs between them.
    pub async fn safe_power_off(&self) -> PowerOffOutcome {
        let Some(device) = &self.device else {
            return PowerOffOutcome::Skipped;
        };
        if self.power_off_attempted.swap(true, Ordering::SeqCst) {
            return PowerOffOutcome::AlreadyAttempted;
        }

        let max = self.retry.max_attempts.max(1);
        for attempt in 1..=max {
            tracing::info!(device = device.name(), attempt, max_attempts = max, "Disabling transceiver");
            match device.set_power(PowerState::Off).await {
                Ok(()) => return PowerOffOutcome::Confirmed { attempts: attempt },
                Err(e) => {
                    tracing::warn!(
                        device = device.name(),
                        attempt,
                        max_attempts = max,
                        error = %e,
                        "Power-off attempt failed"
                    );
                }
            }
            if attempt < max {
                tokio::time::sleep(self.retry.backoff).await;
            }
        }

        tracing::error!(
            device = device.name(),
            attempts = max,
            critical = true,
            "CRITICAL: failed to disable transceiver"
        );
        PowerOffOutcome::Failed { attempts: max }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::capabilities::LifecycleState;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::sync::atomic::AtomicU32;
    use tracing_test::traced_test;

    #[derive(Default)]
    struct ScriptedDevice {
        failures_before_success: u32,
        off_calls: AtomicU32,
        requests: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl DeviceLifecycle for ScriptedDevice {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn configure(&self, stream_mode: &str) -> anyhow::Result<()> {
            self.requests.lock().push(format!("mode {stream_mode}"));
            Ok(())
        }

        async fn set_power(&self, state: PowerState) -> anyhow::Result<()> {
            self.requests.lock().push(format!("power {state}"));
            if state == PowerState::Off {
                let n = self.off_calls.fetch_add(1, Ordering::SeqCst);
                if n < self.failures_before_success {
                    anyhow::bail!("endpoint unavailable");
                }
            }
            Ok(())
        }

        fn state(&self) -> LifecycleState {
            LifecycleState::default()
        }
    }

    fn plan() -> LifecyclePlan {
        LifecyclePlan {
            stream_mode: "rtsp".into(),
            range_m: 3.0,
        }
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            backoff: Duration::from_millis(10),
        }
    }

    #[tokio::test]
    async fn test_start_configures_then_powers_on() {
        let device = Arc::new(ScriptedDevice::default());
        let controller = LifecycleController::new(device.clone(), plan(), fast_retry());
        assert!(controller.start().await);
        assert_eq!(*device.requests.lock(), vec!["mode rtsp", "power on (3 m)"]);
    }

    #[tokio::test]
    async fn test_power_off_recovers_on_second_attempt() {
        let device = Arc::new(ScriptedDevice {
            failures_before_success: 1,
            ..Default::default()
        });
        let controller = LifecycleController::new(device.clone(), plan(), fast_retry());
        assert_eq!(
            controller.safe_power_off().await,
            PowerOffOutcome::Confirmed { attempts: 2 }
        );
        assert_eq!(device.off_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    #[traced_test]
    async fn test_power_off_runs_once() {
        let device = Arc::new(ScriptedDevice {
            failures_before_success: u32::MAX,
            ..Default::default()
        });
        let controller = LifecycleController::new(device.clone(), plan(), fast_retry());
        assert_eq!(controller.safe_power_off().await, PowerOffOutcome::Failed { attempts: 3 });
        assert_eq!(controller.safe_power_off().await, PowerOffOutcome::AlreadyAttempted);
        assert_eq!(device.off_calls.load(Ordering::SeqCst), 3);
        assert!(logs_contain("CRITICAL: failed to disable transceiver"));
    }

    #[tokio::test]
    async fn test_range_change_refused_after_power_off() {
        let device = Arc::new(ScriptedDevice::default());
        let controller = LifecycleController::new(device.clone(), plan(), fast_retry());
        controller.apply_range(6.0).await.unwrap();
        controller.safe_power_off().await;
        controller.apply_range(9.0).await.unwrap();

        let requests = device.requests.lock().clone();
        assert_eq!(requests, vec!["power on (6 m)", "power off"]);
    }

    #[tokio::test]
    async fn test_disabled_controller_is_inert() {
        let controller = LifecycleController::disabled();
        assert!(!controller.has_device());
        assert!(controller.start().await);
        assert_eq!(controller.safe_power_off().await, PowerOffOutcome::Skipped);
        assert!(controller.apply_range(-1.0).await.is_err());
    }
}
