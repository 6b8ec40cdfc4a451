//! The capture-and-publish loop.
//!
//! [`CaptureLoop`] owns every collaborator and all mutable loop state. It
//! runs a one-time [`startup`](CaptureLoop::startup) and then repeats
//! [`tick`](CaptureLoop::tick) with a short cooperative sleep in between:
//!
//! 1. reconnect to the broker if the session is down (blocking),
//! 2. service the messaging client,
//! 3. if the capture interval has elapsed, run one capture-and-send cycle.
//!
//! Nothing here spawns threads. Blocking waits go through the injected
//! [`Clock`], so a simulated clock drives the whole loop in tests.

mod client_id;
mod state;
#[cfg(test)]
mod tests;

pub use client_id::ClientIdGenerator;
pub use state::{LoopState, Phase};

use crate::capture::{CameraDriver, CameraError, CaptureConfig};
use crate::clock::Clock;
use crate::config::FileConfig;
use crate::indicator::StatusIndicator;
use crate::metrics::LoopMetrics;
use crate::mqtt::{BrokerCredentials, ClientState, MessagingClient, MqttError};
use crate::network::{associate, NetworkError, NetworkLink, WifiCredentials};
use crate::retry::{retry, RetryPolicy};
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info, warn};

/// Process exit status requesting a restart from the supervisor.
pub const EXIT_RESTART: u8 = 75;

/// Errors that end startup.
#[derive(Debug, Error)]
pub enum StartupError {
    /// The camera could not be brought up. Only a restart recovers.
    #[error("camera init failed: {0}")]
    Camera(#[from] CameraError),
    /// Association gave up under a bounded policy.
    #[error("network unavailable: {0}")]
    NetworkUnavailable(#[from] NetworkError),
}

/// Errors that end the steady-state loop.
#[derive(Debug, Error)]
pub enum LoopError {
    /// Reconnect gave up under a bounded policy.
    #[error("broker unreachable after {attempts} attempts (last state: {state})")]
    ReconnectExhausted {
        attempts: u32,
        state: ClientState,
        #[source]
        source: MqttError,
    },
}

/// Result of one capture-and-send cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// The frame was handed to the messaging client.
    Published { bytes: usize },
    /// The frame was captured but the publish failed; it is dropped.
    PublishFailed { bytes: usize, reason: String },
    /// The camera returned no frame.
    NoFrame,
}

/// The hardware the loop drives.
#[derive(Debug)]
pub struct Peripherals<C, N, M, I> {
    pub camera: C,
    pub network: N,
    pub client: M,
    pub indicator: I,
}

/// Fixed parameters of the loop, resolved from configuration at startup.
#[derive(Debug, Clone)]
pub struct LoopSettings {
    /// Name printed in the startup banner.
    pub device_name: String,
    pub capture: CaptureConfig,
    pub wifi: WifiCredentials,
    pub association: RetryPolicy,
    /// `host:port` of the broker, for diagnostics.
    pub broker_endpoint: String,
    pub topic: String,
    pub credentials: BrokerCredentials,
    pub capture_interval: Duration,
    pub loop_delay: Duration,
    pub reconnect: RetryPolicy,
}

impl LoopSettings {
    pub fn from_config(config: &FileConfig) -> Self {
        Self {
            device_name: config.device.name.clone(),
            capture: config.capture.clone(),
            wifi: WifiCredentials {
                ssid: config.network.ssid.clone(),
                password: config.network.password.clone(),
            },
            association: config.network.association_policy(),
            broker_endpoint: format!("{}:{}", config.broker.host, config.broker.port),
            topic: config.broker.topic.clone(),
            credentials: BrokerCredentials {
                username: config.broker.username.clone(),
                password: config.broker.password.clone(),
            },
            capture_interval: Duration::from_millis(config.schedule.capture_interval_ms),
            loop_delay: Duration::from_millis(config.schedule.loop_delay_ms),
            reconnect: config.schedule.reconnect.clone(),
        }
    }
}

impl Default for LoopSettings {
    fn default() -> Self {
        Self::from_config(&FileConfig::default())
    }
}

/// Single-threaded capture-and-publish driver.
pub struct CaptureLoop<C, N, M, I, K> {
    peripherals: Peripherals<C, N, M, I>,
    clock: K,
    settings: LoopSettings,
    client_ids: ClientIdGenerator,
    state: LoopState,
    metrics: Option<LoopMetrics>,
}

impl<C, N, M, I, K> CaptureLoop<C, N, M, I, K>
where
    C: CameraDriver,
    N: NetworkLink,
    M: MessagingClient,
    I: StatusIndicator,
    K: Clock,
{
    pub fn new(
        peripherals: Peripherals<C, N, M, I>,
        settings: LoopSettings,
        client_ids: ClientIdGenerator,
        clock: K,
    ) -> Self {
        Self {
            peripherals,
            clock,
            settings,
            client_ids,
            state: LoopState::default(),
            metrics: None,
        }
    }

    /// Records loop activity into `metrics`.
    pub fn with_metrics(mut self, metrics: LoopMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn state(&self) -> &LoopState {
        &self.state
    }

    pub fn settings(&self) -> &LoopSettings {
        &self.settings
    }

    pub fn peripherals(&self) -> &Peripherals<C, N, M, I> {
        &self.peripherals
    }

    pub fn peripherals_mut(&mut self) -> &mut Peripherals<C, N, M, I> {
        &mut self.peripherals
    }

    /// Brings up the camera and the network link.
    ///
    /// Returns the station address when the link reports one. Camera
    /// failure is fatal; association blocks until the link is up unless the
    /// association policy is bounded.
    pub fn startup(&mut self) -> Result<Option<IpAddr>, StartupError> {
        info!("=================================");
        info!("ESP32-CAM Meter Reader: {}", self.settings.device_name);
        info!("=================================");

        self.set_busy(false);

        let capture = &self.settings.capture;
        self.peripherals.camera.init(capture)?;
        info!(
            frame_size = ?capture.frame_size,
            jpeg_quality = capture.jpeg_quality,
            fb_count = capture.fb_count,
            "Camera initialized"
        );

        let address = associate(
            &mut self.peripherals.network,
            &self.settings.wifi,
            &self.settings.association,
            &self.clock,
        )?;

        info!(
            broker = %self.settings.broker_endpoint,
            topic = %self.settings.topic,
            "MQTT client configured"
        );
        Ok(address)
    }

    /// One iteration of the steady-state loop, without the trailing sleep.
    ///
    /// Returns the cycle outcome when a capture was due.
    pub fn tick(&mut self) -> Result<Option<CycleOutcome>, LoopError> {
        if !self.peripherals.client.is_connected() {
            self.reconnect()?;
        }

        if let Err(e) = self.peripherals.client.service() {
            warn!(
                rc = self.peripherals.client.state().code(),
                error = %e,
                "MQTT service failed"
            );
        }
        if let Some(metrics) = &self.metrics {
            metrics.set_connected(self.peripherals.client.is_connected());
        }

        let now = self.clock.now_ms();
        let interval = self.settings.capture_interval.as_millis() as u64;
        if !self.state.capture_due(now, interval) {
            return Ok(None);
        }
        self.state.last_capture_ms = now;

        self.capture_and_send().map(Some)
    }

    /// Blocks until the messaging client holds a session.
    ///
    /// Every attempt uses a fresh client identifier. Under the default
    /// policy this retries forever with a fixed delay.
    pub fn reconnect(&mut self) -> Result<(), LoopError> {
        if self.peripherals.client.is_connected() {
            return Ok(());
        }

        let Self {
            peripherals,
            clock,
            settings,
            client_ids,
            state,
            metrics,
        } = self;
        let client = &mut peripherals.client;
        let resume = std::mem::replace(&mut state.phase, Phase::Reconnecting);

        let result = retry(
            &settings.reconnect,
            &*clock,
            |attempt| {
                let client_id = client_ids.next_id();
                info!(attempt, client_id = %client_id, "Connecting to MQTT...");
                if let Some(metrics) = metrics.as_ref() {
                    metrics.record_reconnect_attempt();
                }
                match client.connect(&client_id, &settings.credentials) {
                    Ok(()) => Ok(()),
                    Err(e) => Err((client.state(), e)),
                }
            },
            |attempt, failure: &(ClientState, MqttError), delay: Duration| {
                let (client_state, e) = failure;
                warn!(
                    attempt,
                    error = %e,
                    "MQTT connect failed, rc={} retrying in {} seconds",
                    client_state.code(),
                    delay.as_secs_f32()
                );
            },
        );

        state.phase = resume;
        if let Some(metrics) = metrics.as_ref() {
            metrics.set_connected(client.is_connected());
        }

        match result {
            Ok(()) => {
                info!("MQTT connected");
                Ok(())
            }
            Err(exhausted) => {
                let (client_state, source) = exhausted.last_error;
                error!(
                    attempts = exhausted.attempts,
                    rc = client_state.code(),
                    "Giving up on MQTT broker"
                );
                Err(LoopError::ReconnectExhausted {
                    attempts: exhausted.attempts,
                    state: client_state,
                    source,
                })
            }
        }
    }

    /// Captures one frame and publishes it.
    ///
    /// The busy indicator is on for the whole cycle. A captured frame is
    /// always returned to the driver, whatever happens to the publish.
    pub fn capture_and_send(&mut self) -> Result<CycleOutcome, LoopError> {
        info!("Capturing image...");
        self.state.phase = Phase::Capturing;
        self.state.cycles += 1;
        self.set_busy(true);

        let frame = match self.peripherals.camera.acquire_frame() {
            Some(frame) => frame,
            None => {
                warn!("Camera capture failed");
                if let Some(metrics) = &self.metrics {
                    metrics.record_capture_failure();
                }
                self.finish_cycle();
                return Ok(CycleOutcome::NoFrame);
            }
        };

        let bytes = frame.len();
        info!(bytes, sequence = frame.sequence(), "Image captured: {} bytes", bytes);
        if let Some(metrics) = &self.metrics {
            metrics.record_capture(bytes);
        }

        if let Err(e) = self.reconnect() {
            self.peripherals.camera.release_frame(frame);
            self.finish_cycle();
            return Err(e);
        }

        self.state.phase = Phase::Publishing;
        let published = self
            .peripherals
            .client
            .publish(&self.settings.topic, frame.as_bytes());
        self.peripherals.camera.release_frame(frame);

        let outcome = match published {
            Ok(()) => {
                info!(topic = %self.settings.topic, bytes, "Image sent successfully to MQTT");
                CycleOutcome::Published { bytes }
            }
            Err(e) => {
                warn!(
                    rc = self.peripherals.client.state().code(),
                    error = %e,
                    "Failed to send image"
                );
                CycleOutcome::PublishFailed {
                    bytes,
                    reason: e.to_string(),
                }
            }
        };
        if let Some(metrics) = &self.metrics {
            metrics.record_publish(matches!(outcome, CycleOutcome::Published { .. }));
        }

        self.finish_cycle();
        Ok(outcome)
    }

    /// Runs [`tick`](Self::tick) followed by the loop delay until `shutdown`
    /// is set, then closes the broker session.
    pub fn run(&mut self, shutdown: &AtomicBool) -> Result<(), LoopError> {
        info!(
            interval_ms = self.settings.capture_interval.as_millis() as u64,
            "Entering capture loop"
        );

        while !shutdown.load(Ordering::SeqCst) {
            self.tick()?;
            self.clock.sleep(self.settings.loop_delay);
        }

        info!(cycles = self.state.cycles, "Shutting down");
        self.peripherals.client.disconnect();
        if let Some(metrics) = &self.metrics {
            metrics.set_connected(false);
        }
        Ok(())
    }

    fn finish_cycle(&mut self) {
        self.set_busy(false);
        self.state.phase = Phase::Idle;
    }

    fn set_busy(&mut self, busy: bool) {
        if let Err(e) = self.peripherals.indicator.set_busy(busy) {
            warn!(busy, error = %e, "Failed to drive status indicator");
        }
        if let Some(metrics) = &self.metrics {
            metrics.set_busy(busy);
        }
    }
}
