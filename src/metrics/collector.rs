//! Metrics collection and registry.

use prometheus::{Encoder, IntCounter, IntGauge, Registry, TextEncoder};
use thiserror::Error;

/// Errors that can occur during metrics operations.
#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("prometheus error: {0}")]
    Prometheus(#[from] prometheus::Error),
}

/// Point-in-time view of the loop counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    /// Frames obtained from the camera.
    pub captures: u64,
    /// Capture attempts that produced no frame.
    pub capture_failures: u64,
    /// Frames accepted by the messaging client.
    pub publish_success: u64,
    /// Frames the messaging client refused or failed to send.
    pub publish_failures: u64,
    /// Broker connect attempts, successful or not.
    pub reconnect_attempts: u64,
    /// Whether the broker session is currently up.
    pub connected: bool,
    /// Size of the most recent frame.
    pub last_frame_bytes: u64,
}

/// Prometheus metrics for the capture loop.
///
/// Clones share the same underlying metrics, so one copy can live in the
/// loop while another is served over HTTP.
#[derive(Clone)]
pub struct LoopMetrics {
    registry: Registry,

    captures_total: IntCounter,
    capture_failures_total: IntCounter,
    publish_success_total: IntCounter,
    publish_failures_total: IntCounter,
    reconnect_attempts_total: IntCounter,

    broker_connected: IntGauge,
    last_frame_bytes: IntGauge,
    busy: IntGauge,
}

impl LoopMetrics {
    /// Creates a new registry with all loop metrics registered.
    pub fn new() -> Result<Self, MetricsError> {
        let registry = Registry::new();

        let captures_total = IntCounter::new(
            "meter_cam_captures_total",
            "Frames obtained from the camera",
        )?;
        let capture_failures_total = IntCounter::new(
            "meter_cam_capture_failures_total",
            "Capture attempts that returned no frame",
        )?;
        let publish_success_total = IntCounter::new(
            "meter_cam_publish_success_total",
            "Frames published to the broker",
        )?;
        let publish_failures_total = IntCounter::new(
            "meter_cam_publish_failures_total",
            "Frames dropped because the publish failed",
        )?;
        let reconnect_attempts_total = IntCounter::new(
            "meter_cam_reconnect_attempts_total",
            "Broker connect attempts",
        )?;

        let broker_connected = IntGauge::new(
            "meter_cam_broker_connected",
            "Broker session state (1=connected, 0=disconnected)",
        )?;
        let last_frame_bytes = IntGauge::new(
            "meter_cam_last_frame_bytes",
            "Size of the most recent frame in bytes",
        )?;
        let busy = IntGauge::new(
            "meter_cam_busy",
            "Busy indicator level (1 during capture and publish)",
        )?;

        registry.register(Box::new(captures_total.clone()))?;
        registry.register(Box::new(capture_failures_total.clone()))?;
        registry.register(Box::new(publish_success_total.clone()))?;
        registry.register(Box::new(publish_failures_total.clone()))?;
        registry.register(Box::new(reconnect_attempts_total.clone()))?;
        registry.register(Box::new(broker_connected.clone()))?;
        registry.register(Box::new(last_frame_bytes.clone()))?;
        registry.register(Box::new(busy.clone()))?;

        Ok(Self {
            registry,
            captures_total,
            capture_failures_total,
            publish_success_total,
            publish_failures_total,
            reconnect_attempts_total,
            broker_connected,
            last_frame_bytes,
            busy,
        })
    }

    pub fn record_capture(&self, bytes: usize) {
        self.captures_total.inc();
        self.last_frame_bytes.set(bytes as i64);
    }

    pub fn record_capture_failure(&self) {
        self.capture_failures_total.inc();
    }

    pub fn record_publish(&self, success: bool) {
        if success {
            self.publish_success_total.inc();
        } else {
            self.publish_failures_total.inc();
        }
    }

    pub fn record_reconnect_attempt(&self) {
        self.reconnect_attempts_total.inc();
    }

    pub fn set_connected(&self, connected: bool) {
        self.broker_connected.set(i64::from(connected));
    }

    pub fn set_busy(&self, busy: bool) {
        self.busy.set(i64::from(busy));
    }

    /// Reads the current values back.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            captures: self.captures_total.get(),
            capture_failures: self.capture_failures_total.get(),
            publish_success: self.publish_success_total.get(),
            publish_failures: self.publish_failures_total.get(),
            reconnect_attempts: self.reconnect_attempts_total.get(),
            connected: self.broker_connected.get() == 1,
            last_frame_bytes: self.last_frame_bytes.get().max(0) as u64,
        }
    }

    /// Returns the underlying Prometheus registry.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Encodes all metrics in Prometheus text format.
    pub fn encode(&self) -> Result<String, MetricsError> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}
