//! Prometheus metrics for the capture loop.
//!
//! The loop records into [`LoopMetrics`] when one is attached; with the
//! `metrics` feature the same registry is served over HTTP.
//!
//! # Metrics Exposed
//!
//! ## Counters
//! - `meter_cam_captures_total` - Frames obtained from the camera
//! - `meter_cam_capture_failures_total` - Capture attempts that returned no frame
//! - `meter_cam_publish_success_total` - Frames published to the broker
//! - `meter_cam_publish_failures_total` - Frames dropped after a failed publish
//! - `meter_cam_reconnect_attempts_total` - Broker connect attempts
//!
//! ## Gauges
//! - `meter_cam_broker_connected` - Broker session state (1=connected, 0=disconnected)
//! - `meter_cam_last_frame_bytes` - Size of the most recent frame
//! - `meter_cam_busy` - Busy indicator level
//!
//! # Endpoints
//!
//! - `/metrics` - Prometheus text format
//! - `/health` - 200 while the broker session is up, 503 otherwise
//!
//! # Example
//!
//! ```no_run
//! use meter_cam::metrics::LoopMetrics;
//!
//! let metrics = LoopMetrics::new().expect("Failed to create registry");
//! metrics.record_capture(31_744);
//! metrics.record_publish(true);
//!
//! println!("{}", metrics.encode().unwrap());
//! ```

mod collector;
#[cfg(feature = "metrics")]
mod server;

pub use collector::{LoopMetrics, MetricsError, MetricsSnapshot};
#[cfg(feature = "metrics")]
pub use server::{MetricsServer, MetricsServerConfig, ServerError};
