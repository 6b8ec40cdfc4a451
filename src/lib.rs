//! Meter Camera Library
//!
//! Periodically captures a JPEG frame from a camera and publishes the raw
//! bytes to an MQTT topic, where a downstream service reads the meter.
//!
//! # Architecture
//!
//! One single-threaded loop drives four collaborators, each behind a
//! capability trait so fakes can replace the hardware:
//!
//! ```text
//!              ┌──────────── runtime::CaptureLoop ────────────┐
//!              │  startup → tick → tick → ... (clock-driven)  │
//!              └──┬──────────┬──────────────┬──────────────┬──┘
//!        CameraDriver   NetworkLink   MessagingClient   StatusIndicator
//!         (capture)      (network)        (mqtt)          (indicator)
//! ```
//!
//! # Design Principles
//!
//! - **One frame in flight**: a frame is released before the next capture
//! - **Raw payload**: image bytes go on the wire untouched, no envelope
//! - **Retry, don't crash**: connection phases retry under a [`RetryPolicy`];
//!   only camera init failure is fatal
//! - **Injected time**: every wait goes through a [`Clock`]
//!
//! # Example
//!
//! ```no_run
//! use meter_cam::{
//!     capture::MockCamera,
//!     clock::SystemClock,
//!     indicator::LogIndicator,
//!     mqtt::MockMessagingClient,
//!     network::MockNetwork,
//!     runtime::{CaptureLoop, ClientIdGenerator, LoopSettings, Peripherals},
//! };
//!
//! let peripherals = Peripherals {
//!     camera: MockCamera::new(),
//!     network: MockNetwork::new(),
//!     client: MockMessagingClient::new(),
//!     indicator: LogIndicator,
//! };
//! let mut capture_loop = CaptureLoop::new(
//!     peripherals,
//!     LoopSettings::default(),
//!     ClientIdGenerator::random("ESP32CAM-Electric-"),
//!     SystemClock::new(),
//! );
//!
//! capture_loop.startup().unwrap();
//! loop {
//!     if let Some(outcome) = capture_loop.tick().unwrap() {
//!         println!("{:?}", outcome);
//!     }
//! }
//! ```

#![warn(rust_2018_idioms)]
#![deny(unsafe_code)]

pub mod capture;
pub mod clock;
pub mod config;
pub mod indicator;
pub mod metrics;
pub mod mqtt;
pub mod network;
pub mod retry;
pub mod runtime;

// Re-export commonly used types at crate root
pub use capture::{CameraDriver, CaptureConfig, Frame, MockCamera};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ConfigError, FileConfig};
pub use indicator::StatusIndicator;
pub use mqtt::{MessagingClient, MqttClient};
pub use network::NetworkLink;
pub use retry::RetryPolicy;
pub use runtime::{CaptureLoop, CycleOutcome, LoopSettings, Peripherals};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
