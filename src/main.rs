//! Meter Camera CLI
//!
//! Captures a frame on a fixed interval and publishes the raw JPEG bytes
//! to an MQTT broker. Exits with status 75 when the camera cannot be
//! brought up, so a supervisor can restart the process, and with 78 when
//! the configuration or chosen backend can never work.

use clap::{Parser, ValueEnum};
use meter_cam::{
    capture::{CameraDriver, DirectoryCamera, MockCamera},
    clock::SystemClock,
    config::{ClientIdSource, FileConfig},
    indicator::{LogIndicator, StatusIndicator, SysfsIndicator},
    metrics::LoopMetrics,
    mqtt::{MqttClient, MqttOptions},
    network::HostNetwork,
    runtime::{CaptureLoop, ClientIdGenerator, LoopSettings, Peripherals, EXIT_RESTART},
};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Exit status for an unusable configuration file or camera backend.
const EXIT_CONFIG: u8 = 78;

/// Exit status after a forced second Ctrl-C.
const EXIT_INTERRUPTED: i32 = 130;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum CameraBackend {
    /// Synthetic JPEG frames
    Mock,
    /// Replay .jpg files from --image-dir
    Directory,
    /// Webcam via nokhwa (requires the `camera` feature)
    Device,
}

#[derive(Parser, Debug)]
#[command(name = "meter-cam", version, about = "Capture meter images and publish them over MQTT")]
struct Cli {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Frame source
    #[arg(long, value_enum, default_value_t = CameraBackend::Mock)]
    camera: CameraBackend,

    /// Directory of images for the `directory` backend
    #[arg(long, required_if_eq("camera", "directory"))]
    image_dir: Option<PathBuf>,

    /// Device index for the `device` backend
    #[arg(long, default_value_t = 0)]
    device_index: u32,

    /// sysfs LED brightness or GPIO value file for the busy indicator
    #[arg(long)]
    led: Option<PathBuf>,

    /// Write 0 for busy and 1 for idle
    #[arg(long, requires = "led")]
    led_active_low: bool,

    /// Override the capture interval in milliseconds
    #[arg(long)]
    interval_ms: Option<u64>,
}

fn main() -> ExitCode {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();
    info!("Meter Camera v{}", meter_cam::VERSION);

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            error!("{}", e);
            return ExitCode::from(EXIT_CONFIG);
        }
    };

    let camera = match camera_backend(&cli) {
        Ok(camera) => camera,
        Err(status) => return ExitCode::from(status),
    };

    let indicator: Box<dyn StatusIndicator> = match &cli.led {
        Some(path) => {
            let led = SysfsIndicator::new(path);
            Box::new(if cli.led_active_low { led.active_low() } else { led })
        }
        None => Box::new(LogIndicator),
    };

    let clock = SystemClock::new();
    let peripherals = Peripherals {
        camera,
        network: HostNetwork::new(format!("{}:{}", config.broker.host, config.broker.port)),
        client: MqttClient::new(MqttOptions::from_config(&config.broker)),
        indicator,
    };

    let mut capture_loop = CaptureLoop::new(
        peripherals,
        LoopSettings::from_config(&config),
        client_ids(&config),
        clock,
    );

    let metrics = match LoopMetrics::new() {
        Ok(metrics) => Some(metrics),
        Err(e) => {
            warn!(error = %e, "Metrics disabled");
            None
        }
    };
    if let Some(metrics) = &metrics {
        start_metrics_server(config.metrics.port, metrics);
        capture_loop = capture_loop.with_metrics(metrics.clone());
    }

    let shutdown = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&shutdown);
    if let Err(e) = ctrlc::set_handler(move || {
        if flag.swap(true, Ordering::SeqCst) {
            std::process::exit(EXIT_INTERRUPTED);
        }
        eprintln!("\nStopping after the current iteration (Ctrl-C again to force)");
    }) {
        warn!(error = %e, "Failed to install Ctrl-C handler");
    }

    if let Err(e) = capture_loop.startup() {
        error!(error = %e, "Startup failed, requesting restart");
        return ExitCode::from(EXIT_RESTART);
    }

    let result = capture_loop.run(&shutdown);

    if let Some(metrics) = &metrics {
        let snapshot = metrics.snapshot();
        info!(
            captures = snapshot.captures,
            capture_failures = snapshot.capture_failures,
            published = snapshot.publish_success,
            publish_failures = snapshot.publish_failures,
            reconnect_attempts = snapshot.reconnect_attempts,
            "Session summary"
        );
    }

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "Capture loop stopped, requesting restart");
            ExitCode::from(EXIT_RESTART)
        }
    }
}

fn load_config(cli: &Cli) -> Result<FileConfig, String> {
    let mut config = match &cli.config {
        Some(path) => {
            let config = FileConfig::from_file(path)
                .map_err(|e| format!("{}: {}", path.display(), e))?;
            info!(path = %path.display(), "Loaded configuration");
            config
        }
        None => FileConfig::default(),
    };

    if let Some(interval_ms) = cli.interval_ms {
        config.schedule.capture_interval_ms = interval_ms;
        config
            .validate()
            .map_err(|e| format!("--interval-ms: {}", e))?;
    }

    Ok(config)
}

/// Backend selection errors are permanent, so they map to `EXIT_CONFIG`
/// rather than a restart request.
fn camera_backend(cli: &Cli) -> Result<Box<dyn CameraDriver>, u8> {
    select_camera(cli).map_err(|e| {
        error!("Camera backend unavailable: {}", e);
        EXIT_CONFIG
    })
}

fn select_camera(cli: &Cli) -> Result<Box<dyn CameraDriver>, String> {
    match cli.camera {
        CameraBackend::Mock => {
            info!("Using mock camera input");
            Ok(Box::new(MockCamera::new()))
        }
        CameraBackend::Directory => {
            let dir = cli
                .image_dir
                .clone()
                .ok_or_else(|| "--image-dir is required for the directory backend".to_string())?;
            Ok(Box::new(DirectoryCamera::new(dir)))
        }
        CameraBackend::Device => open_device(cli.device_index),
    }
}

#[cfg(feature = "camera")]
fn open_device(index: u32) -> Result<Box<dyn CameraDriver>, String> {
    Ok(Box::new(meter_cam::capture::NokhwaCamera::new(index)))
}

#[cfg(not(feature = "camera"))]
fn open_device(_index: u32) -> Result<Box<dyn CameraDriver>, String> {
    Err("built without the `camera` feature".to_string())
}

fn client_ids(config: &FileConfig) -> ClientIdGenerator {
    let prefix = config.broker.client_id_prefix.clone();
    match config.broker.client_id_source {
        ClientIdSource::Random => ClientIdGenerator::random(prefix),
        ClientIdSource::Hardware => {
            let device_id = config
                .device
                .hardware_id
                .clone()
                .or_else(|| std::fs::read_to_string("/etc/machine-id").ok())
                .filter(|id| !id.trim().is_empty());
            match device_id {
                Some(id) => ClientIdGenerator::hardware(prefix, &id),
                None => {
                    warn!("No hardware id available, falling back to random client ids");
                    ClientIdGenerator::random(prefix)
                }
            }
        }
    }
}

#[cfg(feature = "metrics")]
fn start_metrics_server(port: u16, metrics: &LoopMetrics) {
    use meter_cam::metrics::{MetricsServer, MetricsServerConfig};

    if port == 0 {
        return;
    }
    let server = MetricsServer::new(MetricsServerConfig::with_port(port), metrics.clone());
    if let Err(e) = server.spawn() {
        warn!(error = %e, "Failed to start metrics server");
    }
}

#[cfg(not(feature = "metrics"))]
fn start_metrics_server(port: u16, _metrics: &LoopMetrics) {
    if port != 0 {
        warn!(port, "metrics.port is set but the `metrics` feature is not enabled");
    }
}
