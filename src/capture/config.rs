//! Camera capture configuration.
//!
//! Set once at startup and never changed. Defaults match the AI-Thinker
//! ESP32-CAM module with settings tuned for reading a meter display:
//! SVGA frames at high JPEG quality from a single frame buffer.

use crate::config::ConfigError;
use serde::{Deserialize, Serialize};

/// Sensor pin assignments. `-1` marks a line that is not wired.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraPins {
    pub pwdn: i32,
    pub reset: i32,
    pub xclk: i32,
    /// SCCB data (I2C SDA).
    pub siod: i32,
    /// SCCB clock (I2C SCL).
    pub sioc: i32,
    /// Parallel data lines D0..D7 (Y2..Y9 on the module silkscreen).
    pub data: [i32; 8],
    pub vsync: i32,
    pub href: i32,
    pub pclk: i32,
}

impl CameraPins {
    /// Pin map of the AI-Thinker ESP32-CAM board.
    pub fn ai_thinker() -> Self {
        Self {
            pwdn: 32,
            reset: -1,
            xclk: 0,
            siod: 26,
            sioc: 27,
            data: [5, 18, 19, 21, 36, 39, 34, 35],
            vsync: 25,
            href: 23,
            pclk: 22,
        }
    }

    fn required(&self) -> impl Iterator<Item = i32> + '_ {
        [self.xclk, self.siod, self.sioc, self.vsync, self.href, self.pclk]
            .into_iter()
            .chain(self.data.iter().copied())
    }
}

impl Default for CameraPins {
    fn default() -> Self {
        Self::ai_thinker()
    }
}

/// Pixel encoding produced by the sensor pipeline.
///
/// Only compressed JPEG output is supported; the payload goes on the wire
/// exactly as the driver hands it over.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelFormat {
    #[default]
    Jpeg,
}

/// Standard sensor frame sizes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrameSize {
    Qvga,
    Cif,
    Vga,
    #[default]
    Svga,
    Xga,
    Sxga,
    Uxga,
}

impl FrameSize {
    /// Width and height in pixels.
    pub fn dimensions(self) -> (u32, u32) {
        match self {
            Self::Qvga => (320, 240),
            Self::Cif => (400, 296),
            Self::Vga => (640, 480),
            Self::Svga => (800, 600),
            Self::Xga => (1024, 768),
            Self::Sxga => (1280, 1024),
            Self::Uxga => (1600, 1200),
        }
    }
}

/// Configuration for camera capture.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub pins: CameraPins,
    /// LEDC channel driving XCLK.
    pub ledc_channel: u8,
    /// LEDC timer driving XCLK.
    pub ledc_timer: u8,
    /// Sensor master clock in Hz.
    pub xclk_freq_hz: u32,
    pub pixel_format: PixelFormat,
    pub frame_size: FrameSize,
    /// JPEG quality, 0-63. Lower means better quality and larger frames.
    pub jpeg_quality: u8,
    /// Number of frame buffers the driver may hand out at once.
    pub fb_count: u8,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            pins: CameraPins::default(),
            ledc_channel: 0,
            ledc_timer: 0,
            xclk_freq_hz: 20_000_000,
            pixel_format: PixelFormat::Jpeg,
            frame_size: FrameSize::Svga,
            jpeg_quality: 10,
            fb_count: 1,
        }
    }
}

impl CaptureConfig {
    /// Highest JPEG quality value the sensor accepts.
    pub const MAX_JPEG_QUALITY: u8 = 63;

    /// Creates a configuration with the given frame size.
    pub fn with_frame_size(frame_size: FrameSize) -> Self {
        Self {
            frame_size,
            ..Default::default()
        }
    }

    /// Frame width and height in pixels.
    pub fn dimensions(&self) -> (u32, u32) {
        self.frame_size.dimensions()
    }

    /// Validates the configuration parameters.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.jpeg_quality > Self::MAX_JPEG_QUALITY {
            return Err(ConfigError::InvalidJpegQuality(self.jpeg_quality));
        }
        if self.fb_count == 0 {
            return Err(ConfigError::InvalidFrameBufferCount);
        }
        if self.xclk_freq_hz == 0 || self.xclk_freq_hz > 40_000_000 {
            return Err(ConfigError::InvalidClockFrequency(self.xclk_freq_hz));
        }
        if let Some(pin) = self.pins.required().find(|p| *p < 0) {
            return Err(ConfigError::InvalidPin(pin));
        }
        Ok(())
    }
}
