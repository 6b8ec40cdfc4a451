//! Camera driver abstraction.
//!
//! A driver hands out frames from a fixed pool of buffer slots and gets
//! them back through [`CameraDriver::release_frame`]. Real sensors and the
//! test double both sit behind the same trait.

use super::frame::synthetic_jpeg;
use super::{CaptureConfig, Frame};
use std::collections::VecDeque;
use thiserror::Error;

/// Errors that can occur during camera operations.
#[derive(Debug, Error)]
pub enum CameraError {
    #[error("camera device not found: {0}")]
    DeviceNotFound(String),
    #[error("failed to open camera: {0}")]
    OpenFailed(String),
    #[error("failed to configure camera: {0}")]
    ConfigFailed(String),
    #[error("no images found in {0}")]
    NoImages(String),
}

/// Capability interface over a camera peripheral.
pub trait CameraDriver {
    /// Configures and starts the sensor. Failure is not recoverable.
    fn init(&mut self, config: &CaptureConfig) -> Result<(), CameraError>;

    /// Requests one frame. `None` means the sensor produced nothing this
    /// time or every buffer slot is still held.
    fn acquire_frame(&mut self) -> Option<Frame>;

    /// Returns a frame's buffer slot to the driver.
    fn release_frame(&mut self, frame: Frame);
}

impl<T: CameraDriver + ?Sized> CameraDriver for Box<T> {
    fn init(&mut self, config: &CaptureConfig) -> Result<(), CameraError> {
        (**self).init(config)
    }

    fn acquire_frame(&mut self) -> Option<Frame> {
        (**self).acquire_frame()
    }

    fn release_frame(&mut self, frame: Frame) {
        (**self).release_frame(frame)
    }
}

/// Bookkeeping for the driver's frame buffer slots.
///
/// With `fb_count = 1` at most one frame may be outstanding; a new
/// capture is refused until the previous one is released.
#[derive(Debug, Clone, Default)]
pub struct FrameSlots {
    capacity: usize,
    outstanding: usize,
}

impl FrameSlots {
    pub fn new(capacity: u8) -> Self {
        Self {
            capacity: capacity as usize,
            outstanding: 0,
        }
    }

    /// Claims a slot, returning false if all are in use.
    pub fn try_claim(&mut self) -> bool {
        if self.outstanding >= self.capacity {
            return false;
        }
        self.outstanding += 1;
        true
    }

    /// Returns a slot. Returns false if nothing was outstanding.
    pub fn release(&mut self) -> bool {
        if self.outstanding == 0 {
            return false;
        }
        self.outstanding -= 1;
        true
    }

    #[inline]
    pub fn outstanding(&self) -> usize {
        self.outstanding
    }
}

/// Mock camera for testing that generates synthetic JPEG frames.
///
/// Failures can be scripted per capture, and every acquire and release
/// is counted so tests can check that no frame leaks.
#[derive(Debug)]
pub struct MockCamera {
    config: Option<CaptureConfig>,
    slots: FrameSlots,
    sequence: u64,
    frame_len: usize,
    init_error: Option<String>,
    /// Upcoming capture results; `false` makes the capture fail.
    script: VecDeque<bool>,
    acquired: u64,
    released: u64,
}

impl Default for MockCamera {
    fn default() -> Self {
        Self {
            config: None,
            slots: FrameSlots::default(),
            sequence: 0,
            frame_len: 2048,
            init_error: None,
            script: VecDeque::new(),
            acquired: 0,
            released: 0,
        }
    }
}

impl MockCamera {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the size of every synthetic frame.
    pub fn with_frame_len(mut self, frame_len: usize) -> Self {
        self.frame_len = frame_len;
        self
    }

    /// A camera whose `init` fails with the given reason.
    pub fn failing_init(reason: &str) -> Self {
        Self {
            init_error: Some(reason.to_string()),
            ..Self::default()
        }
    }

    /// Makes the next `count` captures return no frame.
    pub fn fail_next(&mut self, count: usize) {
        self.script.extend(std::iter::repeat(false).take(count));
    }

    /// Queues one successful capture ahead of any later scripted failure.
    pub fn succeed_next(&mut self) {
        self.script.push_back(true);
    }

    pub fn is_initialized(&self) -> bool {
        self.config.is_some()
    }

    /// Frames handed out so far.
    pub fn acquired(&self) -> u64 {
        self.acquired
    }

    /// Frames given back so far.
    pub fn released(&self) -> u64 {
        self.released
    }

    /// Frames currently held by the caller.
    pub fn outstanding(&self) -> usize {
        self.slots.outstanding()
    }
}

impl CameraDriver for MockCamera {
    fn init(&mut self, config: &CaptureConfig) -> Result<(), CameraError> {
        if let Some(reason) = &self.init_error {
            return Err(CameraError::OpenFailed(reason.clone()));
        }
        config
            .validate()
            .map_err(|e| CameraError::ConfigFailed(e.to_string()))?;
        self.slots = FrameSlots::new(config.fb_count);
        self.config = Some(config.clone());
        self.sequence = 0;
        tracing::info!(frame_size = ?config.frame_size, "MockCamera initialized");
        Ok(())
    }

    fn acquire_frame(&mut self) -> Option<Frame> {
        let (width, height) = self.config.as_ref()?.dimensions();

        if !self.script.pop_front().unwrap_or(true) {
            tracing::debug!("MockCamera scripted capture failure");
            return None;
        }
        if !self.slots.try_claim() {
            tracing::warn!(
                outstanding = self.slots.outstanding(),
                "MockCamera has no free frame buffer"
            );
            return None;
        }

        self.sequence += 1;
        self.acquired += 1;
        let data = synthetic_jpeg(self.frame_len, self.sequence);
        Some(Frame::new(data, width, height, self.sequence))
    }

    fn release_frame(&mut self, frame: Frame) {
        if self.slots.release() {
            self.released += 1;
        } else {
            tracing::warn!(sequence = frame.sequence(), "MockCamera released an unknown frame");
        }
    }
}
