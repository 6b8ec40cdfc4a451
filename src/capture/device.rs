//! Webcam capture through `nokhwa`, requesting MJPEG so frames arrive
//! already compressed.

use super::{CameraDriver, CameraError, CaptureConfig, Frame, FrameSlots};
use nokhwa::pixel_format::RgbFormat;
use nokhwa::utils::{
    CameraFormat, CameraIndex, FrameFormat, RequestedFormat, RequestedFormatType, Resolution,
};
use nokhwa::Camera;

/// Frame rate requested from the device; only one frame is pulled per
/// capture interval, so this only bounds sensor latency.
const STREAM_FPS: u32 = 15;

pub struct NokhwaCamera {
    index: u32,
    camera: Option<Camera>,
    slots: FrameSlots,
    sequence: u64,
}

impl NokhwaCamera {
    pub fn new(index: u32) -> Self {
        Self {
            index,
            camera: None,
            slots: FrameSlots::default(),
            sequence: 0,
        }
    }
}

impl CameraDriver for NokhwaCamera {
    fn init(&mut self, config: &CaptureConfig) -> Result<(), CameraError> {
        config
            .validate()
            .map_err(|e| CameraError::ConfigFailed(e.to_string()))?;

        let (width, height) = config.dimensions();
        let format = RequestedFormat::new::<RgbFormat>(RequestedFormatType::Closest(
            CameraFormat::new(Resolution::new(width, height), FrameFormat::MJPEG, STREAM_FPS),
        ));

        let mut camera = Camera::new(CameraIndex::Index(self.index), format)
            .map_err(|e| CameraError::DeviceNotFound(e.to_string()))?;
        camera
            .open_stream()
            .map_err(|e| CameraError::OpenFailed(e.to_string()))?;

        tracing::info!(
            index = self.index,
            format = %camera.camera_format(),
            "Webcam stream opened"
        );

        self.camera = Some(camera);
        self.slots = FrameSlots::new(config.fb_count);
        Ok(())
    }

    fn acquire_frame(&mut self) -> Option<Frame> {
        let camera = self.camera.as_mut()?;
        if !self.slots.try_claim() {
            tracing::warn!("Webcam has no free frame buffer");
            return None;
        }

        let buffer = match camera.frame() {
            Ok(buffer) => buffer,
            Err(e) => {
                tracing::warn!(error = %e, "Webcam frame grab failed");
                self.slots.release();
                return None;
            }
        };

        if buffer.source_frame_format() != FrameFormat::MJPEG {
            tracing::warn!(
                format = %buffer.source_frame_format(),
                "Webcam delivered an uncompressed frame"
            );
            self.slots.release();
            return None;
        }

        self.sequence += 1;
        let resolution = buffer.resolution();
        Some(Frame::new(
            buffer.buffer().to_vec(),
            resolution.width(),
            resolution.height(),
            self.sequence,
        ))
    }

    fn release_frame(&mut self, frame: Frame) {
        if !self.slots.release() {
            tracing::warn!(sequence = frame.sequence(), "Released a frame that was not outstanding");
        }
    }
}

impl Drop for NokhwaCamera {
    fn drop(&mut self) {
        if let Some(camera) = self.camera.as_mut() {
            if let Err(e) = camera.stop_stream() {
                tracing::debug!(error = %e, "Failed to stop webcam stream");
            }
        }
    }
}
