//! Camera that replays JPEG files from a directory.
//!
//! Stands in for the sensor on hosts without one: each capture reads the
//! next `.jpg`/`.jpeg` file in name order and wraps around at the end.

use super::{CameraDriver, CameraError, CaptureConfig, Frame, FrameSlots};
use std::path::{Path, PathBuf};

pub struct DirectoryCamera {
    dir: PathBuf,
    files: Vec<PathBuf>,
    next: usize,
    slots: FrameSlots,
    sequence: u64,
    dimensions: (u32, u32),
}

impl DirectoryCamera {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            files: Vec::new(),
            next: 0,
            slots: FrameSlots::default(),
            sequence: 0,
            dimensions: (0, 0),
        }
    }

    /// Number of images found by `init`.
    pub fn image_count(&self) -> usize {
        self.files.len()
    }

    fn scan(dir: &Path) -> Result<Vec<PathBuf>, CameraError> {
        let entries = std::fs::read_dir(dir)
            .map_err(|e| CameraError::DeviceNotFound(format!("{}: {}", dir.display(), e)))?;

        let mut files: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.is_file() && is_jpeg_name(path))
            .collect();
        files.sort();
        Ok(files)
    }
}

fn is_jpeg_name(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("jpg") || ext.eq_ignore_ascii_case("jpeg"))
        .unwrap_or(false)
}

impl CameraDriver for DirectoryCamera {
    fn init(&mut self, config: &CaptureConfig) -> Result<(), CameraError> {
        config
            .validate()
            .map_err(|e| CameraError::ConfigFailed(e.to_string()))?;

        let files = Self::scan(&self.dir)?;
        if files.is_empty() {
            return Err(CameraError::NoImages(self.dir.display().to_string()));
        }

        tracing::info!(
            dir = %self.dir.display(),
            images = files.len(),
            "DirectoryCamera initialized"
        );
        self.files = files;
        self.next = 0;
        self.slots = FrameSlots::new(config.fb_count);
        self.dimensions = config.dimensions();
        Ok(())
    }

    fn acquire_frame(&mut self) -> Option<Frame> {
        if self.files.is_empty() {
            return None;
        }
        if !self.slots.try_claim() {
            tracing::warn!("DirectoryCamera has no free frame buffer");
            return None;
        }

        let path = &self.files[self.next];
        self.next = (self.next + 1) % self.files.len();

        match std::fs::read(path) {
            Ok(data) => {
                self.sequence += 1;
                let (width, height) = self.dimensions;
                Some(Frame::new(data, width, height, self.sequence))
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Failed to read image");
                self.slots.release();
                None
            }
        }
    }

    fn release_frame(&mut self, frame: Frame) {
        if !self.slots.release() {
            tracing::warn!(sequence = frame.sequence(), "Released a frame that was not outstanding");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::frame::synthetic_jpeg;

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("meter-cam-{}-{}", name, std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_replays_images_in_order() {
        let dir = scratch_dir("replay");
        std::fs::write(dir.join("b.jpg"), synthetic_jpeg(32, 2)).unwrap();
        std::fs::write(dir.join("a.JPEG"), synthetic_jpeg(16, 1)).unwrap();
        std::fs::write(dir.join("notes.txt"), b"ignored").unwrap();

        let mut camera = DirectoryCamera::new(&dir);
        camera.init(&CaptureConfig::default()).unwrap();
        assert_eq!(camera.image_count(), 2);

        let lens: Vec<usize> = (0..3)
            .map(|_| {
                let frame = camera.acquire_frame().unwrap();
                let len = frame.len();
                camera.release_frame(frame);
                len
            })
            .collect();
        assert_eq!(lens, vec![16, 32, 16]);

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_empty_directory_fails_init() {
        let dir = scratch_dir("empty");
        let mut camera = DirectoryCamera::new(&dir);

        assert!(matches!(
            camera.init(&CaptureConfig::default()),
            Err(CameraError::NoImages(_))
        ));
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_missing_directory_fails_init() {
        let mut camera = DirectoryCamera::new("/nonexistent/meter-cam-images");
        assert!(matches!(
            camera.init(&CaptureConfig::default()),
            Err(CameraError::DeviceNotFound(_))
        ));
    }

    #[test]
    fn test_held_frame_blocks_next_capture() {
        let dir = scratch_dir("held");
        std::fs::write(dir.join("only.jpg"), synthetic_jpeg(8, 0)).unwrap();

        let mut camera = DirectoryCamera::new(&dir);
        camera.init(&CaptureConfig::default()).unwrap();

        let held = camera.acquire_frame().unwrap();
        assert!(camera.acquire_frame().is_none());
        camera.release_frame(held);
        assert!(camera.acquire_frame().is_some());

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
