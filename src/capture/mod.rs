//! Camera input and frame handling.
//!
//! This module provides the camera driver abstraction, the fixed capture
//! configuration and the frame type. Frames are compressed JPEG bytes
//! that go on the wire untouched.

mod camera;
mod config;
#[cfg(feature = "camera")]
mod device;
mod directory;
mod frame;

pub use camera::{CameraDriver, CameraError, FrameSlots, MockCamera};
pub use config::{CameraPins, CaptureConfig, FrameSize, PixelFormat};
#[cfg(feature = "camera")]
pub use device::NokhwaCamera;
pub use directory::DirectoryCamera;
pub use frame::Frame;
