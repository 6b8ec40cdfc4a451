//! Frame type representing one compressed image from the driver.

use std::time::Instant;

const JPEG_SOI: [u8; 2] = [0xFF, 0xD8];
const JPEG_EOI: [u8; 2] = [0xFF, 0xD9];

/// A single captured frame.
///
/// Frames are owned by the driver's buffer slot: the caller borrows the
/// bytes for one publish and must hand the frame back through
/// [`CameraDriver::release_frame`](super::CameraDriver::release_frame),
/// which takes it by value.
#[must_use = "frames must be returned with CameraDriver::release_frame"]
pub struct Frame {
    /// Compressed image bytes, exactly as produced by the encoder.
    data: Vec<u8>,
    width: u32,
    height: u32,
    /// Driver-assigned monotonic sequence number.
    sequence: u64,
    captured_at: Instant,
}

impl Frame {
    /// Creates a new frame with the given parameters.
    pub fn new(data: Vec<u8>, width: u32, height: u32, sequence: u64) -> Self {
        Self {
            data,
            width,
            height,
            sequence,
            captured_at: Instant::now(),
        }
    }

    /// Returns the compressed image bytes.
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Returns the payload length in bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns true if the frame carries no bytes.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    #[inline]
    pub fn width(&self) -> u32 {
        self.width
    }

    #[inline]
    pub fn height(&self) -> u32 {
        self.height
    }

    #[inline]
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// When the driver produced this frame.
    #[inline]
    pub fn captured_at(&self) -> Instant {
        self.captured_at
    }

    /// Checks for JPEG start and end markers.
    pub fn looks_like_jpeg(&self) -> bool {
        self.data.len() >= 4 && self.data.starts_with(&JPEG_SOI) && self.data.ends_with(&JPEG_EOI)
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("sequence", &self.sequence)
            .field("bytes", &self.data.len())
            .finish()
    }
}

/// Builds a synthetic JPEG-shaped byte stream of `len` bytes (at least 4).
pub(crate) fn synthetic_jpeg(len: usize, seed: u64) -> Vec<u8> {
    let len = len.max(4);
    let mut data = Vec::with_capacity(len);
    data.extend_from_slice(&JPEG_SOI);
    data.extend((0..len - 4).map(|i| ((i as u64 * 17 + 73 + seed) % 251) as u8));
    data.extend_from_slice(&JPEG_EOI);
    data
}
