use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

/// Number of image streams produced by the stereo device.
pub const EYE_COUNT: usize = 2;

/// Bytes per pixel of the RGB24 eye images.
pub const BYTES_PER_PIXEL: usize = 3;

/// One of the two image streams of the stereo device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Eye {
    Left,
    Right,
}

impl Eye {
    pub const BOTH: [Eye; EYE_COUNT] = [Eye::Left, Eye::Right];

    /// Native eye index (left = 0, right = 1).
    pub fn index(self) -> usize {
        match self {
            Eye::Left => 0,
            Eye::Right => 1,
        }
    }

    pub fn from_index(index: usize) -> Option<Eye> {
        match index {
            0 => Some(Eye::Left),
            1 => Some(Eye::Right),
            _ => None,
        }
    }
}

impl fmt::Display for Eye {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Eye::Left => f.write_str("left"),
            Eye::Right => f.write_str("right"),
        }
    }
}

/// Pixel formats a capture backend may receive from the hardware
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PixelFormat {
    Rgb24,
    Yuyv4,
    Mjpeg,
}

/// Byte size of one RGB24 eye image.
pub fn image_data_size(width: u32, height: u32) -> usize {
    width as usize * height as usize * BYTES_PER_PIXEL
}

/// Raw RGB24 pixels for one eye, sized for the open camera mode.
#[derive(Clone, PartialEq, Eq)]
pub struct CaptureBuffer {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl CaptureBuffer {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            data: vec![0; image_data_size(width, height)],
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Copies `other` into this buffer without reallocating.
    pub fn copy_from(&mut self, other: &CaptureBuffer) {
        self.data.copy_from_slice(&other.data);
    }
}

impl fmt::Debug for CaptureBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CaptureBuffer")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("len", &self.data.len())
            .finish()
    }
}

/// One capture buffer per eye, indexed by [`Eye::index`].
pub type StereoBuffers = [CaptureBuffer; EYE_COUNT];

pub fn stereo_buffers(width: u32, height: u32) -> StereoBuffers {
    [CaptureBuffer::new(width, height), CaptureBuffer::new(width, height)]
}

/// Immutable stereo frame that can be handed to other threads without copying
#[derive(Clone)]
pub struct StereoFrame {
    pub left: Bytes,
    pub right: Bytes,

    pub meta: Arc<FrameMetadata>,

    /// Relay timestamp for latency tracking
    pub timestamp: Instant,
}

impl StereoFrame {
    pub fn eye(&self, eye: Eye) -> &Bytes {
        match eye {
            Eye::Left => &self.left,
            Eye::Right => &self.right,
        }
    }
}

/// Frame metadata
#[derive(Debug, Clone)]
pub struct FrameMetadata {
    pub sequence: u64,
    pub width: u32,
    pub height: u32,
    pub stride: u32,
    pub format: PixelFormat,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffer_size_is_width_times_height_times_three() {
        for (w, h) in [(1, 1), (320, 240), (960, 950), (2560, 1920)] {
            let buffer = CaptureBuffer::new(w, h);
            assert_eq!(buffer.len(), w as usize * h as usize * 3);
        }
        assert_eq!(image_data_size(960, 950), 2_736_000);
    }

    #[test]
    fn eye_indices_round_trip() {
        for eye in Eye::BOTH {
            assert_eq!(Eye::from_index(eye.index()), Some(eye));
        }
        assert_eq!(Eye::from_index(2), None);
    }
}
