use std::sync::Arc;
use std::time::Instant;

use crate::error::FrameError;

/// Side length of the ramp shown before the first capture arrives.
const PLACEHOLDER_SIDE: u32 = 255;

/// Immutable 16-bit monochrome frame
///
/// Cloning shares the sample buffer, so the same capture can go to the
/// display and to disk without copying.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Row-major samples, `width * height` of them
    pixels: Arc<[u16]>,

    width: u32,

    /// Capture counter, 0 for the placeholder
    pub sequence: u64,

    /// Capture timestamp for latency tracking
    pub captured_at: Instant,
}

impl Frame {
    pub fn new(pixels: impl Into<Arc<[u16]>>, width: u32, sequence: u64) -> Result<Self, FrameError> {
        let pixels = pixels.into();
        if width == 0 {
            return Err(FrameError::ZeroWidth);
        }
        if pixels.len() % width as usize != 0 {
            return Err(FrameError::Ragged {
                len: pixels.len(),
                width,
            });
        }

        Ok(Self {
            pixels,
            width,
            sequence,
            captured_at: Instant::now(),
        })
    }

    /// Horizontal ramp published before the camera delivers anything.
    pub fn placeholder() -> Self {
        let len = (PLACEHOLDER_SIDE * PLACEHOLDER_SIDE) as usize;
        let pixels: Vec<u16> = (0..len).map(|i| i as u16).collect();

        Self {
            pixels: pixels.into(),
            width: PLACEHOLDER_SIDE,
            sequence: 0,
            captured_at: Instant::now(),
        }
    }

    pub fn pixels(&self) -> &[u16] {
        &self.pixels
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        (self.pixels.len() / self.width as usize) as u32
    }

    /// Sample at `(x, y)`, `None` outside the frame.
    pub fn sample(&self, x: u32, y: u32) -> Option<u16> {
        if x >= self.width || y >= self.height() {
            return None;
        }
        self.pixels
            .get(y as usize * self.width as usize + x as usize)
            .copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn height_is_derived_from_width() {
        let frame = Frame::new(vec![0u16; 12], 4, 1).unwrap();
        assert_eq!(frame.width(), 4);
        assert_eq!(frame.height(), 3);
    }

    #[test]
    fn rejects_ragged_and_zero_width() {
        assert!(matches!(
            Frame::new(vec![0u16; 10], 4, 1),
            Err(FrameError::Ragged { len: 10, width: 4 })
        ));
        assert!(matches!(
            Frame::new(vec![0u16; 10], 0, 1),
            Err(FrameError::ZeroWidth)
        ));
    }

    #[test]
    fn placeholder_is_a_ramp() {
        let frame = Frame::placeholder();
        assert_eq!(frame.width(), 255);
        assert_eq!(frame.height(), 255);
        assert_eq!(frame.sample(3, 0), Some(3));
        assert_eq!(frame.sample(0, 1), Some(255));
        assert_eq!(frame.sample(255, 0), None);
    }

    #[test]
    fn clones_share_samples() {
        let frame = Frame::new(vec![7u16; 4], 2, 9).unwrap();
        let copy = frame.clone();
        assert!(std::ptr::eq(frame.pixels().as_ptr(), copy.pixels().as_ptr()));
    }
}
