//! Whole-frame change detection.
//!
//! The detector keeps a private *reference* copy of the last published
//! frame and compares every new capture against it byte for byte. Any
//! single differing byte marks the whole frame dirty; there is no
//! per-region tracking.

use tracing::trace;

use crate::error::VncdError;
use crate::screen::pixel::PixelDepth;
use crate::screen::types::{FrameBuffer, ScreenFormat};

/// Stateful detector holding the last published frame.
pub struct ChangeDetector {
    reference: FrameBuffer,
    depth: PixelDepth,
    primed: bool,
}

impl ChangeDetector {
    /// Detector for frames of `size` bytes compared along `depth`.
    pub fn new(size: usize, depth: PixelDepth) -> Self {
        Self {
            reference: FrameBuffer::zeroed(size),
            depth,
            primed: false,
        }
    }

    /// Detector sized and pathed for `format`.
    pub fn for_format(format: &ScreenFormat) -> Self {
        Self::new(format.size, PixelDepth::for_comparison(format))
    }

    /// Compare `frame` with the reference.
    ///
    /// Returns `true` (and copies `frame` into the reference) when they
    /// differ, or on the first call after construction. Returns `false`
    /// and leaves the reference untouched otherwise.
    pub fn has_changed(&mut self, frame: &[u8]) -> Result<bool, VncdError> {
        if frame.len() != self.reference.len() {
            return Err(VncdError::SizeMismatch {
                expected: self.reference.len(),
                actual: frame.len(),
            });
        }

        if self.primed {
            match self.depth.first_difference(self.reference.as_bytes(), frame) {
                None => return Ok(false),
                Some(at) => trace!("frame differs at pixel word {at}"),
            }
        }

        self.reference.copy_from(frame)?;
        self.primed = true;
        Ok(true)
    }

    /// The last frame reported as changed (all zero before the first).
    #[cfg(test)]
    fn reference(&self) -> &[u8] {
        self.reference.as_bytes()
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_frame_is_always_changed() {
        let mut det = ChangeDetector::new(16, PixelDepth::Bpp32);
        // Even an all-zero frame that matches the sentinel.
        assert!(det.has_changed(&[0u8; 16]).unwrap());
    }

    #[test]
    fn identical_frame_is_unchanged() {
        let mut det = ChangeDetector::new(16, PixelDepth::Bpp16);
        let frame = [0xAAu8; 16];
        assert!(det.has_changed(&frame).unwrap());
        assert!(!det.has_changed(&frame).unwrap());
    }

    #[test]
    fn reference_tracks_last_changed_frame() {
        let mut det = ChangeDetector::new(8, PixelDepth::Bpp8);
        let a = [1u8; 8];
        let mut b = a;
        b[7] = 2;

        assert!(det.has_changed(&a).unwrap());
        assert_eq!(det.reference(), &a);

        assert!(det.has_changed(&b).unwrap());
        assert_eq!(det.reference(), &b);

        assert!(!det.has_changed(&b).unwrap());
        assert_eq!(det.reference(), &b);
    }

    #[test]
    fn single_byte_change_marks_frame() {
        let mut det = ChangeDetector::new(4096, PixelDepth::Bpp32);
        let a = vec![0x10u8; 4096];
        let mut b = a.clone();
        b[4095] ^= 1;
        det.has_changed(&a).unwrap();
        assert!(det.has_changed(&b).unwrap());
    }

    #[test]
    fn wrong_length_is_rejected_without_side_effects() {
        let mut det = ChangeDetector::new(8, PixelDepth::Bpp8);
        det.has_changed(&[3u8; 8]).unwrap();
        assert!(matches!(
            det.has_changed(&[3u8; 4]),
            Err(VncdError::SizeMismatch { expected: 8, actual: 4 })
        ));
        assert_eq!(det.reference(), &[3u8; 8]);
    }
}
