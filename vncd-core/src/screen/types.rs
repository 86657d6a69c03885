//! Shared types for the capture pipeline.
//!
//! These describe the capturable surface ([`ScreenFormat`]), the two
//! long-lived pixel stores ([`FrameBuffer`]) and the geometry helpers
//! passed between pipeline stages and the protocol engine.

use std::fmt;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::error::VncdError;
use crate::screen::format::{Components, PixelFormatInfo};

// ── Rotation ─────────────────────────────────────────────────────

/// One of the four quarter-turn display orientations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Rotation {
    #[default]
    Deg0,
    Deg90,
    Deg180,
    Deg270,
}

/// Landscape vs portrait grouping of the four rotations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LayoutClass {
    Landscape,
    Portrait,
}

impl Rotation {
    /// Build a rotation from a count of clockwise quarter turns.
    pub const fn from_quarter_turns(turns: u8) -> Self {
        match turns % 4 {
            0 => Rotation::Deg0,
            1 => Rotation::Deg90,
            2 => Rotation::Deg180,
            _ => Rotation::Deg270,
        }
    }

    pub const fn quarter_turns(self) -> u8 {
        match self {
            Rotation::Deg0 => 0,
            Rotation::Deg90 => 1,
            Rotation::Deg180 => 2,
            Rotation::Deg270 => 3,
        }
    }

    pub const fn degrees(self) -> u16 {
        self.quarter_turns() as u16 * 90
    }

    /// Rotations 180° apart share a layout class.
    pub const fn layout_class(self) -> LayoutClass {
        match self {
            Rotation::Deg0 | Rotation::Deg180 => LayoutClass::Landscape,
            Rotation::Deg90 | Rotation::Deg270 => LayoutClass::Portrait,
        }
    }

    pub fn same_layout_class(self, other: Rotation) -> bool {
        self.layout_class() == other.layout_class()
    }
}

impl fmt::Display for Rotation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ROTATION_{}", self.degrees())
    }
}

// ── Rect ─────────────────────────────────────────────────────────

/// An axis-aligned screen region in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rect {
    /// Left edge in pixels.
    pub x: u32,
    /// Top edge in pixels.
    pub y: u32,
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl Rect {
    pub const fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub const fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub const fn right(&self) -> u32 {
        self.x.saturating_add(self.width)
    }

    pub const fn bottom(&self) -> u32 {
        self.y.saturating_add(self.height)
    }

    /// Smallest rectangle covering both `self` and `other`.
    pub fn union(&self, other: &Rect) -> Rect {
        if self.is_empty() {
            return *other;
        }
        if other.is_empty() {
            return *self;
        }
        let x = self.x.min(other.x);
        let y = self.y.min(other.y);
        Rect::new(
            x,
            y,
            self.right().max(other.right()) - x,
            self.bottom().max(other.bottom()) - y,
        )
    }

    /// Overlap of `self` and `other`; empty when they are disjoint.
    pub fn intersect(&self, other: &Rect) -> Rect {
        let x = self.x.max(other.x);
        let y = self.y.max(other.y);
        let right = self.right().min(other.right());
        let bottom = self.bottom().min(other.bottom());
        if right <= x || bottom <= y {
            return Rect::default();
        }
        Rect::new(x, y, right - x, bottom - y)
    }
}

// ── ChannelLayout ────────────────────────────────────────────────

/// Position and width of one color channel inside a pixel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ChannelLayout {
    /// Bit offset of the channel's least significant bit.
    pub shift: u8,
    /// Number of bits in the channel.
    pub bits: u8,
}

impl ChannelLayout {
    pub const fn new(shift: u8, bits: u8) -> Self {
        Self { shift, bits }
    }

    /// Largest value the channel can hold.
    pub const fn max(self) -> u16 {
        match self.bits {
            0 => 0,
            b if b >= 16 => u16::MAX,
            b => (1u16 << b) - 1,
        }
    }
}

// ── ScreenFormat ─────────────────────────────────────────────────

/// Canonical description of the capturable surface.
///
/// Exactly one is live at a time. It is rebuilt (never patched) when
/// capture geometry changes; the only field that changes in place is
/// [`rotation`](Self::rotation), on a class-preserving rotation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScreenFormat {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    pub bits_per_pixel: u8,
    pub red: ChannelLayout,
    pub green: ChannelLayout,
    pub blue: ChannelLayout,
    pub alpha: ChannelLayout,
    /// Which channels the source format actually carries.
    pub components: Components,
    /// Bytes in one full frame: `bits_per_pixel * width * height / 8`.
    pub size: usize,
    /// Last applied display rotation.
    pub rotation: Rotation,
}

impl ScreenFormat {
    /// Build the canonical format from a resolved pixel layout and the
    /// geometry of a captured snapshot.
    pub fn from_pixel_info(
        info: &PixelFormatInfo,
        width: u32,
        height: u32,
        rotation: Rotation,
    ) -> Result<Self, VncdError> {
        if width == 0 || height == 0 {
            return Err(VncdError::InvalidGeometry { width, height });
        }
        let size = frame_size(info.bits_per_pixel, width, height);
        if size == 0 {
            return Err(VncdError::InvalidGeometry { width, height });
        }

        Ok(Self {
            width,
            height,
            bits_per_pixel: info.bits_per_pixel,
            red: info.red.layout(),
            green: info.green.layout(),
            blue: info.blue.layout(),
            alpha: info.alpha.layout(),
            components: info.components,
            size,
            rotation,
        })
    }

    /// Sum of the red, green and blue channel widths.
    pub fn depth(&self) -> u8 {
        self.red.bits + self.green.bits + self.blue.bits
    }

    /// Bytes per row, when pixels are byte aligned.
    pub fn row_bytes(&self) -> Option<usize> {
        (self.bits_per_pixel % 8 == 0)
            .then(|| self.width as usize * (self.bits_per_pixel as usize / 8))
    }

    /// The whole frame as a rectangle.
    pub const fn full_rect(&self) -> Rect {
        Rect::new(0, 0, self.width, self.height)
    }
}

/// Byte size of one frame: `bits_per_pixel * width * height / 8`.
pub const fn frame_size(bits_per_pixel: u8, width: u32, height: u32) -> usize {
    bits_per_pixel as usize * width as usize * height as usize / 8
}

// ── FrameBuffer ──────────────────────────────────────────────────

/// Raw pixel bytes of one captured frame.
///
/// Storage is allocated once and never resized: the protocol engine
/// keeps reading the same allocation for the whole process lifetime,
/// so new content is always copied in place.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameBuffer {
    data: Box<[u8]>,
}

impl FrameBuffer {
    /// Allocate an all-zero buffer of `size` bytes.
    pub fn zeroed(size: usize) -> Self {
        Self {
            data: vec![0u8; size].into_boxed_slice(),
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Overwrite the whole buffer with `src`.
    pub fn copy_from(&mut self, src: &[u8]) -> Result<(), VncdError> {
        if src.len() != self.data.len() {
            return Err(VncdError::SizeMismatch {
                expected: self.data.len(),
                actual: src.len(),
            });
        }
        self.data.copy_from_slice(src);
        Ok(())
    }
}

/// The *current* frame buffer, shared with the protocol engine.
///
/// The publish path writes under the write lock and only raises a
/// dirty mark after the copy completes; the engine reads under the
/// read lock while it serialises an update.
#[derive(Debug, Clone)]
pub struct SharedFrameBuffer(Arc<RwLock<FrameBuffer>>);

impl SharedFrameBuffer {
    pub fn new(buffer: FrameBuffer) -> Self {
        Self(Arc::new(RwLock::new(buffer)))
    }

    pub fn read(&self) -> Result<RwLockReadGuard<'_, FrameBuffer>, VncdError> {
        self.0.read().map_err(|_| VncdError::BufferPoisoned)
    }

    pub fn write(&self) -> Result<RwLockWriteGuard<'_, FrameBuffer>, VncdError> {
        self.0.write().map_err(|_| VncdError::BufferPoisoned)
    }
}

// ── RawFrame ─────────────────────────────────────────────────────

/// A discrete, owned snapshot returned by
/// [`SurfaceCapturer::capture`](crate::screen::SurfaceCapturer::capture).
#[derive(Debug, Clone)]
pub struct RawFrame {
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Tightly packed pixel data, `ScreenFormat::size` bytes.
    pub data: Vec<u8>,
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::screen::format::{FormatResolver, hal};

    #[test]
    fn size_matches_geometry() {
        let info = FormatResolver::new().describe(hal::RGBA_8888).unwrap();
        let format = ScreenFormat::from_pixel_info(&info, 1024, 600, Rotation::Deg0).unwrap();
        assert_eq!(format.size, 2_457_600);
        assert_eq!(format.size, 1024 * 600 * 4);
        assert_eq!(format.row_bytes(), Some(4096));
        assert_eq!(format.depth(), 24);
    }

    #[test]
    fn zero_geometry_is_rejected() {
        let info = FormatResolver::new().describe(hal::RGB_565).unwrap();
        let err = ScreenFormat::from_pixel_info(&info, 0, 600, Rotation::Deg0).unwrap_err();
        assert!(matches!(err, VncdError::InvalidGeometry { width: 0, .. }));
    }

    #[test]
    fn channel_max_from_width() {
        assert_eq!(ChannelLayout::new(11, 5).max(), 31);
        assert_eq!(ChannelLayout::new(5, 6).max(), 63);
        assert_eq!(ChannelLayout::new(0, 8).max(), 255);
        assert_eq!(ChannelLayout::new(0, 0).max(), 0);
    }

    #[test]
    fn layout_classes() {
        assert!(Rotation::Deg0.same_layout_class(Rotation::Deg180));
        assert!(Rotation::Deg90.same_layout_class(Rotation::Deg270));
        assert!(!Rotation::Deg0.same_layout_class(Rotation::Deg90));
        assert_eq!(Rotation::from_quarter_turns(5), Rotation::Deg90);
        assert_eq!(Rotation::Deg270.to_string(), "ROTATION_270");
    }

    #[test]
    fn rect_union_and_intersection() {
        let a = Rect::new(0, 0, 10, 10);
        let b = Rect::new(5, 5, 10, 10);
        assert_eq!(a.union(&b), Rect::new(0, 0, 15, 15));
        assert_eq!(a.intersect(&b), Rect::new(5, 5, 5, 5));
        assert!(a.intersect(&Rect::new(20, 20, 1, 1)).is_empty());
        assert_eq!(Rect::default().union(&b), b);
    }

    #[test]
    fn frame_buffer_copy_rejects_wrong_length() {
        let mut fb = FrameBuffer::zeroed(8);
        assert!(fb.copy_from(&[1u8; 8]).is_ok());
        assert_eq!(fb.as_bytes(), &[1u8; 8]);
        let err = fb.copy_from(&[0u8; 4]).unwrap_err();
        assert!(matches!(err, VncdError::SizeMismatch { expected: 8, actual: 4 }));
        // Failed copy leaves content untouched.
        assert_eq!(fb.as_bytes(), &[1u8; 8]);
    }
}
