//! Per-depth pixel paths and scaling arithmetic.
//!
//! The pipeline touches pixels in two places: comparing frames and
//! resampling them for scaled clients. Both are written once, generic
//! over the pixel word ([`Pixel`]), and [`PixelDepth`] picks the
//! instantiation once at initialisation.

use crate::screen::types::{Rect, ScreenFormat};

// ── Pixel ────────────────────────────────────────────────────────

/// A fixed-width pixel word read in native byte order.
pub trait Pixel: Copy + PartialEq {
    const BYTES: usize;

    fn read(bytes: &[u8]) -> Self;
    fn write(self, out: &mut [u8]);
}

macro_rules! impl_pixel {
    ($($t:ty),*) => {$(
        impl Pixel for $t {
            const BYTES: usize = std::mem::size_of::<$t>();

            fn read(bytes: &[u8]) -> Self {
                let mut word = [0u8; std::mem::size_of::<$t>()];
                word.copy_from_slice(&bytes[..Self::BYTES]);
                <$t>::from_ne_bytes(word)
            }

            fn write(self, out: &mut [u8]) {
                out[..Self::BYTES].copy_from_slice(&self.to_ne_bytes());
            }
        }
    )*};
}

impl_pixel!(u8, u16, u32);

/// Packed 24-bit pixels have no native word; they are compared and
/// copied as byte triples.
impl Pixel for [u8; 3] {
    const BYTES: usize = 3;

    fn read(bytes: &[u8]) -> Self {
        [bytes[0], bytes[1], bytes[2]]
    }

    fn write(self, out: &mut [u8]) {
        out[..3].copy_from_slice(&self);
    }
}

/// Index of the first differing pixel word, if any.
///
/// Trailing bytes that do not fill a whole word are compared as bytes
/// and reported at the word index they would start.
pub fn first_difference<P: Pixel>(a: &[u8], b: &[u8]) -> Option<usize> {
    if a.len() != b.len() {
        return Some(0);
    }
    let words = a
        .chunks_exact(P::BYTES)
        .zip(b.chunks_exact(P::BYTES))
        .position(|(x, y)| P::read(x) != P::read(y));
    if words.is_some() {
        return words;
    }
    let tail = a.len() / P::BYTES * P::BYTES;
    (a[tail..] != b[tail..]).then_some(tail / P::BYTES)
}

/// Nearest-neighbour resample of a tightly packed `src_w x src_h`
/// image into `dst` (`dst_w x dst_h`).
pub fn resample_nearest<P: Pixel>(
    src: &[u8],
    src_w: u32,
    src_h: u32,
    dst: &mut [u8],
    dst_w: u32,
    dst_h: u32,
) {
    if src_w == 0 || src_h == 0 || dst_w == 0 || dst_h == 0 {
        return;
    }
    let src_row = src_w as usize * P::BYTES;
    let dst_row = dst_w as usize * P::BYTES;

    for dy in 0..dst_h as usize {
        let sy = dy * src_h as usize / dst_h as usize;
        let src_line = &src[sy * src_row..(sy + 1) * src_row];
        let dst_line = &mut dst[dy * dst_row..(dy + 1) * dst_row];
        for dx in 0..dst_w as usize {
            let sx = dx * src_w as usize / dst_w as usize;
            P::read(&src_line[sx * P::BYTES..]).write(&mut dst_line[dx * P::BYTES..]);
        }
    }
}

// ── PixelDepth ───────────────────────────────────────────────────

/// The closed set of pixel paths, chosen once from the screen format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelDepth {
    Bpp8,
    Bpp16,
    Bpp24,
    Bpp32,
}

impl PixelDepth {
    /// Exact path for an 8/16/24/32-bit format, `None` otherwise.
    pub const fn for_bits(bits_per_pixel: u8) -> Option<Self> {
        match bits_per_pixel {
            8 => Some(PixelDepth::Bpp8),
            16 => Some(PixelDepth::Bpp16),
            24 => Some(PixelDepth::Bpp24),
            32 => Some(PixelDepth::Bpp32),
            _ => None,
        }
    }

    /// Path used for frame comparison; non-word formats compare
    /// byte-by-byte.
    pub fn for_comparison(format: &ScreenFormat) -> Self {
        Self::for_bits(format.bits_per_pixel).unwrap_or(PixelDepth::Bpp8)
    }

    pub const fn bytes(self) -> usize {
        match self {
            PixelDepth::Bpp8 => 1,
            PixelDepth::Bpp16 => 2,
            PixelDepth::Bpp24 => 3,
            PixelDepth::Bpp32 => 4,
        }
    }

    /// Index (in pixel words) of the first difference between two
    /// frames.
    pub fn first_difference(self, a: &[u8], b: &[u8]) -> Option<usize> {
        match self {
            PixelDepth::Bpp8 => first_difference::<u8>(a, b),
            PixelDepth::Bpp16 => first_difference::<u16>(a, b),
            PixelDepth::Bpp24 => first_difference::<[u8; 3]>(a, b),
            PixelDepth::Bpp32 => first_difference::<u32>(a, b),
        }
    }

    pub fn resample(self, src: &[u8], src_w: u32, src_h: u32, dst: &mut [u8], dst_w: u32, dst_h: u32) {
        match self {
            PixelDepth::Bpp8 => resample_nearest::<u8>(src, src_w, src_h, dst, dst_w, dst_h),
            PixelDepth::Bpp16 => resample_nearest::<u16>(src, src_w, src_h, dst, dst_w, dst_h),
            PixelDepth::Bpp24 => resample_nearest::<[u8; 3]>(src, src_w, src_h, dst, dst_w, dst_h),
            PixelDepth::Bpp32 => resample_nearest::<u32>(src, src_w, src_h, dst, dst_w, dst_h),
        }
    }
}

// ── Scaling ──────────────────────────────────────────────────────

/// Server-wide scaling applied to what clients see.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Scaling(u16);

impl Scaling {
    pub const IDENTITY: Scaling = Scaling(100);
    pub const MAX_PERCENT: u16 = 150;

    /// Accepts `1..=150`; anything else falls back to 100 %.
    pub fn from_percent(percent: u16) -> Self {
        if (1..=Self::MAX_PERCENT).contains(&percent) {
            Scaling(percent)
        } else {
            Self::IDENTITY
        }
    }

    pub const fn percent(self) -> u16 {
        self.0
    }

    pub const fn is_identity(self) -> bool {
        self.0 == 100
    }

    /// A source dimension as seen by the client, never below one.
    pub fn apply(self, dim: u32) -> u32 {
        ((dim as u64 * self.0 as u64 / 100) as u32).max(1)
    }

    /// Client-visible `(width, height)` of a frame.
    pub fn scaled_size(self, format: &ScreenFormat) -> (u32, u32) {
        (self.apply(format.width), self.apply(format.height))
    }

    /// Map a client coordinate back into source space, clamped.
    pub fn to_source(self, value: u32, source_dim: u32) -> u32 {
        let v = value as u64 * 100 / self.0 as u64;
        (v as u32).min(source_dim.saturating_sub(1))
    }

    /// Map a client rectangle back into source space.
    pub fn rect_to_source(self, rect: Rect, format: &ScreenFormat) -> Rect {
        if self.is_identity() {
            return rect.intersect(&format.full_rect());
        }
        let x = self.to_source(rect.x, format.width);
        let y = self.to_source(rect.y, format.height);
        let right = (rect.right() as u64 * 100).div_ceil(self.0 as u64) as u32;
        let bottom = (rect.bottom() as u64 * 100).div_ceil(self.0 as u64) as u32;
        Rect::new(
            x,
            y,
            right.min(format.width).saturating_sub(x),
            bottom.min(format.height).saturating_sub(y),
        )
    }
}

impl Default for Scaling {
    fn default() -> Self {
        Self::IDENTITY
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::screen::format::{FormatResolver, hal};
    use crate::screen::types::Rotation;

    fn format(w: u32, h: u32) -> ScreenFormat {
        let info = FormatResolver::new().describe(hal::RGBA_8888).unwrap();
        ScreenFormat::from_pixel_info(&info, w, h, Rotation::Deg0).unwrap()
    }

    #[test]
    fn depths_agree_on_equality() {
        let a = vec![7u8; 64];
        let mut b = a.clone();
        for depth in [PixelDepth::Bpp8, PixelDepth::Bpp16, PixelDepth::Bpp32] {
            assert_eq!(depth.first_difference(&a, &b), None);
        }
        b[13] = 0;
        assert_eq!(PixelDepth::Bpp8.first_difference(&a, &b), Some(13));
        assert_eq!(PixelDepth::Bpp16.first_difference(&a, &b), Some(6));
        assert_eq!(PixelDepth::Bpp32.first_difference(&a, &b), Some(3));
    }

    #[test]
    fn trailing_bytes_are_compared() {
        let a = [1u8, 2, 3, 4, 5, 6];
        let b = [1u8, 2, 3, 4, 5, 9];
        assert_eq!(PixelDepth::Bpp32.first_difference(&a, &b), Some(1));
    }

    #[test]
    fn resample_halves_image() {
        // 4x2 image of u16 pixels 0..8
        let src: Vec<u8> = (0u16..8).flat_map(|v| v.to_ne_bytes()).collect();
        let mut dst = vec![0u8; 2 * 1 * 2];
        PixelDepth::Bpp16.resample(&src, 4, 2, &mut dst, 2, 1);
        let out: Vec<u16> = dst
            .chunks_exact(2)
            .map(|c| u16::from_ne_bytes([c[0], c[1]]))
            .collect();
        assert_eq!(out, vec![0, 2]);
    }

    #[test]
    fn packed_24_bit_paths() {
        // 4x1 image of byte triples.
        let src: Vec<u8> = (0u8..12).collect();
        let mut dst = vec![0u8; 2 * 3];
        PixelDepth::Bpp24.resample(&src, 4, 1, &mut dst, 2, 1);
        assert_eq!(dst, vec![0, 1, 2, 6, 7, 8]);

        let mut other = src.clone();
        other[7] = 0xFF;
        assert_eq!(PixelDepth::Bpp24.first_difference(&src, &other), Some(2));
        assert_eq!(PixelDepth::for_bits(24), Some(PixelDepth::Bpp24));
    }

    #[test]
    fn resample_identity_copies() {
        let src: Vec<u8> = (0u32..6).flat_map(|v| v.to_ne_bytes()).collect();
        let mut dst = vec![0u8; src.len()];
        PixelDepth::Bpp32.resample(&src, 3, 2, &mut dst, 3, 2);
        assert_eq!(src, dst);
    }

    #[test]
    fn scaling_percent_is_clamped() {
        assert_eq!(Scaling::from_percent(50).percent(), 50);
        assert_eq!(Scaling::from_percent(150).percent(), 150);
        assert_eq!(Scaling::from_percent(0).percent(), 100);
        assert_eq!(Scaling::from_percent(151).percent(), 100);
    }

    #[test]
    fn scaled_size_and_back() {
        let f = format(1024, 600);
        let s = Scaling::from_percent(50);
        assert_eq!(s.scaled_size(&f), (512, 300));
        assert_eq!(s.to_source(256, f.width), 512);
        assert_eq!(s.to_source(511, f.width), 1022);
        assert_eq!(
            s.rect_to_source(Rect::new(0, 0, 512, 300), &f),
            f.full_rect()
        );
    }
}
