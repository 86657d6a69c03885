//! Pixel-format resolution.
//!
//! Maps the opaque format identifier reported by the platform
//! compositor onto a canonical channel layout. Identifiers follow the
//! platform HAL numbering (see [`hal`]).

use tracing::debug;

use crate::error::VncdError;
use crate::screen::types::ChannelLayout;

/// Platform HAL pixel-format identifiers understood by the resolver.
pub mod hal {
    pub const RGBA_8888: i32 = 1;
    pub const RGBX_8888: i32 = 2;
    pub const RGB_888: i32 = 3;
    pub const RGB_565: i32 = 4;
    pub const BGRA_8888: i32 = 5;
    pub const RGBA_5551: i32 = 6;
    pub const RGBA_4444: i32 = 7;
    pub const A_8: i32 = 8;
    pub const L_8: i32 = 9;
    pub const LA_88: i32 = 10;
    pub const RGB_332: i32 = 11;

    pub const YCBCR_422_SP: i32 = 0x10;
    pub const YCRCB_420_SP: i32 = 0x11;
    pub const YCBCR_422_I: i32 = 0x14;
    pub const BLOB: i32 = 0x21;
    pub const IMPLEMENTATION_DEFINED: i32 = 0x22;
    pub const YV12: i32 = 0x3231_5659;
}

// ── Components ───────────────────────────────────────────────────

/// Which channels a format carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Components {
    #[default]
    None,
    Alpha,
    Rgb,
    Rgba,
    Luminance,
    LuminanceAlpha,
    /// Planar / semi-planar chroma-subsampled data: one opaque 8-bit
    /// sample plane, no real color channels.
    Opaque,
}

impl Components {
    /// Whether a true-colour consumer can interpret the pixels.
    pub const fn is_true_colour(self) -> bool {
        matches!(
            self,
            Components::Rgb | Components::Rgba | Components::Luminance | Components::LuminanceAlpha
        )
    }
}

// ── ChannelBits ──────────────────────────────────────────────────

/// A channel expressed as the half-open bit range `[low, high)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ChannelBits {
    pub high: u8,
    pub low: u8,
}

impl ChannelBits {
    const fn new(high: u8, low: u8) -> Self {
        Self { high, low }
    }

    pub const fn width(self) -> u8 {
        self.high.saturating_sub(self.low)
    }

    /// Bit mask of the positions this channel occupies.
    pub const fn mask(self) -> u64 {
        let w = self.width();
        if w == 0 {
            0
        } else {
            (u64::MAX >> (64 - w as u32)) << self.low as u32
        }
    }

    pub const fn layout(self) -> ChannelLayout {
        ChannelLayout::new(self.low, self.width())
    }
}

// ── PixelFormatInfo ──────────────────────────────────────────────

/// Result structure filled in by [`FormatResolver::resolve`].
///
/// `version` is a size tag: the resolver refuses to fill a structure
/// whose tag differs from its own, which catches layout drift between
/// the resolver and whoever allocated the structure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PixelFormatInfo {
    pub version: u32,
    pub format: i32,
    pub bytes_per_pixel: u8,
    pub bits_per_pixel: u8,
    pub alpha: ChannelBits,
    pub red: ChannelBits,
    pub green: ChannelBits,
    pub blue: ChannelBits,
    pub components: Components,
}

impl PixelFormatInfo {
    /// The tag this build of the resolver expects.
    pub const VERSION: u32 = std::mem::size_of::<PixelFormatInfo>() as u32;

    /// Number of distinct bit positions used by the channels.
    ///
    /// Luminance formats map red, green and blue onto the same bits,
    /// so those are counted once.
    pub fn occupied_bits(&self) -> u32 {
        (self.alpha.mask() | self.red.mask() | self.green.mask() | self.blue.mask()).count_ones()
    }
}

impl Default for PixelFormatInfo {
    fn default() -> Self {
        Self {
            version: Self::VERSION,
            format: 0,
            bytes_per_pixel: 0,
            bits_per_pixel: 0,
            alpha: ChannelBits::default(),
            red: ChannelBits::default(),
            green: ChannelBits::default(),
            blue: ChannelBits::default(),
            components: Components::None,
        }
    }
}

// ── Format table ─────────────────────────────────────────────────

struct TableEntry {
    bytes: u8,
    bits: u8,
    alpha: ChannelBits,
    red: ChannelBits,
    green: ChannelBits,
    blue: ChannelBits,
    components: Components,
}

const fn entry(
    bytes: u8,
    bits: u8,
    [ah, al, rh, rl, gh, gl, bh, bl]: [u8; 8],
    components: Components,
) -> TableEntry {
    TableEntry {
        bytes,
        bits,
        alpha: ChannelBits::new(ah, al),
        red: ChannelBits::new(rh, rl),
        green: ChannelBits::new(gh, gl),
        blue: ChannelBits::new(bh, bl),
        components,
    }
}

/// Indexed by HAL identifier. Slot 0 is the invalid format.
static FORMAT_TABLE: [TableEntry; 12] = [
    entry(0, 0, [0, 0, 0, 0, 0, 0, 0, 0], Components::None),
    entry(4, 32, [32, 24, 8, 0, 16, 8, 24, 16], Components::Rgba), // RGBA_8888
    entry(4, 32, [0, 0, 8, 0, 16, 8, 24, 16], Components::Rgb),    // RGBX_8888
    entry(3, 24, [0, 0, 8, 0, 16, 8, 24, 16], Components::Rgb),    // RGB_888
    entry(2, 16, [0, 0, 16, 11, 11, 5, 5, 0], Components::Rgb),    // RGB_565
    entry(4, 32, [32, 24, 24, 16, 16, 8, 8, 0], Components::Rgba), // BGRA_8888
    entry(2, 16, [1, 0, 16, 11, 11, 6, 6, 1], Components::Rgba),   // RGBA_5551
    entry(2, 16, [4, 0, 16, 12, 12, 8, 8, 4], Components::Rgba),   // RGBA_4444
    entry(1, 8, [8, 0, 0, 0, 0, 0, 0, 0], Components::Alpha),      // A_8
    entry(1, 8, [0, 0, 8, 0, 8, 0, 8, 0], Components::Luminance),  // L_8
    entry(2, 16, [16, 8, 8, 0, 8, 0, 8, 0], Components::LuminanceAlpha), // LA_88
    entry(1, 8, [0, 0, 8, 5, 5, 2, 2, 0], Components::Rgb),        // RGB_332
];

// ── FormatResolver ───────────────────────────────────────────────

/// Resolves platform pixel-format identifiers to channel layouts.
///
/// Pure apart from diagnostic logging. The only state is the host
/// override: some hosts (firmware KMS on single-board computers)
/// report RGBA while scanning out BGRA, and the override substitutes
/// BGRA_8888 before any other check runs.
#[derive(Debug, Clone, Copy, Default)]
pub struct FormatResolver {
    force_bgra: bool,
}

impl FormatResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolver that always treats the reported format as BGRA_8888.
    pub fn with_bgra_override(force_bgra: bool) -> Self {
        Self { force_bgra }
    }

    /// Number of identifiers addressable through the table.
    pub fn table_len() -> usize {
        FORMAT_TABLE.len()
    }

    /// Fill `info` with the layout of `format`.
    ///
    /// # Errors
    ///
    /// - [`VncdError::InvalidFormat`] for identifiers `<= 0`.
    /// - [`VncdError::VersionMismatch`] if `info.version` is foreign.
    /// - [`VncdError::NoSuchFormat`] for identifiers past the table.
    pub fn resolve(&self, format: i32, info: &mut PixelFormatInfo) -> Result<(), VncdError> {
        debug!("retrieving pixel information for format {format}");

        let mut format = format;
        if self.force_bgra {
            debug!("host override: substituting BGRA_8888 for format {format}");
            format = hal::BGRA_8888;
        }

        if format <= 0 {
            return Err(VncdError::InvalidFormat(format));
        }

        if info.version != PixelFormatInfo::VERSION {
            return Err(VncdError::VersionMismatch {
                expected: PixelFormatInfo::VERSION,
                actual: info.version,
            });
        }

        match format {
            hal::RGBA_8888 => debug!("detected RGBA_8888"),
            hal::RGBX_8888 => debug!("detected RGBX_8888"),
            hal::RGB_888 => debug!("detected RGB_888"),
            hal::RGB_565 => debug!("detected RGB_565"),
            hal::BGRA_8888 => debug!("detected BGRA_8888"),
            hal::RGBA_5551 => debug!("detected RGBA_5551"),
            hal::RGBA_4444 => debug!("detected RGBA_4444"),
            hal::IMPLEMENTATION_DEFINED => debug!("detected IMPLEMENTATION_DEFINED"),
            hal::BLOB => debug!("detected BLOB"),
            _ => debug!("format {format:#x} has no dedicated diagnostic"),
        }

        let chroma_bits = match format {
            hal::YCBCR_422_SP | hal::YCBCR_422_I => Some(16),
            hal::YCRCB_420_SP | hal::YV12 => Some(12),
            _ => None,
        };
        if let Some(bits) = chroma_bits {
            debug!("detected chroma-subsampled format {format:#x} ({bits} bpp)");
            let sample = ChannelBits::new(8, 0);
            info.format = format;
            info.bytes_per_pixel = 1;
            info.bits_per_pixel = bits;
            info.alpha = ChannelBits::default();
            info.red = sample;
            info.green = sample;
            info.blue = sample;
            info.components = Components::Opaque;
            return Ok(());
        }

        let Some(e) = usize::try_from(format).ok().and_then(|i| FORMAT_TABLE.get(i)) else {
            return Err(VncdError::NoSuchFormat(format));
        };

        info.format = format;
        info.bytes_per_pixel = e.bytes;
        info.bits_per_pixel = e.bits;
        info.alpha = e.alpha;
        info.red = e.red;
        info.green = e.green;
        info.blue = e.blue;
        info.components = e.components;
        Ok(())
    }

    /// Convenience wrapper: resolve into a freshly tagged structure.
    pub fn describe(&self, format: i32) -> Result<PixelFormatInfo, VncdError> {
        let mut info = PixelFormatInfo::default();
        self.resolve(format, &mut info)?;
        Ok(info)
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    const CHROMA: [i32; 4] = [
        hal::YCBCR_422_SP,
        hal::YCRCB_420_SP,
        hal::YCBCR_422_I,
        hal::YV12,
    ];

    #[test]
    fn channel_bits_never_exceed_bpp() {
        let resolver = FormatResolver::new();
        let ids = (1..FormatResolver::table_len() as i32).chain(CHROMA);
        for id in ids {
            let info = resolver.describe(id).unwrap();
            assert!(
                info.occupied_bits() <= info.bits_per_pixel as u32,
                "format {id:#x}: {} bits in {} bpp",
                info.occupied_bits(),
                info.bits_per_pixel
            );
        }
    }

    #[test]
    fn rgb565_layout() {
        let info = FormatResolver::new().describe(hal::RGB_565).unwrap();
        assert_eq!(info.bits_per_pixel, 16);
        assert_eq!(info.red.layout(), ChannelLayout::new(11, 5));
        assert_eq!(info.green.layout(), ChannelLayout::new(5, 6));
        assert_eq!(info.blue.layout(), ChannelLayout::new(0, 5));
        assert_eq!(info.components, Components::Rgb);
    }

    #[test]
    fn bgra_layout() {
        let info = FormatResolver::new().describe(hal::BGRA_8888).unwrap();
        assert_eq!(info.red.layout(), ChannelLayout::new(16, 8));
        assert_eq!(info.blue.layout(), ChannelLayout::new(0, 8));
        assert_eq!(info.alpha.layout(), ChannelLayout::new(24, 8));
    }

    #[test]
    fn chroma_formats_are_opaque() {
        let resolver = FormatResolver::new();
        let info = resolver.describe(hal::YCBCR_422_SP).unwrap();
        assert_eq!(info.bits_per_pixel, 16);
        assert_eq!(info.components, Components::Opaque);
        assert!(!info.components.is_true_colour());

        let info = resolver.describe(hal::YV12).unwrap();
        assert_eq!(info.bits_per_pixel, 12);
        assert_eq!(info.bytes_per_pixel, 1);
    }

    #[test]
    fn non_positive_identifier_is_invalid() {
        let resolver = FormatResolver::new();
        assert!(matches!(resolver.describe(0), Err(VncdError::InvalidFormat(0))));
        assert!(matches!(resolver.describe(-3), Err(VncdError::InvalidFormat(-3))));
    }

    #[test]
    fn out_of_table_identifier_is_missing() {
        let resolver = FormatResolver::new();
        assert!(matches!(
            resolver.describe(hal::IMPLEMENTATION_DEFINED),
            Err(VncdError::NoSuchFormat(hal::IMPLEMENTATION_DEFINED))
        ));
        assert!(matches!(resolver.describe(12), Err(VncdError::NoSuchFormat(12))));
    }

    #[test]
    fn foreign_version_tag_is_rejected() {
        let mut info = PixelFormatInfo {
            version: 7,
            ..PixelFormatInfo::default()
        };
        let err = FormatResolver::new()
            .resolve(hal::RGBA_8888, &mut info)
            .unwrap_err();
        assert!(matches!(err, VncdError::VersionMismatch { actual: 7, .. }));
        // Nothing was filled in.
        assert_eq!(info.bits_per_pixel, 0);
    }

    #[test]
    fn override_runs_before_validation() {
        let resolver = FormatResolver::with_bgra_override(true);
        // Even an invalid identifier resolves once substituted.
        let info = resolver.describe(0).unwrap();
        assert_eq!(info.format, hal::BGRA_8888);
        let info = resolver.describe(hal::RGBA_8888).unwrap();
        assert_eq!(info.red.layout(), ChannelLayout::new(16, 8));
    }
}
