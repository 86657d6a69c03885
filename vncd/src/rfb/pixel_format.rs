//! RFB `PIXEL_FORMAT` and pixel translation.
//!
//! Wire layout (16 bytes, big-endian fields):
//!
//! ```text
//! bpp:u8  depth:u8  big_endian:u8  true_colour:u8
//! red_max:u16  green_max:u16  blue_max:u16
//! red_shift:u8  green_shift:u8  blue_shift:u8  pad:[u8;3]
//! ```

use bytes::{Buf, BufMut, BytesMut};
use vncd_core::screen::PixelDepth;
use vncd_core::{ScreenFormat, VncdError};

use crate::error::ServerError;

/// Encoded length of a pixel format.
pub const WIRE_LEN: usize = 16;

/// A true-colour pixel layout as exchanged with clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WirePixelFormat {
    pub bits_per_pixel: u8,
    pub depth: u8,
    pub big_endian: bool,
    pub true_colour: bool,
    pub red_max: u16,
    pub green_max: u16,
    pub blue_max: u16,
    pub red_shift: u8,
    pub green_shift: u8,
    pub blue_shift: u8,
}

impl WirePixelFormat {
    /// The layout advertised in ServerInit.
    ///
    /// RFB has no packed 24-bit pixels, so 24 bpp frames are offered as
    /// 32 bpp with the same channel shifts and widened on the way out.
    pub fn from_screen(format: &ScreenFormat) -> Result<Self, VncdError> {
        let mut advertised = Self::stored(format)?;
        if advertised.bits_per_pixel == 24 {
            advertised.bits_per_pixel = 32;
        }
        Ok(advertised)
    }

    /// The layout frames are stored in.
    pub fn stored(format: &ScreenFormat) -> Result<Self, VncdError> {
        if PixelDepth::for_bits(format.bits_per_pixel).is_none() {
            return Err(VncdError::UnsupportedFormat(format!(
                "{} bpp frames cannot be served raw",
                format.bits_per_pixel
            )));
        }
        if !format.components.is_true_colour() {
            return Err(VncdError::UnsupportedFormat(format!(
                "{:?} pixels carry no colour channels",
                format.components
            )));
        }
        Ok(Self {
            bits_per_pixel: format.bits_per_pixel,
            depth: format.depth().min(format.bits_per_pixel),
            big_endian: cfg!(target_endian = "big"),
            true_colour: true,
            red_max: format.red.max(),
            green_max: format.green.max(),
            blue_max: format.blue.max(),
            red_shift: format.red.shift,
            green_shift: format.green.shift,
            blue_shift: format.blue.shift,
        })
    }

    pub fn bytes_per_pixel(&self) -> usize {
        self.bits_per_pixel as usize / 8
    }

    /// Reject layouts this server cannot produce.
    pub fn validate(&self) -> Result<(), ServerError> {
        if !matches!(self.bits_per_pixel, 8 | 16 | 32) {
            return Err(ServerError::Protocol(format!(
                "unsupported client bpp {}",
                self.bits_per_pixel
            )));
        }
        if !self.true_colour {
            return Err(ServerError::Protocol("colour-map formats are not supported".into()));
        }
        let widest = self.red_shift.max(self.green_shift).max(self.blue_shift);
        if widest >= self.bits_per_pixel {
            return Err(ServerError::Protocol(format!(
                "channel shift {widest} outside a {} bpp pixel",
                self.bits_per_pixel
            )));
        }
        Ok(())
    }

    pub fn encode(&self, dst: &mut impl BufMut) {
        dst.put_u8(self.bits_per_pixel);
        dst.put_u8(self.depth);
        dst.put_u8(self.big_endian as u8);
        dst.put_u8(self.true_colour as u8);
        dst.put_u16(self.red_max);
        dst.put_u16(self.green_max);
        dst.put_u16(self.blue_max);
        dst.put_u8(self.red_shift);
        dst.put_u8(self.green_shift);
        dst.put_u8(self.blue_shift);
        dst.put_bytes(0, 3);
    }

    /// Read a format from exactly [`WIRE_LEN`] bytes.
    pub fn decode(src: &mut impl Buf) -> Self {
        let format = Self {
            bits_per_pixel: src.get_u8(),
            depth: src.get_u8(),
            big_endian: src.get_u8() != 0,
            true_colour: src.get_u8() != 0,
            red_max: src.get_u16(),
            green_max: src.get_u16(),
            blue_max: src.get_u16(),
            red_shift: src.get_u8(),
            green_shift: src.get_u8(),
            blue_shift: src.get_u8(),
        };
        src.advance(3);
        format
    }

    fn read(&self, px: &[u8]) -> u32 {
        match (self.bits_per_pixel, self.big_endian) {
            (8, _) => px[0] as u32,
            (16, true) => u16::from_be_bytes([px[0], px[1]]) as u32,
            (16, false) => u16::from_le_bytes([px[0], px[1]]) as u32,
            (24, true) => u32::from_be_bytes([0, px[0], px[1], px[2]]),
            (24, false) => u32::from_le_bytes([px[0], px[1], px[2], 0]),
            (_, true) => u32::from_be_bytes([px[0], px[1], px[2], px[3]]),
            (_, false) => u32::from_le_bytes([px[0], px[1], px[2], px[3]]),
        }
    }

    fn write(&self, value: u32, dst: &mut BytesMut) {
        match (self.bits_per_pixel, self.big_endian) {
            (8, _) => dst.put_u8(value as u8),
            (16, true) => dst.put_u16(value as u16),
            (16, false) => dst.put_u16_le(value as u16),
            (24, true) => dst.put_uint(value as u64, 3),
            (24, false) => dst.put_uint_le(value as u64, 3),
            (_, true) => dst.put_u32(value),
            (_, false) => dst.put_u32_le(value),
        }
    }
}

/// Rescale a channel value from `[0, from_max]` to `[0, to_max]`.
fn rescale(value: u32, from_max: u16, to_max: u16) -> u32 {
    if from_max == 0 {
        return 0;
    }
    if from_max == to_max {
        return value;
    }
    (value * to_max as u32 + from_max as u32 / 2) / from_max as u32
}

/// Append `src` (pixels in `from`) to `dst`, converted to `to`.
pub fn translate(src: &[u8], from: &WirePixelFormat, to: &WirePixelFormat, dst: &mut BytesMut) {
    if from == to {
        dst.extend_from_slice(src);
        return;
    }
    let step = from.bytes_per_pixel();
    dst.reserve(src.len() / step * to.bytes_per_pixel());

    for px in src.chunks_exact(step) {
        let v = from.read(px);
        let r = rescale((v >> from.red_shift) & from.red_max as u32, from.red_max, to.red_max);
        let g = rescale((v >> from.green_shift) & from.green_max as u32, from.green_max, to.green_max);
        let b = rescale((v >> from.blue_shift) & from.blue_max as u32, from.blue_max, to.blue_max);
        to.write(
            (r << to.red_shift) | (g << to.green_shift) | (b << to.blue_shift),
            dst,
        );
    }
}

// ── Tests ────────────────────────────────────────────────────────
