//! Display-surface capture through the platform compositor.
//!
//! The compositor is abstracted by [`Compositor`] and [`Snapshot`];
//! [`SurfaceCapturer`] drives one snapshot per call:
//!
//! 1. Request a snapshot of the active display.
//! 2. Map it for CPU read access.
//! 3. Copy exactly `ScreenFormat::size` bytes out, dropping row padding.
//! 4. Unmap and release the snapshot before returning.
//!
//! The mapping never outlives the call: [`Mapped`] unmaps on drop, so
//! every early return (including errors) releases it.
//!
//! # Orientation
//!
//! Frames are captured in the display's native orientation and copied
//! verbatim; no rotation happens in process. The width and height the
//! compositor reports at startup become the advertised geometry, so a
//! rotation that flips the layout class can only be absorbed by a full
//! restart (see [`OrientationTracker`](crate::screen::OrientationTracker)).

use tracing::{debug, info, trace};

use crate::error::VncdError;
use crate::screen::format::FormatResolver;
use crate::screen::orientation::RotationSource;
use crate::screen::types::{FrameBuffer, RawFrame, Rotation, ScreenFormat, frame_size};

// ── Platform seam ────────────────────────────────────────────────

/// Opaque handle to a physical display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DisplayId(pub u64);

/// One snapshot buffer handed out by the compositor.
///
/// Implementations map the buffer in [`lock`](Self::lock), expose it
/// through [`mapped`](Self::mapped) and unmap in
/// [`unlock`](Self::unlock). Dropping the snapshot releases it.
pub trait Snapshot {
    /// Width in pixels.
    fn width(&self) -> u32;
    /// Height in pixels.
    fn height(&self) -> u32;
    /// Row pitch in bytes.
    fn stride(&self) -> usize;
    /// Platform pixel-format identifier.
    fn pixel_format(&self) -> i32;

    fn lock(&mut self) -> Result<(), VncdError>;
    /// The mapped bytes; empty while unlocked.
    fn mapped(&self) -> &[u8];
    fn unlock(&mut self);
}

/// The platform compositor service.
pub trait Compositor {
    type Snapshot: Snapshot;

    /// Find the internal (built-in) display.
    fn internal_display(&mut self) -> Result<DisplayId, VncdError>;

    /// Take one snapshot. `Ok(None)` means the compositor returned no
    /// buffer at all.
    fn capture(&mut self, display: DisplayId) -> Result<Option<Self::Snapshot>, VncdError>;

    /// Current orientation of `display`.
    fn rotation(&mut self, display: DisplayId) -> Result<Rotation, VncdError>;
}

// ── Mapped ───────────────────────────────────────────────────────

/// Scoped read mapping of a snapshot.
struct Mapped<'a, S: Snapshot> {
    snapshot: &'a mut S,
}

impl<'a, S: Snapshot> Mapped<'a, S> {
    fn map(snapshot: &'a mut S) -> Result<Self, VncdError> {
        snapshot.lock()?;
        Ok(Self { snapshot })
    }

    fn bytes(&self) -> &[u8] {
        self.snapshot.mapped()
    }
}

impl<S: Snapshot> Drop for Mapped<'_, S> {
    fn drop(&mut self) {
        self.snapshot.unlock();
    }
}

// ── SurfaceCapturer ──────────────────────────────────────────────

/// Snapshot-based capturer bound to one display.
pub struct SurfaceCapturer<C: Compositor> {
    compositor: C,
    display: DisplayId,
    width: u32,
    height: u32,
    bits_per_pixel: u8,
    size: usize,
    resolver: FormatResolver,
    /// Identifier as reported by the compositor at startup.
    reported_format: i32,
    /// Identifier after resolution (host overrides applied).
    resolved_format: i32,
}

impl<C: Compositor> SurfaceCapturer<C> {
    /// Acquire the internal display, take an initial snapshot and
    /// derive the live [`ScreenFormat`] from it.
    ///
    /// Every failure here is fatal to the caller.
    pub fn open(
        mut compositor: C,
        resolver: &FormatResolver,
    ) -> Result<(Self, ScreenFormat), VncdError> {
        let display_id = compositor.internal_display()?;
        debug!("using display {}", display_id.0);

        let snapshot = compositor
            .capture(display_id)?
            .ok_or(VncdError::EmptySnapshot)?;
        let (width, height) = (snapshot.width(), snapshot.height());
        let reported_format = snapshot.pixel_format();
        let info = resolver.describe(reported_format)?;
        drop(snapshot);

        let rotation = compositor.rotation(display_id)?;
        let format = ScreenFormat::from_pixel_info(&info, width, height, rotation)?;
        info!(
            "display initialised: {}x{} @ {} bpp, {}",
            format.width, format.height, format.bits_per_pixel, format.rotation
        );

        let capturer = Self {
            compositor,
            display: display_id,
            width: format.width,
            height: format.height,
            bits_per_pixel: format.bits_per_pixel,
            size: format.size,
            resolver: *resolver,
            reported_format,
            resolved_format: info.format,
        };
        Ok((capturer, format))
    }

    /// Bytes produced by one capture.
    pub fn frame_size(&self) -> usize {
        self.size
    }

    pub fn display(&self) -> DisplayId {
        self.display
    }

    pub fn compositor(&self) -> &C {
        &self.compositor
    }

    pub fn compositor_mut(&mut self) -> &mut C {
        &mut self.compositor
    }

    /// Capture one discrete snapshot into a fresh buffer.
    pub fn capture(&mut self) -> Result<RawFrame, VncdError> {
        let mut data = vec![0u8; self.size];
        self.capture_into_slice(&mut data)?;
        Ok(RawFrame {
            width: self.width,
            height: self.height,
            data,
        })
    }

    /// Capture one snapshot directly into `frame`, in place.
    ///
    /// `frame` is only written once the snapshot has been validated,
    /// so a failed capture leaves it untouched.
    pub fn capture_into(&mut self, frame: &mut FrameBuffer) -> Result<(), VncdError> {
        self.capture_into_slice(frame.as_bytes_mut())
    }

    fn capture_into_slice(&mut self, dst: &mut [u8]) -> Result<(), VncdError> {
        if dst.len() != self.size {
            return Err(VncdError::SizeMismatch {
                expected: self.size,
                actual: dst.len(),
            });
        }

        let mut snapshot = self
            .compositor
            .capture(self.display)?
            .ok_or(VncdError::EmptySnapshot)?;

        let (w, h) = (snapshot.width(), snapshot.height());
        if w == 0 || h == 0 {
            return Err(VncdError::EmptySnapshot);
        }
        if (w, h) != (self.width, self.height) {
            return Err(VncdError::SizeMismatch {
                expected: self.size,
                actual: frame_size(self.bits_per_pixel, w, h),
            });
        }
        self.check_format(snapshot.pixel_format(), w, h)?;

        let stride = snapshot.stride();
        let mapped = Mapped::map(&mut snapshot)?;
        let src = mapped.bytes();
        if src.is_empty() {
            return Err(VncdError::EmptySnapshot);
        }

        let row = self.row_bytes();
        match row {
            Some(row) if stride > row => {
                let needed = stride * (h as usize - 1) + row;
                if src.len() < needed {
                    return Err(VncdError::SizeMismatch {
                        expected: needed,
                        actual: src.len(),
                    });
                }
                trace!("copying {h} rows of {row} bytes (stride {stride})");
                for (y, out) in dst.chunks_exact_mut(row).enumerate() {
                    let start = y * stride;
                    out.copy_from_slice(&src[start..start + row]);
                }
            }
            _ => {
                if src.len() < self.size {
                    return Err(VncdError::SizeMismatch {
                        expected: self.size,
                        actual: src.len(),
                    });
                }
                dst.copy_from_slice(&src[..self.size]);
            }
        }
        Ok(())
    }

    /// Reject a snapshot whose pixel format drifted from the one the
    /// live format was derived from.
    fn check_format(&self, reported: i32, w: u32, h: u32) -> Result<(), VncdError> {
        if reported == self.reported_format {
            return Ok(());
        }
        let changed = VncdError::FormatChanged {
            expected: self.resolved_format,
            actual: reported,
        };
        let Ok(info) = self.resolver.describe(reported) else {
            return Err(changed);
        };
        if info.bits_per_pixel != self.bits_per_pixel {
            return Err(VncdError::SizeMismatch {
                expected: self.size,
                actual: frame_size(info.bits_per_pixel, w, h),
            });
        }
        if info.format != self.resolved_format {
            return Err(changed);
        }
        Ok(())
    }

    fn row_bytes(&self) -> Option<usize> {
        (self.bits_per_pixel % 8 == 0).then(|| self.width as usize * self.bits_per_pixel as usize / 8)
    }
}

impl<C: Compositor> RotationSource for SurfaceCapturer<C> {
    fn rotation(&mut self) -> Result<Rotation, VncdError> {
        self.compositor.rotation(self.display)
    }
}

// ── Tests ────────────────────────────────────────────────────────
