//! Linux framebuffer compositor.
//!
//! Reads display geometry from sysfs (`/sys/class/graphics/fbN`) and
//! pixels from the framebuffer device (`/dev/fbN`):
//!
//! | sysfs file       | used for                         |
//! |------------------|----------------------------------|
//! | `modes`          | visible width and height         |
//! | `virtual_size`   | fallback when `modes` is missing |
//! | `bits_per_pixel` | platform format identifier       |
//! | `stride`         | row pitch                        |
//! | `rotate`         | quarter turns                    |
//!
//! Geometry is re-read on every snapshot so a mode switch shows up as
//! a size mismatch rather than as garbage.
//!
//! # Platform
//!
//! Pixel reads use positional reads and are **unix-only**. On other
//! platforms the types are still defined but every call fails.

use std::fs::File;
use std::path::{Path, PathBuf};

use tracing::debug;
use vncd_core::screen::format::hal;
use vncd_core::{Compositor, DisplayId, Rotation, Snapshot, VncdError};

use crate::config::ScreenConfig;

// ── FbCompositor ─────────────────────────────────────────────────

/// Compositor backed by a Linux framebuffer device.
pub struct FbCompositor {
    device: PathBuf,
    sysfs: PathBuf,
    file: Option<File>,
    format_override: Option<i32>,
}

impl FbCompositor {
    pub fn new(device: impl Into<PathBuf>, sysfs: impl Into<PathBuf>) -> Self {
        Self {
            device: device.into(),
            sysfs: sysfs.into(),
            file: None,
            format_override: None,
        }
    }

    pub fn from_config(config: &ScreenConfig) -> Self {
        let mut fb = Self::new(&config.fb_device, &config.sysfs_dir);
        if config.pixel_format > 0 {
            fb.format_override = Some(config.pixel_format);
        }
        fb
    }

    fn read_attr(&self, name: &str) -> Result<String, VncdError> {
        let path = self.sysfs.join(name);
        std::fs::read_to_string(&path)
            .map(|s| s.trim().to_string())
            .map_err(|e| VncdError::DisplayUnavailable(format!("{}: {e}", path.display())))
    }

    fn read_number(&self, name: &str) -> Result<u32, VncdError> {
        let text = self.read_attr(name)?;
        text.parse()
            .map_err(|_| VncdError::DisplayUnavailable(format!("{name}: unexpected value {text:?}")))
    }

    /// Visible `(width, height)`.
    fn geometry(&self) -> Result<(u32, u32), VncdError> {
        let mode = self
            .read_attr("modes")
            .ok()
            .and_then(|modes| modes.lines().next().and_then(parse_mode));
        if let Some(size) = mode {
            return Ok(size);
        }
        let text = self.read_attr("virtual_size")?;
        parse_pair(&text, ',')
            .ok_or_else(|| VncdError::DisplayUnavailable(format!("virtual_size: {text:?}")))
    }

    fn pixel_format(&self, bits_per_pixel: u32) -> Result<i32, VncdError> {
        if let Some(id) = self.format_override {
            return Ok(id);
        }
        match bits_per_pixel {
            32 => Ok(hal::BGRA_8888),
            24 => Ok(hal::RGB_888),
            16 => Ok(hal::RGB_565),
            other => Err(VncdError::UnsupportedFormat(format!(
                "{other} bpp framebuffer"
            ))),
        }
    }
}

impl Compositor for FbCompositor {
    type Snapshot = FbSnapshot;

    fn internal_display(&mut self) -> Result<DisplayId, VncdError> {
        let file = File::open(&self.device)
            .map_err(|e| VncdError::DisplayUnavailable(format!("{}: {e}", self.device.display())))?;
        self.file = Some(file);
        debug!("opened {}", self.device.display());
        Ok(DisplayId(0))
    }

    fn capture(&mut self, _display: DisplayId) -> Result<Option<FbSnapshot>, VncdError> {
        let (width, height) = self.geometry()?;
        let bits_per_pixel = self.read_number("bits_per_pixel")?;
        let stride = match self.read_number("stride") {
            Ok(s) => s as usize,
            Err(_) => width as usize * bits_per_pixel as usize / 8,
        };
        let pixel_format = self.pixel_format(bits_per_pixel)?;

        let Some(file) = self.file.as_ref() else {
            return Err(VncdError::DisplayUnavailable("framebuffer not open".into()));
        };
        let file = file.try_clone()?;

        Ok(Some(FbSnapshot {
            width,
            height,
            stride,
            pixel_format,
            file,
            data: Vec::new(),
        }))
    }

    fn rotation(&mut self, _display: DisplayId) -> Result<Rotation, VncdError> {
        match self.read_number("rotate") {
            Ok(turns) => Ok(Rotation::from_quarter_turns((turns % 4) as u8)),
            // Drivers without rotation support never rotate.
            Err(_) if !self.sysfs.join("rotate").exists() => Ok(Rotation::Deg0),
            Err(e) => Err(VncdError::Orientation(e.to_string())),
        }
    }
}

// ── FbSnapshot ───────────────────────────────────────────────────

/// One read of the framebuffer device.
pub struct FbSnapshot {
    width: u32,
    height: u32,
    stride: usize,
    pixel_format: i32,
    file: File,
    data: Vec<u8>,
}

impl Snapshot for FbSnapshot {
    fn width(&self) -> u32 {
        self.width
    }

    fn height(&self) -> u32 {
        self.height
    }

    fn stride(&self) -> usize {
        self.stride
    }

    fn pixel_format(&self) -> i32 {
        self.pixel_format
    }

    fn lock(&mut self) -> Result<(), VncdError> {
        self.data = vec![0u8; self.stride * self.height as usize];
        read_at(&self.file, &mut self.data, 0)?;
        Ok(())
    }

    fn mapped(&self) -> &[u8] {
        &self.data
    }

    fn unlock(&mut self) {
        self.data = Vec::new();
    }
}

#[cfg(unix)]
fn read_at(file: &File, buf: &mut [u8], offset: u64) -> Result<(), VncdError> {
    use std::os::unix::fs::FileExt;
    file.read_exact_at(buf, offset)?;
    Ok(())
}

#[cfg(not(unix))]
fn read_at(_file: &File, _buf: &mut [u8], _offset: u64) -> Result<(), VncdError> {
    Err(VncdError::DisplayUnavailable(
        "framebuffer capture is only available on unix".into(),
    ))
}

// ── Parsing helpers ──────────────────────────────────────────────

/// Parse a sysfs mode line such as `U:1920x1080p-60`.
fn parse_mode(line: &str) -> Option<(u32, u32)> {
    let body = line.split_once(':').map_or(line, |(_, rest)| rest);
    let (w, rest) = body.split_once('x')?;
    let h: String = rest.chars().take_while(char::is_ascii_digit).collect();
    Some((w.parse().ok()?, h.parse().ok()?))
}

fn parse_pair(text: &str, sep: char) -> Option<(u32, u32)> {
    let (a, b) = text.split_once(sep)?;
    Some((a.trim().parse().ok()?, b.trim().parse().ok()?))
}

/// Whether `path` looks like a framebuffer sysfs directory.
pub fn is_fb_sysfs(path: &Path) -> bool {
    path.join("bits_per_pixel").exists()
}

// ── Tests ────────────────────────────────────────────────────────
