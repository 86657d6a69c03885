//! Domain-specific error types for the capture pipeline.
//!
//! All fallible operations return `Result<T, VncdError>`. Components
//! below the scheduler never decide process lifecycle: they report a
//! typed error and [`VncdError::class`] tells the scheduler which kind
//! of failure it is looking at.

use thiserror::Error;

/// The canonical error type for the capture pipeline.
#[derive(Debug, Error)]
pub enum VncdError {
    // ── Format Errors ────────────────────────────────────────────
    /// The platform handed us a zero or negative format identifier.
    #[error("invalid pixel format identifier: {0}")]
    InvalidFormat(i32),

    /// The identifier is outside the known format table.
    #[error("no such pixel format: {0:#x}")]
    NoSuchFormat(i32),

    /// The caller-supplied result structure carries a foreign tag.
    #[error("pixel format info version mismatch: expected {expected}, got {actual}")]
    VersionMismatch { expected: u32, actual: u32 },

    /// The format resolved, but no consumer can serve it.
    #[error("unsupported pixel layout: {0}")]
    UnsupportedFormat(String),

    // ── Display Errors ───────────────────────────────────────────
    /// No internal/physical display could be found or queried.
    #[error("display unavailable: {0}")]
    DisplayUnavailable(String),

    /// The compositor returned a null or zero-sized snapshot.
    #[error("compositor returned an empty snapshot")]
    EmptySnapshot,

    /// The snapshot no longer matches the registered geometry.
    #[error("snapshot size mismatch: expected {expected} bytes, got {actual}")]
    SizeMismatch { expected: usize, actual: usize },

    /// The snapshot's pixel format differs from the registered one.
    #[error("snapshot pixel format changed: expected {expected:#x}, got {actual:#x}")]
    FormatChanged { expected: i32, actual: i32 },

    /// Width or height is zero.
    #[error("invalid screen geometry: {width}x{height}")]
    InvalidGeometry { width: u32, height: u32 },

    /// The display orientation could not be read.
    #[error("orientation query failed: {0}")]
    Orientation(String),

    // ── Lifecycle Errors ─────────────────────────────────────────
    /// The service-control restart request failed.
    #[error("restart request failed: {0}")]
    Restart(String),

    /// A frame buffer lock was poisoned by a panicking reader.
    #[error("frame buffer lock poisoned")]
    BufferPoisoned,

    /// The protocol engine reported a failure.
    #[error("protocol engine error: {0}")]
    Bridge(String),

    /// Platform I/O failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Catch-all for errors that do not fit another variant.
    #[error("{0}")]
    Other(String),
}

// ── ErrorClass ───────────────────────────────────────────────────

/// How the scheduler treats an error once the update loop is running.
///
/// During initialisation every error is fatal regardless of class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Terminate after cleanup.
    Fatal,
    /// Geometry drifted underneath us: rebuild the whole process.
    Reinitialize,
    /// Skip this tick and retry on the next wake.
    Transient,
    /// Unsupported or unrecognised pixel format.
    PolicyRejection,
}

impl VncdError {
    /// Classify this error for the scheduler.
    pub fn class(&self) -> ErrorClass {
        match self {
            VncdError::InvalidFormat(_)
            | VncdError::NoSuchFormat(_)
            | VncdError::UnsupportedFormat(_) => ErrorClass::PolicyRejection,
            VncdError::SizeMismatch { .. } | VncdError::FormatChanged { .. } => {
                ErrorClass::Reinitialize
            }
            VncdError::DisplayUnavailable(_)
            | VncdError::EmptySnapshot
            | VncdError::Orientation(_)
            | VncdError::Io(_) => ErrorClass::Transient,
            VncdError::VersionMismatch { .. }
            | VncdError::InvalidGeometry { .. }
            | VncdError::Restart(_)
            | VncdError::BufferPoisoned
            | VncdError::Bridge(_)
            | VncdError::Other(_) => ErrorClass::Fatal,
        }
    }

    /// Shorthand for `class() == ErrorClass::Transient`.
    pub fn is_transient(&self) -> bool {
        self.class() == ErrorClass::Transient
    }
}

// ── Convenient From implementations ──────────────────────────────

impl From<String> for VncdError {
    fn from(s: String) -> Self {
        VncdError::Other(s)
    }
}

impl From<&str> for VncdError {
    fn from(s: &str) -> Self {
        VncdError::Other(s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_messages() {
        let e = VncdError::SizeMismatch {
            expected: 2_457_600,
            actual: 1_228_800,
        };
        assert!(e.to_string().contains("2457600"));
        assert!(e.to_string().contains("1228800"));

        let e = VncdError::NoSuchFormat(0x22);
        assert!(e.to_string().contains("0x22"));
    }

    #[test]
    fn classification() {
        assert_eq!(VncdError::EmptySnapshot.class(), ErrorClass::Transient);
        assert_eq!(
            VncdError::SizeMismatch { expected: 4, actual: 8 }.class(),
            ErrorClass::Reinitialize
        );
        assert_eq!(VncdError::InvalidFormat(0).class(), ErrorClass::PolicyRejection);
        assert_eq!(
            VncdError::VersionMismatch { expected: 1, actual: 2 }.class(),
            ErrorClass::Fatal
        );
        assert!(VncdError::DisplayUnavailable("gone".into()).is_transient());
    }

    #[test]
    fn from_string() {
        let e: VncdError = "something broke".into();
        assert!(matches!(e, VncdError::Other(_)));
    }

    #[test]
    fn from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "no fb");
        let e: VncdError = io_err.into();
        assert!(matches!(e, VncdError::Io(_)));
        assert!(e.is_transient());
    }
}
