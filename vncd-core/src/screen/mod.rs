//! # Screen capture pipeline
//!
//! ## Data flow
//!
//! ```text
//! Compositor ──► SurfaceCapturer ──► current FrameBuffer ──► ChangeDetector
//!      │                                   │                      │ changed?
//!      ▼                                   ▼                      ▼
//! OrientationTracker              ProtocolBridge reads ◄── mark_dirty(full frame)
//! ```
//!
//! [`UpdateScheduler`] owns every stage and drives one tick at a time.
//!
//! ## Sub-modules
//!
//! | Module        | Purpose                                              |
//! |---------------|------------------------------------------------------|
//! | `types`       | ScreenFormat, FrameBuffer, Rotation, Rect            |
//! | `format`      | Platform pixel-format table and resolver             |
//! | `pixel`       | Generic 8/16/32-bit pixel paths and scaling          |
//! | `capture`     | Compositor seam and snapshot capture                 |
//! | `orientation` | Rotation polling and restart decisions               |
//! | `delta`       | Whole-frame change detection                         |
//! | `backoff`     | Standby backoff between ticks                        |
//! | `scheduler`   | The update loop                                      |

pub mod backoff;
pub mod capture;
pub mod delta;
pub mod format;
pub mod orientation;
pub mod pixel;
pub mod scheduler;
pub mod types;

// ── Re-exports ───────────────────────────────────────────────────

pub use backoff::{SchedulerConfig, StandbyBackoff};
pub use capture::{Compositor, DisplayId, Snapshot, SurfaceCapturer};
pub use delta::ChangeDetector;
pub use format::{ChannelBits, Components, FormatResolver, PixelFormatInfo};
pub use orientation::{OrientationTracker, RotationChange, RotationSource};
pub use pixel::{Pixel, PixelDepth, Scaling};
pub use scheduler::{RunOutcome, SchedulerState, SchedulerStats, TickOutcome, UpdateScheduler};
pub use types::{
    ChannelLayout, FrameBuffer, LayoutClass, RawFrame, Rect, Rotation, ScreenFormat,
    SharedFrameBuffer, frame_size,
};
