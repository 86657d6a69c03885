//! # vncd-core
//!
//! Capture pipeline for a remote-framebuffer display server.
//!
//! This crate contains:
//! - **Screen**: format resolution, snapshot capture, orientation
//!   tracking, change detection and the update scheduler
//! - **Bridge**: the traits the pipeline drives (`ProtocolBridge`,
//!   `RestartRequester`) and the input/clipboard boundaries
//! - **Error**: `VncdError`, a `thiserror`-based error type classified
//!   by `ErrorClass`

pub mod bridge;
pub mod error;
pub mod screen;

// ── Re-exports for ergonomic usage ───────────────────────────────

pub use bridge::{
    ButtonMask, ClipboardSink, EngineActivity, InputEvent, InputSink, ProtocolBridge,
    RestartRequester,
};
pub use error::{ErrorClass, VncdError};
pub use screen::{
    ChangeDetector, Compositor, DisplayId, FormatResolver, FrameBuffer, OrientationTracker, Rect,
    Rotation, RunOutcome, Scaling, SchedulerConfig, ScreenFormat, SharedFrameBuffer, Snapshot,
    SurfaceCapturer, TickOutcome, UpdateScheduler,
};
