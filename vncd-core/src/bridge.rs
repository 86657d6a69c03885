//! Seams to the collaborators outside the capture pipeline.
//!
//! - [`ProtocolBridge`]: the remote-framebuffer engine that owns client
//!   connections and serialises the current frame buffer.
//! - [`RestartRequester`]: the host's service-control mechanism.
//! - [`InputSink`] / [`ClipboardSink`]: where decoded client input and
//!   cut-text go.
//!
//! The pipeline only ever asks the engine three questions (how many
//! clients, is anything requested, what happened while waiting) and
//! gives it one command (this rectangle is dirty).

use std::time::Duration;

use async_trait::async_trait;
use bitflags::bitflags;

use crate::error::VncdError;
use crate::screen::types::{Rect, ScreenFormat, SharedFrameBuffer};

// ── EngineActivity ───────────────────────────────────────────────

/// What the engine handled during one [`ProtocolBridge::process_events`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineActivity {
    /// Inbound protocol messages handled.
    pub events: usize,
    /// Clients that connected.
    pub connected: usize,
    /// Clients that went away.
    pub disconnected: usize,
}

impl EngineActivity {
    pub fn is_active(&self) -> bool {
        self.events > 0 || self.connected > 0 || self.disconnected > 0
    }
}

// ── ProtocolBridge ───────────────────────────────────────────────

/// The remote-framebuffer protocol engine, as seen by the scheduler.
#[async_trait]
pub trait ProtocolBridge: Send {
    /// Advertise the screen geometry and hand over the frame buffer the
    /// engine reads from. Called once, before the first tick.
    fn register(&mut self, format: &ScreenFormat, frame: SharedFrameBuffer) -> Result<(), VncdError>;

    /// Block for up to `timeout`, returning early on inbound activity.
    async fn process_events(&mut self, timeout: Duration) -> Result<EngineActivity, VncdError>;

    /// Number of connected clients.
    fn client_count(&self) -> usize;

    /// Whether any client's requested region is non-empty.
    fn has_pending_request(&self) -> bool;

    /// Declare `rect` as holding new content.
    fn mark_dirty(&mut self, rect: Rect);

    /// Close every client and stop accepting new ones.
    async fn shutdown(&mut self);
}

// ── RestartRequester ─────────────────────────────────────────────

/// Asks the host supervisor to restart this process.
pub trait RestartRequester {
    fn request_restart(&mut self, reason: &str) -> Result<(), VncdError>;
}

// ── Input & clipboard ────────────────────────────────────────────

bitflags! {
    /// Pointer buttons held during a pointer event.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ButtonMask: u8 {
        const LEFT = 1 << 0;
        const MIDDLE = 1 << 1;
        const RIGHT = 1 << 2;
        const WHEEL_UP = 1 << 3;
        const WHEEL_DOWN = 1 << 4;
        const WHEEL_LEFT = 1 << 5;
        const WHEEL_RIGHT = 1 << 6;
    }
}

/// A decoded input event, in source-frame coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputEvent {
    Key { down: bool, keysym: u32 },
    Pointer { buttons: ButtonMask, x: u32, y: u32 },
}

/// Receives input events from remote clients.
pub trait InputSink: Send {
    fn inject(&mut self, event: InputEvent) -> Result<(), VncdError>;
}

/// Receives cut-text from remote clients.
pub trait ClipboardSink: Send {
    fn set_text(&mut self, text: &str) -> Result<(), VncdError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn activity_flags() {
        assert!(!EngineActivity::default().is_active());
        let a = EngineActivity {
            disconnected: 1,
            ..EngineActivity::default()
        };
        assert!(a.is_active());
    }

    #[test]
    fn button_mask_bits() {
        let mask = ButtonMask::from_bits_truncate(0b101);
        assert!(mask.contains(ButtonMask::LEFT));
        assert!(mask.contains(ButtonMask::RIGHT));
        assert!(!mask.contains(ButtonMask::MIDDLE));
    }
}
