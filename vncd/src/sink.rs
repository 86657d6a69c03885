//! Default input and clipboard sinks.
//!
//! Injection into the host input stack is platform specific and lives
//! outside this server; the default sink records what clients send.

use tracing::{debug, trace};
use vncd_core::{ClipboardSink, InputEvent, InputSink, VncdError};

/// Logs every input event and cut-text it receives.
#[derive(Debug, Default)]
pub struct TracingSink {
    events: u64,
    last_text: Option<String>,
}

impl TracingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Input events seen so far.
    pub fn events(&self) -> u64 {
        self.events
    }

    pub fn last_text(&self) -> Option<&str> {
        self.last_text.as_deref()
    }
}

impl InputSink for TracingSink {
    fn inject(&mut self, event: InputEvent) -> Result<(), VncdError> {
        self.events += 1;
        match event {
            InputEvent::Key { down, keysym } => trace!("key {keysym:#06x} down={down}"),
            InputEvent::Pointer { buttons, x, y } => trace!("pointer ({x}, {y}) {buttons:?}"),
        }
        Ok(())
    }
}

impl ClipboardSink for TracingSink {
    fn set_text(&mut self, text: &str) -> Result<(), VncdError> {
        debug!("client cut text ({} chars)", text.chars().count());
        self.last_text = Some(text.to_string());
        Ok(())
    }
}
