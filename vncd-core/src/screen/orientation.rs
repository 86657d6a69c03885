//! Display orientation tracking.
//!
//! Each poll compares the platform rotation with the tracked one:
//!
//! | change                         | action                          |
//! |--------------------------------|---------------------------------|
//! | none                           | nothing                         |
//! | same layout class (0°↔180°)    | update rotation metadata        |
//! | layout class flips (0°↔90° …)  | request a full process restart  |
//!
//! A class flip changes every geometry-derived structure (frame sizes,
//! the protocol engine's advertised width and height), which cannot be
//! resized in place without client-visible resize events. The tracker
//! therefore only *returns* the restart effect; executing it belongs to
//! the scheduler.

use tracing::{info, warn};

use crate::error::VncdError;
use crate::screen::types::Rotation;

/// Anything that can report the current display rotation.
pub trait RotationSource {
    fn rotation(&mut self) -> Result<Rotation, VncdError>;
}

/// Outcome of one orientation poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RotationChange {
    /// Same rotation as before.
    Unchanged,
    /// Class-preserving change; only the rotation field moves.
    InPlace { from: Rotation, to: Rotation },
    /// Class-changing change; the process must be rebuilt. Returned at
    /// most once per tracker.
    RestartRequired { from: Rotation, to: Rotation },
    /// A restart was already requested and has not happened yet.
    RestartPending,
}

impl RotationChange {
    /// Classify a transition without touching any tracker state.
    pub fn classify(from: Rotation, to: Rotation) -> Self {
        if from == to {
            RotationChange::Unchanged
        } else if from.same_layout_class(to) {
            RotationChange::InPlace { from, to }
        } else {
            RotationChange::RestartRequired { from, to }
        }
    }
}

/// Tracks the last applied rotation.
#[derive(Debug, Clone)]
pub struct OrientationTracker {
    tracked: Rotation,
    restart_issued: bool,
}

impl OrientationTracker {
    pub fn new(initial: Rotation) -> Self {
        Self {
            tracked: initial,
            restart_issued: false,
        }
    }

    /// The rotation currently applied to the screen format.
    pub fn tracked(&self) -> Rotation {
        self.tracked
    }

    pub fn restart_issued(&self) -> bool {
        self.restart_issued
    }

    /// Query `source` and apply the decision rule.
    pub fn poll(&mut self, source: &mut impl RotationSource) -> Result<RotationChange, VncdError> {
        let rotation = source.rotation()?;
        Ok(self.observe(rotation))
    }

    /// Apply the decision rule to an already-observed rotation.
    pub fn observe(&mut self, rotation: Rotation) -> RotationChange {
        if self.restart_issued {
            return RotationChange::RestartPending;
        }

        let change = RotationChange::classify(self.tracked, rotation);
        match change {
            RotationChange::Unchanged | RotationChange::RestartPending => {}
            RotationChange::InPlace { from, to } => {
                info!("applying rotation {from} -> {to} without dimension flip");
                self.tracked = to;
            }
            RotationChange::RestartRequired { from, to } => {
                warn!("rotation {from} -> {to} flips screen dimensions; restart required");
                self.restart_issued = true;
            }
        }
        change
    }
}

// ── Tests ────────────────────────────────────────────────────────
