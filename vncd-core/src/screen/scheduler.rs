//! The steady-state update loop.
//!
//! One cooperative loop drives the whole pipeline:
//!
//! 1. Block in [`ProtocolBridge::process_events`] for `defer + standby`.
//! 2. Feed what happened into [`StandbyBackoff`].
//! 3. No clients: [`SchedulerState::Idle`], skip everything else.
//! 4. Poll [`OrientationTracker`]; a class flip ends the loop with a
//!    restart request.
//! 5. No pending client request: [`SchedulerState::Armed`], no capture.
//! 6. Otherwise [`SchedulerState::Publishing`]: capture into the shared
//!    frame, diff against the reference, and mark the full frame dirty
//!    only if it changed.
//!
//! The loop is the only place where an error class turns into a
//! lifecycle decision: transient errors skip a tick, geometry drift
//! requests a restart, anything else is returned to the caller.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, error, info, trace, warn};

use crate::bridge::{ProtocolBridge, RestartRequester};
use crate::error::{ErrorClass, VncdError};
use crate::screen::backoff::{SchedulerConfig, StandbyBackoff};
use crate::screen::capture::{Compositor, SurfaceCapturer};
use crate::screen::delta::ChangeDetector;
use crate::screen::orientation::{OrientationTracker, RotationChange};
use crate::screen::types::{FrameBuffer, ScreenFormat, SharedFrameBuffer};

// ── States & outcomes ────────────────────────────────────────────

/// Logical state after the most recent tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SchedulerState {
    /// No clients connected.
    #[default]
    Idle,
    /// Clients connected, none requesting an update.
    Armed,
    /// At least one client is waiting; a capture cycle ran.
    Publishing,
}

/// What a single [`UpdateScheduler::tick`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Nobody connected; capture skipped.
    Idle,
    /// Clients connected but nothing requested; capture skipped.
    Armed,
    /// Captured a changed frame and marked it dirty.
    Published,
    /// Captured, but the frame matched the last published one.
    Unchanged,
    /// A restart was requested; the loop must end.
    RestartRequested,
}

/// Why [`UpdateScheduler::run`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// [`UpdateScheduler::stop`] was called.
    Stopped,
    /// A restart has been requested from the supervisor; exit and let
    /// it rebuild the process.
    Restart,
}

/// Counters for diagnostics and tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    pub ticks: u64,
    pub captures: u64,
    pub publishes: u64,
    pub skipped: u64,
}

// ── UpdateScheduler ──────────────────────────────────────────────

/// Owns every pipeline component for the lifetime of the process.
///
/// # Lifetime
///
/// Construct with [`new`](Self::new), then call [`run`](Self::run). It
/// runs until [`stop`](Self::stop) is called, a restart is requested,
/// or a fatal error occurs. [`shutdown`](Self::shutdown) closes the
/// protocol engine and releases the display and both frame buffers.
pub struct UpdateScheduler<C, B, R>
where
    C: Compositor,
    B: ProtocolBridge,
    R: RestartRequester,
{
    capturer: SurfaceCapturer<C>,
    tracker: OrientationTracker,
    detector: ChangeDetector,
    bridge: B,
    restarter: R,
    format: ScreenFormat,
    current: SharedFrameBuffer,
    backoff: StandbyBackoff,
    config: SchedulerConfig,
    state: SchedulerState,
    running: Arc<AtomicBool>,
    restart_requested: bool,
    stats: SchedulerStats,
}

impl<C, B, R> UpdateScheduler<C, B, R>
where
    C: Compositor,
    B: ProtocolBridge,
    R: RestartRequester,
{
    /// Fill the current buffer with an initial capture and register it
    /// with the protocol engine.
    ///
    /// Every failure here is fatal to the caller.
    pub fn new(
        mut capturer: SurfaceCapturer<C>,
        format: ScreenFormat,
        mut bridge: B,
        restarter: R,
        config: &SchedulerConfig,
    ) -> Result<Self, VncdError> {
        let mut initial = FrameBuffer::zeroed(format.size);
        capturer.capture_into(&mut initial)?;
        let current = SharedFrameBuffer::new(initial);

        bridge.register(&format, current.clone())?;
        info!(
            "registered {}x{} frame ({} bytes) with the protocol engine",
            format.width, format.height, format.size
        );

        let config = config.normalized();
        Ok(Self {
            capturer,
            tracker: OrientationTracker::new(format.rotation),
            detector: ChangeDetector::for_format(&format),
            bridge,
            restarter,
            current,
            backoff: StandbyBackoff::new(&config),
            config,
            format,
            state: SchedulerState::Idle,
            running: Arc::new(AtomicBool::new(true)),
            restart_requested: false,
            stats: SchedulerStats::default(),
        })
    }

    /// A cloneable handle that can be used to stop the loop from
    /// another task.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    /// Signal the loop to stop after the current tick.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// The live screen format.
    pub fn format(&self) -> &ScreenFormat {
        &self.format
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    pub fn stats(&self) -> SchedulerStats {
        self.stats
    }

    pub fn standby(&self) -> std::time::Duration {
        self.backoff.current()
    }

    /// The buffer shared with the protocol engine.
    pub fn frame(&self) -> &SharedFrameBuffer {
        &self.current
    }

    pub fn bridge(&self) -> &B {
        &self.bridge
    }

    pub fn bridge_mut(&mut self) -> &mut B {
        &mut self.bridge
    }

    /// Whether a restart has been requested from the supervisor.
    pub fn restart_requested(&self) -> bool {
        self.restart_requested
    }

    /// Run one loop iteration.
    pub async fn tick(&mut self) -> Result<TickOutcome, VncdError> {
        self.stats.ticks += 1;

        // 1. Wait for protocol activity.
        let wait = self.backoff.wait(self.config.defer());
        let activity = self.bridge.process_events(wait).await?;

        // 2. Backoff bookkeeping.
        if activity.is_active() || self.bridge.has_pending_request() {
            self.backoff.on_activity();
        } else {
            self.backoff.on_quiet();
        }

        // 3. Nobody to serve.
        if self.bridge.client_count() == 0 {
            self.backoff.on_no_clients();
            self.enter(SchedulerState::Idle);
            return Ok(TickOutcome::Idle);
        }

        // 4. Orientation.
        match self.tracker.poll(&mut self.capturer) {
            Ok(RotationChange::Unchanged) => {}
            Ok(RotationChange::InPlace { to, .. }) => self.format.rotation = to,
            Ok(RotationChange::RestartRequired { from, to }) => {
                self.request_restart(&format!("rotation changed from {from} to {to}"))?;
                return Ok(TickOutcome::RestartRequested);
            }
            Ok(RotationChange::RestartPending) => return Ok(TickOutcome::RestartRequested),
            Err(e) => warn!("orientation poll failed, keeping {}: {e}", self.tracker.tracked()),
        }

        // 5. Anything requested?
        if !self.bridge.has_pending_request() {
            self.enter(SchedulerState::Armed);
            return Ok(TickOutcome::Armed);
        }

        // 6. Capture, diff, publish.
        self.enter(SchedulerState::Publishing);
        self.stats.captures += 1;
        {
            let mut frame = self.current.write()?;
            self.capturer.capture_into(&mut frame)?;
        }
        let changed = {
            let frame = self.current.read()?;
            self.detector.has_changed(frame.as_bytes())?
        };

        if changed {
            self.bridge.mark_dirty(self.format.full_rect());
            self.stats.publishes += 1;
            trace!("published frame #{}", self.stats.publishes);
            Ok(TickOutcome::Published)
        } else {
            Ok(TickOutcome::Unchanged)
        }
    }

    /// Run the update loop until stopped, a restart is requested, or a
    /// fatal error occurs.
    pub async fn run(&mut self) -> Result<RunOutcome, VncdError> {
        while self.running.load(Ordering::SeqCst) {
            match self.tick().await {
                Ok(TickOutcome::RestartRequested) => return Ok(RunOutcome::Restart),
                Ok(_) => {}
                Err(e) => match e.class() {
                    ErrorClass::Transient => {
                        // Skip this tick; tracked state is untouched.
                        debug!("skipping tick: {e}");
                        self.stats.skipped += 1;
                        tokio::task::yield_now().await;
                    }
                    ErrorClass::Reinitialize => {
                        error!("capture geometry drifted: {e}");
                        self.request_restart(&e.to_string())?;
                        return Ok(RunOutcome::Restart);
                    }
                    ErrorClass::Fatal | ErrorClass::PolicyRejection => return Err(e),
                },
            }
        }
        info!("update loop stopped after {} ticks", self.stats.ticks);
        Ok(RunOutcome::Stopped)
    }

    /// Close the protocol engine and release every pipeline resource.
    pub async fn shutdown(mut self) {
        self.stop();
        self.bridge.shutdown().await;
        debug!(
            "released display {:?} and {} bytes of frame buffers",
            self.capturer.display(),
            self.format.size * 2
        );
    }

    fn enter(&mut self, next: SchedulerState) {
        if self.state != next {
            trace!("scheduler {:?} -> {:?}", self.state, next);
            self.state = next;
        }
    }

    /// Issue the supervisor restart at most once per process.
    fn request_restart(&mut self, reason: &str) -> Result<(), VncdError> {
        if self.restart_requested {
            return Ok(());
        }
        self.restart_requested = true;
        self.stop();
        warn!("requesting restart: {reason}");
        self.restarter.request_restart(reason)
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::EngineActivity;
    use crate::screen::capture::{DisplayId, Snapshot};
    use crate::screen::format::{FormatResolver, hal};
    use crate::screen::types::{Rect, Rotation};
    use async_trait::async_trait;
    use std::time::Duration;

    struct Shot {
        data: Vec<u8>,
    }

    impl Snapshot for Shot {
        fn width(&self) -> u32 {
            4
        }
        fn height(&self) -> u32 {
            2
        }
        fn stride(&self) -> usize {
            16
        }
        fn pixel_format(&self) -> i32 {
            hal::RGBA_8888
        }
        fn lock(&mut self) -> Result<(), VncdError> {
            Ok(())
        }
        fn mapped(&self) -> &[u8] {
            &self.data
        }
        fn unlock(&mut self) {}
    }

    struct Screen {
        fill: u8,
        rotation: Rotation,
    }

    impl Compositor for Screen {
        type Snapshot = Shot;

        fn internal_display(&mut self) -> Result<DisplayId, VncdError> {
            Ok(DisplayId(1))
        }
        fn capture(&mut self, _: DisplayId) -> Result<Option<Shot>, VncdError> {
            Ok(Some(Shot {
                data: vec![self.fill; 32],
            }))
        }
        fn rotation(&mut self, _: DisplayId) -> Result<Rotation, VncdError> {
            Ok(self.rotation)
        }
    }

    #[derive(Default)]
    struct Engine {
        clients: usize,
        pending: bool,
        dirty: Vec<Rect>,
    }

    #[async_trait]
    impl ProtocolBridge for Engine {
        fn register(&mut self, _: &ScreenFormat, _: SharedFrameBuffer) -> Result<(), VncdError> {
            Ok(())
        }
        async fn process_events(&mut self, _: Duration) -> Result<EngineActivity, VncdError> {
            Ok(EngineActivity::default())
        }
        fn client_count(&self) -> usize {
            self.clients
        }
        fn has_pending_request(&self) -> bool {
            self.pending
        }
        fn mark_dirty(&mut self, rect: Rect) {
            self.dirty.push(rect);
        }
        async fn shutdown(&mut self) {}
    }

    #[derive(Default)]
    struct Restarts(u32);

    impl RestartRequester for Restarts {
        fn request_restart(&mut self, _: &str) -> Result<(), VncdError> {
            self.0 += 1;
            Ok(())
        }
    }

    fn scheduler(engine: Engine) -> UpdateScheduler<Screen, Engine, Restarts> {
        let screen = Screen {
            fill: 7,
            rotation: Rotation::Deg0,
        };
        let (cap, format) = SurfaceCapturer::open(screen, &FormatResolver::new()).unwrap();
        UpdateScheduler::new(cap, format, engine, Restarts::default(), &SchedulerConfig::default())
            .unwrap()
    }

    #[test]
    fn initial_capture_fills_shared_frame() {
        let s = scheduler(Engine::default());
        assert!(s.frame().read().unwrap().as_bytes().iter().all(|&b| b == 7));
        assert_eq!(s.state(), SchedulerState::Idle);
        assert!(s.is_running());
    }

    #[test]
    fn armed_without_pending_request() {
        let mut s = scheduler(Engine {
            clients: 1,
            ..Engine::default()
        });
        let out = tokio_test::block_on(s.tick()).unwrap();
        assert_eq!(out, TickOutcome::Armed);
        assert_eq!(s.state(), SchedulerState::Armed);
        assert_eq!(s.stats().captures, 0);
    }

    #[test]
    fn in_place_rotation_updates_format_only() {
        let mut s = scheduler(Engine {
            clients: 1,
            ..Engine::default()
        });
        s.capturer_mut().rotation = Rotation::Deg180;
        tokio_test::block_on(s.tick()).unwrap();
        assert_eq!(s.format().rotation, Rotation::Deg180);
        assert_eq!((s.format().width, s.format().height), (4, 2));
        assert_eq!(s.restarter.0, 0);
    }

    #[test]
    fn idle_grows_standby() {
        let mut s = scheduler(Engine::default());
        let before = s.standby();
        tokio_test::block_on(s.tick()).unwrap();
        tokio_test::block_on(s.tick()).unwrap();
        assert!(s.standby() > before);
    }

    impl UpdateScheduler<Screen, Engine, Restarts> {
        fn capturer_mut(&mut self) -> &mut Screen {
            self.capturer.compositor_mut()
        }
    }
}
