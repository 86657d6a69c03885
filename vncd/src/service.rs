//! Server lifecycle.
//!
//! Wires the capture pipeline to the framebuffer compositor, the RFB
//! bridge and the restart requester, runs the update loop and tears
//! everything down on stop, signal or restart.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tracing::{info, warn};
use vncd_core::{Compositor, FormatResolver, RunOutcome, SurfaceCapturer, UpdateScheduler};

use crate::config::VncdConfig;
use crate::error::ServerError;
use crate::fbdev::{FbCompositor, is_fb_sysfs};
use crate::restart::CommandRestarter;
use crate::rfb::{BridgeConfig, RfbBridge};
use crate::sink::TracingSink;

// ── VncdService ──────────────────────────────────────────────────

/// The top-level server.
pub struct VncdService {
    config: VncdConfig,
    running: Arc<AtomicBool>,
}

impl VncdService {
    pub fn new(config: VncdConfig) -> Self {
        Self {
            config,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Obtain a handle that can be used to stop the service from
    /// another task.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Serve the configured framebuffer device.
    pub async fn run(&self) -> Result<RunOutcome, ServerError> {
        let screen = &self.config.screen;
        if !is_fb_sysfs(std::path::Path::new(&screen.sysfs_dir)) {
            warn!("{} does not look like a framebuffer sysfs directory", screen.sysfs_dir);
        }
        self.run_with(FbCompositor::from_config(screen)).await
    }

    /// Serve any compositor until stopped, signalled or restarted.
    ///
    /// 1. Opens the display and derives the screen format.
    /// 2. Binds the RFB listener and registers the frame buffer.
    /// 3. Runs the update loop.
    /// 4. Shuts the bridge down and releases the display.
    pub async fn run_with<C: Compositor>(&self, compositor: C) -> Result<RunOutcome, ServerError> {
        self.running.store(true, Ordering::SeqCst);

        let resolver = FormatResolver::with_bgra_override(self.config.screen.force_bgra);
        let (capturer, format) = SurfaceCapturer::open(compositor, &resolver)?;

        let bridge = RfbBridge::bind(
            BridgeConfig::from_config(&self.config)?,
            Box::new(TracingSink::new()),
            Box::new(TracingSink::new()),
        )
        .await?;
        let port = bridge.local_addr().port();

        let scaling = self.config.scaling();
        info!(
            "screen: {} {}x{} @ {} bpp, shifts r{} g{} b{}, widths r{} g{} b{}, scaling {}%, port {port}",
            format.rotation,
            format.width,
            format.height,
            format.bits_per_pixel,
            format.red.shift,
            format.green.shift,
            format.blue.shift,
            format.red.bits,
            format.green.bits,
            format.blue.bits,
            scaling.percent(),
        );

        let restarter = CommandRestarter::new(self.config.restart.command.clone());
        let mut scheduler =
            UpdateScheduler::new(capturer, format, bridge, restarter, &self.config.scheduler)?;

        // Stop requests reach the loop through its own handle.
        let loop_handle = scheduler.stop_handle();
        let service_handle = Arc::clone(&self.running);
        let watcher = tokio::spawn(async move {
            tokio::select! {
                _ = shutdown_signal() => info!("signal received; shutting down"),
                _ = wait_for_stop(&service_handle) => {}
            }
            loop_handle.store(false, Ordering::SeqCst);
        });

        let outcome = scheduler.run().await;
        watcher.abort();
        scheduler.shutdown().await;
        self.running.store(false, Ordering::SeqCst);

        let outcome = outcome?;
        match outcome {
            RunOutcome::Stopped => info!("vncd stopped"),
            RunOutcome::Restart => info!("vncd exiting for restart"),
        }
        Ok(outcome)
    }
}

/// Resolves on SIGINT or SIGTERM.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(e) => {
                warn!("cannot install SIGTERM handler: {e}");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

/// Async helper: resolves when `running` becomes false.
async fn wait_for_stop(running: &Arc<AtomicBool>) {
    loop {
        if !running.load(Ordering::SeqCst) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn service_creates_with_defaults() {
        let svc = VncdService::new(VncdConfig::default());
        assert!(!svc.is_running());
    }

    #[test]
    fn stop_handle_works() {
        let svc = VncdService::new(VncdConfig::default());
        let handle = svc.stop_handle();
        handle.store(true, Ordering::SeqCst);
        assert!(svc.is_running());
        svc.stop();
        assert!(!svc.is_running());
    }

    #[tokio::test]
    async fn missing_framebuffer_fails_at_startup() {
        let mut config = VncdConfig::default();
        config.screen.fb_device = "/nonexistent/fb7".into();
        config.screen.sysfs_dir = "/nonexistent/fb7-sysfs".into();
        config.network.bind_address = "127.0.0.1".into();
        config.network.port = 0;
        let svc = VncdService::new(config);
        assert!(matches!(svc.run().await, Err(ServerError::Core(_))));
    }
}
