//! Configuration for the vncd server.

use std::path::Path;

use serde::{Deserialize, Serialize};
use vncd_core::{Scaling, SchedulerConfig};

use crate::error::ServerError;

/// Port a listening viewer waits on for reverse connections.
pub const DEFAULT_REVERSE_PORT: u16 = 5500;

/// Top-level configuration loaded from a TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct VncdConfig {
    /// Listener and client settings.
    pub network: NetworkConfig,
    /// Display and pixel-format settings.
    pub screen: ScreenConfig,
    /// Update loop timing.
    pub scheduler: SchedulerConfig,
    /// How to ask the supervisor for a restart.
    pub restart: RestartConfig,
    /// Logging settings.
    pub logging: LoggingConfig,
}

/// Network configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Address to bind the RFB listener to.
    pub bind_address: String,
    /// TCP port for RFB clients.
    pub port: u16,
    /// `host[:port]` of a listening viewer to dial at startup. Empty
    /// disables the reverse connection.
    pub reverse: String,
    /// Name advertised in ServerInit.
    pub desktop_name: String,
    /// Maximum concurrent clients.
    pub max_clients: usize,
    /// Time a new connection gets to finish the RFB handshake.
    pub handshake_timeout_ms: u64,
}

/// Screen configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScreenConfig {
    /// Server-side scaling percent, 1..=150.
    pub scale_percent: u16,
    /// Framebuffer device to capture from.
    pub fb_device: String,
    /// sysfs directory describing the framebuffer.
    pub sysfs_dir: String,
    /// Platform format identifier to use instead of the one derived
    /// from the framebuffer depth. 0 keeps the derived one.
    pub pixel_format: i32,
    /// Report BGRA_8888 regardless of the detected format (hosts whose
    /// compositor misreports its layout).
    pub force_bgra: bool,
}

/// Restart configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RestartConfig {
    /// Command line run to request a restart. Empty disables it.
    pub command: Vec<String>,
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    pub level: String,
}

// ── Defaults ─────────────────────────────────────────────────────

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".into(),
            port: 5901,
            reverse: String::new(),
            desktop_name: "vncd".into(),
            max_clients: 8,
            handshake_timeout_ms: 10_000,
        }
    }
}

impl Default for ScreenConfig {
    fn default() -> Self {
        Self {
            scale_percent: 100,
            fb_device: "/dev/fb0".into(),
            sysfs_dir: "/sys/class/graphics/fb0".into(),
            pixel_format: 0,
            force_bgra: false,
        }
    }
}

impl Default for RestartConfig {
    fn default() -> Self {
        Self {
            command: vec!["setprop".into(), "ctl.restart".into(), "vncd".into()],
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
        }
    }
}

// ── Loading ──────────────────────────────────────────────────────

impl VncdConfig {
    /// Load configuration from a TOML file, falling back to defaults.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => Self::parse(&contents).unwrap_or_else(|e| {
                tracing::warn!("invalid config {}: {e}; using defaults", path.display());
                Self::default()
            }),
            Err(_) => {
                tracing::info!("no config at {}; using defaults", path.display());
                Self::default()
            }
        }
    }

    pub fn parse(text: &str) -> Result<Self, ServerError> {
        Ok(toml::from_str(text)?)
    }

    /// The defaults rendered as TOML.
    pub fn default_toml() -> Result<String, ServerError> {
        Ok(toml::to_string_pretty(&Self::default())?)
    }

    /// Write the default configuration to a file (for bootstrapping).
    pub fn write_default(path: &Path) -> Result<(), ServerError> {
        std::fs::write(path, Self::default_toml()?)?;
        Ok(())
    }

    /// Effective scaling; out-of-range percentages fall back to 100.
    pub fn scaling(&self) -> Scaling {
        Scaling::from_percent(self.screen.scale_percent)
    }

    /// The reverse-connection target, if one is configured.
    pub fn reverse_target(&self) -> Result<Option<(String, u16)>, ServerError> {
        let target = self.network.reverse.trim();
        if target.is_empty() {
            return Ok(None);
        }
        parse_host_port(target, DEFAULT_REVERSE_PORT).map(Some)
    }

    /// `bind_address:port` for the listener.
    pub fn listen_address(&self) -> String {
        format!("{}:{}", self.network.bind_address, self.network.port)
    }
}

/// Split `host[:port]`, using `default_port` when none is given.
///
/// IPv6 literals take a port only in bracketed form (`[::1]:5500`); a
/// bare literal such as `::1` is all host.
pub fn parse_host_port(s: &str, default_port: u16) -> Result<(String, u16), ServerError> {
    let invalid = || ServerError::InvalidAddress(s.to_string());
    let parse_port = |p: &str| p.parse::<u16>().map_err(|_| invalid());

    let (host, port) = if let Some(rest) = s.strip_prefix('[') {
        let (host, tail) = rest.split_once(']').ok_or_else(invalid)?;
        match tail {
            "" => (host, default_port),
            _ => (host, parse_port(tail.strip_prefix(':').ok_or_else(invalid)?)?),
        }
    } else {
        match s.rsplit_once(':') {
            Some((host, port)) if !host.contains(':') => (host, parse_port(port)?),
            Some(_) | None => (s, default_port),
        }
    };
    if host.is_empty() {
        return Err(ServerError::InvalidAddress(s.to_string()));
    }
    Ok((host.to_string(), port))
}

// ── Tests ────────────────────────────────────────────────────────
