//! # vncd: remote framebuffer server
//!
//! Service wrapper around [`vncd_core`]: captures a Linux framebuffer,
//! serves it to RFB viewers and hands client input to pluggable sinks.
//!
//! ## Lifecycle
//!
//! - **Run**: capture and serve until SIGINT/SIGTERM.
//! - **Restart**: when the display geometry changes underneath the
//!   pipeline, ask the supervisor for a restart and exit.

pub mod config;
pub mod error;
pub mod fbdev;
pub mod restart;
pub mod rfb;
pub mod service;
pub mod sink;

pub use config::VncdConfig;
pub use error::ServerError;
pub use service::VncdService;
