//! # Minimal RFB server
//!
//! Enough of RFB 3.3 / 3.7 / 3.8 (RFC 6143) to serve the capture
//! pipeline's frame buffer: security type None, raw encoding, any
//! true-colour client pixel format, key/pointer/cut-text input.
//!
//! ## Sub-modules
//!
//! | Module         | Purpose                                        |
//! |----------------|------------------------------------------------|
//! | `pixel_format` | `PIXEL_FORMAT` wire type and pixel translation |
//! | `handshake`    | Version, security and init exchange            |
//! | `codec`        | `tokio_util` codec for session messages        |
//! | `session`      | Per-client task                                |
//! | `bridge`       | `ProtocolBridge` implementation                |

pub mod bridge;
pub mod codec;
pub mod handshake;
pub mod pixel_format;
mod session;

pub use bridge::{BridgeConfig, RfbBridge};
pub use codec::{ClientMessage, RfbCodec, ServerMessage};
pub use handshake::{ProtocolVersion, ServerInit};
pub use pixel_format::WirePixelFormat;
