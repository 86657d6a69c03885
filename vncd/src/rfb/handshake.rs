//! RFB connection setup: version, security and initialisation.
//!
//! ```text
//! server                          client
//!   ProtocolVersion ──────────────►
//!                 ◄────────────── ProtocolVersion
//!   security (None only) ─────────►
//!                 ◄────────────── ClientInit (shared flag)
//!   ServerInit ───────────────────►
//! ```
//!
//! Versions 3.3, 3.7 and 3.8 are accepted; anything between is
//! treated as 3.3.

use bytes::{BufMut, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::ServerError;
use crate::rfb::pixel_format::WirePixelFormat;

/// The version this server offers.
pub const SERVER_VERSION: &[u8; 12] = b"RFB 003.008\n";

const SECURITY_NONE: u8 = 1;

/// Negotiated protocol version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ProtocolVersion {
    V3_3,
    V3_7,
    V3_8,
}

impl ProtocolVersion {
    /// Parse a client `RFB xxx.yyy\n` banner.
    pub fn parse(banner: &[u8; 12]) -> Result<Self, ServerError> {
        let bad = || ServerError::Protocol(format!("bad version banner {:?}", String::from_utf8_lossy(banner)));
        if &banner[..4] != b"RFB " || banner[7] != b'.' || banner[11] != b'\n' {
            return Err(bad());
        }
        let number = |digits: &[u8]| -> Option<u32> { std::str::from_utf8(digits).ok()?.parse().ok() };
        let major = number(&banner[4..7]).ok_or_else(bad)?;
        let minor = number(&banner[8..11]).ok_or_else(bad)?;

        Ok(match (major, minor) {
            (3, 7) => ProtocolVersion::V3_7,
            (3, m) if m >= 8 => ProtocolVersion::V3_8,
            (3, _) => ProtocolVersion::V3_3,
            (m, _) if m > 3 => ProtocolVersion::V3_8,
            _ => return Err(bad()),
        })
    }
}

/// What the server announces once security is done.
#[derive(Debug, Clone)]
pub struct ServerInit {
    pub width: u16,
    pub height: u16,
    pub format: WirePixelFormat,
    pub name: String,
}

impl ServerInit {
    pub fn encode(&self, dst: &mut BytesMut) {
        dst.put_u16(self.width);
        dst.put_u16(self.height);
        self.format.encode(dst);
        dst.put_u32(self.name.len() as u32);
        dst.put_slice(self.name.as_bytes());
    }
}

/// Result of a successful handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Negotiated {
    pub version: ProtocolVersion,
    pub shared: bool,
}

/// Run the server side of connection setup on `stream`.
pub async fn handshake<S>(stream: &mut S, init: &ServerInit) -> Result<Negotiated, ServerError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    stream.write_all(SERVER_VERSION).await?;
    stream.flush().await?;

    let mut banner = [0u8; 12];
    stream.read_exact(&mut banner).await?;
    let version = ProtocolVersion::parse(&banner)?;

    match version {
        ProtocolVersion::V3_3 => {
            // The server picks the security type.
            stream.write_u32(SECURITY_NONE as u32).await?;
        }
        ProtocolVersion::V3_7 | ProtocolVersion::V3_8 => {
            stream.write_all(&[1, SECURITY_NONE]).await?;
            stream.flush().await?;
            let chosen = stream.read_u8().await?;
            if chosen != SECURITY_NONE {
                if version == ProtocolVersion::V3_8 {
                    let reason = b"unsupported security type";
                    stream.write_u32(1).await?;
                    stream.write_u32(reason.len() as u32).await?;
                    stream.write_all(reason).await?;
                    stream.flush().await?;
                }
                return Err(ServerError::Protocol(format!(
                    "client chose security type {chosen}"
                )));
            }
            if version == ProtocolVersion::V3_8 {
                stream.write_u32(0).await?;
            }
        }
    }
    stream.flush().await?;

    let shared = stream.read_u8().await? != 0;

    let mut out = BytesMut::with_capacity(24 + init.name.len());
    init.encode(&mut out);
    stream.write_all(&out).await?;
    stream.flush().await?;

    Ok(Negotiated { version, shared })
}

// ── Tests ────────────────────────────────────────────────────────
