//! One client connection.
//!
//! Each session is a single task: it performs the handshake, then
//! selects between inbound client messages (forwarded to the bridge)
//! and commands from the bridge (build and send an update). Pixel
//! format changes are applied locally so they take effect before any
//! update request that follows them on the wire.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use bytes::BytesMut;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::codec::Framed;
use tracing::{debug, info, warn};
use vncd_core::screen::PixelDepth;
use vncd_core::{Rect, Scaling, ScreenFormat, SharedFrameBuffer};

use crate::error::ServerError;
use crate::rfb::codec::{ClientMessage, ENCODING_RAW, RawRect, RfbCodec, ServerMessage};
use crate::rfb::handshake::{ServerInit, handshake};
use crate::rfb::pixel_format::{WirePixelFormat, translate};

/// Bridge → session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SessionCommand {
    /// Send this region (source coordinates) from the shared frame.
    Update(Rect),
    Close,
}

/// Session → bridge.
#[derive(Debug)]
pub(crate) enum BridgeEvent {
    Connected {
        id: u64,
        peer: SocketAddr,
        commands: mpsc::Sender<SessionCommand>,
    },
    Message {
        id: u64,
        message: ClientMessage,
    },
    Disconnected {
        id: u64,
    },
}

/// State shared by every session of one bridge.
pub(crate) struct SessionContext {
    pub frame: SharedFrameBuffer,
    pub format: ScreenFormat,
    /// How pixels sit in `frame`.
    pub stored_format: WirePixelFormat,
    /// What ServerInit advertises.
    pub server_format: WirePixelFormat,
    pub depth: PixelDepth,
    pub scaling: Scaling,
    pub name: String,
    pub events: mpsc::Sender<BridgeEvent>,
    pub handshake_timeout: Duration,
    next_id: AtomicU64,
}

impl SessionContext {
    pub fn new(
        frame: SharedFrameBuffer,
        format: ScreenFormat,
        stored_format: WirePixelFormat,
        server_format: WirePixelFormat,
        depth: PixelDepth,
        scaling: Scaling,
        name: String,
        events: mpsc::Sender<BridgeEvent>,
    ) -> Self {
        Self {
            frame,
            format,
            stored_format,
            server_format,
            depth,
            scaling,
            name,
            events,
            handshake_timeout: Duration::from_secs(10),
            next_id: AtomicU64::new(1),
        }
    }

    /// The geometry advertised to clients.
    fn client_size(&self) -> (u32, u32) {
        self.scaling.scaled_size(&self.format)
    }

    /// Build a raw update for `rect` in the client's pixel format.
    ///
    /// Scaled clients always receive the whole resampled frame.
    fn build_update(
        &self,
        rect: Rect,
        client_format: &WirePixelFormat,
    ) -> Result<Option<ServerMessage>, ServerError> {
        let bpp = self.stored_format.bytes_per_pixel();
        let frame = self.frame.read()?;
        let src = frame.as_bytes();
        let mut pixels = BytesMut::new();

        let sent = if self.scaling.is_identity() {
            let rect = rect.intersect(&self.format.full_rect());
            if rect.is_empty() {
                return Ok(None);
            }
            let row = self.format.width as usize * bpp;
            let span = rect.width as usize * bpp;
            for y in rect.y..rect.bottom() {
                let start = y as usize * row + rect.x as usize * bpp;
                translate(&src[start..start + span], &self.stored_format, client_format, &mut pixels);
            }
            rect
        } else {
            let (w, h) = self.client_size();
            let mut scaled = vec![0u8; w as usize * h as usize * bpp];
            self.depth
                .resample(src, self.format.width, self.format.height, &mut scaled, w, h);
            translate(&scaled, &self.stored_format, client_format, &mut pixels);
            Rect::new(0, 0, w, h)
        };

        Ok(Some(ServerMessage::FramebufferUpdate(vec![RawRect {
            rect: sent,
            pixels: pixels.freeze(),
        }])))
    }
}

/// Drive one client from handshake to disconnect.
pub(crate) async fn run_session(mut stream: TcpStream, peer: SocketAddr, ctx: Arc<SessionContext>) {
    let id = ctx.next_id.fetch_add(1, Ordering::Relaxed);
    let (width, height) = ctx.client_size();
    let init = match (u16::try_from(width), u16::try_from(height)) {
        (Ok(width), Ok(height)) => ServerInit {
            width,
            height,
            format: ctx.server_format,
            name: ctx.name.clone(),
        },
        _ => {
            warn!("{width}x{height} does not fit an RFB screen; dropping {peer}");
            return;
        }
    };

    let negotiated =
        match tokio::time::timeout(ctx.handshake_timeout, handshake(&mut stream, &init)).await {
            Ok(Ok(n)) => n,
            Ok(Err(e)) => {
                warn!("handshake with {peer} failed: {e}");
                return;
            }
            Err(_) => {
                warn!("handshake with {peer} timed out after {:?}", ctx.handshake_timeout);
                return;
            }
        };
    info!(
        "client {id} ({peer}) connected: {:?}, shared={}",
        negotiated.version, negotiated.shared
    );

    let (tx, mut rx) = mpsc::channel(16);
    let connected = BridgeEvent::Connected {
        id,
        peer,
        commands: tx,
    };
    if ctx.events.send(connected).await.is_err() {
        return;
    }

    if let Err(e) = serve(stream, id, &mut rx, &ctx).await {
        warn!("client {id} ({peer}): {e}");
    }
    let _ = ctx.events.send(BridgeEvent::Disconnected { id }).await;
}

async fn serve(
    stream: TcpStream,
    id: u64,
    commands: &mut mpsc::Receiver<SessionCommand>,
    ctx: &SessionContext,
) -> Result<(), ServerError> {
    let (mut sink, mut source) = Framed::new(stream, RfbCodec).split();
    let mut client_format = ctx.server_format;

    loop {
        tokio::select! {
            inbound = source.next() => match inbound {
                None => return Ok(()),
                Some(Err(e)) => return Err(e),
                Some(Ok(ClientMessage::SetPixelFormat(format))) => {
                    format.validate()?;
                    debug!("client {id} switched to {format:?}");
                    client_format = format;
                }
                Some(Ok(ClientMessage::SetEncodings(encodings))) => {
                    if !encodings.contains(&ENCODING_RAW) {
                        debug!("client {id} did not list raw encoding; sending raw anyway");
                    }
                }
                Some(Ok(message)) => {
                    if ctx.events.send(BridgeEvent::Message { id, message }).await.is_err() {
                        return Ok(());
                    }
                }
            },
            command = commands.recv() => match command {
                Some(SessionCommand::Update(rect)) => {
                    if let Some(update) = ctx.build_update(rect, &client_format)? {
                        sink.send(update).await?;
                    }
                }
                Some(SessionCommand::Close) | None => return Ok(()),
            },
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────
