//! [`ProtocolBridge`] implementation over RFB.
//!
//! The bridge lives on the scheduler's task. Sessions run as their own
//! tasks and talk to it through one event channel; the bridge keeps,
//! per client, the region the client asked for and the region that
//! changed since it was last served, and sends the overlap.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, trace, warn};
use vncd_core::screen::PixelDepth;
use vncd_core::{
    ButtonMask, ClipboardSink, EngineActivity, InputEvent, InputSink, ProtocolBridge, Rect,
    Scaling, ScreenFormat, SharedFrameBuffer, VncdError,
};

use crate::config::VncdConfig;
use crate::error::ServerError;
use crate::rfb::codec::ClientMessage;
use crate::rfb::pixel_format::WirePixelFormat;
use crate::rfb::session::{BridgeEvent, SessionCommand, SessionContext, run_session};

// ── BridgeConfig ─────────────────────────────────────────────────

/// Listener and client policy for [`RfbBridge`].
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// `host:port` to listen on.
    pub listen: String,
    /// Viewer to dial at startup.
    pub reverse: Option<(String, u16)>,
    pub desktop_name: String,
    pub max_clients: usize,
    pub scaling: Scaling,
    /// Connections still handshaking after this are dropped.
    pub handshake_timeout: Duration,
}

impl BridgeConfig {
    pub fn from_config(config: &VncdConfig) -> Result<Self, ServerError> {
        Ok(Self {
            listen: config.listen_address(),
            reverse: config.reverse_target()?,
            desktop_name: config.network.desktop_name.clone(),
            max_clients: config.network.max_clients.max(1),
            scaling: config.scaling(),
            handshake_timeout: Duration::from_millis(config.network.handshake_timeout_ms.max(1)),
        })
    }
}

// ── Per-client state ─────────────────────────────────────────────

struct Client {
    peer: SocketAddr,
    commands: mpsc::Sender<SessionCommand>,
    /// Region asked for and not yet served (source coordinates).
    requested: Rect,
    /// Region changed since it was last served.
    modified: Rect,
}

// ── RfbBridge ────────────────────────────────────────────────────

pub struct RfbBridge {
    config: BridgeConfig,
    listener: Option<TcpListener>,
    local_addr: SocketAddr,
    events_tx: mpsc::Sender<BridgeEvent>,
    events: mpsc::Receiver<BridgeEvent>,
    clients: HashMap<u64, Client>,
    format: Option<ScreenFormat>,
    server: Option<JoinHandle<()>>,
    input: Box<dyn InputSink>,
    clipboard: Box<dyn ClipboardSink>,
}

impl RfbBridge {
    /// Bind the listener. Clients are only accepted once the pipeline
    /// has [registered](ProtocolBridge::register) its frame buffer.
    pub async fn bind(
        config: BridgeConfig,
        input: Box<dyn InputSink>,
        clipboard: Box<dyn ClipboardSink>,
    ) -> Result<Self, ServerError> {
        let listener = TcpListener::bind(&config.listen).await?;
        let local_addr = listener.local_addr()?;
        info!("RFB listening on {local_addr}");

        let (events_tx, events) = mpsc::channel(256);
        Ok(Self {
            config,
            listener: Some(listener),
            local_addr,
            events_tx,
            events,
            clients: HashMap::new(),
            format: None,
            server: None,
            input,
            clipboard,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    fn handle(&mut self, event: BridgeEvent, activity: &mut EngineActivity) {
        match event {
            BridgeEvent::Connected { id, peer, commands } => {
                if self.clients.len() >= self.config.max_clients {
                    warn!("rejecting {peer}: {} clients already connected", self.clients.len());
                    let _ = commands.try_send(SessionCommand::Close);
                    return;
                }
                self.clients.insert(
                    id,
                    Client {
                        peer,
                        commands,
                        requested: Rect::default(),
                        modified: Rect::default(),
                    },
                );
                activity.connected += 1;
            }
            BridgeEvent::Disconnected { id } => {
                if let Some(client) = self.clients.remove(&id) {
                    info!("client {id} ({}) disconnected", client.peer);
                    activity.disconnected += 1;
                }
            }
            BridgeEvent::Message { id, message } => {
                activity.events += 1;
                self.handle_message(id, message);
            }
        }
    }

    fn handle_message(&mut self, id: u64, message: ClientMessage) {
        let Some(format) = self.format.as_ref() else {
            return;
        };
        let scaling = self.config.scaling;

        let result = match message {
            ClientMessage::FramebufferUpdateRequest { incremental, rect } => {
                if let Some(client) = self.clients.get_mut(&id) {
                    let region = scaling.rect_to_source(rect, format);
                    client.requested = client.requested.union(&region);
                    if !incremental {
                        client.modified = client.modified.union(&region);
                    }
                }
                Ok(())
            }
            ClientMessage::KeyEvent { down, keysym } => {
                self.input.inject(InputEvent::Key { down, keysym })
            }
            ClientMessage::PointerEvent { buttons, x, y } => self.input.inject(InputEvent::Pointer {
                buttons: ButtonMask::from_bits_truncate(buttons),
                x: scaling.to_source(x as u32, format.width),
                y: scaling.to_source(y as u32, format.height),
            }),
            ClientMessage::ClientCutText(text) => self.clipboard.set_text(&text),
            // Sessions apply these themselves.
            ClientMessage::SetPixelFormat(_) | ClientMessage::SetEncodings(_) => Ok(()),
        };
        if let Err(e) = result {
            warn!("client {id}: {e}");
        }
    }

    /// Send every client the overlap of what it asked for and what
    /// changed.
    fn flush(&mut self) {
        for (id, client) in &mut self.clients {
            let due = client.requested.intersect(&client.modified);
            if due.is_empty() {
                continue;
            }
            match client.commands.try_send(SessionCommand::Update(due)) {
                Ok(()) => {
                    trace!("client {id}: update {due:?}");
                    if client.modified == due {
                        client.modified = Rect::default();
                    }
                    client.requested = Rect::default();
                }
                Err(TrySendError::Full(_)) => trace!("client {id} busy; update deferred"),
                Err(TrySendError::Closed(_)) => {}
            }
        }
    }
}

#[async_trait]
impl ProtocolBridge for RfbBridge {
    fn register(&mut self, format: &ScreenFormat, frame: SharedFrameBuffer) -> Result<(), VncdError> {
        let stored_format = WirePixelFormat::stored(format)?;
        let server_format = WirePixelFormat::from_screen(format)?;
        let depth = PixelDepth::for_bits(format.bits_per_pixel).ok_or_else(|| {
            VncdError::UnsupportedFormat(format!("{} bpp", format.bits_per_pixel))
        })?;
        let listener = self
            .listener
            .take()
            .ok_or_else(|| VncdError::Bridge("screen already registered".into()))?;

        let mut ctx = SessionContext::new(
            frame,
            format.clone(),
            stored_format,
            server_format,
            depth,
            self.config.scaling,
            self.config.desktop_name.clone(),
            self.events_tx.clone(),
        );
        ctx.handshake_timeout = self.config.handshake_timeout;
        let ctx = Arc::new(ctx);
        self.format = Some(format.clone());
        self.server = Some(tokio::spawn(serve(listener, self.config.reverse.clone(), ctx)));
        Ok(())
    }

    async fn process_events(&mut self, timeout: Duration) -> Result<EngineActivity, VncdError> {
        let mut activity = EngineActivity::default();

        if let Ok(Some(event)) = tokio::time::timeout(timeout, self.events.recv()).await {
            self.handle(event, &mut activity);
            while let Ok(event) = self.events.try_recv() {
                self.handle(event, &mut activity);
            }
        }
        self.flush();
        Ok(activity)
    }

    fn client_count(&self) -> usize {
        self.clients.len()
    }

    fn has_pending_request(&self) -> bool {
        self.clients.values().any(|c| !c.requested.is_empty())
    }

    fn mark_dirty(&mut self, rect: Rect) {
        for client in self.clients.values_mut() {
            client.modified = client.modified.union(&rect);
        }
        self.flush();
    }

    async fn shutdown(&mut self) {
        for client in self.clients.values() {
            let _ = client.commands.try_send(SessionCommand::Close);
        }
        self.clients.clear();
        if let Some(server) = self.server.take() {
            server.abort();
            let _ = server.await;
        }
        debug!("RFB bridge shut down");
    }
}

/// Accept loop. Dropping the task drops `sessions`, which aborts every
/// client.
async fn serve(listener: TcpListener, reverse: Option<(String, u16)>, ctx: Arc<SessionContext>) {
    let mut sessions = JoinSet::new();

    if let Some((host, port)) = reverse {
        match TcpStream::connect((host.as_str(), port)).await {
            Ok(stream) => {
                let peer = stream.peer_addr().unwrap_or_else(|_| SocketAddr::from(([0, 0, 0, 0], port)));
                info!("reverse connection to {host}:{port} established");
                sessions.spawn(run_session(stream, peer, Arc::clone(&ctx)));
            }
            Err(e) => warn!("reverse connection to {host}:{port} failed: {e}"),
        }
    }

    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    let _ = stream.set_nodelay(true);
                    sessions.spawn(run_session(stream, peer, Arc::clone(&ctx)));
                }
                Err(e) => warn!("accept error: {e}"),
            },
            Some(_) = sessions.join_next(), if !sessions.is_empty() => {}
        }
    }
}
