//! Integration tests: the RFB bridge served over a real TCP connection
//! on localhost.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use vncd::rfb::{BridgeConfig, RfbBridge};
use vncd_core::screen::format::{FormatResolver, hal};
use vncd_core::{
    ButtonMask, ClipboardSink, FrameBuffer, InputEvent, InputSink, ProtocolBridge, Rotation,
    Scaling, ScreenFormat, SharedFrameBuffer, VncdError,
};

// ── Helpers ──────────────────────────────────────────────────────

#[derive(Clone, Default)]
struct Recorder {
    input: Arc<Mutex<Vec<InputEvent>>>,
    text: Arc<Mutex<Vec<String>>>,
}

impl InputSink for Recorder {
    fn inject(&mut self, event: InputEvent) -> Result<(), VncdError> {
        self.input.lock().unwrap().push(event);
        Ok(())
    }
}

impl ClipboardSink for Recorder {
    fn set_text(&mut self, text: &str) -> Result<(), VncdError> {
        self.text.lock().unwrap().push(text.to_string());
        Ok(())
    }
}

fn screen(width: u32, height: u32) -> (ScreenFormat, SharedFrameBuffer) {
    let info = FormatResolver::new().describe(hal::RGBA_8888).unwrap();
    let format = ScreenFormat::from_pixel_info(&info, width, height, Rotation::Deg0).unwrap();
    let mut fb = FrameBuffer::zeroed(format.size);
    fb.as_bytes_mut().fill(0x11);
    (format, SharedFrameBuffer::new(fb))
}

fn bridge_config(scale: u16) -> BridgeConfig {
    BridgeConfig {
        listen: "127.0.0.1:0".into(),
        reverse: None,
        desktop_name: "vncd-test".into(),
        max_clients: 4,
        scaling: Scaling::from_percent(scale),
        handshake_timeout: Duration::from_secs(5),
    }
}

async fn bridge_with(config: BridgeConfig, recorder: &Recorder) -> RfbBridge {
    RfbBridge::bind(config, Box::new(recorder.clone()), Box::new(recorder.clone()))
        .await
        .unwrap()
}

async fn bridge(scale: u16, recorder: &Recorder) -> RfbBridge {
    bridge_with(bridge_config(scale), recorder).await
}

/// Client side of a 3.8 handshake; returns the advertised size.
async fn client_handshake(stream: &mut TcpStream) -> (u16, u16) {
    let mut banner = [0u8; 12];
    stream.read_exact(&mut banner).await.unwrap();
    assert_eq!(&banner, b"RFB 003.008\n");
    stream.write_all(b"RFB 003.008\n").await.unwrap();

    let mut types = [0u8; 2];
    stream.read_exact(&mut types).await.unwrap();
    stream.write_u8(1).await.unwrap();
    assert_eq!(stream.read_u32().await.unwrap(), 0);

    stream.write_u8(1).await.unwrap();
    let width = stream.read_u16().await.unwrap();
    let height = stream.read_u16().await.unwrap();
    let mut pf = [0u8; 16];
    stream.read_exact(&mut pf).await.unwrap();
    let name_len = stream.read_u32().await.unwrap() as usize;
    let mut name = vec![0u8; name_len];
    stream.read_exact(&mut name).await.unwrap();
    assert_eq!(name, b"vncd-test");
    (width, height)
}

async fn request_update(stream: &mut TcpStream, incremental: bool, w: u16, h: u16) {
    let mut msg = vec![3, incremental as u8, 0, 0, 0, 0];
    msg.extend_from_slice(&w.to_be_bytes());
    msg.extend_from_slice(&h.to_be_bytes());
    stream.write_all(&msg).await.unwrap();
}

/// Read one single-rectangle raw update; returns `(w, h, pixels)`.
async fn read_update(stream: &mut TcpStream) -> (u16, u16, Vec<u8>) {
    assert_eq!(stream.read_u8().await.unwrap(), 0);
    stream.read_u8().await.unwrap();
    assert_eq!(stream.read_u16().await.unwrap(), 1);
    let _x = stream.read_u16().await.unwrap();
    let _y = stream.read_u16().await.unwrap();
    let w = stream.read_u16().await.unwrap();
    let h = stream.read_u16().await.unwrap();
    assert_eq!(stream.read_i32().await.unwrap(), 0);
    let mut pixels = vec![0u8; w as usize * h as usize * 4];
    stream.read_exact(&mut pixels).await.unwrap();
    (w, h, pixels)
}

/// Pump the bridge until `done` says so, or give up after ~5 s.
async fn pump_until(bridge: &mut RfbBridge, mut done: impl FnMut(&mut RfbBridge) -> bool) {
    for _ in 0..250 {
        bridge.process_events(Duration::from_millis(20)).await.unwrap();
        if done(bridge) {
            return;
        }
    }
    panic!("bridge did not reach the expected state");
}

// ── Tests ────────────────────────────────────────────────────────

#[tokio::test]
async fn full_then_incremental_update() {
    let recorder = Recorder::default();
    let mut bridge = bridge(100, &recorder).await;
    let (format, frame) = screen(8, 4);
    bridge.register(&format, frame.clone()).unwrap();
    let addr = bridge.local_addr();

    let client = tokio::spawn(async move {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        let (w, h) = client_handshake(&mut stream).await;
        assert_eq!((w, h), (8, 4));

        request_update(&mut stream, false, w, h).await;
        let first = read_update(&mut stream).await;

        request_update(&mut stream, true, w, h).await;
        let second = read_update(&mut stream).await;
        (first, second)
    });

    // The non-incremental request is answered from the current frame.
    pump_until(&mut bridge, |b| b.client_count() == 1 && b.has_pending_request()).await;

    // The incremental one waits for new content.
    frame.write().unwrap().as_bytes_mut().fill(0x22);
    bridge.mark_dirty(format.full_rect());
    assert!(!bridge.has_pending_request());

    let (first, second) = tokio::time::timeout(Duration::from_secs(5), client)
        .await
        .unwrap()
        .unwrap();
    assert_eq!((first.0, first.1), (8, 4));
    assert!(first.2.iter().all(|&b| b == 0x11));
    assert!(second.2.iter().all(|&b| b == 0x22));

    bridge.shutdown().await;
    assert_eq!(bridge.client_count(), 0);
}

#[tokio::test]
async fn input_is_forwarded_in_source_coordinates() {
    let recorder = Recorder::default();
    let mut bridge = bridge(50, &recorder).await;
    let (format, frame) = screen(100, 60);
    bridge.register(&format, frame).unwrap();
    let addr = bridge.local_addr();

    let client = tokio::spawn(async move {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        let size = client_handshake(&mut stream).await;

        // Pointer at (10, 20) with the left button, then a key press
        // and cut text.
        stream.write_all(&[5, 1, 0, 10, 0, 20]).await.unwrap();
        stream
            .write_all(&[4, 1, 0, 0, 0, 0, 0x00, 0x61])
            .await
            .unwrap();
        stream
            .write_all(&[6, 0, 0, 0, 0, 0, 0, 2, b'h', b'i'])
            .await
            .unwrap();
        stream.flush().await.unwrap();
        (size, stream)
    });

    let input = Arc::clone(&recorder.input);
    let text = Arc::clone(&recorder.text);
    pump_until(&mut bridge, |_| {
        input.lock().unwrap().len() == 2 && text.lock().unwrap().len() == 1
    })
    .await;

    let (size, _stream) = client.await.unwrap();
    assert_eq!(size, (50, 30));
    assert_eq!(
        recorder.input.lock().unwrap().clone(),
        vec![
            InputEvent::Pointer {
                buttons: ButtonMask::LEFT,
                x: 20,
                y: 40,
            },
            InputEvent::Key {
                down: true,
                keysym: 0x61,
            },
        ]
    );
    assert_eq!(recorder.text.lock().unwrap()[0], "hi");

    bridge.shutdown().await;
}

#[tokio::test]
async fn disconnect_is_reported() {
    let recorder = Recorder::default();
    let mut bridge = bridge(100, &recorder).await;
    let (format, frame) = screen(4, 4);
    bridge.register(&format, frame).unwrap();
    let addr = bridge.local_addr();

    let mut stream = TcpStream::connect(addr).await.unwrap();
    let client = tokio::spawn(async move {
        client_handshake(&mut stream).await;
        stream
    });
    pump_until(&mut bridge, |b| b.client_count() == 1).await;

    drop(client.await.unwrap());
    pump_until(&mut bridge, |b| b.client_count() == 0).await;

    bridge.shutdown().await;
}

#[tokio::test]
async fn stalled_handshake_is_dropped() {
    let recorder = Recorder::default();
    let config = BridgeConfig {
        handshake_timeout: Duration::from_millis(100),
        ..bridge_config(100)
    };
    let mut bridge = bridge_with(config, &recorder).await;
    let (format, frame) = screen(4, 4);
    bridge.register(&format, frame).unwrap();

    // Read the banner, then never answer it.
    let mut stream = TcpStream::connect(bridge.local_addr()).await.unwrap();
    let mut banner = [0u8; 12];
    stream.read_exact(&mut banner).await.unwrap();

    let mut rest = [0u8; 1];
    let closed = tokio::time::timeout(Duration::from_secs(5), stream.read(&mut rest))
        .await
        .expect("server kept a stalled handshake open");
    assert!(matches!(closed, Ok(0) | Err(_)));
    assert_eq!(bridge.client_count(), 0);

    bridge.shutdown().await;
}

#[tokio::test]
async fn registering_twice_fails() {
    let recorder = Recorder::default();
    let mut bridge = bridge(100, &recorder).await;
    let (format, frame) = screen(4, 4);
    bridge.register(&format, frame.clone()).unwrap();
    assert!(matches!(
        bridge.register(&format, frame),
        Err(VncdError::Bridge(_))
    ));
    bridge.shutdown().await;
}
