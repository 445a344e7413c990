use std::time::Duration;

use bytes::Bytes;
use camwatch_common::config::SessionConfig;
use camwatch_common::frame::Frame;
use image::codecs::jpeg::JpegEncoder;
use image::{Rgb, RgbImage};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};

use crate::observer::StreamEvent;

/// Small rasters so fixtures stay cheap to encode and decode.
pub(crate) fn test_config() -> SessionConfig {
    SessionConfig {
        downscale_width: 16,
        downscale_height: 12,
        ..SessionConfig::default()
    }
}

pub(crate) fn encode_jpeg(width: u32, height: u32, color: [u8; 3]) -> Vec<u8> {
    let img = RgbImage::from_pixel(width, height, Rgb(color));
    let mut out = Vec::new();
    JpegEncoder::new_with_quality(&mut out, 90)
        .encode_image(&img)
        .expect("encode test jpeg");
    out
}

pub(crate) fn frame_from(data: Vec<u8>, seq: u64) -> Frame {
    Frame::new(Bytes::from(data), seq, 0)
}

pub(crate) async fn next_event(rx: &mut mpsc::UnboundedReceiver<StreamEvent>) -> StreamEvent {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for stream event")
        .expect("event channel closed")
}

pub(crate) struct CameraBody {
    frames: Vec<Vec<u8>>,
    hold_open: bool,
}

impl CameraBody {
    /// Send the frames, then close the connection.
    pub(crate) fn closing(frames: Vec<Vec<u8>>) -> Self {
        Self {
            frames,
            hold_open: false,
        }
    }

    /// Send the frames, then keep the connection open without sending more.
    pub(crate) fn held_open(frames: Vec<Vec<u8>>) -> Self {
        Self {
            frames,
            hold_open: true,
        }
    }
}

pub(crate) struct FakeCamera {
    pub url: String,
    /// Raw request head received from the client.
    pub request: oneshot::Receiver<String>,
}

fn response_head(status: &str) -> String {
    format!(
        "HTTP/1.1 {status}\r\n\
         Content-Type: multipart/x-mixed-replace; boundary=frame\r\n\
         Connection: close\r\n\r\n"
    )
}

async fn read_request(socket: &mut TcpStream) -> String {
    let mut request = Vec::new();
    let mut buf = [0u8; 1024];
    while !request.windows(4).any(|w| w == b"\r\n\r\n") {
        let n = socket.read(&mut buf).await.expect("read request");
        if n == 0 {
            break;
        }
        request.extend_from_slice(&buf[..n]);
    }
    String::from_utf8_lossy(&request).into_owned()
}

async fn write_frames(socket: &mut TcpStream, head: &str, frames: &[Vec<u8>]) {
    socket.write_all(head.as_bytes()).await.expect("write head");
    for frame in frames {
        let part = format!(
            "--frame\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\n\r\n",
            frame.len()
        );
        socket.write_all(part.as_bytes()).await.expect("write part");
        // Split each frame across two writes.
        let (first, second) = frame.split_at(frame.len() / 2);
        socket.write_all(first).await.expect("write frame");
        socket.flush().await.expect("flush");
        socket.write_all(second).await.expect("write frame");
        socket.write_all(b"\r\n").await.expect("write trailer");
        socket.flush().await.expect("flush");
    }
}

/// Serve one multipart MJPEG response on a loopback port.
pub(crate) async fn fake_camera(status: &str, body: CameraBody) -> FakeCamera {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    let head = response_head(status);
    let (request_tx, request_rx) = oneshot::channel();

    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.expect("accept");
        let _ = request_tx.send(read_request(&mut socket).await);

        write_frames(&mut socket, &head, &body.frames).await;
        if body.hold_open {
            std::future::pending::<()>().await;
        }
        let _ = socket.shutdown().await;
    });

    FakeCamera {
        url: format!("http://{addr}/stream"),
        request: request_rx,
    }
}

/// Serve the same response to every connection, closing after the frames.
/// Returns the URL.
pub(crate) async fn repeating_camera(status: &str, frames: Vec<Vec<u8>>) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    let head = response_head(status);

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            read_request(&mut socket).await;
            write_frames(&mut socket, &head, &frames).await;
            let _ = socket.shutdown().await;
        }
    });

    format!("http://{addr}/stream")
}
