//! Integration tests: streaming lifecycle over real TCP on localhost.
//! Filler cadence from an empty media directory, wire round-trips,
//! receive timeouts and partial bind failures.

use std::fs;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;
use tokio::task::LocalSet;
use tokio::time::Instant;

use gifcast_core::client::{self, GrowingSpace};
use gifcast_core::frame::{FrameHeader, PixelFormat};
use gifcast_core::{net, server, Stop};

// ── Helpers ──────────────────────────────────────────────────────

/// A unique, empty scratch directory under the system temp dir.
fn scratch_dir(tag: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("gifcast-it-{tag}-{}", std::process::id()));
    let _ = fs::remove_dir_all(&dir);
    fs::create_dir_all(&dir).unwrap();
    dir
}

fn ephemeral() -> Vec<SocketAddr> {
    vec!["127.0.0.1:0".parse().unwrap()]
}

// ── Filler streaming ─────────────────────────────────────────────

#[tokio::test]
async fn empty_media_directory_streams_fillers() {
    let local = LocalSet::new();
    local
        .run_until(async {
            let media = scratch_dir("fillers");
            let stop = Stop::new();
            let bound = server::serve(&ephemeral(), &media, &stop).await.unwrap();

            let deadline = Instant::now() + Duration::from_secs(2);
            let mut socket = net::connect(&bound, deadline).await.unwrap();
            let mut pixel_space = GrowingSpace::new();

            // the first filler arrives promptly after connecting
            let deadline = Instant::now() + Duration::from_secs(2);
            let frame = client::receive_frame(&mut socket, deadline, &mut pixel_space).await;
            assert!(frame.header.is_filler());
            assert_eq!(frame.header.width, 0);
            assert_eq!(frame.header.height, 0);
            assert_eq!(frame.header.line_pitch, 0);
            assert_eq!(frame.header.format, PixelFormat::Invalid);
            assert_eq!(frame.header.sequence, 0);
            assert_eq!(frame.header.timestamp, 100_000);
            assert!(frame.pixels.is_empty());

            // further fillers keep the 100 ms cadence (within the
            // send-budget tolerance)
            let before = Instant::now();
            let deadline = before + Duration::from_secs(2);
            let frame = client::receive_frame(&mut socket, deadline, &mut pixel_space).await;
            assert!(frame.header.is_filler());
            let elapsed = before.elapsed();
            assert!(
                elapsed >= Duration::from_millis(40),
                "filler arrived too early: {elapsed:?}"
            );
            assert!(
                elapsed <= Duration::from_millis(500),
                "filler arrived too late: {elapsed:?}"
            );

            stop.request();
            let _ = fs::remove_dir_all(media);
        })
        .await;
}

#[tokio::test]
async fn stop_ends_a_live_stream() {
    let local = LocalSet::new();
    local
        .run_until(async {
            let media = scratch_dir("stop");
            let stop = Stop::new();
            let bound = server::serve(&ephemeral(), &media, &stop).await.unwrap();

            let deadline = Instant::now() + Duration::from_secs(2);
            let mut socket = net::connect(&bound, deadline).await.unwrap();
            let mut pixel_space = GrowingSpace::new();

            let deadline = Instant::now() + Duration::from_secs(2);
            let frame = client::receive_frame(&mut socket, deadline, &mut pixel_space).await;
            assert!(frame.header.is_filler());

            // stop twice: idempotent, and the streamer's socket closes
            stop.request();
            stop.request();

            // the peer close surfaces as no-frame well within a budget
            let deadline = Instant::now() + Duration::from_secs(2);
            let frame = client::receive_frame(&mut socket, deadline, &mut pixel_space).await;
            assert!(frame.header.is_no_frame());

            let _ = fs::remove_dir_all(media);
        })
        .await;
}

// ── Wire round-trip ──────────────────────────────────────────────

#[tokio::test]
async fn video_frame_survives_the_wire() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let header = FrameHeader {
        width: 100,
        height: 100,
        line_pitch: 400,
        format: PixelFormat::Rgba,
        sequence: 1,
        timestamp: 40_000,
    };
    let pixels = vec![0x5Au8; header.size_pixels()];

    let payload = pixels.clone();
    let writer = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        socket.write_all(&header.encode()).await.unwrap();
        socket.write_all(&payload).await.unwrap();
    });

    let deadline = Instant::now() + Duration::from_secs(2);
    let mut socket = net::connect(&[addr], deadline).await.unwrap();
    let mut pixel_space = GrowingSpace::new();

    let deadline = Instant::now() + Duration::from_secs(2);
    let frame = client::receive_frame(&mut socket, deadline, &mut pixel_space).await;

    assert_eq!(frame.header, header);
    assert_eq!(frame.pixels.len(), 40_000);
    assert_eq!(frame.pixels, &pixels[..]);
    writer.await.unwrap();
}

#[tokio::test]
async fn truncated_pixels_read_as_no_frame() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let header = FrameHeader {
        width: 4,
        height: 4,
        line_pitch: 16,
        format: PixelFormat::Bgra,
        sequence: 1,
        timestamp: 0,
    };

    let writer = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        socket.write_all(&header.encode()).await.unwrap();
        // only half the announced payload, then close
        socket.write_all(&[0u8; 32]).await.unwrap();
    });

    let deadline = Instant::now() + Duration::from_secs(2);
    let mut socket = net::connect(&[addr], deadline).await.unwrap();
    let mut pixel_space = GrowingSpace::new();

    let deadline = Instant::now() + Duration::from_secs(2);
    let frame = client::receive_frame(&mut socket, deadline, &mut pixel_space).await;
    assert!(frame.header.is_no_frame());
    writer.await.unwrap();
}

// ── Timeouts ─────────────────────────────────────────────────────

#[tokio::test]
async fn silent_server_times_out_into_no_frame() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let keeper = tokio::spawn(async move {
        // accept and hold the socket open without ever sending
        let (socket, _) = listener.accept().await.unwrap();
        tokio::time::sleep(Duration::from_secs(5)).await;
        drop(socket);
    });

    let deadline = Instant::now() + Duration::from_secs(2);
    let mut socket = net::connect(&[addr], deadline).await.unwrap();
    let mut pixel_space = GrowingSpace::new();

    let before = Instant::now();
    let budget = Duration::from_millis(300);
    let frame = client::receive_frame(&mut socket, before + budget, &mut pixel_space).await;

    assert!(frame.header.is_no_frame());
    assert!(before.elapsed() >= budget);
    keeper.abort();
}

// ── Bind failures ────────────────────────────────────────────────

#[tokio::test]
async fn one_failing_endpoint_does_not_stop_the_server() {
    let local = LocalSet::new();
    local
        .run_until(async {
            let media = scratch_dir("bind");
            let stop = Stop::new();

            // occupy a port, then ask serve() for it plus a free one
            let occupied = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let taken = occupied.local_addr().unwrap();
            let endpoints = vec![taken, "127.0.0.1:0".parse().unwrap()];

            let bound = server::serve(&endpoints, &media, &stop).await.unwrap();
            assert_eq!(bound.len(), 1);
            assert_ne!(bound[0], taken);

            // the surviving acceptor streams as usual
            let deadline = Instant::now() + Duration::from_secs(2);
            let mut socket = net::connect(&bound, deadline).await.unwrap();
            let mut pixel_space = GrowingSpace::new();
            let deadline = Instant::now() + Duration::from_secs(2);
            let frame = client::receive_frame(&mut socket, deadline, &mut pixel_space).await;
            assert!(frame.header.is_filler());

            stop.request();
            let _ = fs::remove_dir_all(media);
        })
        .await;
}

#[tokio::test]
async fn no_bindable_endpoint_is_an_error() {
    let local = LocalSet::new();
    local
        .run_until(async {
            let media = scratch_dir("nobind");
            let stop = Stop::new();

            let occupied = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let endpoints = vec![occupied.local_addr().unwrap()];

            assert!(server::serve(&endpoints, &media, &stop).await.is_err());
            let _ = fs::remove_dir_all(media);
        })
        .await;
}
