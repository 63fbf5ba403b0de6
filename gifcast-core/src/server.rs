//! The frame server: per-endpoint acceptors and per-connection
//! streamers with paced delivery.
//!
//! Every connection gets its own decoder pipeline and pacing state.
//! The pacer schedules each frame at `StartTime + Timestamp`, where
//! `StartTime` resets to *now* whenever a new file begins, so playback
//! aligns to the wall clock at every file boundary and drift cannot
//! accumulate across files. Fillers carry their delta in their own
//! timestamp but are paced by the previous frame's; reusing the last
//! step keeps them from racing.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::time::{self, Instant};
use tracing::{debug, info, warn};

use crate::error::CastError;
use crate::frame::FrameHeader;
use crate::net;
use crate::pipeline::FramePipeline;
use crate::stop::{self, Stop};

/// The well-known port frames are served on.
pub const SERVER_PORT: u16 = 34567;

/// Time budget for sending one frame (header plus pixels).
const SEND_BUDGET: Duration = Duration::from_millis(100);

// ── FrameTimebase ────────────────────────────────────────────────

/// Per-connection pacing state.
///
/// Tracks the monotonic instant of the current file's frame zero and
/// the previously seen timestamp and sequence number.
pub struct FrameTimebase {
    start_time: Instant,
    last_timestamp: Duration,
    last_sequence: i32,
}

impl FrameTimebase {
    pub fn new(now: Instant) -> Self {
        FrameTimebase {
            start_time: now,
            last_timestamp: Duration::ZERO,
            last_sequence: i32::MAX,
        }
    }

    /// The instant the given frame is due for sending.
    ///
    /// A first frame resets the timebase, so it is due immediately;
    /// fillers step by the previous timestamp.
    pub fn due_time(&mut self, header: &FrameHeader, now: Instant) -> Instant {
        if header.is_first_frame(self.last_sequence) {
            self.start_time = now;
        }
        let offset = if header.is_filler() {
            self.last_timestamp
        } else {
            Duration::from_micros(u64::from(header.timestamp))
        };
        let due = self.start_time + offset;
        self.last_sequence = header.sequence;
        self.last_timestamp = Duration::from_micros(u64::from(header.timestamp));
        due
    }
}

// ── Serving ──────────────────────────────────────────────────────

/// Bind the endpoints and spawn an acceptor task per successful bind.
///
/// Returns the locally bound addresses. Individual bind failures are
/// logged and tolerated; only a total failure is an error.
/// Precondition: `endpoints` is not empty.
pub async fn serve(
    endpoints: &[SocketAddr],
    media_directory: &Path,
    stop: &Stop,
) -> Result<Vec<SocketAddr>, CastError> {
    debug_assert!(!endpoints.is_empty());
    let mut bound = Vec::new();
    for endpoint in endpoints {
        match TcpListener::bind(endpoint).await {
            Ok(listener) => {
                let local = listener.local_addr()?;
                debug!(%local, "acceptor bound");
                bound.push(local);
                stop::spawn(
                    stop,
                    accept_connections(listener, stop.clone(), media_directory.to_path_buf()),
                );
            }
            Err(error) => warn!(%endpoint, %error, "could not bind endpoint"),
        }
    }
    if bound.is_empty() {
        Err(CastError::NoBind)
    } else {
        Ok(bound)
    }
}

/// Accept connections until stopped; each one gets a streamer task.
async fn accept_connections(listener: TcpListener, stop: Stop, media_directory: PathBuf) {
    loop {
        match listener.accept().await {
            Ok((socket, peer)) => {
                if stop.is_requested() {
                    break;
                }
                info!(%peer, "streaming to new connection");
                let _ = socket.set_nodelay(true);
                stop::spawn(
                    &stop,
                    stream_frames(socket, stop.clone(), media_directory.clone()),
                );
            }
            Err(error) => {
                warn!(%error, "accept failed");
                break;
            }
        }
    }
}

/// Stream paced frames to one peer until it goes away or stop fires.
async fn stream_frames(mut socket: TcpStream, stop: Stop, media_directory: PathBuf) {
    let mut frames = FramePipeline::new(media_directory);
    let mut timebase = FrameTimebase::new(Instant::now());

    loop {
        let frame = frames.next_frame();
        let due = timebase.due_time(&frame.header, Instant::now());
        time::sleep_until(due).await;

        let header_bytes = frame.header.encode();
        let expected = FrameHeader::SIZE + frame.header.size_pixels();
        let deadline = Instant::now() + SEND_BUDGET;
        let sent = net::send(&mut socket, deadline, &[&header_bytes, frame.pixels]).await;

        if !matches!(sent, Ok(n) if n == expected) || stop.is_requested() {
            break;
        }
    }

    net::close(socket).await;
    debug!("streamer finished");
}

// ── Tests ────────────────────────────────────────────────────────
