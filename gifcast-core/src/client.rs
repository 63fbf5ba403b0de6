//! The frame client: connect, receive, present.
//!
//! One task connects to the server, pulls framed video off the socket
//! into an adaptive pixel buffer and hands each frame to a
//! [`FrameSink`] for display. Whatever way the loop ends (stream end,
//! timeout, peer error), the client flips the global stop on its way
//! out.

use std::cell::RefCell;
use std::net::SocketAddr;
use std::rc::Rc;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::frame::{Frame, FrameHeader};
use crate::net;
use crate::stop::Stop;

/// Time budget for establishing the connection.
const CONNECT_BUDGET: Duration = Duration::from_secs(2);

/// Time budget for receiving one whole frame (header plus pixels),
/// not for single socket reads.
const RECEIVE_BUDGET: Duration = Duration::from_secs(2);

// ── FrameSink ────────────────────────────────────────────────────

/// Where received frames go: a blitting sink such as a window.
pub trait FrameSink {
    /// Adjust to the frame geometry announced by `header`.
    fn update_from(&mut self, header: &FrameHeader);
    /// Display the frame's pixels.
    fn present(&mut self, pixels: &[u8]);
}

// ── GrowingSpace ─────────────────────────────────────────────────

/// Receive buffer for pixels of unknown size.
///
/// Capacity only ever grows, to the largest size requested so far;
/// each request lends out exactly the requested length. Bytes beyond
/// a request's length are unspecified.
#[derive(Default)]
pub struct GrowingSpace {
    bytes: Vec<u8>,
}

impl GrowingSpace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lend out exactly `size` bytes, growing if needed.
    pub fn get(&mut self, size: usize) -> &mut [u8] {
        if size > self.bytes.len() {
            self.bytes.resize(size, 0);
        }
        &mut self.bytes[..size]
    }

    /// Current capacity of the buffer.
    pub fn capacity(&self) -> usize {
        self.bytes.len()
    }
}

// ── Receiving ────────────────────────────────────────────────────

/// Receive one frame: 16 header bytes, then exactly the payload the
/// header announces, into `pixel_space`.
///
/// Any shortfall, in the header or in the pixels, yields the no-frame
/// value, which the caller treats as end of stream. `deadline` covers
/// the whole frame.
pub async fn receive_frame<'a>(
    socket: &mut TcpStream,
    deadline: Instant,
    pixel_space: &'a mut GrowingSpace,
) -> Frame<'a> {
    let mut header_space = [0u8; FrameHeader::SIZE];
    if net::receive(socket, deadline, &mut header_space).await.is_err() {
        return Frame::none();
    }

    let header = FrameHeader::decode(&header_space);
    let pixels = pixel_space.get(header.size_pixels());
    if !pixels.is_empty()
        && net::receive(socket, deadline, &mut pixels[..]).await.is_err()
        && !header.is_filler()
    {
        return Frame::none();
    }
    Frame { header, pixels }
}

// ── Presenting ───────────────────────────────────────────────────

/// Connect to the server and present received frames until the stream
/// ends or stop is requested; then flip the global stop.
///
/// The sink is shared with the GUI event watcher on the same executor
/// thread; the borrow is taken per frame and never held across a
/// suspension point.
pub async fn show_videos<S: FrameSink>(
    endpoints: Vec<SocketAddr>,
    sink: Rc<RefCell<S>>,
    stop: Stop,
) {
    let deadline = Instant::now() + CONNECT_BUDGET;
    match net::connect(&endpoints, deadline).await {
        Ok(mut socket) => {
            let mut pixel_space = GrowingSpace::new();
            while !stop.is_requested() {
                let deadline = Instant::now() + RECEIVE_BUDGET;
                let frame = receive_frame(&mut socket, deadline, &mut pixel_space).await;
                let header = frame.header;
                if header.is_no_frame() {
                    break;
                }

                {
                    let mut sink = sink.borrow_mut();
                    sink.update_from(&header);
                    sink.present(frame.pixels);
                }
                if header.is_filler() {
                    info!("filler");
                } else {
                    info!("frame {:3} {}x{}", header.sequence, header.width, header.height);
                }
            }
            net::close(socket).await;
        }
        Err(error) => warn!(%error, "could not connect to the server"),
    }
    stop.request();
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn growing_space_lends_exact_lengths() {
        let mut space = GrowingSpace::new();
        assert_eq!(space.get(16).len(), 16);
        assert_eq!(space.get(4).len(), 4);
    }

    #[test]
    fn growing_space_never_shrinks() {
        let mut space = GrowingSpace::new();
        let sizes = [100, 50, 400, 200, 0, 400, 800, 1, 799, 12];
        for size in sizes {
            space.get(size);
        }
        assert_eq!(space.capacity(), 800);
    }

    #[test]
    fn growing_space_reuses_capacity() {
        let mut space = GrowingSpace::new();
        space.get(1000)[999] = 0xAB;
        // a smaller request does not reallocate
        space.get(10);
        assert_eq!(space.capacity(), 1000);
    }
}
