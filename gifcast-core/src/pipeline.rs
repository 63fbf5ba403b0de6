//! The lazy decoder pipeline: an infinite sequence of video frames
//! drawn from a mutable media directory.
//!
//! Stages, each pulled on demand:
//!
//! 1. an endless directory source that restarts its listing whenever
//!    it runs out (picking up newly dropped files) and yields an empty
//!    path when nothing is there,
//! 2. an extension filter passing `.gif` files and the empty sentinel,
//! 3. a format-layer open accepting only files whose best video stream
//!    is stream 0 with the GIF codec,
//! 4. a decoder open rejecting still images,
//! 5. the per-file decode loop.
//!
//! When a pull produces no decodable media, the pipeline emits a
//! single filler frame instead, so the downstream streamer always has
//! something to pace. The pipeline never terminates.

use std::ffi::OsStr;
use std::fs::{self, ReadDir};
use std::path::{Path, PathBuf};
use std::slice;
use std::time::Duration;

use tracing::info;

use crate::frame::{Frame, FrameHeader};
use crate::libav::{self, Codec, File, FIRST_STREAM, MAIN_PLANE};

/// Pause announced by filler frames while no media is available.
pub const FILLER_INTERVAL: Duration = Duration::from_millis(100);

// ── EternalDirIter ───────────────────────────────────────────────

/// Endless source of paths from one directory.
///
/// Each pull advances a `read_dir` listing; when the listing ends or
/// errors it is restarted against the same directory, so files dropped
/// in later are picked up on the next cycle. If a restarted listing
/// has nothing to offer either, the pull yields the empty path
/// sentinel. The source never terminates.
pub struct EternalDirIter {
    directory: PathBuf,
    entries: Option<ReadDir>,
    generation: u64,
}

impl EternalDirIter {
    pub fn new(directory: PathBuf) -> Self {
        EternalDirIter {
            directory,
            entries: None,
            generation: 0,
        }
    }

    /// How many times the listing has been restarted.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// The next path, or the empty sentinel.
    pub fn next_path(&mut self) -> PathBuf {
        if let Some(entries) = &mut self.entries {
            if let Some(Ok(entry)) = entries.next() {
                return entry.path();
            }
        }
        self.generation += 1;
        self.entries = fs::read_dir(&self.directory).ok();
        if let Some(entries) = &mut self.entries {
            if let Some(Ok(entry)) = entries.next() {
                return entry.path();
            }
        }
        PathBuf::new()
    }
}

/// Filter stage: the empty sentinel passes, as do `.gif` paths.
// TODO: make the extension comparison case-insensitive
fn wants_path(path: &Path) -> bool {
    path.as_os_str().is_empty() || path.extension() == Some(OsStr::new("gif"))
}

// ── Open stages ──────────────────────────────────────────────────

/// Open `path` with the format layer, keeping the file only if its
/// best video stream is stream 0 and the codec is GIF. Everything
/// else collapses to a null handle.
fn try_open_as_gif(path: &Path) -> File {
    let mut file = libav::open_file(path);
    if file.have() && !accept_only_gif(&mut file) {
        file.clear();
    }
    file
}

fn accept_only_gif(file: &mut File) -> bool {
    let (stream, codec) = libav::best_video_stream(file, libav::DETECT_STREAM);
    stream == FIRST_STREAM
        && libav::codec_id(codec) == Some(ffmpeg_sys_next::AVCodecID::AV_CODEC_ID_GIF)
}

/// Open a video decoder for the file's first stream, refusing still
/// images. Any failure yields a null pair.
fn try_open_decoder(mut file: File) -> (File, Codec) {
    if !file.have() {
        return (File::null(), Codec::null());
    }

    libav::probe_streams(&mut file);
    let (_, codec) = libav::best_video_stream(&mut file, FIRST_STREAM);
    if libav::duration(&file) <= 0 {
        return (File::null(), Codec::null()); // refuse still images
    }

    let decoder = libav::open_decoder(&file, codec);
    if decoder.have() {
        (file, decoder)
    } else {
        (File::null(), Codec::null())
    }
}

// ── ActiveDecode ─────────────────────────────────────────────────

/// The decode loop of one accepted file.
///
/// `step` drives read-packet / send-packet / receive-frame until a
/// frame is held or the file ends; `current_frame` views the held
/// frame as a wire-ready value borrowing the decoder's pixel plane.
struct ActiveDecode {
    file: File,
    decoder: Codec,
    packet: libav::Packet,
    frame: libav::Frame,
    tick: Duration,
    sequence: i32,
    draining: bool,
    done: bool,
}

impl ActiveDecode {
    fn new(file: File, decoder: Codec) -> Option<Self> {
        let packet = libav::Packet::new();
        let frame = libav::Frame::new();
        if !packet.have() || !frame.have() {
            return None;
        }
        let tick = libav::tick_duration(&file);
        Some(ActiveDecode {
            file,
            decoder,
            packet,
            frame,
            tick,
            sequence: 0,
            draining: false,
            done: false,
        })
    }

    /// Decode until a frame is held. Returns false once the file is
    /// exhausted or the read fails.
    fn step(&mut self) -> bool {
        if self.done {
            return false;
        }
        loop {
            if self.draining {
                self.frame.unref();
                let rc = libav::receive_frame(&mut self.decoder, &mut self.frame);
                if libav::successful(rc) {
                    self.sequence += 1;
                    return true;
                }
                if libav::at_end_of_file(rc) {
                    self.done = true;
                    return false;
                }
                self.draining = false; // decoder wants another packet
            }

            if !libav::successful(libav::read_frame(&mut self.file, &mut self.packet)) {
                self.done = true;
                return false;
            }
            // the packet's reference is returned on every path out of
            // this iteration
            let packet = self.packet.drop_reference();
            // SAFETY: the guarded packet is live while the guard is.
            if unsafe { (*packet.as_ptr()).stream_index } != FIRST_STREAM {
                continue;
            }
            if libav::successful(libav::send_packet(&mut self.decoder, packet.as_ptr())) {
                self.draining = true;
            }
        }
    }

    /// The held frame, as header plus a borrow of the main plane.
    fn current_frame(&self) -> Frame<'_> {
        // SAFETY: `step` returned true, so the frame handle holds a
        // freshly received frame whose planes stay valid until the
        // next `step`.
        let av = self.frame.as_ptr();
        let header = unsafe {
            FrameHeader {
                width: (*av).width as i16,
                height: (*av).height as i16,
                line_pitch: (*av).linesize[MAIN_PLANE] as i16,
                format: libav::pixel_format((*av).format),
                sequence: self.sequence,
                timestamp: timestamp(self.tick, (*av).pts),
            }
        };
        let size = header.size_pixels();
        let pixels = if size == 0 {
            &[][..]
        } else {
            // SAFETY: the main plane holds `height · line_pitch` bytes.
            unsafe { slice::from_raw_parts((*av).data[MAIN_PLANE] as *const u8, size) }
        };
        Frame { header, pixels }
    }
}

/// Presentation timestamp in microseconds: `tick · pts`.
fn timestamp(tick: Duration, pts: i64) -> u32 {
    (tick.as_micros() as u64)
        .saturating_mul(pts.max(0) as u64)
        .min(u64::from(u32::MAX)) as u32
}

// ── FramePipeline ────────────────────────────────────────────────

/// The composed pipeline: an infinite frame producer over a directory.
pub struct FramePipeline {
    paths: EternalDirIter,
    active: Option<ActiveDecode>,
}

impl FramePipeline {
    pub fn new(media_directory: PathBuf) -> Self {
        FramePipeline {
            paths: EternalDirIter::new(media_directory),
            active: None,
        }
    }

    /// The next frame: decoded media if available, a filler otherwise.
    /// Never ends.
    pub fn next_frame(&mut self) -> Frame<'_> {
        let decoded = self.advance();
        match (&self.active, decoded) {
            (Some(active), true) => active.current_frame(),
            _ => Frame::filler(FILLER_INTERVAL),
        }
    }

    /// Drive the stages until the active file holds a frame (true) or
    /// a filler is due (false).
    fn advance(&mut self) -> bool {
        loop {
            if let Some(active) = &mut self.active {
                if active.step() {
                    return true;
                }
                self.active = None; // file exhausted, move on
                continue;
            }

            let path = self.next_media_path();
            let (file, decoder) = try_open_decoder(try_open_as_gif(&path));
            if decoder.have() {
                info!("decoding <{}>", path.display());
                self.active = ActiveDecode::new(file, decoder);
                if self.active.is_some() {
                    continue;
                }
            }
            return false;
        }
    }

    /// Pull paths through the filter stage, scanning at most one full
    /// directory cycle; an unproductive cycle yields the sentinel, so
    /// a directory holding no acceptable media still paces as filler.
    fn next_media_path(&mut self) -> PathBuf {
        let start = self.paths.generation();
        loop {
            let path = self.paths.next_path();
            if wants_path(&path) {
                return path;
            }
            if self.paths.generation() > start + 1 {
                return PathBuf::new();
            }
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────
