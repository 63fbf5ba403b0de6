//! Thin ownership layer over the decoder library (FFmpeg's libav*).
//!
//! The raw `ffmpeg-sys-next` handles are wrapped in [`CResource`]
//! owners so acquisition and release are tied to scope. Packets and
//! frames are reference-counted on the C side; their wrappers hand out
//! [`RefGuard`]s that return the borrowed reference on every exit path
//! of a decode iteration.
//!
//! Everything here is synchronous and must stay short, because the
//! decode loop runs on the cooperative executor between suspension
//! points.

use std::ffi::CString;
use std::os::raw::c_int;
use std::path::Path;
use std::time::Duration;

use ffmpeg_sys_next::{
    av_find_best_stream, av_frame_alloc, av_frame_unref, av_packet_alloc, av_packet_unref,
    av_read_frame, av_rescale_q, avcodec_alloc_context3, avcodec_open2,
    avcodec_parameters_to_context, avcodec_receive_frame, avcodec_send_packet,
    avformat_close_input, avformat_find_stream_info, avformat_open_input, AVCodec,
    AVCodecContext, AVCodecID, AVFormatContext, AVFrame, AVPacket, AVPixelFormat, AVRational,
    AVStream, AVERROR_EOF, AV_TIME_BASE,
};
use ffmpeg_sys_next::AVMediaType::AVMEDIA_TYPE_VIDEO;

use crate::c_resource::{CResource, Dispose, RefGuard};
use crate::frame::PixelFormat;

// ── Stream conventions ───────────────────────────────────────────

/// Ask the library to pick the best stream itself.
pub const DETECT_STREAM: c_int = -1;
/// The only stream index this system accepts and decodes.
pub const FIRST_STREAM: c_int = 0;
/// Plane index of the packed pixel data.
pub const MAIN_PLANE: usize = 0;

/// Library calls report success as a non-negative status.
pub fn successful(code: c_int) -> bool {
    code >= 0
}

/// End of the media stream, as reported by the decoder.
pub fn at_end_of_file(code: c_int) -> bool {
    code == AVERROR_EOF
}

// ── Owned handles ────────────────────────────────────────────────

pub struct FileDispose;
impl Dispose<AVFormatContext> for FileDispose {
    unsafe fn dispose(handle: *mut *mut AVFormatContext) {
        unsafe { avformat_close_input(handle) };
    }
}

/// An opened media file (demuxer context).
pub type File = CResource<AVFormatContext, FileDispose>;

pub struct CodecDispose;
impl Dispose<AVCodecContext> for CodecDispose {
    unsafe fn dispose(handle: *mut *mut AVCodecContext) {
        unsafe { ffmpeg_sys_next::avcodec_free_context(handle) };
    }
}

/// An allocated (and possibly opened) decoder context.
pub type Codec = CResource<AVCodecContext, CodecDispose>;

pub struct PacketDispose;
impl Dispose<AVPacket> for PacketDispose {
    unsafe fn dispose(handle: *mut *mut AVPacket) {
        unsafe { ffmpeg_sys_next::av_packet_free(handle) };
    }
}

pub struct FrameDispose;
impl Dispose<AVFrame> for FrameDispose {
    unsafe fn dispose(handle: *mut *mut AVFrame) {
        unsafe { ffmpeg_sys_next::av_frame_free(handle) };
    }
}

// ── Packet ───────────────────────────────────────────────────────

/// A demuxed packet; its payload is reference-counted by the library.
pub struct Packet(CResource<AVPacket, PacketDispose>);

impl Packet {
    /// Allocate a packet. The wrapper is null if the library is out of
    /// memory; callers test [`have`](Self::have).
    pub fn new() -> Self {
        // SAFETY: adopting the allocator's result, owned nowhere else.
        Packet(unsafe { CResource::adopt(av_packet_alloc()) })
    }

    pub fn have(&self) -> bool {
        self.0.have()
    }

    pub fn as_ptr(&self) -> *const AVPacket {
        self.0.as_ptr()
    }

    pub fn as_mut_ptr(&mut self) -> *mut AVPacket {
        self.0.as_mut_ptr()
    }

    /// Guard that returns this packet's payload reference when dropped.
    pub fn drop_reference(&mut self) -> RefGuard<'_, AVPacket> {
        RefGuard::new(self.0.as_mut_ptr(), av_packet_unref)
    }
}

impl Default for Packet {
    fn default() -> Self {
        Self::new()
    }
}

// ── Frame ────────────────────────────────────────────────────────

/// A decoded frame; its pixel planes are reference-counted by the
/// library.
pub struct Frame(CResource<AVFrame, FrameDispose>);

impl Frame {
    /// Allocate a frame. The wrapper is null if the library is out of
    /// memory; callers test [`have`](Self::have).
    pub fn new() -> Self {
        // SAFETY: adopting the allocator's result, owned nowhere else.
        Frame(unsafe { CResource::adopt(av_frame_alloc()) })
    }

    pub fn have(&self) -> bool {
        self.0.have()
    }

    pub fn as_ptr(&self) -> *const AVFrame {
        self.0.as_ptr()
    }

    pub fn as_mut_ptr(&mut self) -> *mut AVFrame {
        self.0.as_mut_ptr()
    }

    /// Return the previously received frame's plane references.
    pub fn unref(&mut self) {
        if self.0.have() {
            // SAFETY: the handle is live; unref on a clean frame is a no-op.
            unsafe { av_frame_unref(self.0.as_mut_ptr()) };
        }
    }
}

impl Default for Frame {
    fn default() -> Self {
        Self::new()
    }
}

// ── Library calls used by the pipeline ───────────────────────────

/// Open `path` as a media file. The wrapper stays null when the path
/// is empty, not valid UTF-8, or the library rejects the file.
pub fn open_file(path: &Path) -> File {
    let mut file = File::null();
    if let Some(filename) = utf8_path(path) {
        file.emplace(|handle| {
            // SAFETY: `handle` points at a nulled slot; on failure the
            // library frees the context and nulls it again.
            unsafe {
                avformat_open_input(handle, filename.as_ptr(), std::ptr::null(), std::ptr::null_mut())
            }
        });
    }
    file
}

/// Probe stream metadata; must run before inspecting streams.
pub fn probe_streams(file: &mut File) {
    // SAFETY: the file handle is live.
    unsafe { avformat_find_stream_info(file.as_mut_ptr(), std::ptr::null_mut()) };
}

/// Index of the best video stream, plus its decoder.
pub fn best_video_stream(file: &mut File, wanted: c_int) -> (c_int, *const AVCodec) {
    let mut codec: *const AVCodec = std::ptr::null();
    // SAFETY: the file handle is live; `codec` receives a static entry.
    let stream =
        unsafe { av_find_best_stream(file.as_mut_ptr(), AVMEDIA_TYPE_VIDEO, wanted, -1, &mut codec, 0) };
    (stream, codec)
}

/// Codec id of a decoder entry returned by [`best_video_stream`].
pub fn codec_id(codec: *const AVCodec) -> Option<AVCodecID> {
    if codec.is_null() {
        None
    } else {
        // SAFETY: non-null decoder entries are static library data.
        Some(unsafe { (*codec).id })
    }
}

/// Total duration of the file in library time units; still images
/// report a non-positive value.
pub fn duration(file: &File) -> i64 {
    // SAFETY: the file handle is live.
    unsafe { (*file.as_ptr()).duration }
}

/// Allocate a decoder context for `codec`, copy the first stream's
/// parameters into it and open it. Null on any failure.
pub fn open_decoder(file: &File, codec: *const AVCodec) -> Codec {
    // SAFETY: adopting the allocator's result (null on failure).
    let mut decoder = unsafe { Codec::adopt(avcodec_alloc_context3(codec)) };
    if decoder.have() {
        // SAFETY: all handles are live; `first_stream` was validated by
        // the caller's best-stream check.
        let opened = unsafe {
            successful(avcodec_parameters_to_context(
                decoder.as_mut_ptr(),
                (*first_stream(file)).codecpar,
            )) && successful(avcodec_open2(decoder.as_mut_ptr(), codec, std::ptr::null_mut()))
        };
        if !opened {
            decoder.clear();
        }
    }
    decoder
}

/// The file's first stream. Precondition: streams were probed and the
/// best-stream check passed.
unsafe fn first_stream(file: &File) -> *const AVStream {
    unsafe { *(*file.as_ptr()).streams.add(FIRST_STREAM as usize) }
}

/// Microseconds equivalent of one unit of the file's stream time base.
pub fn tick_duration(file: &File) -> Duration {
    // SAFETY: precondition of `first_stream` holds for accepted files.
    let micros = unsafe {
        let time_base = (*first_stream(file)).time_base;
        av_rescale_q(1, time_base, AVRational { num: 1, den: AV_TIME_BASE })
    };
    Duration::from_micros(micros.max(0) as u64)
}

/// Read the next packet of the file into `packet`.
pub fn read_frame(file: &mut File, packet: &mut Packet) -> c_int {
    // SAFETY: both handles are live.
    unsafe { av_read_frame(file.as_mut_ptr(), packet.as_mut_ptr()) }
}

/// Submit a packet to the decoder.
pub fn send_packet(decoder: &mut Codec, packet: *const AVPacket) -> c_int {
    // SAFETY: both handles are live.
    unsafe { avcodec_send_packet(decoder.as_mut_ptr(), packet) }
}

/// Drain the next decoded frame from the decoder into `frame`.
pub fn receive_frame(decoder: &mut Codec, frame: &mut Frame) -> c_int {
    // SAFETY: both handles are live.
    unsafe { avcodec_receive_frame(decoder.as_mut_ptr(), frame.as_mut_ptr()) }
}

/// Map the library's pixel format to the wire enum.
pub fn pixel_format(format: c_int) -> PixelFormat {
    match format {
        f if f == AVPixelFormat::AV_PIX_FMT_RGBA as c_int => PixelFormat::Rgba,
        f if f == AVPixelFormat::AV_PIX_FMT_BGRA as c_int => PixelFormat::Bgra,
        _ => PixelFormat::Invalid,
    }
}

/// Convert a path to the UTF-8 C string the library expects.
///
/// Empty paths (the directory source's sentinel) and paths that are
/// not representable in UTF-8 are unopenable and yield `None`.
pub fn utf8_path(path: &Path) -> Option<CString> {
    if path.as_os_str().is_empty() {
        return None;
    }
    CString::new(path.to_str()?.as_bytes()).ok()
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn empty_path_is_unopenable() {
        assert!(utf8_path(&PathBuf::new()).is_none());
    }

    #[test]
    fn utf8_path_preserves_the_name() {
        let converted = utf8_path(Path::new("media/loop.gif")).unwrap();
        assert_eq!(converted.as_bytes(), b"media/loop.gif");
    }

    #[test]
    fn pixel_format_mapping() {
        assert_eq!(
            pixel_format(AVPixelFormat::AV_PIX_FMT_RGBA as c_int),
            PixelFormat::Rgba
        );
        assert_eq!(
            pixel_format(AVPixelFormat::AV_PIX_FMT_BGRA as c_int),
            PixelFormat::Bgra
        );
        assert_eq!(
            pixel_format(AVPixelFormat::AV_PIX_FMT_YUV420P as c_int),
            PixelFormat::Invalid
        );
    }

    #[test]
    fn opening_a_missing_file_yields_null() {
        let file = open_file(Path::new("definitely/not/here.gif"));
        assert!(file.is_null());
    }

    #[test]
    fn packet_and_frame_allocate() {
        assert!(Packet::new().have());
        assert!(Frame::new().have());
    }
}
