// THEORY:
// The `sink` module is the persistence seam of the recording subsystem.
// The session manager only ever talks to the `VideoSink` and `SinkFactory`
// traits, which keeps the writer threads testable with in-memory fakes and
// keeps the container format swappable.
//
// The production sink writes MJPEG frames into a classic RIFF/AVI
// container: an `hdrl` list describing the stream, a `movi` list of
// `00dc` chunks (one JPEG per frame), and an `idx1` index appended at
// finish. Frame dimensions and frame rate are fixed when the sink is
// opened; every subsequent frame must match. The RIFF size fields are
// written as placeholders and patched once the frame count is known.

use crate::core_modules::frame::Frame;
use crate::error::{Result, VisionError};
use image::codecs::jpeg::JpegEncoder;
use image::ExtendedColorType;
use std::fs::File;
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::Path;

/// JPEG quality used for recorded frames.
const JPEG_QUALITY: u8 = 85;
/// AVIF_HASINDEX: the file carries an idx1 index.
const AVIH_FLAGS: u32 = 0x10;
/// AVIIF_KEYFRAME: every MJPEG frame is independently decodable.
const IDX_KEYFRAME: u32 = 0x10;

/// A per-session video output. One sink per recording session; dimensions
/// and frame rate are fixed at open time.
pub trait VideoSink: Send {
    /// Appends one frame. Mid-session failures are reported, not fatal to
    /// the sink; the caller decides whether to skip or abort.
    fn write_frame(&mut self, frame: &Frame) -> Result<()>;

    /// Finalizes the output. Must be called exactly once.
    fn finish(&mut self) -> Result<()>;
}

/// Opens sinks for new recording sessions.
pub trait SinkFactory: Send + Sync {
    fn open(&self, path: &Path, fps: u32, width: u32, height: u32) -> Result<Box<dyn VideoSink>>;
}

/// MJPEG-in-AVI writer built on the `image` JPEG encoder.
pub struct MjpegAviSink {
    out: BufWriter<File>,
    width: u32,
    height: u32,
    /// (offset relative to the `movi` fourcc, chunk payload size) per frame.
    index: Vec<(u32, u32)>,
    /// Running data length inside the `movi` list, starting after its fourcc.
    movi_data_len: u32,
    max_chunk: u32,
    finished: bool,
}

// Fixed header offsets (see the layout written in `write_header`).
const OFF_RIFF_SIZE: u64 = 4;
const OFF_TOTAL_FRAMES: u64 = 48;
const OFF_SUGGESTED_BUFFER: u64 = 60;
const OFF_STREAM_LENGTH: u64 = 140;
const OFF_STREAM_BUFFER: u64 = 144;
const OFF_MOVI_SIZE: u64 = 216;
const MOVI_FOURCC_POS: u64 = 220;

impl MjpegAviSink {
    pub fn create(path: &Path, fps: u32, width: u32, height: u32) -> Result<Self> {
        let file = File::create(path).map_err(|source| VisionError::SinkOpen {
            path: path.to_path_buf(),
            source,
        })?;
        let mut sink = Self {
            out: BufWriter::new(file),
            width,
            height,
            index: Vec::new(),
            movi_data_len: 0,
            max_chunk: 0,
            finished: false,
        };
        sink.write_header(fps)
            .map_err(|source| VisionError::SinkOpen {
                path: path.to_path_buf(),
                source,
            })?;
        Ok(sink)
    }

    fn write_header(&mut self, fps: u32) -> std::io::Result<()> {
        let fps = fps.max(1);
        let w = &mut self.out;

        // RIFF header. Sizes are placeholders until finish().
        w.write_all(b"RIFF")?;
        w.write_all(&0u32.to_le_bytes())?;
        w.write_all(b"AVI ")?;

        // hdrl list: avih (64 bytes) + strl list (124 bytes).
        w.write_all(b"LIST")?;
        w.write_all(&192u32.to_le_bytes())?;
        w.write_all(b"hdrl")?;

        // Main AVI header.
        w.write_all(b"avih")?;
        w.write_all(&56u32.to_le_bytes())?;
        w.write_all(&(1_000_000 / fps).to_le_bytes())?; // microseconds per frame
        w.write_all(&0u32.to_le_bytes())?; // max bytes per second
        w.write_all(&0u32.to_le_bytes())?; // padding granularity
        w.write_all(&AVIH_FLAGS.to_le_bytes())?;
        w.write_all(&0u32.to_le_bytes())?; // total frames (patched)
        w.write_all(&0u32.to_le_bytes())?; // initial frames
        w.write_all(&1u32.to_le_bytes())?; // stream count
        w.write_all(&0u32.to_le_bytes())?; // suggested buffer size (patched)
        w.write_all(&self.width.to_le_bytes())?;
        w.write_all(&self.height.to_le_bytes())?;
        w.write_all(&[0u8; 16])?; // reserved

        // Stream list.
        w.write_all(b"LIST")?;
        w.write_all(&116u32.to_le_bytes())?;
        w.write_all(b"strl")?;

        // Stream header.
        w.write_all(b"strh")?;
        w.write_all(&56u32.to_le_bytes())?;
        w.write_all(b"vids")?;
        w.write_all(b"MJPG")?;
        w.write_all(&0u32.to_le_bytes())?; // flags
        w.write_all(&0u32.to_le_bytes())?; // priority + language
        w.write_all(&0u32.to_le_bytes())?; // initial frames
        w.write_all(&1u32.to_le_bytes())?; // scale
        w.write_all(&fps.to_le_bytes())?; // rate: rate/scale = fps
        w.write_all(&0u32.to_le_bytes())?; // start
        w.write_all(&0u32.to_le_bytes())?; // length in frames (patched)
        w.write_all(&0u32.to_le_bytes())?; // suggested buffer size (patched)
        w.write_all(&u32::MAX.to_le_bytes())?; // quality: default
        w.write_all(&0u32.to_le_bytes())?; // sample size
        w.write_all(&0u16.to_le_bytes())?; // rcFrame left
        w.write_all(&0u16.to_le_bytes())?; // rcFrame top
        w.write_all(&(self.width as u16).to_le_bytes())?;
        w.write_all(&(self.height as u16).to_le_bytes())?;

        // Stream format: BITMAPINFOHEADER.
        w.write_all(b"strf")?;
        w.write_all(&40u32.to_le_bytes())?;
        w.write_all(&40u32.to_le_bytes())?; // biSize
        w.write_all(&(self.width as i32).to_le_bytes())?;
        w.write_all(&(self.height as i32).to_le_bytes())?;
        w.write_all(&1u16.to_le_bytes())?; // planes
        w.write_all(&24u16.to_le_bytes())?; // bit count
        w.write_all(b"MJPG")?; // compression
        w.write_all(&(self.width * self.height * 3).to_le_bytes())?; // image size
        w.write_all(&[0u8; 16])?; // pels/clr fields

        // movi list, grown as frames arrive.
        w.write_all(b"LIST")?;
        w.write_all(&4u32.to_le_bytes())?; // patched
        w.write_all(b"movi")?;
        self.movi_data_len = 4;
        Ok(())
    }

    fn encode_jpeg(&self, frame: &Frame) -> Result<Vec<u8>> {
        let rgb = frame.to_rgb_image();
        let mut jpeg = Vec::new();
        JpegEncoder::new_with_quality(&mut jpeg, JPEG_QUALITY)
            .encode(rgb.as_raw(), rgb.width(), rgb.height(), ExtendedColorType::Rgb8)
            .map_err(|e| VisionError::Write(format!("jpeg encode failed: {e}")))?;
        Ok(jpeg)
    }
}

impl VideoSink for MjpegAviSink {
    fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        if frame.dimensions() != (self.width, self.height) {
            return Err(VisionError::Write(format!(
                "frame is {}x{} but sink was opened for {}x{}",
                frame.width(),
                frame.height(),
                self.width,
                self.height
            )));
        }
        let jpeg = self.encode_jpeg(frame)?;
        let size = jpeg.len() as u32;

        // Chunk offset recorded relative to the `movi` fourcc position.
        self.index.push((self.movi_data_len, size));

        let io = |e: std::io::Error| VisionError::Write(e.to_string());
        self.out.write_all(b"00dc").map_err(io)?;
        self.out.write_all(&size.to_le_bytes()).map_err(io)?;
        self.out.write_all(&jpeg).map_err(io)?;
        let padded = size + (size & 1);
        if size & 1 == 1 {
            self.out.write_all(&[0u8]).map_err(io)?;
        }
        self.movi_data_len += 8 + padded;
        self.max_chunk = self.max_chunk.max(8 + padded);
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        if self.finished {
            return Ok(());
        }
        self.finished = true;
        let io = |e: std::io::Error| VisionError::Write(e.to_string());

        // idx1 index.
        self.out.write_all(b"idx1").map_err(io)?;
        self.out
            .write_all(&((self.index.len() * 16) as u32).to_le_bytes())
            .map_err(io)?;
        for &(offset, size) in &self.index {
            self.out.write_all(b"00dc").map_err(io)?;
            self.out.write_all(&IDX_KEYFRAME.to_le_bytes()).map_err(io)?;
            self.out.write_all(&offset.to_le_bytes()).map_err(io)?;
            self.out.write_all(&size.to_le_bytes()).map_err(io)?;
        }

        // Patch the placeholder sizes now that everything is known.
        let total_frames = self.index.len() as u32;
        let file_len = self.out.stream_position().map_err(io)?;
        let patches: [(u64, u32); 6] = [
            (OFF_RIFF_SIZE, (file_len - 8) as u32),
            (OFF_TOTAL_FRAMES, total_frames),
            (OFF_SUGGESTED_BUFFER, self.max_chunk),
            (OFF_STREAM_LENGTH, total_frames),
            (OFF_STREAM_BUFFER, self.max_chunk),
            (OFF_MOVI_SIZE, self.movi_data_len),
        ];
        for (offset, value) in patches {
            self.out.seek(SeekFrom::Start(offset)).map_err(io)?;
            self.out.write_all(&value.to_le_bytes()).map_err(io)?;
        }
        self.out.seek(SeekFrom::End(0)).map_err(io)?;
        self.out.flush().map_err(io)
    }
}

impl Drop for MjpegAviSink {
    fn drop(&mut self) {
        if !self.finished {
            let _ = self.finish();
        }
    }
}

/// Default factory producing MJPEG-AVI sinks on disk.
pub struct MjpegAviFactory;

impl SinkFactory for MjpegAviFactory {
    fn open(&self, path: &Path, fps: u32, width: u32, height: u32) -> Result<Box<dyn VideoSink>> {
        Ok(Box::new(MjpegAviSink::create(path, fps, width, height)?))
    }
}
