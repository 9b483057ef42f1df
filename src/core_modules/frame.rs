// THEORY:
// The `Frame` module provides the single owned pixel-data object that flows
// through the entire pipeline. It follows the "dumb data, smart consumers"
// principle: a `Frame` is a plain, contiguous BGR buffer with its dimensions,
// and every analytical capability lives in the modules that consume it.
//
// Key architectural principles:
// 1.  **Owned and Immutable-once-queued**: A `Frame` owns its bytes. Producers
//     clone before queueing a frame for persistence, so a queued frame is
//     never mutated behind a writer thread's back.
// 2.  **BGR Convention**: Camera sources in this domain deliver BGR byte
//     order. The crate keeps that convention internally and converts at the
//     edges (`to_rgb_image` for drawing/encoding, `to_luma` for analysis).
// 3.  **Validated Construction**: A buffer whose length disagrees with its
//     declared dimensions is a precondition violation and is rejected at
//     construction, never discovered mid-analysis.

use crate::error::{Result, VisionError};
use image::{GrayImage, Rgb, RgbImage};

/// Number of channels in a frame buffer. The pipeline is BGR-only.
pub const FRAME_CHANNELS: u32 = 3;

/// An owned 2-D pixel buffer in BGR byte order.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl Frame {
    /// Creates a frame from an existing BGR buffer, validating that the
    /// buffer length matches the declared dimensions.
    pub fn new(width: u32, height: u32, data: Vec<u8>) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(VisionError::InvalidInput(format!(
                "frame dimensions must be non-zero, got {width}x{height}"
            )));
        }
        let expected = (width * height * FRAME_CHANNELS) as usize;
        if data.len() != expected {
            return Err(VisionError::InvalidInput(format!(
                "frame buffer length {} does not match {width}x{height}x{FRAME_CHANNELS} ({expected})",
                data.len()
            )));
        }
        Ok(Self {
            width,
            height,
            data,
        })
    }

    /// Creates a frame filled with a single BGR color.
    pub fn filled(width: u32, height: u32, bgr: [u8; 3]) -> Self {
        let mut data = Vec::with_capacity((width * height * FRAME_CHANNELS) as usize);
        for _ in 0..(width * height) {
            data.extend_from_slice(&bgr);
        }
        Self {
            width,
            height,
            data,
        }
    }

    /// Creates an all-black frame.
    pub fn black(width: u32, height: u32) -> Self {
        Self::filled(width, height, [0, 0, 0])
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Raw BGR bytes, row-major.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn same_dimensions(&self, other: &Frame) -> bool {
        self.width == other.width && self.height == other.height
    }

    /// The BGR triple at (x, y). Callers must stay in bounds.
    pub fn pixel(&self, x: u32, y: u32) -> [u8; 3] {
        let i = ((y * self.width + x) * FRAME_CHANNELS) as usize;
        [self.data[i], self.data[i + 1], self.data[i + 2]]
    }

    pub fn set_pixel(&mut self, x: u32, y: u32, bgr: [u8; 3]) {
        let i = ((y * self.width + x) * FRAME_CHANNELS) as usize;
        self.data[i..i + 3].copy_from_slice(&bgr);
    }

    /// Grayscale conversion with the BT.601 weights the BGR convention
    /// implies: Y = 0.299 R + 0.587 G + 0.114 B.
    pub fn to_luma(&self) -> GrayImage {
        let mut gray = GrayImage::new(self.width, self.height);
        let buf: &mut [u8] = &mut gray;
        for (i, px) in self.data.chunks_exact(3).enumerate() {
            let y = 0.114 * px[0] as f32 + 0.587 * px[1] as f32 + 0.299 * px[2] as f32;
            buf[i] = y.round().clamp(0.0, 255.0) as u8;
        }
        gray
    }

    /// Per-channel absolute difference against another frame, collapsed to
    /// grayscale. Fails fast on mismatched dimensions rather than producing
    /// a wrong difference image.
    pub fn abs_diff(&self, other: &Frame) -> Result<GrayImage> {
        if !self.same_dimensions(other) {
            return Err(VisionError::InvalidInput(format!(
                "frame size mismatch: {}x{} vs {}x{}",
                self.width, self.height, other.width, other.height
            )));
        }
        let mut gray = GrayImage::new(self.width, self.height);
        let buf: &mut [u8] = &mut gray;
        for (i, (a, b)) in self
            .data
            .chunks_exact(3)
            .zip(other.data.chunks_exact(3))
            .enumerate()
        {
            let db = a[0].abs_diff(b[0]) as f32;
            let dg = a[1].abs_diff(b[1]) as f32;
            let dr = a[2].abs_diff(b[2]) as f32;
            let y = 0.114 * db + 0.587 * dg + 0.299 * dr;
            buf[i] = y.round().clamp(0.0, 255.0) as u8;
        }
        Ok(gray)
    }

    /// Converts to an `RgbImage` for drawing and encoding.
    pub fn to_rgb_image(&self) -> RgbImage {
        let mut rgb = RgbImage::new(self.width, self.height);
        for (dst, src) in rgb.pixels_mut().zip(self.data.chunks_exact(3)) {
            *dst = Rgb([src[2], src[1], src[0]]);
        }
        rgb
    }

    /// Converts back from an `RgbImage` produced by `to_rgb_image`.
    pub fn from_rgb_image(rgb: &RgbImage) -> Self {
        let mut data = Vec::with_capacity((rgb.width() * rgb.height() * FRAME_CHANNELS) as usize);
        for px in rgb.pixels() {
            data.extend_from_slice(&[px[2], px[1], px[0]]);
        }
        Self {
            width: rgb.width(),
            height: rgb.height(),
            data,
        }
    }

    /// Builds a frame from a grayscale image by replicating the intensity
    /// into all three channels.
    pub fn from_luma(gray: &GrayImage) -> Self {
        let mut data = Vec::with_capacity((gray.width() * gray.height() * FRAME_CHANNELS) as usize);
        for px in gray.pixels() {
            data.extend_from_slice(&[px[0], px[0], px[0]]);
        }
        Self {
            width: gray.width(),
            height: gray.height(),
            data,
        }
    }
}
