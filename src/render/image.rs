//! RGB image with a depth channel.
//!
//! Rows are stored top to bottom. A strip image covers a contiguous row
//! range of a larger image and records where it starts.

use crate::pipeline::error::{PipelineError, PipelineResult};
use std::ops::Range;

/// Depth assigned to background pixels
pub const FAR_DEPTH: f32 = 1.0;

#[derive(Debug, Clone, PartialEq)]
pub struct Image {
    width: usize,
    height: usize,
    /// First row of the full image this buffer covers
    row_offset: usize,
    rgb: Vec<u8>,
    depth: Vec<f32>,
}

impl Image {
    pub fn new(width: usize, height: usize, background: [u8; 3]) -> Self {
        Self::strip(width, 0..height, background)
    }

    /// Rows `rows` of a `width`-wide image, filled with `background`.
    pub fn strip(width: usize, rows: Range<usize>, background: [u8; 3]) -> Self {
        let pixels = width * rows.len();
        Self {
            width,
            height: rows.len(),
            row_offset: rows.start,
            rgb: background.repeat(pixels),
            depth: vec![FAR_DEPTH; pixels],
        }
    }

    pub fn from_parts(width: usize, height: usize, rgb: Vec<u8>, depth: Vec<f32>) -> PipelineResult<Self> {
        if rgb.len() != width * height * 3 || depth.len() != width * height {
            return Err(PipelineError::InvalidInput(format!(
                "{}x{} image from {} color bytes and {} depths",
                width,
                height,
                rgb.len(),
                depth.len()
            )));
        }
        Ok(Self {
            width,
            height,
            row_offset: 0,
            rgb,
            depth,
        })
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    /// Image rows this buffer covers
    pub fn rows(&self) -> Range<usize> {
        self.row_offset..self.row_offset + self.height
    }

    pub fn rgb(&self) -> &[u8] {
        &self.rgb
    }

    pub fn depth(&self) -> &[f32] {
        &self.depth
    }

    fn index(&self, x: usize, row: usize) -> Option<usize> {
        (x < self.width && self.rows().contains(&row)).then(|| (row - self.row_offset) * self.width + x)
    }

    /// Pixel at column `x`, image row `row`.
    pub fn pixel(&self, x: usize, row: usize) -> Option<[u8; 3]> {
        self.index(x, row)
            .map(|i| [self.rgb[i * 3], self.rgb[i * 3 + 1], self.rgb[i * 3 + 2]])
    }

    pub fn pixel_depth(&self, x: usize, row: usize) -> Option<f32> {
        self.index(x, row).map(|i| self.depth[i])
    }

    pub fn set_pixel(&mut self, x: usize, row: usize, color: [u8; 3], depth: f32) {
        if let Some(i) = self.index(x, row) {
            self.rgb[i * 3..i * 3 + 3].copy_from_slice(&color);
            self.depth[i] = depth;
        }
    }

    /// Rows holding at least one pixel different from `background`.
    pub fn rows_differing_from(&self, background: [u8; 3]) -> Vec<usize> {
        self.rows()
            .filter(|&row| (0..self.width).any(|x| self.pixel(x, row) != Some(background)))
            .collect()
    }

    /// Binary PPM (P6).
    pub fn to_ppm(&self) -> Vec<u8> {
        let mut out = format!("P6\n{} {}\n255\n", self.width, self.height).into_bytes();
        out.extend_from_slice(&self.rgb);
        out
    }
}
