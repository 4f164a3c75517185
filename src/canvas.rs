// src/canvas.rs

//! Fixed-size RGBA raster used for both the reference and the drawing.
//!
//! Pixels live in one flat arena indexed `x * height + y`, allocated once when
//! the canvas is created. All derived rasters (masks, heatmaps) share the same
//! indexing so a cell index can move between them without conversion.

use crate::color::{Rgba, TRANSPARENT};
use crate::error::EvalError;
use crate::error_grid::GRID_SIZE;
use serde::{Deserialize, Serialize};

/// A width × height raster of 4-channel 8-bit pixels.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Canvas {
    width: usize,
    height: usize,
    pixels: Vec<Rgba>,
}

/// Checks that a canvas of `width` × `height` is square, can be split into the
/// error grid and indexed with `u32` cell indices.
pub fn validate_dimensions(width: usize, height: usize) -> Result<(), EvalError> {
    let fits_index = width
        .checked_mul(height)
        .map_or(false, |cells| cells <= u32::MAX as usize);
    if width == 0 || width != height || width % GRID_SIZE != 0 || !fits_index {
        return Err(EvalError::InvalidDimensions { width, height });
    }
    Ok(())
}

impl Canvas {
    /// Creates a fully transparent canvas.
    pub fn new(width: usize, height: usize) -> Result<Self, EvalError> {
        Self::filled(width, height, TRANSPARENT)
    }

    /// Creates a canvas where every pixel is `color`.
    pub fn filled(width: usize, height: usize, color: Rgba) -> Result<Self, EvalError> {
        validate_dimensions(width, height)?;
        Ok(Self {
            width,
            height,
            pixels: vec![color; width * height],
        })
    }

    /// Wraps an existing pixel arena laid out `x * height + y`.
    pub fn from_pixels(width: usize, height: usize, pixels: Vec<Rgba>) -> Result<Self, EvalError> {
        validate_dimensions(width, height)?;
        if pixels.len() != width * height {
            return Err(EvalError::BufferLength {
                expected: width * height,
                actual: pixels.len(),
            });
        }
        Ok(Self {
            width,
            height,
            pixels,
        })
    }

    /// Builds a canvas from row-major interleaved RGBA bytes, the layout image
    /// decoders and browser canvases hand out.
    pub fn from_rgba_rows(width: usize, height: usize, bytes: &[u8]) -> Result<Self, EvalError> {
        validate_dimensions(width, height)?;
        let expected = width * height * 4;
        if bytes.len() != expected {
            return Err(EvalError::BufferLength {
                expected,
                actual: bytes.len(),
            });
        }
        let mut pixels = vec![TRANSPARENT; width * height];
        for (row_index, row) in bytes.chunks_exact(width * 4).enumerate() {
            for (x, px) in row.chunks_exact(4).enumerate() {
                pixels[x * height + row_index] = [px[0], px[1], px[2], px[3]];
            }
        }
        Ok(Self {
            width,
            height,
            pixels,
        })
    }

    /// Returns the pixels as row-major interleaved RGBA bytes.
    pub fn to_rgba_rows(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.pixels.len() * 4);
        for y in 0..self.height {
            for x in 0..self.width {
                bytes.extend_from_slice(&self.pixels[self.index_of(x, y)]);
            }
        }
        bytes
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    /// `(width, height)`.
    pub fn dimensions(&self) -> (usize, usize) {
        (self.width, self.height)
    }

    /// Number of cells.
    pub fn len(&self) -> usize {
        self.pixels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pixels.is_empty()
    }

    /// Arena index of `(x, y)`. The caller guarantees the coordinates are in bounds.
    #[inline]
    pub fn index_of(&self, x: usize, y: usize) -> usize {
        x * self.height + y
    }

    /// Coordinates of an arena index.
    #[inline]
    pub fn pos_of(&self, index: usize) -> (usize, usize) {
        (index / self.height, index % self.height)
    }

    /// Pixel at `(x, y)`, or `None` when out of bounds.
    pub fn get(&self, x: usize, y: usize) -> Option<Rgba> {
        if x >= self.width || y >= self.height {
            return None;
        }
        Some(self.pixels[self.index_of(x, y)])
    }

    /// Pixel at an arena index.
    #[inline]
    pub fn pixel(&self, index: usize) -> Rgba {
        self.pixels[index]
    }

    /// Overwrites the pixel at `(x, y)` and returns the previous value.
    pub fn set(&mut self, x: usize, y: usize, color: Rgba) -> Result<Rgba, EvalError> {
        if x >= self.width || y >= self.height {
            return Err(EvalError::PixelOutOfBounds { x, y });
        }
        let index = self.index_of(x, y);
        Ok(std::mem::replace(&mut self.pixels[index], color))
    }

    #[inline]
    pub(crate) fn set_index(&mut self, index: usize, color: Rgba) {
        self.pixels[index] = color;
    }

    /// All pixels in arena order.
    pub fn pixels(&self) -> &[Rgba] {
        &self.pixels
    }

    /// The `height` pixels of column `x`.
    pub(crate) fn column(&self, x: usize) -> &[Rgba] {
        let start = x * self.height;
        &self.pixels[start..start + self.height]
    }

    pub fn same_dimensions(&self, other: &Canvas) -> bool {
        self.dimensions() == other.dimensions()
    }

    /// Fails with `DimensionMismatch` unless `other` has this canvas's dimensions.
    pub fn ensure_same_dimensions(&self, other: &Canvas) -> Result<(), EvalError> {
        if !self.same_dimensions(other) {
            return Err(EvalError::DimensionMismatch {
                expected: self.dimensions(),
                actual: other.dimensions(),
            });
        }
        Ok(())
    }

    /// Re-checks invariants of a canvas that did not come from a constructor
    /// (e.g. one deserialized from a snapshot).
    pub(crate) fn validate(&self) -> Result<(), EvalError> {
        validate_dimensions(self.width, self.height)?;
        if self.pixels.len() != self.width * self.height {
            return Err(EvalError::BufferLength {
                expected: self.width * self.height,
                actual: self.pixels.len(),
            });
        }
        Ok(())
    }
}
