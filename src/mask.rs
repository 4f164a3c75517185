// src/mask.rs

//! Boolean rasters marking which cells belong to an evaluated color.

use crate::canvas::Canvas;
use crate::color::{quantize_rgb, ColorKey, Rgba};
use serde::{Deserialize, Serialize};

/// Decides which pixels count as background (never masked).
///
/// Background detection deliberately ignores posterization, so a coarse bucket
/// count can merge ink colors without merging ink into the paper.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BackgroundPolicy {
    /// Transparent pixels and pixels within `tolerance` of `color` on every
    /// RGB channel are background.
    Solid { color: [u8; 3], tolerance: u8 },
    /// Pixels whose alpha is at most `alpha_threshold` are background,
    /// whatever their color.
    Transparent { alpha_threshold: u8 },
}

impl Default for BackgroundPolicy {
    fn default() -> Self {
        BackgroundPolicy::Solid {
            color: [255, 255, 255],
            tolerance: 0,
        }
    }
}

impl BackgroundPolicy {
    /// Returns true when `pixel` is paper rather than ink.
    #[inline]
    pub fn is_background(&self, pixel: Rgba) -> bool {
        match *self {
            BackgroundPolicy::Solid { color, tolerance } => {
                pixel[3] == 0
                    || pixel[..3]
                        .iter()
                        .zip(color.iter())
                        .all(|(p, c)| p.abs_diff(*c) <= tolerance)
            }
            BackgroundPolicy::Transparent { alpha_threshold } => pixel[3] <= alpha_threshold,
        }
    }
}

/// Everything needed to classify a single pixel for one color key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MaskRule {
    pub key: ColorKey,
    pub posterization: u32,
    pub background: BackgroundPolicy,
    quantized_key: Option<[u8; 3]>,
}

impl MaskRule {
    pub fn new(key: ColorKey, posterization: u32, background: BackgroundPolicy) -> Self {
        let quantized_key = match key {
            ColorKey::Ink => None,
            ColorKey::Rgb(r, g, b) => Some(quantize_rgb(r, g, b, posterization)),
        };
        Self {
            key,
            posterization,
            background,
            quantized_key,
        }
    }

    /// Returns true when `pixel` belongs to this rule's mask.
    #[inline]
    pub fn matches(&self, pixel: Rgba) -> bool {
        if self.background.is_background(pixel) {
            return false;
        }
        match self.quantized_key {
            None => true,
            Some(target) => quantize_rgb(pixel[0], pixel[1], pixel[2], self.posterization) == target,
        }
    }
}

/// Boolean raster sharing the canvas arena layout (`x * height + y`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mask {
    width: usize,
    height: usize,
    cells: Vec<bool>,
    count: usize,
}

impl Mask {
    /// A mask with no cell set.
    pub fn empty(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            cells: vec![false; width * height],
            count: 0,
        }
    }

    /// Full O(width × height) extraction of `rule` over `canvas`.
    pub fn extract(canvas: &Canvas, rule: &MaskRule) -> Self {
        let cells: Vec<bool> = canvas.pixels().iter().map(|&px| rule.matches(px)).collect();
        let count = cells.iter().filter(|&&set| set).count();
        Self {
            width: canvas.width(),
            height: canvas.height(),
            cells,
            count,
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Number of masked cells.
    pub fn count(&self) -> usize {
        self.count
    }

    #[inline]
    pub fn get(&self, index: usize) -> bool {
        self.cells[index]
    }

    /// Masked state of `(x, y)`; out-of-bounds cells are unmasked.
    pub fn is_set(&self, x: usize, y: usize) -> bool {
        x < self.width && y < self.height && self.cells[x * self.height + y]
    }

    /// Sets a cell and returns whether its state changed.
    pub fn set(&mut self, index: usize, value: bool) -> bool {
        if self.cells[index] == value {
            return false;
        }
        self.cells[index] = value;
        if value {
            self.count += 1;
        } else {
            self.count -= 1;
        }
        true
    }

    /// Indices of all masked cells, in arena order.
    pub fn seeds(&self) -> impl Iterator<Item = usize> + '_ {
        self.cells
            .iter()
            .enumerate()
            .filter_map(|(index, &set)| set.then_some(index))
    }

    pub(crate) fn validate(&self) -> Result<(), String> {
        if self.cells.len() != self.width * self.height {
            return Err(format!(
                "mask holds {} cells for {}x{}",
                self.cells.len(),
                self.width,
                self.height
            ));
        }
        let actual = self.cells.iter().filter(|&&set| set).count();
        if actual != self.count {
            return Err(format!("mask count {} but {} cells set", self.count, actual));
        }
        Ok(())
    }
}
