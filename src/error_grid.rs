// src/error_grid.rs

//! The 10×10 error summary.
//!
//! [`ErrorGrid`] is the public value: one percentage per block. [`BlockGrid`]
//! is the incremental machinery behind it, a bounded list of the largest
//! pointwise errors per block that is updated from touched cells only.

use log::trace;
use serde::{Deserialize, Serialize};

/// Blocks per side of the grid. Canvas dimensions must be multiples of this.
pub const GRID_SIZE: usize = 10;

/// Number of values averaged by every "top 5" reduction.
pub const TOP_N: usize = 5;

/// Converts a raw mean error into a percentage of `divisor`, capped at 100.
#[inline]
pub(crate) fn percent(mean: f32, divisor: f32) -> f32 {
    if divisor <= 0.0 {
        return 0.0;
    }
    (mean / divisor * 100.0).clamp(0.0, 100.0)
}

/// Per-block error percentages (0 to 100). `cells[row][column]` where the row
/// is the y block and the column the x block.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ErrorGrid {
    cells: [[f32; GRID_SIZE]; GRID_SIZE],
}

impl ErrorGrid {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_cells(cells: [[f32; GRID_SIZE]; GRID_SIZE]) -> Self {
        Self { cells }
    }

    /// Value of the block at column `gx`, row `gy`.
    pub fn get(&self, gx: usize, gy: usize) -> Option<f32> {
        self.cells.get(gy).and_then(|row| row.get(gx)).copied()
    }

    pub(crate) fn set(&mut self, gx: usize, gy: usize, value: f32) {
        self.cells[gy][gx] = value;
    }

    pub fn cells(&self) -> &[[f32; GRID_SIZE]; GRID_SIZE] {
        &self.cells
    }

    pub fn iter(&self) -> impl Iterator<Item = f32> + '_ {
        self.cells.iter().flatten().copied()
    }

    /// Mean of the `n` largest block values.
    pub fn top_n_mean(&self, n: usize) -> f32 {
        if n == 0 {
            return 0.0;
        }
        let mut values: Vec<f32> = self.iter().collect();
        values.sort_unstable_by(|a, b| b.total_cmp(a));
        values.iter().take(n).sum::<f32>() / n as f32
    }

    /// The headline statistic: mean of the five largest block values.
    pub fn top5(&self) -> f32 {
        self.top_n_mean(TOP_N)
    }

    pub fn max(&self) -> f32 {
        self.iter().fold(0.0, f32::max)
    }

    /// True when every block is within `tolerance` of the same block in `other`.
    pub fn approx_eq(&self, other: &ErrorGrid, tolerance: f32) -> bool {
        self.iter().zip(other.iter()).all(|(a, b)| (a - b).abs() <= tolerance)
    }

    /// Block-wise maximum with `other`.
    pub fn combine_max(&mut self, other: &ErrorGrid) {
        for (row, other_row) in self.cells.iter_mut().zip(other.cells.iter()) {
            for (cell, &value) in row.iter_mut().zip(other_row.iter()) {
                *cell = cell.max(value);
            }
        }
    }
}

/// Largest nonzero `(error, cell)` pairs of one block.
///
/// While the list holds fewer than [`TOP_N`] entries it holds every nonzero
/// error of the block. A stale block must be rescanned before it is read.
#[derive(Debug, Clone, Default)]
struct Block {
    top: Vec<(u16, u32)>,
    stale: bool,
}

impl Block {
    fn offer(&mut self, cell: u32, error: u16) {
        if self.stale {
            return;
        }
        match self.top.iter().position(|&(_, c)| c == cell) {
            Some(position) => {
                let current = self.top[position].0;
                if error >= current {
                    self.top[position].0 = error;
                } else if self.top.len() < TOP_N {
                    if error == 0 {
                        self.top.swap_remove(position);
                    } else {
                        self.top[position].0 = error;
                    }
                } else {
                    // Some cell outside the list may now rank higher.
                    self.stale = true;
                }
            }
            None if error == 0 => {}
            None if self.top.len() < TOP_N => self.top.push((error, cell)),
            None => {
                if let Some(lowest) = self
                    .top
                    .iter_mut()
                    .min_by_key(|(value, _)| *value)
                    .filter(|(value, _)| error > *value)
                {
                    *lowest = (error, cell);
                }
            }
        }
    }

    fn sum(&self) -> u32 {
        self.top.iter().map(|&(value, _)| u32::from(value)).sum()
    }
}

/// Incremental per-block top-5 state for one color.
#[derive(Debug, Clone)]
pub(crate) struct BlockGrid {
    height: usize,
    block_width: usize,
    block_height: usize,
    blocks: Vec<Block>,
}

impl BlockGrid {
    pub(crate) fn new(width: usize, height: usize) -> Self {
        Self {
            height,
            block_width: width / GRID_SIZE,
            block_height: height / GRID_SIZE,
            blocks: vec![Block::default(); GRID_SIZE * GRID_SIZE],
        }
    }

    #[inline]
    fn block_of(&self, cell: usize) -> usize {
        let x = cell / self.height;
        let y = cell % self.height;
        (x / self.block_width) * GRID_SIZE + y / self.block_height
    }

    /// Records that `cell` now has pointwise error `error`.
    #[inline]
    pub(crate) fn offer(&mut self, cell: usize, error: u16) {
        let block = self.block_of(cell);
        self.blocks[block].offer(cell as u32, error);
    }

    /// Rescans every stale block with `error_at`. Returns the number rescanned.
    pub(crate) fn refresh(&mut self, error_at: impl Fn(usize) -> u16) -> usize {
        let mut rescanned = 0;
        for block_index in 0..self.blocks.len() {
            if self.blocks[block_index].stale {
                self.rescan(block_index, &error_at);
                rescanned += 1;
            }
        }
        if rescanned > 0 {
            trace!("BlockGrid: rescanned {} stale blocks", rescanned);
        }
        rescanned
    }

    /// Rebuilds every block from scratch.
    pub(crate) fn rebuild(&mut self, error_at: impl Fn(usize) -> u16) {
        for block_index in 0..self.blocks.len() {
            self.rescan(block_index, &error_at);
        }
    }

    fn rescan(&mut self, block_index: usize, error_at: &impl Fn(usize) -> u16) {
        let gx = block_index / GRID_SIZE;
        let gy = block_index % GRID_SIZE;
        let block = &mut self.blocks[block_index];
        block.top.clear();
        block.stale = false;
        for x in gx * self.block_width..(gx + 1) * self.block_width {
            let column = x * self.height;
            for y in gy * self.block_height..(gy + 1) * self.block_height {
                let cell = column + y;
                block.offer(cell as u32, error_at(cell));
            }
        }
    }

    /// Mean of the block's top errors, counted over `min(TOP_N, cells per block)`.
    pub(crate) fn block_mean(&self, gx: usize, gy: usize) -> f32 {
        let block = &self.blocks[gx * GRID_SIZE + gy];
        let slots = TOP_N.min(self.block_width * self.block_height);
        block.sum() as f32 / slots as f32
    }

    /// Normalizes every block into a fresh [`ErrorGrid`].
    pub(crate) fn aggregate(&self, divisor: f32) -> ErrorGrid {
        let mut grid = ErrorGrid::new();
        for gx in 0..GRID_SIZE {
            for gy in 0..GRID_SIZE {
                grid.set(gx, gy, percent(self.block_mean(gx, gy), divisor));
            }
        }
        grid
    }
}
