// src/diff.rs

//! Computes the minimal set of changed pixels between two drawing states.
//!
//! Two entry points feed the same incremental pipeline:
//! - [`diff_canvases`] compares a full replacement buffer against the previous
//!   one, skipping identical columns with a slice comparison.
//! - [`diff_stroke`] turns the final rasterized pixels of a stroke into changes
//!   without touching the rest of the canvas.

use crate::canvas::Canvas;
use crate::color::{Rgba, TRANSPARENT};
use crate::error::EvalError;
use log::trace;
use serde::{Deserialize, Serialize};

/// One changed cell with its raw colors. `previous` is `None` only when there
/// was no previous snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PixelChange {
    pub x: usize,
    pub y: usize,
    pub previous: Option<Rgba>,
    pub current: Rgba,
}

/// A rasterized stroke pixel. `color: None` erases the cell back to blank.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StrokePixel {
    pub x: usize,
    pub y: usize,
    pub color: Option<Rgba>,
}

impl StrokePixel {
    pub fn paint(x: usize, y: usize, color: Rgba) -> Self {
        Self {
            x,
            y,
            color: Some(color),
        }
    }

    pub fn erase(x: usize, y: usize) -> Self {
        Self { x, y, color: None }
    }
}

/// Element-wise comparison of two equal-sized buffers, ordered by arena index.
///
/// With no previous snapshot, every pixel of `next` that is not blank
/// ([`TRANSPARENT`]) is reported with `previous: None`.
pub fn diff_canvases(previous: Option<&Canvas>, next: &Canvas) -> Result<Vec<PixelChange>, EvalError> {
    let mut changes = Vec::new();
    let Some(previous) = previous else {
        for (index, &current) in next.pixels().iter().enumerate() {
            if current != TRANSPARENT {
                let (x, y) = next.pos_of(index);
                changes.push(PixelChange {
                    x,
                    y,
                    previous: None,
                    current,
                });
            }
        }
        return Ok(changes);
    };

    previous.ensure_same_dimensions(next)?;
    for x in 0..next.width() {
        let before = previous.column(x);
        let after = next.column(x);
        if before == after {
            continue;
        }
        for (y, (&old, &new)) in before.iter().zip(after.iter()).enumerate() {
            if old != new {
                changes.push(PixelChange {
                    x,
                    y,
                    previous: Some(old),
                    current: new,
                });
            }
        }
    }
    trace!("diff_canvases: {} changed pixels", changes.len());
    Ok(changes)
}

/// Builds the change list for a stroke applied on top of `current`.
///
/// Cost is O(k log k) in the stroke length. When a stroke touches a pixel more
/// than once the last entry wins. Pixels whose color does not change are dropped.
pub fn diff_stroke(current: &Canvas, stroke: &[StrokePixel]) -> Result<Vec<PixelChange>, EvalError> {
    let (width, height) = current.dimensions();
    if let Some(bad) = stroke.iter().find(|p| p.x >= width || p.y >= height) {
        return Err(EvalError::PixelOutOfBounds { x: bad.x, y: bad.y });
    }

    // Stable sort keeps stroke order among duplicates; the last one is kept.
    let mut ordered: Vec<(usize, usize)> = stroke
        .iter()
        .enumerate()
        .map(|(order, p)| (current.index_of(p.x, p.y), order))
        .collect();
    ordered.sort_by_key(|&(index, _)| index);

    let mut changes = Vec::with_capacity(ordered.len());
    for (position, &(index, order)) in ordered.iter().enumerate() {
        if ordered
            .get(position + 1)
            .map_or(false, |&(next_index, _)| next_index == index)
        {
            continue;
        }
        let pixel = stroke[order];
        let old = current.pixel(index);
        let new = pixel.color.unwrap_or(TRANSPARENT);
        if old == new {
            continue;
        }
        changes.push(PixelChange {
            x: pixel.x,
            y: pixel.y,
            previous: Some(old),
            current: new,
        });
    }
    Ok(changes)
}
