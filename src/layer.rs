// src/layer.rs

//! Per-color evaluation state: both masks, both heatmaps, the block candidate
//! lists and running sums for the mean error.
//!
//! The pointwise error is two-sided:
//! `max(reference masked ? drawing distance : 0, drawing masked ? reference distance : 0)`.

use crate::cancel::CancelToken;
use crate::canvas::Canvas;
use crate::color::ColorKey;
use crate::diff::PixelChange;
use crate::error::EvalError;
use crate::error_grid::{percent, BlockGrid, ErrorGrid};
use crate::heatmap::{Heatmap, RemovalOutcome, Workspace, UNREACHABLE};
use crate::mask::{Mask, MaskRule};
use log::{debug, trace};

/// Values a layer derives from the config rather than from its color.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct LayerSettings {
    pub divisor: f32,
    pub regional_limit: usize,
}

impl LayerSettings {
    /// Distances are clamped here before entering the mean error sums.
    fn cap(&self) -> u16 {
        self.divisor.ceil().clamp(1.0, f32::from(UNREACHABLE - 1)) as u16
    }
}

/// Counts of the heatmap strategies an update used.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct LayerUpdate {
    pub regional_rebuilds: usize,
    pub full_rebuilds: usize,
}

#[inline]
fn pointwise_error(
    reference_mask: &Mask,
    drawing_mask: &Mask,
    reference_heatmap: &Heatmap,
    drawing_heatmap: &Heatmap,
    cell: usize,
) -> u16 {
    let missing = if reference_mask.get(cell) {
        drawing_heatmap.distance(cell)
    } else {
        0
    };
    let extra = if drawing_mask.get(cell) {
        reference_heatmap.distance(cell)
    } else {
        0
    };
    missing.max(extra)
}

#[derive(Debug, Clone)]
pub(crate) struct ColorLayer {
    rule: MaskRule,
    settings: LayerSettings,
    reference_mask: Mask,
    drawing_mask: Mask,
    reference_heatmap: Heatmap,
    drawing_heatmap: Heatmap,
    blocks: BlockGrid,
    grid: ErrorGrid,
    // Clamped drawing distances at reference ink.
    missing_sum: u64,
    // Clamped reference distances at drawing ink.
    extra_sum: u64,
    touched: Vec<u32>,
    added: Vec<usize>,
    removed: Vec<usize>,
}

impl ColorLayer {
    /// Extracts both masks and runs both full transforms.
    pub(crate) fn build(
        reference: &Canvas,
        drawing: &Canvas,
        rule: MaskRule,
        settings: LayerSettings,
        workspace: &mut Workspace,
        cancel: Option<&CancelToken>,
    ) -> Result<Self, EvalError> {
        let reference_mask = Mask::extract(reference, &rule);
        let drawing_mask = Mask::extract(drawing, &rule);
        let (reference_heatmap, drawing_heatmap) = match cancel {
            Some(token) => (
                Heatmap::build_cancellable(&reference_mask, workspace, token)?,
                Heatmap::build_cancellable(&drawing_mask, workspace, token)?,
            ),
            None => (
                Heatmap::build(&reference_mask, workspace),
                Heatmap::build(&drawing_mask, workspace),
            ),
        };
        debug!(
            "Layer {}: built, {} reference cells, {} drawing cells",
            rule.key,
            reference_mask.count(),
            drawing_mask.count()
        );
        Ok(Self::from_parts(
            rule,
            settings,
            reference_mask,
            drawing_mask,
            reference_heatmap,
            drawing_heatmap,
        ))
    }

    /// Assembles a layer from existing masks and heatmaps and derives the rest.
    pub(crate) fn from_parts(
        rule: MaskRule,
        settings: LayerSettings,
        reference_mask: Mask,
        drawing_mask: Mask,
        reference_heatmap: Heatmap,
        drawing_heatmap: Heatmap,
    ) -> Self {
        let mut layer = Self {
            rule,
            settings,
            blocks: BlockGrid::new(reference_mask.width(), reference_mask.height()),
            grid: ErrorGrid::new(),
            reference_mask,
            drawing_mask,
            reference_heatmap,
            drawing_heatmap,
            missing_sum: 0,
            extra_sum: 0,
            touched: Vec::new(),
            added: Vec::new(),
            removed: Vec::new(),
        };
        layer.recompute_all();
        layer
    }

    /// Full O(cells) recomputation of the sums, the blocks and the grid.
    fn recompute_all(&mut self) {
        let cap = self.settings.cap();
        self.missing_sum = self
            .reference_mask
            .seeds()
            .map(|cell| u64::from(self.drawing_heatmap.distance(cell).min(cap)))
            .sum();
        self.extra_sum = self
            .drawing_mask
            .seeds()
            .map(|cell| u64::from(self.reference_heatmap.distance(cell).min(cap)))
            .sum();
        self.blocks.rebuild(|cell| {
            pointwise_error(
                &self.reference_mask,
                &self.drawing_mask,
                &self.reference_heatmap,
                &self.drawing_heatmap,
                cell,
            )
        });
        self.grid = self.blocks.aggregate(self.settings.divisor);
    }

    /// Applies new settings. A divisor change re-derives sums and grid.
    pub(crate) fn set_settings(&mut self, settings: LayerSettings) {
        let divisor_changed = settings.divisor != self.settings.divisor;
        self.settings = settings;
        if divisor_changed {
            self.recompute_all();
        }
    }

    /// Applies drawing changes: removals first, then additions, each with its
    /// incremental heatmap update; then the touched blocks are refreshed.
    pub(crate) fn apply(&mut self, changes: &[PixelChange], workspace: &mut Workspace) -> LayerUpdate {
        let height = self.drawing_mask.height();
        let cap = self.settings.cap();
        self.added.clear();
        self.removed.clear();
        self.touched.clear();

        for change in changes {
            let cell = change.x * height + change.y;
            let was = self.drawing_mask.get(cell);
            let now = self.rule.matches(change.current);
            match (was, now) {
                (true, false) => self.removed.push(cell),
                (false, true) => self.added.push(cell),
                _ => {}
            }
        }
        if self.added.is_empty() && self.removed.is_empty() {
            return LayerUpdate::default();
        }

        let mut update = LayerUpdate::default();
        if !self.removed.is_empty() {
            for &cell in &self.removed {
                self.drawing_mask.set(cell, false);
                self.extra_sum -= u64::from(self.reference_heatmap.distance(cell).min(cap));
                self.touched.push(cell as u32);
            }
            match self.drawing_heatmap.remove_seeds(
                &self.removed,
                &self.drawing_mask,
                workspace,
                self.settings.regional_limit,
            ) {
                RemovalOutcome::Unchanged => {}
                RemovalOutcome::Regional { .. } => update.regional_rebuilds += 1,
                RemovalOutcome::FullRebuild => update.full_rebuilds += 1,
            }
        }
        if !self.added.is_empty() {
            for &cell in &self.added {
                self.drawing_mask.set(cell, true);
                self.extra_sum += u64::from(self.reference_heatmap.distance(cell).min(cap));
                self.touched.push(cell as u32);
            }
            self.drawing_heatmap.add_seeds(&self.added, workspace);
        }

        if update.full_rebuilds > 0 {
            workspace.clear_changes();
            self.recompute_all();
            return update;
        }

        workspace.drain_changes(|cell, previous| {
            if self.reference_mask.get(cell) {
                let current = self.drawing_heatmap.distance(cell).min(cap);
                self.missing_sum = self.missing_sum + u64::from(current) - u64::from(previous.min(cap));
            }
            self.touched.push(cell as u32);
        });

        for &cell in &self.touched {
            let error = pointwise_error(
                &self.reference_mask,
                &self.drawing_mask,
                &self.reference_heatmap,
                &self.drawing_heatmap,
                cell as usize,
            );
            self.blocks.offer(cell as usize, error);
        }
        self.blocks.refresh(|cell| {
            pointwise_error(
                &self.reference_mask,
                &self.drawing_mask,
                &self.reference_heatmap,
                &self.drawing_heatmap,
                cell,
            )
        });
        self.grid = self.blocks.aggregate(self.settings.divisor);
        trace!(
            "Layer {}: +{} -{} seeds, {} cells touched",
            self.rule.key,
            self.added.len(),
            self.removed.len(),
            self.touched.len()
        );
        update
    }

    pub(crate) fn key(&self) -> ColorKey {
        self.rule.key
    }

    pub(crate) fn reference_mask(&self) -> &Mask {
        &self.reference_mask
    }

    pub(crate) fn drawing_mask(&self) -> &Mask {
        &self.drawing_mask
    }

    pub(crate) fn reference_heatmap(&self) -> &Heatmap {
        &self.reference_heatmap
    }

    pub(crate) fn drawing_heatmap(&self) -> &Heatmap {
        &self.drawing_heatmap
    }

    /// Per-block percentages for this color.
    pub(crate) fn grid(&self) -> &ErrorGrid {
        &self.grid
    }

    /// Exactly one side has ink for this color.
    pub(crate) fn is_degenerate(&self) -> bool {
        self.reference_mask.is_empty() != self.drawing_mask.is_empty()
    }

    /// Top-5 error: 100 when degenerate, 0 when both sides are empty.
    pub(crate) fn top5(&self) -> f32 {
        if self.is_degenerate() {
            return 100.0;
        }
        if self.reference_mask.is_empty() {
            return 0.0;
        }
        self.grid.top5()
    }

    /// Clamped raw sum and number of terms for the mean error.
    pub(crate) fn mean_terms(&self) -> (u64, usize) {
        (
            self.missing_sum + self.extra_sum,
            self.reference_mask.count() + self.drawing_mask.count(),
        )
    }

    pub(crate) fn mean_error(&self) -> f32 {
        let (sum, count) = self.mean_terms();
        if count == 0 {
            return 0.0;
        }
        percent(sum as f32 / count as f32, self.settings.divisor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::color::{BLACK, WHITE};
    use crate::diff::{diff_stroke, StrokePixel};
    use crate::mask::BackgroundPolicy;
    use test_log::test;

    const SIZE: usize = 50;

    fn settings() -> LayerSettings {
        LayerSettings {
            divisor: SIZE as f32,
            regional_limit: SIZE * SIZE,
        }
    }

    fn ink_layer(reference: &Canvas, ws: &mut Workspace) -> ColorLayer {
        let drawing = Canvas::filled(SIZE, SIZE, WHITE).unwrap();
        let rule = MaskRule::new(ColorKey::Ink, 10, BackgroundPolicy::default());
        ColorLayer::build(reference, &drawing, rule, settings(), ws, None).unwrap()
    }

    fn stroke(layer: &mut ColorLayer, canvas: &mut Canvas, pixels: &[StrokePixel], ws: &mut Workspace) {
        let changes = diff_stroke(canvas, pixels).unwrap();
        layer.apply(&changes, ws);
        for p in pixels {
            canvas.set(p.x, p.y, p.color.unwrap_or(WHITE)).unwrap();
        }
    }

    fn rebuilt(layer: &ColorLayer, drawing: &Canvas, reference: &Canvas) -> ColorLayer {
        let mut ws = Workspace::new(SIZE, SIZE);
        ColorLayer::build(reference, drawing, layer.rule, layer.settings, &mut ws, None).unwrap()
    }

    #[test]
    fn empty_drawing_is_degenerate() {
        let mut reference = Canvas::filled(SIZE, SIZE, WHITE).unwrap();
        reference.set(10, 10, BLACK).unwrap();
        let mut ws = Workspace::new(SIZE, SIZE);
        let layer = ink_layer(&reference, &mut ws);
        assert!(layer.is_degenerate());
        assert_eq!(layer.top5(), 100.0);
        assert_eq!(layer.mean_error(), 100.0);
    }

    #[test]
    fn matching_ink_scores_zero() {
        let mut reference = Canvas::filled(SIZE, SIZE, WHITE).unwrap();
        reference.set(10, 10, BLACK).unwrap();
        let mut ws = Workspace::new(SIZE, SIZE);
        let mut layer = ink_layer(&reference, &mut ws);
        let mut drawing = Canvas::filled(SIZE, SIZE, WHITE).unwrap();
        stroke(&mut layer, &mut drawing, &[StrokePixel::paint(10, 10, BLACK)], &mut ws);
        assert!(!layer.is_degenerate());
        assert_eq!(layer.top5(), 0.0);
        assert_eq!(layer.mean_error(), 0.0);
    }

    #[test]
    fn incremental_strokes_match_a_fresh_build() {
        let mut reference = Canvas::filled(SIZE, SIZE, WHITE).unwrap();
        for i in 5..45 {
            reference.set(i, 25, BLACK).unwrap();
        }
        let mut ws = Workspace::new(SIZE, SIZE);
        let mut layer = ink_layer(&reference, &mut ws);
        let mut drawing = Canvas::filled(SIZE, SIZE, WHITE).unwrap();

        let line: Vec<StrokePixel> = (5..45).map(|i| StrokePixel::paint(i, 28, BLACK)).collect();
        stroke(&mut layer, &mut drawing, &line, &mut ws);
        let stray: Vec<StrokePixel> = (0..10).map(|i| StrokePixel::paint(40, i, BLACK)).collect();
        stroke(&mut layer, &mut drawing, &stray, &mut ws);
        let erase: Vec<StrokePixel> = (0..10).map(|i| StrokePixel::erase(40, i)).collect();
        stroke(&mut layer, &mut drawing, &erase, &mut ws);

        let fresh = rebuilt(&layer, &drawing, &reference);
        assert_eq!(layer.drawing_heatmap(), fresh.drawing_heatmap());
        assert_eq!(layer.drawing_mask(), fresh.drawing_mask());
        assert_eq!(layer.grid(), fresh.grid());
        assert_eq!(layer.mean_terms(), fresh.mean_terms());
        assert!(layer.top5() > 0.0);
    }

    #[test]
    fn small_regional_limit_forces_full_rebuild() {
        let mut reference = Canvas::filled(SIZE, SIZE, WHITE).unwrap();
        reference.set(25, 25, BLACK).unwrap();
        let mut ws = Workspace::new(SIZE, SIZE);
        let mut layer = ink_layer(&reference, &mut ws);
        layer.set_settings(LayerSettings {
            regional_limit: 4,
            ..settings()
        });
        let mut drawing = Canvas::filled(SIZE, SIZE, WHITE).unwrap();
        stroke(
            &mut layer,
            &mut drawing,
            &[StrokePixel::paint(0, 0, BLACK), StrokePixel::paint(49, 49, BLACK)],
            &mut ws,
        );

        let changes = diff_stroke(&drawing, &[StrokePixel::erase(0, 0)]).unwrap();
        let update = layer.apply(&changes, &mut ws);
        assert_eq!(update.full_rebuilds, 1);
        drawing.set(0, 0, WHITE).unwrap();

        let fresh = rebuilt(&layer, &drawing, &reference);
        assert_eq!(layer.drawing_heatmap(), fresh.drawing_heatmap());
        assert_eq!(layer.grid(), fresh.grid());
    }

    #[test]
    fn divisor_change_rescales_grid() {
        let mut reference = Canvas::filled(SIZE, SIZE, WHITE).unwrap();
        reference.set(10, 10, BLACK).unwrap();
        let mut ws = Workspace::new(SIZE, SIZE);
        let mut layer = ink_layer(&reference, &mut ws);
        let mut drawing = Canvas::filled(SIZE, SIZE, WHITE).unwrap();
        stroke(&mut layer, &mut drawing, &[StrokePixel::paint(10, 15, BLACK)], &mut ws);
        let before = layer.grid().max();
        layer.set_settings(LayerSettings {
            divisor: SIZE as f32 / 2.0,
            ..settings()
        });
        assert!((layer.grid().max() - 2.0 * before).abs() < 1e-4);
    }
}
