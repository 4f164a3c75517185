// src/observation.rs

//! The aggregate root of an evaluation session.
//!
//! An [`Observation`] owns the configuration, the session timers and, once a
//! reference is set, the reference and drawing canvases with one layer per
//! evaluated color. Drawing updates are applied incrementally; every fallible
//! operation validates its input before touching any state.

use crate::cancel::CancelToken;
use crate::canvas::Canvas;
use crate::clock::{Clock, SystemClock};
use crate::color::ColorKey;
use crate::config::EvaluationConfig;
use crate::diff::{diff_canvases, diff_stroke, PixelChange, StrokePixel};
use crate::error::EvalError;
use crate::error_grid::{percent, ErrorGrid};
use crate::heatmap::{Heatmap, Workspace};
use crate::layer::{ColorLayer, LayerSettings};
use crate::mask::Mask;
use crate::report::{EvaluationOptions, EvaluationReport};
use crate::snapshot::{LayerSnapshot, ObservationSnapshot};
use log::{debug, info, trace};
use serde::{Deserialize, Serialize};

/// What a drawing update did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateSummary {
    /// Pixels whose raw color changed.
    pub changed_pixels: usize,
    /// Seed removals resolved by a regional rebuild, summed over colors.
    pub regional_rebuilds: usize,
    /// Seed removals that fell back to a full rebuild, summed over colors.
    pub full_rebuilds: usize,
}

fn settings_for(config: &EvaluationConfig, width: usize, height: usize) -> LayerSettings {
    LayerSettings {
        divisor: config.error_divisor(width),
        regional_limit: config.regional_limit(width * height),
    }
}

/// Largest per-block difference accepted between a stored and a restored grid.
const GRID_TOLERANCE: f32 = 1e-3;

/// Canvases and per-color state; only exists once a reference is set.
#[derive(Debug)]
struct Session {
    reference: Canvas,
    drawing: Canvas,
    layers: Vec<ColorLayer>,
    workspace: Workspace,
    grid: ErrorGrid,
    reference_ink: usize,
    drawing_ink: usize,
}

impl Session {
    fn build(
        reference: Canvas,
        config: &EvaluationConfig,
        cancel: Option<&CancelToken>,
    ) -> Result<Self, EvalError> {
        reference.validate()?;
        let (width, height) = reference.dimensions();
        let drawing = Canvas::new(width, height)?;
        let mut workspace = Workspace::new(width, height);
        let settings = settings_for(config, width, height);
        let layers = config
            .evaluated_colors()
            .iter()
            .map(|&key| {
                ColorLayer::build(
                    &reference,
                    &drawing,
                    config.mask_rule(key),
                    settings,
                    &mut workspace,
                    cancel,
                )
            })
            .collect::<Result<Vec<_>, _>>()?;
        let mut session = Self {
            reference_ink: 0,
            drawing_ink: 0,
            reference,
            drawing,
            layers,
            workspace,
            grid: ErrorGrid::new(),
        };
        session.recount();
        session.combine();
        Ok(session)
    }

    fn is_reference_ink(&self, index: usize) -> bool {
        self.layers.iter().any(|layer| layer.reference_mask().get(index))
    }

    fn is_drawing_ink(&self, index: usize) -> bool {
        self.layers.iter().any(|layer| layer.drawing_mask().get(index))
    }

    /// Pixels masked by at least one evaluated color, per canvas.
    fn recount(&mut self) {
        let cells = self.reference.pixels().len();
        self.reference_ink = (0..cells).filter(|&i| self.is_reference_ink(i)).count();
        self.drawing_ink = (0..cells).filter(|&i| self.is_drawing_ink(i)).count();
    }

    /// Observation grid: block-wise maximum over colors.
    fn combine(&mut self) {
        let mut grid = ErrorGrid::new();
        for layer in &self.layers {
            grid.combine_max(layer.grid());
        }
        self.grid = grid;
    }

    fn layer(&self, key: ColorKey) -> Option<&ColorLayer> {
        self.layers.iter().find(|layer| layer.key() == key)
    }

    fn apply(&mut self, changes: &[PixelChange]) -> UpdateSummary {
        let mut summary = UpdateSummary {
            changed_pixels: changes.len(),
            ..UpdateSummary::default()
        };
        if changes.is_empty() {
            return summary;
        }
        let indices: Vec<usize> = changes
            .iter()
            .map(|change| self.drawing.index_of(change.x, change.y))
            .collect();
        let inked_before = indices.iter().filter(|&&i| self.is_drawing_ink(i)).count();
        for layer in &mut self.layers {
            let update = layer.apply(changes, &mut self.workspace);
            summary.regional_rebuilds += update.regional_rebuilds;
            summary.full_rebuilds += update.full_rebuilds;
        }
        let inked_after = indices.iter().filter(|&&i| self.is_drawing_ink(i)).count();
        self.drawing_ink = self.drawing_ink + inked_after - inked_before;
        for (&index, change) in indices.iter().zip(changes) {
            self.drawing.set_index(index, change.current);
        }
        self.combine();
        summary
    }
}

/// One drawing session evaluated against a reference image.
#[derive(Debug)]
pub struct Observation {
    config: EvaluationConfig,
    clock: Box<dyn Clock>,
    start_time: Option<u64>,
    end_time: Option<u64>,
    session: Option<Session>,
}

impl Observation {
    /// Creates an observation for `reference` with a blank drawing.
    ///
    /// `start_time` (ms since epoch) starts the observation immediately when given.
    pub fn new(
        reference: Canvas,
        start_time: Option<u64>,
        config: EvaluationConfig,
    ) -> Result<Self, EvalError> {
        let config = config.validated()?;
        let session = Session::build(reference, &config, None)?;
        info!(
            "Observation: created {}x{} with {} color(s)",
            session.reference.width(),
            session.reference.height(),
            session.layers.len()
        );
        Ok(Self {
            config,
            clock: Box::new(SystemClock),
            start_time,
            end_time: None,
            session: Some(session),
        })
    }

    /// Creates an observation with no reference yet. Drawing updates fail
    /// with [`EvalError::NoReference`] until a reset supplies one.
    pub fn without_reference(config: EvaluationConfig) -> Result<Self, EvalError> {
        Ok(Self {
            config: config.validated()?,
            clock: Box::new(SystemClock),
            start_time: None,
            end_time: None,
            session: None,
        })
    }

    /// Replaces the clock used for "now".
    pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    // --- Lifecycle ---

    /// Starts (or restarts) timing at `at`, or now. Returns the start time.
    pub fn start_observation(&mut self, at: Option<u64>) -> u64 {
        let start = at.unwrap_or_else(|| self.clock.now_ms());
        self.start_time = Some(start);
        self.end_time = None;
        info!("Observation: started at {}", start);
        start
    }

    /// Stops timing at `at`, or now. Finishing twice keeps the first end time.
    pub fn finish_observation(&mut self, at: Option<u64>) -> Result<u64, EvalError> {
        let start = self.start_time.ok_or(EvalError::NotStarted)?;
        if let Some(end) = self.end_time {
            debug!("Observation: already finished at {}", end);
            return Ok(end);
        }
        let end = at.unwrap_or_else(|| self.clock.now_ms()).max(start);
        self.end_time = Some(end);
        info!("Observation: finished at {} after {} ms", end, end - start);
        Ok(end)
    }

    pub fn start_time(&self) -> Option<u64> {
        self.start_time
    }

    pub fn end_time(&self) -> Option<u64> {
        self.end_time
    }

    pub fn is_active(&self) -> bool {
        self.start_time.is_some() && self.end_time.is_none()
    }

    /// Elapsed time in ms: until the end time, or until now while active.
    /// Zero before the observation starts.
    pub fn duration_ms(&self) -> u64 {
        match (self.start_time, self.end_time) {
            (None, _) => 0,
            (Some(start), Some(end)) => end.saturating_sub(start),
            (Some(start), None) => self.clock.now_ms().saturating_sub(start),
        }
    }

    /// Reference pixels masked by at least one evaluated color.
    pub fn reference_pixel_count(&self) -> usize {
        self.session.as_ref().map_or(0, |s| s.reference_ink)
    }

    /// Drawing pixels masked by at least one evaluated color.
    pub fn drawing_pixel_count(&self) -> usize {
        self.session.as_ref().map_or(0, |s| s.drawing_ink)
    }

    /// Reference pixels per second of observation; 0 without pixels or time.
    pub fn drawing_speed(&self) -> f64 {
        let pixels = self.reference_pixel_count();
        let duration = self.duration_ms();
        if pixels == 0 || duration == 0 {
            return 0.0;
        }
        pixels as f64 / (duration as f64 / 1000.0)
    }

    // --- Mutation ---

    /// Replaces the drawing with `canvas`, applying only the changed pixels.
    pub fn update_drawing(&mut self, canvas: &Canvas) -> Result<UpdateSummary, EvalError> {
        let session = self.session.as_mut().ok_or(EvalError::NoReference)?;
        canvas.validate()?;
        let changes = diff_canvases(Some(&session.drawing), canvas)?;
        let summary = session.apply(&changes);
        trace!("Observation: update_drawing {:?}", summary);
        Ok(summary)
    }

    /// Paints the rasterized pixels of a stroke onto the drawing.
    pub fn apply_stroke(&mut self, stroke: &[StrokePixel]) -> Result<UpdateSummary, EvalError> {
        let session = self.session.as_mut().ok_or(EvalError::NoReference)?;
        let changes = diff_stroke(&session.drawing, stroke)?;
        let summary = session.apply(&changes);
        trace!("Observation: apply_stroke {:?}", summary);
        Ok(summary)
    }

    /// Switches to `config`, keeping the layers of colors that stay evaluated.
    ///
    /// A posterization or background change invalidates every mask and
    /// rebuilds all layers.
    pub fn update_config(&mut self, config: EvaluationConfig) -> Result<(), EvalError> {
        let config = config.validated()?;
        let Some(session) = self.session.as_mut() else {
            self.config = config;
            return Ok(());
        };
        let (width, height) = session.reference.dimensions();
        let settings = settings_for(&config, width, height);
        let rebuild_all = self.config.masks_differ(&config);

        // Build what is missing first so nothing is touched if a build fails.
        let mut built = Vec::new();
        for &key in config.evaluated_colors() {
            if rebuild_all || session.layer(key).is_none() {
                built.push(ColorLayer::build(
                    &session.reference,
                    &session.drawing,
                    config.mask_rule(key),
                    settings,
                    &mut session.workspace,
                    None,
                )?);
            }
        }
        let rebuilt = built.len();

        let mut old = std::mem::take(&mut session.layers);
        let mut layers = Vec::with_capacity(config.evaluated_colors().len());
        for &key in config.evaluated_colors() {
            let kept = if rebuild_all {
                None
            } else {
                old.iter().position(|layer| layer.key() == key)
            };
            let layer = match kept {
                Some(position) => {
                    let mut layer = old.swap_remove(position);
                    layer.set_settings(settings);
                    layer
                }
                None => {
                    let position = built.iter().position(|layer| layer.key() == key);
                    match position {
                        Some(position) => built.swap_remove(position),
                        None => continue,
                    }
                }
            };
            layers.push(layer);
        }
        debug!(
            "Observation: config updated, {} layer(s) rebuilt, {} dropped",
            rebuilt,
            old.len()
        );
        session.layers = layers;
        session.recount();
        session.combine();
        self.config = config;
        Ok(())
    }

    /// Replaces reference, start time and config together and clears the
    /// drawing. On error nothing changes.
    pub fn reset_observation(
        &mut self,
        reference: Canvas,
        start_time: Option<u64>,
        config: EvaluationConfig,
    ) -> Result<(), EvalError> {
        self.reset_with(reference, start_time, config, None)
    }

    /// Like [`Observation::reset_observation`], but the full rebuild gives up
    /// with [`EvalError::Cancelled`] once `cancel` is superseded.
    pub fn reset_observation_cancellable(
        &mut self,
        reference: Canvas,
        start_time: Option<u64>,
        config: EvaluationConfig,
        cancel: &CancelToken,
    ) -> Result<(), EvalError> {
        self.reset_with(reference, start_time, config, Some(cancel))
    }

    fn reset_with(
        &mut self,
        reference: Canvas,
        start_time: Option<u64>,
        config: EvaluationConfig,
        cancel: Option<&CancelToken>,
    ) -> Result<(), EvalError> {
        let config = config.validated()?;
        let session = Session::build(reference, &config, cancel)?;
        info!(
            "Observation: reset to {}x{} with {} color(s)",
            session.reference.width(),
            session.reference.height(),
            session.layers.len()
        );
        self.session = Some(session);
        self.config = config;
        self.start_time = start_time;
        self.end_time = None;
        Ok(())
    }

    // --- Queries ---

    /// Assembles a report from cached state. Only requested sections are filled.
    pub fn evaluate(&self, options: &EvaluationOptions) -> Result<EvaluationReport, EvalError> {
        if self.session.is_none() {
            return Err(EvalError::NoReference);
        }
        Ok(EvaluationReport::assemble(self, options))
    }

    pub fn config(&self) -> &EvaluationConfig {
        &self.config
    }

    pub fn reference(&self) -> Option<&Canvas> {
        self.session.as_ref().map(|s| &s.reference)
    }

    pub fn drawing(&self) -> Option<&Canvas> {
        self.session.as_ref().map(|s| &s.drawing)
    }

    /// Colors currently evaluated, in config order.
    pub fn colors(&self) -> Vec<ColorKey> {
        self.session
            .as_ref()
            .map(|s| s.layers.iter().map(ColorLayer::key).collect())
            .unwrap_or_default()
    }

    /// Block-wise maximum of every color's grid.
    pub fn error_grid(&self) -> Option<&ErrorGrid> {
        self.session.as_ref().map(|s| &s.grid)
    }

    /// Grid for one color.
    pub fn color_error_grid(&self, key: ColorKey) -> Option<&ErrorGrid> {
        self.layer(key).map(ColorLayer::grid)
    }

    /// Headline top-5 error: 100 when any color has ink on one side only,
    /// otherwise the top 5 of the combined grid.
    pub fn top5_error(&self) -> Option<f32> {
        let session = self.session.as_ref()?;
        if session.layers.iter().any(ColorLayer::is_degenerate) {
            return Some(100.0);
        }
        Some(session.grid.top5())
    }

    /// Top-5 error of one color.
    pub fn color_top5_error(&self, key: ColorKey) -> Option<f32> {
        self.layer(key).map(ColorLayer::top5)
    }

    /// Mean clamped distance over every scored cell of every color, as a percentage.
    pub fn mean_error(&self) -> Option<f32> {
        let session = self.session.as_ref()?;
        let (sum, count) = session
            .layers
            .iter()
            .map(ColorLayer::mean_terms)
            .fold((0u64, 0usize), |(s, c), (ls, lc)| (s + ls, c + lc));
        if count == 0 {
            return Some(0.0);
        }
        let (width, _) = session.reference.dimensions();
        Some(percent(sum as f32 / count as f32, self.config.error_divisor(width)))
    }

    pub fn color_mean_error(&self, key: ColorKey) -> Option<f32> {
        self.layer(key).map(ColorLayer::mean_error)
    }

    pub fn reference_heatmap(&self, key: ColorKey) -> Option<&Heatmap> {
        self.layer(key).map(ColorLayer::reference_heatmap)
    }

    pub fn drawing_heatmap(&self, key: ColorKey) -> Option<&Heatmap> {
        self.layer(key).map(ColorLayer::drawing_heatmap)
    }

    pub fn reference_mask(&self, key: ColorKey) -> Option<&Mask> {
        self.layer(key).map(ColorLayer::reference_mask)
    }

    pub fn drawing_mask(&self, key: ColorKey) -> Option<&Mask> {
        self.layer(key).map(ColorLayer::drawing_mask)
    }

    fn layer(&self, key: ColorKey) -> Option<&ColorLayer> {
        self.session.as_ref()?.layer(key)
    }

    // --- Snapshots ---

    /// Captures the full state as a plain value.
    pub fn snapshot(&self) -> Result<ObservationSnapshot, EvalError> {
        let session = self.session.as_ref().ok_or(EvalError::NoReference)?;
        Ok(ObservationSnapshot {
            config: self.config.clone(),
            start_time: self.start_time,
            end_time: self.end_time,
            reference: session.reference.clone(),
            drawing: session.drawing.clone(),
            layers: session
                .layers
                .iter()
                .map(|layer| LayerSnapshot {
                    key: layer.key(),
                    reference_mask: layer.reference_mask().clone(),
                    drawing_mask: layer.drawing_mask().clone(),
                    reference_heatmap: layer.reference_heatmap().clone(),
                    drawing_heatmap: layer.drawing_heatmap().clone(),
                    error_grid: *layer.grid(),
                })
                .collect(),
        })
    }

    /// Restores an observation from a snapshot without rerunning any transform.
    pub fn from_snapshot(snapshot: ObservationSnapshot) -> Result<Self, EvalError> {
        let config = snapshot.config.validated()?;
        snapshot.reference.validate()?;
        snapshot.drawing.validate()?;
        snapshot.reference.ensure_same_dimensions(&snapshot.drawing)?;
        let (width, height) = snapshot.reference.dimensions();

        let keys: Vec<ColorKey> = snapshot.layers.iter().map(|layer| layer.key).collect();
        if keys != config.evaluated_colors() {
            return Err(EvalError::InvalidSnapshot(format!(
                "layers {:?} do not match configured colors {:?}",
                keys,
                config.evaluated_colors()
            )));
        }

        let settings = settings_for(&config, width, height);
        let mut layers = Vec::with_capacity(snapshot.layers.len());
        for layer in snapshot.layers {
            let key = layer.key;
            let invalid = |msg: String| EvalError::InvalidSnapshot(format!("layer {}: {}", key, msg));
            let rule = config.mask_rule(key);
            layer
                .validate(&snapshot.reference, &snapshot.drawing, &rule)
                .map_err(invalid)?;
            let stored_grid = layer.error_grid;
            let restored = ColorLayer::from_parts(
                rule,
                settings,
                layer.reference_mask,
                layer.drawing_mask,
                layer.reference_heatmap,
                layer.drawing_heatmap,
            );
            if !restored.grid().approx_eq(&stored_grid, GRID_TOLERANCE) {
                return Err(invalid("error grid does not match the heatmaps".to_string()));
            }
            layers.push(restored);
        }

        let mut session = Session {
            reference_ink: 0,
            drawing_ink: 0,
            reference: snapshot.reference,
            drawing: snapshot.drawing,
            layers,
            workspace: Workspace::new(width, height),
            grid: ErrorGrid::new(),
        };
        session.recount();
        session.combine();
        info!("Observation: restored {}x{} from snapshot", width, height);
        Ok(Self {
            config,
            clock: Box::new(SystemClock),
            start_time: snapshot.start_time,
            end_time: snapshot.end_time,
            session: Some(session),
        })
    }
}

#[cfg(test)]
mod tests;
