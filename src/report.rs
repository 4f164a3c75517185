// src/report.rs

//! Evaluation reports assembled from an observation's cached state.
//!
//! Every section is optional and selected with [`ReportSections`], so a
//! statistics-only query never copies a raster.

use crate::canvas::Canvas;
use crate::color::{ColorKey, Rgba, WHITE};
use crate::error_grid::{ErrorGrid, GRID_SIZE};
use crate::heatmap::Heatmap;
use crate::observation::Observation;
use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::fmt;

bitflags! {
    /// Sections an [`EvaluationReport`] should carry.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct ReportSections: u8 {
        const STATISTICS  = 1 << 0;
        const IMAGES      = 1 << 1; // Reference and drawing canvases.
        const HEATMAPS    = 1 << 2;
        const ERROR_GRID  = 1 << 3;
        const ERROR_IMAGE = 1 << 4;
    }
}

impl Default for ReportSections {
    fn default() -> Self {
        ReportSections::STATISTICS
    }
}

/// Largest acceptable block error for one color; blocks above it are flagged.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ColorThreshold {
    pub key: ColorKey,
    pub max_error: f32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvaluationOptions {
    pub sections: ReportSections,
    pub thresholds: Vec<ColorThreshold>,
}

impl EvaluationOptions {
    pub fn with_sections(sections: ReportSections) -> Self {
        Self {
            sections,
            thresholds: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColorStatistics {
    pub key: ColorKey,
    pub top5_error: f32,
    pub mean_error: f32,
    pub reference_pixel_count: usize,
    pub drawing_pixel_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Statistics {
    pub duration_ms: u64,
    pub reference_pixel_count: usize,
    pub drawing_pixel_count: usize,
    /// Reference pixels per second.
    pub drawing_speed: f64,
    pub top5_error: f32,
    pub mean_error: f32,
    pub per_color: Vec<ColorStatistics>,
}

impl fmt::Display for Statistics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Top 5 error: {:.1}%\nMean error: {:.1}%\nPixel count: {}",
            self.top5_error, self.mean_error, self.reference_pixel_count
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportImages {
    pub reference: Canvas,
    pub drawing: Canvas,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColorHeatmaps {
    pub key: ColorKey,
    pub reference: Heatmap,
    pub drawing: Heatmap,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColorGrid {
    pub key: ColorKey,
    pub grid: ErrorGrid,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridSection {
    /// Block-wise maximum over colors.
    pub combined: ErrorGrid,
    pub per_color: Vec<ColorGrid>,
}

/// A block whose error exceeds its color's threshold.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FlaggedBlock {
    pub key: ColorKey,
    pub gx: usize,
    pub gy: usize,
    pub error: f32,
}

/// Canvas-sized visualization of the error grid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorImage {
    pub canvas: Canvas,
    pub flagged: Vec<FlaggedBlock>,
}

const REFERENCE_INK: Rgba = [0, 255, 255, 255];
const DRAWING_INK: Rgba = [255, 0, 0, 255];

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EvaluationReport {
    pub statistics: Option<Statistics>,
    pub images: Option<ReportImages>,
    pub heatmaps: Option<Vec<ColorHeatmaps>>,
    pub error_grid: Option<GridSection>,
    pub error_image: Option<ErrorImage>,
}

impl EvaluationReport {
    pub(crate) fn assemble(observation: &Observation, options: &EvaluationOptions) -> Self {
        let sections = options.sections;
        let colors = observation.colors();
        let mut report = EvaluationReport::default();

        if sections.contains(ReportSections::STATISTICS) {
            report.statistics = Some(statistics(observation, &colors));
        }
        if sections.contains(ReportSections::IMAGES) {
            if let (Some(reference), Some(drawing)) = (observation.reference(), observation.drawing()) {
                report.images = Some(ReportImages {
                    reference: reference.clone(),
                    drawing: drawing.clone(),
                });
            }
        }
        if sections.contains(ReportSections::HEATMAPS) {
            report.heatmaps = Some(
                colors
                    .iter()
                    .filter_map(|&key| {
                        Some(ColorHeatmaps {
                            key,
                            reference: observation.reference_heatmap(key)?.clone(),
                            drawing: observation.drawing_heatmap(key)?.clone(),
                        })
                    })
                    .collect(),
            );
        }
        if sections.contains(ReportSections::ERROR_GRID) {
            report.error_grid = observation.error_grid().map(|&combined| GridSection {
                combined,
                per_color: colors
                    .iter()
                    .filter_map(|&key| {
                        let grid = *observation.color_error_grid(key)?;
                        Some(ColorGrid { key, grid })
                    })
                    .collect(),
            });
        }
        if sections.contains(ReportSections::ERROR_IMAGE) {
            report.error_image = error_image(observation, &options.thresholds);
        }
        report
    }

    /// The text summary, when statistics were requested.
    pub fn summary(&self) -> Option<String> {
        self.statistics.as_ref().map(ToString::to_string)
    }
}

fn statistics(observation: &Observation, colors: &[ColorKey]) -> Statistics {
    let per_color = colors
        .iter()
        .map(|&key| ColorStatistics {
            key,
            top5_error: observation.color_top5_error(key).unwrap_or(0.0),
            mean_error: observation.color_mean_error(key).unwrap_or(0.0),
            reference_pixel_count: observation.reference_mask(key).map_or(0, |m| m.count()),
            drawing_pixel_count: observation.drawing_mask(key).map_or(0, |m| m.count()),
        })
        .collect();
    Statistics {
        duration_ms: observation.duration_ms(),
        reference_pixel_count: observation.reference_pixel_count(),
        drawing_pixel_count: observation.drawing_pixel_count(),
        drawing_speed: observation.drawing_speed(),
        top5_error: observation.top5_error().unwrap_or(0.0),
        mean_error: observation.mean_error().unwrap_or(0.0),
        per_color,
    }
}

/// Grey shading by combined block error, red tint over flagged blocks, then
/// reference ink in cyan and drawing ink in red on top.
fn error_image(observation: &Observation, thresholds: &[ColorThreshold]) -> Option<ErrorImage> {
    let reference = observation.reference()?;
    let drawing = observation.drawing()?;
    let combined = observation.error_grid()?;
    let (width, height) = reference.dimensions();
    let (block_width, block_height) = (width / GRID_SIZE, height / GRID_SIZE);

    let mut flagged = Vec::new();
    for threshold in thresholds {
        let Some(grid) = observation.color_error_grid(threshold.key) else {
            continue;
        };
        for gy in 0..GRID_SIZE {
            for gx in 0..GRID_SIZE {
                let error = grid.get(gx, gy).unwrap_or(0.0);
                if error > threshold.max_error {
                    flagged.push(FlaggedBlock {
                        key: threshold.key,
                        gx,
                        gy,
                        error,
                    });
                }
            }
        }
    }

    let mut is_flagged = [[false; GRID_SIZE]; GRID_SIZE];
    for block in &flagged {
        is_flagged[block.gy][block.gx] = true;
    }

    let background = observation.config().background;
    let mut pixels = vec![WHITE; width * height];
    for (index, pixel) in pixels.iter_mut().enumerate() {
        let (x, y) = reference.pos_of(index);
        let (gx, gy) = (x / block_width, y / block_height);
        let error = combined.get(gx, gy).unwrap_or(0.0);
        let shade = 255 - (error.clamp(0.0, 100.0) * 2.0) as u8;
        *pixel = if is_flagged[gy][gx] {
            [255, shade / 2, shade / 2, 255]
        } else {
            [shade, shade, shade, 255]
        };
        if !background.is_background(reference.pixel(index)) {
            *pixel = REFERENCE_INK;
        }
        if !background.is_background(drawing.pixel(index)) {
            *pixel = DRAWING_INK;
        }
    }

    let canvas = Canvas::from_pixels(width, height, pixels).ok()?;
    Some(ErrorImage { canvas, flagged })
}
