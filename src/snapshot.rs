// src/snapshot.rs

//! Plain-data capture of an observation: canvases, masks, heatmaps and grids.
//! Serializes as ordinary JSON and restores with
//! [`Observation::from_snapshot`](crate::observation::Observation::from_snapshot).

use crate::canvas::Canvas;
use crate::color::ColorKey;
use crate::config::EvaluationConfig;
use crate::error::EvalError;
use crate::error_grid::ErrorGrid;
use crate::heatmap::Heatmap;
use crate::mask::{Mask, MaskRule};
use serde::{Deserialize, Serialize};

/// State of one color layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerSnapshot {
    pub key: ColorKey,
    pub reference_mask: Mask,
    pub drawing_mask: Mask,
    pub reference_heatmap: Heatmap,
    pub drawing_heatmap: Heatmap,
    pub error_grid: ErrorGrid,
}

impl LayerSnapshot {
    /// Checks that the masks are what `rule` extracts from the canvases and
    /// that each heatmap is the transform of its mask.
    pub(crate) fn validate(&self, reference: &Canvas, drawing: &Canvas, rule: &MaskRule) -> Result<(), String> {
        self.reference_mask.validate()?;
        self.drawing_mask.validate()?;
        self.reference_heatmap.validate()?;
        self.drawing_heatmap.validate()?;
        if self.reference_mask != Mask::extract(reference, rule) {
            return Err("reference mask does not match the reference canvas".to_string());
        }
        if self.drawing_mask != Mask::extract(drawing, rule) {
            return Err("drawing mask does not match the drawing canvas".to_string());
        }
        self.reference_heatmap
            .verify(&self.reference_mask)
            .map_err(|msg| format!("reference heatmap: {}", msg))?;
        self.drawing_heatmap
            .verify(&self.drawing_mask)
            .map_err(|msg| format!("drawing heatmap: {}", msg))?;
        Ok(())
    }
}

/// Everything needed to resume an observation elsewhere.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservationSnapshot {
    pub config: EvaluationConfig,
    pub start_time: Option<u64>,
    pub end_time: Option<u64>,
    pub reference: Canvas,
    pub drawing: Canvas,
    pub layers: Vec<LayerSnapshot>,
}

impl ObservationSnapshot {
    pub fn to_json(&self) -> Result<String, EvalError> {
        serde_json::to_string(self).map_err(|e| EvalError::InvalidSnapshot(e.to_string()))
    }

    pub fn from_json(json: &str) -> Result<Self, EvalError> {
        serde_json::from_str(json).map_err(|e| EvalError::InvalidSnapshot(e.to_string()))
    }
}
