// src/config.rs

//! Evaluation settings.
//!
//! Deserialized from JSON with serde. Every field has a default so a partial
//! document (or `{}`) is valid; `validated` runs before a config is accepted
//! by an observation.

use crate::color::{ColorKey, MAX_POSTERIZATION};
use crate::error::EvalError;
use crate::mask::{BackgroundPolicy, MaskRule};
use anyhow::Context;
use log::warn;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// The configuration used when none is supplied.
pub static DEFAULT_CONFIG: Lazy<EvaluationConfig> = Lazy::new(EvaluationConfig::default);

/// Settings for one observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvaluationConfig {
    /// Colors evaluated as independent layers.
    #[serde(alias = "colorToEvaluate")]
    pub color_to_evaluate: Vec<ColorKey>,
    /// Buckets per channel used when matching `Rgb` keys, 1 to 256.
    pub posterization: u32,
    /// Which pixels count as paper.
    pub background: BackgroundPolicy,
    /// Distance (in pixels) that maps to 100 % error. Defaults to the canvas width.
    #[serde(alias = "maxExpectedError")]
    pub max_expected_error: Option<f32>,
    /// A seed removal touching more than this share of the canvas triggers a
    /// full heatmap rebuild instead of a regional one.
    #[serde(alias = "regionalRebuildFraction")]
    pub regional_rebuild_fraction: f32,
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        EvaluationConfig {
            color_to_evaluate: vec![ColorKey::Ink],
            posterization: 10,
            background: BackgroundPolicy::default(),
            max_expected_error: None,
            regional_rebuild_fraction: 0.25,
        }
    }
}

impl EvaluationConfig {
    /// Parses and validates a JSON document.
    pub fn from_json_str(json: &str) -> Result<Self, EvalError> {
        let value: serde_json::Value =
            serde_json::from_str(json).map_err(|e| EvalError::InvalidConfig(e.to_string()))?;
        // Parse keys up front so a bad one is reported as itself.
        let keys = value
            .get("color_to_evaluate")
            .or_else(|| value.get("colorToEvaluate"))
            .and_then(serde_json::Value::as_array);
        for key in keys.into_iter().flatten() {
            if let Some(text) = key.as_str() {
                text.parse::<ColorKey>()?;
            }
        }
        let config: EvaluationConfig =
            serde_json::from_value(value).map_err(|e| EvalError::InvalidConfig(e.to_string()))?;
        config.validated()
    }

    /// Reads, parses and validates a JSON config file.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config = Self::from_json_str(&text)
            .with_context(|| format!("Invalid config file {}", path.display()))?;
        Ok(config)
    }

    /// Checks every field. Duplicate color keys are dropped with a warning.
    pub fn validated(mut self) -> Result<Self, EvalError> {
        if self.color_to_evaluate.is_empty() {
            return Err(EvalError::EmptyColorSet);
        }
        if self.posterization == 0 || self.posterization > MAX_POSTERIZATION {
            return Err(EvalError::InvalidPosterization(self.posterization));
        }
        if let Some(max) = self.max_expected_error {
            if !(max.is_finite() && max > 0.0) {
                return Err(EvalError::InvalidConfig(format!(
                    "max_expected_error must be positive, got {}",
                    max
                )));
            }
        }
        if !(self.regional_rebuild_fraction > 0.0 && self.regional_rebuild_fraction <= 1.0) {
            return Err(EvalError::InvalidConfig(format!(
                "regional_rebuild_fraction must be in (0, 1], got {}",
                self.regional_rebuild_fraction
            )));
        }

        let mut seen = Vec::with_capacity(self.color_to_evaluate.len());
        for key in self.color_to_evaluate.drain(..) {
            if seen.contains(&key) {
                warn!("Config: duplicate color key {} ignored", key);
            } else {
                seen.push(key);
            }
        }
        self.color_to_evaluate = seen;
        Ok(self)
    }

    /// Colors evaluated, in configured order.
    pub fn evaluated_colors(&self) -> &[ColorKey] {
        &self.color_to_evaluate
    }

    /// Mask rule for `key` under this config.
    pub fn mask_rule(&self, key: ColorKey) -> MaskRule {
        MaskRule::new(key, self.posterization, self.background)
    }

    /// Divisor that turns a raw distance into a percentage on a canvas `width` wide.
    pub fn error_divisor(&self, width: usize) -> f32 {
        self.max_expected_error.unwrap_or(width as f32)
    }

    /// Largest regional rebuild, in cells, on a canvas of `cells` cells.
    pub fn regional_limit(&self, cells: usize) -> usize {
        (cells as f64 * f64::from(self.regional_rebuild_fraction)) as usize
    }

    /// True when masks depend on something other than the key list, so a
    /// change between `self` and `other` invalidates every layer.
    pub(crate) fn masks_differ(&self, other: &EvaluationConfig) -> bool {
        self.posterization != other.posterization || self.background != other.background
    }
}
