// src/lib.rs

//! Incremental evaluation of a raster drawing against a reference image.
//!
//! Each evaluated color gets a mask and a distance heatmap on both canvases.
//! Pointwise errors are reduced into a 10×10 [`ErrorGrid`], and every drawing
//! update recomputes only the cells its changed pixels affect.

pub mod cancel;
pub mod canvas;
pub mod clock;
pub mod color;
pub mod config;
pub mod diff;
pub mod error;
pub mod error_grid;
pub mod heatmap;
mod layer;
pub mod mask;
pub mod observation;
pub mod report;
pub mod snapshot;
pub mod worker;

pub use crate::cancel::CancelToken;
pub use crate::canvas::Canvas;
pub use crate::clock::{Clock, ManualClock, SystemClock};
pub use crate::color::{ColorKey, Rgba};
pub use crate::config::{EvaluationConfig, DEFAULT_CONFIG};
pub use crate::diff::{diff_canvases, diff_stroke, PixelChange, StrokePixel};
pub use crate::error::{ErrorKind, EvalError};
pub use crate::error_grid::{ErrorGrid, GRID_SIZE};
pub use crate::heatmap::{Heatmap, UNREACHABLE};
pub use crate::mask::{BackgroundPolicy, Mask};
pub use crate::observation::{Observation, UpdateSummary};
pub use crate::report::{ColorThreshold, EvaluationOptions, EvaluationReport, ReportSections};
pub use crate::snapshot::ObservationSnapshot;
pub use crate::worker::{EvaluationWorker, WorkerEvent};
