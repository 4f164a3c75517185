// src/error.rs

//! Error types for the evaluation engine.
//!
//! Configuration and state errors are fatal to the call that triggered them and
//! leave the `Observation` untouched. Computation conditions such as an empty
//! mask are not errors; they surface as capped heatmaps instead.

use std::fmt;

/// Broad category of an [`EvalError`], used by callers that only need to know
/// whether to fix their input, fix their call order, or retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Invalid dimensions, color keys, or configuration values.
    Configuration,
    /// The call is not valid in the observation's current lifecycle state.
    State,
    /// A full rebuild was superseded by a newer reset.
    Cancelled,
    /// The background worker is no longer running.
    Worker,
}

/// Errors produced by the evaluation engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EvalError {
    /// Reference and drawing buffers do not share dimensions.
    DimensionMismatch {
        expected: (usize, usize),
        actual: (usize, usize),
    },
    /// Dimensions are zero, not square, not divisible by the grid size, or too large to index.
    InvalidDimensions { width: usize, height: usize },
    /// A pixel buffer's length does not match its declared dimensions.
    BufferLength { expected: usize, actual: usize },
    /// A color key string could not be parsed.
    UnknownColorKey(String),
    /// Posterization must be in `1..=256`.
    InvalidPosterization(u32),
    /// The configuration requests no colors at all.
    EmptyColorSet,
    /// Any other invalid configuration value (bad JSON, out-of-range fraction, ...).
    InvalidConfig(String),
    /// A stroke pixel lies outside the canvas.
    PixelOutOfBounds { x: usize, y: usize },
    /// A snapshot is internally inconsistent.
    InvalidSnapshot(String),
    /// The drawing was mutated (or evaluated) before a reference was set.
    NoReference,
    /// `finish_observation` was called on an observation that never started.
    NotStarted,
    /// A full rebuild was cancelled because a newer reset superseded it.
    Cancelled,
    /// The evaluation worker thread has stopped.
    WorkerStopped,
}

impl EvalError {
    /// Returns the category of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            EvalError::DimensionMismatch { .. }
            | EvalError::InvalidDimensions { .. }
            | EvalError::BufferLength { .. }
            | EvalError::UnknownColorKey(_)
            | EvalError::InvalidPosterization(_)
            | EvalError::EmptyColorSet
            | EvalError::InvalidConfig(_)
            | EvalError::PixelOutOfBounds { .. }
            | EvalError::InvalidSnapshot(_) => ErrorKind::Configuration,
            EvalError::NoReference | EvalError::NotStarted => ErrorKind::State,
            EvalError::Cancelled => ErrorKind::Cancelled,
            EvalError::WorkerStopped => ErrorKind::Worker,
        }
    }
}

impl fmt::Display for EvalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EvalError::DimensionMismatch { expected, actual } => write!(
                f,
                "dimension mismatch: expected {}x{}, got {}x{}",
                expected.0, expected.1, actual.0, actual.1
            ),
            EvalError::InvalidDimensions { width, height } => write!(
                f,
                "invalid canvas dimensions {}x{}: canvas must be square with a non-zero multiple of 10 per side",
                width, height
            ),
            EvalError::BufferLength { expected, actual } => write!(
                f,
                "pixel buffer holds {} entries, expected {}",
                actual, expected
            ),
            EvalError::UnknownColorKey(key) => write!(f, "unrecognized color key '{}'", key),
            EvalError::InvalidPosterization(value) => write!(
                f,
                "posterization must be between 1 and 256, got {}",
                value
            ),
            EvalError::EmptyColorSet => write!(f, "at least one color must be evaluated"),
            EvalError::InvalidConfig(msg) => write!(f, "invalid configuration: {}", msg),
            EvalError::PixelOutOfBounds { x, y } => {
                write!(f, "stroke pixel ({}, {}) lies outside the canvas", x, y)
            }
            EvalError::InvalidSnapshot(msg) => write!(f, "invalid snapshot: {}", msg),
            EvalError::NoReference => write!(f, "no reference image has been set"),
            EvalError::NotStarted => write!(f, "observation was never started"),
            EvalError::Cancelled => write!(f, "rebuild superseded by a newer reset"),
            EvalError::WorkerStopped => write!(f, "evaluation worker has stopped"),
        }
    }
}

impl std::error::Error for EvalError {}
