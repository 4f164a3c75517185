// src/main.rs

//! Demo driver: evaluates a synthetic drawing session on a worker thread and
//! prints the final report.
//!
//! Usage: `drawing-eval [config.json]`

use anyhow::Context;
use drawing_eval::{
    Canvas, ColorThreshold, EvaluationConfig, EvaluationOptions, EvaluationWorker,
    Observation, ReportSections, StrokePixel, WorkerEvent, DEFAULT_CONFIG,
};
use log::{info, warn};
use std::path::PathBuf;

const CANVAS_SIZE: usize = 500;
const INK: [u8; 4] = [20, 20, 20, 255];

/// A circle outline with a horizontal line through it.
fn reference_canvas() -> anyhow::Result<Canvas> {
    let mut canvas = Canvas::filled(CANVAS_SIZE, CANVAS_SIZE, drawing_eval::color::WHITE)?;
    let center = (CANVAS_SIZE / 2) as f64;
    for step in 0..2_000 {
        let angle = step as f64 / 2_000.0 * std::f64::consts::TAU;
        let x = (center + 150.0 * angle.cos()).round() as usize;
        let y = (center + 150.0 * angle.sin()).round() as usize;
        canvas.set(x, y, INK)?;
    }
    for x in 100..400 {
        canvas.set(x, CANVAS_SIZE / 2, INK)?;
    }
    Ok(canvas)
}

/// The strokes a slightly shaky student might produce for the reference.
fn strokes() -> Vec<Vec<StrokePixel>> {
    let center = (CANVAS_SIZE / 2) as f64;
    let circle = (0..2_000)
        .map(|step| {
            let angle = step as f64 / 2_000.0 * std::f64::consts::TAU;
            let radius = 150.0 + 6.0 * (angle * 3.0).sin();
            let x = (center + radius * angle.cos()).round() as usize;
            let y = (center + radius * angle.sin()).round() as usize;
            StrokePixel::paint(x, y, INK)
        })
        .collect();
    let line = (110..390)
        .map(|x| StrokePixel::paint(x, CANVAS_SIZE / 2 + 4, INK))
        .collect();
    let slip = (300..340).map(|x| StrokePixel::paint(x, 100, INK)).collect();
    let erase = (300..340).map(|x| StrokePixel::erase(x, 100)).collect();
    vec![circle, line, slip, erase]
}

fn main() -> anyhow::Result<()> {
    // Initialize the logger. Default filter is "info" if RUST_LOG is not set.
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_micros()
        .init();

    let config = match std::env::args().nth(1).map(PathBuf::from) {
        Some(path) => EvaluationConfig::load(&path)?,
        None => {
            info!("No config file given, using defaults");
            DEFAULT_CONFIG.clone()
        }
    };

    let reference = reference_canvas().context("Failed to draw reference")?;
    let observation =
        Observation::new(reference, None, config.clone()).context("Failed to create observation")?;
    let worker = EvaluationWorker::spawn(observation)?;
    worker.start(None)?;

    for stroke in strokes() {
        worker.apply_stroke(stroke)?;
    }
    worker.finish(None)?;

    let options = EvaluationOptions {
        sections: ReportSections::STATISTICS | ReportSections::ERROR_GRID | ReportSections::ERROR_IMAGE,
        thresholds: config
            .evaluated_colors()
            .iter()
            .map(|&key| ColorThreshold { key, max_error: 2.0 })
            .collect(),
    };
    let report = worker.evaluate(options)?;

    while let Some(event) = worker.try_event() {
        match event {
            WorkerEvent::Updated {
                summary, top5_error, ..
            } => info!(
                "Stroke applied: {} pixels changed, live top-5 error {:.1}%",
                summary.changed_pixels,
                top5_error.unwrap_or(0.0)
            ),
            WorkerEvent::Failed { error, .. } => warn!("Command failed: {}", error),
            other => info!("{:?}", other),
        }
    }
    worker.shutdown()?;

    if let Some(summary) = report.summary() {
        println!("{}", summary);
    }
    if let Some(image) = &report.error_image {
        info!("{} block(s) over threshold", image.flagged.len());
    }
    println!(
        "{}",
        serde_json::to_string_pretty(&report.error_grid).context("Failed to serialize error grid")?
    );
    Ok(())
}
