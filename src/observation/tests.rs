// src/observation/tests.rs

use super::*;
use crate::clock::ManualClock;
use crate::color::{BLACK, WHITE};
use crate::error::ErrorKind;
use crate::report::ReportSections;
use test_log::test;

const RED: [u8; 4] = [250, 10, 10, 255];
const BLUE: [u8; 4] = [10, 10, 250, 255];

fn reference_with(pixels: &[((usize, usize), [u8; 4])]) -> Canvas {
    let mut canvas = Canvas::filled(100, 100, WHITE).unwrap();
    for &((x, y), color) in pixels {
        canvas.set(x, y, color).unwrap();
    }
    canvas
}

fn two_color_config() -> EvaluationConfig {
    EvaluationConfig {
        color_to_evaluate: vec![ColorKey::Rgb(255, 0, 0), ColorKey::Rgb(0, 0, 255)],
        ..EvaluationConfig::default()
    }
}

// --- Timing ---

#[test]
fn timing_before_start_is_zero() {
    let clock = ManualClock::new(10_000);
    let obs = Observation::new(reference_with(&[((5, 5), BLACK)]), None, EvaluationConfig::default())
        .unwrap()
        .with_clock(clock);
    assert_eq!(obs.duration_ms(), 0);
    assert_eq!(obs.drawing_speed(), 0.0);
    assert!(!obs.is_active());
}

#[test]
fn duration_tracks_clock_until_finished() {
    let clock = ManualClock::new(1_000);
    let mut obs = Observation::new(reference_with(&[((5, 5), BLACK), ((6, 6), BLACK)]), None, EvaluationConfig::default())
        .unwrap()
        .with_clock(clock.clone());

    assert_eq!(obs.start_observation(None), 1_000);
    clock.advance(500);
    assert_eq!(obs.duration_ms(), 500);
    assert!(obs.is_active());
    // Two reference pixels over half a second.
    assert_eq!(obs.drawing_speed(), 4.0);

    assert_eq!(obs.finish_observation(Some(3_000)).unwrap(), 3_000);
    clock.advance(10_000);
    assert_eq!(obs.duration_ms(), 2_000);
    // A second finish keeps the first end time.
    assert_eq!(obs.finish_observation(Some(9_000)).unwrap(), 3_000);
    assert_eq!(obs.end_time(), Some(3_000));
}

#[test]
fn finishing_unstarted_observation_fails() {
    let mut obs = Observation::new(reference_with(&[]), None, EvaluationConfig::default()).unwrap();
    let err = obs.finish_observation(None).unwrap_err();
    assert_eq!(err, EvalError::NotStarted);
    assert_eq!(err.kind(), ErrorKind::State);
}

#[test]
fn start_time_at_construction_starts_the_clock() {
    let clock = ManualClock::new(2_500);
    let obs = Observation::new(reference_with(&[]), Some(2_000), EvaluationConfig::default())
        .unwrap()
        .with_clock(clock);
    assert_eq!(obs.start_time(), Some(2_000));
    assert_eq!(obs.duration_ms(), 500);
}

// --- Drawing updates ---

#[test]
fn drawing_without_reference_is_a_state_error() {
    let mut obs = Observation::without_reference(EvaluationConfig::default()).unwrap();
    assert_eq!(
        obs.apply_stroke(&[StrokePixel::paint(0, 0, BLACK)]).unwrap_err(),
        EvalError::NoReference
    );
    assert_eq!(
        obs.evaluate(&EvaluationOptions::default()).unwrap_err(),
        EvalError::NoReference
    );
    assert_eq!(obs.top5_error(), None);

    obs.reset_observation(reference_with(&[((1, 1), BLACK)]), None, EvaluationConfig::default())
        .unwrap();
    assert!(obs.apply_stroke(&[StrokePixel::paint(1, 1, BLACK)]).is_ok());
    assert_eq!(obs.top5_error(), Some(0.0));
}

#[test]
fn identical_update_changes_nothing() {
    let mut obs = Observation::new(reference_with(&[((40, 40), BLACK)]), None, EvaluationConfig::default()).unwrap();
    obs.apply_stroke(&[StrokePixel::paint(42, 40, BLACK)]).unwrap();
    let grid = *obs.error_grid().unwrap();
    let heatmap = obs.drawing_heatmap(ColorKey::Ink).unwrap().clone();

    let same = obs.drawing().unwrap().clone();
    let summary = obs.update_drawing(&same).unwrap();
    assert_eq!(summary, UpdateSummary::default());
    assert_eq!(*obs.error_grid().unwrap(), grid);
    assert_eq!(obs.drawing_heatmap(ColorKey::Ink).unwrap(), &heatmap);
}

#[test]
fn zero_alpha_pixels_round_trip_exactly() {
    let mut obs = Observation::new(reference_with(&[((40, 40), BLACK)]), None, EvaluationConfig::default()).unwrap();
    let canvas = reference_with(&[((7, 7), [255, 0, 0, 0]), ((8, 7), [0, 0, 0, 0])]);

    obs.update_drawing(&canvas).unwrap();
    assert_eq!(obs.drawing(), Some(&canvas));
    let again = obs.update_drawing(&canvas).unwrap();
    assert_eq!(again.changed_pixels, 0);
    assert_eq!(obs.drawing(), Some(&canvas));
}

#[test]
fn update_drawing_rejects_mismatched_canvas() {
    let mut obs = Observation::new(reference_with(&[((40, 40), BLACK)]), None, EvaluationConfig::default()).unwrap();
    let wrong = Canvas::new(50, 50).unwrap();
    assert!(matches!(
        obs.update_drawing(&wrong),
        Err(EvalError::DimensionMismatch { .. })
    ));
    assert_eq!(obs.drawing().unwrap().width(), 100);
}

fn with_rebuild_fraction(fraction: f32) -> EvaluationConfig {
    EvaluationConfig {
        regional_rebuild_fraction: fraction,
        ..EvaluationConfig::default()
    }
}

#[test]
fn erasing_counts_regional_rebuilds() {
    let mut obs = Observation::new(reference_with(&[((40, 40), BLACK)]), None, with_rebuild_fraction(1.0)).unwrap();
    obs.apply_stroke(&[StrokePixel::paint(40, 40, BLACK), StrokePixel::paint(60, 60, BLACK)])
        .unwrap();
    let summary = obs.apply_stroke(&[StrokePixel::erase(60, 60)]).unwrap();
    assert_eq!(summary.changed_pixels, 1);
    assert_eq!(summary.regional_rebuilds, 1);
    assert_eq!(summary.full_rebuilds, 0);
    assert_eq!(obs.drawing_pixel_count(), 1);
    assert_eq!(obs.top5_error(), Some(0.0));
}

#[test]
fn large_erase_falls_back_to_full_rebuild() {
    let mut obs = Observation::new(reference_with(&[((40, 40), BLACK)]), None, with_rebuild_fraction(0.01)).unwrap();
    obs.apply_stroke(&[StrokePixel::paint(40, 40, BLACK), StrokePixel::paint(90, 90, BLACK)])
        .unwrap();
    let summary = obs.apply_stroke(&[StrokePixel::erase(90, 90)]).unwrap();
    assert_eq!(summary.full_rebuilds, 1);
    assert_eq!(obs.top5_error(), Some(0.0));
    let fresh = Heatmap::build(
        obs.drawing_mask(ColorKey::Ink).unwrap(),
        &mut Workspace::new(100, 100),
    );
    assert_eq!(obs.drawing_heatmap(ColorKey::Ink).unwrap(), &fresh);
}

#[test]
fn stray_ink_raises_error_where_it_lands() {
    let mut obs = Observation::new(reference_with(&[((5, 5), BLACK)]), None, EvaluationConfig::default()).unwrap();
    obs.apply_stroke(&[StrokePixel::paint(5, 5, BLACK), StrokePixel::paint(95, 95, BLACK)])
        .unwrap();
    let grid = obs.error_grid().unwrap();
    assert_eq!(grid.get(0, 0), Some(0.0));
    assert!(grid.get(9, 9).unwrap() > 0.0);
    assert!(obs.top5_error().unwrap() > 0.0);
    assert!(obs.mean_error().unwrap() > 0.0);
}

// --- Config ---

#[test]
fn pixel_counts_cover_evaluated_colors_only() {
    let red_only = EvaluationConfig {
        color_to_evaluate: vec![ColorKey::Rgb(255, 0, 0)],
        ..EvaluationConfig::default()
    };
    let reference = reference_with(&[((10, 10), RED), ((50, 50), BLUE)]);
    let mut obs = Observation::new(reference, Some(0), red_only).unwrap();
    assert_eq!(obs.reference_pixel_count(), 1);

    obs.apply_stroke(&[StrokePixel::paint(10, 10, RED), StrokePixel::paint(60, 60, BLUE)])
        .unwrap();
    assert_eq!(obs.drawing_pixel_count(), 1);
    obs.apply_stroke(&[StrokePixel::paint(10, 10, BLUE)]).unwrap();
    assert_eq!(obs.drawing_pixel_count(), 0);

    obs.finish_observation(Some(500)).unwrap();
    assert_eq!(obs.drawing_speed(), 2.0);

    obs.update_config(two_color_config()).unwrap();
    assert_eq!(obs.reference_pixel_count(), 2);
    assert_eq!(obs.drawing_pixel_count(), 2);
}

#[test]
fn config_update_keeps_retained_layers() {
    let mut obs = Observation::new(reference_with(&[((10, 10), RED), ((20, 20), BLUE)]), None, two_color_config()).unwrap();
    obs.apply_stroke(&[StrokePixel::paint(12, 10, RED)]).unwrap();
    let red_heatmap = obs.drawing_heatmap(ColorKey::Rgb(255, 0, 0)).unwrap().clone();

    let config = EvaluationConfig {
        color_to_evaluate: vec![ColorKey::Rgb(255, 0, 0), ColorKey::Ink],
        ..two_color_config()
    };
    obs.update_config(config).unwrap();
    assert_eq!(obs.colors(), vec![ColorKey::Rgb(255, 0, 0), ColorKey::Ink]);
    assert_eq!(obs.drawing_heatmap(ColorKey::Rgb(255, 0, 0)).unwrap(), &red_heatmap);
    assert!(obs.drawing_heatmap(ColorKey::Rgb(0, 0, 255)).is_none());
    // The new layer sees the existing drawing.
    assert_eq!(obs.drawing_mask(ColorKey::Ink).unwrap().count(), 1);
}

#[test]
fn invalid_config_leaves_state_untouched() {
    let mut obs = Observation::new(reference_with(&[((10, 10), RED)]), None, two_color_config()).unwrap();
    let bad = EvaluationConfig {
        posterization: 0,
        ..two_color_config()
    };
    assert_eq!(obs.update_config(bad).unwrap_err(), EvalError::InvalidPosterization(0));
    assert_eq!(obs.config(), &two_color_config());
    assert_eq!(obs.colors().len(), 2);
}

#[test]
fn posterization_change_rebuilds_every_layer() {
    let mut obs = Observation::new(reference_with(&[((10, 10), RED), ((20, 20), BLUE)]), None, two_color_config()).unwrap();
    assert_eq!(obs.reference_mask(ColorKey::Rgb(255, 0, 0)).unwrap().count(), 1);
    obs.update_config(EvaluationConfig {
        posterization: 1,
        ..two_color_config()
    })
    .unwrap();
    // One bucket: both inks fall into both layers.
    assert_eq!(obs.reference_mask(ColorKey::Rgb(255, 0, 0)).unwrap().count(), 2);
    assert_eq!(obs.reference_mask(ColorKey::Rgb(0, 0, 255)).unwrap().count(), 2);
}

#[test]
fn divisor_change_rescales_statistics() {
    let mut obs = Observation::new(reference_with(&[((10, 10), BLACK)]), None, EvaluationConfig::default()).unwrap();
    obs.apply_stroke(&[StrokePixel::paint(10, 15, BLACK)]).unwrap();
    let before = obs.mean_error().unwrap();
    obs.update_config(EvaluationConfig {
        max_expected_error: Some(50.0),
        ..EvaluationConfig::default()
    })
    .unwrap();
    // Width 100 to 50 doubles every percentage.
    assert!((obs.mean_error().unwrap() - 2.0 * before).abs() < 1e-4);
}

// --- Reset ---

#[test]
fn reset_replaces_everything_atomically() {
    let mut obs = Observation::new(reference_with(&[((10, 10), BLACK)]), Some(5), EvaluationConfig::default()).unwrap();
    obs.apply_stroke(&[StrokePixel::paint(10, 10, BLACK)]).unwrap();

    let bad = EvaluationConfig {
        color_to_evaluate: Vec::new(),
        ..EvaluationConfig::default()
    };
    let new_reference = Canvas::filled(200, 200, WHITE).unwrap();
    assert_eq!(
        obs.reset_observation(new_reference.clone(), Some(99), bad).unwrap_err(),
        EvalError::EmptyColorSet
    );
    assert_eq!(obs.reference().unwrap().width(), 100);
    assert_eq!(obs.start_time(), Some(5));
    assert_eq!(obs.drawing_pixel_count(), 1);

    obs.reset_observation(new_reference, Some(99), EvaluationConfig::default())
        .unwrap();
    assert_eq!(obs.reference().unwrap().dimensions(), (200, 200));
    assert_eq!(obs.drawing().unwrap().dimensions(), (200, 200));
    assert_eq!(obs.drawing_pixel_count(), 0);
    assert_eq!(obs.start_time(), Some(99));
}

#[test]
fn cancelled_reset_keeps_prior_state() {
    let mut obs = Observation::new(reference_with(&[((10, 10), BLACK)]), None, EvaluationConfig::default()).unwrap();
    let token = CancelToken::new();
    let _newer = token.supersede();
    let mut big = Canvas::filled(500, 500, WHITE).unwrap();
    big.set(250, 250, BLACK).unwrap();
    assert_eq!(
        obs.reset_observation_cancellable(big, None, EvaluationConfig::default(), &token)
            .unwrap_err(),
        EvalError::Cancelled
    );
    assert_eq!(obs.reference().unwrap().width(), 100);
}

// --- Reports and snapshots ---

#[test]
fn statistics_only_report_skips_rasters() {
    let mut obs = Observation::new(reference_with(&[((10, 10), BLACK)]), Some(0), EvaluationConfig::default()).unwrap();
    obs.apply_stroke(&[StrokePixel::paint(10, 10, BLACK)]).unwrap();
    obs.finish_observation(Some(2_000)).unwrap();

    let report = obs.evaluate(&EvaluationOptions::default()).unwrap();
    assert!(report.images.is_none());
    assert!(report.heatmaps.is_none());
    assert!(report.error_grid.is_none());
    let stats = report.statistics.as_ref().unwrap();
    assert_eq!(stats.duration_ms, 2_000);
    assert_eq!(stats.reference_pixel_count, 1);
    assert_eq!(stats.drawing_speed, 0.5);
    assert_eq!(
        report.summary().unwrap(),
        "Top 5 error: 0.0%\nMean error: 0.0%\nPixel count: 1"
    );

    let full = obs
        .evaluate(&EvaluationOptions::with_sections(ReportSections::all()))
        .unwrap();
    assert!(full.images.is_some());
    assert_eq!(full.heatmaps.unwrap().len(), 1);
    assert_eq!(full.error_image.unwrap().canvas.dimensions(), (100, 100));
}

#[test]
fn error_image_flags_blocks_over_threshold() {
    let mut obs = Observation::new(reference_with(&[((5, 5), BLACK)]), None, EvaluationConfig::default()).unwrap();
    obs.apply_stroke(&[StrokePixel::paint(5, 5, BLACK), StrokePixel::paint(95, 95, BLACK)])
        .unwrap();
    let options = EvaluationOptions {
        sections: ReportSections::ERROR_IMAGE,
        thresholds: vec![crate::report::ColorThreshold {
            key: ColorKey::Ink,
            max_error: 1.0,
        }],
    };
    let image = obs.evaluate(&options).unwrap().error_image.unwrap();
    assert_eq!(image.flagged.len(), 1);
    assert_eq!((image.flagged[0].gx, image.flagged[0].gy), (9, 9));
    assert_eq!(image.canvas.get(95, 95), Some([255, 0, 0, 255]));
    assert_eq!(image.canvas.get(5, 5), Some([255, 0, 0, 255]));
}

#[test]
fn snapshot_restores_statistics() {
    let mut obs = Observation::new(reference_with(&[((10, 10), RED), ((50, 50), BLUE)]), Some(100), two_color_config()).unwrap();
    obs.apply_stroke(&[StrokePixel::paint(12, 11, RED), StrokePixel::paint(70, 50, BLUE)])
        .unwrap();

    let json = obs.snapshot().unwrap().to_json().unwrap();
    let restored = Observation::from_snapshot(ObservationSnapshot::from_json(&json).unwrap()).unwrap();
    assert_eq!(restored.top5_error(), obs.top5_error());
    assert_eq!(restored.mean_error(), obs.mean_error());
    assert_eq!(restored.error_grid(), obs.error_grid());
    assert_eq!(restored.start_time(), Some(100));
    assert_eq!(restored.snapshot().unwrap(), obs.snapshot().unwrap());
}

#[test]
fn inconsistent_snapshot_is_rejected() {
    let obs = Observation::new(reference_with(&[((10, 10), RED)]), None, two_color_config()).unwrap();
    let mut snapshot = obs.snapshot().unwrap();
    snapshot.layers.pop();
    assert!(matches!(
        Observation::from_snapshot(snapshot),
        Err(EvalError::InvalidSnapshot(_))
    ));
}

fn drawn_snapshot() -> ObservationSnapshot {
    let mut obs = Observation::new(reference_with(&[((10, 10), RED), ((50, 50), BLUE)]), None, two_color_config()).unwrap();
    obs.apply_stroke(&[StrokePixel::paint(12, 11, RED), StrokePixel::paint(70, 50, BLUE)])
        .unwrap();
    obs.snapshot().unwrap()
}

fn assert_rejected(snapshot: ObservationSnapshot) {
    assert!(matches!(
        Observation::from_snapshot(snapshot),
        Err(EvalError::InvalidSnapshot(_))
    ));
}

#[test]
fn snapshot_layers_must_match_the_canvases() {
    let blank = Observation::new(reference_with(&[((10, 10), RED), ((50, 50), BLUE)]), None, two_color_config()).unwrap();
    let mut snapshot = drawn_snapshot();
    snapshot.layers = blank.snapshot().unwrap().layers;
    assert_rejected(snapshot);

    let mut snapshot = drawn_snapshot();
    snapshot.reference.set(90, 90, RED).unwrap();
    assert_rejected(snapshot);
}

#[test]
fn snapshot_heatmaps_must_match_their_masks() {
    let mut snapshot = drawn_snapshot();
    let mut shifted = Mask::empty(100, 100);
    shifted.set(snapshot.drawing.index_of(13, 11), true);
    snapshot.layers[0].drawing_heatmap = Heatmap::build(&shifted, &mut Workspace::new(100, 100));
    assert_rejected(snapshot);

    let mut snapshot = drawn_snapshot();
    let mut value = serde_json::to_value(&snapshot.layers[1].reference_heatmap).unwrap();
    value["distances"][0] = serde_json::json!(1);
    snapshot.layers[1].reference_heatmap = serde_json::from_value(value).unwrap();
    assert_rejected(snapshot);
}

#[test]
fn snapshot_grid_must_match_the_heatmaps() {
    let mut snapshot = drawn_snapshot();
    snapshot.layers[0].error_grid = ErrorGrid::from_cells([[50.0; 10]; 10]);
    assert_rejected(snapshot);

    assert!(Observation::from_snapshot(drawn_snapshot()).is_ok());
}
