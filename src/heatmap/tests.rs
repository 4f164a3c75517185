// src/heatmap/tests.rs

use super::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use test_log::test;

fn mask_with(width: usize, height: usize, cells: &[(usize, usize)]) -> Mask {
    let mut mask = Mask::empty(width, height);
    for &(x, y) in cells {
        mask.set(x * height + y, true);
    }
    mask
}

/// Chebyshev distance to the nearest seed, computed directly.
fn brute_force(mask: &Mask) -> Vec<u16> {
    let (width, height) = (mask.width(), mask.height());
    let seeds: Vec<(usize, usize)> = mask.seeds().map(|i| (i / height, i % height)).collect();
    let mut out = vec![UNREACHABLE; width * height];
    for x in 0..width {
        for y in 0..height {
            if let Some(d) = seeds
                .iter()
                .map(|&(sx, sy)| sx.abs_diff(x).max(sy.abs_diff(y)))
                .min()
            {
                out[x * height + y] = d as u16;
            }
        }
    }
    out
}

fn random_mask(rng: &mut StdRng, width: usize, height: usize, density: f64) -> Mask {
    let mut mask = Mask::empty(width, height);
    for index in 0..width * height {
        if rng.random_bool(density) {
            mask.set(index, true);
        }
    }
    mask
}

#[test]
fn single_seed_gives_chebyshev_distances() {
    let mask = mask_with(10, 10, &[(5, 5)]);
    let mut ws = Workspace::new(10, 10);
    let heatmap = Heatmap::build(&mask, &mut ws);
    assert_eq!(heatmap.get(5, 5), Some(0));
    assert_eq!(heatmap.get(4, 4), Some(1));
    assert_eq!(heatmap.get(3, 5), Some(2));
    assert_eq!(heatmap.get(3, 3), Some(2));
    assert_eq!(heatmap.get(0, 0), Some(5));
    assert_eq!(heatmap.get(9, 0), Some(5));
    assert_eq!(heatmap.get(10, 0), None);
}

#[test]
fn empty_mask_is_capped_everywhere() {
    let mask = Mask::empty(20, 10);
    let mut ws = Workspace::new(20, 10);
    let heatmap = Heatmap::build(&mask, &mut ws);
    assert!(heatmap.is_fully_unreachable());
    assert_eq!(heatmap.len(), 200);
}

#[test]
fn full_build_matches_brute_force_and_is_one_lipschitz() {
    let mut rng = StdRng::seed_from_u64(7);
    for _ in 0..10 {
        let mask = random_mask(&mut rng, 30, 20, 0.01);
        let mut ws = Workspace::new(30, 20);
        let heatmap = Heatmap::build(&mask, &mut ws);
        assert_eq!(heatmap.distances(), brute_force(&mask).as_slice());

        if mask.is_empty() {
            continue;
        }
        for index in 0..heatmap.len() {
            for neighbor in neighbors(index, 30, 20) {
                assert!(heatmap.distance(index).abs_diff(heatmap.distance(neighbor)) <= 1);
            }
        }
    }
}

#[test]
fn incremental_adds_match_full_rebuild() {
    let mut rng = StdRng::seed_from_u64(11);
    let (width, height) = (40, 30);
    let mut mask = Mask::empty(width, height);
    let mut ws = Workspace::new(width, height);
    let mut heatmap = Heatmap::build(&mask, &mut ws);

    for _ in 0..25 {
        let seeds: Vec<usize> = (0..rng.random_range(1..6))
            .map(|_| rng.random_range(0..width * height))
            .filter(|&i| mask.set(i, true))
            .collect();
        heatmap.add_seeds(&seeds, &mut ws);
        assert_eq!(heatmap, Heatmap::build(&mask, &mut Workspace::new(width, height)));
    }
}

#[test]
fn adds_log_previous_distances() {
    let mut mask = mask_with(10, 10, &[(0, 0)]);
    let mut ws = Workspace::new(10, 10);
    let mut heatmap = Heatmap::build(&mask, &mut ws);
    let before = heatmap.clone();

    mask.set(9 * 10 + 9, true);
    heatmap.add_seeds(&[99], &mut ws);
    assert!(!ws.changes().is_empty());
    for &(cell, previous) in ws.changes() {
        assert_eq!(previous, before.distance(cell as usize));
        assert!(heatmap.distance(cell as usize) < previous);
    }
    // Cells nearer to the old seed never move.
    assert!(ws.changes().iter().all(|&(cell, _)| cell != 11));
    ws.clear_changes();
    assert!(ws.changes().is_empty());
}

#[test]
fn regional_removal_matches_full_rebuild() {
    let mut rng = StdRng::seed_from_u64(23);
    let (width, height) = (40, 40);
    let mut mask = random_mask(&mut rng, width, height, 0.03);
    let mut ws = Workspace::new(width, height);
    let mut heatmap = Heatmap::build(&mask, &mut ws);

    for _ in 0..20 {
        let seeds: Vec<usize> = mask.seeds().collect();
        if seeds.is_empty() {
            break;
        }
        let removed: Vec<usize> = (0..rng.random_range(1..4))
            .map(|_| seeds[rng.random_range(0..seeds.len())])
            .filter(|&i| mask.set(i, false))
            .collect();
        let outcome = heatmap.remove_seeds(&removed, &mask, &mut ws, width * height);
        assert!(matches!(outcome, RemovalOutcome::Regional { .. }));
        assert_eq!(heatmap.distances(), brute_force(&mask).as_slice());
        ws.clear_changes();
    }
}

#[test]
fn removal_logs_region_cells() {
    let mut mask = mask_with(10, 10, &[(0, 0), (9, 9)]);
    let mut ws = Workspace::new(10, 10);
    let mut heatmap = Heatmap::build(&mask, &mut ws);
    let before = heatmap.clone();

    mask.set(0, false);
    let outcome = heatmap.remove_seeds(&[0], &mask, &mut ws, 100);
    let RemovalOutcome::Regional { cells } = outcome else {
        panic!("expected a regional rebuild, got {outcome:?}");
    };
    assert!(cells > 1);
    assert_eq!(ws.changes().len(), cells);
    for &(cell, previous) in ws.changes() {
        assert_eq!(previous, before.distance(cell as usize));
    }
    assert_eq!(heatmap.get(0, 0), Some(9));
}

#[test]
fn removing_the_last_seed_caps_the_map() {
    let mut mask = mask_with(10, 10, &[(4, 4)]);
    let mut ws = Workspace::new(10, 10);
    let mut heatmap = Heatmap::build(&mask, &mut ws);
    mask.set(44, false);
    assert_eq!(
        heatmap.remove_seeds(&[44], &mask, &mut ws, 100),
        RemovalOutcome::Regional { cells: 100 }
    );
    assert!(heatmap.is_fully_unreachable());
}

#[test]
fn oversized_region_falls_back_to_full_rebuild() {
    let mut mask = mask_with(20, 20, &[(0, 0), (19, 19)]);
    let mut ws = Workspace::new(20, 20);
    let mut heatmap = Heatmap::build(&mask, &mut ws);
    mask.set(0, false);
    let outcome = heatmap.remove_seeds(&[0], &mask, &mut ws, 10);
    assert_eq!(outcome, RemovalOutcome::FullRebuild);
    assert!(ws.changes().is_empty());
    assert_eq!(heatmap.distances(), brute_force(&mask).as_slice());

    // The workspace is clean for the next update.
    mask.set(5 * 20 + 5, true);
    heatmap.add_seeds(&[105], &mut ws);
    assert_eq!(heatmap.distances(), brute_force(&mask).as_slice());
}

#[test]
fn removing_non_seeds_is_a_noop() {
    let mask = mask_with(10, 10, &[(3, 3)]);
    let mut ws = Workspace::new(10, 10);
    let mut heatmap = Heatmap::build(&mask, &mut ws);
    assert_eq!(
        heatmap.remove_seeds(&[0, 1, 2], &mask, &mut ws, 100),
        RemovalOutcome::Unchanged
    );
}

#[test]
fn cancelled_build_returns_error() {
    let mask = mask_with(100, 100, &[(50, 50)]);
    let mut ws = Workspace::new(100, 100);
    let token = CancelToken::new();
    let _newer = token.supersede();
    assert_eq!(
        Heatmap::build_cancellable(&mask, &mut ws, &token).unwrap_err(),
        EvalError::Cancelled
    );

    let live = CancelToken::new();
    let heatmap = Heatmap::build_cancellable(&mask, &mut ws, &live).unwrap();
    assert_eq!(heatmap.get(0, 0), Some(50));
}

#[test]
fn verify_accepts_built_maps_and_rejects_edits() {
    let mut rng = StdRng::seed_from_u64(31);
    let mut mask = random_mask(&mut rng, 30, 30, 0.02);
    mask.set(15 * 30 + 15, true);
    let mut ws = Workspace::new(30, 30);
    let heatmap = Heatmap::build(&mask, &mut ws);
    assert_eq!(heatmap.verify(&mask), Ok(()));
    assert_eq!(Heatmap::unreachable(30, 30).verify(&Mask::empty(30, 30)), Ok(()));

    let mut edited = heatmap.clone();
    let far = (0..edited.len()).find(|&i| edited.distance(i) > 1).unwrap();
    edited.distances[far] -= 1;
    assert!(edited.verify(&mask).is_err());

    let mut other = mask.clone();
    let seed = mask.seeds().next().unwrap();
    other.set(seed, false);
    assert!(heatmap.verify(&other).is_err());
}
