mod common;

use ndarray::Array2;
use serialign_core::average::{average_forward, identity_deformations};
use serialign_core::config::{ChainStrategy, RegistrationConfig, SeriesConfig, Similarity};
use serialign_core::series::{load_series_deformations, SeriesMatcher};

use common::sinusoid_image;

fn drifting_series(n: usize, count: usize, step: f64) -> (Array2<f32>, Vec<Array2<f32>>) {
    let reference = sinusoid_image(n, 0.0, 0.0);
    let frames = (1..=count)
        .map(|i| sinusoid_image(n, i as f64 * step, 0.0))
        .collect();
    (reference, frames)
}

fn test_config() -> SeriesConfig {
    SeriesConfig {
        registration: RegistrationConfig {
            similarity: Similarity::Ssd,
            lambda: 0.01,
            start_level: 1,
            ..Default::default()
        },
        chain: ChainStrategy::ChainedRefined,
        ..Default::default()
    }
}

#[test]
fn chained_series_tracks_accumulating_drift() {
    let step = 0.02;
    let (reference, frames) = drifting_series(33, 3, step);
    let config = test_config();

    let matcher = SeriesMatcher::new(&reference, &config).unwrap();
    let result = matcher.run(&frames).unwrap();

    assert_eq!(result.deformations.len(), 3);
    assert_eq!(result.reports.len(), 3);
    assert!(result.inverses.is_none());

    // Drift accumulates frame to frame, so the recovered compensation grows.
    let magnitudes: Vec<f64> = result
        .deformations
        .iter()
        .map(|d| {
            let (dx, _) = d.mean_translation();
            -dx
        })
        .collect();
    for (i, &m) in magnitudes.iter().enumerate() {
        let expected = (i + 1) as f64 * step;
        assert!(
            (m - expected).abs() < 0.6 * expected,
            "frame {i}: compensation {m} should approach {expected}"
        );
    }
    assert!(magnitudes[2] > magnitudes[0]);
}

#[test]
fn checkpoint_files_round_trip() {
    let (reference, frames) = drifting_series(33, 2, 0.02);
    let config = test_config();
    let dir = tempfile::tempdir().unwrap();

    let matcher = SeriesMatcher::new(&reference, &config)
        .unwrap()
        .with_save_dir(dir.path());
    let result = matcher.run(&frames).unwrap();

    let norms = std::fs::read_to_string(dir.path().join("defnorms.txt")).unwrap();
    let energies = std::fs::read_to_string(dir.path().join("energies.txt")).unwrap();
    assert_eq!(norms.lines().count(), 2);
    assert_eq!(energies.lines().count(), 2);

    let reloaded = load_series_deformations(dir.path(), 2, false).unwrap();
    for (saved, loaded) in result.deformations.iter().zip(reloaded.iter()) {
        assert_eq!(saved.depth, loaded.depth);
        assert_eq!(saved.dx, loaded.dx);
        assert_eq!(saved.dy, loaded.dy);
    }
}

#[test]
fn inverses_undo_the_forward_estimate() {
    let (reference, frames) = drifting_series(33, 2, 0.02);
    let mut config = test_config();
    config.compute_inverse = true;

    let matcher = SeriesMatcher::new(&reference, &config).unwrap();
    let result = matcher.run(&frames).unwrap();
    let inverses = result.inverses.expect("requested inverses");
    assert_eq!(inverses.len(), 2);

    for (phi, psi) in result.deformations.iter().zip(inverses.iter()) {
        let (fx, _) = phi.mean_translation();
        let (ix, _) = psi.mean_translation();
        // Opposite displacement directions, comparable magnitude.
        assert!(fx * ix <= 0.0, "forward {fx} and inverse {ix} should oppose");
        assert!((fx + ix).abs() < 0.02);
    }
}

#[test]
fn registered_average_beats_unregistered_average() {
    let (reference, frames) = drifting_series(33, 3, 0.02);
    let config = test_config();

    let matcher = SeriesMatcher::new(&reference, &config).unwrap();
    let result = matcher.run(&frames).unwrap();
    let fused = average_forward(&frames, &result.deformations, None).unwrap();

    let identity = identity_deformations(matcher.hierarchy().finest(), frames.len());
    let unregistered = average_forward(&frames, &identity, None).unwrap();

    let rmse = |image: &Array2<f32>| -> f64 {
        let mut acc = 0.0f64;
        let mut count = 0usize;
        for (a, b) in image.iter().zip(reference.iter()) {
            acc += ((a - b) as f64).powi(2);
            count += 1;
        }
        (acc / count as f64).sqrt()
    };

    assert!(
        rmse(&fused.average) < rmse(&unregistered.average),
        "registration should sharpen the composite"
    );
    assert_eq!(fused.average.dim(), reference.dim());
}
