mod common;

use ndarray::Array2;
use serialign_core::average::{average_forward, average_reverse};
use serialign_core::config::AverageConfig;
use serialign_core::field::DeformationField;
use serialign_core::grid::GridHierarchy;

use common::sinusoid_image;

fn identity_field(n: usize) -> DeformationField {
    let hierarchy = GridHierarchy::for_image(n, n).unwrap();
    DeformationField::identity(hierarchy.finest())
}

#[test]
fn forward_counts_drop_where_samples_leave_the_domain() {
    let n = 9;
    let image = sinusoid_image(n, 0.0, 0.0);
    // Shift sampling positions right by one node: the last column leaves.
    let mut field = identity_field(n);
    field.dx.fill(1.0 / (n - 1) as f64);

    let result = average_forward(&[image], &[field], None).unwrap();
    for row in 0..n {
        assert_eq!(result.num_samples[[row, n - 1]], 0.0);
        assert_eq!(result.num_samples[[row, 0]], 1.0);
    }
}

#[test]
fn forward_weighted_mean_prefers_heavier_frame() {
    let n = 9;
    let bright = Array2::<f32>::from_elem((n, n), 0.8);
    let dark = Array2::<f32>::from_elem((n, n), 0.2);
    let fields = vec![identity_field(n), identity_field(n)];

    let result =
        average_forward(&[bright, dark], &fields, Some(&[3.0, 1.0])).unwrap();
    let v = result.average[[4, 4]];
    assert!((v - 0.65).abs() < 1e-6, "weighted mean {v} should be 0.65");
}

#[test]
fn forward_holes_fall_back_to_last_frame_mean() {
    let n = 9;
    let first = Array2::<f32>::from_elem((n, n), 0.2);
    let last = Array2::<f32>::from_elem((n, n), 0.8);
    // Shift both sampling grids right by one node: the last column of the
    // output gets no in-domain sample from either frame.
    let mut field = identity_field(n);
    field.dx.fill(1.0 / (n - 1) as f64);

    let result = average_forward(&[first, last], &[field.clone(), field], None).unwrap();
    for row in 0..n {
        assert_eq!(result.num_samples[[row, n - 1]], 0.0);
        assert!(
            (result.average[[row, n - 1]] - 0.8).abs() < 1e-6,
            "hole fill {} should be the last frame's mean",
            result.average[[row, n - 1]]
        );
    }
}

#[test]
fn forward_weights_flow_through_the_config() {
    let n = 9;
    let bright = Array2::<f32>::from_elem((n, n), 0.8);
    let dark = Array2::<f32>::from_elem((n, n), 0.2);
    let fields = vec![identity_field(n), identity_field(n)];

    let config: AverageConfig = toml::from_str("frame_weights = [3.0, 1.0]").unwrap();
    config.validate().unwrap();
    let result =
        average_forward(&[bright, dark], &fields, config.frame_weights.as_deref()).unwrap();
    let v = result.average[[4, 4]];
    assert!((v - 0.65).abs() < 1e-6, "weighted mean {v} should be 0.65");
}

#[test]
fn reverse_integer_shift_scatters_to_shifted_nodes() {
    let n = 9;
    let mut image = Array2::<f32>::zeros((n, n));
    image[[4, 2]] = 1.0;
    // Every pixel scatters two nodes to the right.
    let mut field = identity_field(n);
    field.dx.fill(2.0 / (n - 1) as f64);

    let reference = Array2::<f32>::zeros((n, n));
    let config = AverageConfig {
        frame_weights: None,
        weighted: false,
        super_resolution_factor: 1,
    };
    let result = average_reverse(&[image], &[field], &reference, &config).unwrap();

    assert_eq!(result.average[[4, 4]], 1.0);
    // The two leftmost columns got no scatter samples and were seeded.
    assert_eq!(result.num_samples[[4, 0]], 1.0);
    assert_eq!(result.average[[4, 0]], 0.0);
}

#[test]
fn reverse_super_resolution_doubles_the_grid() {
    let n = 9;
    let image = sinusoid_image(n, 0.0, 0.0);
    let field = identity_field(n);
    let reference = image.clone();
    let config = AverageConfig {
        frame_weights: None,
        weighted: true,
        super_resolution_factor: 2,
    };

    let result = average_reverse(&[image.clone()], &[field], &reference, &config).unwrap();
    assert_eq!(result.average.dim(), (2 * n, 2 * n));
    // Even output nodes coincide with source pixels.
    assert!((result.average[[8, 8]] - image[[4, 4]]).abs() < 1e-6);
}

#[test]
fn mismatched_lengths_are_rejected() {
    let n = 9;
    let image = sinusoid_image(n, 0.0, 0.0);
    assert!(average_forward(&[image], &[], None).is_err());
}
