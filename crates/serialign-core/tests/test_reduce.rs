use serialign_core::config::ReduceConfig;
use serialign_core::field::DeformationField;
use serialign_core::grid::GridHierarchy;
use serialign_core::reduce::reduce_deformations;

fn translation_field(n: usize, dx: f64, dy: f64) -> DeformationField {
    let hierarchy = GridHierarchy::for_image(n, n).unwrap();
    let mut field = DeformationField::identity(hierarchy.finest());
    field.dx.fill(dx);
    field.dy.fill(dy);
    field
}

#[test]
fn consistent_pair_is_a_fixed_point() {
    // A constant translation and its exact inverse: every consistency
    // residual vanishes, every data residual vanishes, so the reduction
    // must leave both fields numerically unchanged.
    let forward = translation_field(17, 0.03, -0.01);
    let inverse = translation_field(17, -0.03, 0.01);
    let estimates = vec![forward.clone(), inverse.clone()];
    let chains = vec![(0, 1), (1, 0)];

    let reduced = reduce_deformations(&estimates, &chains, &ReduceConfig::default()).unwrap();

    for (before, after) in estimates.iter().zip(reduced.iter()) {
        for (a, b) in before.dx.iter().zip(after.dx.iter()) {
            assert!((a - b).abs() < 1e-9);
        }
        for (a, b) in before.dy.iter().zip(after.dy.iter()) {
            assert!((a - b).abs() < 1e-9);
        }
    }
}

#[test]
fn inconsistent_pair_moves_toward_consistency() {
    // The inverse is off by a constant error; reduction should shrink the
    // composed residual without drifting far from the measurements.
    let forward = translation_field(17, 0.03, 0.0);
    let inverse = translation_field(17, -0.02, 0.0);
    let estimates = vec![forward, inverse];
    let chains = vec![(0, 1), (1, 0)];

    let residual_norm = |fields: &[DeformationField]| -> f64 {
        let composed = DeformationField::compose(&fields[1], &fields[0]).unwrap();
        composed.norm()
    };

    let before = residual_norm(&estimates);
    let reduced = reduce_deformations(&estimates, &chains, &ReduceConfig::default()).unwrap();
    let after = residual_norm(&reduced);

    assert!(after < before, "residual {after} should shrink below {before}");
    let (dx, _) = reduced[0].mean_translation();
    assert!((dx - 0.03).abs() < 0.01, "data term keeps the estimate close");
}

#[test]
fn invalid_chain_index_is_rejected() {
    let field = translation_field(17, 0.0, 0.0);
    let err = reduce_deformations(&[field], &[(0, 3)], &ReduceConfig::default());
    assert!(err.is_err());
}
