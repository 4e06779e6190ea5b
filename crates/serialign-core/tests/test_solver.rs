mod common;

use approx::assert_relative_eq;
use serialign_core::config::{AltCriterion, RegistrationConfig, Similarity};
use serialign_core::energy::{EnergyContext, Ncc, RegistrationEnergy};
use serialign_core::field::DeformationField;
use serialign_core::grid::GridHierarchy;
use serialign_core::solver::MultilevelSolver;

use common::sinusoid_image;

#[test]
fn identical_images_stay_at_identity() {
    let image = sinusoid_image(33, 0.0, 0.0);
    let hierarchy = GridHierarchy::for_image(33, 33).unwrap();
    let config = RegistrationConfig {
        similarity: Similarity::Ssd,
        lambda: 0.05,
        ..Default::default()
    };

    let solver = MultilevelSolver::new(&hierarchy, &image, &image, &config).unwrap();
    let report = solver.solve(None).unwrap();

    assert!(report.energy < 1e-8, "energy {} should vanish", report.energy);
    assert!(
        report.deformation.norm() < 1e-4,
        "norm {} should stay near zero",
        report.deformation.norm()
    );
}

#[test]
fn small_translation_is_recovered() {
    // template(x) = f(x + t), so the compensating displacement is -t.
    let t = 0.06;
    let reference = sinusoid_image(33, 0.0, 0.0);
    let template = sinusoid_image(33, t, 0.0);
    let hierarchy = GridHierarchy::for_image(33, 33).unwrap();
    let config = RegistrationConfig {
        similarity: Similarity::Ssd,
        lambda: 0.01,
        start_level: 1,
        ..Default::default()
    };

    let solver = MultilevelSolver::new(&hierarchy, &reference, &template, &config).unwrap();

    let identity = DeformationField::identity(hierarchy.finest());
    let ctx = EnergyContext::new(*hierarchy.finest(), reference.clone(), template.clone()).unwrap();
    let measure = serialign_core::energy::Ssd;
    let unregistered = RegistrationEnergy::new(&ctx, &measure, config.lambda)
        .evaluate(&identity)
        .unwrap()
        .value;

    let report = solver.solve(None).unwrap();
    let (mean_dx, mean_dy) = report.deformation.mean_translation();

    assert!(
        report.energy < 0.5 * unregistered,
        "energy {} should beat unregistered {}",
        report.energy,
        unregistered
    );
    assert!(
        (mean_dx + t).abs() < 0.5 * t,
        "mean dx {} should approach {}",
        mean_dx,
        -t
    );
    assert!(mean_dy.abs() < 0.02, "mean dy {} should stay small", mean_dy);
}

#[test]
fn ncc_descent_recovers_translation() {
    // Same setup as the ssd case, driven through the default similarity.
    let t = 0.06;
    let reference = sinusoid_image(33, 0.0, 0.0);
    let template = sinusoid_image(33, t, 0.0);
    let hierarchy = GridHierarchy::for_image(33, 33).unwrap();
    let config = RegistrationConfig {
        similarity: Similarity::Ncc,
        lambda: 0.01,
        start_level: 1,
        ..Default::default()
    };

    let solver = MultilevelSolver::new(&hierarchy, &reference, &template, &config).unwrap();
    let report = solver.solve(None).unwrap();
    let (mean_dx, mean_dy) = report.deformation.mean_translation();

    // Perfect correlation would drive the energy 1 - ncc to zero.
    assert!(report.energy < 0.1, "energy {} should be near zero", report.energy);
    assert!(
        (mean_dx + t).abs() < 0.5 * t,
        "mean dx {} should approach {}",
        mean_dx,
        -t
    );
    assert!(mean_dy.abs() < 0.02, "mean dy {} should stay small", mean_dy);
}

#[test]
fn alternate_start_level_returns_a_result() {
    let reference = sinusoid_image(33, 0.0, 0.0);
    let template = sinusoid_image(33, 0.03, 0.02);
    let hierarchy = GridHierarchy::for_image(33, 33).unwrap();
    let config = RegistrationConfig {
        start_level: 1,
        alt_start_level: Some(3),
        alt_criterion: AltCriterion::Energy,
        ..Default::default()
    };

    let solver = MultilevelSolver::new(&hierarchy, &reference, &template, &config).unwrap();
    let report = solver.solve(None).unwrap();
    assert!(report.energy.is_finite());
    assert_eq!(report.deformation.depth, hierarchy.max_depth());
}

#[test]
fn ncc_is_invariant_under_intensity_rescale() {
    let reference = sinusoid_image(17, 0.0, 0.0);
    let template = sinusoid_image(17, 0.02, 0.01);
    let rescaled = template.mapv(|v| 0.5 * v + 0.2);

    let hierarchy = GridHierarchy::for_image(17, 17).unwrap();
    let grid = *hierarchy.finest();
    let phi = DeformationField::identity(&grid);
    let measure = Ncc;

    let ctx_a = EnergyContext::new(grid, reference.clone(), template).unwrap();
    let ctx_b = EnergyContext::new(grid, reference, rescaled).unwrap();
    let value_a = RegistrationEnergy::new(&ctx_a, &measure, 0.0)
        .evaluate(&phi)
        .unwrap()
        .value;
    let value_b = RegistrationEnergy::new(&ctx_b, &measure, 0.0)
        .evaluate(&phi)
        .unwrap()
        .value;

    assert_relative_eq!(value_a, value_b, epsilon = 1e-6);
}
