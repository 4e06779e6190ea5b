/// Sentinel for an image sample whose deformed position left the domain.
/// Excluded from energies and averaging, never extrapolated.
pub const OUT_OF_DOMAIN: f32 = f32::INFINITY;

/// Minimum pixel count (h*w) to use row-level Rayon parallelism.
pub const PARALLEL_PIXEL_THRESHOLD: usize = 65_536;

/// Iteration cap for the deformation-inverse fixed-point iteration.
pub const INVERSE_MAX_ITERATIONS: usize = 30;

/// Convergence tolerance (mean squared node update, unit coordinates)
/// for the deformation-inverse fixed-point iteration.
pub const INVERSE_TOLERANCE: f64 = 1e-12;

/// Default iteration cap for the per-depth descent loop.
pub const DEFAULT_MAX_ITERATIONS: usize = 200;

/// Default gradient-norm reduction factor that stops the per-depth descent.
pub const DEFAULT_GRADIENT_TOLERANCE: f64 = 1e-6;

/// Initial step length for the Armijo backtracking line search.
pub const LINE_SEARCH_INITIAL_STEP: f64 = 1.0;

/// Step shrink factor for the Armijo backtracking line search.
pub const LINE_SEARCH_SHRINK: f64 = 0.5;

/// Sufficient-decrease constant for the Armijo condition.
pub const LINE_SEARCH_SIGMA: f64 = 1e-4;

/// Maximum backtracking steps before the line search gives up.
pub const LINE_SEARCH_MAX_STEPS: usize = 40;

/// Default tether weight for the reduce-deformations data terms.
pub const DEFAULT_REDUCE_DATA_WEIGHT: f64 = 1.0;

/// Default weight for the reduce-deformations pairwise consistency terms.
pub const DEFAULT_REDUCE_CONSISTENCY_WEIGHT: f64 = 1.0;

/// Iteration cap for the combined reduce-deformations descent.
pub const REDUCE_MAX_ITERATIONS: usize = 1000;

/// Gradient tolerance for the combined reduce-deformations descent.
pub const REDUCE_GRADIENT_TOLERANCE: f64 = 5e-7;

/// Small epsilon guarding divisions in the NCC statistics.
pub const EPSILON: f64 = 1e-12;
