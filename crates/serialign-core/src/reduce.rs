//! Joint reduction of redundant deformation estimates.
//!
//! Several independently estimated deformations for the same frame pair are
//! noisy measurements of one true field. The reduction treats the estimates
//! themselves as unknowns and minimizes an explicit list of objective terms:
//! a data term tethering each field to its measurement, plus pairwise
//! consistency terms penalizing chains that fail to compose to the identity.
//! All terms feed one combined gradient-descent solve, so extending the
//! graph to more estimates is mechanical.
//!
//! Mutually consistent inputs are a fixed point: every term's gradient
//! vanishes and the estimates come back numerically unchanged.

use ndarray::Array2;
use tracing::{debug, warn};

use crate::config::ReduceConfig;
use crate::consts::{LINE_SEARCH_MAX_STEPS, LINE_SEARCH_SHRINK, LINE_SEARCH_SIGMA};
use crate::error::{Result, SerialignError};
use crate::field::DeformationField;

/// One term of the combined objective.
#[derive(Clone, Copy, Debug)]
pub enum ReduceTerm {
    /// `1/2 * weight * ||phi_i - psi_i||^2` against measurement `index`.
    Data { index: usize, weight: f64 },
    /// `1/2 * weight * ||phi_first(x) + phi_second(x + phi_first(x))||^2`:
    /// applying `first` then `second` should be the identity.
    Consistency {
        first: usize,
        second: usize,
        weight: f64,
    },
}

/// Finite-difference Jacobian of a deformation field, sampled bilinearly.
struct FieldJacobian {
    dxx: Array2<f64>,
    dxy: Array2<f64>,
    dyx: Array2<f64>,
    dyy: Array2<f64>,
}

impl FieldJacobian {
    fn of(field: &DeformationField) -> Self {
        let (dxx, dxy) = component_gradient(&field.dx);
        let (dyx, dyy) = component_gradient(&field.dy);
        Self { dxx, dxy, dyx, dyy }
    }

    fn sample(&self, x: f64, y: f64) -> [[f64; 2]; 2] {
        [
            [sample_clamped(&self.dxx, x, y), sample_clamped(&self.dxy, x, y)],
            [sample_clamped(&self.dyx, x, y), sample_clamped(&self.dyy, x, y)],
        ]
    }
}

/// Central-difference gradient `(d/dx, d/dy)` of one displacement component
/// in unit coordinates.
fn component_gradient(data: &Array2<f64>) -> (Array2<f64>, Array2<f64>) {
    let (ny, nx) = data.dim();
    let mut gx = Array2::zeros((ny, nx));
    let mut gy = Array2::zeros((ny, nx));
    for row in 0..ny {
        for col in 0..nx {
            let (c0, c1, span) = one_sided(col, nx);
            gx[[row, col]] = (data[[row, c1]] - data[[row, c0]]) / span * (nx - 1) as f64;
            let (r0, r1, span) = one_sided(row, ny);
            gy[[row, col]] = (data[[r1, col]] - data[[r0, col]]) / span * (ny - 1) as f64;
        }
    }
    (gx, gy)
}

fn one_sided(idx: usize, n: usize) -> (usize, usize, f64) {
    if idx == 0 {
        (0, 1, 1.0)
    } else if idx == n - 1 {
        (n - 2, n - 1, 1.0)
    } else {
        (idx - 1, idx + 1, 2.0)
    }
}

fn sample_clamped(data: &Array2<f64>, x: f64, y: f64) -> f64 {
    let (ny, nx) = data.dim();
    let col_f = (x.clamp(0.0, 1.0)) * (nx - 1) as f64;
    let row_f = (y.clamp(0.0, 1.0)) * (ny - 1) as f64;
    let r0 = (row_f.floor() as usize).min(ny - 2);
    let c0 = (col_f.floor() as usize).min(nx - 2);
    let fr = row_f - r0 as f64;
    let fc = col_f - c0 as f64;
    data[[r0, c0]] * (1.0 - fr) * (1.0 - fc)
        + data[[r0, c0 + 1]] * (1.0 - fr) * fc
        + data[[r0 + 1, c0]] * fr * (1.0 - fc)
        + data[[r0 + 1, c0 + 1]] * fr * fc
}

/// The combined objective over a set of deformation unknowns.
pub struct ReduceProblem<'a> {
    measurements: &'a [DeformationField],
    terms: Vec<ReduceTerm>,
    /// Uniform cell measure making the sums discrete L2 integrals.
    cell: f64,
}

impl<'a> ReduceProblem<'a> {
    pub fn new(measurements: &'a [DeformationField], terms: Vec<ReduceTerm>) -> Result<Self> {
        if measurements.is_empty() {
            return Err(SerialignError::EmptySequence);
        }
        let depth = measurements[0].depth;
        for m in measurements {
            if m.depth != depth {
                return Err(SerialignError::GridDepthMismatch {
                    expected: depth,
                    actual: m.depth,
                });
            }
        }
        let (ny, nx) = measurements[0].shape();
        Ok(Self {
            measurements,
            terms,
            cell: 1.0 / ((nx - 1) as f64 * (ny - 1) as f64),
        })
    }

    pub fn energy(&self, fields: &[DeformationField]) -> f64 {
        let mut total = 0.0;
        for term in &self.terms {
            match *term {
                ReduceTerm::Data { index, weight } => {
                    let phi = &fields[index];
                    let psi = &self.measurements[index];
                    let sum: f64 = phi
                        .dx
                        .iter()
                        .zip(psi.dx.iter())
                        .chain(phi.dy.iter().zip(psi.dy.iter()))
                        .map(|(a, b)| (a - b) * (a - b))
                        .sum();
                    total += 0.5 * weight * self.cell * sum;
                }
                ReduceTerm::Consistency {
                    first,
                    second,
                    weight,
                } => {
                    let mut sum = 0.0;
                    self.visit_residuals(&fields[first], &fields[second], |_, _, rx, ry, _, _| {
                        sum += rx * rx + ry * ry;
                    });
                    total += 0.5 * weight * self.cell * sum;
                }
            }
        }
        total
    }

    pub fn gradient(&self, fields: &[DeformationField]) -> Vec<(Array2<f64>, Array2<f64>)> {
        let shape = fields[0].shape();
        let mut grads: Vec<(Array2<f64>, Array2<f64>)> = fields
            .iter()
            .map(|_| (Array2::zeros(shape), Array2::zeros(shape)))
            .collect();

        for term in &self.terms {
            match *term {
                ReduceTerm::Data { index, weight } => {
                    let phi = &fields[index];
                    let psi = &self.measurements[index];
                    let scale = weight * self.cell;
                    let (gx, gy) = &mut grads[index];
                    gx.zip_mut_with(&(&phi.dx - &psi.dx), |g, d| *g += scale * d);
                    gy.zip_mut_with(&(&phi.dy - &psi.dy), |g, d| *g += scale * d);
                }
                ReduceTerm::Consistency {
                    first,
                    second,
                    weight,
                } => {
                    self.add_consistency_gradient(fields, first, second, weight, &mut grads);
                }
            }
        }
        grads
    }

    /// Visit the residual `r(x) = phi_i(x) + phi_j(x + phi_i(x))` at every
    /// node, passing the warped unit-coordinate position along.
    fn visit_residuals<F: FnMut(usize, usize, f64, f64, f64, f64)>(
        &self,
        phi_i: &DeformationField,
        phi_j: &DeformationField,
        mut visit: F,
    ) {
        let (ny, nx) = phi_i.shape();
        for row in 0..ny {
            for col in 0..nx {
                let px = col as f64 / (nx - 1) as f64 + phi_i.dx[[row, col]];
                let py = row as f64 / (ny - 1) as f64 + phi_i.dy[[row, col]];
                let jx = sample_clamped(&phi_j.dx, px, py);
                let jy = sample_clamped(&phi_j.dy, px, py);
                visit(
                    row,
                    col,
                    phi_i.dx[[row, col]] + jx,
                    phi_i.dy[[row, col]] + jy,
                    px,
                    py,
                );
            }
        }
    }

    fn add_consistency_gradient(
        &self,
        fields: &[DeformationField],
        first: usize,
        second: usize,
        weight: f64,
        grads: &mut [(Array2<f64>, Array2<f64>)],
    ) {
        let phi_i = &fields[first];
        let phi_j = &fields[second];
        let jacobian_j = FieldJacobian::of(phi_j);
        let (ny, nx) = phi_i.shape();
        let scale = weight * self.cell;

        // Collected first: the residual visit borrows the fields while the
        // scatter below writes into the gradient buffers.
        let mut residuals = Vec::with_capacity(nx * ny);
        self.visit_residuals(phi_i, phi_j, |row, col, rx, ry, px, py| {
            residuals.push((row, col, rx, ry, px, py));
        });

        for &(row, col, rx, ry, px, py) in &residuals {
            // d residual / d phi_i(x) = I + J_j(x + phi_i(x)).
            let jac = jacobian_j.sample(px, py);
            let (gi_x, gi_y) = &mut grads[first];
            gi_x[[row, col]] += scale * ((1.0 + jac[0][0]) * rx + jac[1][0] * ry);
            gi_y[[row, col]] += scale * (jac[0][1] * rx + (1.0 + jac[1][1]) * ry);

            // d residual / d phi_j: bilinear scatter at the warped position.
            let col_f = px.clamp(0.0, 1.0) * (nx - 1) as f64;
            let row_f = py.clamp(0.0, 1.0) * (ny - 1) as f64;
            let r0 = (row_f.floor() as usize).min(ny - 2);
            let c0 = (col_f.floor() as usize).min(nx - 2);
            let fr = row_f - r0 as f64;
            let fc = col_f - c0 as f64;
            let weights = [
                (r0, c0, (1.0 - fr) * (1.0 - fc)),
                (r0, c0 + 1, (1.0 - fr) * fc),
                (r0 + 1, c0, fr * (1.0 - fc)),
                (r0 + 1, c0 + 1, fr * fc),
            ];
            let (gj_x, gj_y) = &mut grads[second];
            for (nr, nc, w) in weights {
                gj_x[[nr, nc]] += scale * w * rx;
                gj_y[[nr, nc]] += scale * w * ry;
            }
        }
    }
}

/// Reduce a redundant set of deformation estimates to a jointly consistent
/// one. `chains` lists the (first, second) index pairs expected to compose
/// to the identity (e.g. each forward estimate with its inverse).
///
/// Returns the corrected fields; already-consistent inputs come back
/// unchanged.
pub fn reduce_deformations(
    estimates: &[DeformationField],
    chains: &[(usize, usize)],
    config: &ReduceConfig,
) -> Result<Vec<DeformationField>> {
    let mut terms: Vec<ReduceTerm> = (0..estimates.len())
        .map(|index| ReduceTerm::Data {
            index,
            weight: config.data_weight,
        })
        .collect();
    for &(first, second) in chains {
        if first >= estimates.len() || second >= estimates.len() {
            return Err(SerialignError::Config(format!(
                "consistency chain ({first}, {second}) references a missing estimate"
            )));
        }
        terms.push(ReduceTerm::Consistency {
            first,
            second,
            weight: config.consistency_weight,
        });
    }
    let problem = ReduceProblem::new(estimates, terms)?;

    let mut fields: Vec<DeformationField> = estimates.to_vec();
    let mut energy = problem.energy(&fields);
    let mut grads = problem.gradient(&fields);
    let mut grad_sq = grads_squared_norm(&grads);
    let threshold = config.gradient_tolerance * grad_sq.sqrt();

    let mut iterations = 0;
    while iterations < config.max_iterations && grad_sq.sqrt() > threshold {
        let mut step = 1.0;
        let mut accepted = false;
        for _ in 0..LINE_SEARCH_MAX_STEPS {
            let mut candidate = fields.clone();
            for (field, (gx, gy)) in candidate.iter_mut().zip(grads.iter()) {
                field.dx.scaled_add(-step, gx);
                field.dy.scaled_add(-step, gy);
            }
            let candidate_energy = problem.energy(&candidate);
            if candidate_energy <= energy - LINE_SEARCH_SIGMA * step * grad_sq {
                fields = candidate;
                energy = candidate_energy;
                accepted = true;
                break;
            }
            step *= LINE_SEARCH_SHRINK;
        }
        if !accepted {
            debug!(iterations, "reduce line search failed, keeping best estimate");
            break;
        }
        iterations += 1;
        grads = problem.gradient(&fields);
        grad_sq = grads_squared_norm(&grads);
    }

    if iterations >= config.max_iterations {
        warn!(iterations, "reduce descent hit the iteration cap");
    }
    debug!(iterations, energy, "reduce finished");
    Ok(fields)
}

fn grads_squared_norm(grads: &[(Array2<f64>, Array2<f64>)]) -> f64 {
    grads
        .iter()
        .map(|(gx, gy)| {
            gx.iter().map(|g| g * g).sum::<f64>() + gy.iter().map(|g| g * g).sum::<f64>()
        })
        .sum()
}
