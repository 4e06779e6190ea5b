//! Energy functionals driving the registration: a similarity term between
//! the reference and the deformed template plus a smoothness penalty on the
//! deformation, each with an analytic gradient with respect to the per-node
//! displacement values.
//!
//! Both terms are evaluated by finite-element quadrature over the grid's
//! cells using the basis primitive in [`crate::basis`]. Quadrature points
//! whose deformed position falls outside the template's domain contribute
//! zero to energy and gradient; if no valid sample remains at all the
//! evaluation reports [`SerialignError::EmptyOverlap`] instead of silently
//! dividing by a zero sample count.

mod dirichlet;
mod ncc;
mod ssd;

pub use dirichlet::DirichletRegularizer;
pub use ncc::Ncc;
pub use ssd::Ssd;

use ndarray::Array2;

use crate::basis;
use crate::error::{Result, SerialignError};
use crate::field::DeformationField;
use crate::grid::Grid;

/// Read-only per-level evaluation context: images and precomputed template
/// intensity gradients on the grid of one depth.
pub struct EnergyContext {
    pub grid: Grid,
    pub reference: Array2<f32>,
    pub template: Array2<f32>,
    /// d(template)/dx in unit coordinates, central differences.
    template_grad_x: Array2<f64>,
    /// d(template)/dy in unit coordinates, central differences.
    template_grad_y: Array2<f64>,
}

impl EnergyContext {
    pub fn new(grid: Grid, reference: Array2<f32>, template: Array2<f32>) -> Result<Self> {
        if reference.dim() != grid.shape() || template.dim() != grid.shape() {
            let (ny, nx) = reference.dim();
            return Err(SerialignError::GridSizeMismatch {
                field_h: grid.ny,
                field_w: grid.nx,
                grid_h: ny,
                grid_w: nx,
            });
        }
        let (template_grad_x, template_grad_y) = image_gradient(&template);
        Ok(Self {
            grid,
            reference,
            template,
            template_grad_x,
            template_grad_y,
        })
    }

    /// Template intensity and its unit-coordinate gradient at a fractional
    /// index position, `None` outside the domain.
    pub(crate) fn sample_template(&self, row_f: f64, col_f: f64) -> Option<(f64, f64, f64)> {
        let value = crate::field::sample_image(&self.template, row_f, col_f)? as f64;
        let gx = bilinear(&self.template_grad_x, row_f, col_f);
        let gy = bilinear(&self.template_grad_y, row_f, col_f);
        Some((value, gx, gy))
    }
}

fn bilinear(data: &Array2<f64>, row_f: f64, col_f: f64) -> f64 {
    let (ny, nx) = data.dim();
    let r0 = (row_f.floor() as usize).min(ny - 2);
    let c0 = (col_f.floor() as usize).min(nx - 2);
    let fr = row_f - r0 as f64;
    let fc = col_f - c0 as f64;
    data[[r0, c0]] * (1.0 - fr) * (1.0 - fc)
        + data[[r0, c0 + 1]] * (1.0 - fr) * fc
        + data[[r0 + 1, c0]] * fr * (1.0 - fc)
        + data[[r0 + 1, c0 + 1]] * fr * fc
}

/// Central-difference intensity gradient in unit coordinates,
/// one-sided at the boundary.
fn image_gradient(image: &Array2<f32>) -> (Array2<f64>, Array2<f64>) {
    let (ny, nx) = image.dim();
    let mut gx = Array2::zeros((ny, nx));
    let mut gy = Array2::zeros((ny, nx));
    let scale_x = (nx - 1) as f64;
    let scale_y = (ny - 1) as f64;

    for row in 0..ny {
        for col in 0..nx {
            let (c0, c1, dx) = if col == 0 {
                (0, 1, 1.0)
            } else if col == nx - 1 {
                (nx - 2, nx - 1, 1.0)
            } else {
                (col - 1, col + 1, 2.0)
            };
            gx[[row, col]] = (image[[row, c1]] as f64 - image[[row, c0]] as f64) / dx * scale_x;

            let (r0, r1, dy) = if row == 0 {
                (0, 1, 1.0)
            } else if row == ny - 1 {
                (ny - 2, ny - 1, 1.0)
            } else {
                (row - 1, row + 1, 2.0)
            };
            gy[[row, col]] = (image[[r1, col]] as f64 - image[[r0, col]] as f64) / dy * scale_y;
        }
    }
    (gx, gy)
}

/// One quadrature sample of the deformed configuration inside a cell.
pub(crate) struct QuadSample {
    /// Cell node indices, same order as the basis corner order.
    pub nodes: [(usize, usize); basis::NODES_PER_CELL],
    pub basis_values: [f64; basis::NODES_PER_CELL],
    /// Quadrature weight times cell area.
    pub weight: f64,
    /// Reference intensity at the (undeformed) quadrature point.
    pub reference: f64,
    /// Deformed template sample, `None` when out of domain.
    pub warped: Option<(f64, f64, f64)>,
}

/// Visit every quadrature point of every cell, handing the visitor the
/// sample geometry shared by all similarity measures.
pub(crate) fn for_each_quad_sample<F: FnMut(QuadSample)>(
    ctx: &EnergyContext,
    phi: &DeformationField,
    mut visit: F,
) {
    let (ny, nx) = ctx.grid.shape();
    let cell_area = ctx.grid.hx() * ctx.grid.hy();
    let quad = basis::quadrature();

    for row in 0..ny - 1 {
        for col in 0..nx - 1 {
            let nodes = [
                (row, col),
                (row, col + 1),
                (row + 1, col),
                (row + 1, col + 1),
            ];
            for &(qx, qy, qw) in &quad {
                let basis_values = basis::values(qx, qy);

                let mut u = 0.0;
                let mut v = 0.0;
                let mut r = 0.0;
                for (i, &(nr, nc)) in nodes.iter().enumerate() {
                    u += phi.dx[[nr, nc]] * basis_values[i];
                    v += phi.dy[[nr, nc]] * basis_values[i];
                    r += ctx.reference[[nr, nc]] as f64 * basis_values[i];
                }

                // Deformed position in fractional index coordinates.
                let col_f = col as f64 + qx + u * (nx - 1) as f64;
                let row_f = row as f64 + qy + v * (ny - 1) as f64;
                let warped = ctx.sample_template(row_f, col_f);

                visit(QuadSample {
                    nodes,
                    basis_values,
                    weight: qw * cell_area,
                    reference: r,
                    warped,
                });
            }
        }
    }
}

/// Similarity between the reference and the deformed template.
///
/// Concrete measures are selected once at configuration time and used
/// through this interface; the contract is evaluate + gradient, nothing is
/// cached between calls.
pub trait SimilarityMeasure: Send + Sync {
    fn name(&self) -> &'static str;

    /// Energy value and the number of in-domain quadrature samples.
    fn evaluate(&self, ctx: &EnergyContext, phi: &DeformationField) -> Result<SimilarityValue>;

    /// Accumulate the gradient with respect to the per-node displacements
    /// into `grad_x` / `grad_y` (deformation-field shaped).
    fn add_gradient(
        &self,
        ctx: &EnergyContext,
        phi: &DeformationField,
        grad_x: &mut Array2<f64>,
        grad_y: &mut Array2<f64>,
    ) -> Result<()>;
}

#[derive(Clone, Copy, Debug)]
pub struct SimilarityValue {
    pub value: f64,
    pub valid_samples: usize,
}

/// Energy value for one (reference, template, deformation) triple.
/// Valid only for the triple that produced it; never cached across steps.
#[derive(Clone, Copy, Debug)]
pub struct EnergyRecord {
    pub value: f64,
    pub similarity: f64,
    pub regularization: f64,
    pub valid_samples: usize,
}

/// Total energy: similarity + lambda * regularization.
pub struct RegistrationEnergy<'a> {
    pub ctx: &'a EnergyContext,
    pub measure: &'a dyn SimilarityMeasure,
    pub regularizer: DirichletRegularizer,
    pub lambda: f64,
}

impl<'a> RegistrationEnergy<'a> {
    pub fn new(ctx: &'a EnergyContext, measure: &'a dyn SimilarityMeasure, lambda: f64) -> Self {
        Self {
            ctx,
            measure,
            regularizer: DirichletRegularizer,
            lambda,
        }
    }

    pub fn evaluate(&self, phi: &DeformationField) -> Result<EnergyRecord> {
        let similarity = self.measure.evaluate(self.ctx, phi)?;
        let regularization = self.regularizer.evaluate(&self.ctx.grid, phi);
        Ok(EnergyRecord {
            value: similarity.value + self.lambda * regularization,
            similarity: similarity.value,
            regularization,
            valid_samples: similarity.valid_samples,
        })
    }

    pub fn gradient(&self, phi: &DeformationField) -> Result<(Array2<f64>, Array2<f64>)> {
        let mut grad_x = Array2::zeros(phi.shape());
        let mut grad_y = Array2::zeros(phi.shape());
        self.measure
            .add_gradient(self.ctx, phi, &mut grad_x, &mut grad_y)?;
        if self.lambda != 0.0 {
            self.regularizer
                .add_gradient(&self.ctx.grid, phi, self.lambda, &mut grad_x, &mut grad_y);
        }
        Ok((grad_x, grad_y))
    }
}
