use ndarray::Array2;

use crate::basis;
use crate::field::DeformationField;
use crate::grid::Grid;

/// Dirichlet (membrane) smoothness penalty on the deformation,
/// `R = 1/2 * integral |grad u|^2 + |grad v|^2 dx`, decoupled from image
/// content. Assembled by the same cell quadrature as the similarity terms.
pub struct DirichletRegularizer;

impl DirichletRegularizer {
    pub fn evaluate(&self, grid: &Grid, phi: &DeformationField) -> f64 {
        let mut value = 0.0;
        self.visit_cells(grid, phi, |weight, grad_u, grad_v, _, _| {
            value += 0.5
                * weight
                * (grad_u[0] * grad_u[0]
                    + grad_u[1] * grad_u[1]
                    + grad_v[0] * grad_v[0]
                    + grad_v[1] * grad_v[1]);
        });
        value
    }

    pub fn add_gradient(
        &self,
        grid: &Grid,
        phi: &DeformationField,
        lambda: f64,
        grad_x: &mut Array2<f64>,
        grad_y: &mut Array2<f64>,
    ) {
        let inv_hx = 1.0 / grid.hx();
        let inv_hy = 1.0 / grid.hy();
        self.visit_cells(grid, phi, |weight, grad_u, grad_v, nodes, basis_grads| {
            for (i, &(nr, nc)) in nodes.iter().enumerate() {
                let test_grad = [basis_grads[i][0] * inv_hx, basis_grads[i][1] * inv_hy];
                grad_x[[nr, nc]] += lambda
                    * weight
                    * (grad_u[0] * test_grad[0] + grad_u[1] * test_grad[1]);
                grad_y[[nr, nc]] += lambda
                    * weight
                    * (grad_v[0] * test_grad[0] + grad_v[1] * test_grad[1]);
            }
        });
    }

    /// Visit every quadrature point with the deformation's spatial gradient
    /// and the physical test-function gradients at that point.
    fn visit_cells<F>(&self, grid: &Grid, phi: &DeformationField, mut visit: F)
    where
        F: FnMut(
            f64,
            [f64; 2],
            [f64; 2],
            &[(usize, usize); basis::NODES_PER_CELL],
            &[[f64; 2]; basis::NODES_PER_CELL],
        ),
    {
        let (ny, nx) = grid.shape();
        let cell_area = grid.hx() * grid.hy();
        let inv_hx = 1.0 / grid.hx();
        let inv_hy = 1.0 / grid.hy();
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
                    let basis_grads = basis::gradients(qx, qy);
                    let mut grad_u = [0.0; 2];
                    let mut grad_v = [0.0; 2];
                    for (i, &(nr, nc)) in nodes.iter().enumerate() {
                        let gx = basis_grads[i][0] * inv_hx;
                        let gy = basis_grads[i][1] * inv_hy;
                        grad_u[0] += phi.dx[[nr, nc]] * gx;
                        grad_u[1] += phi.dx[[nr, nc]] * gy;
                        grad_v[0] += phi.dy[[nr, nc]] * gx;
                        grad_v[1] += phi.dy[[nr, nc]] * gy;
                    }
                    visit(qw * cell_area, grad_u, grad_v, &nodes, &basis_grads);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::GridHierarchy;

    #[test]
    fn constant_displacement_has_zero_energy() {
        let grid = *GridHierarchy::for_image(17, 17).unwrap().finest();
        let mut phi = DeformationField::identity(&grid);
        phi.dx.fill(0.25);
        phi.dy.fill(-0.1);
        let reg = DirichletRegularizer;
        assert!(reg.evaluate(&grid, &phi).abs() < 1e-14);
    }

    #[test]
    fn linear_displacement_matches_analytic_energy() {
        // u(x, y) = x has |grad u|^2 = 1, so R = 1/2.
        let grid = *GridHierarchy::for_image(17, 17).unwrap().finest();
        let mut phi = DeformationField::identity(&grid);
        for row in 0..17 {
            for col in 0..17 {
                phi.dx[[row, col]] = col as f64 / 16.0;
            }
        }
        let reg = DirichletRegularizer;
        assert!((reg.evaluate(&grid, &phi) - 0.5).abs() < 1e-12);
    }
}
