//! Bilinear finite-element basis and quadrature on the reference cell.
//!
//! Fixed evaluation primitive consumed by the energy functionals: given a
//! point on the reference cell [0,1]^2, return the four nodal basis values
//! and their reference-domain gradients. Callers scale gradients by the
//! inverse grid spacing to move to physical coordinates.

/// Corner order on the reference cell: (0,0), (1,0), (0,1), (1,1) in local
/// (x, y). Matches the (row, col) node layout `(r, c), (r, c+1), (r+1, c),
/// (r+1, c+1)` of a cell with lower-left node at (r, c).
pub const NODES_PER_CELL: usize = 4;

/// Basis function values at local coordinates.
pub fn values(x: f64, y: f64) -> [f64; NODES_PER_CELL] {
    [
        (1.0 - x) * (1.0 - y),
        x * (1.0 - y),
        (1.0 - x) * y,
        x * y,
    ]
}

/// Basis function gradients `[d/dx, d/dy]` at local coordinates,
/// reference domain.
pub fn gradients(x: f64, y: f64) -> [[f64; 2]; NODES_PER_CELL] {
    [
        [-(1.0 - y), -(1.0 - x)],
        [1.0 - y, -x],
        [-y, 1.0 - x],
        [y, x],
    ]
}

/// 2x2 tensor Gauss quadrature on [0,1]^2: exact for the bilinear products
/// the energies integrate. `(x, y, weight)` triples.
pub fn quadrature() -> [(f64, f64, f64); 4] {
    const G0: f64 = 0.211_324_865_405_187_1; // (3 - sqrt(3)) / 6
    const G1: f64 = 1.0 - G0;
    const W: f64 = 0.25;
    [(G0, G0, W), (G1, G0, W), (G0, G1, W), (G1, G1, W)]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partition_of_unity() {
        for &(x, y, _) in &quadrature() {
            let sum: f64 = values(x, y).iter().sum();
            assert!((sum - 1.0).abs() < 1e-14);
            let grad_sum: [f64; 2] = gradients(x, y)
                .iter()
                .fold([0.0, 0.0], |acc, g| [acc[0] + g[0], acc[1] + g[1]]);
            assert!(grad_sum[0].abs() < 1e-14 && grad_sum[1].abs() < 1e-14);
        }
    }

    #[test]
    fn quadrature_integrates_bilinear_exactly() {
        // Integral of x*y over the unit cell is 1/4.
        let integral: f64 = quadrature().iter().map(|&(x, y, w)| w * x * y).sum();
        assert!((integral - 0.25).abs() < 1e-14);
    }
}
