//! Dense deformation fields and their algebra.
//!
//! A [`DeformationField`] stores one displacement component per spatial axis
//! over the nodes of a grid at a specific depth, in unit coordinates. Applying
//! it means adding the displacement to the identity map. All binary
//! operations require both operands to live on grids of equal depth;
//! composing across depths is a caller error and fails loudly.

use ndarray::Array2;
use tracing::{debug, warn};

use crate::consts::{INVERSE_MAX_ITERATIONS, INVERSE_TOLERANCE, OUT_OF_DOMAIN};
use crate::error::{Result, SerialignError};
use crate::grid::{self, Grid};

/// Bilinear sample of a node field at fractional index (row_f, col_f).
/// The caller guarantees the position is inside the index range.
fn bilinear_f64(data: &Array2<f64>, row_f: f64, col_f: f64) -> f64 {
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

/// Bilinear sample of an image at fractional index, `None` outside.
pub fn sample_image(image: &Array2<f32>, row_f: f64, col_f: f64) -> Option<f32> {
    let (ny, nx) = image.dim();
    if row_f < 0.0 || col_f < 0.0 || row_f > (ny - 1) as f64 || col_f > (nx - 1) as f64 {
        return None;
    }
    let r0 = (row_f.floor() as usize).min(ny - 2);
    let c0 = (col_f.floor() as usize).min(nx - 2);
    let fr = (row_f - r0 as f64) as f32;
    let fc = (col_f - c0 as f64) as f32;

    Some(
        image[[r0, c0]] * (1.0 - fr) * (1.0 - fc)
            + image[[r0, c0 + 1]] * (1.0 - fr) * fc
            + image[[r0 + 1, c0]] * fr * (1.0 - fc)
            + image[[r0 + 1, c0 + 1]] * fr * fc,
    )
}

/// Displacement added to the identity map, one component per axis.
#[derive(Clone, Debug)]
pub struct DeformationField {
    /// Displacement along x, unit coordinates.
    pub dx: Array2<f64>,
    /// Displacement along y, unit coordinates.
    pub dy: Array2<f64>,
    pub depth: usize,
}

impl DeformationField {
    /// The identity map: zero displacement everywhere.
    pub fn identity(grid: &Grid) -> Self {
        Self {
            dx: Array2::zeros(grid.shape()),
            dy: Array2::zeros(grid.shape()),
            depth: grid.depth,
        }
    }

    pub fn shape(&self) -> (usize, usize) {
        self.dx.dim()
    }

    fn ensure_same_depth(&self, other: &Self) -> Result<()> {
        if self.depth != other.depth {
            return Err(SerialignError::GridDepthMismatch {
                expected: self.depth,
                actual: other.depth,
            });
        }
        Ok(())
    }

    /// Evaluate the displacement at unit coordinates, `None` outside [0,1]^2.
    pub fn sample(&self, x: f64, y: f64) -> Option<(f64, f64)> {
        if !(0.0..=1.0).contains(&x) || !(0.0..=1.0).contains(&y) {
            return None;
        }
        let (ny, nx) = self.shape();
        let row_f = y * (ny - 1) as f64;
        let col_f = x * (nx - 1) as f64;
        Some((
            bilinear_f64(&self.dx, row_f, col_f),
            bilinear_f64(&self.dy, row_f, col_f),
        ))
    }

    /// Displacement at unit coordinates with the position clamped into the
    /// domain first. Used where a holed field would poison the consumer.
    fn sample_clamped(&self, x: f64, y: f64) -> (f64, f64) {
        self.sample(x.clamp(0.0, 1.0), y.clamp(0.0, 1.0))
            .expect("clamped position is inside the domain")
    }

    /// Composition "apply `inner`, then `outer`":
    /// `result(x) = inner(x) + outer(x + inner(x))`.
    ///
    /// Not commutative. Warped positions that leave the domain sample `outer`
    /// with clamp-to-edge; the clamp count is reported at debug level.
    pub fn compose(outer: &Self, inner: &Self) -> Result<Self> {
        outer.ensure_same_depth(inner)?;
        let (ny, nx) = inner.shape();
        let mut result = inner.clone();
        let mut clamped = 0usize;

        for row in 0..ny {
            for col in 0..nx {
                let x = col as f64 / (nx - 1) as f64 + inner.dx[[row, col]];
                let y = row as f64 / (ny - 1) as f64 + inner.dy[[row, col]];
                if !(0.0..=1.0).contains(&x) || !(0.0..=1.0).contains(&y) {
                    clamped += 1;
                }
                let (ox, oy) = outer.sample_clamped(x, y);
                result.dx[[row, col]] += ox;
                result.dy[[row, col]] += oy;
            }
        }
        if clamped > 0 {
            debug!(clamped, "compose: warped positions outside the domain");
        }
        Ok(result)
    }

    /// Approximate inverse by fixed-point iteration on
    /// `psi(x) = -phi(x + psi(x))`.
    ///
    /// Exact inversion of a general displacement is not guaranteed to exist;
    /// after [`INVERSE_MAX_ITERATIONS`] the best effort is returned and the
    /// residual logged. Convergence is declared once the mean squared node
    /// update drops below [`INVERSE_TOLERANCE`].
    pub fn approx_inverse(&self) -> Self {
        let (ny, nx) = self.shape();
        let mut psi = self.clone();
        psi.scale(-1.0);

        for iteration in 0..INVERSE_MAX_ITERATIONS {
            let mut update = 0.0;
            for row in 0..ny {
                for col in 0..nx {
                    let x = col as f64 / (nx - 1) as f64 + psi.dx[[row, col]];
                    let y = row as f64 / (ny - 1) as f64 + psi.dy[[row, col]];
                    let (px, py) = self.sample_clamped(x, y);
                    let new_dx = -px;
                    let new_dy = -py;
                    update += (new_dx - psi.dx[[row, col]]).powi(2)
                        + (new_dy - psi.dy[[row, col]]).powi(2);
                    psi.dx[[row, col]] = new_dx;
                    psi.dy[[row, col]] = new_dy;
                }
            }
            update /= (nx * ny) as f64;
            if update < INVERSE_TOLERANCE {
                return psi;
            }
            if iteration == INVERSE_MAX_ITERATIONS - 1 {
                warn!(
                    residual = update,
                    "inverse fixed point did not converge, returning best effort"
                );
            }
        }
        psi
    }

    /// Restrict to a coarser depth through the intermediate levels.
    pub fn restrict_to(&self, target_depth: usize) -> Self {
        assert!(target_depth <= self.depth, "restrict target must be coarser");
        let mut dx = self.dx.clone();
        let mut dy = self.dy.clone();
        for _ in target_depth..self.depth {
            dx = grid::restrict(&dx);
            dy = grid::restrict(&dy);
        }
        Self {
            dx,
            dy,
            depth: target_depth,
        }
    }

    /// Prolong to a finer depth through the intermediate levels.
    pub fn prolong_to(&self, target_depth: usize) -> Self {
        assert!(target_depth >= self.depth, "prolong target must be finer");
        let mut dx = self.dx.clone();
        let mut dy = self.dy.clone();
        for _ in self.depth..target_depth {
            dx = grid::prolong(&dx);
            dy = grid::prolong(&dy);
        }
        Self {
            dx,
            dy,
            depth: target_depth,
        }
    }

    /// Transfer to an arbitrary depth, restricting or prolonging as needed.
    pub fn to_depth(&self, target_depth: usize) -> Self {
        if target_depth <= self.depth {
            self.restrict_to(target_depth)
        } else {
            self.prolong_to(target_depth)
        }
    }

    pub fn add_assign(&mut self, other: &Self) -> Result<()> {
        self.ensure_same_depth(other)?;
        self.dx += &other.dx;
        self.dy += &other.dy;
        Ok(())
    }

    pub fn scale(&mut self, factor: f64) {
        self.dx.mapv_inplace(|v| v * factor);
        self.dy.mapv_inplace(|v| v * factor);
    }

    /// Per-node Euclidean displacement magnitude.
    pub fn pointwise_norm(&self) -> Array2<f64> {
        let mut norms = Array2::zeros(self.shape());
        for ((n, &dx), &dy) in norms.iter_mut().zip(self.dx.iter()).zip(self.dy.iter()) {
            *n = dx.hypot(dy);
        }
        norms
    }

    /// Discrete L2 norm of the displacement over the unit domain.
    pub fn norm(&self) -> f64 {
        let (ny, nx) = self.shape();
        let cell = 1.0 / ((nx - 1) as f64 * (ny - 1) as f64);
        let sum: f64 = self
            .dx
            .iter()
            .zip(self.dy.iter())
            .map(|(&dx, &dy)| dx * dx + dy * dy)
            .sum();
        (sum * cell).sqrt()
    }

    /// Mean displacement, the rigid translation component.
    pub fn mean_translation(&self) -> (f64, f64) {
        let n = self.dx.len() as f64;
        (
            self.dx.iter().sum::<f64>() / n,
            self.dy.iter().sum::<f64>() / n,
        )
    }

    /// Resample `image` through this field into the field's own grid.
    ///
    /// The image must match the field's node shape. Samples whose deformed
    /// position leaves the image domain become [`OUT_OF_DOMAIN`].
    pub fn warp_image(&self, image: &Array2<f32>) -> Result<Array2<f32>> {
        let (ny, nx) = self.shape();
        let (img_ny, img_nx) = image.dim();
        if (img_ny, img_nx) != (ny, nx) {
            return Err(SerialignError::GridSizeMismatch {
                field_h: ny,
                field_w: nx,
                grid_h: img_ny,
                grid_w: img_nx,
            });
        }

        let mut warped = Array2::from_elem((ny, nx), OUT_OF_DOMAIN);
        for row in 0..ny {
            for col in 0..nx {
                let col_f = col as f64 + self.dx[[row, col]] * (nx - 1) as f64;
                let row_f = row as f64 + self.dy[[row, col]] * (ny - 1) as f64;
                if let Some(v) = sample_image(image, row_f, col_f) {
                    warped[[row, col]] = v;
                }
            }
        }
        Ok(warped)
    }
}

/// Mean of the in-domain pixels of a possibly sentinel-holed image.
pub fn finite_mean(image: &Array2<f32>) -> f32 {
    let mut sum = 0.0f64;
    let mut count = 0usize;
    for &v in image.iter() {
        if v.is_finite() {
            sum += v as f64;
            count += 1;
        }
    }
    if count == 0 {
        0.0
    } else {
        (sum / count as f64) as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::GridHierarchy;

    fn test_grid() -> Grid {
        *GridHierarchy::for_image(17, 17).unwrap().finest()
    }

    #[test]
    fn compose_with_identity_is_identity_law() {
        let grid = test_grid();
        let mut phi = DeformationField::identity(&grid);
        phi.dx.fill(0.01);
        phi.dy.fill(-0.02);

        let id = DeformationField::identity(&grid);
        let left = DeformationField::compose(&id, &phi).unwrap();
        let right = DeformationField::compose(&phi, &id).unwrap();
        for (a, b) in left.dx.iter().zip(phi.dx.iter()) {
            assert!((a - b).abs() < 1e-12);
        }
        for (a, b) in right.dy.iter().zip(phi.dy.iter()) {
            assert!((a - b).abs() < 1e-12);
        }
    }

    #[test]
    fn compose_rejects_depth_mismatch() {
        let hierarchy = GridHierarchy::for_image(17, 17).unwrap();
        let fine = DeformationField::identity(hierarchy.finest());
        let coarse = DeformationField::identity(hierarchy.grid(0));
        assert!(DeformationField::compose(&fine, &coarse).is_err());
    }

    #[test]
    fn approx_inverse_of_translation() {
        let grid = test_grid();
        let mut phi = DeformationField::identity(&grid);
        phi.dx.fill(0.05);

        let psi = phi.approx_inverse();
        let composed = DeformationField::compose(&phi, &psi).unwrap();
        // Interior nodes: phi(psi(x)) should be the identity.
        for row in 2..15 {
            for col in 2..15 {
                assert!(composed.dx[[row, col]].abs() < 1e-6);
                assert!(composed.dy[[row, col]].abs() < 1e-6);
            }
        }
    }

    #[test]
    fn warp_identity_reproduces_image() {
        let grid = test_grid();
        let mut image = Array2::<f32>::zeros(grid.shape());
        for (i, v) in image.iter_mut().enumerate() {
            *v = (i % 7) as f32 / 7.0;
        }
        let id = DeformationField::identity(&grid);
        let warped = id.warp_image(&image).unwrap();
        assert_eq!(warped, image);
    }
}
