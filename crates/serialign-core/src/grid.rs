//! Dyadic grid hierarchy underlying deformation fields and energies.
//!
//! Depth 0 is the coarsest grid, depth `max_depth` matches the image
//! resolution. Adjacent depths are nested: every coarse node coincides with
//! every other fine node, so transfer between depths is multilinear
//! prolongation and full-weighting restriction.

use ndarray::Array2;

use crate::error::{Result, SerialignError};

/// A regular node grid over the unit square, immutable once constructed.
///
/// `nx`/`ny` are the node counts per axis; spacing is `h = 1/(n-1)`.
/// Invariant across the hierarchy: node count at depth k+1 = 2*(count at k) - 1.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Grid {
    pub depth: usize,
    /// Nodes along x (columns).
    pub nx: usize,
    /// Nodes along y (rows).
    pub ny: usize,
}

impl Grid {
    /// Node spacing along x in unit coordinates.
    pub fn hx(&self) -> f64 {
        1.0 / (self.nx - 1) as f64
    }

    /// Node spacing along y in unit coordinates.
    pub fn hy(&self) -> f64 {
        1.0 / (self.ny - 1) as f64
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.ny, self.nx)
    }
}

/// The full sequence of nested grids for one registration run.
///
/// Built once per run and read-only thereafter.
#[derive(Clone, Debug)]
pub struct GridHierarchy {
    grids: Vec<Grid>,
}

impl GridHierarchy {
    /// Derive the deepest hierarchy an image of `ny` x `nx` nodes admits.
    ///
    /// Both `nx - 1` and `ny - 1` must be divisible by `2^max_depth`; the
    /// hierarchy stops coarsening once either axis would lose that property.
    /// Images that admit no coarsening at all are rejected.
    pub fn for_image(ny: usize, nx: usize) -> Result<Self> {
        if nx < 3 || ny < 3 {
            return Err(SerialignError::InvalidDimensions {
                width: nx,
                height: ny,
            });
        }
        let levels = (nx - 1).trailing_zeros().min((ny - 1).trailing_zeros()) as usize;
        if levels == 0 {
            return Err(SerialignError::InvalidDimensions {
                width: nx,
                height: ny,
            });
        }

        let grids = (0..=levels)
            .map(|depth| Grid {
                depth,
                nx: ((nx - 1) >> (levels - depth)) + 1,
                ny: ((ny - 1) >> (levels - depth)) + 1,
            })
            .collect();
        Ok(Self { grids })
    }

    pub fn max_depth(&self) -> usize {
        self.grids.len() - 1
    }

    /// Grid at `depth`; panics if the depth is outside the hierarchy,
    /// which is a caller bug.
    pub fn grid(&self, depth: usize) -> &Grid {
        &self.grids[depth]
    }

    pub fn finest(&self) -> &Grid {
        self.grids.last().unwrap()
    }
}

/// Weight of the full-weighting stencil at offset `d` from the target node,
/// corrected at the boundary where a neighbor is missing.
fn stencil_weight(center: usize, d: isize, n: usize) -> f64 {
    let idx = center as isize + d;
    if idx < 0 || idx >= n as isize {
        return 0.0;
    }
    if d == 0 {
        0.5
    } else {
        0.25
    }
}

/// Full-weighting restriction of a node field to the next-coarser grid.
///
/// Input shape must be (2*ny-1, 2*nx-1) for some coarse (ny, nx). At the
/// boundary the missing stencil arm is dropped and the weights renormalized.
pub fn restrict(fine: &Array2<f64>) -> Array2<f64> {
    let (fine_ny, fine_nx) = fine.dim();
    debug_assert!(fine_ny % 2 == 1 && fine_nx % 2 == 1);
    let ny = (fine_ny + 1) / 2;
    let nx = (fine_nx + 1) / 2;

    let mut coarse = Array2::<f64>::zeros((ny, nx));
    for row in 0..ny {
        let fr = 2 * row;
        for col in 0..nx {
            let fc = 2 * col;
            let mut acc = 0.0;
            let mut weight_sum = 0.0;
            for dy in -1isize..=1 {
                let wy = stencil_weight(fr, dy, fine_ny);
                if wy == 0.0 {
                    continue;
                }
                for dx in -1isize..=1 {
                    let wx = stencil_weight(fc, dx, fine_nx);
                    if wx == 0.0 {
                        continue;
                    }
                    let r = (fr as isize + dy) as usize;
                    let c = (fc as isize + dx) as usize;
                    acc += wy * wx * fine[[r, c]];
                    weight_sum += wy * wx;
                }
            }
            coarse[[row, col]] = acc / weight_sum;
        }
    }
    coarse
}

/// Multilinear prolongation of a node field to the next-finer grid.
///
/// Coincident nodes copy, edge midpoints average their two neighbors,
/// cell centers average all four corners.
pub fn prolong(coarse: &Array2<f64>) -> Array2<f64> {
    let (ny, nx) = coarse.dim();
    let fine_ny = 2 * ny - 1;
    let fine_nx = 2 * nx - 1;

    let mut fine = Array2::<f64>::zeros((fine_ny, fine_nx));
    for row in 0..fine_ny {
        for col in 0..fine_nx {
            let (r0, r1) = (row / 2, (row + 1) / 2);
            let (c0, c1) = (col / 2, (col + 1) / 2);
            fine[[row, col]] = 0.25
                * (coarse[[r0, c0]] + coarse[[r0, c1]] + coarse[[r1, c0]] + coarse[[r1, c1]]);
        }
    }
    fine
}

/// Full-weighting restriction for image data.
pub fn restrict_image(fine: &Array2<f32>) -> Array2<f32> {
    restrict(&fine.mapv(|v| v as f64)).mapv(|v| v as f32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hierarchy_node_counts_are_nested() {
        let hierarchy = GridHierarchy::for_image(65, 129).unwrap();
        for depth in 0..hierarchy.max_depth() {
            let coarse = hierarchy.grid(depth);
            let fine = hierarchy.grid(depth + 1);
            assert_eq!(fine.nx, 2 * coarse.nx - 1);
            assert_eq!(fine.ny, 2 * coarse.ny - 1);
        }
        assert_eq!(hierarchy.finest().shape(), (65, 129));
    }

    #[test]
    fn rejects_images_without_dyadic_structure() {
        assert!(GridHierarchy::for_image(64, 64).is_err());
        assert!(GridHierarchy::for_image(2, 65).is_err());
    }

    #[test]
    fn prolong_then_restrict_is_identity_on_coincident_nodes() {
        let mut coarse = Array2::<f64>::zeros((5, 5));
        for row in 0..5 {
            for col in 0..5 {
                // Linear field: reproduced exactly by multilinear transfer.
                coarse[[row, col]] = 0.3 * row as f64 + 0.7 * col as f64;
            }
        }
        let fine = prolong(&coarse);
        assert_eq!(fine.dim(), (9, 9));
        let back = restrict(&fine);
        for (a, b) in back.iter().zip(coarse.iter()) {
            assert!((a - b).abs() < 1e-12);
        }
    }
}
