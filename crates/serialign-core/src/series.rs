//! Register a whole frame series against one fixed reference.
//!
//! Every frame yields a deformation on the reference's grid; the running
//! accumulated field always represents reference <- current frame (or the
//! reverse when roles are swapped). Diagnostics and per-frame deformation
//! files are checkpointed under an optional save directory so averaging and
//! analysis can resume without re-registering.

use std::fs;
use std::io::Write as _;
use std::path::{Path, PathBuf};

use ndarray::Array2;
use tracing::{info, info_span};

use crate::config::{ChainStrategy, RegistrationConfig, SeriesConfig};
use crate::error::{Result, SerialignError};
use crate::field::DeformationField;
use crate::grid::GridHierarchy;
use crate::io::save_deformation;
use crate::reduce::reduce_deformations;
use crate::solver::MultilevelSolver;

/// Per-frame registration diagnostics.
#[derive(Clone, Copy, Debug)]
pub struct FrameReport {
    pub index: usize,
    pub energy: f64,
    pub deformation_norm: f64,
}

/// All per-frame deformations plus optional inverses.
#[derive(Clone, Debug)]
pub struct SeriesResult {
    pub deformations: Vec<DeformationField>,
    pub inverses: Option<Vec<DeformationField>>,
    pub reports: Vec<FrameReport>,
}

/// Drives registration of a frame sequence against a fixed reference.
pub struct SeriesMatcher<'a> {
    reference: &'a Array2<f32>,
    config: &'a SeriesConfig,
    hierarchy: GridHierarchy,
    save_dir: Option<PathBuf>,
}

impl<'a> SeriesMatcher<'a> {
    pub fn new(reference: &'a Array2<f32>, config: &'a SeriesConfig) -> Result<Self> {
        config.validate()?;
        let (ny, nx) = reference.dim();
        let hierarchy = GridHierarchy::for_image(ny, nx)?;
        Ok(Self {
            reference,
            config,
            hierarchy,
            save_dir: None,
        })
    }

    /// Checkpoint deformations and diagnostics under `dir`.
    pub fn with_save_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.save_dir = Some(dir.into());
        self
    }

    pub fn hierarchy(&self) -> &GridHierarchy {
        &self.hierarchy
    }

    /// Register every frame, returning reference <- frame deformations
    /// (frame <- reference when `reverse_roles` is set).
    pub fn run(&self, frames: &[Array2<f32>]) -> Result<SeriesResult> {
        if frames.is_empty() {
            return Err(SerialignError::EmptySequence);
        }
        if let Some(dir) = &self.save_dir {
            fs::create_dir_all(dir)?;
        }

        let reg = &self.config.registration;
        let (_, stop) = reg.resolve_levels(self.hierarchy.max_depth())?;
        let (refine_start, refine_stop) = self.resolve_refine_levels(stop)?;

        let mut deformations: Vec<DeformationField> = Vec::with_capacity(frames.len());
        let mut reports = Vec::with_capacity(frames.len());

        for (index, frame) in frames.iter().enumerate() {
            let span = info_span!("frame", index);
            let _guard = span.enter();

            let report = match self.config.chain {
                ChainStrategy::Direct => {
                    self.solver_for(self.reference, frame, reg)?.solve(None)?
                }
                ChainStrategy::ChainedRefined => {
                    if index == 0 {
                        self.solver_for(self.reference, frame, reg)?.solve(None)?
                    } else {
                        // Consecutive frames deform far less than distant
                        // ones; chain through the previous frame, then refine
                        // against the fixed reference.
                        let accumulated = &deformations[index - 1];
                        let increment = self
                            .solver_for(&frames[index - 1], frame, reg)?
                            .solve(None)?
                            .deformation
                            .to_depth(accumulated.depth);
                        let seeded = if self.config.reverse_roles {
                            DeformationField::compose(accumulated, &increment)?
                        } else {
                            DeformationField::compose(&increment, accumulated)?
                        };
                        self.solver_for(self.reference, frame, reg)?.solve_range(
                            Some(&seeded),
                            refine_start,
                            refine_stop,
                        )?
                    }
                }
            };

            // All output fields live on the registration stop grid, whatever
            // range the refinement ran on.
            let deformation = report.deformation.to_depth(stop);
            let deformation_norm = deformation.norm();
            info!(
                energy = report.energy,
                deformation_norm, "frame registered"
            );
            reports.push(FrameReport {
                index,
                energy: report.energy,
                deformation_norm,
            });
            if let Some(dir) = &self.save_dir {
                save_deformation(&frame_stem(dir, index, false), &deformation)?;
            }
            deformations.push(deformation);
        }

        let mut inverses = if self.config.compute_inverse {
            Some(self.compute_inverses(frames, &deformations, refine_start, refine_stop)?)
        } else {
            None
        };

        if self.config.reduce_deformations {
            let inv = inverses.as_mut().expect("validated with compute_inverse");
            self.reduce(&mut deformations, inv)?;
            if let Some(dir) = &self.save_dir {
                for (index, (phi, psi)) in deformations.iter().zip(inv.iter()).enumerate() {
                    save_deformation(&frame_stem(dir, index, false), phi)?;
                    save_deformation(&frame_stem(dir, index, true), psi)?;
                }
            }
        }

        if let Some(dir) = &self.save_dir {
            write_diagnostics(dir, &reports)?;
        }

        Ok(SeriesResult {
            deformations,
            inverses,
            reports,
        })
    }

    /// Seed each inverse by fixed-point inversion, then refine it with the
    /// opposite role assignment.
    fn compute_inverses(
        &self,
        frames: &[Array2<f32>],
        deformations: &[DeformationField],
        refine_start: usize,
        refine_stop: usize,
    ) -> Result<Vec<DeformationField>> {
        let reg = &self.config.registration;
        let mut inverses = Vec::with_capacity(deformations.len());
        for (index, (frame, phi)) in frames.iter().zip(deformations.iter()).enumerate() {
            let seed = phi.approx_inverse();
            let mut solver =
                MultilevelSolver::new(&self.hierarchy, self.reference, frame, reg)?;
            // Opposite of the forward orientation.
            if !self.config.reverse_roles {
                solver.swap_roles();
            }
            let report = solver.solve_range(Some(&seed), refine_start, refine_stop)?;
            let inverse = report.deformation.to_depth(phi.depth);
            if let Some(dir) = &self.save_dir {
                save_deformation(&frame_stem(dir, index, true), &inverse)?;
            }
            inverses.push(inverse);
        }
        Ok(inverses)
    }

    /// Joint reduction over forward/inverse pairs: each pair composed in
    /// either order is pushed toward the identity while staying tethered to
    /// its measurement.
    fn reduce(
        &self,
        deformations: &mut Vec<DeformationField>,
        inverses: &mut Vec<DeformationField>,
    ) -> Result<()> {
        let count = deformations.len();
        let mut estimates = deformations.clone();
        estimates.extend(inverses.iter().cloned());
        let mut chains = Vec::with_capacity(2 * count);
        for index in 0..count {
            chains.push((index, count + index));
            chains.push((count + index, index));
        }
        let corrected = reduce_deformations(&estimates, &chains, &self.config.reduce)?;
        let mut corrected = corrected.into_iter();
        *deformations = corrected.by_ref().take(count).collect();
        *inverses = corrected.collect();
        info!(count, "deformation estimates jointly reduced");
        Ok(())
    }

    fn solver_for(
        &self,
        fixed: &Array2<f32>,
        deformed: &Array2<f32>,
        reg: &'a RegistrationConfig,
    ) -> Result<MultilevelSolver<'_>> {
        let mut solver = MultilevelSolver::new(&self.hierarchy, fixed, deformed, reg)?;
        if self.config.reverse_roles {
            solver.swap_roles();
        }
        Ok(solver)
    }

    fn resolve_refine_levels(&self, stop: usize) -> Result<(usize, usize)> {
        let start = self.config.refine_start_level.unwrap_or(stop);
        let end = self.config.refine_stop_level.unwrap_or(stop);
        if start > end || end > self.hierarchy.max_depth() {
            return Err(SerialignError::Config(format!(
                "refine levels {start}..={end} outside 0..={}",
                self.hierarchy.max_depth()
            )));
        }
        Ok((start, end))
    }
}

/// `deformation_012` / `deformation_012_inv` under `dir`.
fn frame_stem(dir: &Path, index: usize, inverse: bool) -> PathBuf {
    if inverse {
        dir.join(format!("deformation_{index:03}_inv"))
    } else {
        dir.join(format!("deformation_{index:03}"))
    }
}

fn write_diagnostics(dir: &Path, reports: &[FrameReport]) -> Result<()> {
    let mut norms = fs::File::create(dir.join("defnorms.txt"))?;
    let mut energies = fs::File::create(dir.join("energies.txt"))?;
    for report in reports {
        writeln!(norms, "{:.12e}", report.deformation_norm)?;
        writeln!(energies, "{:.12e}", report.energy)?;
    }
    Ok(())
}

/// Load the deformations a previous [`SeriesMatcher::run`] checkpointed.
pub fn load_series_deformations(
    dir: &Path,
    count: usize,
    inverse: bool,
) -> Result<Vec<DeformationField>> {
    (0..count)
        .map(|index| crate::io::load_deformation(&frame_stem(dir, index, inverse)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_stem_is_zero_padded() {
        let dir = Path::new("/tmp/out");
        assert_eq!(
            frame_stem(dir, 7, false),
            Path::new("/tmp/out/deformation_007")
        );
        assert_eq!(
            frame_stem(dir, 7, true),
            Path::new("/tmp/out/deformation_007_inv")
        );
    }
}
