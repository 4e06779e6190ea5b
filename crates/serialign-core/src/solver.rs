//! Coarse-to-fine gradient descent on the registration energy.
//!
//! The solver walks the grid hierarchy from `start_level` to `stop_level`,
//! runs one descent loop per depth, and prolongs each depth's solution as
//! the next depth's starting point. Non-convergence is never fatal: the loop
//! terminates at the iteration cap and reports whatever deformation it has.

use ndarray::Array2;
use tracing::{debug, info, warn};

use crate::config::{AltCriterion, RegistrationConfig, Similarity};
use crate::consts::{
    LINE_SEARCH_INITIAL_STEP, LINE_SEARCH_MAX_STEPS, LINE_SEARCH_SHRINK, LINE_SEARCH_SIGMA,
};
use crate::energy::{EnergyContext, Ncc, RegistrationEnergy, SimilarityMeasure, Ssd};
use crate::error::Result;
use crate::field::DeformationField;
use crate::grid::GridHierarchy;

/// Diagnostics for one grid depth.
#[derive(Clone, Copy, Debug)]
pub struct LevelReport {
    pub depth: usize,
    pub iterations: usize,
    pub energy: f64,
    pub deformation_norm: f64,
    pub converged: bool,
}

/// Terminal state of one multilevel pass: the finest requested depth's
/// deformation plus its energy.
#[derive(Clone, Debug)]
pub struct SolveReport {
    pub deformation: DeformationField,
    pub energy: f64,
    pub per_level: Vec<LevelReport>,
}

pub fn measure_for(similarity: Similarity) -> Box<dyn SimilarityMeasure> {
    match similarity {
        Similarity::Ssd => Box::new(Ssd),
        Similarity::Ncc => Box::new(Ncc),
    }
}

/// One registration run: a reference/template pair restricted through the
/// hierarchy, solved coarse to fine.
pub struct MultilevelSolver<'a> {
    hierarchy: &'a GridHierarchy,
    reference_pyramid: Vec<Array2<f32>>,
    template_pyramid: Vec<Array2<f32>>,
    config: &'a RegistrationConfig,
    measure: Box<dyn SimilarityMeasure>,
}

impl<'a> MultilevelSolver<'a> {
    pub fn new(
        hierarchy: &'a GridHierarchy,
        reference: &Array2<f32>,
        template: &Array2<f32>,
        config: &'a RegistrationConfig,
    ) -> Result<Self> {
        let finest = hierarchy.finest();
        for image in [reference, template] {
            if image.dim() != finest.shape() {
                let (ny, nx) = image.dim();
                return Err(crate::error::SerialignError::GridSizeMismatch {
                    field_h: finest.ny,
                    field_w: finest.nx,
                    grid_h: ny,
                    grid_w: nx,
                });
            }
        }
        let reference_pyramid = build_pyramid(hierarchy, reference);
        let template_pyramid = build_pyramid(hierarchy, template);
        Ok(Self {
            hierarchy,
            reference_pyramid,
            template_pyramid,
            config,
            measure: measure_for(config.similarity),
        })
    }

    /// Swap which image is deformed and which is held fixed.
    pub fn swap_roles(&mut self) {
        std::mem::swap(&mut self.reference_pyramid, &mut self.template_pyramid);
    }

    /// Run the configured pass, including the alternate-start-level retry.
    ///
    /// `initial` is a deformation at the stop depth used as the starting
    /// guess (zero when absent). With an alternate start level the whole
    /// coarse-to-fine pass runs a second time from scratch and the
    /// configured criterion picks the winner.
    pub fn solve(&self, initial: Option<&DeformationField>) -> Result<SolveReport> {
        let (start, stop) = self.config.resolve_levels(self.hierarchy.max_depth())?;
        let first = self.solve_range(initial, start, stop)?;
        if !self.config.uses_alt_start() {
            return Ok(first);
        }

        let alt_start = self.config.alt_start_level.unwrap();
        let second = self.solve_range(None, alt_start, stop)?;

        let first_out = self.out_of_domain_count(&first.deformation, stop)?;
        let second_out = self.out_of_domain_count(&second.deformation, stop)?;
        let first_wins_domain = first_out < second_out;
        let first_wins_energy = first.energy < second.energy;
        info!(
            overlap_winner = if first_wins_domain { "start_level" } else { "alt_start_level" },
            energy_winner = if first_wins_energy { "start_level" } else { "alt_start_level" },
            "alternate start level comparison"
        );

        let keep_first = match self.config.alt_criterion {
            AltCriterion::DomainOverlap => first_wins_domain,
            AltCriterion::Energy => first_wins_energy,
        };
        Ok(if keep_first { first } else { second })
    }

    /// One coarse-to-fine pass over `start ..= stop`.
    pub fn solve_range(
        &self,
        initial: Option<&DeformationField>,
        start: usize,
        stop: usize,
    ) -> Result<SolveReport> {
        let mut phi = match initial {
            Some(field) => field.to_depth(start),
            None => DeformationField::identity(self.hierarchy.grid(start)),
        };

        let mut per_level = Vec::with_capacity(stop - start + 1);
        let mut energy = 0.0;
        for depth in start..=stop {
            if depth > start {
                phi = phi.prolong_to(depth);
            }
            let report = self.descend_at_depth(depth, &mut phi)?;
            energy = report.energy;
            debug!(
                depth,
                iterations = report.iterations,
                energy = report.energy,
                deformation_norm = report.deformation_norm,
                "level finished"
            );
            per_level.push(report);
        }

        Ok(SolveReport {
            deformation: phi,
            energy,
            per_level,
        })
    }

    /// Gradient descent with Armijo backtracking at one depth.
    fn descend_at_depth(&self, depth: usize, phi: &mut DeformationField) -> Result<LevelReport> {
        let grid = *self.hierarchy.grid(depth);
        let ctx = EnergyContext::new(
            grid,
            self.reference_pyramid[depth].clone(),
            self.template_pyramid[depth].clone(),
        )?;
        let energy = RegistrationEnergy::new(&ctx, self.measure.as_ref(), self.config.lambda);

        let mut record = energy.evaluate(phi)?;
        let (mut grad_x, mut grad_y) = energy.gradient(phi)?;
        let mut grad_sq = squared_norm(&grad_x, &grad_y);
        let initial_grad_norm = grad_sq.sqrt();
        let threshold = self.config.gradient_tolerance * initial_grad_norm;

        let mut step = LINE_SEARCH_INITIAL_STEP;
        let mut iterations = 0;
        let mut converged = initial_grad_norm <= threshold;

        while iterations < self.config.max_iterations && !converged {
            // Let the step recover after earlier backtracking.
            step = (step * 4.0).min(LINE_SEARCH_INITIAL_STEP);
            let mut accepted = false;

            for _ in 0..LINE_SEARCH_MAX_STEPS {
                let mut candidate = phi.clone();
                candidate.dx.scaled_add(-step, &grad_x);
                candidate.dy.scaled_add(-step, &grad_y);

                match energy.evaluate(&candidate) {
                    Ok(candidate_record)
                        if candidate_record.value
                            <= record.value - LINE_SEARCH_SIGMA * step * grad_sq =>
                    {
                        *phi = candidate;
                        record = candidate_record;
                        accepted = true;
                        break;
                    }
                    // Insufficient decrease, or the step pushed every sample
                    // out of the overlap: shrink and retry.
                    _ => step *= LINE_SEARCH_SHRINK,
                }
            }
            if !accepted {
                debug!(depth, iterations, "line search failed, stopping at this depth");
                break;
            }

            iterations += 1;
            let next = energy.gradient(phi)?;
            grad_x = next.0;
            grad_y = next.1;
            grad_sq = squared_norm(&grad_x, &grad_y);
            converged = grad_sq.sqrt() <= threshold;
        }

        if !converged && iterations >= self.config.max_iterations {
            warn!(
                depth,
                iterations, "descent hit the iteration cap, keeping best estimate"
            );
        }

        Ok(LevelReport {
            depth,
            iterations,
            energy: record.value,
            deformation_norm: phi.norm(),
            converged,
        })
    }

    /// Out-of-domain pixel count when warping the template at `depth`,
    /// the domain-coverage criterion for the alternate-start tie-break.
    fn out_of_domain_count(&self, phi: &DeformationField, depth: usize) -> Result<usize> {
        let warped = phi.warp_image(&self.template_pyramid[depth])?;
        Ok(warped.iter().filter(|v| !v.is_finite()).count())
    }
}

fn build_pyramid(hierarchy: &GridHierarchy, image: &Array2<f32>) -> Vec<Array2<f32>> {
    let mut pyramid = vec![Array2::zeros((0, 0)); hierarchy.max_depth() + 1];
    pyramid[hierarchy.max_depth()] = image.clone();
    for depth in (0..hierarchy.max_depth()).rev() {
        pyramid[depth] = crate::grid::restrict_image(&pyramid[depth + 1]);
    }
    pyramid
}

fn squared_norm(grad_x: &Array2<f64>, grad_y: &Array2<f64>) -> f64 {
    grad_x.iter().map(|g| g * g).sum::<f64>() + grad_y.iter().map(|g| g * g).sum::<f64>()
}
