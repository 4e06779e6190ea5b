//! Run-scoped configuration, threaded through every component call as
//! immutable values. Loaded from TOML by the CLI.

use serde::{Deserialize, Serialize};

use crate::consts::{
    DEFAULT_GRADIENT_TOLERANCE, DEFAULT_MAX_ITERATIONS, DEFAULT_REDUCE_CONSISTENCY_WEIGHT,
    DEFAULT_REDUCE_DATA_WEIGHT, REDUCE_GRADIENT_TOLERANCE, REDUCE_MAX_ITERATIONS,
};
use crate::error::{Result, SerialignError};

/// Similarity measure, selected once at configuration time.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Similarity {
    Ssd,
    #[default]
    Ncc,
}

/// Tie-break criterion between the regular and the alternate start level.
/// The two criteria can disagree; which one decides is an explicit policy.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AltCriterion {
    /// Fewer out-of-domain pixels when warping the template wins.
    #[default]
    DomainOverlap,
    /// Lower final energy wins.
    Energy,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistrationConfig {
    /// Coarsest depth the multilevel descent starts from.
    pub start_level: usize,
    /// Finest depth to solve on; `None` means the hierarchy's finest.
    pub stop_level: Option<usize>,
    /// Rerun the whole pass from this start level and keep the better
    /// result per `alt_criterion`.
    pub alt_start_level: Option<usize>,
    #[serde(default)]
    pub alt_criterion: AltCriterion,
    /// Regularization weight.
    pub lambda: f64,
    pub max_iterations: usize,
    /// Descent stops once the gradient norm falls below this fraction of
    /// its initial value at the current depth.
    pub gradient_tolerance: f64,
    #[serde(default)]
    pub similarity: Similarity,
}

impl Default for RegistrationConfig {
    fn default() -> Self {
        Self {
            start_level: 2,
            stop_level: None,
            alt_start_level: None,
            alt_criterion: AltCriterion::default(),
            lambda: 0.05,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            gradient_tolerance: DEFAULT_GRADIENT_TOLERANCE,
            similarity: Similarity::default(),
        }
    }
}

impl RegistrationConfig {
    /// Resolve start/stop against a concrete hierarchy depth.
    pub fn resolve_levels(&self, max_depth: usize) -> Result<(usize, usize)> {
        let stop = self.stop_level.unwrap_or(max_depth);
        if self.start_level > stop || stop > max_depth {
            return Err(SerialignError::Config(format!(
                "invalid level range: start_level {} stop_level {} (hierarchy depth {})",
                self.start_level, stop, max_depth
            )));
        }
        if let Some(alt) = self.alt_start_level {
            if alt > stop {
                return Err(SerialignError::Config(format!(
                    "alt_start_level {alt} exceeds stop_level {stop}"
                )));
            }
        }
        Ok((self.start_level, stop))
    }

    /// Whether the alternate-start-level pass is actually distinct.
    pub fn uses_alt_start(&self) -> bool {
        self.alt_start_level
            .map(|alt| alt != self.start_level)
            .unwrap_or(false)
    }
}

/// How successive frames are chained toward the fixed reference.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChainStrategy {
    /// Register every frame straight to the fixed reference.
    Direct,
    /// Register frame i to frame i-1, accumulate, then refine against the
    /// reference seeded with the accumulation. Consecutive frames deform far
    /// less than distant ones, so the descent starts closer to the optimum.
    #[default]
    ChainedRefined,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SeriesConfig {
    pub registration: RegistrationConfig,
    #[serde(default)]
    pub chain: ChainStrategy,
    /// Level range for the refinement solve; `None` falls back to the
    /// registration range.
    pub refine_start_level: Option<usize>,
    pub refine_stop_level: Option<usize>,
    /// Treat the nominal reference as the image being deformed.
    #[serde(default)]
    pub reverse_roles: bool,
    /// Also estimate the inverse deformation (template <- reference).
    #[serde(default)]
    pub compute_inverse: bool,
    /// Jointly reduce redundant deformation estimates to a consistent set.
    /// Requires `compute_inverse`.
    #[serde(default)]
    pub reduce_deformations: bool,
    #[serde(default)]
    pub reduce: ReduceConfig,
}

impl SeriesConfig {
    pub fn validate(&self) -> Result<()> {
        if self.reduce_deformations && !self.compute_inverse {
            return Err(SerialignError::Config(
                "reduce_deformations requires compute_inverse: the reduction pairs each \
                 forward estimate with its inverse"
                    .into(),
            ));
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ReduceConfig {
    /// Tether weight keeping each corrected field near its measurement.
    pub data_weight: f64,
    /// Weight of the pairwise compose-to-identity penalties.
    pub consistency_weight: f64,
    pub max_iterations: usize,
    pub gradient_tolerance: f64,
}

impl Default for ReduceConfig {
    fn default() -> Self {
        Self {
            data_weight: DEFAULT_REDUCE_DATA_WEIGHT,
            consistency_weight: DEFAULT_REDUCE_CONSISTENCY_WEIGHT,
            max_iterations: REDUCE_MAX_ITERATIONS,
            gradient_tolerance: REDUCE_GRADIENT_TOLERANCE,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct AverageConfig {
    /// Reverse mode: splat scatter samples over the nearest 4 nodes with
    /// bilinear weights instead of rounding.
    #[serde(default)]
    pub weighted: bool,
    /// Forward mode: per-frame weights for the mean and median. `None`
    /// weighs every frame equally. Length must match the frame count.
    #[serde(default)]
    pub frame_weights: Option<Vec<f64>>,
    /// Reverse-mode super-resolution factor for the output grid.
    pub super_resolution_factor: usize,
}

impl Default for AverageConfig {
    fn default() -> Self {
        Self {
            weighted: false,
            frame_weights: None,
            super_resolution_factor: 1,
        }
    }
}

impl AverageConfig {
    pub fn validate(&self) -> Result<()> {
        if self.super_resolution_factor == 0 {
            return Err(SerialignError::Config(
                "super_resolution_factor must be at least 1".into(),
            ));
        }
        if let Some(weights) = &self.frame_weights {
            if weights.iter().any(|&w| !w.is_finite() || w <= 0.0) {
                return Err(SerialignError::Config(
                    "frame_weights must be finite and positive".into(),
                ));
            }
        }
        Ok(())
    }
}

/// Multi-stage refinement: each extra stage re-registers the series against
/// the previous stage's composite with a scaled regularization weight.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct StageConfig {
    pub extra_stages: usize,
    pub stage_lambda_factor: f64,
    /// Use the previous stage's median instead of its mean as the new target.
    #[serde(default)]
    pub use_median_as_target: bool,
}

impl Default for StageConfig {
    fn default() -> Self {
        Self {
            extra_stages: 0,
            stage_lambda_factor: 1.0,
            use_median_as_target: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_resolution_checks_bounds() {
        let mut config = RegistrationConfig::default();
        config.start_level = 3;
        config.stop_level = Some(2);
        assert!(config.resolve_levels(6).is_err());

        config.stop_level = None;
        assert_eq!(config.resolve_levels(6).unwrap(), (3, 6));
    }

    #[test]
    fn reduce_requires_inverse() {
        let config = SeriesConfig {
            reduce_deformations: true,
            compute_inverse: false,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
