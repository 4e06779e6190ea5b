//! Multi-stage refinement: re-register the series against its own average.
//!
//! Stage 1 registers every frame against the configured reference. Each extra
//! stage swaps the reference for the previous stage's average (or median),
//! which is far less noisy than any single frame, and tightens the
//! regularization by `stage_lambda_factor`. Super-resolution is only applied
//! in the last stage so intermediate references keep the frame geometry.

use std::fs;
use std::path::{Path, PathBuf};

use ndarray::Array2;
use tracing::{info, info_span};

use crate::average::{average_forward, average_reverse, AverageResult};
use crate::config::{AverageConfig, SeriesConfig, StageConfig};
use crate::error::{Result, SerialignError};
use crate::io::save_image;
use crate::series::{SeriesMatcher, SeriesResult};

/// Everything one stage produced.
pub struct StageOutput {
    pub stage: usize,
    pub series: SeriesResult,
    pub average: AverageResult,
}

/// Runs `1 + extra_stages` rounds of series matching and averaging.
pub struct StagePipeline<'a> {
    series_config: &'a SeriesConfig,
    average_config: &'a AverageConfig,
    stage_config: &'a StageConfig,
    save_dir: Option<PathBuf>,
}

impl<'a> StagePipeline<'a> {
    pub fn new(
        series_config: &'a SeriesConfig,
        average_config: &'a AverageConfig,
        stage_config: &'a StageConfig,
    ) -> Self {
        Self {
            series_config,
            average_config,
            stage_config,
            save_dir: None,
        }
    }

    /// Checkpoint each stage under `dir`/stage_N.
    pub fn with_save_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.save_dir = Some(dir.into());
        self
    }

    /// Run all stages; the last element holds the final composite.
    pub fn run(
        &self,
        reference: &Array2<f32>,
        frames: &[Array2<f32>],
    ) -> Result<Vec<StageOutput>> {
        if frames.is_empty() {
            return Err(SerialignError::EmptySequence);
        }
        let total_stages = 1 + self.stage_config.extra_stages;

        let mut outputs: Vec<StageOutput> = Vec::with_capacity(total_stages);
        let mut target = reference.clone();
        let mut stage_config = self.series_config.clone();

        for stage in 1..=total_stages {
            let span = info_span!("stage", stage);
            let _guard = span.enter();
            let is_last = stage == total_stages;

            let stage_dir = match &self.save_dir {
                Some(dir) => {
                    let d = dir.join(format!("stage_{stage}"));
                    fs::create_dir_all(&d)?;
                    Some(d)
                }
                None => None,
            };

            let mut matcher = SeriesMatcher::new(&target, &stage_config)?;
            if let Some(dir) = &stage_dir {
                matcher = matcher.with_save_dir(dir);
            }
            let series = matcher.run(frames)?;

            let average = if self.series_config.reverse_roles {
                let cfg = if is_last {
                    self.average_config.clone()
                } else {
                    AverageConfig {
                        super_resolution_factor: 1,
                        ..self.average_config.clone()
                    }
                };
                average_reverse(frames, &series.deformations, &target, &cfg)?
            } else {
                self.average_config.validate()?;
                average_forward(
                    frames,
                    &series.deformations,
                    self.average_config.frame_weights.as_deref(),
                )?
            };

            if let Some(dir) = &stage_dir {
                save_stage_images(dir, &average)?;
            }
            info!(
                mean_energy = series.reports.iter().map(|r| r.energy).sum::<f64>()
                    / series.reports.len() as f64,
                "stage complete"
            );

            if !is_last {
                target = if self.stage_config.use_median_as_target {
                    average.median.clone()
                } else {
                    average.average.clone()
                };
                stage_config.registration.lambda *= self.stage_config.stage_lambda_factor;
            }
            outputs.push(StageOutput {
                stage,
                series,
                average,
            });
        }
        Ok(outputs)
    }
}

fn save_stage_images(dir: &Path, average: &AverageResult) -> Result<()> {
    save_image(&average.average, &dir.join("average.tiff"))?;
    save_image(&average.median, &dir.join("median.tiff"))?;

    // Sample counts are unbounded; normalize for display.
    let max = average.num_samples.iter().fold(0.0f32, |acc, &v| acc.max(v));
    let normalized = if max > 0.0 {
        average.num_samples.mapv(|v| v / max)
    } else {
        average.num_samples.clone()
    };
    save_image(&normalized, &dir.join("num_samples.tiff"))?;
    Ok(())
}
