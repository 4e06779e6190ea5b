use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use serialign_core::config::{AverageConfig, SeriesConfig, StageConfig};

/// The TOML parameter file driving the series pipeline.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct PipelineParams {
    /// printf-style pattern for template frames, e.g. `frames/img_%03d.png`.
    pub template_pattern: String,
    pub num_templates: usize,
    #[serde(default)]
    pub first_index: usize,
    /// Explicit reference image. Exactly one of this and
    /// `first_frame_is_reference` must be set.
    pub reference: Option<PathBuf>,
    /// Make the frame at `first_index` the reference; the remaining frames
    /// are the templates.
    #[serde(default)]
    pub first_frame_is_reference: bool,
    pub output_dir: Option<PathBuf>,
    #[serde(default)]
    pub series: SeriesConfig,
    #[serde(default)]
    pub average: AverageConfig,
    #[serde(default)]
    pub stages: StageConfig,
}

impl PipelineParams {
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read parameter file {}", path.display()))?;
        let params: Self = toml::from_str(&contents)
            .with_context(|| format!("invalid parameter file {}", path.display()))?;
        params.validate()?;
        Ok(params)
    }

    pub fn validate(&self) -> Result<()> {
        if self.template_pattern.is_empty() {
            bail!("template_pattern must be set");
        }
        if self.num_templates == 0 {
            bail!("num_templates must be at least 1");
        }
        if self.reference.is_some() && self.first_frame_is_reference {
            bail!("reference and first_frame_is_reference are mutually exclusive");
        }
        if self.reference.is_none() && !self.first_frame_is_reference {
            bail!("set either reference or first_frame_is_reference");
        }
        if self.first_frame_is_reference && self.num_templates < 2 {
            bail!(
                "first_frame_is_reference consumes one frame, so at least 2 \
                 frames are needed"
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_params() -> PipelineParams {
        PipelineParams {
            template_pattern: "img_%03d.png".into(),
            num_templates: 4,
            reference: Some(PathBuf::from("reference.png")),
            ..Default::default()
        }
    }

    #[test]
    fn explicit_reference_is_accepted() {
        assert!(base_params().validate().is_ok());
    }

    #[test]
    fn missing_reference_requires_the_flag() {
        let mut params = base_params();
        params.reference = None;
        assert!(params.validate().is_err());

        params.first_frame_is_reference = true;
        assert!(params.validate().is_ok());
    }

    #[test]
    fn reference_and_flag_together_are_rejected() {
        let mut params = base_params();
        params.first_frame_is_reference = true;
        assert!(params.validate().is_err());
    }

    #[test]
    fn first_frame_reference_needs_a_second_frame() {
        let mut params = base_params();
        params.reference = None;
        params.first_frame_is_reference = true;
        params.num_templates = 1;
        assert!(params.validate().is_err());
    }
}
