use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use indicatif::{ProgressBar, ProgressStyle};
use serialign_core::io::{load_image, save_image};
use serialign_core::stages::StagePipeline;

use super::params::PipelineParams;
use crate::summary::print_pipeline_summary;

#[derive(Args)]
pub struct SeriesArgs {
    /// Pipeline parameter file (TOML)
    pub config: PathBuf,

    /// Override the output directory from the parameter file
    #[arg(short, long)]
    pub output_dir: Option<PathBuf>,

    /// Final composite image path
    #[arg(long, default_value = "average.tiff")]
    pub output: PathBuf,
}

pub fn run(args: &SeriesArgs) -> Result<()> {
    let mut params = PipelineParams::load(&args.config)?;
    if let Some(dir) = &args.output_dir {
        params.output_dir = Some(dir.clone());
    }

    let mut frames = super::load_frames(
        &params.template_pattern,
        params.first_index,
        params.num_templates,
    )?;
    let reference = match &params.reference {
        Some(path) => {
            load_image(path).with_context(|| format!("failed to load {}", path.display()))?
        }
        None => frames.remove(0),
    };

    print_pipeline_summary(&params, frames.len());

    let mut pipeline = StagePipeline::new(&params.series, &params.average, &params.stages);
    if let Some(dir) = &params.output_dir {
        pipeline = pipeline.with_save_dir(dir);
    }

    let total_stages = 1 + params.stages.extra_stages;
    let pb = ProgressBar::new_spinner();
    pb.set_style(ProgressStyle::default_spinner().template("{spinner} {msg}")?);
    pb.set_message(format!("Matching {} stage(s)...", total_stages));
    pb.enable_steady_tick(std::time::Duration::from_millis(120));

    let outputs = pipeline.run(&reference, &frames)?;
    pb.finish_and_clear();

    let last = outputs.last().expect("pipeline always yields one stage");
    let mean_energy = last.series.reports.iter().map(|r| r.energy).sum::<f64>()
        / last.series.reports.len() as f64;
    println!(
        "Stage {} complete: mean energy {:.6e}, {} frames",
        last.stage,
        mean_energy,
        last.series.reports.len()
    );

    save_image(&last.average.average, &args.output)?;
    println!("Average saved to {}", args.output.display());
    if let Some(dir) = &params.output_dir {
        println!("Stage outputs under {}", dir.display());
    }
    Ok(())
}
