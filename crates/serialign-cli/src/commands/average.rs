use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use serialign_core::average::{average_forward, average_reverse};
use serialign_core::config::AverageConfig;
use serialign_core::io::{load_image, save_image};
use serialign_core::series::load_series_deformations;

#[derive(Args)]
pub struct AverageArgs {
    /// Directory holding deformation_NNN files from a previous run
    pub deformation_dir: PathBuf,

    /// printf-style pattern for the template frames
    #[arg(long)]
    pub pattern: String,

    /// Number of frames
    #[arg(long)]
    pub count: usize,

    /// Index of the first frame
    #[arg(long, default_value = "0")]
    pub first_index: usize,

    /// Reference image; required for reverse-mode averaging
    #[arg(long)]
    pub reference: Option<PathBuf>,

    /// Scatter frames through their deformations instead of warping
    #[arg(long)]
    pub reverse: bool,

    /// Bilinear splatting in reverse mode
    #[arg(long)]
    pub weighted: bool,

    /// Comma-separated per-frame weights for forward-mode averaging
    #[arg(long, value_delimiter = ',')]
    pub weights: Vec<f64>,

    /// Output grid scale in reverse mode
    #[arg(long, default_value = "1")]
    pub super_resolution: usize,

    /// Composite image output path
    #[arg(short, long, default_value = "average.tiff")]
    pub output: PathBuf,

    /// Also save the per-pixel median here
    #[arg(long)]
    pub median: Option<PathBuf>,
}

pub fn run(args: &AverageArgs) -> Result<()> {
    let frames = super::load_frames(&args.pattern, args.first_index, args.count)?;
    let deformations = load_series_deformations(&args.deformation_dir, args.count, false)?;

    let result = if args.reverse {
        let reference_path = args
            .reference
            .as_ref()
            .context("reverse-mode averaging needs --reference")?;
        let reference = load_image(reference_path)
            .with_context(|| format!("failed to load {}", reference_path.display()))?;
        let config = AverageConfig {
            weighted: args.weighted,
            super_resolution_factor: args.super_resolution,
            ..Default::default()
        };
        average_reverse(&frames, &deformations, &reference, &config)?
    } else {
        let weights = (!args.weights.is_empty()).then_some(args.weights.as_slice());
        average_forward(&frames, &deformations, weights)?
    };

    save_image(&result.average, &args.output)?;
    println!("Average saved to {}", args.output.display());
    if let Some(median_path) = &args.median {
        save_image(&result.median, median_path)?;
        println!("Median saved to {}", median_path.display());
    }

    let min_samples = result.num_samples.iter().fold(f32::INFINITY, |a, &v| a.min(v));
    let mean_samples =
        result.num_samples.iter().sum::<f32>() / result.num_samples.len() as f32;
    println!("Samples per pixel: min {min_samples:.0}, mean {mean_samples:.2}");
    Ok(())
}
