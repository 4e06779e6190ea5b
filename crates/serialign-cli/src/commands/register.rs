use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, ValueEnum};
use serialign_core::config::{RegistrationConfig, Similarity};
use serialign_core::grid::GridHierarchy;
use serialign_core::io::{load_image, save_deformation, save_image};
use serialign_core::solver::MultilevelSolver;

#[derive(Clone, Copy, ValueEnum)]
pub enum SimilarityArg {
    Ssd,
    Ncc,
}

impl From<SimilarityArg> for Similarity {
    fn from(arg: SimilarityArg) -> Self {
        match arg {
            SimilarityArg::Ssd => Similarity::Ssd,
            SimilarityArg::Ncc => Similarity::Ncc,
        }
    }
}

#[derive(Args)]
pub struct RegisterArgs {
    /// Reference image (held fixed)
    pub reference: PathBuf,

    /// Template image (deformed onto the reference)
    pub template: PathBuf,

    /// Coarsest grid depth to start from
    #[arg(long, default_value = "2")]
    pub start_level: usize,

    /// Finest grid depth; defaults to the image's finest level
    #[arg(long)]
    pub stop_level: Option<usize>,

    /// Run a second pass from this depth and keep the better result
    #[arg(long)]
    pub alt_start_level: Option<usize>,

    /// Regularization weight
    #[arg(long, default_value = "0.05")]
    pub lambda: f64,

    /// Similarity measure
    #[arg(long, value_enum, default_value = "ncc")]
    pub similarity: SimilarityArg,

    /// Descent iteration cap per level
    #[arg(long, default_value = "200")]
    pub max_iterations: usize,

    /// Output stem for the deformation files
    #[arg(short, long, default_value = "deformation")]
    pub output: PathBuf,

    /// Also save the warped template here
    #[arg(long)]
    pub warped: Option<PathBuf>,
}

pub fn run(args: &RegisterArgs) -> Result<()> {
    let reference = load_image(&args.reference)
        .with_context(|| format!("failed to load {}", args.reference.display()))?;
    let template = load_image(&args.template)
        .with_context(|| format!("failed to load {}", args.template.display()))?;

    let (ny, nx) = reference.dim();
    let hierarchy = GridHierarchy::for_image(ny, nx)?;

    let config = RegistrationConfig {
        start_level: args.start_level,
        stop_level: args.stop_level,
        alt_start_level: args.alt_start_level,
        lambda: args.lambda,
        max_iterations: args.max_iterations,
        similarity: args.similarity.into(),
        ..Default::default()
    };

    println!(
        "Registering {} -> {} over levels {}..{}",
        args.template.display(),
        args.reference.display(),
        args.start_level,
        args.stop_level.unwrap_or(hierarchy.max_depth()),
    );

    let solver = MultilevelSolver::new(&hierarchy, &reference, &template, &config)?;
    let report = solver.solve(None)?;

    println!(
        "Final energy {:.6e}, deformation norm {:.6e}",
        report.energy,
        report.deformation.norm()
    );
    for level in &report.per_level {
        println!(
            "  depth {}: {} iterations, energy {:.6e}{}",
            level.depth,
            level.iterations,
            level.energy,
            if level.converged { "" } else { " (iteration cap)" }
        );
    }

    save_deformation(&args.output, &report.deformation)?;
    println!("Deformation saved to {}-{{x,y}}.def", args.output.display());

    if let Some(warped_path) = &args.warped {
        let warped = report.deformation.warp_image(&template)?;
        save_image(&warped, warped_path)?;
        println!("Warped template saved to {}", warped_path.display());
    }
    Ok(())
}
