use std::path::PathBuf;

use anyhow::Result;
use clap::Args;
use console::Style;
use serialign_core::analyze::analyze_deformations;
use serialign_core::series::load_series_deformations;

#[derive(Args)]
pub struct AnalyzeArgs {
    /// Directory holding deformation_NNN files from a previous run
    pub deformation_dir: PathBuf,

    /// Number of deformations
    #[arg(long)]
    pub count: usize,

    /// Analyze the inverse deformations instead
    #[arg(long)]
    pub inverse: bool,
}

pub fn run(args: &AnalyzeArgs) -> Result<()> {
    let fields = load_series_deformations(&args.deformation_dir, args.count, args.inverse)?;
    let analysis = analyze_deformations(&fields)?;

    let header = Style::new().cyan().bold();
    let value = Style::new().bold();

    println!(
        "  {:<7}{:>14}{:>14}{:>14}{:>14}",
        header.apply_to("frame"),
        header.apply_to("tx"),
        header.apply_to("ty"),
        header.apply_to("non-rigid"),
        header.apply_to("max"),
    );
    for f in &analysis.frames {
        println!(
            "  {:<7}{:>14.6e}{:>14.6e}{:>14.6e}{:>14.6e}",
            f.index, f.translation.0, f.translation.1, f.non_rigid_mean, f.non_rigid_max
        );
    }
    println!();
    println!(
        "  Mean translation magnitude: {}",
        value.apply_to(format!("{:.6e}", analysis.series.mean_translation_magnitude))
    );
    println!(
        "  Mean non-rigid component:   {}",
        value.apply_to(format!("{:.6e}", analysis.series.mean_non_rigid))
    );
    println!(
        "  Max non-rigid component:    {}",
        value.apply_to(format!("{:.6e}", analysis.series.max_non_rigid))
    );
    println!(
        "  Non-rigid / translation:    {}",
        value.apply_to(format!("{:.3}", analysis.series.non_rigid_ratio))
    );
    Ok(())
}
