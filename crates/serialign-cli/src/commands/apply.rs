use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use serialign_core::io::{load_deformation, load_image, save_image};

#[derive(Args)]
pub struct ApplyArgs {
    /// Deformation file stem (expects <stem>-x.def and <stem>-y.def)
    pub deformation: PathBuf,

    /// Image to warp
    pub input: PathBuf,

    /// Warped image output path
    #[arg(short, long, default_value = "warped.tiff")]
    pub output: PathBuf,
}

pub fn run(args: &ApplyArgs) -> Result<()> {
    let field = load_deformation(&args.deformation)?;
    let image = load_image(&args.input)
        .with_context(|| format!("failed to load {}", args.input.display()))?;

    let warped = field.warp_image(&image)?;
    let out_of_domain = warped.iter().filter(|v| !v.is_finite()).count();
    if out_of_domain > 0 {
        println!(
            "{} pixels mapped outside the domain; saved with mean fill",
            out_of_domain
        );
    }

    save_image(&warped, &args.output)?;
    println!("Warped image saved to {}", args.output.display());
    Ok(())
}
