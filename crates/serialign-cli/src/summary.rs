use console::Style;
use serialign_core::config::{ChainStrategy, Similarity};

use crate::commands::params::PipelineParams;

struct Styles {
    title: Style,
    label: Style,
    value: Style,
    method: Style,
    disabled: Style,
    path: Style,
}

impl Styles {
    fn new() -> Self {
        Self {
            title: Style::new().cyan().bold(),
            label: Style::new().dim(),
            value: Style::new().bold().white(),
            method: Style::new().green(),
            disabled: Style::new().dim().yellow(),
            path: Style::new().underlined(),
        }
    }
}

pub fn print_pipeline_summary(params: &PipelineParams, frame_count: usize) {
    let s = Styles::new();
    let reg = &params.series.registration;

    println!();
    println!("  {}", s.title.apply_to("Serialign Pipeline"));
    println!("  {}", s.title.apply_to("\u{2550}\u{2550}\u{2550}\u{2550}\u{2550}\u{2550}\u{2550}\u{2550}\u{2550}\u{2550}\u{2550}\u{2550}\u{2550}\u{2550}\u{2550}\u{2550}\u{2550}\u{2550}"));
    println!();

    println!(
        "  {:<16}{}",
        s.label.apply_to("Templates"),
        s.path.apply_to(&params.template_pattern)
    );
    println!(
        "  {:<16}{}",
        s.label.apply_to("Frames"),
        s.value.apply_to(frame_count)
    );
    match &params.reference {
        Some(path) => println!(
            "  {:<16}{}",
            s.label.apply_to("Reference"),
            s.path.apply_to(path.display())
        ),
        None => println!(
            "  {:<16}{}",
            s.label.apply_to("Reference"),
            s.value.apply_to("first frame")
        ),
    }

    println!();
    println!(
        "  {:<16}{}",
        s.label.apply_to("Similarity"),
        s.method.apply_to(match reg.similarity {
            Similarity::Ssd => "sum of squared differences",
            Similarity::Ncc => "normalized cross-correlation",
        })
    );
    println!(
        "  {:<16}{}",
        s.label.apply_to("Lambda"),
        s.value.apply_to(reg.lambda)
    );
    let stop = reg
        .stop_level
        .map(|l| l.to_string())
        .unwrap_or_else(|| "finest".into());
    println!(
        "  {:<16}{} .. {}",
        s.label.apply_to("Levels"),
        s.value.apply_to(reg.start_level),
        s.value.apply_to(stop)
    );
    if let Some(alt) = reg.alt_start_level {
        println!(
            "  {:<16}{}",
            s.label.apply_to("Alt start"),
            s.value.apply_to(alt)
        );
    }
    println!(
        "  {:<16}{}",
        s.label.apply_to("Chaining"),
        s.method.apply_to(match params.series.chain {
            ChainStrategy::Direct => "direct",
            ChainStrategy::ChainedRefined => "chained + refined",
        })
    );
    println!(
        "  {:<16}{}",
        s.label.apply_to("Roles"),
        if params.series.reverse_roles {
            s.method.apply_to("reversed (scatter averaging)")
        } else {
            s.value.apply_to("reference fixed")
        }
    );
    println!(
        "  {:<16}{}",
        s.label.apply_to("Inverses"),
        if params.series.compute_inverse {
            s.method.apply_to("enabled")
        } else {
            s.disabled.apply_to("disabled")
        }
    );
    println!(
        "  {:<16}{}",
        s.label.apply_to("Reduction"),
        if params.series.reduce_deformations {
            s.method.apply_to("enabled")
        } else {
            s.disabled.apply_to("disabled")
        }
    );
    println!(
        "  {:<16}{}",
        s.label.apply_to("Stages"),
        s.value.apply_to(1 + params.stages.extra_stages)
    );
    if params.average.super_resolution_factor > 1 {
        println!(
            "  {:<16}{}x",
            s.label.apply_to("Super-res"),
            s.value.apply_to(params.average.super_resolution_factor)
        );
    }
    println!();
}
