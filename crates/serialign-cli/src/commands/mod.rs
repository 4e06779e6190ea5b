pub mod analyze;
pub mod apply;
pub mod average;
pub mod params;
pub mod register;
pub mod series;

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use ndarray::Array2;
use serialign_core::io::load_image;

/// Expand a printf-style index pattern (`frame_%03d.png`, `img%d.tif`).
pub fn expand_pattern(pattern: &str, index: usize) -> Result<PathBuf> {
    if let Some(start) = pattern.find('%') {
        let rest = &pattern[start + 1..];
        let digits_end = rest
            .find('d')
            .with_context(|| format!("pattern `{pattern}` has `%` without `d`"))?;
        let width_spec = &rest[..digits_end];
        let width: usize = if width_spec.is_empty() {
            1
        } else {
            width_spec
                .trim_start_matches('0')
                .parse()
                .unwrap_or(width_spec.len())
        };
        let formatted = format!("{index:0width$}");
        Ok(PathBuf::from(format!(
            "{}{}{}",
            &pattern[..start],
            formatted,
            &rest[digits_end + 1..]
        )))
    } else {
        bail!("pattern `{pattern}` contains no `%d` placeholder")
    }
}

/// Load `count` frames starting at `first_index` by expanding `pattern`.
pub fn load_frames(pattern: &str, first_index: usize, count: usize) -> Result<Vec<Array2<f32>>> {
    if count == 0 {
        bail!("at least one template frame is required");
    }
    (0..count)
        .map(|offset| {
            let path = expand_pattern(pattern, first_index + offset)?;
            load_image(&path).with_context(|| format!("failed to load {}", path.display()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pattern_expansion_pads_width() {
        assert_eq!(
            expand_pattern("frame_%03d.png", 7).unwrap(),
            PathBuf::from("frame_007.png")
        );
        assert_eq!(
            expand_pattern("img%d.tif", 12).unwrap(),
            PathBuf::from("img12.tif")
        );
    }

    #[test]
    fn pattern_without_placeholder_is_rejected() {
        assert!(expand_pattern("frame.png", 0).is_err());
    }
}
