//! Deformation statistics: split each field into a rigid translation and the
//! non-rigid remainder.
//!
//! The translation part tracks specimen drift between frames; the non-rigid
//! remainder measures scan distortion, the quantity registration exists to
//! correct. Both are reported per frame and aggregated over the series.

use tracing::info;

use crate::error::{Result, SerialignError};
use crate::field::DeformationField;

/// Statistics for a single deformation.
#[derive(Clone, Copy, Debug)]
pub struct FrameStats {
    pub index: usize,
    /// Mean displacement, unit coordinates.
    pub translation: (f64, f64),
    pub translation_magnitude: f64,
    /// Mean of the pointwise norm after removing the translation.
    pub non_rigid_mean: f64,
    /// Maximum of the pointwise norm after removing the translation.
    pub non_rigid_max: f64,
}

/// Aggregates over a whole series.
#[derive(Clone, Copy, Debug)]
pub struct SeriesStats {
    pub mean_translation_magnitude: f64,
    pub mean_non_rigid: f64,
    pub max_non_rigid: f64,
    /// Non-rigid mean over translation magnitude, averaged per frame.
    /// Large values mean drift correction alone would not align the series.
    pub non_rigid_ratio: f64,
}

#[derive(Clone, Debug)]
pub struct DeformationAnalysis {
    pub frames: Vec<FrameStats>,
    pub series: SeriesStats,
}

pub fn analyze_frame(index: usize, field: &DeformationField) -> FrameStats {
    let (tx, ty) = field.mean_translation();

    let mut residual = field.clone();
    for v in residual.dx.iter_mut() {
        *v -= tx;
    }
    for v in residual.dy.iter_mut() {
        *v -= ty;
    }
    let pointwise = residual.pointwise_norm();
    let non_rigid_mean = pointwise.iter().sum::<f64>() / pointwise.len() as f64;
    let non_rigid_max = pointwise.iter().fold(0.0f64, |acc, &v| acc.max(v));

    FrameStats {
        index,
        translation: (tx, ty),
        translation_magnitude: (tx * tx + ty * ty).sqrt(),
        non_rigid_mean,
        non_rigid_max,
    }
}

/// Analyze a whole series of deformations.
pub fn analyze_deformations(fields: &[DeformationField]) -> Result<DeformationAnalysis> {
    if fields.is_empty() {
        return Err(SerialignError::EmptySequence);
    }

    let frames: Vec<FrameStats> = fields
        .iter()
        .enumerate()
        .map(|(index, field)| analyze_frame(index, field))
        .collect();

    let count = frames.len() as f64;
    let mean_translation_magnitude =
        frames.iter().map(|f| f.translation_magnitude).sum::<f64>() / count;
    let mean_non_rigid = frames.iter().map(|f| f.non_rigid_mean).sum::<f64>() / count;
    let max_non_rigid = frames.iter().fold(0.0f64, |acc, f| acc.max(f.non_rigid_max));
    let non_rigid_ratio = frames
        .iter()
        .map(|f| {
            if f.translation_magnitude > 0.0 {
                f.non_rigid_mean / f.translation_magnitude
            } else {
                0.0
            }
        })
        .sum::<f64>()
        / count;

    for f in &frames {
        info!(
            index = f.index,
            tx = f.translation.0,
            ty = f.translation.1,
            non_rigid_mean = f.non_rigid_mean,
            non_rigid_max = f.non_rigid_max,
            "deformation analyzed"
        );
    }
    info!(
        mean_translation_magnitude,
        mean_non_rigid, max_non_rigid, non_rigid_ratio, "series statistics"
    );

    Ok(DeformationAnalysis {
        frames,
        series: SeriesStats {
            mean_translation_magnitude,
            mean_non_rigid,
            max_non_rigid,
            non_rigid_ratio,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::GridHierarchy;
    use approx::assert_relative_eq;

    #[test]
    fn pure_translation_has_no_non_rigid_part() {
        let grid = *GridHierarchy::for_image(9, 9).unwrap().finest();
        let mut field = DeformationField::identity(&grid);
        field.dx.fill(0.25);
        field.dy.fill(-0.125);

        let stats = analyze_frame(0, &field);
        assert_relative_eq!(stats.translation.0, 0.25, epsilon = 1e-12);
        assert_relative_eq!(stats.translation.1, -0.125, epsilon = 1e-12);
        assert!(stats.non_rigid_mean < 1e-12);
        assert!(stats.non_rigid_max < 1e-12);
    }

    #[test]
    fn linear_shear_is_entirely_non_rigid_after_centering() {
        let grid = *GridHierarchy::for_image(5, 5).unwrap().finest();
        let mut field = DeformationField::identity(&grid);
        for row in 0..5 {
            for col in 0..5 {
                field.dx[[row, col]] = col as f64 * 0.01;
            }
        }
        let stats = analyze_frame(0, &field);
        assert_relative_eq!(stats.translation.0, 0.02, epsilon = 1e-12);
        assert!(stats.non_rigid_max > 0.019);
    }
}
