use ndarray::Array2;

use crate::error::{Result, SerialignError};
use crate::field::DeformationField;

use super::{for_each_quad_sample, EnergyContext, SimilarityMeasure, SimilarityValue};

/// Sum of squared intensity differences between the reference and the
/// deformed template, `E = 1/2 * integral (T(x + phi(x)) - R(x))^2 dx`.
pub struct Ssd;

impl SimilarityMeasure for Ssd {
    fn name(&self) -> &'static str {
        "ssd"
    }

    fn evaluate(&self, ctx: &EnergyContext, phi: &DeformationField) -> Result<SimilarityValue> {
        let mut value = 0.0;
        let mut valid_samples = 0usize;
        for_each_quad_sample(ctx, phi, |sample| {
            if let Some((t, _, _)) = sample.warped {
                let diff = t - sample.reference;
                value += 0.5 * sample.weight * diff * diff;
                valid_samples += 1;
            }
        });
        if valid_samples == 0 {
            return Err(SerialignError::EmptyOverlap);
        }
        Ok(SimilarityValue {
            value,
            valid_samples,
        })
    }

    fn add_gradient(
        &self,
        ctx: &EnergyContext,
        phi: &DeformationField,
        grad_x: &mut Array2<f64>,
        grad_y: &mut Array2<f64>,
    ) -> Result<()> {
        let mut valid_samples = 0usize;
        for_each_quad_sample(ctx, phi, |sample| {
            if let Some((t, gx, gy)) = sample.warped {
                let factor = sample.weight * (t - sample.reference);
                for (i, &(nr, nc)) in sample.nodes.iter().enumerate() {
                    grad_x[[nr, nc]] += factor * gx * sample.basis_values[i];
                    grad_y[[nr, nc]] += factor * gy * sample.basis_values[i];
                }
                valid_samples += 1;
            }
        });
        if valid_samples == 0 {
            return Err(SerialignError::EmptyOverlap);
        }
        Ok(())
    }
}
