use ndarray::Array2;
use tracing::warn;

use crate::consts::EPSILON;
use crate::error::{Result, SerialignError};
use crate::field::DeformationField;

use super::{for_each_quad_sample, EnergyContext, SimilarityMeasure, SimilarityValue};

/// One minus the normalized cross-correlation between the reference and the
/// deformed template:
///
/// `E = 1 - sum(w r t) / sqrt(sum(w r^2) * sum(w t^2))`
///
/// where `r`/`t` are the quadrature-weighted, mean-centered intensities,
/// with means and variances taken over the deformation's region of validity
/// only. Invariant to affine intensity rescaling of either image; 0 at a
/// perfect match.
pub struct Ncc;

/// Weighted running statistics over the valid quadrature samples.
struct NccStats {
    mean_r: f64,
    mean_t: f64,
    sum_rr: f64,
    sum_tt: f64,
    sum_rt: f64,
    valid_samples: usize,
}

impl NccStats {
    fn gather(ctx: &EnergyContext, phi: &DeformationField) -> Result<Self> {
        let mut sum_w = 0.0;
        let mut sum_r = 0.0;
        let mut sum_t = 0.0;
        let mut valid_samples = 0usize;
        for_each_quad_sample(ctx, phi, |sample| {
            if let Some((t, _, _)) = sample.warped {
                sum_w += sample.weight;
                sum_r += sample.weight * sample.reference;
                sum_t += sample.weight * t;
                valid_samples += 1;
            }
        });
        if valid_samples == 0 {
            return Err(SerialignError::EmptyOverlap);
        }

        let mean_r = sum_r / sum_w;
        let mean_t = sum_t / sum_w;
        let mut sum_rr = 0.0;
        let mut sum_tt = 0.0;
        let mut sum_rt = 0.0;
        for_each_quad_sample(ctx, phi, |sample| {
            if let Some((t, _, _)) = sample.warped {
                let r = sample.reference - mean_r;
                let t = t - mean_t;
                sum_rr += sample.weight * r * r;
                sum_tt += sample.weight * t * t;
                sum_rt += sample.weight * r * t;
            }
        });
        Ok(Self {
            mean_r,
            mean_t,
            sum_rr,
            sum_tt,
            sum_rt,
            valid_samples,
        })
    }

    /// Correlation coefficient, `None` when either image is constant over
    /// the overlap and the correlation is undefined.
    fn ncc(&self) -> Option<f64> {
        let denom = (self.sum_rr * self.sum_tt).sqrt();
        if denom < EPSILON {
            None
        } else {
            Some(self.sum_rt / denom)
        }
    }
}

impl SimilarityMeasure for Ncc {
    fn name(&self) -> &'static str {
        "ncc"
    }

    fn evaluate(&self, ctx: &EnergyContext, phi: &DeformationField) -> Result<SimilarityValue> {
        let stats = NccStats::gather(ctx, phi)?;
        let value = match stats.ncc() {
            Some(ncc) => 1.0 - ncc,
            None => {
                warn!("NCC undefined over the overlap (constant image), treating as uncorrelated");
                1.0
            }
        };
        Ok(SimilarityValue {
            value,
            valid_samples: stats.valid_samples,
        })
    }

    fn add_gradient(
        &self,
        ctx: &EnergyContext,
        phi: &DeformationField,
        grad_x: &mut Array2<f64>,
        grad_y: &mut Array2<f64>,
    ) -> Result<()> {
        let stats = NccStats::gather(ctx, phi)?;
        let Some(ncc) = stats.ncc() else {
            // Flat overlap: no correlation signal, zero gradient.
            return Ok(());
        };
        let sigma_r = stats.sum_rr.sqrt();
        let sigma_t = stats.sum_tt.sqrt();

        // dE/d(T o phi) at each sample, chained through the template's
        // intensity gradient onto the cell's nodes. The mean-shift terms
        // vanish because the centered sums are zero.
        for_each_quad_sample(ctx, phi, |sample| {
            if let Some((t, gx, gy)) = sample.warped {
                let r = sample.reference - stats.mean_r;
                let t = t - stats.mean_t;
                let d_corr = r / (sigma_r * sigma_t) - ncc * t / stats.sum_tt;
                let factor = -sample.weight * d_corr;
                for (i, &(nr, nc)) in sample.nodes.iter().enumerate() {
                    grad_x[[nr, nc]] += factor * gx * sample.basis_values[i];
                    grad_y[[nr, nc]] += factor * gy * sample.basis_values[i];
                }
            }
        });
        Ok(())
    }
}
