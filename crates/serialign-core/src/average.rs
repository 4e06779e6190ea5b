//! Fuse registered frames into a denoised composite.
//!
//! Forward mode warps every template into reference coordinates and combines
//! the stack per pixel. Reverse mode scatters each template pixel through its
//! forward-deformed position onto the output grid, optionally at a
//! super-resolution factor. Both modes track a per-pixel sample-count map,
//! the primary diagnostic for registration coverage quality.

use ndarray::Array2;
use rayon::prelude::*;
use tracing::{debug, warn};

use crate::config::AverageConfig;
use crate::consts::PARALLEL_PIXEL_THRESHOLD;
use crate::error::{Result, SerialignError};
use crate::field::{finite_mean, sample_image, DeformationField};
use crate::grid::Grid;

/// Averaged composite, per-pixel median, and sample-count map.
#[derive(Clone, Debug)]
pub struct AverageResult {
    pub average: Array2<f32>,
    pub median: Array2<f32>,
    pub num_samples: Array2<f32>,
}

fn check_inputs(frames: &[Array2<f32>], deformations: &[DeformationField]) -> Result<()> {
    if frames.is_empty() {
        return Err(SerialignError::EmptySequence);
    }
    if frames.len() != deformations.len() {
        return Err(SerialignError::Config(format!(
            "{} frames but {} deformations",
            frames.len(),
            deformations.len()
        )));
    }
    let depth = deformations[0].depth;
    for d in deformations {
        if d.depth != depth {
            return Err(SerialignError::GridDepthMismatch {
                expected: depth,
                actual: d.depth,
            });
        }
    }
    Ok(())
}

/// Forward mode: resample every frame through its deformation into reference
/// coordinates, then combine per pixel.
///
/// `weights` optionally weights frames in the mean and median. Pixels with
/// zero in-domain samples fall back to the last frame's mean intensity so
/// the composite has no holes.
pub fn average_forward(
    frames: &[Array2<f32>],
    deformations: &[DeformationField],
    weights: Option<&[f64]>,
) -> Result<AverageResult> {
    check_inputs(frames, deformations)?;
    if let Some(w) = weights {
        if w.len() != frames.len() {
            return Err(SerialignError::Config(format!(
                "{} frames but {} weights",
                frames.len(),
                w.len()
            )));
        }
    }

    let warped: Vec<Array2<f32>> = frames
        .iter()
        .zip(deformations.iter())
        .map(|(frame, phi)| phi.warp_image(frame))
        .collect::<Result<_>>()?;

    let (h, w) = warped[0].dim();
    let fallback = finite_mean(&frames[frames.len() - 1]);
    let frame_weights: Vec<f32> = match weights {
        Some(ws) => ws.iter().map(|&v| v as f32).collect(),
        None => vec![1.0; frames.len()],
    };

    let combine_row = |row: usize| -> (Vec<f32>, Vec<f32>, Vec<f32>) {
        let mut avg_row = vec![0.0f32; w];
        let mut med_row = vec![0.0f32; w];
        let mut count_row = vec![0.0f32; w];
        let mut samples: Vec<(f32, f32)> = Vec::with_capacity(warped.len());
        for col in 0..w {
            samples.clear();
            for (image, &weight) in warped.iter().zip(frame_weights.iter()) {
                let v = image[[row, col]];
                if v.is_finite() {
                    samples.push((v, weight));
                }
            }
            count_row[col] = samples.len() as f32;
            if samples.is_empty() {
                avg_row[col] = fallback;
                med_row[col] = fallback;
            } else {
                avg_row[col] = weighted_mean(&samples);
                med_row[col] = weighted_median(&mut samples);
            }
        }
        (avg_row, med_row, count_row)
    };

    let rows: Vec<(Vec<f32>, Vec<f32>, Vec<f32>)> = if h * w >= PARALLEL_PIXEL_THRESHOLD {
        (0..h).into_par_iter().map(combine_row).collect()
    } else {
        (0..h).map(combine_row).collect()
    };

    let mut average = Array2::<f32>::zeros((h, w));
    let mut median = Array2::<f32>::zeros((h, w));
    let mut num_samples = Array2::<f32>::zeros((h, w));
    for (row, (avg_row, med_row, count_row)) in rows.into_iter().enumerate() {
        for col in 0..w {
            average[[row, col]] = avg_row[col];
            median[[row, col]] = med_row[col];
            num_samples[[row, col]] = count_row[col];
        }
    }

    let holes = num_samples.iter().filter(|&&c| c == 0.0).count();
    if holes > 0 {
        warn!(holes, "output pixels received no in-domain samples");
    }

    Ok(AverageResult {
        average,
        median,
        num_samples,
    })
}

/// Reverse mode: scatter each source pixel to its forward-deformed position
/// on the output grid.
///
/// With `config.weighted` each sample splats over the nearest 4 output nodes
/// with bilinear weights; otherwise it lands on the rounded node. Output
/// nodes that receive no sample are seeded from an interpolated reference
/// value, so their count stays 1 rather than 0.
pub fn average_reverse(
    frames: &[Array2<f32>],
    deformations: &[DeformationField],
    reference: &Array2<f32>,
    config: &AverageConfig,
) -> Result<AverageResult> {
    check_inputs(frames, deformations)?;
    config.validate()?;

    let (h, w) = frames[0].dim();
    let factor = config.super_resolution_factor;
    let (out_h, out_w) = (h * factor, w * factor);

    let mut samples: Vec<Vec<(f32, f32)>> = vec![Vec::new(); out_h * out_w];

    for (frame, phi) in frames.iter().zip(deformations.iter()) {
        if frame.dim() != (h, w) {
            return Err(SerialignError::Config("frame size mismatch".into()));
        }
        if phi.shape() != (h, w) {
            let (field_h, field_w) = phi.shape();
            return Err(SerialignError::GridSizeMismatch {
                field_h,
                field_w,
                grid_h: h,
                grid_w: w,
            });
        }
        for row in 0..h {
            for col in 0..w {
                let value = frame[[row, col]];
                let exact_x = (col as f64 + phi.dx[[row, col]] * (w - 1) as f64) * factor as f64;
                let exact_y = (row as f64 + phi.dy[[row, col]] * (h - 1) as f64) * factor as f64;

                if config.weighted {
                    splat_bilinear(&mut samples, out_h, out_w, exact_y, exact_x, value);
                } else {
                    let out_col = exact_x.round() as i64;
                    let out_row = exact_y.round() as i64;
                    if (0..out_w as i64).contains(&out_col) && (0..out_h as i64).contains(&out_row)
                    {
                        samples[out_row as usize * out_w + out_col as usize].push((value, 1.0));
                    }
                }
            }
        }
    }

    // Seed empty nodes from the reference so the composite has no holes.
    let mut seeded = 0usize;
    for out_row in 0..out_h {
        for out_col in 0..out_w {
            let slot = &mut samples[out_row * out_w + out_col];
            if slot.is_empty() {
                let row_f = (out_row as f64 / factor as f64).min((h - 1) as f64);
                let col_f = (out_col as f64 / factor as f64).min((w - 1) as f64);
                let v = sample_image(reference, row_f, col_f)
                    .expect("clamped position is inside the reference");
                slot.push((v, 1.0));
                seeded += 1;
            }
        }
    }
    if seeded > 0 {
        debug!(seeded, "output nodes seeded from the reference image");
    }

    let mut average = Array2::<f32>::zeros((out_h, out_w));
    let mut median = Array2::<f32>::zeros((out_h, out_w));
    let mut num_samples = Array2::<f32>::zeros((out_h, out_w));
    for out_row in 0..out_h {
        for out_col in 0..out_w {
            let slot = &mut samples[out_row * out_w + out_col];
            num_samples[[out_row, out_col]] = slot.len() as f32;
            average[[out_row, out_col]] = weighted_mean(slot);
            median[[out_row, out_col]] = weighted_median(slot);
        }
    }

    Ok(AverageResult {
        average,
        median,
        num_samples,
    })
}

/// Distribute one scatter sample over the four nearest output nodes.
fn splat_bilinear(
    samples: &mut [Vec<(f32, f32)>],
    out_h: usize,
    out_w: usize,
    exact_y: f64,
    exact_x: f64,
    value: f32,
) {
    let base_col = exact_x.floor() as i64;
    let base_row = exact_y.floor() as i64;
    let fx = (exact_x - base_col as f64) as f32;
    let fy = (exact_y - base_row as f64) as f32;

    for (dr, wy) in [(0i64, 1.0 - fy), (1, fy)] {
        if wy <= 0.0 {
            continue;
        }
        for (dc, wx) in [(0i64, 1.0 - fx), (1, fx)] {
            if wx <= 0.0 {
                continue;
            }
            let r = base_row + dr;
            let c = base_col + dc;
            if (0..out_h as i64).contains(&r) && (0..out_w as i64).contains(&c) {
                samples[r as usize * out_w + c as usize].push((value, wx * wy));
            }
        }
    }
}

fn weighted_mean(samples: &[(f32, f32)]) -> f32 {
    let mut acc = 0.0f64;
    let mut weight_sum = 0.0f64;
    for &(v, w) in samples {
        acc += v as f64 * w as f64;
        weight_sum += w as f64;
    }
    if weight_sum == 0.0 {
        0.0
    } else {
        (acc / weight_sum) as f32
    }
}

/// Weighted median: smallest value whose cumulative weight reaches half the
/// total. Equal unit weights reduce to the ordinary median's lower element.
fn weighted_median(samples: &mut [(f32, f32)]) -> f32 {
    samples.sort_unstable_by(|a, b| a.0.total_cmp(&b.0));
    let total: f64 = samples.iter().map(|&(_, w)| w as f64).sum();
    let mut cumulative = 0.0f64;
    for &(v, w) in samples.iter() {
        cumulative += w as f64;
        if cumulative >= 0.5 * total {
            return v;
        }
    }
    samples.last().map(|&(v, _)| v).unwrap_or(0.0)
}

/// Identity deformations for `count` frames on `grid`, the no-alignment
/// baseline for averaging unregistered stacks.
pub fn identity_deformations(grid: &Grid, count: usize) -> Vec<DeformationField> {
    (0..count).map(|_| DeformationField::identity(grid)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::GridHierarchy;

    #[test]
    fn weighted_median_matches_plain_median_for_unit_weights() {
        let mut samples = vec![(3.0, 1.0), (1.0, 1.0), (2.0, 1.0)];
        assert_eq!(weighted_median(&mut samples), 2.0);
    }

    #[test]
    fn single_frame_identity_reproduces_frame() {
        let grid = *GridHierarchy::for_image(9, 9).unwrap().finest();
        let mut frame = Array2::<f32>::zeros((9, 9));
        for (i, v) in frame.iter_mut().enumerate() {
            *v = (i as f32) / 81.0;
        }
        let result = average_forward(
            &[frame.clone()],
            &[DeformationField::identity(&grid)],
            None,
        )
        .unwrap();
        assert_eq!(result.average, frame);
        assert!(result.num_samples.iter().all(|&c| c == 1.0));
    }
}
