use ndarray::Array2;

/// Smooth synthetic specimen: a sum of low-frequency sinusoids over the unit
/// square, sampled at `n` x `n` nodes with an optional translation `(tx, ty)`
/// in unit coordinates. Sampling analytically keeps subpixel shifts exact.
pub fn sinusoid_image(n: usize, tx: f64, ty: f64) -> Array2<f32> {
    let mut image = Array2::<f32>::zeros((n, n));
    let h = 1.0 / (n - 1) as f64;
    for row in 0..n {
        for col in 0..n {
            let x = col as f64 * h + tx;
            let y = row as f64 * h + ty;
            let v = 0.5
                + 0.25 * (2.0 * std::f64::consts::PI * x).sin()
                + 0.15 * (2.0 * std::f64::consts::PI * y).cos()
                + 0.05 * (4.0 * std::f64::consts::PI * (x + y)).sin();
            image[[row, col]] = v as f32;
        }
    }
    image
}
