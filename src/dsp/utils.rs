/// Floor added before the log in ERB features.
pub const LOG_FLOOR: f32 = 1e-6;

/// Per-bin ERB weight sums below this are treated as 1 during mask back-projection.
pub const BIN_SUM_EPS: f32 = 1e-6;

/// OLA normalisation entries below this are replaced by 1.
pub const OLA_NORM_EPS: f32 = 1e-6;

/// Saturator ceiling.
pub const SAT_CEILING: f32 = 0.98;

/// Linear blend from `a` to `b`; `t` is clamped to [0, 1].
pub fn lerp(a: f32, b: f32, t: f32) -> f32 {
    a + (b - a) * t.clamp(0.0, 1.0)
}

/// Symmetric Hann window (`N - 1` denominator).
pub fn make_hann_window(len: usize) -> Vec<f32> {
    if len < 2 {
        return vec![1.0; len];
    }
    let denom = (len - 1) as f32;
    (0..len)
        .map(|i| 0.5 - 0.5 * (2.0 * std::f32::consts::PI * i as f32 / denom).cos())
        .collect()
}

/// Square root of the Hann window, used for both analysis and synthesis.
pub fn make_sqrt_hann_window(len: usize) -> Vec<f32> {
    make_hann_window(len).into_iter().map(f32::sqrt).collect()
}

/// `0.98 * tanh(x / 0.98)`: bounded, smooth, near-identity for small inputs.
#[inline]
pub fn soft_saturate(x: f32) -> f32 {
    SAT_CEILING * (x / SAT_CEILING).tanh()
}
