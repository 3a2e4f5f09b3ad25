//! ERB Filterbank
//!
//! Triangular filters spaced uniformly on the ERB scale between 0 Hz and
//! Nyquist. Used twice per hop: to pool bin magnitudes into band features,
//! and to spread the band-domain mask back onto FFT bins.
//!
//! The matrix is dense (`nb_erb x bins`, row-major). With the default 32
//! bands over 481 bins that is ~15k floats, small enough that sparse storage
//! buys nothing.

use crate::dsp::utils::BIN_SUM_EPS;

/// Hz -> ERB-rate.
#[inline]
pub fn erb_scale(f: f32) -> f32 {
    21.4 * (1.0 + 0.00437 * f).log10()
}

/// ERB-rate -> Hz.
#[inline]
pub fn inv_erb_scale(erb: f32) -> f32 {
    (10.0f32.powf(erb / 21.4) - 1.0) / 0.00437
}

#[derive(Clone, Debug)]
pub struct ErbFilterbank {
    nb_erb: usize,
    bins: usize,
    /// Row-normalised weights, `nb_erb * bins`.
    filters: Vec<f32>,
    /// Column sums of `filters`, floored to 1 where effectively empty.
    bin_sum: Vec<f32>,
}

impl ErbFilterbank {
    pub fn new(sample_rate: usize, fft_size: usize, nb_erb: usize) -> Self {
        let bins = fft_size / 2 + 1;
        let mut filters = vec![0.0f32; nb_erb * bins];
        let mut bin_sum = vec![0.0f32; bins];

        let nyquist = sample_rate as f32 * 0.5;
        let erb_min = erb_scale(0.0);
        let erb_max = erb_scale(nyquist);
        let edges: Vec<f32> = (0..nb_erb + 2)
            .map(|i| {
                let t = i as f32 / (nb_erb + 1) as f32;
                inv_erb_scale(erb_min + t * (erb_max - erb_min))
            })
            .collect();

        let bin_hz = sample_rate as f32 / fft_size.max(1) as f32;
        for b in 0..nb_erb {
            let lower = edges[b];
            let center = edges[b + 1];
            let upper = edges[b + 2];
            let row = &mut filters[b * bins..(b + 1) * bins];

            let mut sum = 0.0f32;
            for (k, w) in row.iter_mut().enumerate() {
                let f = k as f32 * bin_hz;
                *w = if f >= lower && f <= center && center > lower {
                    (f - lower) / (center - lower)
                } else if f > center && f <= upper && upper > center {
                    (upper - f) / (upper - center)
                } else {
                    0.0
                };
                sum += *w;
            }

            // Empty bands stay all-zero.
            if sum > 0.0 {
                for w in row.iter_mut() {
                    *w /= sum;
                }
            }
            for (acc, &w) in bin_sum.iter_mut().zip(row.iter()) {
                *acc += w;
            }
        }

        for s in bin_sum.iter_mut() {
            if *s <= BIN_SUM_EPS {
                *s = 1.0;
            }
        }

        Self {
            nb_erb,
            bins,
            filters,
            bin_sum,
        }
    }

    pub fn nb_erb(&self) -> usize {
        self.nb_erb
    }

    pub fn bins(&self) -> usize {
        self.bins
    }

    #[inline]
    pub fn row(&self, band: usize) -> &[f32] {
        &self.filters[band * self.bins..(band + 1) * self.bins]
    }

    pub fn bin_sum(&self) -> &[f32] {
        &self.bin_sum
    }

    /// Weighted band sums of a per-bin quantity (`out.len() == nb_erb`).
    pub fn pool(&self, per_bin: &[f32], out: &mut [f32]) {
        debug_assert_eq!(per_bin.len(), self.bins);
        for (b, o) in out.iter_mut().enumerate().take(self.nb_erb) {
            *o = self
                .row(b)
                .iter()
                .zip(per_bin.iter())
                .map(|(w, v)| w * v)
                .sum();
        }
    }

    /// Spreads a band mask back onto bins, clamped to `[0, 2]`.
    pub fn project_mask(&self, band_mask: &[f32], bin_mask: &mut [f32]) {
        debug_assert_eq!(bin_mask.len(), self.bins);
        bin_mask.fill(0.0);
        for (b, &m) in band_mask.iter().enumerate().take(self.nb_erb) {
            for (acc, &w) in bin_mask.iter_mut().zip(self.row(b).iter()) {
                *acc += w * m;
            }
        }
        for (m, &denom) in bin_mask.iter_mut().zip(self.bin_sum.iter()) {
            *m = (*m / denom).clamp(0.0, 2.0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_erb_scale_roundtrip() {
        for &f in &[0.0f32, 100.0, 1000.0, 8000.0, 24000.0] {
            let back = inv_erb_scale(erb_scale(f));
            assert!((back - f).abs() < 0.05 * f.max(1.0), "{} -> {}", f, back);
        }
    }

    #[test]
    fn test_rows_sum_to_one() {
        let fb = ErbFilterbank::new(48000, 960, 32);
        for b in 0..fb.nb_erb() {
            let sum: f32 = fb.row(b).iter().sum();
            if sum > 0.0 {
                assert!((sum - 1.0).abs() < 1e-5, "band {} sums to {}", b, sum);
            }
        }
    }

    #[test]
    fn test_weights_non_negative() {
        let fb = ErbFilterbank::new(48000, 960, 32);
        for b in 0..fb.nb_erb() {
            assert!(fb.row(b).iter().all(|&w| w >= 0.0));
        }
    }

    #[test]
    fn test_degenerate_bands_stay_zero() {
        // Far more bands than bins: some triangles fall between bin centres.
        let fb = ErbFilterbank::new(48000, 16, 40);
        let mut empty = 0;
        for b in 0..fb.nb_erb() {
            let sum: f32 = fb.row(b).iter().sum();
            if sum == 0.0 {
                empty += 1;
            } else {
                assert!((sum - 1.0).abs() < 1e-5);
            }
        }
        assert!(empty > 0);
        assert!(fb.bin_sum().iter().all(|&s| s > 0.0));
    }

    #[test]
    fn test_unit_mask_projects_to_unity() {
        let fb = ErbFilterbank::new(48000, 960, 32);
        let band_mask = vec![1.0f32; 32];
        let mut bin_mask = vec![0.0f32; fb.bins()];
        fb.project_mask(&band_mask, &mut bin_mask);
        // Interior bins are covered by at least one band.
        for &m in &bin_mask[1..fb.bins() - 1] {
            assert!((m - 1.0).abs() < 1e-4, "mask {}", m);
        }
    }

    #[test]
    fn test_mask_bounded_for_wild_inputs() {
        let fb = ErbFilterbank::new(48000, 960, 32);
        let band_mask: Vec<f32> = (0..32)
            .map(|b| if b % 2 == 0 { 50.0 } else { -50.0 })
            .collect();
        let mut bin_mask = vec![0.0f32; fb.bins()];
        fb.project_mask(&band_mask, &mut bin_mask);
        assert!(bin_mask.iter().all(|&m| (0.0..=2.0).contains(&m)));
    }
}
