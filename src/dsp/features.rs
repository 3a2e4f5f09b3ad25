//! Per-hop model features.
//!
//! - ERB features: `ln(1e-6 + sum_k fb[b, k] * |X[k]|)` per band
//! - spectral features: real parts of the first `nb_df` bins followed by
//!   their imaginary parts (planar, matching a `[1, 2, 1, nb_df]` tensor)

use crate::dsp::erb::ErbFilterbank;
use crate::dsp::utils::LOG_FLOOR;
use rustfft::num_complex::Complex;

#[derive(Clone, Debug)]
pub struct FeatureExtractor {
    nb_df: usize,
    magnitude: Vec<f32>,
    feat_erb: Vec<f32>,
    feat_spec: Vec<f32>,
}

impl FeatureExtractor {
    pub fn new(bins: usize, nb_erb: usize, nb_df: usize) -> Self {
        Self {
            nb_df,
            magnitude: vec![0.0; bins],
            feat_erb: vec![0.0; nb_erb],
            feat_spec: vec![0.0; nb_df * 2],
        }
    }

    pub fn extract(&mut self, spectrum: &[Complex<f32>], fb: &ErbFilterbank) {
        for (m, c) in self.magnitude.iter_mut().zip(spectrum.iter()) {
            *m = c.norm();
        }

        fb.pool(&self.magnitude, &mut self.feat_erb);
        for v in self.feat_erb.iter_mut() {
            *v = (LOG_FLOOR + *v).ln();
        }

        let (re, im) = self.feat_spec.split_at_mut(self.nb_df);
        for ((r, i), c) in re.iter_mut().zip(im.iter_mut()).zip(spectrum.iter()) {
            *r = c.re;
            *i = c.im;
        }
    }

    pub fn magnitude(&self) -> &[f32] {
        &self.magnitude
    }

    pub fn feat_erb(&self) -> &[f32] {
        &self.feat_erb
    }

    pub fn feat_spec(&self) -> &[f32] {
        &self.feat_spec
    }

    pub fn reset(&mut self) {
        self.magnitude.fill(0.0);
        self.feat_erb.fill(0.0);
        self.feat_spec.fill(0.0);
    }
}
