//! ERB mask application + deep filtering.
//!
//! Two-stage spectral correction:
//! 1. coarse: the band-domain mask is spread back to bins and multiplied in
//! 2. fine: the lowest `nb_df` bins are replaced by an order-`P` complex FIR
//!    over the last `P` masked frames, taps supplied per hop by the model
//!
//! History layout is lag-major: `hist[lag * nb_df + bin]`, lag 0 = current.
//! Coefficient layout is bin-major: `coefs[(bin * order + lag) * 2 + {0: re, 1: im}]`.

use crate::dsp::erb::ErbFilterbank;
use rustfft::num_complex::Complex;

/// Multiplies the spectrum by the back-projected band mask.
///
/// `bin_mask` is scratch (`bins` long) and holds the applied mask afterwards.
pub fn apply_erb_mask(
    spectrum: &mut [Complex<f32>],
    band_mask: &[f32],
    fb: &ErbFilterbank,
    bin_mask: &mut [f32],
) {
    fb.project_mask(band_mask, bin_mask);
    for (x, &m) in spectrum.iter_mut().zip(bin_mask.iter()) {
        *x *= m;
    }
}

#[derive(Clone, Debug)]
pub struct DeepFilter {
    nb_df: usize,
    order: usize,
    hist_re: Vec<f32>,
    hist_im: Vec<f32>,
    filled: usize,
    coefs: Vec<f32>,
}

impl DeepFilter {
    pub fn new(nb_df: usize, order: usize) -> Self {
        Self {
            nb_df,
            order,
            hist_re: vec![0.0; nb_df * order],
            hist_im: vec![0.0; nb_df * order],
            filled: 0,
            coefs: vec![0.0; nb_df * order * 2],
        }
    }

    pub fn nb_df(&self) -> usize {
        self.nb_df
    }

    pub fn order(&self) -> usize {
        self.order
    }

    /// Expected coefficient count per hop.
    pub fn coef_len(&self) -> usize {
        self.nb_df * self.order * 2
    }

    pub fn coefs(&self) -> &[f32] {
        &self.coefs
    }

    /// Frames currently held in history (saturates at `order`).
    pub fn filled(&self) -> usize {
        self.filled
    }

    pub fn is_warm(&self) -> bool {
        self.filled >= self.order
    }

    pub fn history_re(&self) -> &[f32] {
        &self.hist_re
    }

    pub fn history_im(&self) -> &[f32] {
        &self.hist_im
    }

    /// Replaces the taps. Returns `false` (taps left untouched) on a length mismatch.
    pub fn set_coefs(&mut self, coefs: &[f32]) -> bool {
        if coefs.len() != self.coefs.len() {
            return false;
        }
        self.coefs.copy_from_slice(coefs);
        true
    }

    /// Pushes the current masked low band into history at lag 0.
    pub fn push_history(&mut self, spectrum: &[Complex<f32>]) {
        let n = self.nb_df;
        if n == 0 || self.order == 0 {
            return;
        }
        self.hist_re.copy_within(0..(self.order - 1) * n, n);
        self.hist_im.copy_within(0..(self.order - 1) * n, n);
        for (k, x) in spectrum.iter().take(n).enumerate() {
            self.hist_re[k] = x.re;
            self.hist_im[k] = x.im;
        }
        if self.filled < self.order {
            self.filled += 1;
        }
    }

    /// Runs the FIR over the low band. Returns whether it was applied.
    ///
    /// Inactive until `order` frames are in history, or when this hop's
    /// taps were unavailable (`coefs_fresh == false`).
    pub fn apply(&self, spectrum: &mut [Complex<f32>], coefs_fresh: bool) -> bool {
        if !coefs_fresh || !self.is_warm() || self.order == 0 {
            return false;
        }
        let n = self.nb_df;
        for (k, x) in spectrum.iter_mut().take(n).enumerate() {
            let mut out_re = 0.0f32;
            let mut out_im = 0.0f32;
            let base = k * self.order * 2;
            for lag in 0..self.order {
                let h_re = self.coefs[base + lag * 2];
                let h_im = self.coefs[base + lag * 2 + 1];
                let x_re = self.hist_re[lag * n + k];
                let x_im = self.hist_im[lag * n + k];
                out_re += h_re * x_re - h_im * x_im;
                out_im += h_re * x_im + h_im * x_re;
            }
            *x = Complex::new(out_re, out_im);
        }
        true
    }

    pub fn reset(&mut self) {
        self.hist_re.fill(0.0);
        self.hist_im.fill(0.0);
        self.coefs.fill(0.0);
        self.filled = 0;
    }
}
