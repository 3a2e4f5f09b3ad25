//! STFT Analysis / Synthesis
//!
//! Sliding-buffer STFT with a square-root Hann window on both sides and
//! weighted overlap-add. Each hop:
//! - analysis: slide the time buffer left by `hop`, append the new hop,
//!   window, forward FFT, keep `fft_size / 2 + 1` bins
//! - synthesis: rebuild the Hermitian spectrum, inverse FFT, scale by
//!   `1 / fft_size`, window again, accumulate, emit the first `hop` OLA
//!   samples divided by the precomputed overlap normalisation, slide.
//!
//! With an untouched spectrum the output reproduces the input delayed by
//! `fft_size - hop_size` samples once `fft_size / hop_size - 1` hops have
//! passed.

use crate::dsp::utils::{make_sqrt_hann_window, OLA_NORM_EPS};
use rustfft::{num_complex::Complex, Fft, FftPlanner};
use std::sync::Arc;

pub struct StftEngine {
    fft_size: usize,
    hop_size: usize,
    bins: usize,

    fft_forward: Arc<dyn Fft<f32>>,
    fft_inverse: Arc<dyn Fft<f32>>,
    fft_scratch: Vec<Complex<f32>>,

    time_buffer: Vec<f32>,
    window: Vec<f32>,
    work: Vec<Complex<f32>>,

    ola: Vec<f32>,
    ola_norm: Vec<f32>,
}

impl StftEngine {
    pub fn new(fft_size: usize, hop_size: usize) -> Self {
        assert!(hop_size > 0, "hop size must be > 0");
        assert!(fft_size >= hop_size, "fft size must cover at least one hop");

        let mut planner = FftPlanner::<f32>::new();
        let fft_forward = planner.plan_fft_forward(fft_size);
        let fft_inverse = planner.plan_fft_inverse(fft_size);
        let scratch_len = fft_forward
            .get_inplace_scratch_len()
            .max(fft_inverse.get_inplace_scratch_len());

        let window = make_sqrt_hann_window(fft_size);

        // Sum of squared window taps landing on each emitted sample.
        let mut ola_norm = vec![0.0f32; hop_size];
        for (i, n) in ola_norm.iter_mut().enumerate() {
            let mut v = 0.0f32;
            let mut pos = i;
            while pos < fft_size {
                v += window[pos] * window[pos];
                pos += hop_size;
            }
            *n = if v < OLA_NORM_EPS { 1.0 } else { v };
        }

        Self {
            fft_size,
            hop_size,
            bins: fft_size / 2 + 1,
            fft_forward,
            fft_inverse,
            fft_scratch: vec![Complex::new(0.0, 0.0); scratch_len],
            time_buffer: vec![0.0; fft_size],
            window,
            work: vec![Complex::new(0.0, 0.0); fft_size],
            ola: vec![0.0; fft_size],
            ola_norm,
        }
    }

    pub fn fft_size(&self) -> usize {
        self.fft_size
    }

    pub fn hop_size(&self) -> usize {
        self.hop_size
    }

    pub fn bins(&self) -> usize {
        self.bins
    }

    pub fn window(&self) -> &[f32] {
        &self.window
    }

    /// Hops before the output settles.
    pub fn warmup_hops(&self) -> usize {
        (self.fft_size / self.hop_size).saturating_sub(1)
    }

    /// Delay between an input sample and its reconstruction.
    pub fn latency_samples(&self) -> usize {
        self.fft_size - self.hop_size
    }

    /// Pushes one hop and writes the half spectrum (`bins` values).
    pub fn analyze(&mut self, hop: &[f32], spectrum: &mut [Complex<f32>]) {
        debug_assert_eq!(hop.len(), self.hop_size);
        debug_assert_eq!(spectrum.len(), self.bins);

        let keep = self.fft_size - self.hop_size;
        self.time_buffer.copy_within(self.hop_size.., 0);
        self.time_buffer[keep..].copy_from_slice(hop);

        for ((w, &x), &win) in self
            .work
            .iter_mut()
            .zip(self.time_buffer.iter())
            .zip(self.window.iter())
        {
            *w = Complex::new(x * win, 0.0);
        }
        self.fft_forward
            .process_with_scratch(&mut self.work, &mut self.fft_scratch);

        spectrum.copy_from_slice(&self.work[..self.bins]);
    }

    /// Overlap-adds a processed half spectrum and emits one hop.
    pub fn synthesize(&mut self, spectrum: &[Complex<f32>], out: &mut [f32]) {
        debug_assert_eq!(spectrum.len(), self.bins);
        debug_assert_eq!(out.len(), self.hop_size);

        let n = self.fft_size;
        self.work[..self.bins].copy_from_slice(spectrum);
        self.work[0].im = 0.0;
        if n % 2 == 0 {
            self.work[n / 2].im = 0.0;
        }
        for k in 1..self.bins {
            let mirror = n - k;
            if mirror >= self.bins {
                self.work[mirror] = self.work[k].conj();
            }
        }

        self.fft_inverse
            .process_with_scratch(&mut self.work, &mut self.fft_scratch);

        let scale = 1.0 / n as f32;
        for ((acc, w), &win) in self
            .ola
            .iter_mut()
            .zip(self.work.iter())
            .zip(self.window.iter())
        {
            *acc += w.re * scale * win;
        }

        for ((o, &acc), &norm) in out
            .iter_mut()
            .zip(self.ola.iter())
            .zip(self.ola_norm.iter())
        {
            *o = acc / norm;
        }

        self.ola.copy_within(self.hop_size.., 0);
        let tail = n - self.hop_size;
        self.ola[tail..].fill(0.0);
    }

    pub fn reset(&mut self) {
        self.time_buffer.fill(0.0);
        self.ola.fill(0.0);
        self.work.fill(Complex::new(0.0, 0.0));
    }
}
