//! Real-time DeepFilterNet-style speech denoiser core.
//!
//! Mono 48 kHz audio is processed in 10 ms hops: STFT analysis, ERB and
//! complex features, a model (behind [`inference::ModelRunner`]) predicting
//! a band mask and deep-filter taps, spectral correction, overlap-add
//! synthesis, then an adaptive dry/wet mix that backs off whenever inference
//! fails or runs late.
//!
//! - [`DeepFilterEngine`] works one hop at a time, for hosts that already
//!   frame their audio.
//! - [`DfnStream`] takes arbitrary-length input and handles the framing.
//!
//! ```ignore
//! let engine = DeepFilterEngine::from_model(Some(Path::new("models/dfn3")), None, DfnParams::default());
//! let mut stream = DfnStream::new(engine);
//! let enhanced = stream.process(&chunk);
//! let tail = stream.flush();
//! ```

pub mod adapter;
pub mod config;
pub mod control;
pub mod dsp;
pub mod engine;
pub mod inference;
pub mod meters;

pub use adapter::FrameAdapter;
pub use config::{ConfigError, DfnConfig, DfnParams};
pub use engine::DeepFilterEngine;
pub use inference::{InferenceError, InferenceMode, ModelRunner, SharedRunner, SlotPolicy};
pub use meters::{DfnStats, Meters};

/// Arbitrary-length streaming wrapper around [`DeepFilterEngine`].
pub struct DfnStream {
    engine: DeepFilterEngine,
    adapter: FrameAdapter,
    hop_in: Vec<f32>,
    hop_out: Vec<f32>,
}

impl DfnStream {
    pub fn new(engine: DeepFilterEngine) -> Self {
        let hop = engine.hop_size();
        Self {
            adapter: FrameAdapter::new(hop),
            hop_in: vec![0.0; hop],
            hop_out: vec![0.0; hop],
            engine,
        }
    }

    /// Processes `input` and returns every completed hop. Leftover samples
    /// wait for the next call (or [`flush`](Self::flush)).
    pub fn process(&mut self, input: &[f32]) -> Vec<f32> {
        let hop = self.engine.hop_size();
        let mut output = Vec::with_capacity((input.len() / hop + 1) * hop);
        let mut rest = input;
        loop {
            let taken = self.adapter.push(rest);
            rest = &rest[taken..];
            while self.adapter.pop_hop(&mut self.hop_in) {
                self.engine.process_hop(&self.hop_in, &mut self.hop_out);
                output.extend_from_slice(&self.hop_out);
            }
            if rest.is_empty() {
                break;
            }
        }
        output
    }

    /// Zero-pads the partial hop still buffered and returns its valid part.
    pub fn flush(&mut self) -> Vec<f32> {
        let valid = self.adapter.drain_into(&mut self.hop_in);
        if valid == 0 {
            return Vec::new();
        }
        self.hop_in[valid..].fill(0.0);
        self.engine.process_hop(&self.hop_in, &mut self.hop_out);
        self.hop_out[..valid].to_vec()
    }

    pub fn reset(&mut self) {
        self.engine.reset();
        self.adapter.clear();
    }

    /// Reconfigures for `rate`. Pending samples are dropped.
    pub fn set_sample_rate(&mut self, rate: usize) {
        self.engine.set_sample_rate(rate);
        let hop = self.engine.hop_size();
        self.adapter = FrameAdapter::new(hop);
        self.hop_in = vec![0.0; hop];
        self.hop_out = vec![0.0; hop];
    }

    pub fn engine(&self) -> &DeepFilterEngine {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut DeepFilterEngine {
        &mut self.engine
    }

    /// Samples buffered but not yet processed.
    pub fn pending(&self) -> usize {
        self.adapter.available()
    }

    /// Delay through the spectral path, in samples. Framing adds up to one hop.
    pub fn latency_samples(&self) -> usize {
        self.engine.latency_samples()
    }
}
