//! Per-hop denoising engine.
//!
//! One call to [`DeepFilterEngine::process_hop`] consumes exactly one hop of
//! mono 48 kHz audio and produces one hop of output:
//!
//! 1. core stage: STFT analysis, features, inference, mask + deep filter,
//!    synthesis (or the single model, or nothing)
//! 2. fallback: any hop the core could not process is the input, unchanged
//! 3. adaptive mix against the dry input
//! 4. optional one-pole post filter, then the soft saturator
//!
//! Allocation on the hop path is limited to the tensors exchanged with the
//! model runner.

use crate::config::{hop_for_rate, DfnConfig, DfnParams, SUPPORTED_SAMPLE_RATE};
use crate::control::MixController;
use crate::dsp::utils::lerp;
use crate::dsp::{apply_erb_mask, DeepFilter, ErbFilterbank, FeatureExtractor, PostConditioner, StftEngine};
use crate::inference::{InferenceError, InferenceMode, MultiStage};
use crate::meters::{DfnStats, Meters};
use rustfft::num_complex::Complex;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Wet amounts at or above this skip the dry blend.
const FULL_WET: f32 = 0.999;

pub type StatsListener = Box<dyn FnMut(&DfnStats) + Send>;

// =============================================================================
// Spectral core
// =============================================================================

/// DSP state for the multi-stage path.
struct SpectralCore {
    fb: ErbFilterbank,
    stft: StftEngine,
    features: FeatureExtractor,
    deep_filter: DeepFilter,
    spectrum: Vec<Complex<f32>>,
    band_mask: Vec<f32>,
    bin_mask: Vec<f32>,
    discard: Vec<f32>,
}

impl SpectralCore {
    fn new(cfg: &DfnConfig) -> Self {
        let bins = cfg.bins();
        Self {
            fb: ErbFilterbank::new(cfg.sr, cfg.fft_size, cfg.nb_erb),
            stft: StftEngine::new(cfg.fft_size, cfg.hop_size),
            features: FeatureExtractor::new(bins, cfg.nb_erb, cfg.nb_df),
            deep_filter: DeepFilter::new(cfg.nb_df, cfg.df_order),
            spectrum: vec![Complex::new(0.0, 0.0); bins],
            band_mask: vec![1.0; cfg.nb_erb],
            bin_mask: vec![1.0; bins],
            discard: vec![0.0; cfg.hop_size],
        }
    }

    /// Processes one hop through the multi-stage model.
    ///
    /// On error the mask, coefficients and filter history are untouched.
    /// The unmodified spectrum is still overlap-added so later hops stay
    /// aligned; those samples are dropped.
    fn process(
        &mut self,
        stage: &mut MultiStage,
        input: &[f32],
        out: &mut [f32],
    ) -> Result<(), InferenceError> {
        self.stft.analyze(input, &mut self.spectrum);
        self.features.extract(&self.spectrum, &self.fb);

        let outputs = match stage.run(self.features.feat_erb(), self.features.feat_spec()) {
            Ok(outputs) => outputs,
            Err(e) => {
                self.stft.synthesize(&self.spectrum, &mut self.discard);
                return Err(e);
            }
        };

        if outputs.erb_mask.len() == self.band_mask.len() {
            self.band_mask.copy_from_slice(&outputs.erb_mask);
        } else {
            self.band_mask.fill(1.0);
        }
        let coefs_fresh = match outputs.coefs.as_deref() {
            Some(c) => {
                let accepted = self.deep_filter.set_coefs(c);
                if !accepted {
                    log::trace!(
                        "DF decoder returned {} coefficients, expected {}; deep filter skipped",
                        c.len(),
                        self.deep_filter.coef_len()
                    );
                }
                accepted
            }
            None => false,
        };

        apply_erb_mask(&mut self.spectrum, &self.band_mask, &self.fb, &mut self.bin_mask);
        self.deep_filter.push_history(&self.spectrum);
        self.deep_filter.apply(&mut self.spectrum, coefs_fresh);

        self.stft.synthesize(&self.spectrum, out);
        Ok(())
    }

    fn reset(&mut self) {
        self.stft.reset();
        self.features.reset();
        self.deep_filter.reset();
        self.spectrum.fill(Complex::new(0.0, 0.0));
        self.band_mask.fill(1.0);
        self.bin_mask.fill(1.0);
        self.discard.fill(0.0);
    }
}

// =============================================================================
// Engine
// =============================================================================

pub struct DeepFilterEngine {
    config: DfnConfig,
    params: DfnParams,
    sample_rate: usize,
    rate_supported: bool,
    rate_warned: bool,
    core: SpectralCore,
    backend: InferenceMode,
    controller: MixController,
    post: PostConditioner,
    meters: Arc<Meters>,
    listener: Option<StatsListener>,
    last_failure_logged: bool,
}

impl DeepFilterEngine {
    /// The hop is always 10 ms of audio; a `hop_size` in `config` is overridden.
    pub fn new(config: DfnConfig, params: DfnParams, mut backend: InferenceMode) -> Self {
        let config = config.normalized(hop_for_rate(SUPPORTED_SAMPLE_RATE));
        backend.set_geometry(config.nb_erb, config.nb_df);
        log::debug!(
            "DeepFilterEngine: {} backend, fft {}, hop {}, nb_erb {}, nb_df {}, order {}",
            backend.name(),
            config.fft_size,
            config.hop_size,
            config.nb_erb,
            config.nb_df,
            config.df_order
        );
        Self {
            core: SpectralCore::new(&config),
            controller: MixController::new(config.hop_ms()),
            sample_rate: SUPPORTED_SAMPLE_RATE,
            rate_supported: true,
            rate_warned: false,
            params: params.clamped(),
            config,
            backend,
            post: PostConditioner::new(),
            meters: Arc::new(Meters::new()),
            listener: None,
            last_failure_logged: false,
        }
    }

    /// Loads a model from disk. Geometry comes from the model's `config.ini`
    /// when present.
    #[cfg(feature = "onnx")]
    pub fn from_model(
        model_dir: Option<&std::path::Path>,
        model_path: Option<&std::path::Path>,
        params: DfnParams,
    ) -> Self {
        let loaded = crate::inference::onnx::load_backend(model_dir, model_path, &params);
        let config = loaded.config.unwrap_or_default();
        Self::new(config, params, loaded.mode)
    }

    // -------------------------------------------------------------------------
    // Processing
    // -------------------------------------------------------------------------

    /// Processes one hop. `input` and `output` must both be `hop_size()` long.
    pub fn process_hop(&mut self, input: &[f32], output: &mut [f32]) {
        let hop = self.config.hop_size;
        if input.len() != hop || output.len() != hop {
            log::error!(
                "process_hop expects {} samples, got {} in / {} out; passing through",
                hop,
                input.len(),
                output.len()
            );
            let n = input.len().min(output.len());
            output[..n].copy_from_slice(&input[..n]);
            return;
        }

        self.controller.begin_hop(Instant::now());

        let bypass = self.params.bypass || !self.rate_supported;
        let mut elapsed = Duration::ZERO;
        let mut ok = false;
        if !bypass {
            let start = Instant::now();
            ok = self.core_hop(input, output);
            elapsed = start.elapsed();
        }
        self.controller.record_inference(elapsed, Instant::now());

        if !ok || bypass {
            output.copy_from_slice(input);
        }
        let auto_mix = self.controller.finish_hop(ok, bypass);

        if !bypass && ok {
            let wet = self.params.mix * auto_mix;
            if wet < FULL_WET {
                for (o, &x) in output.iter_mut().zip(input.iter()) {
                    *o = lerp(x, *o, wet);
                }
            }
        }

        if !bypass && self.params.post_filter > 0.0 {
            self.post.smooth(output, self.params.post_filter);
        }
        PostConditioner::saturate(output);

        if let Some(stats) = self.controller.tick(elapsed) {
            self.publish(&stats);
        }
    }

    /// Inference plus spectral processing. Returns whether `out` holds a
    /// processed hop; on failure `out` is the input, bit for bit.
    fn core_hop(&mut self, input: &[f32], out: &mut [f32]) -> bool {
        let result = match &mut self.backend {
            InferenceMode::MultiStage(stage) => self.core.process(stage, input, out),
            InferenceMode::Single(model) => model.run(input, out),
            InferenceMode::Passthrough => Err(InferenceError::Unavailable),
        };
        match result {
            Ok(()) => {
                self.last_failure_logged = false;
                true
            }
            Err(e) => {
                if matches!(e, InferenceError::Unavailable) {
                    log::trace!("No backend, hop passed through");
                } else if !self.last_failure_logged {
                    log::warn!("Inference failed, passing hops through: {}", e);
                    self.last_failure_logged = true;
                } else {
                    log::debug!("Inference failed: {}", e);
                }
                out.copy_from_slice(input);
                false
            }
        }
    }

    fn publish(&mut self, stats: &DfnStats) {
        log::debug!(
            "dfn-stats p50 {:.3} ms, p95 {:.3} ms, bypassed {}, auto_mix {:.3}, auto_bypass {}",
            stats.p50_ms,
            stats.p95_ms,
            stats.bypass_count,
            stats.auto_mix,
            stats.auto_bypass
        );
        self.meters.publish(stats);
        if let Some(listener) = self.listener.as_mut() {
            listener(stats);
        }
    }

    // -------------------------------------------------------------------------
    // Lifecycle
    // -------------------------------------------------------------------------

    /// Clears all per-stream state, as on stream stop/start.
    pub fn reset(&mut self) {
        self.core.reset();
        self.controller.reset();
        self.post.reset();
        self.meters.reset();
        self.rate_warned = false;
        self.last_failure_logged = false;
    }

    /// Rebuilds every buffer for new geometry, then resets. The hop stays
    /// 10 ms at the current stream rate.
    pub fn reconfigure(&mut self, config: DfnConfig) {
        self.config = config.normalized(hop_for_rate(self.sample_rate));
        self.core = SpectralCore::new(&self.config);
        self.backend.set_geometry(self.config.nb_erb, self.config.nb_df);
        // Hop time is wall clock at the stream rate, not at 48 kHz.
        let hop_ms = 1000.0 * self.config.hop_size as f64 / self.sample_rate as f64;
        self.controller = MixController::new(hop_ms);
        self.reset();
    }

    /// Hop becomes `rate / 100`. Rates other than 48 kHz force pass-through.
    pub fn set_sample_rate(&mut self, rate: usize) {
        let rate = rate.max(1);
        self.sample_rate = rate;
        self.rate_supported = rate == SUPPORTED_SAMPLE_RATE;
        let warned = self.rate_warned;
        self.reconfigure(self.config);
        self.rate_warned = warned;
        if !self.rate_supported && !self.rate_warned {
            log::warn!(
                "Sample rate {} Hz unsupported (need {}); passing audio through",
                rate,
                SUPPORTED_SAMPLE_RATE
            );
            self.rate_warned = true;
        }
    }

    pub fn set_backend(&mut self, mut backend: InferenceMode) {
        log::info!("Inference backend: {}", backend.name());
        backend.set_geometry(self.config.nb_erb, self.config.nb_df);
        self.backend = backend;
        self.reset();
    }

    // -------------------------------------------------------------------------
    // Knobs
    // -------------------------------------------------------------------------

    pub fn set_mix(&mut self, mix: f32) {
        self.params.set_mix(mix);
    }

    /// Setting 0 also clears the filter state.
    pub fn set_post_filter(&mut self, strength: f32) {
        self.params.set_post_filter(strength);
        if self.params.post_filter <= 0.0 {
            self.post.reset();
        }
    }

    pub fn set_bypass(&mut self, bypass: bool) {
        self.params.bypass = bypass;
    }

    /// Tensor names for the single-model path; `None` restores the model's own.
    pub fn set_model_names(&mut self, input: Option<&str>, output: Option<&str>) {
        self.params.input_name = input.map(str::to_string);
        self.params.output_name = output.map(str::to_string);
        if let InferenceMode::Single(model) = &mut self.backend {
            model.set_names(input, output);
        }
    }

    pub fn set_stats_listener(&mut self, listener: impl FnMut(&DfnStats) + Send + 'static) {
        self.listener = Some(Box::new(listener));
    }

    // -------------------------------------------------------------------------
    // Accessors
    // -------------------------------------------------------------------------

    pub fn config(&self) -> &DfnConfig {
        &self.config
    }

    pub fn params(&self) -> &DfnParams {
        &self.params
    }

    pub fn hop_size(&self) -> usize {
        self.config.hop_size
    }

    pub fn sample_rate(&self) -> usize {
        self.sample_rate
    }

    pub fn is_rate_supported(&self) -> bool {
        self.rate_supported
    }

    pub fn backend(&self) -> &InferenceMode {
        &self.backend
    }

    /// Algorithmic delay of the spectral path, in samples.
    pub fn latency_samples(&self) -> usize {
        match self.backend {
            InferenceMode::MultiStage(_) => self.core.stft.latency_samples(),
            _ => 0,
        }
    }

    pub fn meters(&self) -> Arc<Meters> {
        Arc::clone(&self.meters)
    }

    /// Live stats (not just the last published snapshot).
    pub fn stats(&self) -> DfnStats {
        self.controller.stats()
    }

    pub fn auto_mix(&self) -> f32 {
        self.controller.auto_mix()
    }

    pub fn bypass_count(&self) -> u64 {
        self.controller.bypass_count()
    }

    pub fn post_filter_state(&self) -> f32 {
        self.post.state()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inference::{ModelRunner, SlotPolicy, Tensor, TensorMap};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;

    const ENC_OUTPUTS: [&str; 7] = ["e0", "e1", "e2", "e3", "emb", "c0", "lsnr"];

    struct Stub {
        inputs: Vec<&'static str>,
        outputs: Vec<(&'static str, Vec<f32>)>,
        fail: Arc<AtomicBool>,
    }

    impl ModelRunner for Stub {
        fn input_names(&self) -> Vec<String> {
            self.inputs.iter().map(|s| s.to_string()).collect()
        }

        fn output_names(&self) -> Vec<String> {
            self.outputs.iter().map(|(n, _)| n.to_string()).collect()
        }

        fn run(&mut self, _inputs: TensorMap) -> Result<TensorMap, InferenceError> {
            if self.fail.load(Ordering::Relaxed) {
                return Err(InferenceError::Runner("stub failure".into()));
            }
            Ok(self
                .outputs
                .iter()
                .map(|(n, d)| (n.to_string(), Tensor::from_vec(d.clone())))
                .collect())
        }
    }

    fn multi_stage(cfg: &DfnConfig, mask: f32, coef: f32, fail: &Arc<AtomicBool>) -> InferenceMode {
        let encoder = Stub {
            inputs: vec!["feat_erb", "feat_spec"],
            outputs: ENC_OUTPUTS.iter().map(|n| (*n, vec![0.0; 8])).collect(),
            fail: fail.clone(),
        };
        let erb = Stub {
            inputs: vec!["emb", "e3", "e2", "e1", "e0"],
            outputs: vec![("m", vec![mask; cfg.nb_erb])],
            fail: Arc::new(AtomicBool::new(false)),
        };
        let df = Stub {
            inputs: vec!["emb", "c0"],
            outputs: vec![("coefs", vec![coef; cfg.nb_df * cfg.df_order * 2])],
            fail: Arc::new(AtomicBool::new(false)),
        };
        InferenceMode::MultiStage(MultiStage::new(
            Box::new(encoder),
            Box::new(erb),
            Box::new(df),
            cfg.nb_erb,
            cfg.nb_df,
            SlotPolicy::Strict,
        ))
    }

    fn params() -> DfnParams {
        DfnParams {
            slot_policy: SlotPolicy::Strict,
            ..DfnParams::default()
        }
    }

    fn noise_hop(seed: &mut u32, hop: usize) -> Vec<f32> {
        (0..hop)
            .map(|_| {
                *seed = seed.wrapping_mul(1664525).wrapping_add(1013904223);
                ((*seed >> 8) as f32 / (1u32 << 24) as f32 - 0.5) * 0.2
            })
            .collect()
    }

    #[test]
    fn test_failed_hop_leaves_state_and_signal_untouched() {
        let cfg = DfnConfig::default();
        let fail = Arc::new(AtomicBool::new(false));
        let mut engine = DeepFilterEngine::new(cfg, params(), multi_stage(&cfg, 0.7, 0.1, &fail));

        let mut seed = 1u32;
        let mut out = vec![0.0f32; cfg.hop_size];
        for _ in 0..8 {
            let hop = noise_hop(&mut seed, cfg.hop_size);
            assert!(engine.core_hop(&hop, &mut out));
        }
        assert!(engine.core.deep_filter.is_warm());

        let hist_re = engine.core.deep_filter.history_re().to_vec();
        let hist_im = engine.core.deep_filter.history_im().to_vec();
        let coefs = engine.core.deep_filter.coefs().to_vec();
        let mask = engine.core.band_mask.clone();

        fail.store(true, Ordering::Relaxed);
        let hop = noise_hop(&mut seed, cfg.hop_size);
        assert!(!engine.core_hop(&hop, &mut out));

        assert_eq!(out, hop);
        assert_eq!(engine.core.deep_filter.history_re(), &hist_re[..]);
        assert_eq!(engine.core.deep_filter.history_im(), &hist_im[..]);
        assert_eq!(engine.core.deep_filter.coefs(), &coefs[..]);
        assert_eq!(engine.core.band_mask, mask);
    }

    #[test]
    fn test_failures_count_as_bypass_and_pull_mix_down() {
        let cfg = DfnConfig::default();
        let fail = Arc::new(AtomicBool::new(true));
        let mut engine = DeepFilterEngine::new(cfg, params(), multi_stage(&cfg, 1.0, 0.0, &fail));
        let input = vec![0.1f32; cfg.hop_size];
        let mut out = vec![0.0f32; cfg.hop_size];
        for _ in 0..30 {
            engine.process_hop(&input, &mut out);
        }
        assert_eq!(engine.bypass_count(), 30);
        assert!(engine.stats().auto_bypass);
        let expected = soft(0.1);
        assert!(out.iter().all(|&v| (v - expected).abs() < 1e-7));
    }

    #[test]
    fn test_passthrough_backend_is_saturated_input() {
        let cfg = DfnConfig::default();
        let mut engine = DeepFilterEngine::new(cfg, params(), InferenceMode::Passthrough);
        let input: Vec<f32> = (0..cfg.hop_size).map(|i| (i as f32 / 480.0) - 0.5).collect();
        let mut out = vec![0.0f32; cfg.hop_size];
        engine.process_hop(&input, &mut out);
        for (o, i) in out.iter().zip(input.iter()) {
            assert!((o - soft(*i)).abs() < 1e-7);
        }
        assert_eq!(engine.bypass_count(), 1);
        assert_eq!(engine.latency_samples(), 0);
    }

    #[test]
    fn test_bypass_knob_skips_inference() {
        let cfg = DfnConfig::default();
        let calls = Arc::new(AtomicUsize::new(0));

        struct Counting(Arc<AtomicUsize>);
        impl ModelRunner for Counting {
            fn input_names(&self) -> Vec<String> {
                vec!["input".into()]
            }
            fn output_names(&self) -> Vec<String> {
                vec!["output".into()]
            }
            fn run(&mut self, mut inputs: TensorMap) -> Result<TensorMap, InferenceError> {
                self.0.fetch_add(1, Ordering::Relaxed);
                let t = inputs.remove("input").ok_or(InferenceError::Unavailable)?;
                Ok([("output".to_string(), t)].into_iter().collect())
            }
        }

        let single = crate::inference::SingleModel::new(Box::new(Counting(calls.clone())), None, None);
        let mut engine = DeepFilterEngine::new(cfg, params(), InferenceMode::Single(single));
        let input = vec![0.05f32; cfg.hop_size];
        let mut out = vec![0.0f32; cfg.hop_size];

        engine.process_hop(&input, &mut out);
        assert_eq!(calls.load(Ordering::Relaxed), 1);
        assert_eq!(engine.bypass_count(), 0);

        engine.set_bypass(true);
        engine.process_hop(&input, &mut out);
        assert_eq!(calls.load(Ordering::Relaxed), 1);
        assert_eq!(engine.bypass_count(), 1);
    }

    #[test]
    fn test_unsupported_rate_forces_passthrough() {
        let cfg = DfnConfig::default();
        let fail = Arc::new(AtomicBool::new(false));
        let mut engine = DeepFilterEngine::new(cfg, params(), multi_stage(&cfg, 0.5, 0.0, &fail));
        engine.set_sample_rate(44100);
        assert_eq!(engine.hop_size(), 441);
        assert!(!engine.is_rate_supported());

        let input = vec![0.2f32; 441];
        let mut out = vec![0.0f32; 441];
        engine.process_hop(&input, &mut out);
        assert!((out[0] - soft(0.2)).abs() < 1e-7);
        assert_eq!(engine.bypass_count(), 1);

        engine.set_sample_rate(48000);
        assert_eq!(engine.hop_size(), 480);
        assert!(engine.is_rate_supported());
    }

    #[test]
    fn test_wrong_hop_length_passes_through() {
        let mut engine = DeepFilterEngine::new(DfnConfig::default(), params(), InferenceMode::Passthrough);
        let input = [0.3f32; 10];
        let mut out = [0.0f32; 10];
        engine.process_hop(&input, &mut out);
        assert_eq!(out, input);
    }

    #[test]
    fn test_post_filter_reset_on_zero() {
        let cfg = DfnConfig::default();
        let fail = Arc::new(AtomicBool::new(false));
        let mut engine = DeepFilterEngine::new(cfg, params(), multi_stage(&cfg, 1.0, 0.0, &fail));
        engine.set_post_filter(0.5);
        let input = vec![0.3f32; cfg.hop_size];
        let mut out = vec![0.0f32; cfg.hop_size];
        for _ in 0..4 {
            engine.process_hop(&input, &mut out);
        }
        assert!(engine.post_filter_state() != 0.0);
        engine.set_post_filter(0.0);
        assert_eq!(engine.post_filter_state(), 0.0);
        engine.set_post_filter(3.0);
        assert!((engine.params().post_filter - 0.98).abs() < 1e-6);
    }

    #[test]
    fn test_stats_published_every_fifty_hops() {
        let cfg = DfnConfig::default();
        let mut engine = DeepFilterEngine::new(cfg, params(), InferenceMode::Passthrough);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        engine.set_stats_listener(move |s| sink.lock().unwrap().push(*s));

        let input = vec![0.0f32; cfg.hop_size];
        let mut out = vec![0.0f32; cfg.hop_size];
        for _ in 0..100 {
            engine.process_hop(&input, &mut out);
        }
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[1].frames, 100);
        assert_eq!(seen[1].bypass_count, 100);
        assert_eq!(engine.meters().get_frames(), 100);
    }

    #[test]
    fn test_reset_restores_initial_state() {
        let cfg = DfnConfig::default();
        let fail = Arc::new(AtomicBool::new(false));
        let mut engine = DeepFilterEngine::new(cfg, params(), multi_stage(&cfg, 0.5, 0.2, &fail));
        let mut seed = 7u32;
        let mut out = vec![0.0f32; cfg.hop_size];
        for _ in 0..10 {
            let hop = noise_hop(&mut seed, cfg.hop_size);
            engine.process_hop(&hop, &mut out);
        }
        engine.reset();
        assert_eq!(engine.core.deep_filter.filled(), 0);
        assert!(engine.core.deep_filter.coefs().iter().all(|&c| c == 0.0));
        assert!(engine.core.band_mask.iter().all(|&m| m == 1.0));
        assert_eq!(engine.bypass_count(), 0);
        assert_eq!(engine.auto_mix(), 1.0);
        assert_eq!(engine.stats().frames, 0);
    }

    #[test]
    fn test_reconfigure_rebuilds_geometry() {
        let cfg = DfnConfig::default();
        let mut engine = DeepFilterEngine::new(cfg, params(), InferenceMode::Passthrough);
        engine.reconfigure(DfnConfig {
            fft_size: 1024,
            hop_size: 512,
            nb_df: 64,
            ..cfg
        });
        assert_eq!(engine.hop_size(), 480);
        assert_eq!(engine.core.spectrum.len(), 513);
        assert_eq!(engine.core.deep_filter.coef_len(), 64 * 5 * 2);
        assert_eq!(engine.controller.budget(), Duration::from_millis(9));
    }

    #[test]
    fn test_config_hop_is_forced_to_ten_ms() {
        let cfg = DfnConfig {
            fft_size: 1024,
            hop_size: 512,
            ..DfnConfig::default()
        };
        let engine = DeepFilterEngine::new(cfg, params(), InferenceMode::Passthrough);
        assert_eq!(engine.hop_size(), 480);
        assert_eq!(engine.config().fft_size, 1024);
        assert_eq!(engine.core.discard.len(), 480);
    }

    #[test]
    fn test_unsupported_rate_budget_uses_stream_time() {
        let mut engine = DeepFilterEngine::new(DfnConfig::default(), params(), InferenceMode::Passthrough);
        engine.set_sample_rate(96000);
        assert_eq!(engine.hop_size(), 960);
        assert_eq!(engine.controller.budget(), Duration::from_millis(9));
    }

    #[test]
    fn test_reconfigure_multi_stage_keeps_processing() {
        let cfg = DfnConfig::default();
        let fail = Arc::new(AtomicBool::new(false));
        let mut engine = DeepFilterEngine::new(cfg, params(), multi_stage(&cfg, 1.0, 0.0, &fail));
        engine.reconfigure(DfnConfig {
            nb_df: 64,
            nb_erb: 24,
            ..cfg
        });

        let mut seed = 3u32;
        let mut out = vec![0.0f32; engine.hop_size()];
        for _ in 0..6 {
            let hop = noise_hop(&mut seed, engine.hop_size());
            assert!(engine.core_hop(&hop, &mut out));
        }
        match engine.backend() {
            InferenceMode::MultiStage(stage) => assert_eq!(stage.geometry(), (24, 64)),
            _ => panic!("backend changed"),
        }
        assert_eq!(engine.bypass_count(), 0);
    }

    #[test]
    fn test_oversized_nb_df_is_clamped_for_backend() {
        let cfg = DfnConfig {
            nb_df: 2000,
            ..DfnConfig::default()
        };
        let fail = Arc::new(AtomicBool::new(false));
        let mut engine = DeepFilterEngine::new(cfg, params(), multi_stage(&cfg, 1.0, 0.0, &fail));
        assert_eq!(engine.config().nb_df, 481);
        let hop = vec![0.05f32; 480];
        let mut out = vec![0.0f32; 480];
        assert!(engine.core_hop(&hop, &mut out));
    }

    fn soft(x: f32) -> f32 {
        crate::dsp::utils::soft_saturate(x)
    }
}
