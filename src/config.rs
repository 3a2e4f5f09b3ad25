//! Model geometry and runtime knobs.
//!
//! `DfnConfig` is the geometry the DSP core is built from. It is read from a
//! DeepFilterNet `config.ini` (or JSON) and is never fatal: anything missing
//! or invalid falls back to the documented default.
//!
//! `DfnParams` are the live knobs a host reads and writes between hops.

use crate::inference::SlotPolicy;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use thiserror::Error;

pub const SUPPORTED_SAMPLE_RATE: usize = 48000;
pub const DEFAULT_FFT_SIZE: usize = 960;
pub const DEFAULT_HOP_SIZE: usize = 480;
pub const DEFAULT_NB_ERB: usize = 32;
pub const DEFAULT_NB_DF: usize = 96;
pub const DEFAULT_DF_ORDER: usize = 5;
pub const DEFAULT_DF_LOOKAHEAD: usize = 0;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("config I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("config JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DfnConfig {
    pub sr: usize,
    pub fft_size: usize,
    pub hop_size: usize,
    pub nb_erb: usize,
    pub nb_df: usize,
    pub df_order: usize,
    /// Parsed for completeness; the realtime path runs without lookahead.
    pub df_lookahead: usize,
}

impl Default for DfnConfig {
    fn default() -> Self {
        Self {
            sr: SUPPORTED_SAMPLE_RATE,
            fft_size: DEFAULT_FFT_SIZE,
            hop_size: DEFAULT_HOP_SIZE,
            nb_erb: DEFAULT_NB_ERB,
            nb_df: DEFAULT_NB_DF,
            df_order: DEFAULT_DF_ORDER,
            df_lookahead: DEFAULT_DF_LOOKAHEAD,
        }
    }
}

impl DfnConfig {
    /// Parses DeepFilterNet's `config.ini`. Keys come from `[df]` first,
    /// then from any other section.
    pub fn from_ini_str(content: &str) -> Self {
        let sections = parse_ini(content);
        let lookup = |key: &str| -> Option<i64> {
            sections
                .get("df")
                .and_then(|s| s.get(key))
                .or_else(|| sections.values().find_map(|s| s.get(key)))
                .and_then(|v| v.parse::<i64>().ok())
        };
        let positive = |key: &str| lookup(key).filter(|&v| v > 0).map(|v| v as usize);

        let hop_size = positive("hop_size").unwrap_or(DEFAULT_HOP_SIZE);
        let sr = match positive("sr") {
            Some(SUPPORTED_SAMPLE_RATE) | None => SUPPORTED_SAMPLE_RATE,
            Some(other) => {
                log::warn!(
                    "config.ini declares sr={}, only {} is supported; using {}",
                    other,
                    SUPPORTED_SAMPLE_RATE,
                    SUPPORTED_SAMPLE_RATE
                );
                SUPPORTED_SAMPLE_RATE
            }
        };

        let cfg = Self {
            sr,
            fft_size: positive("fft_size").unwrap_or(hop_size * 2),
            hop_size,
            nb_erb: positive("nb_erb").unwrap_or(DEFAULT_NB_ERB),
            nb_df: positive("nb_df").unwrap_or(DEFAULT_NB_DF),
            df_order: positive("df_order").unwrap_or(DEFAULT_DF_ORDER),
            df_lookahead: lookup("df_lookahead")
                .filter(|&v| v >= 0)
                .map(|v| v as usize)
                .unwrap_or(DEFAULT_DF_LOOKAHEAD),
        };
        log::debug!("Parsed model config: {:?}", cfg);
        cfg
    }

    /// Loads `config.ini`. A missing or unreadable file yields defaults.
    pub fn load_ini(path: &Path) -> Self {
        match fs::read_to_string(path) {
            Ok(content) => Self::from_ini_str(&content),
            Err(e) => {
                if path.exists() {
                    log::warn!("Failed to read {:?}: {}; using defaults", path, e);
                }
                Self::default()
            }
        }
    }

    pub fn from_json_str(content: &str) -> Result<Self, ConfigError> {
        let cfg: Self = serde_json::from_str(content)?;
        Ok(cfg.sanitized())
    }

    pub fn load_json(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::from_json_str(&content)
    }

    /// Replaces zero fields with defaults and pins the sample rate.
    pub fn sanitized(mut self) -> Self {
        let d = Self::default();
        self.sr = SUPPORTED_SAMPLE_RATE;
        if self.hop_size == 0 {
            self.hop_size = d.hop_size;
        }
        if self.fft_size == 0 {
            self.fft_size = self.hop_size * 2;
        }
        if self.nb_erb == 0 {
            self.nb_erb = d.nb_erb;
        }
        if self.nb_df == 0 {
            self.nb_df = d.nb_df;
        }
        if self.df_order == 0 {
            self.df_order = d.df_order;
        }
        self
    }

    /// Enforces the geometry invariants for a stream delivering `hop` samples per hop:
    /// `fft_size >= 2 * hop` and `nb_df <= fft_size / 2 + 1`.
    pub fn normalized(self, hop: usize) -> Self {
        let mut cfg = self.sanitized();
        if hop > 0 {
            cfg.hop_size = hop;
        }
        if cfg.fft_size < cfg.hop_size * 2 {
            cfg.fft_size = cfg.hop_size * 2;
        }
        cfg.nb_df = cfg.nb_df.min(cfg.bins());
        cfg
    }

    pub fn bins(&self) -> usize {
        self.fft_size / 2 + 1
    }

    /// Real-time length of one hop.
    pub fn hop_ms(&self) -> f64 {
        1000.0 * self.hop_size as f64 / self.sr as f64
    }
}

/// Samples per 10 ms at `sample_rate`, at least 1.
pub fn hop_for_rate(sample_rate: usize) -> usize {
    (sample_rate / 100).max(1)
}

/// Minimal INI reader: `section -> key -> value`. Keys before any header
/// land in the "" section.
fn parse_ini(content: &str) -> HashMap<String, HashMap<String, String>> {
    let mut sections: HashMap<String, HashMap<String, String>> = HashMap::new();
    let mut current = String::new();
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            continue;
        }
        if let Some(name) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
            current = name.trim().to_ascii_lowercase();
            continue;
        }
        if let Some((key, value)) = line.split_once('=') {
            sections
                .entry(current.clone())
                .or_default()
                .insert(key.trim().to_string(), value.trim().to_string());
        }
    }
    sections
}

/// Live knobs. Setters clamp to the valid range.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DfnParams {
    /// Dry/wet mix (0 = original, 1 = processed).
    pub mix: f32,
    /// One-pole post filter coefficient, 0 disables.
    pub post_filter: f32,
    /// Skip inference entirely and pass input through.
    pub bypass: bool,
    /// Single-model input tensor name override.
    pub input_name: Option<String>,
    /// Single-model output tensor name override.
    pub output_name: Option<String>,
    pub slot_policy: SlotPolicy,
}

impl Default for DfnParams {
    fn default() -> Self {
        Self {
            mix: 1.0,
            post_filter: 0.0,
            bypass: false,
            input_name: None,
            output_name: None,
            slot_policy: SlotPolicy::from_env(),
        }
    }
}

impl DfnParams {
    pub fn set_mix(&mut self, mix: f32) {
        self.mix = mix.clamp(0.0, 1.0);
    }

    pub fn set_post_filter(&mut self, strength: f32) {
        self.post_filter = strength.clamp(0.0, crate::dsp::post_filter::POST_FILTER_MAX);
    }

    pub fn clamped(mut self) -> Self {
        self.set_mix(self.mix);
        self.set_post_filter(self.post_filter);
        self
    }
}
