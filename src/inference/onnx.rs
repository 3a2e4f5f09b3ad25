//! ONNX Runtime backend.

use super::orchestrator::{InferenceMode, MultiStage, SingleModel};
use super::{InferenceError, ModelRunner, Tensor, TensorMap};
use crate::config::{hop_for_rate, DfnConfig, DfnParams, SUPPORTED_SAMPLE_RATE};
use ort::session::Session;
use ort::value::{DynValue, Value};
use std::fs;
use std::path::Path;

pub const ENCODER_FILE: &str = "enc.onnx";
pub const ERB_DECODER_FILE: &str = "erb_dec.onnx";
pub const DF_DECODER_FILE: &str = "df_dec.onnx";
pub const CONFIG_FILE: &str = "config.ini";

/// Smaller files are treated as placeholders, not models.
pub const MIN_MODEL_BYTES: u64 = 1024;

pub struct OrtRunner {
    session: Session,
    inputs: Vec<String>,
    outputs: Vec<String>,
}

impl OrtRunner {
    /// Opens `path` with one intra-op and one inter-op thread.
    pub fn from_file(path: &Path) -> Result<Self, InferenceError> {
        let session = Session::builder()?
            .with_intra_threads(1)?
            .with_inter_threads(1)?
            .commit_from_file(path)?;
        let inputs = session.inputs().iter().map(|i| i.name().to_string()).collect();
        let outputs = session.outputs().iter().map(|o| o.name().to_string()).collect();
        log::debug!("Loaded {:?}: inputs {:?}, outputs {:?}", path, inputs, outputs);
        Ok(Self {
            session,
            inputs,
            outputs,
        })
    }

    fn to_value(t: Tensor) -> Result<DynValue, InferenceError> {
        let s = &t.shape;
        let value: DynValue = match s.len() {
            1 => Value::from_array(([s[0]], t.data))?.into(),
            2 => Value::from_array(([s[0], s[1]], t.data))?.into(),
            3 => Value::from_array(([s[0], s[1], s[2]], t.data))?.into(),
            4 => Value::from_array(([s[0], s[1], s[2], s[3]], t.data))?.into(),
            n => {
                return Err(InferenceError::Runner(format!(
                    "unsupported tensor rank {}",
                    n
                )))
            }
        };
        Ok(value)
    }
}

impl ModelRunner for OrtRunner {
    fn input_names(&self) -> Vec<String> {
        self.inputs.clone()
    }

    fn output_names(&self) -> Vec<String> {
        self.outputs.clone()
    }

    fn run(&mut self, inputs: TensorMap) -> Result<TensorMap, InferenceError> {
        let mut feed: Vec<(String, DynValue)> = Vec::with_capacity(inputs.len());
        for (name, t) in inputs {
            feed.push((name, Self::to_value(t)?));
        }
        let outputs = self.session.run(feed)?;

        let mut result = TensorMap::with_capacity(self.outputs.len());
        for name in &self.outputs {
            if let Some(value) = outputs.get(name.as_str()) {
                let (shape, data) = value.try_extract_tensor::<f32>()?;
                let shape = shape.iter().map(|&d| d.max(0) as usize).collect();
                result.insert(
                    name.clone(),
                    Tensor {
                        shape,
                        data: data.to_vec(),
                    },
                );
            }
        }
        Ok(result)
    }
}

/// What `load_backend` found.
pub struct LoadedBackend {
    pub mode: InferenceMode,
    /// Geometry read from `config.ini` next to a multi-stage model.
    pub config: Option<DfnConfig>,
}

/// Prefers the three-file layout in `model_dir`, then a single model at
/// `model_path`. Never fails: with nothing usable the mode is `Passthrough`.
pub fn load_backend(model_dir: Option<&Path>, model_path: Option<&Path>, params: &DfnParams) -> LoadedBackend {
    if let Some(dir) = model_dir {
        match load_multi_stage(dir, params) {
            Ok(loaded) => return loaded,
            Err(e) => log::warn!("Multi-stage model in {:?} unusable: {}", dir, e),
        }
    }

    if let Some(path) = model_path {
        match load_single(path, params) {
            Ok(single) => {
                log::info!("Loaded single model {:?}", path);
                return LoadedBackend {
                    mode: InferenceMode::Single(single),
                    config: None,
                };
            }
            Err(e) => log::warn!("Single model {:?} unusable: {}", path, e),
        }
    }

    log::warn!("No model backend loaded; audio will pass through unprocessed");
    LoadedBackend {
        mode: InferenceMode::Passthrough,
        config: None,
    }
}

fn load_multi_stage(dir: &Path, params: &DfnParams) -> Result<LoadedBackend, InferenceError> {
    for file in [ENCODER_FILE, ERB_DECODER_FILE, DF_DECODER_FILE] {
        if !dir.join(file).is_file() {
            return Err(InferenceError::Runner(format!("{} not found", file)));
        }
    }
    let config = DfnConfig::load_ini(&dir.join(CONFIG_FILE)).normalized(hop_for_rate(SUPPORTED_SAMPLE_RATE));
    let encoder = OrtRunner::from_file(&dir.join(ENCODER_FILE))?;
    let erb_decoder = OrtRunner::from_file(&dir.join(ERB_DECODER_FILE))?;
    let df_decoder = OrtRunner::from_file(&dir.join(DF_DECODER_FILE))?;

    let stage = MultiStage::new(
        Box::new(encoder),
        Box::new(erb_decoder),
        Box::new(df_decoder),
        config.nb_erb,
        config.nb_df,
        params.slot_policy,
    );
    log::info!(
        "Loaded multi-stage model from {:?} (fft {}, hop {}, nb_erb {}, nb_df {}, order {})",
        dir,
        config.fft_size,
        config.hop_size,
        config.nb_erb,
        config.nb_df,
        config.df_order
    );
    Ok(LoadedBackend {
        mode: InferenceMode::MultiStage(stage),
        config: Some(config),
    })
}

fn load_single(path: &Path, params: &DfnParams) -> Result<SingleModel, InferenceError> {
    let size = fs::metadata(path)
        .map_err(|e| InferenceError::Runner(e.to_string()))?
        .len();
    if size < MIN_MODEL_BYTES {
        return Err(InferenceError::Runner(format!(
            "file is {} bytes, expected at least {}",
            size, MIN_MODEL_BYTES
        )));
    }
    let runner = OrtRunner::from_file(path)?;
    Ok(SingleModel::new(
        Box::new(runner),
        params.input_name.as_deref(),
        params.output_name.as_deref(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nothing_to_load_is_passthrough() {
        let loaded = load_backend(
            Some(Path::new("/nonexistent/dfn")),
            Some(Path::new("/nonexistent/dfn/model.onnx")),
            &DfnParams::default(),
        );
        assert!(!loaded.mode.is_available());
        assert!(loaded.config.is_none());
    }

    #[test]
    fn test_tiny_single_model_rejected() {
        let path = std::env::temp_dir().join("dfn_denoise_tiny_model.onnx");
        fs::write(&path, [0u8; 16]).unwrap();
        let loaded = load_backend(None, Some(&path), &DfnParams::default());
        assert!(matches!(loaded.mode, InferenceMode::Passthrough));
        let _ = fs::remove_file(&path);
    }
}
