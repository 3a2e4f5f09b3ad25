//! Model runner abstraction.
//!
//! The DSP core never talks to an inference engine directly. Everything goes
//! through [`ModelRunner`]: named float tensors in, named float tensors out.
//! The `onnx` feature provides an ONNX Runtime implementation; tests and
//! embedders can plug in anything else.

pub mod orchestrator;
pub mod slots;

#[cfg(feature = "onnx")]
pub mod onnx;

pub use orchestrator::{InferenceMode, MultiStage, SingleModel, StageOutputs};
pub use slots::{EncoderSlot, SlotPolicy, SlotTable};

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum InferenceError {
    #[error("model runner failed: {0}")]
    Runner(String),
    #[error("model output '{0}' missing")]
    MissingOutput(String),
    #[error("tensor '{name}' has {actual} values, expected {expected}")]
    BadLength {
        name: String,
        expected: usize,
        actual: usize,
    },
    #[error("decoder input '{0}' does not map to an encoder output")]
    UnresolvedSlot(String),
    #[error("no model backend loaded")]
    Unavailable,
    #[cfg(feature = "onnx")]
    #[error("ONNX runtime error: {0}")]
    Onnx(#[from] ort::Error),
}

/// Dense float tensor with its logical shape.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Tensor {
    pub shape: Vec<usize>,
    pub data: Vec<f32>,
}

impl Tensor {
    pub fn new(shape: Vec<usize>, data: Vec<f32>) -> Self {
        debug_assert_eq!(shape.iter().product::<usize>(), data.len());
        Self { shape, data }
    }

    /// Rank-1 tensor over `data`.
    pub fn from_vec(data: Vec<f32>) -> Self {
        Self {
            shape: vec![data.len()],
            data,
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

pub type TensorMap = HashMap<String, Tensor>;

/// One loaded model.
///
/// Implementations are driven by a single caller at a time; wrap in
/// [`SharedRunner`] to share one model between engine instances.
pub trait ModelRunner: Send {
    /// Declared input names, in model order.
    fn input_names(&self) -> Vec<String>;
    /// Declared output names, in model order.
    fn output_names(&self) -> Vec<String>;
    fn run(&mut self, inputs: TensorMap) -> Result<TensorMap, InferenceError>;
}

impl<R: ModelRunner + ?Sized> ModelRunner for Box<R> {
    fn input_names(&self) -> Vec<String> {
        (**self).input_names()
    }

    fn output_names(&self) -> Vec<String> {
        (**self).output_names()
    }

    fn run(&mut self, inputs: TensorMap) -> Result<TensorMap, InferenceError> {
        (**self).run(inputs)
    }
}

/// Serialises calls into a runner shared across engines.
pub struct SharedRunner<R> {
    inner: Arc<Mutex<R>>,
}

impl<R> Clone for SharedRunner<R> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<R: ModelRunner> SharedRunner<R> {
    pub fn new(runner: R) -> Self {
        Self {
            inner: Arc::new(Mutex::new(runner)),
        }
    }

    fn with<T>(&self, f: impl FnOnce(&mut R) -> T) -> Result<T, InferenceError> {
        let mut guard = self
            .inner
            .lock()
            .map_err(|_| InferenceError::Runner("shared runner mutex poisoned".into()))?;
        Ok(f(&mut guard))
    }
}

impl<R: ModelRunner> ModelRunner for SharedRunner<R> {
    fn input_names(&self) -> Vec<String> {
        self.with(|r| r.input_names()).unwrap_or_default()
    }

    fn output_names(&self) -> Vec<String> {
        self.with(|r| r.output_names()).unwrap_or_default()
    }

    fn run(&mut self, inputs: TensorMap) -> Result<TensorMap, InferenceError> {
        self.with(|r| r.run(inputs))?
    }
}

/// Takes `name` out of `outputs`, checking it has at least `min_len` values.
pub(crate) fn take_output(
    outputs: &mut TensorMap,
    name: &str,
    min_len: usize,
) -> Result<Tensor, InferenceError> {
    let t = outputs
        .remove(name)
        .ok_or_else(|| InferenceError::MissingOutput(name.to_string()))?;
    if t.len() < min_len {
        return Err(InferenceError::BadLength {
            name: name.to_string(),
            expected: min_len,
            actual: t.len(),
        });
    }
    Ok(t)
}
