//! Inference orchestration.
//!
//! Two ways to run a model per hop:
//! - `MultiStage`: encoder -> {ERB mask decoder, DF coefficient decoder}.
//!   Inputs are the hop's features, outputs feed the spectral stages.
//! - `Single`: one flat model mapping the raw hop to a denoised hop,
//!   bypassing all spectral machinery. Used when only a single model file
//!   is available.
//!
//! Either way a failed call returns an error and leaves nothing half-applied:
//! outputs are only handed back once every stage has succeeded.

use super::slots::{EncoderSlot, SlotPolicy, SlotTable};
use super::{take_output, InferenceError, ModelRunner, Tensor, TensorMap};

pub const FEAT_ERB: &str = "feat_erb";
pub const FEAT_SPEC: &str = "feat_spec";
pub const COEFS_OUTPUT: &str = "coefs";
const DEFAULT_INPUT_NAME: &str = "input";
const DEFAULT_OUTPUT_NAME: &str = "output";

pub enum InferenceMode {
    MultiStage(MultiStage),
    Single(SingleModel),
    /// No model loaded; every hop passes through.
    Passthrough,
}

impl InferenceMode {
    pub fn name(&self) -> &'static str {
        match self {
            InferenceMode::MultiStage(_) => "multi-stage",
            InferenceMode::Single(_) => "single-model",
            InferenceMode::Passthrough => "passthrough",
        }
    }

    pub fn is_available(&self) -> bool {
        !matches!(self, InferenceMode::Passthrough)
    }

    /// Feature sizes the multi-stage path should expect. No-op otherwise.
    pub fn set_geometry(&mut self, nb_erb: usize, nb_df: usize) {
        if let InferenceMode::MultiStage(stage) = self {
            stage.set_geometry(nb_erb, nb_df);
        }
    }
}

/// Outputs of one successful multi-stage hop.
#[derive(Clone, Debug, PartialEq)]
pub struct StageOutputs {
    /// Band mask, `nb_erb` long. All ones when the decoder returned too few values.
    pub erb_mask: Vec<f32>,
    /// Raw `coefs` output, if the coefficient decoder produced one.
    pub coefs: Option<Vec<f32>>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum FeatureRole {
    Erb,
    Spec,
}

pub struct MultiStage {
    encoder: Box<dyn ModelRunner>,
    erb_decoder: Box<dyn ModelRunner>,
    df_decoder: Box<dyn ModelRunner>,
    enc_inputs: Vec<(String, FeatureRole)>,
    /// Encoder output name -> slot, in declared order.
    enc_outputs: Vec<(String, EncoderSlot)>,
    erb_table: SlotTable,
    df_table: SlotTable,
    mask_output: String,
    nb_erb: usize,
    nb_df: usize,
}

impl MultiStage {
    /// Resolves all tensor names up front. Unknown decoder inputs follow `policy`.
    pub fn new(
        encoder: Box<dyn ModelRunner>,
        erb_decoder: Box<dyn ModelRunner>,
        df_decoder: Box<dyn ModelRunner>,
        nb_erb: usize,
        nb_df: usize,
        policy: SlotPolicy,
    ) -> Self {
        let declared = encoder.input_names();
        let enc_inputs = if declared.is_empty() {
            vec![
                (FEAT_ERB.to_string(), FeatureRole::Erb),
                (FEAT_SPEC.to_string(), FeatureRole::Spec),
            ]
        } else {
            declared
                .into_iter()
                .enumerate()
                .map(|(i, name)| {
                    let role = match name.as_str() {
                        FEAT_ERB => FeatureRole::Erb,
                        FEAT_SPEC => FeatureRole::Spec,
                        _ if i == 0 => FeatureRole::Erb,
                        _ => FeatureRole::Spec,
                    };
                    (name, role)
                })
                .collect()
        };

        let enc_outputs = Self::bind_encoder_outputs(&encoder.output_names());

        let erb_table = SlotTable::resolve("ERB decoder", &erb_decoder.input_names(), policy);
        let df_table = SlotTable::resolve("DF decoder", &df_decoder.input_names(), policy);
        let mask_output = erb_decoder
            .output_names()
            .into_iter()
            .next()
            .unwrap_or_else(|| "m".to_string());

        log::debug!(
            "Multi-stage model bound: encoder inputs {:?}, ERB decoder {} inputs, DF decoder {} inputs, mask output '{}'",
            enc_inputs.iter().map(|(n, _)| n.as_str()).collect::<Vec<_>>(),
            erb_table.len(),
            df_table.len(),
            mask_output
        );

        Self {
            encoder,
            erb_decoder,
            df_decoder,
            enc_inputs,
            enc_outputs,
            erb_table,
            df_table,
            mask_output,
            nb_erb,
            nb_df,
        }
    }

    /// Named outputs go to their slot; anything else takes the slot at its
    /// declared position if still free.
    fn bind_encoder_outputs(names: &[String]) -> Vec<(String, EncoderSlot)> {
        let mut taken = [false; EncoderSlot::ALL.len()];
        let mut bound: Vec<(String, Option<EncoderSlot>)> = names
            .iter()
            .map(|n| {
                let slot = EncoderSlot::from_name(n);
                if let Some(s) = slot {
                    taken[s.index()] = true;
                }
                (n.clone(), slot)
            })
            .collect();
        for (i, (_, slot)) in bound.iter_mut().enumerate() {
            if slot.is_none() && i < EncoderSlot::ALL.len() && !taken[i] {
                *slot = Some(EncoderSlot::ALL[i]);
                taken[i] = true;
            }
        }
        bound
            .into_iter()
            .filter_map(|(n, s)| s.map(|s| (n, s)))
            .collect()
    }

    pub fn erb_table(&self) -> &SlotTable {
        &self.erb_table
    }

    pub fn df_table(&self) -> &SlotTable {
        &self.df_table
    }

    /// `(nb_erb, nb_df)`.
    pub fn geometry(&self) -> (usize, usize) {
        (self.nb_erb, self.nb_df)
    }

    pub fn set_geometry(&mut self, nb_erb: usize, nb_df: usize) {
        if (nb_erb, nb_df) != (self.nb_erb, self.nb_df) {
            log::debug!(
                "Multi-stage geometry {}x{} -> {}x{}",
                self.nb_erb,
                self.nb_df,
                nb_erb,
                nb_df
            );
        }
        self.nb_erb = nb_erb;
        self.nb_df = nb_df;
    }

    pub fn run(&mut self, feat_erb: &[f32], feat_spec: &[f32]) -> Result<StageOutputs, InferenceError> {
        check_len(FEAT_ERB, self.nb_erb, feat_erb.len())?;
        check_len(FEAT_SPEC, 2 * self.nb_df, feat_spec.len())?;
        let erb = Tensor::new(vec![1, 1, 1, self.nb_erb], feat_erb.to_vec());
        let spec = Tensor::new(vec![1, 2, 1, self.nb_df], feat_spec.to_vec());
        let mut enc_in = TensorMap::with_capacity(self.enc_inputs.len());
        for (name, role) in &self.enc_inputs {
            let t = match role {
                FeatureRole::Erb => erb.clone(),
                FeatureRole::Spec => spec.clone(),
            };
            enc_in.insert(name.clone(), t);
        }

        let mut enc_out = self.encoder.run(enc_in)?;
        let mut slots: [Option<Tensor>; EncoderSlot::ALL.len()] = Default::default();
        for (name, slot) in &self.enc_outputs {
            if let Some(t) = enc_out.remove(name) {
                slots[slot.index()] = Some(t);
            }
        }

        let erb_in = gather(&self.erb_table, &slots)?;
        let df_in = gather(&self.df_table, &slots)?;

        let mut erb_out = self.erb_decoder.run(erb_in)?;
        let mut df_out = self.df_decoder.run(df_in)?;

        let mask = take_output(&mut erb_out, &self.mask_output, 0)?;
        let erb_mask = if mask.len() >= self.nb_erb {
            mask.data[..self.nb_erb].to_vec()
        } else {
            log::trace!(
                "ERB decoder returned {} values, expected {}; using unit mask",
                mask.len(),
                self.nb_erb
            );
            vec![1.0; self.nb_erb]
        };
        let coefs = df_out.remove(COEFS_OUTPUT).map(|t| t.data);

        Ok(StageOutputs { erb_mask, coefs })
    }
}

fn check_len(name: &str, expected: usize, actual: usize) -> Result<(), InferenceError> {
    if expected == actual {
        Ok(())
    } else {
        Err(InferenceError::BadLength {
            name: name.to_string(),
            expected,
            actual,
        })
    }
}

fn gather(
    table: &SlotTable,
    slots: &[Option<Tensor>; EncoderSlot::ALL.len()],
) -> Result<TensorMap, InferenceError> {
    let mut map = TensorMap::with_capacity(table.len());
    for binding in table.bindings() {
        let slot = binding
            .slot
            .as_ref()
            .map_err(|name| InferenceError::UnresolvedSlot(name.clone()))?;
        let t = slots[slot.index()]
            .as_ref()
            .ok_or_else(|| InferenceError::MissingOutput(slot.name().to_string()))?;
        map.insert(binding.input.clone(), t.clone());
    }
    Ok(map)
}

pub struct SingleModel {
    runner: Box<dyn ModelRunner>,
    input_name: String,
    output_name: String,
}

impl SingleModel {
    /// Names default to the model's first declared input/output.
    pub fn new(runner: Box<dyn ModelRunner>, input_name: Option<&str>, output_name: Option<&str>) -> Self {
        let mut model = Self {
            input_name: String::new(),
            output_name: String::new(),
            runner,
        };
        model.set_names(input_name, output_name);
        model
    }

    pub fn set_names(&mut self, input_name: Option<&str>, output_name: Option<&str>) {
        self.input_name = input_name
            .map(str::to_string)
            .or_else(|| self.runner.input_names().into_iter().next())
            .unwrap_or_else(|| DEFAULT_INPUT_NAME.to_string());
        self.output_name = output_name
            .map(str::to_string)
            .or_else(|| self.runner.output_names().into_iter().next())
            .unwrap_or_else(|| DEFAULT_OUTPUT_NAME.to_string());
    }

    pub fn input_name(&self) -> &str {
        &self.input_name
    }

    pub fn output_name(&self) -> &str {
        &self.output_name
    }

    /// Runs the hop through the model. `out` is only written on success.
    pub fn run(&mut self, hop: &[f32], out: &mut [f32]) -> Result<(), InferenceError> {
        let mut inputs = TensorMap::with_capacity(1);
        inputs.insert(
            self.input_name.clone(),
            Tensor::new(vec![1, 1, hop.len()], hop.to_vec()),
        );
        let mut outputs = self.runner.run(inputs)?;
        let t = take_output(&mut outputs, &self.output_name, out.len())?;
        out.copy_from_slice(&t.data[..out.len()]);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct Fixed {
        inputs: Vec<&'static str>,
        outputs: Vec<(&'static str, Vec<f32>)>,
        seen: Arc<AtomicUsize>,
    }

    impl ModelRunner for Fixed {
        fn input_names(&self) -> Vec<String> {
            self.inputs.iter().map(|s| s.to_string()).collect()
        }

        fn output_names(&self) -> Vec<String> {
            self.outputs.iter().map(|(n, _)| n.to_string()).collect()
        }

        fn run(&mut self, inputs: TensorMap) -> Result<TensorMap, InferenceError> {
            for name in &self.inputs {
                if !inputs.contains_key(*name) {
                    return Err(InferenceError::Runner(format!("missing input {}", name)));
                }
            }
            self.seen.fetch_add(1, Ordering::Relaxed);
            Ok(self
                .outputs
                .iter()
                .map(|(n, d)| (n.to_string(), Tensor::from_vec(d.clone())))
                .collect())
        }
    }

    fn encoder(seen: &Arc<AtomicUsize>) -> Box<dyn ModelRunner> {
        Box::new(Fixed {
            inputs: vec![FEAT_ERB, FEAT_SPEC],
            outputs: ["e0", "e1", "e2", "e3", "emb", "c0", "lsnr"]
                .iter()
                .map(|n| (*n, vec![0.0; 4]))
                .collect(),
            seen: seen.clone(),
        })
    }

    fn erb_dec(inputs: Vec<&'static str>, mask: Vec<f32>, seen: &Arc<AtomicUsize>) -> Box<dyn ModelRunner> {
        Box::new(Fixed {
            inputs,
            outputs: vec![("m", mask)],
            seen: seen.clone(),
        })
    }

    fn df_dec(coefs: Vec<f32>, seen: &Arc<AtomicUsize>) -> Box<dyn ModelRunner> {
        Box::new(Fixed {
            inputs: vec!["emb", "c0"],
            outputs: vec![("coefs", coefs), ("aux", vec![0.0])],
            seen: seen.clone(),
        })
    }

    #[test]
    fn test_multi_stage_happy_path() {
        let seen = Arc::new(AtomicUsize::new(0));
        let mut ms = MultiStage::new(
            encoder(&seen),
            erb_dec(vec!["emb", "e3", "e2", "e1", "e0"], vec![0.5; 4], &seen),
            df_dec(vec![1.0; 2 * 2 * 2], &seen),
            4,
            2,
            SlotPolicy::Strict,
        );
        let out = ms.run(&[0.0; 4], &[0.0; 4]).unwrap();
        assert_eq!(out.erb_mask, vec![0.5; 4]);
        assert_eq!(out.coefs.as_deref(), Some(&[1.0; 8][..]));
        assert_eq!(seen.load(Ordering::Relaxed), 3);
    }

    #[test]
    fn test_short_mask_becomes_unity() {
        let seen = Arc::new(AtomicUsize::new(0));
        let mut ms = MultiStage::new(
            encoder(&seen),
            erb_dec(vec!["emb"], vec![0.1; 2], &seen),
            df_dec(vec![], &seen),
            4,
            2,
            SlotPolicy::Strict,
        );
        let out = ms.run(&[0.0; 4], &[0.0; 4]).unwrap();
        assert_eq!(out.erb_mask, vec![1.0; 4]);
    }

    #[test]
    fn test_feature_length_follows_geometry() {
        let seen = Arc::new(AtomicUsize::new(0));
        let mut ms = MultiStage::new(
            encoder(&seen),
            erb_dec(vec!["emb"], vec![1.0; 4], &seen),
            df_dec(vec![], &seen),
            4,
            2,
            SlotPolicy::Strict,
        );
        assert!(matches!(
            ms.run(&[0.0; 4], &[0.0; 6]),
            Err(InferenceError::BadLength { expected: 4, actual: 6, .. })
        ));
        assert_eq!(seen.load(Ordering::Relaxed), 0);

        ms.set_geometry(3, 3);
        assert_eq!(ms.geometry(), (3, 3));
        let out = ms.run(&[0.0; 3], &[0.0; 6]).unwrap();
        assert_eq!(out.erb_mask, vec![1.0; 3]);
        assert_eq!(seen.load(Ordering::Relaxed), 3);
    }

    #[test]
    fn test_strict_unknown_slot_fails_hop() {
        let seen = Arc::new(AtomicUsize::new(0));
        let mut ms = MultiStage::new(
            encoder(&seen),
            erb_dec(vec!["emb", "skip_x"], vec![1.0; 4], &seen),
            df_dec(vec![], &seen),
            4,
            2,
            SlotPolicy::Strict,
        );
        assert!(matches!(
            ms.run(&[0.0; 4], &[0.0; 4]),
            Err(InferenceError::UnresolvedSlot(_))
        ));
        // Encoder ran, decoders never did.
        assert_eq!(seen.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_lenient_unknown_slot_uses_emb() {
        let seen = Arc::new(AtomicUsize::new(0));
        let mut ms = MultiStage::new(
            encoder(&seen),
            erb_dec(vec!["emb", "skip_x"], vec![1.0; 4], &seen),
            df_dec(vec![], &seen),
            4,
            2,
            SlotPolicy::Lenient,
        );
        assert!(ms.erb_table().is_complete());
        let out = ms.run(&[0.0; 4], &[0.0; 4]);
        assert!(out.is_ok());
        // skip_x was fed with emb under its own name, so the decoder saw it.
        assert_eq!(seen.load(Ordering::Relaxed), 3);
    }

    #[test]
    fn test_positional_encoder_outputs() {
        let bound = MultiStage::bind_encoder_outputs(&[
            "out0".to_string(),
            "out1".to_string(),
            "emb".to_string(),
        ]);
        assert_eq!(bound[0], ("out0".to_string(), EncoderSlot::E0));
        assert_eq!(bound[1], ("out1".to_string(), EncoderSlot::E1));
        assert_eq!(bound[2], ("emb".to_string(), EncoderSlot::Emb));
    }

    #[test]
    fn test_single_model_names_and_run() {
        struct Gain;
        impl ModelRunner for Gain {
            fn input_names(&self) -> Vec<String> {
                vec!["noisy".into()]
            }
            fn output_names(&self) -> Vec<String> {
                vec!["clean".into()]
            }
            fn run(&mut self, mut inputs: TensorMap) -> Result<TensorMap, InferenceError> {
                let t = take_output(&mut inputs, "noisy", 1)?;
                assert_eq!(t.shape, vec![1, 1, t.len()]);
                let data = t.data.iter().map(|v| v * 0.5).collect();
                Ok([("clean".to_string(), Tensor::from_vec(data))].into_iter().collect())
            }
        }

        let mut single = SingleModel::new(Box::new(Gain), None, None);
        assert_eq!(single.input_name(), "noisy");
        assert_eq!(single.output_name(), "clean");
        let mut out = [0.0f32; 3];
        single.run(&[1.0, 2.0, 4.0], &mut out).unwrap();
        assert_eq!(out, [0.5, 1.0, 2.0]);

        single.set_names(Some("wrong"), None);
        let mut out = [9.0f32; 3];
        assert!(single.run(&[1.0, 2.0, 4.0], &mut out).is_err());
        assert_eq!(out, [9.0; 3]);
    }
}
