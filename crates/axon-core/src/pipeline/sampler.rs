//! Logit sampling stage.
//!
//! The logit-sampler fragment turns the LM head's output into exactly one
//! token id. The stage owns an opaque sampler-state tensor threaded through
//! every call, so richer policies (temperature, top-p, top-k) can be
//! compiled into the fragment without touching the pipeline.

use crate::error::{AxonError, Result};
use crate::fragment::model::{take_output, CompiledModel, EntryPoint, TensorMap};
use candle_core::{DType, Device, Tensor};

const STATE_BINDING: &str = "sampler_state";

/// Wrapper around the logit-sampler fragment.
pub struct SamplerStage {
    model: Box<dyn CompiledModel>,
    name: String,
    state: Option<Tensor>,
    state_dims: Option<Vec<usize>>,
    device: Device,
}

impl SamplerStage {
    /// Wrap the sampler fragment, initializing its state tensor to zeros if
    /// the fragment declares one.
    pub fn new(model: Box<dyn CompiledModel>, device: &Device) -> Result<Self> {
        let name = model.descriptor().name.clone();
        let state_dims = model
            .descriptor()
            .function(EntryPoint::Generate)?
            .input(STATE_BINDING)
            .map(|spec| {
                spec.shape
                    .iter()
                    .enumerate()
                    .map(|(i, _)| spec.static_dim(i))
                    .collect::<Result<Vec<usize>>>()
            })
            .transpose()?;

        let mut stage = Self {
            model,
            name,
            state: None,
            state_dims,
            device: device.clone(),
        };
        stage.reset()?;
        Ok(stage)
    }

    /// Name of the wrapped fragment.
    pub fn fragment_name(&self) -> &str {
        &self.name
    }

    /// Select one token id from last-position logits.
    pub async fn select(&mut self, logits: &Tensor) -> Result<u32> {
        let mut inputs = TensorMap::new();
        inputs.insert("logits".into(), logits.clone());
        if let Some(state) = &self.state {
            inputs.insert(STATE_BINDING.into(), state.clone());
        }

        let mut outputs = self
            .model
            .predict(EntryPoint::Generate, &inputs)
            .await
            .map_err(|e| AxonError::inference(self.name.clone(), e))?;

        if self.state.is_some() {
            if let Some(next_state) = outputs.remove(STATE_BINDING) {
                self.state = Some(next_state);
            }
        }

        let token = take_output(&mut outputs, "next_token")?
            .flatten_all()?
            .to_vec1::<u32>()?;
        token.first().copied().ok_or_else(|| {
            AxonError::inference(
                self.name.clone(),
                AxonError::ShapeInconsistent("empty next_token output".into()),
            )
        })
    }

    /// Return the sampler state to its initial zeros.
    pub fn reset(&mut self) -> Result<()> {
        self.state = match &self.state_dims {
            Some(dims) => Some(Tensor::zeros(dims.as_slice(), DType::F32, &self.device)?),
            None => None,
        };
        Ok(())
    }
}

impl std::fmt::Debug for SamplerStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SamplerStage")
            .field("fragment", &self.name)
            .field("stateful", &self.state.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fragment::model::ModelRuntime;
    use crate::fragment::reference::{ReferenceRuntime, ReferenceSpec, REFERENCE_EXTENSION};
    use std::path::PathBuf;

    async fn stage(spec: ReferenceSpec) -> SamplerStage {
        let runtime = ReferenceRuntime::new(spec);
        let path = PathBuf::from(format!("logit-processor.{REFERENCE_EXTENSION}"));
        let mut model = runtime.open(&path).unwrap();
        model.load().unwrap();
        SamplerStage::new(model, &Device::Cpu).unwrap()
    }

    fn peaked_logits(vocab: usize, peak: usize) -> Tensor {
        let mut logits = vec![0f32; vocab];
        logits[peak] = 2.0;
        Tensor::from_vec(logits, (1, vocab), &Device::Cpu).unwrap()
    }

    #[tokio::test]
    async fn selects_argmax() {
        let spec = ReferenceSpec::default();
        let vocab = spec.vocab_size;
        let mut stage = stage(spec).await;
        assert_eq!(stage.select(&peaked_logits(vocab, 19)).await.unwrap(), 19);
        assert_eq!(stage.select(&peaked_logits(vocab, 3)).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn forced_eos_after_n_selections() {
        let spec = ReferenceSpec {
            force_eos_after: Some(2),
            ..ReferenceSpec::default()
        };
        let vocab = spec.vocab_size;
        let eos = spec.eos_token_id;
        let mut stage = stage(spec).await;

        assert_eq!(stage.select(&peaked_logits(vocab, 9)).await.unwrap(), 9);
        assert_eq!(stage.select(&peaked_logits(vocab, 9)).await.unwrap(), eos);
    }
}
