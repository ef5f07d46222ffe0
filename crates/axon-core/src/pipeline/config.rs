//! Pipeline configuration inference.
//!
//! Nothing about the model's geometry is configured by hand: every scalar
//! fact is probed from the declared shapes of the loaded fragment set, and
//! disagreement between fragments that touch the same tensor is an error.

use crate::error::{AxonError, Result};
use crate::fragment::model::{EntryPoint, ModelDescriptor};
use crate::fragment::role::BlockRole;
use serde::{Deserialize, Serialize};

const DEFAULT_PAD: u32 = 0;
const DEFAULT_BOS: u32 = 1;
const DEFAULT_EOS: u32 = 2;

/// Scalar facts derived by probing the loaded fragment set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Per-step query length of the batched prefill entry point.
    pub input_length: usize,
    /// Total context length: `input_length + cache_length`.
    pub context_length: usize,
    /// K/V cache rows available.
    pub cache_length: usize,
    /// Vocabulary size.
    pub vocab_size: usize,
    /// Transformer layers across the whole block set.
    pub num_layers: usize,
    /// Width of one K/V cache row.
    pub kv_width: usize,
    /// Padding token id used to fill short prefill windows.
    pub pad_token_id: u32,
    /// Beginning-of-sequence token id used to seed empty prompts.
    pub bos_token_id: u32,
    /// End-of-sequence token id that closes generation.
    pub eos_token_id: u32,
}

fn token_id(descriptors: &[&ModelDescriptor], key: &str, default: u32) -> u32 {
    descriptors
        .iter()
        .find_map(|d| d.metadata_usize(key))
        .map(|v| v as u32)
        .unwrap_or(default)
}

impl PipelineConfig {
    /// Probe the configuration from an ordered block set and its roles.
    pub fn infer(descriptors: &[&ModelDescriptor], roles: &[BlockRole]) -> Result<Self> {
        let first = descriptors.first().ok_or_else(|| {
            AxonError::ShapeInconsistent("cannot infer configuration of an empty block set".into())
        })?;

        let prefill = first.function(EntryPoint::Prefill)?;
        let input_length = prefill.require_input("input_ids")?.last_dim()?;

        if first.is_multi_function() {
            let generate = first.function(EntryPoint::Generate)?;
            let generate_len = generate.require_input("input_ids")?.last_dim()?;
            if generate_len != 1 {
                return Err(AxonError::ShapeInconsistent(format!(
                    "generate entry of {} declares input_ids length {generate_len}, expected 1",
                    first.name
                )));
            }
        }

        // Every cache binding of every entry point must agree on one
        // [cache_length, kv_width].
        let mut cache_dims: Option<(usize, usize)> = None;
        for (desc, role) in descriptors.iter().zip(roles) {
            for function in &desc.functions {
                for layer in role.layers.clone() {
                    for prefix in ["k_cache_", "v_cache_"] {
                        let spec = function.require_input(&format!("{prefix}{layer}"))?;
                        let dims = (spec.static_dim(0)?, spec.static_dim(1)?);
                        match cache_dims {
                            None => cache_dims = Some(dims),
                            Some(seen) if seen != dims => {
                                return Err(AxonError::ShapeInconsistent(format!(
                                    "{} declares {prefix}{layer} as {:?} but {:?} was declared elsewhere",
                                    desc.name, dims, seen
                                )));
                            }
                            Some(_) => {}
                        }
                    }
                }
            }
        }
        let (cache_length, kv_width) = cache_dims.ok_or_else(|| {
            AxonError::ShapeInconsistent("block set declares no cache bindings".into())
        })?;

        let last = descriptors.last().expect("non-empty");
        let head = last.function(EntryPoint::Generate)?;
        let logits = head
            .output("logits")
            .or_else(|| head.output("logits_0"))
            .ok_or_else(|| {
                AxonError::ShapeInconsistent(format!(
                    "LM-head fragment {} declares no logits output",
                    last.name
                ))
            })?;
        let vocab_size = logits.last_dim()?;

        let num_layers = roles.last().map(|r| r.layers.end).unwrap_or(0);
        if num_layers == 0 {
            return Err(AxonError::ShapeInconsistent(
                "block set covers zero layers".into(),
            ));
        }

        Ok(Self {
            input_length,
            context_length: input_length + cache_length,
            cache_length,
            vocab_size,
            num_layers,
            kv_width,
            pad_token_id: token_id(descriptors, "pad_token_id", DEFAULT_PAD),
            bos_token_id: token_id(descriptors, "bos_token_id", DEFAULT_BOS),
            eos_token_id: token_id(descriptors, "eos_token_id", DEFAULT_EOS),
        })
    }
}
