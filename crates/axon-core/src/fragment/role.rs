//! Typed fragment roles.
//!
//! Artifact filenames are only a discovery heuristic; the authoritative role
//! of each fragment comes from its declared input and output names. This
//! module turns descriptors into typed roles so downstream code dispatches on
//! enums and ranges, never on name strings.

use crate::error::{AxonError, Result};
use crate::fragment::model::{EntryPoint, ModelDescriptor};
use std::ops::Range;

/// Resolved role of one block chunk.
///
/// The first chunk carries the embedding table (it consumes raw token ids)
/// and the last carries the LM head (it produces logits); both facts are read
/// off the declared bindings.
#[derive(Debug, Clone)]
pub struct BlockRole {
    /// Layers realized by this chunk.
    pub layers: Range<usize>,
    /// Declares an `input_ids` input: the embeddings-bearing chunk.
    pub takes_token_ids: bool,
    /// Declares a `logits` output: the LM-head-bearing chunk.
    pub produces_logits: bool,
    /// Exposes separate prefill and generate entry points.
    pub multi_function: bool,
}

/// Parse a layer index out of a `k_cache_<i>` / `v_cache_<i>` binding name.
fn cache_layer(name: &str, prefix: &str) -> Option<usize> {
    name.strip_prefix(prefix).and_then(|s| s.parse().ok())
}

/// Layers declared by one descriptor, recovered from its cache bindings.
fn declared_layers(desc: &ModelDescriptor) -> Result<Range<usize>> {
    let func = desc.function(EntryPoint::Generate)?;

    let mut keys: Vec<usize> = func
        .inputs
        .iter()
        .filter_map(|s| cache_layer(&s.name, "k_cache_"))
        .collect();
    keys.sort_unstable();

    let mut values: Vec<usize> = func
        .inputs
        .iter()
        .filter_map(|s| cache_layer(&s.name, "v_cache_"))
        .collect();
    values.sort_unstable();

    if keys.is_empty() {
        return Err(AxonError::ManifestMalformed(format!(
            "fragment {} declares no k_cache inputs",
            desc.name
        )));
    }
    if keys != values {
        return Err(AxonError::ManifestMalformed(format!(
            "fragment {} declares mismatched k_cache/v_cache layer sets",
            desc.name
        )));
    }

    let start = keys[0];
    let end = start + keys.len();
    if keys != (start..end).collect::<Vec<_>>() {
        return Err(AxonError::ManifestMalformed(format!(
            "fragment {} declares a non-contiguous layer range {keys:?}",
            desc.name
        )));
    }
    Ok(start..end)
}

/// Whether the descriptor declares an output named `logits` or `logits_0`.
fn emits_logits(desc: &ModelDescriptor) -> bool {
    desc.function(EntryPoint::Generate)
        .map(|f| f.output("logits").or_else(|| f.output("logits_0")).is_some())
        .unwrap_or(false)
}

/// Whether the descriptor declares an `input_ids` input on any entry.
fn consumes_token_ids(desc: &ModelDescriptor) -> bool {
    desc.functions.iter().any(|f| f.input("input_ids").is_some())
}

/// Assign roles to an ordered block-chunk set.
///
/// The chunks' declared layer ranges must tile `[0, L)` exactly once, in
/// order, without gap or overlap; the first chunk must consume token ids and
/// the last must produce logits.
pub fn assign_block_roles(descriptors: &[&ModelDescriptor]) -> Result<Vec<BlockRole>> {
    if descriptors.is_empty() {
        return Err(AxonError::ManifestMalformed(
            "no block fragments to assign roles to".into(),
        ));
    }

    let mut roles = Vec::with_capacity(descriptors.len());
    let mut next_layer = 0usize;

    for desc in descriptors {
        let layers = declared_layers(desc)?;
        if layers.start != next_layer {
            return Err(AxonError::ManifestMalformed(format!(
                "fragment {} covers layers {}..{} but layer {} was expected next",
                desc.name, layers.start, layers.end, next_layer
            )));
        }
        next_layer = layers.end;

        roles.push(BlockRole {
            layers,
            takes_token_ids: consumes_token_ids(desc),
            produces_logits: emits_logits(desc),
            multi_function: desc.is_multi_function(),
        });
    }

    if !roles[0].takes_token_ids {
        return Err(AxonError::ManifestMalformed(format!(
            "first block {} declares no input_ids input",
            descriptors[0].name
        )));
    }
    if !roles.last().unwrap().produces_logits {
        return Err(AxonError::ManifestMalformed(format!(
            "last block {} declares no logits output",
            descriptors.last().unwrap().name
        )));
    }
    for (role, desc) in roles.iter().zip(descriptors).skip(1) {
        if role.takes_token_ids {
            return Err(AxonError::ManifestMalformed(format!(
                "non-first block {} declares input_ids",
                desc.name
            )));
        }
    }

    Ok(roles)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fragment::model::{FunctionSpec, TensorSpec};
    use candle_core::DType;
    use std::collections::HashMap;

    fn chunk_descriptor(name: &str, layers: Range<usize>, first: bool, last: bool) -> ModelDescriptor {
        let mut inputs = vec![if first {
            TensorSpec::new("input_ids", &[1], DType::U32)
        } else {
            TensorSpec::new("hidden_in", &[1, 8], DType::F32)
        }];
        inputs.push(TensorSpec::new("cache_offset", &[1], DType::U32));
        for i in layers.clone() {
            inputs.push(TensorSpec::new(format!("k_cache_{i}"), &[12, 8], DType::F32));
            inputs.push(TensorSpec::new(format!("v_cache_{i}"), &[12, 8], DType::F32));
        }

        let mut outputs = vec![TensorSpec::new("hidden_out", &[1, 8], DType::F32)];
        for i in layers.clone() {
            outputs.push(TensorSpec::new(format!("k_new_{i}"), &[1, 8], DType::F32));
            outputs.push(TensorSpec::new(format!("v_new_{i}"), &[1, 8], DType::F32));
        }
        if last {
            outputs.push(TensorSpec::new("logits", &[1, 32], DType::F32));
        }

        ModelDescriptor {
            name: name.into(),
            functions: vec![FunctionSpec {
                entry: EntryPoint::Generate,
                inputs,
                outputs,
            }],
            metadata: HashMap::new(),
        }
    }

    #[test]
    fn roles_for_two_chunks() {
        let a = chunk_descriptor("m_chunk_01of02", 0..2, true, false);
        let b = chunk_descriptor("m_chunk_02of02", 2..4, false, true);

        let roles = assign_block_roles(&[&a, &b]).unwrap();
        assert_eq!(roles.len(), 2);
        assert_eq!(roles[0].layers, 0..2);
        assert!(roles[0].takes_token_ids);
        assert!(!roles[0].produces_logits);
        assert_eq!(roles[1].layers, 2..4);
        assert!(roles[1].produces_logits);
    }

    #[test]
    fn gap_in_layer_tiling_rejected() {
        let a = chunk_descriptor("m_chunk_01of02", 0..2, true, false);
        let b = chunk_descriptor("m_chunk_02of02", 3..5, false, true);

        let err = assign_block_roles(&[&a, &b]).unwrap_err();
        assert!(matches!(err, AxonError::ManifestMalformed(_)));
    }

    #[test]
    fn overlap_in_layer_tiling_rejected() {
        let a = chunk_descriptor("m_chunk_01of02", 0..3, true, false);
        let b = chunk_descriptor("m_chunk_02of02", 2..4, false, true);

        assert!(assign_block_roles(&[&a, &b]).is_err());
    }

    #[test]
    fn missing_embeddings_rejected() {
        let a = chunk_descriptor("m_chunk_01of02", 0..2, false, false);
        let b = chunk_descriptor("m_chunk_02of02", 2..4, false, true);

        let err = assign_block_roles(&[&a, &b]).unwrap_err();
        let text = err.to_string();
        assert!(text.contains("input_ids"), "unexpected error: {text}");
    }

    #[test]
    fn missing_lm_head_rejected() {
        let a = chunk_descriptor("m_chunk_01of02", 0..2, true, false);
        let b = chunk_descriptor("m_chunk_02of02", 2..4, false, false);

        let err = assign_block_roles(&[&a, &b]).unwrap_err();
        assert!(err.to_string().contains("logits"));
    }

    #[test]
    fn mismatched_kv_sets_rejected() {
        let mut a = chunk_descriptor("m_chunk_01of01", 0..2, true, true);
        // Drop one v_cache binding.
        a.functions[0].inputs.retain(|s| s.name != "v_cache_1");

        assert!(assign_block_roles(&[&a]).is_err());
    }
}
