//! Compiled model handles.
//!
//! A pipeline is stitched together from independently compiled network
//! artifacts. Each artifact is wrapped in a [`CompiledModel`] handle that
//! exposes its declared input/output bindings and a `predict` call; the
//! pipeline never looks inside the artifact itself. The backend that produced
//! the artifacts supplies a [`ModelRuntime`] that knows how to open them.

use crate::error::{AxonError, Result};
use async_trait::async_trait;
use candle_core::{DType, Tensor};
use std::collections::HashMap;
use std::path::Path;

/// Named tensor bundle passed to and from a fragment's `predict`.
pub type TensorMap = HashMap<String, Tensor>;

/// A declared tensor dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dim {
    /// Dimension with a fixed compile-time extent.
    Static(usize),
    /// Dimension left dynamic by the artifact.
    Dynamic,
}

impl Dim {
    /// The static extent, if there is one.
    pub fn as_static(&self) -> Option<usize> {
        match self {
            Dim::Static(n) => Some(*n),
            Dim::Dynamic => None,
        }
    }
}

/// A declared input or output binding of a compiled artifact.
#[derive(Debug, Clone)]
pub struct TensorSpec {
    /// Binding name, e.g. `input_ids` or `k_cache_0`.
    pub name: String,
    /// Declared shape.
    pub shape: Vec<Dim>,
    /// Element type.
    pub dtype: DType,
}

impl TensorSpec {
    /// Create a fully static spec.
    pub fn new(name: impl Into<String>, dims: &[usize], dtype: DType) -> Self {
        Self {
            name: name.into(),
            shape: dims.iter().copied().map(Dim::Static).collect(),
            dtype,
        }
    }

    /// The static extent of the last dimension, or `ShapeInconsistent`.
    pub fn last_dim(&self) -> Result<usize> {
        self.shape
            .last()
            .and_then(Dim::as_static)
            .ok_or_else(|| {
                AxonError::ShapeInconsistent(format!(
                    "binding {} has no static last dimension",
                    self.name
                ))
            })
    }

    /// The static extent of dimension `idx`, or `ShapeInconsistent`.
    pub fn static_dim(&self, idx: usize) -> Result<usize> {
        self.shape
            .get(idx)
            .and_then(Dim::as_static)
            .ok_or_else(|| {
                AxonError::ShapeInconsistent(format!(
                    "binding {} dimension {} is missing or dynamic",
                    self.name, idx
                ))
            })
    }
}

/// Entry point of a multi-function fragment.
///
/// Multi-function fragments carry two entry points over the same weights,
/// differing only in the declared query length: a batched one used while
/// ingesting the prompt and a single-token one used while decoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryPoint {
    /// Batched prompt ingestion.
    Prefill,
    /// Single-token decoding.
    Generate,
}

impl std::fmt::Display for EntryPoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntryPoint::Prefill => write!(f, "prefill"),
            EntryPoint::Generate => write!(f, "generate"),
        }
    }
}

/// One callable function of a compiled artifact.
#[derive(Debug, Clone)]
pub struct FunctionSpec {
    /// Which entry point this function realizes.
    pub entry: EntryPoint,
    /// Declared inputs.
    pub inputs: Vec<TensorSpec>,
    /// Declared outputs.
    pub outputs: Vec<TensorSpec>,
}

impl FunctionSpec {
    /// Look up a declared input by name.
    pub fn input(&self, name: &str) -> Option<&TensorSpec> {
        self.inputs.iter().find(|s| s.name == name)
    }

    /// Look up a declared output by name.
    pub fn output(&self, name: &str) -> Option<&TensorSpec> {
        self.outputs.iter().find(|s| s.name == name)
    }

    /// Required input lookup, failing with `ShapeInconsistent`.
    pub fn require_input(&self, name: &str) -> Result<&TensorSpec> {
        self.input(name).ok_or_else(|| {
            AxonError::ShapeInconsistent(format!("missing declared input {name}"))
        })
    }
}

/// Declared surface of one compiled artifact.
#[derive(Debug, Clone)]
pub struct ModelDescriptor {
    /// Artifact name (filename stem).
    pub name: String,
    /// Callable functions. Single-function artifacts declare exactly one.
    pub functions: Vec<FunctionSpec>,
    /// Free-form metadata recorded by the conversion tool-chain.
    pub metadata: HashMap<String, String>,
}

impl ModelDescriptor {
    /// Whether the artifact exposes both a prefill and a generate entry.
    pub fn is_multi_function(&self) -> bool {
        self.functions.len() > 1
    }

    /// The function for `entry`, falling back to the sole function of a
    /// single-function artifact.
    pub fn function(&self, entry: EntryPoint) -> Result<&FunctionSpec> {
        if let Some(f) = self.functions.iter().find(|f| f.entry == entry) {
            return Ok(f);
        }
        match self.functions.as_slice() {
            [only] => Ok(only),
            _ => Err(AxonError::ShapeInconsistent(format!(
                "fragment {} has no {entry} entry point",
                self.name
            ))),
        }
    }

    /// Metadata value parsed as an integer, if present.
    pub fn metadata_usize(&self, key: &str) -> Option<usize> {
        self.metadata.get(key).and_then(|v| v.parse().ok())
    }
}

/// Handle to one compiled network artifact.
///
/// Implementations wrap whatever the target runtime produces; the pipeline
/// treats the artifact as opaque and interacts with it only through the
/// descriptor and `predict`.
#[async_trait]
pub trait CompiledModel: Send + Sync {
    /// Declared inputs, outputs, functions, and metadata.
    fn descriptor(&self) -> &ModelDescriptor;

    /// Bring the artifact's weights into memory. Called once before first use.
    fn load(&mut self) -> Result<()>;

    /// Release the artifact's weights.
    fn unload(&mut self);

    /// Run one forward pass of the selected entry point.
    ///
    /// Single-function artifacts ignore `entry`.
    async fn predict(&self, entry: EntryPoint, inputs: &TensorMap) -> Result<TensorMap>;
}

/// Backend capable of opening compiled artifacts from disk.
pub trait ModelRuntime: Send + Sync {
    /// File extension of this runtime's compiled artifacts, without the dot.
    fn artifact_extension(&self) -> &str;

    /// Open the artifact at `path` without loading its weights.
    fn open(&self, path: &Path) -> Result<Box<dyn CompiledModel>>;
}

/// Fetch a named tensor from a [`TensorMap`].
pub fn take_output(outputs: &mut TensorMap, name: &str) -> Result<Tensor> {
    outputs.remove(name).ok_or_else(|| {
        AxonError::ShapeInconsistent(format!("fragment produced no {name} output"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_function_descriptor() -> ModelDescriptor {
        ModelDescriptor {
            name: "blocks".into(),
            functions: vec![
                FunctionSpec {
                    entry: EntryPoint::Prefill,
                    inputs: vec![TensorSpec::new("hidden_in", &[64, 256], DType::F32)],
                    outputs: vec![TensorSpec::new("hidden_out", &[64, 256], DType::F32)],
                },
                FunctionSpec {
                    entry: EntryPoint::Generate,
                    inputs: vec![TensorSpec::new("hidden_in", &[1, 256], DType::F32)],
                    outputs: vec![TensorSpec::new("hidden_out", &[1, 256], DType::F32)],
                },
            ],
            metadata: HashMap::new(),
        }
    }

    #[test]
    fn entry_point_selection() {
        let desc = two_function_descriptor();
        assert!(desc.is_multi_function());

        let prefill = desc.function(EntryPoint::Prefill).unwrap();
        assert_eq!(prefill.input("hidden_in").unwrap().static_dim(0).unwrap(), 64);

        let generate = desc.function(EntryPoint::Generate).unwrap();
        assert_eq!(generate.input("hidden_in").unwrap().static_dim(0).unwrap(), 1);
    }

    #[test]
    fn single_function_fallback() {
        let mut desc = two_function_descriptor();
        desc.functions.truncate(1);
        desc.functions[0].entry = EntryPoint::Generate;

        // Either entry resolves to the sole function.
        assert!(desc.function(EntryPoint::Prefill).is_ok());
        assert!(desc.function(EntryPoint::Generate).is_ok());
        assert!(!desc.is_multi_function());
    }

    #[test]
    fn dynamic_dim_rejected() {
        let spec = TensorSpec {
            name: "logits".into(),
            shape: vec![Dim::Static(1), Dim::Dynamic],
            dtype: DType::F32,
        };
        assert!(spec.last_dim().is_err());
        assert_eq!(spec.static_dim(0).unwrap(), 1);
    }

    #[test]
    fn metadata_parsing() {
        let mut desc = two_function_descriptor();
        desc.metadata.insert("context_length".into(), "1024".into());
        desc.metadata.insert("part".into(), "prefill".into());

        assert_eq!(desc.metadata_usize("context_length"), Some(1024));
        assert_eq!(desc.metadata_usize("part"), None);
        assert_eq!(desc.metadata_usize("absent"), None);
    }
}
