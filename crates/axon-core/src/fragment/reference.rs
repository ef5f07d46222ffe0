//! Reference fragment runtime.
//!
//! In-process CPU implementation of the compiled-model contract, used for
//! correctness testing, examples, and benches. It is not optimized; its job
//! is to be deterministic and to actually read the K/V cache, so that cache
//! ordering bugs change the emitted token sequence instead of hiding.
//!
//! The synthetic model is a stack of "mixer" layers: each layer projects the
//! hidden state into per-layer K/V rows and blends every position with the
//! running mean of all values visible to it (cache rows plus in-window rows
//! up to and including itself). The blend is causal and padding-aware, so a
//! prompt ingested in batched windows produces bit-identical hidden states to
//! the same prompt ingested token by token.

use crate::error::{AxonError, Result};
use crate::fragment::model::{
    CompiledModel, Dim, EntryPoint, FunctionSpec, ModelDescriptor, ModelRuntime, TensorMap,
    TensorSpec,
};
use async_trait::async_trait;
use candle_core::{DType, Device, Tensor};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// File extension used by reference artifacts.
pub const REFERENCE_EXTENSION: &str = "refpkg";

/// Shape of the synthetic model realized by the reference runtime.
#[derive(Debug, Clone)]
pub struct ReferenceSpec {
    /// Number of block-chunk artifacts the model is split into.
    pub num_chunks: usize,
    /// Total transformer layers across all chunks.
    pub num_layers: usize,
    /// Hidden dimension. The K/V width equals it.
    pub hidden_size: usize,
    /// Vocabulary size.
    pub vocab_size: usize,
    /// Prefill window length (the batched entry point's query length).
    pub batch_size: usize,
    /// Total context length.
    pub context_length: usize,
    /// Padding token id.
    pub pad_token_id: u32,
    /// Beginning-of-sequence token id.
    pub bos_token_id: u32,
    /// End-of-sequence token id.
    pub eos_token_id: u32,
    /// Artificial delay injected into every cache-updater call.
    pub updater_delay: Option<Duration>,
    /// Force the sampler to emit EOS on its n-th selection (1-based).
    pub force_eos_after: Option<usize>,
}

impl Default for ReferenceSpec {
    fn default() -> Self {
        Self {
            num_chunks: 2,
            num_layers: 2,
            hidden_size: 8,
            vocab_size: 32,
            batch_size: 4,
            context_length: 16,
            pad_token_id: 0,
            bos_token_id: 1,
            // Outside every vocabulary, so argmax alone never ends a
            // session; EOS behavior is exercised through force_eos_after.
            eos_token_id: u32::MAX,
            updater_delay: None,
            force_eos_after: None,
        }
    }
}

impl ReferenceSpec {
    /// Cache rows available: `context_length - batch_size`.
    pub fn cache_length(&self) -> usize {
        self.context_length - self.batch_size
    }

    fn chunk_layers(&self, chunk: usize) -> std::ops::Range<usize> {
        let per = self.num_layers / self.num_chunks;
        chunk * per..(chunk + 1) * per
    }
}

/// One observed cache-updater write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpdateRecord {
    /// First cache row written.
    pub offset: usize,
    /// Number of rows written.
    pub rows: usize,
}

/// Runtime that fabricates reference fragments from artifact filenames.
///
/// Artifact files carry no payload; the filename alone selects which
/// fragment to build. Use [`scaffold`] to lay a matching directory out.
pub struct ReferenceRuntime {
    spec: ReferenceSpec,
    updates: Arc<Mutex<Vec<UpdateRecord>>>,
}

impl ReferenceRuntime {
    /// Create a runtime for the given synthetic model shape.
    pub fn new(spec: ReferenceSpec) -> Self {
        Self {
            spec,
            updates: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// The model shape this runtime fabricates.
    pub fn spec(&self) -> &ReferenceSpec {
        &self.spec
    }

    /// Every cache write observed so far, in submission order per layer.
    pub fn update_log(&self) -> Vec<UpdateRecord> {
        self.updates.lock().clone()
    }

    /// Clear the observed-write log.
    pub fn clear_update_log(&self) {
        self.updates.lock().clear();
    }
}

impl ModelRuntime for ReferenceRuntime {
    fn artifact_extension(&self) -> &str {
        REFERENCE_EXTENSION
    }

    fn open(&self, path: &Path) -> Result<Box<dyn CompiledModel>> {
        let name = path
            .file_stem()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let lower = name.to_ascii_lowercase();

        if lower.contains("cache") {
            return Ok(Box::new(ReferenceUpdater::new(
                name,
                &self.spec,
                self.updates.clone(),
            )));
        }
        if lower.contains("logit") {
            return Ok(Box::new(ReferenceSampler::new(name, &self.spec)));
        }

        let chunk = parse_chunk_index(&name).ok_or_else(|| AxonError::LoadFailed {
            fragment: name.clone(),
            source: "filename carries no _chunk_NNofMM tag".into(),
        })?;
        if chunk >= self.spec.num_chunks || self.spec.num_layers % self.spec.num_chunks != 0 {
            return Err(AxonError::LoadFailed {
                fragment: name,
                source: format!(
                    "chunk index {chunk} out of range for {} chunks over {} layers",
                    self.spec.num_chunks, self.spec.num_layers
                )
                .into(),
            });
        }
        Ok(Box::new(ReferenceBlock::new(name, &self.spec, chunk)))
    }
}

/// Write an artifact layout for `spec` under `dir`.
///
/// Creates `<prefix>_chunk_<NN>of<MM>` block files plus the two processor
/// files, all empty: the reference runtime reads names, not bytes.
pub fn scaffold(dir: &Path, spec: &ReferenceSpec, prefix: &str) -> Result<()> {
    for i in 0..spec.num_chunks {
        let name = format!(
            "{prefix}_chunk_{:02}of{:02}.{REFERENCE_EXTENSION}",
            i + 1,
            spec.num_chunks
        );
        std::fs::write(dir.join(name), b"")?;
    }
    std::fs::write(dir.join(format!("cache-processor.{REFERENCE_EXTENSION}")), b"")?;
    std::fs::write(dir.join(format!("logit-processor.{REFERENCE_EXTENSION}")), b"")?;
    Ok(())
}

fn parse_chunk_index(name: &str) -> Option<usize> {
    let tail = &name[name.find("_chunk_")? + "_chunk_".len()..];
    let digits: String = tail.chars().take_while(|c| c.is_ascii_digit()).collect();
    let index: usize = digits.parse().ok()?;
    index.checked_sub(1)
}

/// Deterministic embedding table entry.
fn embedding_value(token: usize, dim: usize) -> f32 {
    (((token * 37 + dim * 11 + 13) % 97) as f32) / 97.0 - 0.5
}

fn key_scale(layer: usize) -> f32 {
    0.5 + 0.17 * layer as f32
}

fn value_scale(layer: usize) -> f32 {
    0.3 + 0.11 * layer as f32
}

fn value_shift(layer: usize) -> f32 {
    0.01 * (layer + 1) as f32
}

fn require_loaded(name: &str, loaded: bool) -> Result<()> {
    if loaded {
        Ok(())
    } else {
        Err(AxonError::InferenceFailed {
            fragment: name.to_string(),
            source: "weights not loaded".into(),
        })
    }
}

fn input_tensor<'m>(name: &str, inputs: &'m TensorMap, binding: &str) -> Result<&'m Tensor> {
    inputs.get(binding).ok_or_else(|| AxonError::InferenceFailed {
        fragment: name.to_string(),
        source: format!("missing {binding} input").into(),
    })
}

fn scalar_offset(name: &str, inputs: &TensorMap) -> Result<usize> {
    let t = input_tensor(name, inputs, "cache_offset")?;
    let v = t.flatten_all()?.to_vec1::<u32>()?;
    v.first().copied().map(|v| v as usize).ok_or_else(|| {
        AxonError::InferenceFailed {
            fragment: name.to_string(),
            source: "empty cache_offset input".into(),
        }
    })
}

/// One block-chunk fragment of the synthetic model.
struct ReferenceBlock {
    descriptor: ModelDescriptor,
    layers: std::ops::Range<usize>,
    first: bool,
    last: bool,
    hidden_size: usize,
    vocab_size: usize,
    embeddings: Option<Tensor>,
    loaded: bool,
}

impl ReferenceBlock {
    fn new(name: String, spec: &ReferenceSpec, chunk: usize) -> Self {
        let layers = spec.chunk_layers(chunk);
        let first = chunk == 0;
        let last = chunk == spec.num_chunks - 1;
        let descriptor = Self::describe(&name, spec, layers.clone(), first, last);
        Self {
            descriptor,
            layers,
            first,
            last,
            hidden_size: spec.hidden_size,
            vocab_size: spec.vocab_size,
            embeddings: None,
            loaded: false,
        }
    }

    fn describe(
        name: &str,
        spec: &ReferenceSpec,
        layers: std::ops::Range<usize>,
        first: bool,
        last: bool,
    ) -> ModelDescriptor {
        let function = |entry: EntryPoint, len: usize| {
            let mut inputs = vec![
                if first {
                    TensorSpec::new("input_ids", &[len], DType::U32)
                } else {
                    TensorSpec::new("hidden_in", &[len, spec.hidden_size], DType::F32)
                },
                TensorSpec::new("position_ids", &[len], DType::I64),
                TensorSpec::new("cache_offset", &[1], DType::U32),
            ];
            for i in layers.clone() {
                inputs.push(TensorSpec::new(
                    format!("k_cache_{i}"),
                    &[spec.cache_length(), spec.hidden_size],
                    DType::F32,
                ));
                inputs.push(TensorSpec::new(
                    format!("v_cache_{i}"),
                    &[spec.cache_length(), spec.hidden_size],
                    DType::F32,
                ));
            }
            let mut outputs = vec![TensorSpec::new(
                "hidden_out",
                &[len, spec.hidden_size],
                DType::F32,
            )];
            for i in layers.clone() {
                outputs.push(TensorSpec::new(
                    format!("k_new_{i}"),
                    &[len, spec.hidden_size],
                    DType::F32,
                ));
                outputs.push(TensorSpec::new(
                    format!("v_new_{i}"),
                    &[len, spec.hidden_size],
                    DType::F32,
                ));
            }
            if last && entry == EntryPoint::Generate {
                outputs.push(TensorSpec::new("logits", &[1, spec.vocab_size], DType::F32));
            }
            FunctionSpec {
                entry,
                inputs,
                outputs,
            }
        };

        let mut metadata = HashMap::new();
        metadata.insert("context_length".into(), spec.context_length.to_string());
        metadata.insert("batch_size".into(), spec.batch_size.to_string());
        metadata.insert("pad_token_id".into(), spec.pad_token_id.to_string());
        metadata.insert("bos_token_id".into(), spec.bos_token_id.to_string());
        metadata.insert("eos_token_id".into(), spec.eos_token_id.to_string());

        ModelDescriptor {
            name: name.to_string(),
            functions: vec![
                function(EntryPoint::Prefill, spec.batch_size),
                function(EntryPoint::Generate, 1),
            ],
            metadata,
        }
    }

    fn hidden_rows(&self, inputs: &TensorMap, len: usize) -> Result<Vec<Vec<f32>>> {
        let name = &self.descriptor.name;
        if self.first {
            let ids = input_tensor(name, inputs, "input_ids")?;
            let table = self.embeddings.as_ref().ok_or_else(|| {
                AxonError::InferenceFailed {
                    fragment: name.clone(),
                    source: "embedding table not loaded".into(),
                }
            })?;
            let rows = table.index_select(ids, 0)?;
            Ok(rows.to_vec2::<f32>()?)
        } else {
            let hidden = input_tensor(name, inputs, "hidden_in")?;
            let rows = hidden.to_vec2::<f32>()?;
            if rows.len() != len {
                return Err(AxonError::InferenceFailed {
                    fragment: name.clone(),
                    source: format!("hidden_in has {} rows, expected {len}", rows.len()).into(),
                });
            }
            Ok(rows)
        }
    }
}

#[async_trait]
impl CompiledModel for ReferenceBlock {
    fn descriptor(&self) -> &ModelDescriptor {
        &self.descriptor
    }

    fn load(&mut self) -> Result<()> {
        if self.first || self.last {
            let mut table = Vec::with_capacity(self.vocab_size * self.hidden_size);
            for token in 0..self.vocab_size {
                for dim in 0..self.hidden_size {
                    table.push(embedding_value(token, dim));
                }
            }
            self.embeddings = Some(Tensor::from_vec(
                table,
                (self.vocab_size, self.hidden_size),
                &Device::Cpu,
            )?);
        }
        self.loaded = true;
        Ok(())
    }

    fn unload(&mut self) {
        self.embeddings = None;
        self.loaded = false;
    }

    async fn predict(&self, entry: EntryPoint, inputs: &TensorMap) -> Result<TensorMap> {
        require_loaded(&self.descriptor.name, self.loaded)?;
        let name = &self.descriptor.name;
        let len = match entry {
            EntryPoint::Prefill => self
                .descriptor
                .function(EntryPoint::Prefill)?
                .require_input(if self.first { "input_ids" } else { "hidden_in" })?
                .static_dim(0)?,
            EntryPoint::Generate => 1,
        };

        let positions = input_tensor(name, inputs, "position_ids")?.to_vec1::<i64>()?;
        let offset = scalar_offset(name, inputs)?;
        let mut hidden = self.hidden_rows(inputs, len)?;
        let width = self.hidden_size;

        let mut outputs = TensorMap::new();

        for layer in self.layers.clone() {
            let cached: Vec<Vec<f32>> = if offset > 0 {
                input_tensor(name, inputs, &format!("v_cache_{layer}"))?
                    .narrow(0, 0, offset)?
                    .to_vec2::<f32>()?
            } else {
                Vec::new()
            };

            let mut k_new = vec![vec![0f32; width]; len];
            let mut v_new = vec![vec![0f32; width]; len];
            for (row, h) in hidden.iter().enumerate() {
                if positions[row] < 0 {
                    continue; // padding row
                }
                for d in 0..width {
                    k_new[row][d] = h[d] * key_scale(layer);
                    v_new[row][d] = h[d] * value_scale(layer) + value_shift(layer);
                }
            }

            // Causal running-mean mixing over everything visible to each row:
            // all populated cache rows plus in-window rows up to itself.
            let mut next = hidden.clone();
            for row in 0..len {
                if positions[row] < 0 {
                    continue;
                }
                let mut sum = vec![0f32; width];
                let mut count = 0usize;
                for v in &cached {
                    for d in 0..width {
                        sum[d] += v[d];
                    }
                    count += 1;
                }
                for (prior, v) in v_new.iter().enumerate().take(row + 1) {
                    if positions[prior] < 0 {
                        continue;
                    }
                    for d in 0..width {
                        sum[d] += v[d];
                    }
                    count += 1;
                }
                for d in 0..width {
                    next[row][d] = 0.8 * hidden[row][d] + 0.2 * sum[d] / count as f32;
                }
            }
            hidden = next;

            let flat_k: Vec<f32> = k_new.into_iter().flatten().collect();
            let flat_v: Vec<f32> = v_new.into_iter().flatten().collect();
            outputs.insert(
                format!("k_new_{layer}"),
                Tensor::from_vec(flat_k, (len, width), &Device::Cpu)?,
            );
            outputs.insert(
                format!("v_new_{layer}"),
                Tensor::from_vec(flat_v, (len, width), &Device::Cpu)?,
            );
        }

        if self.last && entry == EntryPoint::Generate {
            let table = self.embeddings.as_ref().expect("loaded");
            let final_row = Tensor::from_vec(hidden[len - 1].clone(), (1, width), &Device::Cpu)?;
            let logits = final_row.matmul(&table.t()?)?;
            outputs.insert("logits".into(), logits);
        }

        let flat: Vec<f32> = hidden.into_iter().flatten().collect();
        outputs.insert(
            "hidden_out".into(),
            Tensor::from_vec(flat, (len, width), &Device::Cpu)?,
        );
        Ok(outputs)
    }
}

/// Reference cache updater: copies fresh K/V rows into the shared cache
/// buffers at the given offset.
struct ReferenceUpdater {
    descriptor: ModelDescriptor,
    delay: Option<Duration>,
    log: Arc<Mutex<Vec<UpdateRecord>>>,
    loaded: bool,
}

impl ReferenceUpdater {
    fn new(name: String, spec: &ReferenceSpec, log: Arc<Mutex<Vec<UpdateRecord>>>) -> Self {
        let cache_shape = vec![Dim::Static(spec.cache_length()), Dim::Static(spec.hidden_size)];
        let slice_shape = vec![Dim::Dynamic, Dim::Static(spec.hidden_size)];
        let spec_of = |binding: &str, shape: &[Dim]| TensorSpec {
            name: binding.to_string(),
            shape: shape.to_vec(),
            dtype: DType::F32,
        };
        let descriptor = ModelDescriptor {
            name,
            functions: vec![FunctionSpec {
                entry: EntryPoint::Generate,
                inputs: vec![
                    spec_of("k_cache", &cache_shape),
                    spec_of("v_cache", &cache_shape),
                    spec_of("k_new", &slice_shape),
                    spec_of("v_new", &slice_shape),
                    TensorSpec::new("cache_offset", &[1], DType::U32),
                ],
                outputs: vec![],
            }],
            metadata: HashMap::new(),
        };
        Self {
            descriptor,
            delay: spec.updater_delay,
            log,
            loaded: false,
        }
    }
}

#[async_trait]
impl CompiledModel for ReferenceUpdater {
    fn descriptor(&self) -> &ModelDescriptor {
        &self.descriptor
    }

    fn load(&mut self) -> Result<()> {
        self.loaded = true;
        Ok(())
    }

    fn unload(&mut self) {
        self.loaded = false;
    }

    async fn predict(&self, _entry: EntryPoint, inputs: &TensorMap) -> Result<TensorMap> {
        require_loaded(&self.descriptor.name, self.loaded)?;
        let name = &self.descriptor.name;
        let k_new = input_tensor(name, inputs, "k_new")?;
        let v_new = input_tensor(name, inputs, "v_new")?;
        let rows = k_new.dim(0)?;
        if rows == 0 {
            return Ok(TensorMap::new()); // nothing to merge
        }

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let offset = scalar_offset(name, inputs)?;
        let k_cache = input_tensor(name, inputs, "k_cache")?;
        let v_cache = input_tensor(name, inputs, "v_cache")?;
        k_cache.slice_set(k_new, 0, offset)?;
        v_cache.slice_set(v_new, 0, offset)?;

        self.log.lock().push(UpdateRecord { offset, rows });
        Ok(TensorMap::new())
    }
}

/// Reference logit sampler: temperature-scaled softmax followed by argmax.
struct ReferenceSampler {
    descriptor: ModelDescriptor,
    eos_token: u32,
    force_eos_after: Option<usize>,
    selections: Mutex<usize>,
    loaded: bool,
}

impl ReferenceSampler {
    fn new(name: String, spec: &ReferenceSpec) -> Self {
        let descriptor = ModelDescriptor {
            name,
            functions: vec![FunctionSpec {
                entry: EntryPoint::Generate,
                inputs: vec![
                    TensorSpec::new("logits", &[1, spec.vocab_size], DType::F32),
                    TensorSpec::new("sampler_state", &[1], DType::F32),
                ],
                outputs: vec![
                    TensorSpec::new("next_token", &[1], DType::U32),
                    TensorSpec::new("sampler_state", &[1], DType::F32),
                ],
            }],
            metadata: HashMap::new(),
        };
        Self {
            descriptor,
            eos_token: spec.eos_token_id,
            force_eos_after: spec.force_eos_after,
            selections: Mutex::new(0),
            loaded: false,
        }
    }
}

#[async_trait]
impl CompiledModel for ReferenceSampler {
    fn descriptor(&self) -> &ModelDescriptor {
        &self.descriptor
    }

    fn load(&mut self) -> Result<()> {
        self.loaded = true;
        Ok(())
    }

    fn unload(&mut self) {
        self.loaded = false;
    }

    async fn predict(&self, _entry: EntryPoint, inputs: &TensorMap) -> Result<TensorMap> {
        require_loaded(&self.descriptor.name, self.loaded)?;
        let name = &self.descriptor.name;
        let logits = input_tensor(name, inputs, "logits")?;

        let temperature = match inputs.get("sampler_state") {
            Some(state) => state.flatten_all()?.to_vec1::<f32>()?[0],
            None => 0.0,
        };

        let token = if temperature > 0.0 {
            let scaled = (logits / temperature as f64)?;
            let probs = candle_nn::ops::softmax(&scaled, candle_core::D::Minus1)?;
            probs.flatten_all()?.argmax(0)?.to_scalar::<u32>()?
        } else {
            logits.flatten_all()?.argmax(0)?.to_scalar::<u32>()?
        };

        let mut selections = self.selections.lock();
        *selections += 1;
        let token = match self.force_eos_after {
            Some(n) if *selections >= n => self.eos_token,
            _ => token,
        };

        let mut outputs = TensorMap::new();
        outputs.insert(
            "next_token".into(),
            Tensor::from_vec(vec![token], (1,), &Device::Cpu)?,
        );
        if let Some(state) = inputs.get("sampler_state") {
            outputs.insert("sampler_state".into(), state.clone());
        }
        Ok(outputs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_index_parsing() {
        assert_eq!(parse_chunk_index("m_chunk_01of02"), Some(0));
        assert_eq!(parse_chunk_index("m_chunk_12of12"), Some(11));
        assert_eq!(parse_chunk_index("m_chunk_00of02"), None);
        assert_eq!(parse_chunk_index("cache-processor"), None);
    }

    #[test]
    fn scaffold_writes_complete_layout() {
        let dir = tempfile::tempdir().unwrap();
        let spec = ReferenceSpec::default();
        scaffold(dir.path(), &spec, "tiny").unwrap();

        let manifest =
            crate::fragment::loader::discover(dir.path(), Some("tiny"), REFERENCE_EXTENSION)
                .unwrap();
        assert_eq!(manifest.blocks.len(), spec.num_chunks);
    }

    #[test]
    fn block_descriptor_has_both_entries() {
        let runtime = ReferenceRuntime::new(ReferenceSpec::default());
        let block = runtime
            .open(Path::new("tiny_chunk_01of02.refpkg"))
            .unwrap();
        let desc = block.descriptor();
        assert!(desc.is_multi_function());

        let prefill = desc.function(EntryPoint::Prefill).unwrap();
        assert_eq!(
            prefill.require_input("input_ids").unwrap().static_dim(0).unwrap(),
            4
        );
        let generate = desc.function(EntryPoint::Generate).unwrap();
        assert_eq!(
            generate.require_input("input_ids").unwrap().static_dim(0).unwrap(),
            1
        );
    }

    #[tokio::test]
    async fn updater_is_idempotent_on_empty_slice() {
        let spec = ReferenceSpec::default();
        let runtime = ReferenceRuntime::new(spec.clone());
        let mut updater = runtime.open(Path::new("cache-processor.refpkg")).unwrap();
        updater.load().unwrap();

        let cache = Tensor::zeros(
            (spec.cache_length(), spec.hidden_size),
            DType::F32,
            &Device::Cpu,
        )
        .unwrap();
        let empty = Tensor::zeros((0, spec.hidden_size), DType::F32, &Device::Cpu).unwrap();
        let mut inputs = TensorMap::new();
        inputs.insert("k_cache".into(), cache.clone());
        inputs.insert("v_cache".into(), cache.clone());
        inputs.insert("k_new".into(), empty.clone());
        inputs.insert("v_new".into(), empty);
        inputs.insert(
            "cache_offset".into(),
            Tensor::from_vec(vec![0u32], (1,), &Device::Cpu).unwrap(),
        );

        updater.predict(EntryPoint::Generate, &inputs).await.unwrap();
        assert!(runtime.update_log().is_empty());
    }

    #[tokio::test]
    async fn sampler_argmax_is_deterministic() {
        let spec = ReferenceSpec::default();
        let runtime = ReferenceRuntime::new(spec.clone());
        let mut sampler = runtime.open(Path::new("logit-processor.refpkg")).unwrap();
        sampler.load().unwrap();

        let mut logits = vec![0f32; spec.vocab_size];
        logits[7] = 3.5;
        let mut inputs = TensorMap::new();
        inputs.insert(
            "logits".into(),
            Tensor::from_vec(logits, (1, spec.vocab_size), &Device::Cpu).unwrap(),
        );

        for _ in 0..3 {
            let outputs = sampler.predict(EntryPoint::Generate, &inputs).await.unwrap();
            let token = outputs["next_token"]
                .flatten_all()
                .unwrap()
                .to_vec1::<u32>()
                .unwrap()[0];
            assert_eq!(token, 7);
        }
    }
}
