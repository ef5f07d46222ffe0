//! Pipeline orchestration.
//!
//! The pipeline stitches an ordered list of block fragments, a cache
//! updater, and a logit sampler into a single logical forward pass, and
//! drives them through a two-phase decode loop:
//!
//! - **Prefill** ingests the prompt in windows of `input_length`, populating
//!   the K/V cache without emitting tokens.
//! - **Generate** decodes one token at a time, reading and extending the
//!   cache, and streams each token to the caller.
//!
//! Per-layer cache updates are issued asynchronously and awaited at step
//! boundaries, so a layer's write overlaps the compute of every later
//! fragment in the same step.

pub mod cache;
pub mod config;
pub mod sampler;
pub mod stream;
pub mod updater;

pub use cache::KvCache;
pub use config::PipelineConfig;
pub use sampler::SamplerStage;
pub use stream::{Prediction, PredictionStream};
pub use updater::CacheDispatcher;

use crate::error::{AxonError, Result};
use crate::fragment::loader::{self, LoadedSet, Manifest};
use crate::fragment::model::{
    take_output, CompiledModel, EntryPoint, ModelDescriptor, ModelRuntime, TensorMap,
};
use crate::fragment::role::{assign_block_roles, BlockRole};
use candle_core::{Device, Tensor};
use std::path::Path;
use tracing::{debug, info};

/// Session state of a pipeline.
///
/// One decode session runs per `predict` call; any terminal state requires
/// an explicit [`Pipeline::reset`] before the next session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    /// Ready to accept a decode session.
    Idle,
    /// Ingesting the prompt.
    Prefill,
    /// Decoding tokens.
    Generate,
    /// Session finished normally.
    Done,
    /// Session cancelled by the consumer.
    Cancelled,
    /// Session terminated by an error.
    Failed,
}

impl PipelineState {
    /// Short lowercase name.
    pub fn name(&self) -> &'static str {
        match self {
            PipelineState::Idle => "idle",
            PipelineState::Prefill => "prefill",
            PipelineState::Generate => "generate",
            PipelineState::Done => "done",
            PipelineState::Cancelled => "cancelled",
            PipelineState::Failed => "failed",
        }
    }
}

/// Options for [`Pipeline::load`].
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    /// Restrict block discovery to filenames starting with this prefix.
    pub prefix: Option<String>,
    /// Device the cache buffers and step inputs live on.
    pub device: Device,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            prefix: None,
            device: Device::Cpu,
        }
    }
}

struct BlockStage {
    model: Box<dyn CompiledModel>,
    name: String,
    role: BlockRole,
}

/// The chunked inference pipeline.
///
/// Owns every fragment, the K/V cache buffers, and the cache cursor for the
/// duration of a decode session. All `predict` calls are serialized: the
/// returned [`PredictionStream`] borrows the pipeline mutably.
pub struct Pipeline {
    blocks: Vec<BlockStage>,
    dispatcher: CacheDispatcher,
    sampler: SamplerStage,
    cache: KvCache,
    config: PipelineConfig,
    state: PipelineState,
    entry: EntryPoint,
    device: Device,
}

impl Pipeline {
    /// Discover, instantiate, and assemble the pipeline in `dir`.
    ///
    /// `progress` receives a short status and a monotone fraction in
    /// `[0, 1]` as loading proceeds.
    pub fn load(
        runtime: &dyn ModelRuntime,
        dir: &Path,
        options: &PipelineOptions,
        progress: impl FnMut(&str, f32),
    ) -> Result<Self> {
        let manifest = loader::discover(
            dir,
            options.prefix.as_deref(),
            runtime.artifact_extension(),
        )?;
        let set = loader::load_set(runtime, &manifest, progress)?;
        let pipeline = Self::assemble(set, &manifest, &options.device)?;
        info!(
            blocks = pipeline.blocks.len(),
            layers = pipeline.config.num_layers,
            context = pipeline.config.context_length,
            "pipeline ready"
        );
        Ok(pipeline)
    }

    fn assemble(set: LoadedSet, manifest: &Manifest, device: &Device) -> Result<Self> {
        let mut descriptors: Vec<ModelDescriptor> =
            set.blocks.iter().map(|m| m.descriptor().clone()).collect();
        for (descriptor, path) in descriptors.iter_mut().zip(&manifest.blocks) {
            if let Some(sidecar) = loader::read_sidecar(path)? {
                sidecar.merge_into(&mut descriptor.metadata);
            }
        }

        let refs: Vec<&ModelDescriptor> = descriptors.iter().collect();
        let roles = assign_block_roles(&refs)?;
        let config = PipelineConfig::infer(&refs, &roles)?;

        let cache = KvCache::new(config.num_layers, config.cache_length, config.kv_width, device)?;
        let dispatcher = CacheDispatcher::new(set.cache_updater);
        let sampler = SamplerStage::new(set.logit_sampler, device)?;

        let blocks = set
            .blocks
            .into_iter()
            .zip(roles)
            .map(|(model, role)| {
                let name = model.descriptor().name.clone();
                BlockStage { model, name, role }
            })
            .collect();

        Ok(Self {
            blocks,
            dispatcher,
            sampler,
            cache,
            config,
            state: PipelineState::Idle,
            entry: EntryPoint::Generate,
            device: device.clone(),
        })
    }

    /// Inferred pipeline configuration.
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Current session state.
    pub fn state(&self) -> PipelineState {
        self.state
    }

    /// Populated context positions. Between steps this is always a
    /// consistent post-step value.
    pub fn cache_cursor(&self) -> usize {
        self.cache.cursor()
    }

    /// Start a decode session.
    ///
    /// Returns a lazy stream of predictions; nothing runs until the first
    /// pull. An empty prompt is seeded with the declared BOS id. Fails with
    /// `ResetRequired` unless the pipeline is idle.
    pub fn predict(
        &mut self,
        prompt_ids: &[u32],
        max_new_tokens: usize,
    ) -> Result<PredictionStream<'_>> {
        if self.state != PipelineState::Idle {
            return Err(AxonError::ResetRequired(self.state.name()));
        }
        let tokens = if prompt_ids.is_empty() {
            vec![self.config.bos_token_id]
        } else {
            prompt_ids.to_vec()
        };
        debug!(
            prompt = tokens.len(),
            max_new_tokens, "starting decode session"
        );
        self.state = PipelineState::Prefill;
        Ok(PredictionStream::new(self, tokens, max_new_tokens))
    }

    /// Drain in-flight cache updates, zero the cache, reset the sampler
    /// state and cursor, and return to `Idle`.
    pub async fn reset(&mut self) -> Result<()> {
        self.dispatcher.drain().await?;
        self.cache.reset()?;
        self.sampler.reset()?;
        self.state = PipelineState::Idle;
        Ok(())
    }

    /// Ingest one prompt window of `chunk.len() <= input_length` real
    /// tokens, left-padding the window and submitting per-layer cache
    /// updates for the real rows only.
    pub(crate) async fn step_prefill(&mut self, chunk: &[u32]) -> Result<()> {
        let rows = chunk.len();
        if self.cache.remaining() < rows {
            return Err(AxonError::ContextOverflow {
                cursor: self.cache.cursor(),
                cache_length: self.cache.cache_length(),
            });
        }
        self.entry = EntryPoint::Prefill;

        let window = self.config.input_length;
        let pad = window - rows;
        let cursor = self.cache.cursor();

        let mut ids = vec![self.config.pad_token_id; pad];
        ids.extend_from_slice(chunk);
        let mut positions = vec![-1i64; pad];
        positions.extend((0..rows).map(|i| (cursor + i) as i64));

        self.run_chain(ids, positions, pad, rows, false).await?;
        self.dispatcher.drain().await?;
        self.cache.advance(rows)?;
        Ok(())
    }

    /// Decode one token: run the full chain including LM head and sampler,
    /// write the input token's K/V row, and return the selected id.
    pub(crate) async fn step_generate(&mut self, input_id: u32) -> Result<u32> {
        if self.cache.remaining() == 0 {
            return Err(AxonError::ContextOverflow {
                cursor: self.cache.cursor(),
                cache_length: self.cache.cache_length(),
            });
        }
        self.entry = EntryPoint::Generate;

        let cursor = self.cache.cursor();
        let logits = self
            .run_chain(vec![input_id], vec![cursor as i64], 0, 1, true)
            .await?
            .ok_or_else(|| {
                AxonError::ShapeInconsistent("no block fragment produced logits".into())
            })?;
        let token = self.sampler.select(&logits).await?;
        self.dispatcher.drain().await?;
        self.cache.advance(1)?;
        Ok(token)
    }

    /// Await any in-flight cache updates without otherwise touching state.
    pub(crate) async fn drain_pending(&mut self) -> Result<()> {
        self.dispatcher.drain().await
    }

    /// Thread the hidden state through every block fragment on the active
    /// entry point, issuing one asynchronous cache update per layer as its
    /// K/V slice is produced.
    async fn run_chain(
        &mut self,
        ids: Vec<u32>,
        positions: Vec<i64>,
        pad: usize,
        rows: usize,
        want_logits: bool,
    ) -> Result<Option<Tensor>> {
        let len = ids.len();
        let ids = Tensor::from_vec(ids, (len,), &self.device)?;
        let positions = Tensor::from_vec(positions, (len,), &self.device)?;
        let offset = Tensor::from_vec(vec![self.cache.cursor() as u32], (1,), &self.device)?;

        let mut hidden: Option<Tensor> = None;
        let mut logits: Option<Tensor> = None;

        for block in &self.blocks {
            let mut inputs = TensorMap::new();
            if block.role.takes_token_ids {
                inputs.insert("input_ids".into(), ids.clone());
            } else {
                let carried = hidden.take().ok_or_else(|| {
                    AxonError::ShapeInconsistent(format!(
                        "block {} expects hidden state but none was produced",
                        block.name
                    ))
                })?;
                inputs.insert("hidden_in".into(), carried);
            }
            inputs.insert("position_ids".into(), positions.clone());
            inputs.insert("cache_offset".into(), offset.clone());
            for layer in block.role.layers.clone() {
                inputs.insert(format!("k_cache_{layer}"), self.cache.key(layer).clone());
                inputs.insert(format!("v_cache_{layer}"), self.cache.value(layer).clone());
            }

            let mut outputs = block
                .model
                .predict(self.entry, &inputs)
                .await
                .map_err(|e| AxonError::inference(block.name.clone(), e))?;

            for layer in block.role.layers.clone() {
                let k_new = take_output(&mut outputs, &format!("k_new_{layer}"))?;
                let v_new = take_output(&mut outputs, &format!("v_new_{layer}"))?;
                // Only the real rows of a padded window reach the cache.
                let k_new = k_new.narrow(0, pad, rows)?;
                let v_new = v_new.narrow(0, pad, rows)?;
                self.dispatcher.submit(
                    self.cache.key(layer).clone(),
                    self.cache.value(layer).clone(),
                    k_new,
                    v_new,
                    self.cache.cursor(),
                )?;
            }

            if want_logits && block.role.produces_logits {
                logits = Some(take_output(&mut outputs, "logits")?);
            }
            hidden = Some(take_output(&mut outputs, "hidden_out")?);
        }

        Ok(logits)
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("config", &self.config)
            .field("blocks", &self.blocks.len())
            .field("state", &self.state)
            .field("cursor", &self.cache.cursor())
            .finish()
    }
}
