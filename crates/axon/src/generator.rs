//! Text generation over a loaded pipeline.
//!
//! Thin capability that encodes a prompt, drives the pipeline's prediction
//! stream, and decodes the accumulated ids back to text at every step, while
//! recording per-token latency and overall throughput.

use axon_core::error::Result;
use axon_core::fragment::ModelRuntime;
use axon_core::pipeline::{Pipeline, PipelineOptions, PredictionStream};
use axon_core::tokenizer::{TextCodec, Tokenizer};
use std::path::Path;

/// One streamed text event.
#[derive(Debug, Clone)]
pub struct TextEvent {
    /// The freshly selected token id.
    pub token_id: u32,
    /// All generated text so far.
    pub text: String,
    /// Text added by this token.
    pub piece: String,
    /// Wall-clock latency of the step that produced this token.
    pub latency_ms: f64,
    /// Prompt ingestion latency; populated on the first event only.
    pub prompt_latency_ms: Option<f64>,
}

/// Latency and throughput accounting for one generation session.
#[derive(Debug, Clone, Default)]
pub struct GenerationStats {
    /// Prompt ingestion latency.
    pub prompt_latency_ms: Option<f64>,
    /// Tokens generated.
    pub generated: usize,
    /// Total wall-clock spent in generation steps.
    pub generation_ms: f64,
}

impl GenerationStats {
    /// Mean per-token latency.
    pub fn mean_latency_ms(&self) -> f64 {
        if self.generated == 0 {
            0.0
        } else {
            self.generation_ms / self.generated as f64
        }
    }

    /// Generation throughput in tokens per second.
    pub fn tokens_per_sec(&self) -> f64 {
        if self.generation_ms <= 0.0 {
            0.0
        } else {
            self.generated as f64 / (self.generation_ms / 1e3)
        }
    }
}

/// Result of a collected (non-streaming) generation.
#[derive(Debug, Clone)]
pub struct GenerationResult {
    /// Generated text.
    pub text: String,
    /// Prompt plus generated token ids.
    pub tokens: Vec<u32>,
    /// Number of prompt tokens.
    pub num_prompt_tokens: usize,
    /// Number of generated tokens.
    pub num_generated_tokens: usize,
    /// Session accounting.
    pub stats: GenerationStats,
}

/// Text generation capability on top of a [`Pipeline`].
pub struct TextGenerator<C: TextCodec> {
    pipeline: Pipeline,
    codec: C,
}

impl TextGenerator<Tokenizer> {
    /// Load both the pipeline and the tokenizer from one directory.
    pub fn from_dir(
        runtime: &dyn ModelRuntime,
        dir: &Path,
        options: &PipelineOptions,
        progress: impl FnMut(&str, f32),
    ) -> Result<Self> {
        let tokenizer = Tokenizer::from_dir(dir)?;
        let pipeline = Pipeline::load(runtime, dir, options, progress)?;
        Ok(Self::new(pipeline, tokenizer))
    }
}

impl<C: TextCodec> TextGenerator<C> {
    /// Wrap a loaded pipeline and a text codec.
    pub fn new(pipeline: Pipeline, codec: C) -> Self {
        Self { pipeline, codec }
    }

    /// The underlying pipeline.
    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    /// Drain and clear the pipeline for the next session.
    pub async fn reset(&mut self) -> Result<()> {
        self.pipeline.reset().await
    }

    /// Start a streaming generation session.
    pub fn generate(&mut self, prompt: &str, max_new_tokens: usize) -> Result<TextStream<'_, C>> {
        let prompt_ids = self.codec.encode(prompt)?;
        let Self { pipeline, codec } = self;
        let inner = pipeline.predict(&prompt_ids, max_new_tokens)?;
        let prompt_len = inner.tokens().len();
        Ok(TextStream {
            inner,
            codec: &*codec,
            prompt_len,
            previous: String::new(),
            stats: GenerationStats::default(),
        })
    }

    /// Generate and collect the whole session.
    pub async fn generate_text(
        &mut self,
        prompt: &str,
        max_new_tokens: usize,
    ) -> Result<GenerationResult> {
        let mut stream = self.generate(prompt, max_new_tokens)?;
        let mut text = String::new();
        while let Some(event) = stream.next().await {
            text = event?.text;
        }
        let stats = stream.stats();
        let tokens = stream.final_tokens().map(<[u32]>::to_vec).unwrap_or_default();
        let num_prompt_tokens = stream.prompt_len;
        let num_generated_tokens = stats.generated;
        Ok(GenerationResult {
            text,
            tokens,
            num_prompt_tokens,
            num_generated_tokens,
            stats,
        })
    }
}

impl<C: TextCodec> std::fmt::Debug for TextGenerator<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TextGenerator")
            .field("pipeline", &self.pipeline)
            .finish()
    }
}

/// Pull stream of [`TextEvent`]s over one generation session.
pub struct TextStream<'g, C: TextCodec> {
    inner: PredictionStream<'g>,
    codec: &'g C,
    prompt_len: usize,
    previous: String,
    stats: GenerationStats,
}

impl<C: TextCodec> TextStream<'_, C> {
    /// Produce the next text event. `None` once the stream has closed.
    pub async fn next(&mut self) -> Option<Result<TextEvent>> {
        let prediction = match self.inner.next().await? {
            Ok(p) => p,
            Err(e) => return Some(Err(e)),
        };

        let generated_ids = &prediction.all_tokens[self.prompt_len..];
        let text = match self.codec.decode(generated_ids) {
            Ok(text) => text,
            Err(e) => return Some(Err(e)),
        };
        let piece = text
            .strip_prefix(self.previous.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| text.clone());
        self.previous = text.clone();

        self.stats.generated += 1;
        self.stats.generation_ms += prediction.latency_ms;
        if prediction.prompt_latency_ms.is_some() {
            self.stats.prompt_latency_ms = prediction.prompt_latency_ms;
        }

        Some(Ok(TextEvent {
            token_id: prediction.new_token,
            text,
            piece,
            latency_ms: prediction.latency_ms,
            prompt_latency_ms: prediction.prompt_latency_ms,
        }))
    }

    /// Request cooperative cancellation; observed at the next pull.
    pub fn cancel(&mut self) {
        self.inner.cancel();
    }

    /// Accounting for the session so far.
    pub fn stats(&self) -> GenerationStats {
        self.stats.clone()
    }

    /// Prompt plus generated ids, if at least one token was emitted.
    pub fn final_tokens(&self) -> Option<&[u32]> {
        let tokens = self.inner.tokens();
        (tokens.len() > self.prompt_len).then_some(tokens)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axon_core::error::AxonError;
    use axon_core::fragment::{scaffold, ReferenceRuntime, ReferenceSpec};
    use tempfile::TempDir;

    /// Deterministic toy codec: one letter per token id.
    struct ToyCodec;

    impl TextCodec for ToyCodec {
        fn encode(&self, text: &str) -> Result<Vec<u32>> {
            Ok(text
                .bytes()
                .map(|b| u32::from(b % 29) + 3)
                .collect())
        }

        fn decode(&self, ids: &[u32]) -> Result<String> {
            Ok(ids
                .iter()
                .map(|&id| char::from(b'a' + (id % 26) as u8))
                .collect())
        }
    }

    fn build_generator(spec: ReferenceSpec) -> (TextGenerator<ToyCodec>, TempDir) {
        let dir = tempfile::tempdir().unwrap();
        scaffold(dir.path(), &spec, "tiny").unwrap();
        let runtime = ReferenceRuntime::new(spec);
        let pipeline = Pipeline::load(
            &runtime,
            dir.path(),
            &PipelineOptions::default(),
            |_, _| {},
        )
        .unwrap();
        (TextGenerator::new(pipeline, ToyCodec), dir)
    }

    #[tokio::test]
    async fn streams_text_with_latency_accounting() {
        let spec = ReferenceSpec {
            batch_size: 4,
            context_length: 64,
            ..ReferenceSpec::default()
        };
        let (mut generator, _dir) = build_generator(spec);

        let mut stream = generator.generate("hello", 5).unwrap();
        let mut events = Vec::new();
        while let Some(event) = stream.next().await {
            events.push(event.unwrap());
        }

        assert_eq!(events.len(), 5);
        assert!(events[0].prompt_latency_ms.is_some());
        assert!(events[1..].iter().all(|e| e.prompt_latency_ms.is_none()));

        // Pieces concatenate to the final text.
        let joined: String = events.iter().map(|e| e.piece.as_str()).collect();
        assert_eq!(joined, events.last().unwrap().text);
        assert_eq!(events.last().unwrap().text.len(), 5);

        let stats = stream.stats();
        assert_eq!(stats.generated, 5);
        assert!(stats.prompt_latency_ms.is_some());
        assert!(stats.generation_ms >= 0.0);
        assert!(stats.mean_latency_ms() >= 0.0);
    }

    #[tokio::test]
    async fn collected_generation_matches_streaming() {
        let spec = ReferenceSpec {
            batch_size: 4,
            context_length: 64,
            ..ReferenceSpec::default()
        };
        let (mut generator, _dir) = build_generator(spec.clone());
        let collected = generator.generate_text("hello", 4).await.unwrap();
        assert_eq!(collected.num_generated_tokens, 4);
        assert_eq!(collected.text.len(), 4);
        assert_eq!(
            collected.tokens.len(),
            collected.num_prompt_tokens + collected.num_generated_tokens
        );

        let (mut other, _dir2) = build_generator(spec);
        let mut stream = other.generate("hello", 4).unwrap();
        let mut last_text = String::new();
        while let Some(event) = stream.next().await {
            last_text = event.unwrap().text;
        }
        assert_eq!(collected.text, last_text);
    }

    #[tokio::test]
    async fn sessions_are_serialized_by_reset() {
        let (mut generator, _dir) = build_generator(ReferenceSpec::default());

        let first = generator.generate_text("ab", 2).await.unwrap();
        assert_eq!(first.num_generated_tokens, 2);

        // The finished session still holds the pipeline until reset.
        assert!(generator.generate("ab", 1).is_err());
        generator.reset().await.unwrap();
        let second = generator.generate_text("ab", 2).await.unwrap();
        assert_eq!(second.text, first.text);
    }

    #[test]
    fn missing_tokenizer_surfaces_before_loading() {
        let dir = tempfile::tempdir().unwrap();
        let spec = ReferenceSpec::default();
        scaffold(dir.path(), &spec, "tiny").unwrap();
        let runtime = ReferenceRuntime::new(spec);

        let err = TextGenerator::from_dir(
            &runtime,
            dir.path(),
            &PipelineOptions::default(),
            |_, _| {},
        )
        .unwrap_err();
        assert!(matches!(err, AxonError::TokenizerUnavailable(_)));
    }
}
