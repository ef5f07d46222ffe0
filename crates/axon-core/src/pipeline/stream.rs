//! Lazy prediction stream.
//!
//! `predict` returns a pull stream: nothing runs until the consumer asks for
//! the next prediction, and dropping the stream cancels the session. The
//! stream suspends only at step boundaries (between prefill windows and
//! between generation steps), so a fragment call never observes a
//! half-finished step.

use crate::error::{AxonError, Result};
use crate::pipeline::{Pipeline, PipelineState};
use std::time::Instant;

/// One emitted token with its timing.
#[derive(Debug, Clone)]
pub struct Prediction {
    /// The freshly selected token id.
    pub new_token: u32,
    /// Prompt plus every token emitted so far, in order.
    pub all_tokens: Vec<u32>,
    /// Wall-clock latency of the step that produced this token.
    pub latency_ms: f64,
    /// Wall-clock latency of prompt ingestion; populated on the first
    /// prediction only.
    pub prompt_latency_ms: Option<f64>,
}

fn millis(since: Instant) -> f64 {
    since.elapsed().as_secs_f64() * 1e3
}

/// Pull stream over one decode session.
///
/// Borrows the pipeline mutably for the lifetime of the session, which is
/// what serializes `predict` calls. Call [`PredictionStream::next`] until it
/// returns `None`; a `Some(Err(_))` item is terminal. Cancellation is
/// cooperative: [`PredictionStream::cancel`] (or dropping the stream) takes
/// effect at the next suspension point.
pub struct PredictionStream<'p> {
    pipeline: &'p mut Pipeline,
    tokens: Vec<u32>,
    prompt_len: usize,
    max_new_tokens: usize,
    produced: usize,
    cancelled: bool,
    finished: bool,
}

impl<'p> PredictionStream<'p> {
    pub(crate) fn new(pipeline: &'p mut Pipeline, tokens: Vec<u32>, max_new_tokens: usize) -> Self {
        let prompt_len = tokens.len();
        Self {
            pipeline,
            tokens,
            prompt_len,
            max_new_tokens,
            produced: 0,
            cancelled: false,
            finished: false,
        }
    }

    /// Prompt plus everything emitted so far.
    pub fn tokens(&self) -> &[u32] {
        &self.tokens
    }

    /// Number of predictions emitted so far.
    pub fn produced(&self) -> usize {
        self.produced
    }

    /// Request cooperative cancellation; observed at the next pull.
    pub fn cancel(&mut self) {
        self.cancelled = true;
    }

    /// Produce the next prediction.
    ///
    /// The first pull runs the whole prefill phase and the first generation
    /// step; its prediction carries the prompt latency. Returns `None` once
    /// the stream has closed, after a terminal `Some(Err(_))` item or a
    /// normal end.
    pub async fn next(&mut self) -> Option<Result<Prediction>> {
        if self.finished {
            return None;
        }
        if self.cancelled {
            return Some(self.close_cancelled().await);
        }
        if self.produced == 0 && self.max_new_tokens == 0 {
            self.finished = true;
            self.pipeline.state = PipelineState::Done;
            return None;
        }

        let outcome = if self.produced == 0 {
            self.first_prediction().await
        } else {
            self.next_prediction().await
        };

        match outcome {
            Ok(prediction) => Some(Ok(prediction)),
            Err(AxonError::Cancelled) => Some(self.close_cancelled().await),
            Err(e) => {
                self.finished = true;
                self.pipeline.state = PipelineState::Failed;
                Some(Err(e))
            }
        }
    }

    /// Prefill every full window of the prompt, then run the first
    /// generation step on the final prompt token.
    async fn first_prediction(&mut self) -> Result<Prediction> {
        let window = self.pipeline.config.input_length;
        let prefill_started = Instant::now();

        let (ingested, last) = self.tokens.split_at(self.prompt_len - 1);
        for chunk in ingested.chunks(window) {
            if self.cancelled {
                return Err(AxonError::Cancelled);
            }
            self.pipeline.step_prefill(chunk).await?;
        }
        let prompt_latency_ms = millis(prefill_started);

        let step_started = Instant::now();
        let token = self.pipeline.step_generate(last[0]).await?;
        Ok(self.emit(token, millis(step_started), Some(prompt_latency_ms)))
    }

    async fn next_prediction(&mut self) -> Result<Prediction> {
        let started = Instant::now();
        let input = *self.tokens.last().expect("session holds at least one token");
        let token = self.pipeline.step_generate(input).await?;
        Ok(self.emit(token, millis(started), None))
    }

    fn emit(&mut self, token: u32, latency_ms: f64, prompt_latency_ms: Option<f64>) -> Prediction {
        self.tokens.push(token);
        self.produced += 1;

        let exhausted = self.produced >= self.max_new_tokens;
        let end_of_sequence = token == self.pipeline.config.eos_token_id;
        if exhausted || end_of_sequence {
            // The final token is still emitted; the stream then closes.
            self.finished = true;
            self.pipeline.state = PipelineState::Done;
        } else {
            self.pipeline.state = PipelineState::Generate;
        }

        Prediction {
            new_token: token,
            all_tokens: self.tokens.clone(),
            latency_ms,
            prompt_latency_ms,
        }
    }

    async fn close_cancelled(&mut self) -> Result<Prediction> {
        // Drain in-flight cache updates so state stays coherent at the
        // boundary of the last completed step.
        let drained = self.pipeline.drain_pending().await;
        self.finished = true;
        self.pipeline.state = PipelineState::Cancelled;
        drained?;
        Err(AxonError::Cancelled)
    }
}

impl Drop for PredictionStream<'_> {
    fn drop(&mut self) {
        // Dropping the stream mid-session is cancellation.
        if !self.finished {
            self.pipeline.state = PipelineState::Cancelled;
        }
    }
}

impl std::fmt::Debug for PredictionStream<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PredictionStream")
            .field("prompt_len", &self.prompt_len)
            .field("produced", &self.produced)
            .field("max_new_tokens", &self.max_new_tokens)
            .field("finished", &self.finished)
            .finish()
    }
}
