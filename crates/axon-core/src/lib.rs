//! # Axon Core
//!
//! Core engine for chunked LLM inference: a runtime that loads a large
//! autoregressive model pre-split into independently compiled fragments,
//! drives them through a two-phase (prefill → generate) decode loop, keeps a
//! striped K/V attention cache consistent across the fragments, and streams
//! generated tokens to the caller with per-token latency accounting.
//!
//! ## Core Concepts
//!
//! ### Fragments
//!
//! The model arrives on disk as 3-N compiled artifacts: ordered block chunks
//! (the first carrying the embedding table, the last the LM head), one cache
//! updater, and one logit sampler. Each is wrapped in an opaque
//! [`fragment::CompiledModel`] handle; the backend that compiled them
//! provides a [`fragment::ModelRuntime`] that opens them.
//!
//! ```rust,ignore
//! use axon_core::prelude::*;
//!
//! let pipeline = Pipeline::load(&runtime, dir, &PipelineOptions::default(), |status, f| {
//!     println!("{status} ({:.0}%)", f * 100.0);
//! })?;
//! ```
//!
//! ### The decode loop
//!
//! `predict` returns a lazy stream; the consumer pulls one prediction at a
//! time and drops the stream to cancel:
//!
//! ```rust,ignore
//! let mut stream = pipeline.predict(&prompt_ids, 64)?;
//! while let Some(prediction) = stream.next().await {
//!     let prediction = prediction?;
//!     println!("{} ({:.1} ms)", prediction.new_token, prediction.latency_ms);
//! }
//! ```
//!
//! ### Overlapped cache updates
//!
//! After every transformer layer the freshly produced K/V slice is handed to
//! the cache-updater fragment asynchronously; the next block fragment starts
//! immediately, because it reads only the previous layer's hidden state.
//! Outstanding updates are awaited at step boundaries, so every step sees a
//! fully consistent cache.
//!
//! ## Module Overview
//!
//! - [`fragment`] - compiled-model handles, discovery, roles, reference runtime
//! - [`pipeline`] - configuration inference, K/V cache, stepping, streaming
//! - [`tokenizer`] - text codec used by the text-generation layer
//! - [`error`] - error types and Result alias

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod error;
pub mod fragment;
pub mod pipeline;
pub mod tokenizer;

pub use error::{AxonError, Result};

/// Re-export commonly used types.
pub mod prelude {
    pub use crate::error::{AxonError, Result};
    pub use crate::fragment::{
        CompiledModel, EntryPoint, ModelDescriptor, ModelRuntime, TensorMap,
    };
    pub use crate::pipeline::{
        Pipeline, PipelineConfig, PipelineOptions, Prediction, PredictionStream,
    };
    pub use crate::pipeline::PipelineState;
    pub use crate::tokenizer::{TextCodec, Tokenizer};
}
