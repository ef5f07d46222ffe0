//! # Axon
//!
//! Chunked LLM inference: load a model that was pre-split into
//! independently compiled fragments, stitch the fragments into one logical
//! forward pass, and stream generated text with per-token latency
//! accounting.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use axon::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let mut generator = TextGenerator::from_dir(
//!         &runtime,
//!         model_dir,
//!         &PipelineOptions::default(),
//!         |status, fraction| println!("{status} ({:.0}%)", fraction * 100.0),
//!     )?;
//!
//!     let mut stream = generator.generate("Once upon a time", 64)?;
//!     while let Some(event) = stream.next().await {
//!         print!("{}", event?.piece);
//!     }
//!     let stats = stream.stats();
//!     println!("\n{:.1} tok/s", stats.tokens_per_sec());
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

// Re-export core crate
pub use axon_core::*;

mod generator;

pub use generator::{
    GenerationResult, GenerationStats, TextEvent, TextGenerator, TextStream,
};

/// Commonly used types.
pub mod prelude {
    pub use crate::generator::{
        GenerationResult, GenerationStats, TextEvent, TextGenerator, TextStream,
    };
    pub use axon_core::error::{AxonError, Result};
    pub use axon_core::fragment::{CompiledModel, EntryPoint, ModelRuntime, TensorMap};
    pub use axon_core::pipeline::{
        Pipeline, PipelineConfig, PipelineOptions, PipelineState, Prediction, PredictionStream,
    };
    pub use axon_core::tokenizer::{TextCodec, Tokenizer};

    // Re-export useful external types
    pub use anyhow;
    pub use tokio;
    pub use tracing;
}
