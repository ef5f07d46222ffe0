//! Error types for Axon Core.

use thiserror::Error;

/// Result type alias for Axon operations.
pub type Result<T> = std::result::Result<T, AxonError>;

/// Errors that can occur in Axon operations.
#[derive(Error, Debug)]
pub enum AxonError {
    /// Discovery could not assemble a complete fragment set.
    #[error("malformed manifest: {0}")]
    ManifestMalformed(String),

    /// Declared tensor shapes violate the pipeline configuration invariants.
    #[error("inconsistent shape: {0}")]
    ShapeInconsistent(String),

    /// An individual fragment could not be instantiated.
    #[error("fragment {fragment} failed to load: {source}")]
    LoadFailed {
        /// Name of the fragment that failed.
        fragment: String,
        /// Underlying cause.
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// A fragment's predict call returned an error.
    #[error("inference failed in fragment {fragment}: {source}")]
    InferenceFailed {
        /// Name of the fragment that failed.
        fragment: String,
        /// Underlying cause.
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// The cache cursor would move past the end of the K/V cache.
    #[error("context overflow: cursor {cursor} of {cache_length} cache rows")]
    ContextOverflow {
        /// Cache cursor at the time of the overflow.
        cursor: usize,
        /// Total cache capacity in rows.
        cache_length: usize,
    },

    /// The consumer cancelled the token stream.
    #[error("generation cancelled")]
    Cancelled,

    /// No tokenizer could be obtained for the text-generation layer.
    #[error("tokenizer unavailable: {0}")]
    TokenizerUnavailable(String),

    /// The pipeline is not idle and must be reset before another decode session.
    #[error("pipeline is {0}, reset required")]
    ResetRequired(&'static str),

    /// I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    /// Candle tensor error.
    #[error("tensor error: {0}")]
    Tensor(#[from] candle_core::Error),
}

impl AxonError {
    /// Wrap an error as an inference failure attributed to a fragment.
    pub fn inference(fragment: impl Into<String>, source: AxonError) -> Self {
        AxonError::InferenceFailed {
            fragment: fragment.into(),
            source: Box::new(source),
        }
    }
}
