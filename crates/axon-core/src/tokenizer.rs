//! Tokenizer integration for text-to-token and token-to-text conversion.
//!
//! The pipeline itself only ever sees token ids; the text layer encodes and
//! decodes through a [`TextCodec`]. The default implementation wraps the
//! HuggingFace tokenizers library and loads the `tokenizer.json` descriptor
//! shipped next to the compiled artifacts.

use crate::error::{AxonError, Result};
use std::path::Path;
use tokenizers::Tokenizer as HfTokenizer;

/// Text encode/decode capability consumed by the text-generation layer.
///
/// Implementations must be safe for concurrent reads.
pub trait TextCodec: Send + Sync {
    /// Encode text to token ids.
    fn encode(&self, text: &str) -> Result<Vec<u32>>;

    /// Decode token ids to text, skipping special tokens.
    fn decode(&self, ids: &[u32]) -> Result<String>;
}

/// Tokenizer backed by a HuggingFace `tokenizer.json`.
#[derive(Clone)]
pub struct Tokenizer {
    inner: HfTokenizer,
    bos_token_id: Option<u32>,
    eos_token_id: Option<u32>,
}

impl Tokenizer {
    /// Load a tokenizer from a tokenizer.json file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let inner = HfTokenizer::from_file(path.as_ref())
            .map_err(|e| AxonError::TokenizerUnavailable(e.to_string()))?;

        let bos_token_id = inner
            .token_to_id("<s>")
            .or_else(|| inner.token_to_id("<|begin_of_text|>"));
        let eos_token_id = inner
            .token_to_id("</s>")
            .or_else(|| inner.token_to_id("<|end_of_text|>"));

        Ok(Self {
            inner,
            bos_token_id,
            eos_token_id,
        })
    }

    /// Load a tokenizer from a pipeline directory.
    ///
    /// Looks for `tokenizer.json` in the directory, then in a `tokenizer/`
    /// subdirectory.
    pub fn from_dir<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref();
        for candidate in [
            dir.join("tokenizer.json"),
            dir.join("tokenizer").join("tokenizer.json"),
        ] {
            if candidate.exists() {
                return Self::from_file(candidate);
            }
        }
        Err(AxonError::TokenizerUnavailable(format!(
            "no tokenizer.json under {}",
            dir.display()
        )))
    }

    /// Get BOS token ID.
    pub fn bos_token_id(&self) -> Option<u32> {
        self.bos_token_id
    }

    /// Get EOS token ID.
    pub fn eos_token_id(&self) -> Option<u32> {
        self.eos_token_id
    }

    /// Get vocabulary size.
    pub fn vocab_size(&self) -> usize {
        self.inner.get_vocab_size(true)
    }
}

impl TextCodec for Tokenizer {
    fn encode(&self, text: &str) -> Result<Vec<u32>> {
        let encoding = self
            .inner
            .encode(text, false)
            .map_err(|e| AxonError::TokenizerUnavailable(format!("encode failed: {e}")))?;

        let mut ids: Vec<u32> = encoding.get_ids().to_vec();
        if let Some(bos) = self.bos_token_id {
            if ids.first() != Some(&bos) {
                ids.insert(0, bos);
            }
        }
        Ok(ids)
    }

    fn decode(&self, ids: &[u32]) -> Result<String> {
        self.inner
            .decode(ids, true)
            .map_err(|e| AxonError::TokenizerUnavailable(format!("decode failed: {e}")))
    }
}

impl std::fmt::Debug for Tokenizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tokenizer")
            .field("vocab_size", &self.vocab_size())
            .field("bos_token_id", &self.bos_token_id)
            .field("eos_token_id", &self.eos_token_id)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_descriptor_is_tokenizer_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let err = Tokenizer::from_dir(dir.path()).unwrap_err();
        assert!(matches!(err, AxonError::TokenizerUnavailable(_)));
    }

    #[test]
    fn malformed_descriptor_is_tokenizer_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("tokenizer.json"), b"not json").unwrap();
        let err = Tokenizer::from_dir(dir.path()).unwrap_err();
        assert!(matches!(err, AxonError::TokenizerUnavailable(_)));
    }
}
