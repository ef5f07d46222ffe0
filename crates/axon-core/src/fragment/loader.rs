//! Fragment discovery and loading.
//!
//! A pipeline directory holds one or more block-chunk artifacts named
//! `<prefix>_chunk_<NN>of<MM>.<ext>`, exactly one cache-updater artifact
//! matching `*cache*`, and exactly one logit-sampler artifact matching
//! `*logit*`. Discovery assembles these into a [`Manifest`]; loading
//! instantiates the fragments in discovery order, reporting progress as a
//! monotone fraction.

use crate::error::{AxonError, Result};
use crate::fragment::model::{CompiledModel, ModelRuntime};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Discovered artifact set for one pipeline directory.
#[derive(Debug, Clone)]
pub struct Manifest {
    /// Block-chunk artifacts in natural filename order.
    pub blocks: Vec<PathBuf>,
    /// The cache-updater artifact.
    pub cache_updater: PathBuf,
    /// The logit-sampler artifact.
    pub logit_sampler: PathBuf,
}

impl Manifest {
    /// Total number of artifacts to instantiate.
    pub fn len(&self) -> usize {
        self.blocks.len() + 2
    }

    /// Whether the manifest holds no block fragments.
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}

/// Optional sidecar written next to each artifact by the conversion
/// tool-chain.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ArtifactMetadata {
    /// Total context length the artifact was compiled for.
    #[serde(default)]
    pub context_length: Option<usize>,
    /// Prefill batch size the artifact was compiled for.
    #[serde(default)]
    pub batch_size: Option<usize>,
    /// Padding token id.
    #[serde(default)]
    pub pad_token_id: Option<u32>,
    /// Beginning-of-sequence token id.
    #[serde(default)]
    pub bos_token_id: Option<u32>,
    /// End-of-sequence token id.
    #[serde(default)]
    pub eos_token_id: Option<u32>,
    /// Chunk position, e.g. `"1/2"`.
    #[serde(default)]
    pub chunk: Option<String>,
}

impl ArtifactMetadata {
    /// Fold the sidecar's fields into a descriptor metadata map.
    ///
    /// Keys already declared by the artifact itself win over the sidecar.
    pub fn merge_into(&self, metadata: &mut std::collections::HashMap<String, String>) {
        let mut put = |key: &str, value: Option<String>| {
            if let Some(value) = value {
                metadata.entry(key.to_string()).or_insert(value);
            }
        };
        put("context_length", self.context_length.map(|v| v.to_string()));
        put("batch_size", self.batch_size.map(|v| v.to_string()));
        put("pad_token_id", self.pad_token_id.map(|v| v.to_string()));
        put("bos_token_id", self.bos_token_id.map(|v| v.to_string()));
        put("eos_token_id", self.eos_token_id.map(|v| v.to_string()));
        put("chunk", self.chunk.clone());
    }
}

/// Compare filenames with digit runs ordered numerically.
///
/// `m_chunk_2of12` sorts before `m_chunk_10of12`, which plain lexicographic
/// order would reverse. Ties on equal numeric value (leading zeros) fall back
/// to byte order so the result is total and stable across platforms.
pub fn natural_cmp(a: &str, b: &str) -> Ordering {
    let (a, b) = (a.as_bytes(), b.as_bytes());
    let (mut i, mut j) = (0, 0);

    while i < a.len() && j < b.len() {
        if a[i].is_ascii_digit() && b[j].is_ascii_digit() {
            let ai = i;
            let bj = j;
            while i < a.len() && a[i].is_ascii_digit() {
                i += 1;
            }
            while j < b.len() && b[j].is_ascii_digit() {
                j += 1;
            }
            let run_a = trim_zeros(&a[ai..i]);
            let run_b = trim_zeros(&b[bj..j]);
            let ord = run_a
                .len()
                .cmp(&run_b.len())
                .then_with(|| run_a.cmp(run_b));
            if ord != Ordering::Equal {
                return ord;
            }
        } else {
            let ord = a[i].cmp(&b[j]);
            if ord != Ordering::Equal {
                return ord;
            }
            i += 1;
            j += 1;
        }
    }
    (a.len() - i).cmp(&(b.len() - j)).then(a.cmp(b))
}

fn trim_zeros(digits: &[u8]) -> &[u8] {
    let first = digits.iter().position(|&d| d != b'0');
    match first {
        Some(idx) => &digits[idx..],
        None => &digits[digits.len() - 1..],
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Discover the fragment set in `dir`.
///
/// `prefix` narrows the block set to filenames starting with it; processor
/// artifacts are matched regardless of prefix. Candidate lists are resolved
/// by first lexicographic match so discovery is deterministic.
pub fn discover(dir: &Path, prefix: Option<&str>, extension: &str) -> Result<Manifest> {
    let mut artifacts: Vec<PathBuf> = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path
            .extension()
            .map_or(false, |e| e.to_string_lossy() == extension)
        {
            artifacts.push(path);
        }
    }

    let mut cache_candidates: Vec<PathBuf> = Vec::new();
    let mut logit_candidates: Vec<PathBuf> = Vec::new();
    let mut blocks: Vec<PathBuf> = Vec::new();

    for path in artifacts {
        let name = file_name(&path).to_ascii_lowercase();
        if name.contains("cache") {
            cache_candidates.push(path);
        } else if name.contains("logit") {
            logit_candidates.push(path);
        } else if prefix.map_or(true, |p| file_name(&path).starts_with(p)) {
            blocks.push(path);
        }
    }

    cache_candidates.sort_by(|a, b| file_name(a).cmp(&file_name(b)));
    logit_candidates.sort_by(|a, b| file_name(a).cmp(&file_name(b)));
    blocks.sort_by(|a, b| natural_cmp(&file_name(a), &file_name(b)));

    let cache_updater = cache_candidates.into_iter().next().ok_or_else(|| {
        AxonError::ManifestMalformed(format!(
            "no cache-updater artifact (*cache*.{extension}) in {}",
            dir.display()
        ))
    })?;
    let logit_sampler = logit_candidates.into_iter().next().ok_or_else(|| {
        AxonError::ManifestMalformed(format!(
            "no logit-sampler artifact (*logit*.{extension}) in {}",
            dir.display()
        ))
    })?;
    if blocks.is_empty() {
        return Err(AxonError::ManifestMalformed(format!(
            "no block artifacts matching prefix {:?} in {}",
            prefix,
            dir.display()
        )));
    }

    debug!(
        blocks = blocks.len(),
        cache = %file_name(&cache_updater),
        logits = %file_name(&logit_sampler),
        "discovered fragment set"
    );

    Ok(Manifest {
        blocks,
        cache_updater,
        logit_sampler,
    })
}

/// Read the optional `metadata.json` sidecar inside a packaged artifact.
pub fn read_sidecar(artifact: &Path) -> Result<Option<ArtifactMetadata>> {
    let sidecar = artifact.join("metadata.json");
    if !artifact.is_dir() || !sidecar.exists() {
        return Ok(None);
    }
    let contents = fs::read_to_string(&sidecar)?;
    let metadata: ArtifactMetadata = serde_json::from_str(&contents)?;
    Ok(Some(metadata))
}

/// Fragments instantiated from a [`Manifest`], in discovery order.
pub struct LoadedSet {
    /// Block fragments.
    pub blocks: Vec<Box<dyn CompiledModel>>,
    /// The cache-updater fragment.
    pub cache_updater: Box<dyn CompiledModel>,
    /// The logit-sampler fragment.
    pub logit_sampler: Box<dyn CompiledModel>,
}

fn open_and_load(runtime: &dyn ModelRuntime, path: &Path) -> Result<Box<dyn CompiledModel>> {
    let mut model = runtime.open(path).map_err(|e| AxonError::LoadFailed {
        fragment: file_name(path),
        source: Box::new(e),
    })?;
    model.load().map_err(|e| AxonError::LoadFailed {
        fragment: file_name(path),
        source: Box::new(e),
    })?;
    Ok(model)
}

/// Instantiate every fragment in the manifest.
///
/// `progress` receives a short status and a monotone fraction in `[0, 1]`,
/// once per stage.
pub fn load_set(
    runtime: &dyn ModelRuntime,
    manifest: &Manifest,
    mut progress: impl FnMut(&str, f32),
) -> Result<LoadedSet> {
    let total = manifest.len() as f32;
    let mut done = 0f32;

    let mut blocks = Vec::with_capacity(manifest.blocks.len());
    for path in &manifest.blocks {
        let name = file_name(path);
        progress(&format!("loading {name}"), done / total);
        blocks.push(open_and_load(runtime, path)?);
        done += 1.0;
        info!(fragment = %name, "loaded block fragment");
    }

    progress("loading cache updater", done / total);
    let cache_updater = open_and_load(runtime, &manifest.cache_updater)?;
    done += 1.0;

    progress("loading logit sampler", done / total);
    let logit_sampler = open_and_load(runtime, &manifest.logit_sampler)?;

    progress("ready", 1.0);
    Ok(LoadedSet {
        blocks,
        cache_updater,
        logit_sampler,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn touch(dir: &Path, name: &str) {
        fs::write(dir.join(name), b"").unwrap();
    }

    #[test]
    fn natural_order_of_chunk_names() {
        let mut names = vec![
            "m_chunk_10of12.bin",
            "m_chunk_2of12.bin",
            "m_chunk_1of12.bin",
        ];
        names.sort_by(|a, b| natural_cmp(a, b));
        assert_eq!(
            names,
            vec![
                "m_chunk_1of12.bin",
                "m_chunk_2of12.bin",
                "m_chunk_10of12.bin",
            ]
        );
    }

    #[test]
    fn natural_order_is_stable_on_leading_zeros() {
        assert_eq!(natural_cmp("a_01", "a_1"), Ordering::Less);
        assert_eq!(natural_cmp("a_01", "a_01"), Ordering::Equal);
        assert_eq!(natural_cmp("a_2", "a_10"), Ordering::Less);
        assert_eq!(natural_cmp("b_1", "a_2"), Ordering::Greater);
    }

    #[test]
    fn discovery_classifies_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "m_chunk_01of02.refpkg");
        touch(dir.path(), "m_chunk_02of02.refpkg");
        touch(dir.path(), "cache-processor.refpkg");
        touch(dir.path(), "logit-processor.refpkg");
        touch(dir.path(), "notes.txt");

        let manifest = discover(dir.path(), None, "refpkg").unwrap();
        assert_eq!(manifest.blocks.len(), 2);
        assert_eq!(manifest.len(), 4);
        assert!(file_name(&manifest.blocks[0]).starts_with("m_chunk_01"));
        assert!(file_name(&manifest.cache_updater).contains("cache"));
        assert!(file_name(&manifest.logit_sampler).contains("logit"));
    }

    #[test]
    fn discovery_missing_logit_sampler() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "m_chunk_01of01.refpkg");
        touch(dir.path(), "cache-processor.refpkg");

        let err = discover(dir.path(), None, "refpkg").unwrap_err();
        assert!(matches!(err, AxonError::ManifestMalformed(_)));
    }

    #[test]
    fn discovery_missing_blocks() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "cache-processor.refpkg");
        touch(dir.path(), "logit-processor.refpkg");

        assert!(discover(dir.path(), None, "refpkg").is_err());
    }

    #[test]
    fn discovery_prefix_filter() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "llama_chunk_01of01.refpkg");
        touch(dir.path(), "qwen_chunk_01of01.refpkg");
        touch(dir.path(), "cache-processor.refpkg");
        touch(dir.path(), "logit-processor.refpkg");

        let manifest = discover(dir.path(), Some("llama"), "refpkg").unwrap();
        assert_eq!(manifest.blocks.len(), 1);
        assert!(file_name(&manifest.blocks[0]).starts_with("llama"));
    }

    #[test]
    fn first_lexicographic_cache_candidate_wins() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "m_chunk_01of01.refpkg");
        touch(dir.path(), "b-cache.refpkg");
        touch(dir.path(), "a-cache.refpkg");
        touch(dir.path(), "logit-processor.refpkg");

        let manifest = discover(dir.path(), None, "refpkg").unwrap();
        assert_eq!(file_name(&manifest.cache_updater), "a-cache.refpkg");
    }

    #[test]
    fn sidecar_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = dir.path().join("m_chunk_01of01.refpkg");
        fs::create_dir(&artifact).unwrap();
        fs::write(
            artifact.join("metadata.json"),
            r#"{"context_length": 1024, "batch_size": 64, "eos_token_id": 2, "chunk": "1/1"}"#,
        )
        .unwrap();

        let metadata = read_sidecar(&artifact).unwrap().unwrap();
        assert_eq!(metadata.context_length, Some(1024));
        assert_eq!(metadata.batch_size, Some(64));
        assert_eq!(metadata.eos_token_id, Some(2));
        assert_eq!(metadata.pad_token_id, None);

        // Plain-file artifacts have no sidecar.
        let plain = dir.path().join("plain.refpkg");
        fs::write(&plain, b"").unwrap();
        assert!(read_sidecar(&plain).unwrap().is_none());
    }
}
