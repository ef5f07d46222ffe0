//! Asynchronous cache-update dispatch.
//!
//! The cache updater is invoked once per layer per step. Its call is issued
//! to a background task and the pipeline immediately proceeds to the next
//! block fragment, which depends only on the previous layer's hidden state,
//! not on the cache write having landed. Outstanding calls are awaited at
//! step boundaries, so cache writes for step `s` are globally visible before
//! any fragment call of step `s + 1`.

use crate::error::{AxonError, Result};
use crate::fragment::model::{CompiledModel, EntryPoint, TensorMap};
use candle_core::Tensor;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::trace;

/// Dispatches cache-updater calls and tracks the in-flight set.
pub struct CacheDispatcher {
    model: Arc<dyn CompiledModel>,
    name: String,
    pending: Vec<JoinHandle<Result<()>>>,
}

impl CacheDispatcher {
    /// Wrap the cache-updater fragment.
    pub fn new(model: Box<dyn CompiledModel>) -> Self {
        let name = model.descriptor().name.clone();
        Self {
            model: Arc::from(model),
            name,
            pending: Vec::new(),
        }
    }

    /// Name of the wrapped fragment.
    pub fn fragment_name(&self) -> &str {
        &self.name
    }

    /// Number of calls issued but not yet awaited.
    pub fn in_flight(&self) -> usize {
        self.pending.len()
    }

    /// Issue one layer's cache merge and return immediately.
    ///
    /// `k_cache`/`v_cache` must be shared-storage handles onto the long-lived
    /// buffers; the updater writes rows `[offset, offset + rows)` in place.
    /// An empty slice is skipped outright.
    pub fn submit(
        &mut self,
        k_cache: Tensor,
        v_cache: Tensor,
        k_new: Tensor,
        v_new: Tensor,
        offset: usize,
    ) -> Result<()> {
        let rows = k_new.dim(0)?;
        if rows == 0 {
            return Ok(());
        }
        trace!(offset, rows, "dispatching cache update");

        let device = k_cache.device().clone();
        let offset_tensor = Tensor::from_vec(vec![offset as u32], (1,), &device)?;

        let mut inputs = TensorMap::new();
        inputs.insert("k_cache".into(), k_cache);
        inputs.insert("v_cache".into(), v_cache);
        inputs.insert("k_new".into(), k_new);
        inputs.insert("v_new".into(), v_new);
        inputs.insert("cache_offset".into(), offset_tensor);

        let model = self.model.clone();
        self.pending.push(tokio::spawn(async move {
            model
                .predict(EntryPoint::Generate, &inputs)
                .await
                .map(|_| ())
        }));
        Ok(())
    }

    /// Await every outstanding call, surfacing the first failure.
    pub async fn drain(&mut self) -> Result<()> {
        let pending = std::mem::take(&mut self.pending);
        let mut first_error = None;
        for handle in pending {
            let outcome = match handle.await {
                Ok(result) => result,
                Err(join) => Err(AxonError::InferenceFailed {
                    fragment: self.name.clone(),
                    source: Box::new(join),
                }),
            };
            if let Err(e) = outcome {
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(match e {
                e @ AxonError::InferenceFailed { .. } => e,
                other => AxonError::inference(self.name.clone(), other),
            }),
            None => Ok(()),
        }
    }
}

impl std::fmt::Debug for CacheDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheDispatcher")
            .field("fragment", &self.name)
            .field("in_flight", &self.pending.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fragment::model::ModelRuntime;
    use crate::fragment::reference::{ReferenceRuntime, ReferenceSpec, REFERENCE_EXTENSION};
    use crate::pipeline::cache::KvCache;
    use candle_core::Device;
    use std::path::PathBuf;

    fn updater_for(runtime: &ReferenceRuntime, loaded: bool) -> CacheDispatcher {
        let path = PathBuf::from(format!("cache-processor.{REFERENCE_EXTENSION}"));
        let mut model = runtime.open(&path).unwrap();
        if loaded {
            model.load().unwrap();
        }
        CacheDispatcher::new(model)
    }

    fn slice(values: &[f32], width: usize) -> Tensor {
        Tensor::from_vec(values.to_vec(), (values.len() / width, width), &Device::Cpu).unwrap()
    }

    #[tokio::test]
    async fn submit_then_drain_lands_rows() {
        let spec = ReferenceSpec {
            hidden_size: 2,
            ..ReferenceSpec::default()
        };
        let runtime = ReferenceRuntime::new(spec.clone());
        let mut dispatcher = updater_for(&runtime, true);
        let cache = KvCache::new(1, spec.cache_length(), 2, &Device::Cpu).unwrap();

        dispatcher
            .submit(
                cache.key(0).clone(),
                cache.value(0).clone(),
                slice(&[1.0, 2.0, 3.0, 4.0], 2),
                slice(&[5.0, 6.0, 7.0, 8.0], 2),
                3,
            )
            .unwrap();
        assert_eq!(dispatcher.in_flight(), 1);
        dispatcher.drain().await.unwrap();
        assert_eq!(dispatcher.in_flight(), 0);

        let keys = cache.key(0).to_vec2::<f32>().unwrap();
        let values = cache.value(0).to_vec2::<f32>().unwrap();
        assert_eq!(keys[3], vec![1.0, 2.0]);
        assert_eq!(keys[4], vec![3.0, 4.0]);
        assert_eq!(values[4], vec![7.0, 8.0]);
        assert_eq!(keys[0], vec![0.0, 0.0]);

        assert_eq!(runtime.update_log().len(), 1);
        assert_eq!(runtime.update_log()[0].offset, 3);
        assert_eq!(runtime.update_log()[0].rows, 2);
    }

    #[tokio::test]
    async fn empty_slice_is_skipped() {
        let spec = ReferenceSpec {
            hidden_size: 2,
            ..ReferenceSpec::default()
        };
        let runtime = ReferenceRuntime::new(spec.clone());
        let mut dispatcher = updater_for(&runtime, true);
        let cache = KvCache::new(1, spec.cache_length(), 2, &Device::Cpu).unwrap();

        let empty = Tensor::zeros((0, 2), candle_core::DType::F32, &Device::Cpu).unwrap();
        dispatcher
            .submit(
                cache.key(0).clone(),
                cache.value(0).clone(),
                empty.clone(),
                empty,
                0,
            )
            .unwrap();
        assert_eq!(dispatcher.in_flight(), 0);
        dispatcher.drain().await.unwrap();
    }

    #[tokio::test]
    async fn drain_surfaces_updater_failure() {
        let spec = ReferenceSpec {
            hidden_size: 2,
            ..ReferenceSpec::default()
        };
        let runtime = ReferenceRuntime::new(spec.clone());
        // Never loaded: predict fails.
        let mut dispatcher = updater_for(&runtime, false);
        let cache = KvCache::new(1, spec.cache_length(), 2, &Device::Cpu).unwrap();

        dispatcher
            .submit(
                cache.key(0).clone(),
                cache.value(0).clone(),
                slice(&[1.0, 2.0], 2),
                slice(&[3.0, 4.0], 2),
                0,
            )
            .unwrap();
        let err = dispatcher.drain().await.unwrap_err();
        assert!(matches!(err, AxonError::InferenceFailed { .. }));
    }
}
