//! K/V cache buffers.
//!
//! The pipeline owns one key and one value tensor per transformer layer,
//! each of shape `[cache_length, kv_width]`, allocated once at load time and
//! reused in place for the whole session. Handles cloned from these tensors
//! share the underlying storage, so the cache updater's in-place writes are
//! observed by block fragments without any copy.

use crate::error::{AxonError, Result};
use candle_core::{DType, Device, Tensor};

/// Per-layer K/V cache with a monotone cursor.
#[derive(Debug)]
pub struct KvCache {
    keys: Vec<Tensor>,
    values: Vec<Tensor>,
    cache_length: usize,
    kv_width: usize,
    cursor: usize,
}

impl KvCache {
    /// Allocate zero-filled buffers for `num_layers` layers.
    pub fn new(
        num_layers: usize,
        cache_length: usize,
        kv_width: usize,
        device: &Device,
    ) -> Result<Self> {
        let mut keys = Vec::with_capacity(num_layers);
        let mut values = Vec::with_capacity(num_layers);
        for _ in 0..num_layers {
            keys.push(Tensor::zeros((cache_length, kv_width), DType::F32, device)?);
            values.push(Tensor::zeros((cache_length, kv_width), DType::F32, device)?);
        }
        Ok(Self {
            keys,
            values,
            cache_length,
            kv_width,
            cursor: 0,
        })
    }

    /// Shared-storage handle to layer `layer`'s key buffer.
    pub fn key(&self, layer: usize) -> &Tensor {
        &self.keys[layer]
    }

    /// Shared-storage handle to layer `layer`'s value buffer.
    pub fn value(&self, layer: usize) -> &Tensor {
        &self.values[layer]
    }

    /// Number of layers.
    pub fn num_layers(&self) -> usize {
        self.keys.len()
    }

    /// Total capacity in rows.
    pub fn cache_length(&self) -> usize {
        self.cache_length
    }

    /// Width of one cache row.
    pub fn kv_width(&self) -> usize {
        self.kv_width
    }

    /// Populated rows so far.
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Rows still available.
    pub fn remaining(&self) -> usize {
        self.cache_length - self.cursor
    }

    /// Move the cursor past `rows` freshly written rows.
    pub fn advance(&mut self, rows: usize) -> Result<()> {
        if self.cursor + rows > self.cache_length {
            return Err(AxonError::ContextOverflow {
                cursor: self.cursor,
                cache_length: self.cache_length,
            });
        }
        self.cursor += rows;
        Ok(())
    }

    /// Zero every buffer in place and return the cursor to the start.
    pub fn reset(&mut self) -> Result<()> {
        for tensor in self.keys.iter().chain(self.values.iter()) {
            let zeros = tensor.zeros_like()?;
            tensor.slice_set(&zeros, 0, 0)?;
        }
        self.cursor = 0;
        Ok(())
    }
}
