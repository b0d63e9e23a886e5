//! Compressor contract shared by leaf compressors and decorators.

use crate::error::{GradexError, Result};
use crate::types::TensorView;

/// A lossy (or identity) transformation pair over tensor bytes.
///
/// Implementations own whatever scratch they need: the views returned by
/// [`compress`](Compressor::compress) and
/// [`decompress`](Compressor::decompress) point either into a buffer owned
/// by the compressor or back into the caller's input. Either way the bytes
/// stay valid until the next call on the same compressor, which is all the
/// engine requires: each key's compressor is driven by one strand at a
/// time.
///
/// Buffers handed in must not overlap compressor-owned storage. Decorators
/// may correct `grad` in place before delegating; callers must treat the
/// input as clobbered after a `compress`.
pub trait Compressor: Send {
    /// Compress `grad`, returning a view of the compressed bytes.
    fn compress(&mut self, grad: TensorView) -> Result<TensorView>;

    /// Decompress `compressed`, returning a view of the dense bytes.
    /// Sparsifying compressors write zero at unselected indices.
    fn decompress(&mut self, compressed: TensorView) -> Result<TensorView>;

    /// Combined error-feedback + compression pass: compress `grad` and
    /// leave the next-step residual in `error` in one sweep.
    ///
    /// Base compressors need not implement this; decorators only call it
    /// when [`supports_fused`](Compressor::supports_fused) reports true.
    fn fused_compress(&mut self, grad: TensorView, error: TensorView) -> Result<TensorView> {
        let _ = (grad, error);
        Err(GradexError::Unimplemented("fused compress"))
    }

    /// Whether [`fused_compress`](Compressor::fused_compress) is available.
    fn supports_fused(&self) -> bool {
        false
    }
}

impl std::fmt::Debug for dyn Compressor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("dyn Compressor")
    }
}

/// Identity pass-through. A baseline leaf, and the natural inner compressor
/// when only error feedback or momentum behavior is wanted.
#[derive(Debug, Default)]
pub struct NoCompression;

impl NoCompression {
    pub fn new() -> Self {
        Self
    }
}

impl Compressor for NoCompression {
    fn compress(&mut self, grad: TensorView) -> Result<TensorView> {
        Ok(grad)
    }

    fn decompress(&mut self, compressed: TensorView) -> Result<TensorView> {
        Ok(compressed)
    }
}
