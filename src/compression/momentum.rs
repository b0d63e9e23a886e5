//! Nesterov momentum decorator.

use crate::error::Result;
use crate::memory::AlignedBuf;
use crate::reduce::CpuReducer;
use crate::types::{DataType, TensorView};

use super::traits::Compressor;

/// Wraps an inner compressor with a Nesterov look-ahead step:
/// `m ← μ·m + g`, then `g ← g + μ·m` in place, then delegate.
pub struct NesterovMomentum {
    inner: Box<dyn Compressor>,
    mom: AlignedBuf,
    mu: f32,
    dtype: DataType,
    reducer: CpuReducer,
}

impl NesterovMomentum {
    pub fn new(
        inner: Box<dyn Compressor>,
        size: usize,
        dtype: DataType,
        mu: f32,
    ) -> Result<Self> {
        Ok(Self {
            inner,
            mom: AlignedBuf::new_zeroed(size)?,
            mu,
            dtype,
            reducer: CpuReducer::new(),
        })
    }

    /// `m ← μ·m + g`, then `g ← g + μ·m`.
    fn look_ahead(&mut self, grad: TensorView) -> Result<()> {
        let g = unsafe { grad.as_mut_slice() };
        self.reducer
            .scale_sum(self.mom.as_mut_slice(), g, grad.len(), self.dtype, self.mu)?;
        self.reducer
            .sum_scaled(g, self.mom.as_slice(), grad.len(), self.dtype, self.mu)?;
        Ok(())
    }
}

impl Compressor for NesterovMomentum {
    fn compress(&mut self, grad: TensorView) -> Result<TensorView> {
        self.look_ahead(grad)?;
        self.inner.compress(grad)
    }

    fn decompress(&mut self, compressed: TensorView) -> Result<TensorView> {
        self.inner.decompress(compressed)
    }

    fn fused_compress(&mut self, grad: TensorView, error: TensorView) -> Result<TensorView> {
        self.look_ahead(grad)?;
        self.inner.fused_compress(grad, error)
    }

    fn supports_fused(&self) -> bool {
        self.inner.supports_fused()
    }
}
