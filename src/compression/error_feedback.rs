//! Error-feedback decorators: carry the compression residual across steps.
//!
//! Each decorator wraps an owned inner compressor and an equal-sized error
//! buffer. A step corrects the incoming gradient with (a function of) the
//! carried error, delegates compression, and leaves the new residual in the
//! error buffer, through the inner compressor's fused path when it has
//! one, otherwise by explicit `error = g − decompress(compress(g))`.

use crate::error::Result;
use crate::memory::AlignedBuf;
use crate::reduce::CpuReducer;
use crate::rng::XorShift128Plus;
use crate::types::{DataType, TensorView};

use super::lr::{LrReader, MmapLr, LR_PATH};
use super::traits::Compressor;

/// State shared by the error-feedback variants.
struct EfCore {
    inner: Box<dyn Compressor>,
    error: AlignedBuf,
    dtype: DataType,
    reducer: CpuReducer,
}

impl EfCore {
    fn new(inner: Box<dyn Compressor>, size: usize, dtype: DataType) -> Result<Self> {
        Ok(Self {
            inner,
            error: AlignedBuf::new_zeroed(size)?,
            dtype,
            reducer: CpuReducer::new(),
        })
    }

    fn error_view(&self, len: usize) -> TensorView {
        self.error.view(self.dtype).truncated(len)
    }

    /// Delegate compression of the already-corrected gradient and update
    /// the error buffer.
    fn compress_corrected(&mut self, grad: TensorView) -> Result<TensorView> {
        let err_view = self.error_view(grad.len());
        if self.inner.supports_fused() {
            self.inner.fused_compress(grad, err_view)
        } else {
            let compressed = self.inner.compress(grad)?;
            let dense = self.inner.decompress(compressed)?;
            let err = unsafe { err_view.as_mut_slice() };
            let g = unsafe { grad.as_slice() };
            let d = unsafe { dense.as_slice() };
            self.reducer
                .sum3(err, g, d, grad.len(), self.dtype, -1.0)?;
            Ok(compressed)
        }
    }
}

/// Vanilla error feedback: `g ← g + error`.
pub struct VanillaErrorFeedback {
    core: EfCore,
}

impl VanillaErrorFeedback {
    pub fn new(inner: Box<dyn Compressor>, size: usize, dtype: DataType) -> Result<Self> {
        Ok(Self {
            core: EfCore::new(inner, size, dtype)?,
        })
    }
}

impl Compressor for VanillaErrorFeedback {
    fn compress(&mut self, grad: TensorView) -> Result<TensorView> {
        let g = unsafe { grad.as_mut_slice() };
        let err = self.core.error.as_slice();
        self.core.reducer.sum(g, err, grad.len(), self.core.dtype)?;
        self.core.compress_corrected(grad)
    }

    fn decompress(&mut self, compressed: TensorView) -> Result<TensorView> {
        self.core.inner.decompress(compressed)
    }
}

/// Corrected error feedback: `g ← g + (prev_lr / cur_lr) · error`, with the
/// learning rate read from the shared-memory channel each step.
pub struct CorrectedErrorFeedback {
    core: EfCore,
    lr: Box<dyn LrReader>,
    prev_lr: f64,
}

impl CorrectedErrorFeedback {
    pub fn new(inner: Box<dyn Compressor>, size: usize, dtype: DataType) -> Result<Self> {
        let lr = MmapLr::open(LR_PATH)?;
        Self::with_reader(inner, size, dtype, Box::new(lr))
    }

    /// Construct with an injected learning-rate source.
    pub fn with_reader(
        inner: Box<dyn Compressor>,
        size: usize,
        dtype: DataType,
        lr: Box<dyn LrReader>,
    ) -> Result<Self> {
        let prev_lr = lr.read();
        Ok(Self {
            core: EfCore::new(inner, size, dtype)?,
            lr,
            prev_lr,
        })
    }
}

impl Compressor for CorrectedErrorFeedback {
    fn compress(&mut self, grad: TensorView) -> Result<TensorView> {
        let cur_lr = self.lr.read();
        let alpha = (self.prev_lr / cur_lr) as f32;
        let g = unsafe { grad.as_mut_slice() };
        let err = self.core.error.as_slice();
        self.core
            .reducer
            .sum_scaled(g, err, grad.len(), self.core.dtype, alpha)?;
        self.prev_lr = cur_lr;
        self.core.compress_corrected(grad)
    }

    fn decompress(&mut self, compressed: TensorView) -> Result<TensorView> {
        self.core.inner.decompress(compressed)
    }
}

/// Sparse error feedback: like corrected, but only `k` uniformly sampled
/// error positions (with replacement) are accumulated and zeroed per step.
/// Duplicate draws double-count on that step; this matches the reference
/// behavior and is accepted.
pub struct SparseErrorFeedback {
    core: EfCore,
    lr: Box<dyn LrReader>,
    prev_lr: f64,
    rng: XorShift128Plus,
    k: usize,
}

impl SparseErrorFeedback {
    pub fn new(
        inner: Box<dyn Compressor>,
        size: usize,
        dtype: DataType,
        k: usize,
        seed: Option<u64>,
    ) -> Result<Self> {
        let lr = MmapLr::open(LR_PATH)?;
        Self::with_reader(inner, size, dtype, k, seed, Box::new(lr))
    }

    /// Construct with an injected learning-rate source.
    pub fn with_reader(
        inner: Box<dyn Compressor>,
        size: usize,
        dtype: DataType,
        k: usize,
        seed: Option<u64>,
        lr: Box<dyn LrReader>,
    ) -> Result<Self> {
        let max_k = (size / dtype.size_in_bytes()).max(1);
        let k = k.clamp(1, max_k);
        let mut rng = XorShift128Plus::new();
        if let Some(seed) = seed {
            // Seed offset by k keeps replicas with different k decorrelated.
            rng.set_seed(seed + k as u64);
            tracing::info!(seed = seed + k as u64, "sparse error feedback seeded");
        }
        let prev_lr = lr.read();
        Ok(Self {
            core: EfCore::new(inner, size, dtype)?,
            lr,
            prev_lr,
            rng,
            k,
        })
    }
}

impl Compressor for SparseErrorFeedback {
    fn compress(&mut self, grad: TensorView) -> Result<TensorView> {
        let cur_lr = self.lr.read();
        let alpha = (self.prev_lr / cur_lr) as f32;
        let count = grad.count();
        let idx: Vec<u32> = (0..self.k)
            .map(|_| self.rng.randint(0, count as u64) as u32)
            .collect();
        let g = unsafe { grad.as_mut_slice() };
        let err_view = self.core.error_view(grad.len());
        let err = unsafe { err_view.as_mut_slice() };
        self.core
            .reducer
            .sparse_sum(g, err, grad.len(), self.core.dtype, alpha, &idx)?;
        self.prev_lr = cur_lr;
        self.core.compress_corrected(grad)
    }

    fn decompress(&mut self, compressed: TensorView) -> Result<TensorView> {
        self.core.inner.decompress(compressed)
    }
}
