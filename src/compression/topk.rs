//! Top-K sparsification: keep the k entries of largest magnitude.

use crate::error::{GradexError, Result};
use crate::memory::AlignedBuf;
use crate::types::{DataType, TensorView};

use super::traits::Compressor;

/// Byte stride of one (u32 index, scalar value) pair.
const fn pair_stride(elem: usize) -> usize {
    4 + elem
}

/// Top-K gradient compressor.
///
/// Compressed layout is a packed run of `k` (u32 index, scalar value)
/// pairs; ties in magnitude prefer the smaller index. Decompression
/// zero-fills the dense output and scatters the pairs back.
pub struct TopK {
    k: usize,
    dtype: DataType,
    /// Pair-packed compression output.
    out: AlignedBuf,
    /// Dense decompression output.
    dense: AlignedBuf,
}

impl TopK {
    /// `size` is the dense tensor byte capacity this compressor serves.
    pub fn new(k: usize, size: usize, dtype: DataType) -> Result<Self> {
        if !matches!(dtype, DataType::F32 | DataType::F64) {
            return Err(GradexError::UnsupportedDType { dtype, op: "topk" });
        }
        let max_k = (size / dtype.size_in_bytes()).max(1);
        let k = k.clamp(1, max_k);
        Ok(Self {
            k,
            dtype,
            out: AlignedBuf::new_zeroed(k * pair_stride(dtype.size_in_bytes()))?,
            dense: AlignedBuf::new_zeroed(size)?,
        })
    }

    pub fn k(&self) -> usize {
        self.k
    }

    fn check_grad(&self, grad: TensorView) -> Result<usize> {
        let elem = self.dtype.size_in_bytes();
        if grad.len() % elem != 0 {
            return Err(GradexError::LenNotMultiple {
                len: grad.len(),
                dtype: self.dtype,
            });
        }
        if grad.len() > self.dense.len() {
            return Err(GradexError::BufferTooSmall {
                needed: grad.len(),
                got: self.dense.len(),
            });
        }
        Ok(grad.len() / elem)
    }
}

impl Compressor for TopK {
    fn compress(&mut self, grad: TensorView) -> Result<TensorView> {
        let count = self.check_grad(grad)?;
        let src = unsafe { grad.as_slice() };
        let written = match self.dtype {
            DataType::F32 => compress_impl::<f32>(self.out.as_mut_slice(), src, count, self.k),
            DataType::F64 => compress_impl::<f64>(self.out.as_mut_slice(), src, count, self.k),
            _ => unreachable!(),
        };
        Ok(self.out.view(self.dtype).truncated(written))
    }

    fn decompress(&mut self, compressed: TensorView) -> Result<TensorView> {
        let elem = self.dtype.size_in_bytes();
        let stride = pair_stride(elem);
        if compressed.len() % stride != 0 {
            return Err(GradexError::LenNotMultiple {
                len: compressed.len(),
                dtype: self.dtype,
            });
        }
        let src = unsafe { compressed.as_slice() };
        let dense_count = self.dense.len() / elem;
        let dst = self.dense.as_mut_slice();
        dst.fill(0);
        for pair in src.chunks_exact(stride) {
            let idx = u32::from_ne_bytes(pair[..4].try_into().expect("pair header")) as usize;
            if idx >= dense_count {
                return Err(GradexError::IndexOutOfRange {
                    idx: idx as u32,
                    count: dense_count,
                });
            }
            dst[idx * elem..(idx + 1) * elem].copy_from_slice(&pair[4..]);
        }
        Ok(self.dense.view(self.dtype))
    }

    fn fused_compress(&mut self, grad: TensorView, error: TensorView) -> Result<TensorView> {
        let count = self.check_grad(grad)?;
        if error.len() < grad.len() {
            return Err(GradexError::BufferTooSmall {
                needed: grad.len(),
                got: error.len(),
            });
        }
        let src = unsafe { grad.as_slice() };
        let err = unsafe { error.as_mut_slice() };
        let written = match self.dtype {
            DataType::F32 => {
                fused_impl::<f32>(self.out.as_mut_slice(), src, err, count, self.k)
            }
            DataType::F64 => {
                fused_impl::<f64>(self.out.as_mut_slice(), src, err, count, self.k)
            }
            _ => unreachable!(),
        };
        Ok(self.out.view(self.dtype).truncated(written))
    }

    fn supports_fused(&self) -> bool {
        true
    }
}

trait FloatAbs: Copy + PartialOrd {
    const SIZE: usize;
    fn abs_val(self) -> Self;
    fn read(bytes: &[u8]) -> Self;
}

impl FloatAbs for f32 {
    const SIZE: usize = 4;
    #[inline]
    fn abs_val(self) -> Self {
        self.abs()
    }
    #[inline]
    fn read(bytes: &[u8]) -> Self {
        f32::from_ne_bytes(bytes.try_into().expect("slice length matches type size"))
    }
}

impl FloatAbs for f64 {
    const SIZE: usize = 8;
    #[inline]
    fn abs_val(self) -> Self {
        self.abs()
    }
    #[inline]
    fn read(bytes: &[u8]) -> Self {
        f64::from_ne_bytes(bytes.try_into().expect("slice length matches type size"))
    }
}

/// Indices of the `k` largest-magnitude entries, smaller index on ties.
fn select_topk<T: FloatAbs>(src: &[u8], count: usize, k: usize) -> Vec<u32> {
    let mut order: Vec<u32> = (0..count as u32).collect();
    let abs_at = |i: u32| {
        let off = i as usize * T::SIZE;
        T::read(&src[off..off + T::SIZE]).abs_val()
    };
    order.sort_unstable_by(|&a, &b| {
        abs_at(b)
            .partial_cmp(&abs_at(a))
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.cmp(&b))
    });
    order.truncate(k.min(count));
    order
}

fn write_pairs<T: FloatAbs>(dst: &mut [u8], src: &[u8], selected: &[u32]) -> usize {
    let stride = pair_stride(T::SIZE);
    for (slot, &idx) in selected.iter().enumerate() {
        let d = slot * stride;
        dst[d..d + 4].copy_from_slice(&idx.to_ne_bytes());
        let s = idx as usize * T::SIZE;
        dst[d + 4..d + stride].copy_from_slice(&src[s..s + T::SIZE]);
    }
    selected.len() * stride
}

fn compress_impl<T: FloatAbs>(dst: &mut [u8], src: &[u8], count: usize, k: usize) -> usize {
    let selected = select_topk::<T>(src, count, k);
    write_pairs::<T>(dst, src, &selected)
}

/// Compress and produce the next-step error buffer in one pass: the
/// unselected entries of `grad` land in `error`, the selected slots are
/// zeroed there.
fn fused_impl<T: FloatAbs>(
    dst: &mut [u8],
    src: &[u8],
    error: &mut [u8],
    count: usize,
    k: usize,
) -> usize {
    let selected = select_topk::<T>(src, count, k);
    let written = write_pairs::<T>(dst, src, &selected);
    error[..count * T::SIZE].copy_from_slice(&src[..count * T::SIZE]);
    for &idx in &selected {
        let off = idx as usize * T::SIZE;
        error[off..off + T::SIZE].fill(0);
    }
    written
}
