//! CPU reducer: type-dispatched elementwise arithmetic over raw byte buffers.
//!
//! All merge work in the engine funnels through these operations. The f32
//! and f64 paths combine SIMD kernels with rayon chunking; other dtypes use
//! alignment-safe scalar loops (payloads arriving from the transport carry
//! no alignment guarantee, so scalar paths read through native-endian byte
//! conversion rather than typed slices).

use half::f16;
use rayon::prelude::*;

use crate::error::{GradexError, Result};
use crate::reduce_simd::{axpy_f32_simd, axpy_f64_simd};
use crate::types::DataType;

/// Minimum element count before a reduction is split across rayon workers.
const PAR_MIN_ELEMS: usize = 1 << 15;

/// Elements per rayon block when a reduction is split.
const PAR_BLOCK_ELEMS: usize = 1 << 16;

/// Minimum byte length before `copy` goes parallel.
const PAR_MIN_COPY: usize = 1 << 20;

/// Vectorized elementwise sum, copy and precision conversion over raw
/// byte buffers.
#[derive(Debug, Default, Clone)]
pub struct CpuReducer;

impl CpuReducer {
    pub fn new() -> Self {
        Self
    }

    /// `dst += src`, elementwise over `len` bytes of `dtype`.
    pub fn sum(&self, dst: &mut [u8], src: &[u8], len: usize, dtype: DataType) -> Result<()> {
        self.sum_scaled(dst, src, len, dtype, 1.0)
    }

    /// `dst += alpha * src`, elementwise over `len` bytes of `dtype`.
    pub fn sum_scaled(
        &self,
        dst: &mut [u8],
        src: &[u8],
        len: usize,
        dtype: DataType,
        alpha: f32,
    ) -> Result<()> {
        let count = checked_count(len, dtype)?;
        check_capacity(dst.len(), len)?;
        check_capacity(src.len(), len)?;
        let dst = &mut dst[..len];
        let src = &src[..len];

        match dtype {
            DataType::F32 => axpy_blocks(dst, src, count, 4, |d, s, n| {
                if !unsafe { axpy_f32_simd(d, s, n, alpha) } {
                    axpy_scalar::<f32>(d, s, n, alpha);
                }
            }),
            DataType::F64 => axpy_blocks(dst, src, count, 8, |d, s, n| {
                if !unsafe { axpy_f64_simd(d, s, n, alpha as f64) } {
                    axpy_scalar::<f64>(d, s, n, alpha);
                }
            }),
            DataType::F16 => axpy_blocks(dst, src, count, 2, |d, s, n| {
                axpy_scalar::<f16>(d, s, n, alpha);
            }),
            DataType::I8 => axpy_scalar::<i8>(dst, src, count, alpha),
            DataType::U8 => axpy_scalar::<u8>(dst, src, count, alpha),
            DataType::I32 => axpy_scalar::<i32>(dst, src, count, alpha),
            DataType::I64 => axpy_scalar::<i64>(dst, src, count, alpha),
        }
        Ok(())
    }

    /// `dst = s1 + alpha * s2`, elementwise. Buffers must be disjoint.
    pub fn sum3(
        &self,
        dst: &mut [u8],
        s1: &[u8],
        s2: &[u8],
        len: usize,
        dtype: DataType,
        alpha: f32,
    ) -> Result<()> {
        checked_count(len, dtype)?;
        check_capacity(dst.len(), len)?;
        check_capacity(s1.len(), len)?;
        check_capacity(s2.len(), len)?;
        self.copy(dst, s1, len);
        self.sum_scaled(dst, s2, len, dtype, alpha)
    }

    /// `dst = alpha * dst + src`, elementwise. This is the momentum
    /// recurrence with the accumulator as the destination, so callers never
    /// need aliased buffers.
    pub fn scale_sum(
        &self,
        dst: &mut [u8],
        src: &[u8],
        len: usize,
        dtype: DataType,
        alpha: f32,
    ) -> Result<()> {
        let count = checked_count(len, dtype)?;
        check_capacity(dst.len(), len)?;
        check_capacity(src.len(), len)?;

        match dtype {
            DataType::F32 => scale_sum_scalar::<f32>(dst, src, count, alpha),
            DataType::F64 => scale_sum_scalar::<f64>(dst, src, count, alpha),
            DataType::F16 => scale_sum_scalar::<f16>(dst, src, count, alpha),
            _ => {
                return Err(GradexError::UnsupportedDType {
                    dtype,
                    op: "scale_sum",
                })
            }
        }
        Ok(())
    }

    /// For each position `i` in `idx`: `dst[i] += alpha * src[idx[i]]`, and
    /// `src[idx[i]]` is zeroed. `dst` is densely indexed `0..idx.len()`.
    ///
    /// Floating dtypes only. Duplicate indices accumulate once per
    /// occurrence but are zeroed after the first, so later occurrences add
    /// nothing.
    pub fn sparse_sum(
        &self,
        dst: &mut [u8],
        src: &mut [u8],
        len: usize,
        dtype: DataType,
        alpha: f32,
        idx: &[u32],
    ) -> Result<()> {
        if !dtype.is_float() {
            return Err(GradexError::UnsupportedDType {
                dtype,
                op: "sparse_sum",
            });
        }
        let count = checked_count(len, dtype)?;
        check_capacity(src.len(), len)?;
        check_capacity(dst.len(), idx.len() * dtype.size_in_bytes())?;
        if let Some(&bad) = idx.iter().find(|&&i| i as usize >= count) {
            return Err(GradexError::IndexOutOfRange { idx: bad, count });
        }

        match dtype {
            DataType::F32 => sparse_sum_scalar::<f32>(dst, src, idx, alpha),
            DataType::F64 => sparse_sum_scalar::<f64>(dst, src, idx, alpha),
            DataType::F16 => sparse_sum_scalar::<f16>(dst, src, idx, alpha),
            _ => unreachable!(),
        }
        Ok(())
    }

    /// Byte copy of `len` bytes; parallelized above a size threshold.
    pub fn copy(&self, dst: &mut [u8], src: &[u8], len: usize) {
        let dst = &mut dst[..len];
        let src = &src[..len];
        if len >= PAR_MIN_COPY {
            dst.par_chunks_mut(PAR_MIN_COPY)
                .zip(src.par_chunks(PAR_MIN_COPY))
                .for_each(|(d, s)| d.copy_from_slice(s));
        } else {
            dst.copy_from_slice(src);
        }
    }

    /// Convert between f32 storage (`hi`) and f16 storage (`lo`).
    ///
    /// `lo_len` is the byte length of the low-precision side; the
    /// high-precision side must hold `2 * lo_len` bytes. `promote = true`
    /// reads `lo` into `hi`; `promote = false` demotes `hi` into `lo`.
    pub fn copy_mixed_precision(
        &self,
        dst: &mut [u8],
        src: &[u8],
        lo_len: usize,
        promote: bool,
    ) -> Result<()> {
        let count = checked_count(lo_len, DataType::F16)?;
        let (hi_len, lo_bytes) = (lo_len * 2, lo_len);
        // Disjoint per-index writes through raw addresses so the conversion
        // closure can fan out across rayon workers.
        let dst_base = dst.as_mut_ptr() as u64;
        let src_base = src.as_ptr() as u64;
        if promote {
            check_capacity(dst.len(), hi_len)?;
            check_capacity(src.len(), lo_bytes)?;
            convert_blocks(count, move |i| unsafe {
                let lo = (src_base as *const u16).byte_add(i * 2).read_unaligned();
                let hi = (dst_base as *mut f32).byte_add(i * 4);
                hi.write_unaligned(f16::from_bits(lo).to_f32());
            });
        } else {
            check_capacity(dst.len(), lo_bytes)?;
            check_capacity(src.len(), hi_len)?;
            convert_blocks(count, move |i| unsafe {
                let hi = (src_base as *const f32).byte_add(i * 4).read_unaligned();
                let lo = (dst_base as *mut u16).byte_add(i * 2);
                lo.write_unaligned(f16::from_f32(hi).to_bits());
            });
        }
        Ok(())
    }

    /// One-pass promote-and-add: `hi_dst[i] += f32(lo_src[i])` over the f16
    /// elements of `lo_src`.
    pub fn sum_mixed_precision(
        &self,
        hi_dst: &mut [u8],
        lo_src: &[u8],
        lo_len: usize,
    ) -> Result<()> {
        let count = checked_count(lo_len, DataType::F16)?;
        check_capacity(hi_dst.len(), lo_len * 2)?;
        check_capacity(lo_src.len(), lo_len)?;
        let dst_base = hi_dst.as_mut_ptr() as u64;
        let src_base = lo_src.as_ptr() as u64;
        convert_blocks(count, move |i| unsafe {
            let lo = (src_base as *const u16).byte_add(i * 2).read_unaligned();
            let hi = (dst_base as *mut f32).byte_add(i * 4);
            hi.write_unaligned(hi.read_unaligned() + f16::from_bits(lo).to_f32());
        });
        Ok(())
    }
}

fn checked_count(len: usize, dtype: DataType) -> Result<usize> {
    let elem = dtype.size_in_bytes();
    if len % elem != 0 {
        return Err(GradexError::LenNotMultiple { len, dtype });
    }
    Ok(len / elem)
}

fn check_capacity(got: usize, needed: usize) -> Result<()> {
    if got < needed {
        return Err(GradexError::BufferTooSmall { needed, got });
    }
    Ok(())
}

/// Split an axpy across rayon blocks when large enough, else run inline.
fn axpy_blocks(
    dst: &mut [u8],
    src: &[u8],
    count: usize,
    elem: usize,
    kernel: impl Fn(&mut [u8], &[u8], usize) + Send + Sync,
) {
    if count >= PAR_MIN_ELEMS {
        let block = PAR_BLOCK_ELEMS * elem;
        dst.par_chunks_mut(block)
            .zip(src.par_chunks(block))
            .for_each(|(d, s)| kernel(d, s, s.len() / elem));
    } else {
        kernel(dst, src, count);
    }
}

/// Run an index-wise conversion, parallel when large enough.
fn convert_blocks(count: usize, f: impl Fn(usize) + Send + Sync) {
    if count >= PAR_MIN_ELEMS {
        (0..count).into_par_iter().for_each(f);
    } else {
        for i in 0..count {
            f(i);
        }
    }
}

// ── Scalar element access (alignment-safe, native-endian) ────────────

trait Elem: Copy + Send + Sync {
    const SIZE: usize;
    fn read(bytes: &[u8]) -> Self;
    fn write(self, bytes: &mut [u8]);
    /// `self + alpha * other`.
    fn axpy(self, other: Self, alpha: f32) -> Self;
}

macro_rules! impl_elem_float {
    ($($ty:ty),*) => {
        $(
            impl Elem for $ty {
                const SIZE: usize = std::mem::size_of::<$ty>();
                #[inline]
                fn read(bytes: &[u8]) -> Self {
                    Self::from_ne_bytes(bytes.try_into().expect("slice length matches type size"))
                }
                #[inline]
                fn write(self, bytes: &mut [u8]) {
                    bytes.copy_from_slice(&self.to_ne_bytes());
                }
                #[inline]
                fn axpy(self, other: Self, alpha: f32) -> Self {
                    self + alpha as $ty * other
                }
            }
        )*
    };
}

macro_rules! impl_elem_int {
    ($($ty:ty),*) => {
        $(
            impl Elem for $ty {
                const SIZE: usize = std::mem::size_of::<$ty>();
                #[inline]
                fn read(bytes: &[u8]) -> Self {
                    Self::from_ne_bytes(bytes.try_into().expect("slice length matches type size"))
                }
                #[inline]
                fn write(self, bytes: &mut [u8]) {
                    bytes.copy_from_slice(&self.to_ne_bytes())
                }
                #[inline]
                fn axpy(self, other: Self, alpha: f32) -> Self {
                    if alpha == 1.0 {
                        self.wrapping_add(other)
                    } else {
                        (self as f64 + alpha as f64 * other as f64) as $ty
                    }
                }
            }
        )*
    };
}

impl_elem_float!(f32, f64);
impl_elem_int!(i8, u8, i32, i64);

impl Elem for f16 {
    const SIZE: usize = 2;
    #[inline]
    fn read(bytes: &[u8]) -> Self {
        f16::from_bits(u16::from_ne_bytes(
            bytes.try_into().expect("slice length matches type size"),
        ))
    }
    #[inline]
    fn write(self, bytes: &mut [u8]) {
        bytes.copy_from_slice(&self.to_bits().to_ne_bytes());
    }
    #[inline]
    fn axpy(self, other: Self, alpha: f32) -> Self {
        f16::from_f32(self.to_f32() + alpha * other.to_f32())
    }
}

fn axpy_scalar<T: Elem>(dst: &mut [u8], src: &[u8], count: usize, alpha: f32) {
    for i in 0..count {
        let off = i * T::SIZE;
        let a = T::read(&dst[off..off + T::SIZE]);
        let b = T::read(&src[off..off + T::SIZE]);
        a.axpy(b, alpha).write(&mut dst[off..off + T::SIZE]);
    }
}

fn scale_sum_scalar<T: Elem>(dst: &mut [u8], src: &[u8], count: usize, alpha: f32) {
    for i in 0..count {
        let off = i * T::SIZE;
        let a = T::read(&dst[off..off + T::SIZE]);
        let b = T::read(&src[off..off + T::SIZE]);
        // alpha*dst + src == src.axpy(dst, alpha)
        b.axpy(a, alpha).write(&mut dst[off..off + T::SIZE]);
    }
}

fn sparse_sum_scalar<T: Elem + Zeroable>(dst: &mut [u8], src: &mut [u8], idx: &[u32], alpha: f32) {
    for (i, &j) in idx.iter().enumerate() {
        let d_off = i * T::SIZE;
        let s_off = j as usize * T::SIZE;
        let d = T::read(&dst[d_off..d_off + T::SIZE]);
        let s = T::read(&src[s_off..s_off + T::SIZE]);
        d.axpy(s, alpha).write(&mut dst[d_off..d_off + T::SIZE]);
        T::zero().write(&mut src[s_off..s_off + T::SIZE]);
    }
}

trait Zeroable: Elem {
    fn zero() -> Self;
}

impl Zeroable for f32 {
    fn zero() -> Self {
        0.0
    }
}
impl Zeroable for f64 {
    fn zero() -> Self {
        0.0
    }
}
impl Zeroable for f16 {
    fn zero() -> Self {
        f16::ZERO
    }
}
