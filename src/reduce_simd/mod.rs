//! SIMD-accelerated elementwise kernels for the CPU reducer.
//!
//! Every merge in the engine reduces to `dst += alpha * src` over f32 or
//! f64 buffers, so that is the only shape accelerated here. Integer and
//! half types take the scalar path in `reduce`.

#[cfg(target_arch = "x86_64")]
mod x86_64;

#[cfg(target_arch = "aarch64")]
mod aarch64;

/// Try SIMD-accelerated `dst += alpha * src` over f32. Returns `true` if handled.
///
/// # Safety
/// `dst` and `src` must both have at least `count * 4` bytes and must not
/// overlap.
pub(crate) unsafe fn axpy_f32_simd(dst: &mut [u8], src: &[u8], count: usize, alpha: f32) -> bool {
    #[cfg(target_arch = "x86_64")]
    {
        if is_x86_feature_detected!("avx512f") {
            unsafe { x86_64::axpy_f32_avx512(dst, src, count, alpha) };
            return true;
        }
        if is_x86_feature_detected!("avx2") && is_x86_feature_detected!("fma") {
            unsafe { x86_64::axpy_f32_avx2(dst, src, count, alpha) };
            return true;
        }
    }
    #[cfg(target_arch = "aarch64")]
    {
        unsafe { aarch64::axpy_f32_neon(dst, src, count, alpha) };
        return true;
    }
    #[allow(unreachable_code)]
    {
        let _ = (dst, src, count, alpha);
        false
    }
}

/// Try SIMD-accelerated `dst += alpha * src` over f64. Returns `true` if handled.
///
/// # Safety
/// `dst` and `src` must both have at least `count * 8` bytes and must not
/// overlap.
pub(crate) unsafe fn axpy_f64_simd(dst: &mut [u8], src: &[u8], count: usize, alpha: f64) -> bool {
    #[cfg(target_arch = "x86_64")]
    {
        if is_x86_feature_detected!("avx512f") {
            unsafe { x86_64::axpy_f64_avx512(dst, src, count, alpha) };
            return true;
        }
        if is_x86_feature_detected!("avx2") && is_x86_feature_detected!("fma") {
            unsafe { x86_64::axpy_f64_avx2(dst, src, count, alpha) };
            return true;
        }
    }
    #[cfg(target_arch = "aarch64")]
    {
        unsafe { aarch64::axpy_f64_neon(dst, src, count, alpha) };
        return true;
    }
    #[allow(unreachable_code)]
    {
        let _ = (dst, src, count, alpha);
        false
    }
}
