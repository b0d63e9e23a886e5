//! AVX2 and AVX-512 axpy kernels for x86_64.

#[cfg(target_arch = "x86_64")]
use std::arch::x86_64::*;

// ── f32 ──────────────────────────────────────────────────────────────

#[target_feature(enable = "avx512f")]
pub(crate) unsafe fn axpy_f32_avx512(dst: &mut [u8], src: &[u8], count: usize, alpha: f32) {
    let dp = dst.as_mut_ptr() as *mut f32;
    let sp = src.as_ptr() as *const f32;
    let chunks = count / 16;
    let tail = count % 16;

    unsafe {
        let av = _mm512_set1_ps(alpha);
        for i in 0..chunks {
            let off = i * 16;
            let a = _mm512_loadu_ps(dp.add(off));
            let b = _mm512_loadu_ps(sp.add(off));
            _mm512_storeu_ps(dp.add(off), _mm512_fmadd_ps(b, av, a));
        }
    }

    if tail > 0 {
        unsafe {
            axpy_f32_avx2(&mut dst[chunks * 64..], &src[chunks * 64..], tail, alpha);
        }
    }
}

#[target_feature(enable = "avx2,fma")]
pub(crate) unsafe fn axpy_f32_avx2(dst: &mut [u8], src: &[u8], count: usize, alpha: f32) {
    let dp = dst.as_mut_ptr() as *mut f32;
    let sp = src.as_ptr() as *const f32;
    let chunks = count / 8;
    let tail = count % 8;

    unsafe {
        let av = _mm256_set1_ps(alpha);
        for i in 0..chunks {
            let off = i * 8;
            let a = _mm256_loadu_ps(dp.add(off));
            let b = _mm256_loadu_ps(sp.add(off));
            _mm256_storeu_ps(dp.add(off), _mm256_fmadd_ps(b, av, a));
        }

        let base = chunks * 8;
        for i in 0..tail {
            let idx = base + i;
            let a = dp.add(idx).read_unaligned();
            let b = sp.add(idx).read_unaligned();
            dp.add(idx).write_unaligned(a + alpha * b);
        }
    }
}

// ── f64 ──────────────────────────────────────────────────────────────

#[target_feature(enable = "avx512f")]
pub(crate) unsafe fn axpy_f64_avx512(dst: &mut [u8], src: &[u8], count: usize, alpha: f64) {
    let dp = dst.as_mut_ptr() as *mut f64;
    let sp = src.as_ptr() as *const f64;
    let chunks = count / 8;
    let tail = count % 8;

    unsafe {
        let av = _mm512_set1_pd(alpha);
        for i in 0..chunks {
            let off = i * 8;
            let a = _mm512_loadu_pd(dp.add(off));
            let b = _mm512_loadu_pd(sp.add(off));
            _mm512_storeu_pd(dp.add(off), _mm512_fmadd_pd(b, av, a));
        }
    }

    if tail > 0 {
        unsafe {
            axpy_f64_avx2(&mut dst[chunks * 64..], &src[chunks * 64..], tail, alpha);
        }
    }
}

#[target_feature(enable = "avx2,fma")]
pub(crate) unsafe fn axpy_f64_avx2(dst: &mut [u8], src: &[u8], count: usize, alpha: f64) {
    let dp = dst.as_mut_ptr() as *mut f64;
    let sp = src.as_ptr() as *const f64;
    let chunks = count / 4;
    let tail = count % 4;

    unsafe {
        let av = _mm256_set1_pd(alpha);
        for i in 0..chunks {
            let off = i * 4;
            let a = _mm256_loadu_pd(dp.add(off));
            let b = _mm256_loadu_pd(sp.add(off));
            _mm256_storeu_pd(dp.add(off), _mm256_fmadd_pd(b, av, a));
        }

        let base = chunks * 4;
        for i in 0..tail {
            let idx = base + i;
            let a = dp.add(idx).read_unaligned();
            let b = sp.add(idx).read_unaligned();
            dp.add(idx).write_unaligned(a + alpha * b);
        }
    }
}
