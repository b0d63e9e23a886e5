//! Page-aligned owning byte buffers for tensor storage.
//!
//! The store, the low-precision copies, and the compressor scratch buffers
//! all live in page-aligned allocations so the transport layer can register
//! them with zero-copy NICs without re-buffering.

use std::alloc::{alloc_zeroed, dealloc, Layout};
use std::ptr::NonNull;

use crate::error::{GradexError, Result};
use crate::types::{DataType, TensorView};

/// Allocation alignment for tensor buffers.
pub const PAGE_SIZE: usize = 4096;

/// Round `len` up to the next multiple of the page size.
pub const fn page_align(len: usize) -> usize {
    (len + PAGE_SIZE - 1) & !(PAGE_SIZE - 1)
}

/// An owning, page-aligned, zero-initialized byte buffer.
///
/// Capacity is page-rounded; `len` is the logical byte length. The buffer
/// never reallocates: once created for a key, its address is stable for the
/// process lifetime, which is what lets engine messages and pull responses
/// carry raw views into it.
pub struct AlignedBuf {
    ptr: NonNull<u8>,
    len: usize,
    layout: Layout,
}

// The buffer is plain bytes behind a unique owner.
unsafe impl Send for AlignedBuf {}
unsafe impl Sync for AlignedBuf {}

impl AlignedBuf {
    /// Allocate a zeroed buffer of `len` logical bytes (capacity page-rounded).
    pub fn new_zeroed(len: usize) -> Result<Self> {
        let cap = page_align(len.max(1));
        let layout = Layout::from_size_align(cap, PAGE_SIZE)
            .map_err(|_| GradexError::AllocFailed { size: cap })?;
        let raw = unsafe { alloc_zeroed(layout) };
        let ptr = NonNull::new(raw).ok_or(GradexError::AllocFailed { size: cap })?;
        Ok(Self { ptr, len, layout })
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn base_u64(&self) -> u64 {
        self.ptr.as_ptr() as u64
    }

    pub fn as_slice(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }

    /// Non-owning view of the whole buffer tagged with `dtype`.
    pub fn view(&self, dtype: DataType) -> TensorView {
        unsafe { TensorView::from_raw(self.base_u64(), self.len, dtype) }
    }
}

impl Drop for AlignedBuf {
    fn drop(&mut self) {
        unsafe { dealloc(self.ptr.as_ptr(), self.layout) };
    }
}

impl std::fmt::Debug for AlignedBuf {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "AlignedBuf(0x{:x}, {}B)", self.base_u64(), self.len)
    }
}
