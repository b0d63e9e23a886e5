/// Opaque identifier of a logical tensor shared across workers.
pub type Key = u64;

/// Identifier of a remote worker, as reported by the transport layer.
pub type SenderId = u32;

/// Data types supported by the aggregation core.
///
/// gradex defines its own type enum so it remains a standalone library
/// usable with any tensor framework on the worker side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum DataType {
    F16 = 0,
    F32 = 1,
    F64 = 2,
    I8 = 3,
    U8 = 4,
    I32 = 5,
    I64 = 6,
}

impl DataType {
    /// Size of one element in bytes.
    pub const fn size_in_bytes(self) -> usize {
        match self {
            DataType::F16 => 2,
            DataType::F32 | DataType::I32 => 4,
            DataType::F64 | DataType::I64 => 8,
            DataType::I8 | DataType::U8 => 1,
        }
    }

    /// Human-readable name.
    pub const fn name(self) -> &'static str {
        match self {
            DataType::F16 => "f16",
            DataType::F32 => "f32",
            DataType::F64 => "f64",
            DataType::I8 => "i8",
            DataType::U8 => "u8",
            DataType::I32 => "i32",
            DataType::I64 => "i64",
        }
    }

    /// True for the floating-point types.
    pub const fn is_float(self) -> bool {
        matches!(self, DataType::F16 | DataType::F32 | DataType::F64)
    }

    pub(crate) fn from_u8(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(DataType::F16),
            1 => Some(DataType::F32),
            2 => Some(DataType::F64),
            3 => Some(DataType::I8),
            4 => Some(DataType::U8),
            5 => Some(DataType::I32),
            6 => Some(DataType::I64),
            _ => None,
        }
    }
}

impl std::fmt::Display for DataType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Request classes carried in the packed command word of every RPC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RequestType {
    /// Compressor registration: the payload is a serialized kwargs blob.
    Config = 0,
    /// Ordinary dense push/pull.
    Default = 1,
    /// Compressed push/pull. Routed through the same path as `Default`;
    /// the payload length distinguishes compressed from dense data.
    Compressed = 2,
    /// Row-sparse push/pull. Not implemented; rejected loudly.
    RowSparse = 3,
}

impl RequestType {
    pub(crate) fn from_u8(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(RequestType::Config),
            1 => Some(RequestType::Default),
            2 => Some(RequestType::Compressed),
            3 => Some(RequestType::RowSparse),
            _ => None,
        }
    }
}

/// Pack a (request type, dtype) pair into the wire command word.
///
/// Layout: request type in bits 16.., dtype tag in bits 0..16.
pub const fn pack_cmd(rt: RequestType, dtype: DataType) -> u32 {
    ((rt as u32) << 16) | dtype as u32
}

/// Inverse of [`pack_cmd`]. Returns `None` for unrecognized tags.
pub fn unpack_cmd(cmd: u32) -> Option<(RequestType, DataType)> {
    let rt = RequestType::from_u8((cmd >> 16) as u8)?;
    let dtype = DataType::from_u8((cmd & 0xffff) as u8)?;
    Some((rt, dtype))
}

/// Non-owning view of a tensor region: base address, byte length, dtype.
///
/// The address is carried as a raw `u64` so views can cross thread
/// boundaries inside engine messages. Whoever materializes the view as a
/// slice is responsible for the pointee being alive and unaliased; in this
/// crate that is guaranteed by the store maps outliving the engine strands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TensorView {
    base: u64,
    len: usize,
    dtype: DataType,
}

impl TensorView {
    /// Wrap a raw address.
    ///
    /// # Safety
    /// `base` must point to at least `len` bytes valid for the lifetime of
    /// every use of the view.
    pub unsafe fn from_raw(base: u64, len: usize, dtype: DataType) -> Self {
        Self { base, len, dtype }
    }

    /// View over an existing byte slice.
    pub fn of_slice(data: &[u8], dtype: DataType) -> Self {
        Self {
            base: data.as_ptr() as u64,
            len: data.len(),
            dtype,
        }
    }

    /// The null view, used as a placeholder in sentinel messages.
    pub fn null() -> Self {
        Self {
            base: 0,
            len: 0,
            dtype: DataType::U8,
        }
    }

    pub fn base(&self) -> u64 {
        self.base
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_null(&self) -> bool {
        self.base == 0
    }

    pub fn dtype(&self) -> DataType {
        self.dtype
    }

    /// Number of `dtype` elements in the view.
    pub fn count(&self) -> usize {
        self.len / self.dtype.size_in_bytes()
    }

    /// A copy of this view with a shorter length.
    pub fn truncated(&self, len: usize) -> Self {
        Self {
            base: self.base,
            len: len.min(self.len),
            dtype: self.dtype,
        }
    }

    /// Materialize the view as a shared byte slice.
    ///
    /// # Safety
    /// The pointee must be alive and not concurrently written.
    pub unsafe fn as_slice(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.base as *const u8, self.len) }
    }

    /// Materialize the view as a mutable byte slice.
    ///
    /// # Safety
    /// The pointee must be alive and not aliased by any other live slice.
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn as_mut_slice(&self) -> &mut [u8] {
        unsafe { std::slice::from_raw_parts_mut(self.base as *mut u8, self.len) }
    }
}

impl std::fmt::Display for TensorView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "TensorView(0x{:x}, {}B, {})", self.base, self.len, self.dtype)
    }
}
