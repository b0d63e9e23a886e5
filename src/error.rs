use crate::types::{DataType, Key};

pub type Result<T> = std::result::Result<T, GradexError>;

#[derive(Debug, thiserror::Error)]
pub enum GradexError {
    #[error("unsupported data type: {dtype} for operation {op}")]
    UnsupportedDType { dtype: DataType, op: &'static str },

    #[error("byte length {len} is not a multiple of {dtype} element size")]
    LenNotMultiple { len: usize, dtype: DataType },

    #[error("buffer too small: need {needed} bytes, have {got}")]
    BufferTooSmall { needed: usize, got: usize },

    #[error("index {idx} out of range for tensor of {count} elements")]
    IndexOutOfRange { idx: u32, count: usize },

    #[error("hyper-parameter '{0}' is required but missing")]
    MissingHyperParam(String),

    #[error("hyper-parameter '{name}' has invalid value '{value}'")]
    InvalidHyperParam { name: String, value: String },

    #[error("malformed kwargs blob: {0}")]
    MalformedKwargs(String),

    #[error("no compressor registered under name '{0}'")]
    UnknownCompressor(String),

    #[error("key {key} has no initialized buffer; init it first")]
    KeyNotInitialized { key: Key },

    #[error("unrecognized command word 0x{0:x}")]
    BadCommand(u32),

    #[error("malformed request: {0}")]
    InvalidRequest(&'static str),

    #[error("{0} is not implemented")]
    Unimplemented(&'static str),

    #[error("learning-rate channel '{path}': {source}")]
    LrChannel {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("allocation of {size} bytes failed")]
    AllocFailed { size: usize },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("internal lock poisoned: {0}")]
    LockPoisoned(&'static str),
}

impl GradexError {
    /// Create an `LrChannel` error for a path.
    pub fn lr_channel(path: impl Into<String>, source: std::io::Error) -> Self {
        Self::LrChannel {
            path: path.into(),
            source,
        }
    }
}
