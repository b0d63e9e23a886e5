//! Learning-rate side channel.
//!
//! The corrected and sparse error-feedback variants rescale carried error
//! when the learning-rate schedule changes. The trainer publishes the
//! current rate as an 8-byte native-endian double in a file (`lr.s`) that
//! the server maps read-only. The reader is a trait so tests can inject a
//! rate without touching the filesystem.

use std::fs::File;
use std::path::Path;

use memmap2::MmapOptions;

use crate::error::{GradexError, Result};

/// Conventional path of the shared learning-rate file, relative to the
/// server working directory.
pub const LR_PATH: &str = "lr.s";

/// Source of the current learning rate.
pub trait LrReader: Send {
    fn read(&self) -> f64;
}

/// Closures double as readers in tests.
impl<F: Fn() -> f64 + Send> LrReader for F {
    fn read(&self) -> f64 {
        self()
    }
}

/// Read-only memory map over the first 8 bytes of the learning-rate file.
#[derive(Debug)]
pub struct MmapLr {
    map: memmap2::Mmap,
}

impl MmapLr {
    /// Map `path`. The file must exist, be readable, and hold at least 8
    /// bytes; anything else is fatal at compressor construction.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let display = path.display().to_string();
        let file = File::open(path).map_err(|e| GradexError::lr_channel(display.clone(), e))?;
        let len = file
            .metadata()
            .map_err(|e| GradexError::lr_channel(display.clone(), e))?
            .len();
        if len < 8 {
            return Err(GradexError::lr_channel(
                display,
                std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    format!("expected 8 bytes, found {len}"),
                ),
            ));
        }
        let map = unsafe { MmapOptions::new().len(8).map(&file) }
            .map_err(|e| GradexError::lr_channel(display, e))?;
        Ok(Self { map })
    }
}

impl LrReader for MmapLr {
    fn read(&self) -> f64 {
        f64::from_ne_bytes(self.map[..8].try_into().expect("mapped exactly 8 bytes"))
    }
}
