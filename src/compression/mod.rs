//! Gradient compression framework.
//!
//! A compressor is a (Compress, Decompress) pair over tensor bytes, possibly
//! stateful. Decorators compose around an owned inner compressor:
//!
//! - [`TopK`]: keep the k largest-magnitude entries as (index, value) pairs.
//! - [`VanillaErrorFeedback`] / [`CorrectedErrorFeedback`] /
//!   [`SparseErrorFeedback`]: carry the compression residual across steps,
//!   optionally rescaled by the learning-rate schedule.
//! - [`NesterovMomentum`]: look-ahead momentum applied before compression.
//! - [`NoCompression`]: identity baseline.
//!
//! Chains are built by name through the [`registry`] from the kwargs blob of
//! a configuration push; a typical chain is `topk` wrapped in momentum
//! wrapped in error feedback.

pub mod error_feedback;
pub mod lr;
pub mod momentum;
pub mod registry;
pub mod topk;
pub mod traits;

pub use error_feedback::{CorrectedErrorFeedback, SparseErrorFeedback, VanillaErrorFeedback};
pub use lr::{LrReader, MmapLr, LR_PATH};
pub use momentum::NesterovMomentum;
pub use registry::{create, deserialize_kwargs, serialize_kwargs, Kwargs};
pub use topk::TopK;
pub use traits::{Compressor, NoCompression};
