pub mod bitio;
pub mod compression;
pub mod config;
pub mod engine;
pub mod error;
pub mod kv;
pub mod memory;
pub mod reduce;
mod reduce_simd;
pub mod rng;
pub mod server;
pub mod types;

pub use compression::{Compressor, Kwargs};
pub use config::GradexConfig;
pub use error::{GradexError, Result};
pub use kv::{KvPairs, KvTransport, PullResponse, RequestMeta};
pub use reduce::CpuReducer;
pub use rng::XorShift128Plus;
pub use server::Server;
pub use types::{pack_cmd, unpack_cmd, DataType, Key, RequestType, SenderId, TensorView};
