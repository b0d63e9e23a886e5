//! Transport collaborator surface.
//!
//! The key-value RPC layer is external to this crate: it invokes
//! [`crate::server::Server::handle`] for every push/pull callback and
//! receives responses through [`KvTransport`]. Value buffers cross the
//! boundary as [`Bytes`] handles, so the handler can pin a pushed payload
//! for the engine by cloning the handle instead of copying the bytes.

use bytes::Bytes;

use crate::types::{Key, SenderId, TensorView};

/// Per-request metadata delivered with every transport callback.
#[derive(Debug, Clone)]
pub struct RequestMeta {
    /// Packed (request type, dtype) command word; see [`crate::types::pack_cmd`].
    pub cmd: u32,
    /// True for push, false for pull.
    pub push: bool,
    /// Identity of the originating worker.
    pub sender: SenderId,
}

/// Key-value payload of a request: one key, a value buffer, per-key lengths.
#[derive(Debug, Clone, Default)]
pub struct KvPairs {
    pub keys: Vec<Key>,
    pub vals: Bytes,
    pub lens: Vec<usize>,
}

impl KvPairs {
    /// Single-key payload.
    pub fn single(key: Key, vals: Bytes) -> Self {
        let len = vals.len();
        Self {
            keys: vec![key],
            vals,
            lens: vec![len],
        }
    }
}

/// A pull response shell: a non-owning view of the merged tensor.
///
/// Shells are memoized per key and updated in place across steps so a
/// zero-copy transport can keep its memory registration. The transport must
/// finish reading the referenced bytes before the next step reuses the
/// underlying buffer.
#[derive(Debug, Clone, Copy)]
pub struct PullResponse {
    pub key: Key,
    pub data: TensorView,
}

/// Response primitives provided by the transport layer.
pub trait KvTransport: Send + Sync {
    /// Acknowledge a push. The response carries no payload.
    fn respond_push(&self, meta: &RequestMeta);

    /// Answer a pull with a view of the merged tensor.
    fn respond_pull(&self, meta: &RequestMeta, response: &PullResponse);
}
