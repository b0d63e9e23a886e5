//! Aggregation engine plumbing: messages and the per-shard work queue.
//!
//! The engine itself (the strand that drains a shard queue and applies
//! reducer/compressor operations) lives with the server state in
//! [`crate::server`]; this module defines what flows through it.

pub mod queue;

pub use queue::PriorityQueue;

use bytes::Bytes;

use crate::kv::RequestMeta;
use crate::types::{DataType, Key, TensorView};

/// Engine operations, dispatched per message by the shard strand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineOp {
    /// First worker contribution of a step: copy (or promote) into the store.
    CopyFirst,
    /// Subsequent worker contribution: sum (or promote-sum) into the store.
    SumRecv,
    /// Barrier arrival: all workers pushed; finalize the merge and flush
    /// parked pulls.
    AllRecv,
    /// Sentinel: drain up to here and exit the strand.
    Terminate,
}

/// One unit of engine work, routed to the shard owning its key.
///
/// `dst` and `src` are borrowed by value; the pointees outlive message
/// drainage because the store maps live until after shutdown, and `guard`
/// pins the pushed payload for the message's lifetime.
#[derive(Debug)]
pub struct EngineMessage {
    /// Monotonic arrival stamp; ties broken by it under scheduling.
    pub id: u64,
    pub key: Key,
    pub dtype: DataType,
    pub dst: TensorView,
    pub src: TensorView,
    /// Byte length of the incoming payload (low-precision length for
    /// mixed-precision keys).
    pub len: usize,
    pub op: EngineOp,
    pub req: RequestMeta,
    /// Keeps the transport's value buffer alive while the engine reads it.
    pub guard: Option<Bytes>,
    /// Payload length as reported by the request; for keys with a
    /// compressor this is the compressed byte length to decompress.
    pub compressed_len: Option<usize>,
    pub mixed_precision: bool,
}

impl EngineMessage {
    /// The shutdown sentinel.
    pub fn terminate() -> Self {
        Self {
            id: u64::MAX,
            key: 0,
            dtype: DataType::U8,
            dst: TensorView::null(),
            src: TensorView::null(),
            len: 0,
            op: EngineOp::Terminate,
            req: RequestMeta {
                cmd: 0,
                push: false,
                sender: 0,
            },
            guard: None,
            compressed_len: None,
            mixed_precision: false,
        }
    }
}
