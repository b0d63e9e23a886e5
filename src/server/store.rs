//! Per-key server state: stored tensors, merge bookkeeping, shard flags.

use std::collections::{HashMap, HashSet};

use crate::kv::RequestMeta;
use crate::memory::AlignedBuf;
use crate::types::{DataType, Key, SenderId, TensorView};

/// The server's authoritative tensor memory for one key.
///
/// Allocated when the N-th init push arrives; length and dtype are frozen
/// for the key's lifetime. Mixed-precision keys store the f32 promotion
/// (twice the pushed f16 byte length) and record `F32` here.
pub(crate) struct StoredBuffer {
    pub data: AlignedBuf,
    pub dtype: DataType,
}

impl StoredBuffer {
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn view(&self) -> TensorView {
        self.data.view(self.dtype)
    }
}

/// Merge bookkeeping for one key.
///
/// `pending` never exceeds the worker count; reaching it seals the merge
/// and drains the sequence.
#[derive(Default)]
pub(crate) struct UpdateState {
    /// View of the merged result: the stored buffer, the fp16 copy, or a
    /// compressor-owned output.
    pub merged: Option<TensorView>,
    /// Requests buffered for the in-progress barrier (init or push).
    pub pending: Vec<RequestMeta>,
}

/// Shard-local completion-cycle state for one key.
#[derive(Default)]
pub(crate) struct KeyFlags {
    pub push_finished: bool,
    pub pull_cnt: u32,
    pub seen: HashSet<SenderId>,
    pub parked: Vec<RequestMeta>,
}

impl KeyFlags {
    /// Back to the ready state for the next step.
    pub fn reset(&mut self) {
        self.push_finished = false;
        self.pull_cnt = 0;
        self.seen.clear();
    }
}

pub(crate) type ShardFlags = HashMap<Key, KeyFlags>;

/// Stable key→shard assignment, least-loaded at first sight.
///
/// All messages of a key must route to one shard to preserve per-key
/// order; the accumulated load steers only the first assignment.
pub(crate) struct ShardAssign {
    of: HashMap<Key, usize>,
    load: Vec<u64>,
}

impl ShardAssign {
    pub fn new(shards: usize) -> Self {
        Self {
            of: HashMap::new(),
            load: vec![0; shards.max(1)],
        }
    }

    pub fn pick(&mut self, key: Key, workload: u64) -> usize {
        if let Some(&shard) = self.of.get(&key) {
            self.load[shard] += workload;
            return shard;
        }
        let shard = self
            .load
            .iter()
            .enumerate()
            .min_by_key(|(_, &l)| l)
            .map(|(i, _)| i)
            .unwrap_or(0);
        self.load[shard] += workload;
        self.of.insert(key, shard);
        shard
    }
}
