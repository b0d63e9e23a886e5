//! Condvar-backed shard work queue with optional workload scheduling.
//!
//! In FIFO mode the queue is a plain deque. With scheduling enabled,
//! messages are ordered by (accumulated per-key workload, arrival id):
//! keys that have queued fewer bytes this step drain first, so a burst of
//! large-tensor messages cannot head-of-line block small keys sharing the
//! shard. Per-key order is preserved because a key's accumulated workload
//! and arrival ids both grow monotonically within a step.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, VecDeque};
use std::sync::{Condvar, Mutex};

use crate::types::Key;

use super::{EngineMessage, EngineOp};

struct Entry {
    work: u64,
    id: u64,
    msg: EngineMessage,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.work == other.work && self.id == other.id
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    // Reversed: BinaryHeap is a max-heap, we pop the smallest (work, id).
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .work
            .cmp(&self.work)
            .then_with(|| other.id.cmp(&self.id))
    }
}

#[derive(Default)]
struct State {
    fifo: VecDeque<EngineMessage>,
    heap: BinaryHeap<Entry>,
    pending_work: HashMap<Key, u64>,
}

/// Work queue owned by one engine shard.
pub struct PriorityQueue {
    state: Mutex<State>,
    available: Condvar,
    schedule: bool,
}

impl PriorityQueue {
    pub fn new(schedule: bool) -> Self {
        Self {
            state: Mutex::new(State::default()),
            available: Condvar::new(),
            schedule,
        }
    }

    /// Enqueue a message and wake the shard strand.
    pub fn push(&self, msg: EngineMessage) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if self.schedule {
            let (work, id) = if msg.op == EngineOp::Terminate {
                // The sentinel must drain after all real work.
                (u64::MAX, u64::MAX)
            } else {
                let acc = state.pending_work.entry(msg.key).or_insert(0);
                *acc += msg.len as u64;
                (*acc, msg.id)
            };
            state.heap.push(Entry { work, id, msg });
        } else {
            state.fifo.push_back(msg);
        }
        drop(state);
        self.available.notify_one();
    }

    /// Block until a message is available and take it.
    pub fn wait_and_pop(&self) -> EngineMessage {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        loop {
            if let Some(msg) = if self.schedule {
                state.heap.pop().map(|e| e.msg)
            } else {
                state.fifo.pop_front()
            } {
                return msg;
            }
            state = self
                .available
                .wait(state)
                .unwrap_or_else(|e| e.into_inner());
        }
    }

    /// Forget the accumulated workload of `key`; called when its barrier
    /// message is enqueued so the next step starts from zero.
    pub fn clear_counter(&self, key: Key) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.pending_work.remove(&key);
    }

    pub fn len(&self) -> usize {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.fifo.len() + state.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
