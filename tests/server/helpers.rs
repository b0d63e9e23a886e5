use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use bytes::Bytes;
use gradex::{
    pack_cmd, DataType, Key, KvPairs, KvTransport, PullResponse, RequestMeta, RequestType,
    SenderId,
};

/// Transport stand-in: records every ack and copies every pull response
/// out of the zero-copy view at delivery time (as a real transport would
/// finish reading before the next step).
pub struct MockTransport {
    pub push_acks: Mutex<Vec<SenderId>>,
    pub pulls: Mutex<Vec<(SenderId, Key, Vec<u8>)>>,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            push_acks: Mutex::new(Vec::new()),
            pulls: Mutex::new(Vec::new()),
        })
    }

    pub fn push_ack_count(&self) -> usize {
        self.push_acks.lock().unwrap().len()
    }

    pub fn pull_count(&self) -> usize {
        self.pulls.lock().unwrap().len()
    }

    /// Poll until `n` pull responses have been delivered.
    pub fn wait_for_pulls(&self, n: usize, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if self.pull_count() >= n {
                return true;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        self.pull_count() >= n
    }

    /// The `idx`-th pull response decoded as f32s.
    pub fn pull_f32(&self, idx: usize) -> (SenderId, Vec<f32>) {
        let pulls = self.pulls.lock().unwrap();
        let (sender, _, ref bytes) = pulls[idx];
        let vals = bytes
            .chunks_exact(4)
            .map(|b| f32::from_ne_bytes(b.try_into().unwrap()))
            .collect();
        (sender, vals)
    }

    pub fn pull_bytes(&self, idx: usize) -> Vec<u8> {
        self.pulls.lock().unwrap()[idx].2.clone()
    }
}

impl KvTransport for MockTransport {
    fn respond_push(&self, meta: &RequestMeta) {
        self.push_acks.lock().unwrap().push(meta.sender);
    }

    fn respond_pull(&self, meta: &RequestMeta, response: &PullResponse) {
        let bytes = unsafe { response.data.as_slice() }.to_vec();
        self.pulls
            .lock()
            .unwrap()
            .push((meta.sender, response.key, bytes));
    }
}

pub fn push_meta(sender: SenderId, dtype: DataType) -> RequestMeta {
    RequestMeta {
        cmd: pack_cmd(RequestType::Default, dtype),
        push: true,
        sender,
    }
}

pub fn pull_meta(sender: SenderId, dtype: DataType) -> RequestMeta {
    RequestMeta {
        cmd: pack_cmd(RequestType::Default, dtype),
        push: false,
        sender,
    }
}

pub fn config_meta(sender: SenderId) -> RequestMeta {
    RequestMeta {
        cmd: pack_cmd(RequestType::Config, DataType::F32),
        push: true,
        sender,
    }
}

pub fn f32_payload(key: Key, vals: &[f32]) -> KvPairs {
    let mut bytes = Vec::with_capacity(vals.len() * 4);
    for v in vals {
        bytes.extend_from_slice(&v.to_ne_bytes());
    }
    KvPairs::single(key, Bytes::from(bytes))
}

pub fn f16_payload(key: Key, vals: &[f32]) -> KvPairs {
    let mut bytes = Vec::with_capacity(vals.len() * 2);
    for v in vals {
        bytes.extend_from_slice(&half::f16::from_f32(*v).to_bits().to_ne_bytes());
    }
    KvPairs::single(key, Bytes::from(bytes))
}

pub fn pull_payload(key: Key) -> KvPairs {
    KvPairs::single(key, Bytes::new())
}

/// Pair-packed top-k payload: (u32 index, f32 value) runs.
pub fn pair_payload(key: Key, pairs: &[(u32, f32)]) -> KvPairs {
    let mut bytes = Vec::with_capacity(pairs.len() * 8);
    for (idx, val) in pairs {
        bytes.extend_from_slice(&idx.to_ne_bytes());
        bytes.extend_from_slice(&val.to_ne_bytes());
    }
    KvPairs::single(key, Bytes::from(bytes))
}

pub fn decode_pairs_f32(bytes: &[u8]) -> Vec<(u32, f32)> {
    bytes
        .chunks_exact(8)
        .map(|p| {
            (
                u32::from_ne_bytes(p[..4].try_into().unwrap()),
                f32::from_ne_bytes(p[4..].try_into().unwrap()),
            )
        })
        .collect()
}
