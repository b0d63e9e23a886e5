//! The aggregation server: per-key state, engine strands, lifecycle.
//!
//! A [`Server`] owns every map the handler and engine touch. Construction
//! spawns the engine strands (in synchronous, non-blocking mode); dropping
//! or [`shutdown`](Server::shutdown) pushes a terminate sentinel to each
//! shard queue, joins the strands, and frees all tensor memory.
//!
//! The transport collaborator calls [`Server::handle`] for every push/pull
//! callback; one callback is handled at a time (the handler mutex), and the
//! handler never blocks on tensor work; it enqueues to the engine.

mod handler;
mod store;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use crate::compression::Compressor;
use crate::config::GradexConfig;
use crate::engine::{EngineMessage, EngineOp, PriorityQueue};
use crate::error::{GradexError, Result};
use crate::kv::{KvPairs, KvTransport, PullResponse, RequestMeta};
use crate::reduce::CpuReducer;
use crate::types::{DataType, Key, TensorView};

use store::{ShardAssign, ShardFlags, StoredBuffer, UpdateState};

type CompressorHandle = Arc<Mutex<Box<dyn Compressor>>>;

pub(crate) struct ServerInner {
    cfg: GradexConfig,
    num_workers: u32,
    reducer: CpuReducer,
    transport: Arc<dyn KvTransport>,

    store: Mutex<HashMap<Key, StoredBuffer>>,
    update: Mutex<HashMap<Key, UpdateState>>,
    fp16: Mutex<HashMap<Key, crate::memory::AlignedBuf>>,
    compressors: Mutex<HashMap<Key, CompressorHandle>>,

    /// Serializes transport callbacks.
    handle_mu: Mutex<()>,

    queues: Vec<Arc<PriorityQueue>>,
    flags: Vec<Mutex<ShardFlags>>,
    assign: Mutex<ShardAssign>,

    pull_resp: Mutex<HashMap<Key, PullResponse>>,
    timestamp: AtomicU64,
}

/// The server-side aggregation core.
pub struct Server {
    inner: Arc<ServerInner>,
    strands: Vec<JoinHandle<()>>,
}

impl Server {
    /// Build the server and spawn its engine strands.
    ///
    /// `num_workers` is the number of participating workers per key (N),
    /// as known to the transport layer.
    pub fn new(
        cfg: GradexConfig,
        num_workers: u32,
        transport: Arc<dyn KvTransport>,
    ) -> Result<Self> {
        let shards = cfg.engine_threads.max(1);
        let queues: Vec<Arc<PriorityQueue>> = (0..shards)
            .map(|_| Arc::new(PriorityQueue::new(cfg.enable_schedule)))
            .collect();
        let flags = (0..shards).map(|_| Mutex::new(ShardFlags::new())).collect();

        let spawn_strands = cfg.sync_mode && !cfg.engine_blocking;
        let inner = Arc::new(ServerInner {
            num_workers: num_workers.max(1),
            reducer: CpuReducer::new(),
            transport,
            store: Mutex::new(HashMap::new()),
            update: Mutex::new(HashMap::new()),
            fp16: Mutex::new(HashMap::new()),
            compressors: Mutex::new(HashMap::new()),
            handle_mu: Mutex::new(()),
            queues,
            flags,
            assign: Mutex::new(ShardAssign::new(shards)),
            pull_resp: Mutex::new(HashMap::new()),
            timestamp: AtomicU64::new(0),
            cfg,
        });

        let mut strands = Vec::new();
        if spawn_strands {
            for shard in 0..shards {
                let inner = Arc::clone(&inner);
                strands.push(
                    std::thread::Builder::new()
                        .name(format!("gradex-engine-{shard}"))
                        .spawn(move || engine_strand(inner, shard))?,
                );
            }
        }
        tracing::info!(
            shards,
            sync = inner.cfg.sync_mode,
            blocking = inner.cfg.engine_blocking,
            "server started"
        );

        Ok(Self { inner, strands })
    }

    /// Build from environment-variable configuration.
    pub fn from_env(num_workers: u32, transport: Arc<dyn KvTransport>) -> Result<Self> {
        Self::new(GradexConfig::from_env(), num_workers, transport)
    }

    /// Entry point for transport callbacks: one push or pull request.
    ///
    /// Errors returned here are contract or configuration violations; the
    /// design treats the training job as atomic, so embedders should abort
    /// the job on error rather than retry.
    pub fn handle(&self, meta: RequestMeta, data: KvPairs) -> Result<()> {
        let result = self.inner.handle(meta, data);
        if let Err(e) = &result {
            tracing::error!(error = %e, "request handling failed");
        }
        result
    }

    pub fn config(&self) -> &GradexConfig {
        &self.inner.cfg
    }

    pub fn num_workers(&self) -> u32 {
        self.inner.num_workers
    }

    /// Terminate the engine strands and wait for them to drain. Idempotent.
    pub fn shutdown(&mut self) {
        if self.strands.is_empty() {
            return;
        }
        for q in &self.inner.queues {
            q.push(EngineMessage::terminate());
        }
        for strand in self.strands.drain(..) {
            let _ = strand.join();
        }
        tracing::info!("server shut down");
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn engine_strand(inner: Arc<ServerInner>, shard: usize) {
    loop {
        let msg = inner.queues[shard].wait_and_pop();
        if msg.op == EngineOp::Terminate {
            tracing::debug!(shard, "engine strand terminating");
            break;
        }
        if let Err(e) = inner.process(shard, msg) {
            tracing::error!(shard, error = %e, "engine operation failed");
        }
    }
}

impl ServerInner {
    fn next_id(&self) -> u64 {
        self.timestamp.fetch_add(1, Ordering::Relaxed)
    }

    fn shard_for(&self, key: Key, workload: u64) -> Result<usize> {
        let mut assign = self
            .assign
            .lock()
            .map_err(|_| GradexError::LockPoisoned("assign"))?;
        Ok(assign.pick(key, workload))
    }

    fn send_push_response(&self, meta: &RequestMeta) {
        self.transport.respond_push(meta);
    }

    /// Answer a pull from the memoized per-key response shell, updated with
    /// the current merged view.
    fn send_pull_response(&self, key: Key, meta: &RequestMeta, data: TensorView) -> Result<()> {
        let mut map = self
            .pull_resp
            .lock()
            .map_err(|_| GradexError::LockPoisoned("pull_resp"))?;
        let shell = map.entry(key).or_insert(PullResponse { key, data });
        shell.data = data;
        self.transport.respond_pull(meta, shell);
        Ok(())
    }

    /// Engine dispatch for one message. Runs on the shard strand.
    fn process(&self, shard: usize, mut msg: EngineMessage) -> Result<()> {
        let compressor = {
            let map = self
                .compressors
                .lock()
                .map_err(|_| GradexError::LockPoisoned("compressors"))?;
            map.get(&msg.key).cloned()
        };

        let mut merged: Option<TensorView> = None;
        if let Some(compressor) = compressor {
            let mut compressor = compressor
                .lock()
                .map_err(|_| GradexError::LockPoisoned("compressor"))?;
            if msg.op == EngineOp::AllRecv {
                // Merge finished: compress the stored tensor and repoint
                // the merged view at the compressed bytes.
                let out = compressor.compress(msg.src)?;
                merged = Some(out);
            } else {
                // Worker payloads arrive compressed; decompress before the
                // copy/sum below.
                let clen = msg.compressed_len.unwrap_or(msg.len).min(msg.len);
                let dense = compressor.decompress(msg.src.truncated(clen))?;
                msg.src = dense;
                msg.len = dense.len();
                msg.dtype = dense.dtype();
                msg.mixed_precision = false;
            }
        } else if msg.op == EngineOp::AllRecv {
            if msg.mixed_precision {
                // Demote into the low-precision copy for transport.
                let mut fp16 = self
                    .fp16
                    .lock()
                    .map_err(|_| GradexError::LockPoisoned("fp16"))?;
                let lo = fp16
                    .get_mut(&msg.key)
                    .ok_or(GradexError::KeyNotInitialized { key: msg.key })?;
                let lo_len = lo.len();
                let stored = unsafe { msg.src.as_slice() };
                self.reducer
                    .copy_mixed_precision(lo.as_mut_slice(), stored, lo_len, false)?;
                merged = Some(lo.view(DataType::F16));
            } else {
                merged = Some(msg.dst);
            }
        }

        match msg.op {
            EngineOp::CopyFirst => {
                self.debug_trace(msg.key, "engine_copy_first", msg.dst, msg.src);
                let dst = unsafe { msg.dst.as_mut_slice() };
                let src = unsafe { msg.src.as_slice() };
                if msg.mixed_precision {
                    self.reducer.copy_mixed_precision(dst, src, msg.len, true)?;
                } else {
                    self.reducer.copy(dst, src, msg.len);
                }
            }
            EngineOp::SumRecv => {
                self.debug_trace(msg.key, "engine_sum_recv", msg.dst, msg.src);
                let dst = unsafe { msg.dst.as_mut_slice() };
                let src = unsafe { msg.src.as_slice() };
                if msg.mixed_precision {
                    self.reducer.sum_mixed_precision(dst, src, msg.len)?;
                } else {
                    self.reducer.sum(dst, src, msg.len, msg.dtype)?;
                }
            }
            EngineOp::AllRecv => {
                let merged = merged.unwrap_or(msg.dst);
                {
                    let mut update = self
                        .update
                        .lock()
                        .map_err(|_| GradexError::LockPoisoned("update"))?;
                    update.entry(msg.key).or_default().merged = Some(merged);
                }
                self.complete_all_recv(shard, msg.key, merged)?;
            }
            EngineOp::Terminate => {}
        }
        Ok(())
    }

    /// Barrier completion: mark the push finished and flush parked pulls,
    /// at most once per sender. Serving the N-th pull resets the key's
    /// completion-cycle state for the next step.
    fn complete_all_recv(&self, shard: usize, key: Key, merged: TensorView) -> Result<()> {
        let mut flags = self.flags[shard]
            .lock()
            .map_err(|_| GradexError::LockPoisoned("flags"))?;
        let entry = flags.entry(key).or_default();
        entry.push_finished = true;

        let parked = std::mem::take(&mut entry.parked);
        let mut kept = Vec::new();
        let mut cycle_done = false;
        for meta in parked {
            if cycle_done || entry.seen.contains(&meta.sender) {
                // Either next step's pulls or a duplicate sender; both wait.
                kept.push(meta);
                continue;
            }
            self.send_pull_response(key, &meta, merged)?;
            entry.pull_cnt += 1;
            entry.seen.insert(meta.sender);
            if entry.pull_cnt == self.num_workers {
                entry.reset();
                cycle_done = true;
            }
        }
        entry.parked = kept;
        Ok(())
    }

    fn debug_trace(&self, key: Key, stage: &str, dst: TensorView, src: TensorView) {
        if !self.cfg.debug || key != self.cfg.debug_key {
            return;
        }
        tracing::debug!(
            key,
            stage,
            dst = %preview(dst),
            src = %preview(src),
        );
    }
}

/// Short human-readable dump of the head of a tensor for debug tracing.
fn preview(view: TensorView) -> String {
    if view.is_null() {
        return "<null>".into();
    }
    let bytes = unsafe { view.as_slice() };
    if view.dtype() == DataType::F32 {
        let vals: Vec<String> = bytes
            .chunks_exact(4)
            .take(4)
            .map(|b| {
                f32::from_ne_bytes(b.try_into().expect("chunk of 4"))
                    .to_string()
            })
            .collect();
        format!("[{}…]", vals.join(", "))
    } else {
        let head: Vec<String> = bytes.iter().take(8).map(|b| format!("{b:02x}")).collect();
        format!("0x{}…", head.join(""))
    }
}
