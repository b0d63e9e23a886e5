//! Push/pull request handler: the per-key lifecycle state machine.
//!
//! Lifecycle per key: uninitialized → initialized (N init pushes seen) →
//! push-in-progress → merged → drained, then back to initialized for the
//! next step. The handler classifies each transport callback, mutates
//! per-key state under its own mutex, and hands tensor work to the engine
//! (or runs it inline in blocking mode).

use crate::compression::{deserialize_kwargs, registry};
use crate::engine::{EngineMessage, EngineOp};
use crate::error::{GradexError, Result};
use crate::kv::{KvPairs, RequestMeta};
use crate::memory::AlignedBuf;
use crate::types::{unpack_cmd, DataType, Key, RequestType, TensorView};

use super::store::StoredBuffer;
use super::ServerInner;

impl ServerInner {
    pub(crate) fn handle(&self, meta: RequestMeta, data: KvPairs) -> Result<()> {
        let _serialized = self
            .handle_mu
            .lock()
            .map_err(|_| GradexError::LockPoisoned("handle"))?;

        let (request_type, dtype) =
            unpack_cmd(meta.cmd).ok_or(GradexError::BadCommand(meta.cmd))?;
        if data.keys.len() != 1 {
            return Err(GradexError::InvalidRequest("exactly one key per request"));
        }
        let key = data.keys[0];

        if self.cfg.key_log {
            if meta.push {
                tracing::info!(
                    key,
                    sender = meta.sender,
                    size = data.lens.first().copied().unwrap_or(0),
                    "push"
                );
            } else {
                tracing::info!(key, sender = meta.sender, "pull");
            }
        }

        match request_type {
            RequestType::Config => self.handle_config(key, &meta, &data),
            RequestType::Default | RequestType::Compressed => {
                self.handle_default(key, dtype, &meta, &data)
            }
            RequestType::RowSparse => Err(GradexError::Unimplemented("row-sparse push/pull")),
        }
    }

    /// Compressor registration. Idempotent per key: the first config push
    /// constructs and installs the chain; the rest only join the ack
    /// barrier.
    fn handle_config(&self, key: Key, meta: &RequestMeta, data: &KvPairs) -> Result<()> {
        let installed = self
            .compressors
            .lock()
            .map_err(|_| GradexError::LockPoisoned("compressors"))?
            .contains_key(&key);
        if !installed {
            let blob_len = *data
                .lens
                .first()
                .ok_or(GradexError::InvalidRequest("config push carries no length"))?;
            let blob = data
                .vals
                .get(..blob_len)
                .ok_or(GradexError::InvalidRequest("config payload shorter than declared"))?;
            let content = std::str::from_utf8(blob)
                .map_err(|_| GradexError::MalformedKwargs("kwargs blob is not ASCII".into()))?;
            let kwargs = deserialize_kwargs(content)?;

            let (size, dtype) = {
                let store = self
                    .store
                    .lock()
                    .map_err(|_| GradexError::LockPoisoned("store"))?;
                let stored = store
                    .get(&key)
                    .ok_or(GradexError::KeyNotInitialized { key })?;
                (stored.len(), stored.dtype)
            };
            let compressor = registry::create(&kwargs, size, dtype)?;
            self.compressors
                .lock()
                .map_err(|_| GradexError::LockPoisoned("compressors"))?
                .insert(key, std::sync::Arc::new(std::sync::Mutex::new(compressor)));
            if self.cfg.key_log {
                tracing::info!(key, "compressor registered");
            }
        }

        let acked = {
            let mut update = self
                .update
                .lock()
                .map_err(|_| GradexError::LockPoisoned("update"))?;
            let state = update.entry(key).or_default();
            state.pending.push(meta.clone());
            if (state.pending.len() as u32) < self.num_workers {
                return Ok(());
            }
            std::mem::take(&mut state.pending)
        };
        for req in &acked {
            self.send_push_response(req);
        }
        Ok(())
    }

    fn handle_default(
        &self,
        key: Key,
        dtype: DataType,
        meta: &RequestMeta,
        data: &KvPairs,
    ) -> Result<()> {
        if meta.push {
            let len = *data
                .lens
                .first()
                .ok_or(GradexError::InvalidRequest("push carries no length"))?;
            if data.vals.len() < len {
                return Err(GradexError::InvalidRequest(
                    "value buffer shorter than declared length",
                ));
            }
            let initialized = self
                .store
                .lock()
                .map_err(|_| GradexError::LockPoisoned("store"))?
                .contains_key(&key);
            if initialized {
                self.handle_push(key, dtype, len, meta, data)
            } else {
                self.handle_init(key, dtype, len, meta)
            }
        } else {
            self.handle_pull(key, meta)
        }
    }

    /// Collect N init pushes, then allocate the stored buffer (and the
    /// low-precision copy for f16 keys, promoting the reduction dtype to
    /// f32) and ack every init push.
    fn handle_init(&self, key: Key, dtype: DataType, len: usize, meta: &RequestMeta) -> Result<()> {
        let acked = {
            let mut update = self
                .update
                .lock()
                .map_err(|_| GradexError::LockPoisoned("update"))?;
            let state = update.entry(key).or_default();
            state.pending.push(meta.clone());
            if (state.pending.len() as u32) < self.num_workers {
                return Ok(());
            }
            std::mem::take(&mut state.pending)
        };

        let mixed = dtype == DataType::F16;
        if self.cfg.key_log {
            tracing::info!(
                key,
                requests = acked.len(),
                size = len,
                mixed,
                "collected all init pushes, allocating store"
            );
        }

        if mixed {
            let mut fp16 = self
                .fp16
                .lock()
                .map_err(|_| GradexError::LockPoisoned("fp16"))?;
            if !fp16.contains_key(&key) {
                fp16.insert(key, AlignedBuf::new_zeroed(len)?);
            }
        }
        // Mixed-precision keys reduce in f32: the store holds the promotion.
        let (store_len, store_dtype) = if mixed {
            (len * 2, DataType::F32)
        } else {
            (len, dtype)
        };
        {
            let mut store = self
                .store
                .lock()
                .map_err(|_| GradexError::LockPoisoned("store"))?;
            store.insert(
                key,
                StoredBuffer {
                    data: AlignedBuf::new_zeroed(store_len)?,
                    dtype: store_dtype,
                },
            );
        }

        for req in &acked {
            self.send_push_response(req);
        }
        Ok(())
    }

    fn handle_push(
        &self,
        key: Key,
        dtype: DataType,
        len: usize,
        meta: &RequestMeta,
        data: &KvPairs,
    ) -> Result<()> {
        let mixed = dtype == DataType::F16;
        let (stored_view, stored_len, stored_dtype) = self.stored_info(key)?;

        let has_compressor = self
            .compressors
            .lock()
            .map_err(|_| GradexError::LockPoisoned("compressors"))?
            .contains_key(&key);
        let mut workload = stored_len as f32;
        if has_compressor {
            workload *= self.cfg.lb_factor;
        }
        let shard = self.shard_for(key, workload as u64)?;

        let payload = data.vals.slice(..len);
        let src_view = TensorView::of_slice(&payload, dtype);

        let first = {
            let update = self
                .update
                .lock()
                .map_err(|_| GradexError::LockPoisoned("update"))?;
            update.get(&key).map_or(true, |u| u.pending.is_empty())
        };

        if first {
            if !self.cfg.sync_mode {
                // Async: accumulate straight into the store, no barrier.
                let dst = unsafe { stored_view.as_mut_slice() };
                if mixed {
                    self.reducer.sum_mixed_precision(dst, &payload, len)?;
                } else {
                    self.reducer.sum(dst, &payload, len, stored_dtype)?;
                }
            } else if self.cfg.engine_blocking {
                self.debug_trace(key, "copy_first_blocking", stored_view, src_view);
                let dst = unsafe { stored_view.as_mut_slice() };
                if mixed {
                    self.reducer.copy_mixed_precision(dst, &payload, len, true)?;
                } else {
                    self.reducer.copy(dst, &payload, len);
                }
            } else {
                self.debug_trace(key, "copy_first", stored_view, src_view);
                self.queues[shard].push(EngineMessage {
                    id: self.next_id(),
                    key,
                    dtype,
                    dst: stored_view,
                    src: src_view,
                    len,
                    op: EngineOp::CopyFirst,
                    req: meta.clone(),
                    guard: Some(payload.clone()),
                    compressed_len: data.lens.first().copied(),
                    mixed_precision: mixed,
                });
            }
        } else {
            // Later contributions only exist under the sync barrier.
            debug_assert!(self.cfg.sync_mode);
            if self.cfg.engine_blocking {
                self.debug_trace(key, "sum_recv_blocking", stored_view, src_view);
                let dst = unsafe { stored_view.as_mut_slice() };
                if mixed {
                    self.reducer.sum_mixed_precision(dst, &payload, len)?;
                } else {
                    self.reducer.sum(dst, &payload, len, stored_dtype)?;
                }
            } else {
                self.debug_trace(key, "sum_recv", stored_view, src_view);
                self.queues[shard].push(EngineMessage {
                    id: self.next_id(),
                    key,
                    dtype,
                    dst: stored_view,
                    src: src_view,
                    len,
                    op: EngineOp::SumRecv,
                    req: meta.clone(),
                    guard: Some(payload.clone()),
                    compressed_len: data.lens.first().copied(),
                    mixed_precision: mixed,
                });
            }
        }

        let sealed = {
            let mut update = self
                .update
                .lock()
                .map_err(|_| GradexError::LockPoisoned("update"))?;
            let state = update.entry(key).or_default();
            state.pending.push(meta.clone());
            if self.cfg.sync_mode && state.pending.len() as u32 == self.num_workers {
                state.pending.clear();
                true
            } else {
                if !self.cfg.sync_mode {
                    state.pending.clear();
                }
                false
            }
        };
        self.send_push_response(meta);

        if sealed {
            self.debug_trace(key, "all_recv", stored_view, src_view);
            if self.cfg.engine_blocking {
                // Inline engines serve pulls straight from the store; just
                // record the merged view.
                let mut update = self
                    .update
                    .lock()
                    .map_err(|_| GradexError::LockPoisoned("update"))?;
                update.entry(key).or_default().merged = Some(stored_view);
            } else {
                self.queues[shard].push(EngineMessage {
                    id: self.next_id(),
                    key,
                    dtype: stored_dtype,
                    dst: stored_view,
                    src: stored_view,
                    len: stored_len,
                    op: EngineOp::AllRecv,
                    req: meta.clone(),
                    guard: None,
                    compressed_len: None,
                    mixed_precision: mixed,
                });
                self.queues[shard].clear_counter(key);
            }
        }
        Ok(())
    }

    /// Pull: answer immediately in async/blocking mode, or when this step's
    /// merge already completed and this sender has not been served; park on
    /// the shard otherwise.
    fn handle_pull(&self, key: Key, meta: &RequestMeta) -> Result<()> {
        let (stored_view, _, _) = self.stored_info(key)?;
        if self.cfg.engine_blocking || !self.cfg.sync_mode {
            return self.send_pull_response(key, meta, stored_view);
        }

        let shard = self.shard_for(key, 0)?;
        let mut flags = self.flags[shard]
            .lock()
            .map_err(|_| GradexError::LockPoisoned("flags"))?;
        let entry = flags.entry(key).or_default();
        if entry.push_finished && !entry.seen.contains(&meta.sender) {
            // Read the merged view only after observing the finished flag;
            // the engine publishes it before raising the flag.
            let merged = {
                let update = self
                    .update
                    .lock()
                    .map_err(|_| GradexError::LockPoisoned("update"))?;
                update.get(&key).and_then(|u| u.merged)
            }
            .ok_or(GradexError::KeyNotInitialized { key })?;
            self.send_pull_response(key, meta, merged)?;
            entry.pull_cnt += 1;
            entry.seen.insert(meta.sender);
            if entry.pull_cnt == self.num_workers {
                entry.reset();
            }
        } else {
            entry.parked.push(meta.clone());
        }
        Ok(())
    }

    fn stored_info(&self, key: Key) -> Result<(TensorView, usize, DataType)> {
        let store = self
            .store
            .lock()
            .map_err(|_| GradexError::LockPoisoned("store"))?;
        let stored = store
            .get(&key)
            .ok_or(GradexError::KeyNotInitialized { key })?;
        Ok((stored.view(), stored.len(), stored.dtype))
    }
}
