use crate::api::{
    CommandReceipt, ConsensusQuery, Container2BcsIdHandle, ContainerDispatcher, DispatcherContext,
    DispatcherOp, Gid, HostProcess, LogEntry, PipelineObserver, RaftRole, StateMachineError,
    StateMachineOptions, StateMachineOptionsValidated, StreamDataChannel, TermIndex, Transaction,
    WriteChunkStage,
};
use crate::machine::applied::AppliedTracker;
use crate::machine::data_cache::StateMachineDataCache;
use crate::machine::executor::ExecutorPool;
use crate::machine::metrics::CsmMetrics;
use crate::machine::snapshot::SnapshotStorage;
use crate::machine::task_queue::TaskQueueMap;
use crate::machine::transaction::{decode_request, TransactionPipeline};
use crate::proto::{
    CmdType, ContainerCommandRequest, ContainerCommandResponse, ContainerResult, ReadChunkRequest,
};
use bytes::Bytes;
use std::collections::HashMap;
use std::convert::TryFrom;
use std::fmt;
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{oneshot, watch, Semaphore};
use tokio::time::Duration;

// Many groups can be closed by consensus at once; the host process must be
// terminated exactly once for all of them. Claimed with a CAS, never reset.
static TERMINATE_CLAIMED: AtomicBool = AtomicBool::new(false);

// Grace period before sampling group state and terminating the host, so
// sibling groups get a chance to finish closing.
const TERMINATE_SAMPLE_DELAY: Duration = Duration::from_secs(5);

/// Everything a state machine instance needs at group-add time.
pub struct ContainerStateMachineConfig {
    pub logger: slog::Logger,
    pub gid: Gid,
    pub dispatcher: Arc<dyn ContainerDispatcher>,
    pub consensus: Arc<dyn ConsensusQuery>,
    pub observer: Arc<dyn PipelineObserver>,
    /// Present when this instance may participate in host termination on a
    /// consensus-initiated shutdown.
    pub host: Option<Arc<dyn HostProcess>>,
    /// Chunk executors are shared across every group on the node so one
    /// block's chunks always land on the same executor.
    pub chunk_executors: Arc<ExecutorPool>,
    /// Directory for `snapshot.<term>_<index>` files.
    pub snapshot_dir: PathBuf,
    pub options: StateMachineOptions,
}

#[derive(Debug, thiserror::Error)]
pub enum CreationError {
    #[error("Illegal options for configuring state machine: {0}")]
    IllegalOptions(String),
    #[error("Snapshot storage initialization failure")]
    SnapshotStorage(#[from] io::Error),
}

/// A stream opened by `stream()`, to be completed by `link()`.
pub struct LocalStream {
    channel: Arc<dyn StreamDataChannel>,
}

impl LocalStream {
    pub fn channel(&self) -> &Arc<dyn StreamDataChannel> {
        &self.channel
    }
}

/// The replicated container state machine.
///
/// Sits between a Raft-style consensus engine (above) and the container
/// dispatcher (below). WriteChunk user data flows through the state-machine
/// side channel and `write`/`read`, never through the replicated log body;
/// all metadata commits flow through `apply_transaction` in strict
/// per-container order.
///
/// Two orderings are enforced:
/// 1. WriteChunk commit executes after CreateContainer on the same
///    container, and commits on one container execute in log order (the
///    per-container task queue).
/// 2. Within one block, chunk writes execute in log order (one executor per
///    block).
pub struct ContainerStateMachine {
    logger: slog::Logger,
    gid: Gid,
    dispatcher: Arc<dyn ContainerDispatcher>,
    consensus: Arc<dyn ConsensusQuery>,
    observer: Arc<dyn PipelineObserver>,
    host: Option<Arc<dyn HostProcess>>,
    pipeline: TransactionPipeline,
    container_ops: Arc<ExecutorPool>,
    chunk_executors: Arc<ExecutorPool>,
    container_task_queues: TaskQueueMap,
    container2bcsid: Container2BcsIdHandle,
    data_cache: Arc<StateMachineDataCache>,
    applied: Arc<AppliedTracker>,
    write_chunk_futures: Arc<Mutex<HashMap<u64, watch::Receiver<bool>>>>,
    apply_semaphore: Arc<Semaphore>,
    healthy: Arc<AtomicBool>,
    wait_on_all_followers: bool,
    snapshots: SnapshotStorage,
    metrics: Arc<CsmMetrics>,
}

impl ContainerStateMachine {
    /// Must be called from within a tokio runtime: the container-op
    /// executors are spawned here.
    pub fn new(config: ContainerStateMachineConfig) -> Result<Self, CreationError> {
        let options = StateMachineOptionsValidated::try_from(config.options)
            .map_err(|e| CreationError::IllegalOptions(e.to_string()))?;

        let logger = config.logger.new(slog::o!("gid" => config.gid.to_string()));
        let metrics = Arc::new(CsmMetrics::new());
        let snapshots = SnapshotStorage::open(logger.clone(), config.snapshot_dir)?;
        let container_ops = Arc::new(ExecutorPool::spawn(
            "ContainerOp",
            options.num_container_op_executors,
            &logger,
        ));
        let pipeline = TransactionPipeline::new(
            logger.clone(),
            config.gid,
            Arc::clone(&config.dispatcher),
            Arc::clone(&metrics),
        );
        let data_cache = Arc::new(StateMachineDataCache::new(
            options.leader_pending_bytes_limit,
            Arc::clone(&metrics),
        ));

        Ok(ContainerStateMachine {
            logger,
            gid: config.gid,
            dispatcher: config.dispatcher,
            consensus: config.consensus,
            observer: config.observer,
            host: config.host,
            pipeline,
            container_ops,
            chunk_executors: config.chunk_executors,
            container_task_queues: TaskQueueMap::new(),
            container2bcsid: Arc::new(Mutex::new(HashMap::new())),
            data_cache,
            applied: Arc::new(AppliedTracker::new()),
            write_chunk_futures: Arc::new(Mutex::new(HashMap::new())),
            apply_semaphore: Arc::new(Semaphore::new(options.max_pending_apply_txns)),
            healthy: Arc::new(AtomicBool::new(true)),
            wait_on_all_followers: options.wait_on_all_followers,
            snapshots,
            metrics,
        })
    }

    pub fn gid(&self) -> Gid {
        self.gid
    }

    pub fn metrics(&self) -> &CsmMetrics {
        &self.metrics
    }

    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Acquire)
    }

    pub fn last_applied(&self) -> Option<TermIndex> {
        self.applied.last_applied()
    }

    /// Announce this group and restore the latest snapshot, if one exists.
    pub async fn initialize(&self) -> Result<(), StateMachineError> {
        self.observer.notify_group_add(self.gid);

        let Some((term_index, path)) = self.snapshots.latest_snapshot()? else {
            slog::info!(self.logger, "No snapshot found; starting from an empty container index");
            return Ok(());
        };

        let loaded = self.snapshots.load(&path)?;
        slog::info!(
            self.logger,
            "Loaded snapshot at {} with {} containers; setting the last applied index",
            term_index,
            loaded.len()
        );

        {
            let mut map = self.lock_container_map();
            map.extend(loaded.iter().map(|(k, v)| (*k, *v)));
        }
        // The dispatcher rebuilds the missing-container set from the
        // restored index; missing containers get replicated back from peers.
        self.dispatcher
            .build_missing_container_set_and_validate(loaded)
            .await
            .map_err(StateMachineError::from)?;

        self.applied.force_set(term_index);
        Ok(())
    }

    /// Leader path: prepare a client request for replication.
    pub async fn start_transaction_for_client(&self, message: Bytes) -> Transaction {
        self.pipeline.start_transaction_for_client(message).await
    }

    /// Any-replica path: rebuild a transaction from a replicated log entry.
    pub fn start_transaction_for_log_entry(&self, entry: &LogEntry, _role: RaftRole) -> Transaction {
        self.pipeline.start_transaction_for_log_entry(entry)
    }

    /// Persist the state-machine data of `entry` (the WriteChunk payload)
    /// outside the replicated log. Returns immediately; the receipt resolves
    /// when the chunk hits local storage.
    pub fn write(&self, entry: &LogEntry, trx: &Transaction) -> CommandReceipt {
        self.metrics.inc_num_write_state_machine_ops();
        let (done_tx, done_rx) = oneshot::channel();

        let Some(context) = trx.context() else {
            self.metrics.inc_num_write_state_machine_fails();
            let _ = done_tx.send(Err(StateMachineError::Storage {
                result: ContainerResult::UnsupportedRequest,
                message: "transaction has no decoded request".to_string(),
            }));
            return done_rx;
        };
        let request = context.request.clone();
        let cmd_type = request.cmd_type();

        // Only WriteChunk carries state machine data. CreateContainer
        // happens as a part of WriteChunk commit.
        if cmd_type != CmdType::WriteChunk {
            self.metrics.inc_num_write_state_machine_fails();
            let _ = done_tx.send(Err(StateMachineError::NoStateMachineData(cmd_type)));
            return done_rx;
        }
        let Some(write) = request.write_chunk.as_ref() else {
            self.metrics.inc_num_write_state_machine_fails();
            let _ = done_tx.send(Err(StateMachineError::NoStateMachineData(cmd_type)));
            return done_rx;
        };
        let local_id = write.block_id.as_ref().map(|b| b.local_id).unwrap_or(0);
        let chunk_len = write.chunk_data.as_ref().map(|c| c.len).unwrap_or(0);

        if self.consensus.is_leader(&self.gid) {
            self.data_cache.put(entry.index, write.data.clone());
        }

        let dctx = DispatcherContext::new(DispatcherOp::WriteStateMachineData)
            .with_stage(WriteChunkStage::WriteData)
            .with_term_index(entry.term, entry.index)
            .with_container2bcsid(Arc::clone(&self.container2bcsid));

        let (flag_tx, flag_rx) = watch::channel(false);
        self.lock_write_futures().insert(entry.index, flag_rx);

        let dispatcher = Arc::clone(&self.dispatcher);
        let metrics = Arc::clone(&self.metrics);
        let healthy = Arc::clone(&self.healthy);
        let write_chunk_futures = Arc::clone(&self.write_chunk_futures);
        let logger = self.logger.clone();
        let index = entry.index;

        slog::debug!(logger, "writeStateMachineData: blockId={} logIndex={}", local_id, index);
        let submitted = self.chunk_executors.submit_for(local_id, async move {
            let response = dispatcher.dispatch(request, Some(dctx)).await;
            if is_tolerated_result(response.result()) {
                metrics.add_bytes_written(chunk_len);
                let _ = done_tx.send(Ok(response));
            } else {
                slog::error!(
                    logger,
                    "writeStateMachineData failed: blockId={} logIndex={} result={:?} message={}",
                    local_id,
                    index,
                    response.result(),
                    response.message
                );
                metrics.inc_num_write_data_fails();
                // A failed payload write compromises durability; the
                // pipeline gets closed rather than limping along.
                healthy.store(false, Ordering::Release);
                let _ = done_tx.send(Err(StateMachineError::from_response(&response)));
            }

            write_chunk_futures
                .lock()
                .expect("write_chunk_futures mutex guard poison")
                .remove(&index);
            let _ = flag_tx.send(true);
        });

        if submitted.is_err() {
            self.metrics.inc_num_write_state_machine_fails();
            self.lock_write_futures().remove(&entry.index);
            // done_tx went down with the rejected job; the receipt resolves
            // as closed, which callers read as shutdown.
        }
        done_rx
    }

    /// Wait for every in-flight state-machine-data write at or below
    /// `up_to`. Consensus calls this before advancing the durable log
    /// watermark, so an acknowledged commit implies payload durability.
    pub async fn flush(&self, up_to: u64) {
        let waiters: Vec<watch::Receiver<bool>> = {
            let map = self.lock_write_futures();
            map.iter()
                .filter(|(index, _)| **index <= up_to)
                .map(|(_, rx)| rx.clone())
                .collect()
        };
        for mut waiter in waiters {
            // A dropped sender means the write already finished (or its
            // executor shut down); either way there is nothing to wait for.
            let _ = waiter.wait_for(|done| *done).await;
        }
    }

    /// Supply the state-machine data for `entry`, for consensus to append
    /// to a follower that is catching up. Served from the transaction's
    /// side channel, then the cache, then a disk re-read.
    pub async fn read(
        &self,
        entry: &LogEntry,
        trx: Option<&Transaction>,
    ) -> Result<Bytes, StateMachineError> {
        self.metrics.inc_num_read_state_machine_ops();

        if let Some(data) = trx.and_then(|t| t.state_machine_data()) {
            if !data.is_empty() {
                return Ok(data.clone());
            }
        }

        if let Some(data) = self.data_cache.get(entry.index) {
            self.metrics.inc_num_data_cache_hit();
            return Ok(data);
        }
        self.metrics.inc_num_data_cache_miss();

        let log_request = match trx.and_then(|t| t.context()) {
            Some(context) => context.log.clone(),
            None => decode_request(self.gid, &entry.log_data).map_err(|e| {
                self.metrics.inc_num_read_state_machine_fails();
                slog::error!(self.logger, "Unable to read state machine data: {}", e);
                StateMachineError::from(e)
            })?,
        };

        if log_request.cmd_type() != CmdType::WriteChunk {
            self.metrics.inc_num_read_state_machine_fails();
            return Err(StateMachineError::NoStateMachineData(log_request.cmd_type()));
        }

        self.read_state_machine_data(log_request, entry.term, entry.index)
            .await
    }

    /// Disk fallback for `read`: synthesize a ReadChunk from the log view
    /// and dispatch it on the block's chunk executor.
    async fn read_state_machine_data(
        &self,
        log_request: ContainerCommandRequest,
        term: u64,
        index: u64,
    ) -> Result<Bytes, StateMachineError> {
        self.metrics.inc_num_read_state_machine_miss();

        let write = log_request
            .write_chunk
            .clone()
            .ok_or(StateMachineError::NoStateMachineData(CmdType::WriteChunk))?;
        let chunk = write.chunk_data.clone().unwrap_or_default();
        let local_id = write.block_id.as_ref().map(|b| b.local_id).unwrap_or(0);

        let read_request = ContainerCommandRequest {
            cmd_type: CmdType::ReadChunk as i32,
            container_id: log_request.container_id,
            pipeline_id: log_request.pipeline_id.clone(),
            trace_id: log_request.trace_id.clone(),
            read_chunk: Some(ReadChunkRequest {
                block_id: write.block_id,
                chunk_data: Some(chunk.clone()),
                read_chunk_version: 1,
            }),
            ..Default::default()
        };
        let dctx = DispatcherContext::new(DispatcherOp::ReadStateMachineData)
            .with_term_index(term, index);

        let (response_tx, response_rx) = oneshot::channel();
        let dispatcher = Arc::clone(&self.dispatcher);
        let submitted = self.chunk_executors.submit_for(local_id, async move {
            let response = dispatcher.dispatch(read_request, Some(dctx)).await;
            let _ = response_tx.send(response);
        });
        if submitted.is_err() {
            self.metrics.inc_num_read_state_machine_fails();
            return Err(StateMachineError::Shutdown);
        }

        let response = response_rx.await.map_err(|_| {
            self.metrics.inc_num_read_state_machine_fails();
            StateMachineError::Shutdown
        })?;

        if response.result() != ContainerResult::Success {
            slog::error!(
                self.logger,
                "ReadStateMachine failed: logIndex={} result={:?} message={}",
                index,
                response.result(),
                response.message
            );
            self.metrics.inc_num_read_state_machine_fails();
            self.healthy.store(false, Ordering::Release);
            return Err(StateMachineError::from_response(&response));
        }

        let data = response
            .read_chunk
            .map(|r| r.data)
            .unwrap_or_default();
        if data.len() as u64 != chunk.len {
            self.metrics.inc_num_read_state_machine_fails();
            return Err(StateMachineError::ChunkLengthMismatch {
                expected: chunk.len,
                actual: data.len() as u64,
            });
        }
        Ok(data)
    }

    /// Commit the metadata of `entry`. Admission is bounded by the apply
    /// semaphore: this method suspends when too many applies are already in
    /// flight, which is the intended backpressure on the consensus applier.
    pub async fn apply_transaction(
        &self,
        entry: &LogEntry,
        role: RaftRole,
        trx: &Transaction,
    ) -> CommandReceipt {
        let index = entry.index;
        let term = entry.term;
        let (done_tx, done_rx) = oneshot::channel();

        // Strict mode: trim to what every follower has consumed. Slow
        // followers keep payloads cached, which backpressures admission
        // instead of forcing disk re-reads.
        self.trim_cache_for_followers(index);
        if !self.wait_on_all_followers {
            self.data_cache.remove_up_to(index);
        }

        let Some(context) = trx.context() else {
            // An undecodable committed entry is a local fatal: this replica
            // cannot apply what the quorum agreed on.
            self.metrics.inc_num_apply_transaction_fails();
            let _ = self
                .healthy
                .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire);
            self.observer.handle_apply_transaction_failure(self.gid, role);
            let _ = done_tx.send(Err(StateMachineError::Storage {
                result: ContainerResult::UnsupportedRequest,
                message: "committed entry could not be decoded".to_string(),
            }));
            return done_rx;
        };

        // Apply uses the log view; for WriteChunk the user data must not be
        // present here.
        let request = context.log.clone();
        let cmd_type = request.cmd_type();
        debug_assert!(
            cmd_type != CmdType::WriteChunk
                || request
                    .write_chunk
                    .as_ref()
                    .map(|w| w.data.is_empty())
                    .unwrap_or(true),
            "WriteChunk apply must not carry user data"
        );

        let mut dctx = DispatcherContext::new(DispatcherOp::ApplyTransaction)
            .with_term_index(term, index);
        if cmd_type == CmdType::WriteChunk {
            dctx = dctx.with_stage(WriteChunkStage::CommitData);
        }
        if matches!(
            cmd_type,
            CmdType::WriteChunk
                | CmdType::PutSmallFile
                | CmdType::PutBlock
                | CmdType::CreateContainer
                | CmdType::StreamInit
        ) {
            dctx = dctx.with_container2bcsid(Arc::clone(&self.container2bcsid));
        }

        let committed_len = match cmd_type {
            CmdType::WriteChunk => request
                .write_chunk
                .as_ref()
                .and_then(|w| w.chunk_data.as_ref())
                .map(|c| c.len)
                .unwrap_or(0),
            CmdType::PutSmallFile => request
                .put_small_file
                .as_ref()
                .and_then(|p| p.chunk_info.as_ref())
                .map(|c| c.len)
                .unwrap_or(0),
            _ => 0,
        };

        let permit = match Arc::clone(&self.apply_semaphore).acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => {
                self.metrics.inc_num_apply_transaction_fails();
                let _ = done_tx.send(Err(StateMachineError::Shutdown));
                return done_rx;
            }
        };
        self.metrics.inc_num_apply_transaction_ops();

        let dispatcher = Arc::clone(&self.dispatcher);
        let container_id = request.container_id;
        let queue_rx = self.container_task_queues.submit(
            container_id,
            async move { Ok(dispatcher.dispatch(request, Some(dctx)).await) },
            &self.container_ops,
        );

        let logger = self.logger.clone();
        let gid = self.gid;
        let metrics = Arc::clone(&self.metrics);
        let applied = Arc::clone(&self.applied);
        let healthy = Arc::clone(&self.healthy);
        let observer = Arc::clone(&self.observer);
        let start_time = context.start_time;

        // Completion runs on its own task so the consensus applier thread
        // is never borrowed for result handling.
        tokio::spawn(async move {
            let outcome = match queue_rx.await {
                Ok(outcome) => outcome,
                Err(_) => Err(StateMachineError::Shutdown),
            };

            match outcome {
                Ok(response) if is_tolerated_result(response.result()) => {
                    slog::debug!(
                        logger,
                        "ApplyTransaction completed: cmd={:?} logIndex={} result={:?}",
                        cmd_type,
                        index,
                        response.result()
                    );
                    if response.result() == ContainerResult::Success && committed_len > 0 {
                        metrics.add_bytes_committed(committed_len);
                    }
                    let healthy_now = healthy.load(Ordering::Acquire);
                    let _ = done_tx.send(Ok(response));
                    // Only a healthy machine may advance the watermark: a
                    // prior fatal failure means later indices must never be
                    // treated as applied.
                    if healthy_now {
                        applied.note_completed(index, term);
                    }
                }
                Ok(response) => {
                    slog::error!(
                        logger,
                        "ApplyTransaction failed: cmd={:?} logIndex={} result={:?} message={}",
                        cmd_type,
                        index,
                        response.result(),
                        response.message
                    );
                    metrics.inc_num_apply_transaction_fails();
                    let _ = healthy.compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire);
                    let _ = done_tx.send(Err(StateMachineError::from_response(&response)));
                    observer.handle_apply_transaction_failure(gid, role);
                }
                Err(e) => {
                    slog::error!(
                        logger,
                        "ApplyTransaction failed locally: cmd={:?} logIndex={}: {}",
                        cmd_type,
                        index,
                        e
                    );
                    metrics.inc_num_apply_transaction_fails();
                    let _ = healthy.compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire);
                    let _ = done_tx.send(Err(e));
                    observer.handle_apply_transaction_failure(gid, role);
                }
            }

            if role == RaftRole::Leader {
                metrics.record_apply_transaction_ns(start_time.elapsed().as_nanos() as u64);
                metrics.dec_pending_apply_transactions();
            }
            drop(permit);
        });

        done_rx
    }

    /// Serve a read-only command. Never enters the log.
    pub async fn query(&self, message: Bytes) -> Result<ContainerCommandResponse, StateMachineError> {
        self.metrics.inc_num_query_state_machine_ops();
        let request = decode_request(self.gid, &message).map_err(|e| {
            self.metrics.inc_num_query_state_machine_fails();
            StateMachineError::from(e)
        })?;
        Ok(self.dispatcher.dispatch(request, None).await)
    }

    /// Persist the container -> BCSID index at the last applied (term,
    /// index). Returns `None` when nothing has been applied yet. Refused
    /// while unhealthy: a snapshot must never mask an un-applied suffix.
    pub fn take_snapshot(&self) -> Result<Option<u64>, StateMachineError> {
        let term_index = self.applied.last_applied();
        if !self.is_healthy() {
            slog::error!(
                self.logger,
                "Failed to take snapshot as the state machine is unhealthy; last applied is {:?}",
                term_index
            );
            return Err(StateMachineError::Unhealthy);
        }
        let Some(term_index) = term_index else {
            return Ok(None);
        };

        // Holding the map lock for the duration of serialization defers any
        // concurrent DeleteContainer apply past the serialization point.
        let map = self.lock_container_map();
        self.snapshots.save(term_index, &map)?;
        Ok(Some(term_index.index))
    }

    /// Open a data channel for the streaming bulk-write path.
    pub async fn stream(&self, message: Bytes) -> Result<LocalStream, StateMachineError> {
        let request = decode_request(self.gid, &message)?;
        let dctx = DispatcherContext::new(DispatcherOp::StreamInit)
            .with_stage(WriteChunkStage::WriteData)
            .with_container2bcsid(Arc::clone(&self.container2bcsid));

        let (init_tx, init_rx) = oneshot::channel();
        let dispatcher = Arc::clone(&self.dispatcher);
        let init_request = request.clone();
        self.container_ops
            .submit_for(request.container_id, async move {
                let response = dispatcher.dispatch(init_request, Some(dctx)).await;
                let _ = init_tx.send(response);
            })
            .map_err(|_| StateMachineError::Shutdown)?;
        let init_response = init_rx.await.map_err(|_| StateMachineError::Shutdown)?;
        if init_response.result() != ContainerResult::Success {
            slog::debug!(
                self.logger,
                "Stream init reported {:?}: {}",
                init_response.result(),
                init_response.message
            );
        }

        let channel = self
            .dispatcher
            .get_stream_data_channel(&request)
            .await
            .map_err(StateMachineError::from)?;
        Ok(LocalStream { channel })
    }

    /// Commit a finished stream into the log at `entry`. The channel must
    /// already be closed by the writer; on any failure the channel's staged
    /// data is cleaned up and the receipt fails.
    pub fn link(&self, stream: Option<&LocalStream>, entry: &LogEntry) -> CommandReceipt {
        let (done_tx, done_rx) = oneshot::channel();

        let Some(stream) = stream else {
            let _ = done_tx.send(Err(StateMachineError::Stream("stream is not present".to_string())));
            return done_rx;
        };
        let channel = Arc::clone(&stream.channel);
        if channel.is_open() {
            let _ = done_tx.send(Err(StateMachineError::Stream(
                "stream is not closed properly".to_string(),
            )));
            return done_rx;
        }
        let Some(put_block) = channel.put_block_request() else {
            let _ = done_tx.send(Err(StateMachineError::Stream(
                "no PutBlock request buffered on the stream".to_string(),
            )));
            return done_rx;
        };

        let dctx = DispatcherContext::new(DispatcherOp::StreamLink)
            .with_stage(WriteChunkStage::CommitData)
            .with_term_index(entry.term, entry.index)
            .with_container2bcsid(Arc::clone(&self.container2bcsid));

        let dispatcher = Arc::clone(&self.dispatcher);
        let logger = self.logger.clone();
        let term_index = entry.term_index();
        let container_id = put_block.container_id;
        let _ = self.container_ops.submit_for(container_id, async move {
            let response = dispatcher.dispatch(put_block, Some(dctx)).await;
            if response.result() == ContainerResult::Success {
                channel.set_linked();
                let _ = done_tx.send(Ok(response));
            } else {
                slog::warn!(
                    logger,
                    "Failed to link log entry {}: {:?} {}",
                    term_index,
                    response.result(),
                    response.message
                );
                channel.clean_up().await;
                let _ = done_tx.send(Err(StateMachineError::from_response(&response)));
            }
        });

        done_rx
    }

    /// Consensus applied an entry with no state machine content (conf
    /// change, metadata). Feed it through the completion map so the
    /// watermark can advance across it.
    pub fn notify_term_index_updated(&self, term: u64, index: u64) {
        self.applied.note_completed(index, term);
        self.trim_cache_for_followers(index);
    }

    /// The leader stepped down; its cache no longer serves follower reads.
    pub fn notify_not_leader(&self) {
        self.data_cache.clear();
    }

    /// The log was truncated at `index`; drop cached payloads past it.
    pub fn truncate(&self, index: u64) {
        self.data_cache.remove_above(index);
    }

    pub fn notify_leader_changed(&self, new_leader_id: String) {
        self.observer.handle_leader_changed(self.gid, new_leader_id);
    }

    pub fn notify_follower_slowness(&self) {
        self.observer.handle_node_slowness(self.gid);
    }

    pub fn notify_extended_no_leader(&self) {
        self.observer.handle_no_leader(self.gid);
    }

    pub fn notify_log_failed(&self, error: impl fmt::Display, failed_entry: &LogEntry) {
        let description = self.pipeline.describe_log_entry(failed_entry);
        slog::error!(
            self.logger,
            "Log failed at {}: {} ({})",
            failed_entry.term_index(),
            error,
            description
        );
        self.observer.handle_node_log_failure(self.gid, description);
    }

    pub fn notify_install_snapshot_from_leader(&self, first_term_index: TermIndex) -> TermIndex {
        self.observer
            .handle_install_snapshot_from_leader(self.gid, first_term_index);
        first_term_index
    }

    /// Best-effort quasi-close of every container in the group on removal.
    /// Containers already in a terminal state are unaffected.
    pub async fn notify_group_remove(&self) {
        self.observer.notify_group_remove(self.gid);

        let container_ids: Vec<i64> = self.lock_container_map().keys().copied().collect();
        for container_id in container_ids {
            let closed = async {
                self.dispatcher.mark_container_for_close(container_id).await?;
                self.dispatcher
                    .quasi_close_container(container_id, "replication group removed")
                    .await
            }
            .await;
            if closed.is_err() {
                slog::debug!(self.logger, "Failed to quasi-close container {}", container_id);
            }
        }
    }

    /// Consensus shut this group down. When the whole server is going away
    /// and the host process has not initiated it, schedule a single-shot
    /// host terminate after sampling how many groups already closed.
    pub fn notify_server_shutdown(&self, all_server: bool) {
        if !all_server {
            return;
        }
        let Some(host) = &self.host else {
            return;
        };
        if host.is_stopped() {
            slog::info!(self.logger, "Group is closed by the host process");
            return;
        }

        slog::info!(self.logger, "Group is closed by consensus");
        if TERMINATE_CLAIMED
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            let host = Arc::clone(host);
            let consensus = Arc::clone(&self.consensus);
            let logger = self.logger.clone();
            tokio::spawn(async move {
                tokio::time::sleep(TERMINATE_SAMPLE_DELAY).await;
                let closed = consensus.closed_group_count();
                let total = consensus.group_count();
                slog::error!(
                    logger,
                    "State machine closed by consensus, terminating host process. closed({})/total({})",
                    closed,
                    total
                );
                host.terminate();
            });
        }
    }

    /// Tear down this instance: clear the cache, stop accepting work on the
    /// container-op pool, and fail pending apply admissions. Outstanding
    /// chunk writes on the shared executors are allowed to complete; their
    /// results are discarded with the dropped receipts.
    pub fn close(&self) {
        self.data_cache.clear();
        self.container_ops.close();
        self.apply_semaphore.close();
    }

    fn trim_cache_for_followers(&self, index: u64) {
        if !self.wait_on_all_followers {
            return;
        }
        if let Some(next_indices) = self.consensus.follower_next_indices(&self.gid) {
            if let Some(min_next) = next_indices.iter().min().copied() {
                slog::debug!(
                    self.logger,
                    "Removing cached data up to min(follower next {}, applied {})",
                    min_next,
                    index
                );
                self.data_cache.remove_up_to(min_next.min(index));
            }
        }
    }

    fn lock_container_map(&self) -> std::sync::MutexGuard<'_, HashMap<i64, i64>> {
        self.container2bcsid
            .lock()
            .expect("container2bcsid mutex guard poison")
    }

    fn lock_write_futures(&self) -> std::sync::MutexGuard<'_, HashMap<u64, watch::Receiver<bool>>> {
        self.write_chunk_futures
            .lock()
            .expect("write_chunk_futures mutex guard poison")
    }

    /// Snapshot of the container -> BCSID index, for inspection.
    pub fn container_index(&self) -> HashMap<i64, i64> {
        self.lock_container_map().clone()
    }
}

/// Result codes that reflect expected races with container close rather
/// than durability failures. Anything else marks the machine unhealthy.
pub(crate) fn is_tolerated_result(result: ContainerResult) -> bool {
    matches!(
        result,
        ContainerResult::Success
            | ContainerResult::ContainerNotOpen
            | ContainerResult::ClosedContainerIo
            | ContainerResult::ChunkFileInconsistency
    )
}
