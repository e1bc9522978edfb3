use crate::proto::{ContainerCommandRequest, ContainerCommandResponse, ContainerResult};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Which state-machine entry point produced a dispatch.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum DispatcherOp {
    ApplyTransaction,
    WriteStateMachineData,
    ReadStateMachineData,
    StreamInit,
    StreamLink,
}

/// WriteChunk is split into two dispatcher calls: the payload write that
/// happens when consensus persists the entry, and the metadata commit that
/// happens at apply time.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum WriteChunkStage {
    WriteData,
    CommitData,
}

/// Shared handle to the group's container -> BCSID index. The dispatcher
/// updates it when committing metadata; the state machine serializes it into
/// snapshots. Serialization locks the map, so DeleteContainer processing is
/// deferred past the serialization point instead of racing it.
pub type Container2BcsIdHandle = Arc<Mutex<HashMap<i64, i64>>>;

/// Execution context handed to the dispatcher alongside a request.
#[derive(Clone)]
pub struct DispatcherContext {
    pub op: DispatcherOp,
    pub stage: Option<WriteChunkStage>,
    pub term: u64,
    pub log_index: u64,
    pub container2bcsid: Option<Container2BcsIdHandle>,
}

impl DispatcherContext {
    pub fn new(op: DispatcherOp) -> Self {
        DispatcherContext {
            op,
            stage: None,
            term: 0,
            log_index: 0,
            container2bcsid: None,
        }
    }

    pub fn with_stage(mut self, stage: WriteChunkStage) -> Self {
        self.stage = Some(stage);
        self
    }

    pub fn with_term_index(mut self, term: u64, log_index: u64) -> Self {
        self.term = term;
        self.log_index = log_index;
        self
    }

    pub fn with_container2bcsid(mut self, map: Container2BcsIdHandle) -> Self {
        self.container2bcsid = Some(map);
        self
    }
}

/// Pre-replication validation failure. `ContainerNotOpen` is split out
/// because the state machine accounts for it separately.
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("container {0} is not open")]
    ContainerNotOpen(i64),

    #[error("validation failed with {result:?}: {message}")]
    Storage {
        result: ContainerResult,
        message: String,
    },
}

/// A data sink for the streaming write path. Obtained from the dispatcher at
/// stream-init; bytes flow into it out-of-band; at link time the PutBlock
/// request cached on the channel is committed through the normal dispatch
/// path.
#[async_trait::async_trait]
pub trait StreamDataChannel: Send + Sync {
    fn is_open(&self) -> bool;

    /// The PutBlock request buffered on this channel, available once the
    /// channel has been closed by the writer.
    fn put_block_request(&self) -> Option<ContainerCommandRequest>;

    /// Mark the streamed block as committed.
    fn set_linked(&self);

    /// Discard staged data after a failed link.
    async fn clean_up(&self);
}

/// The storage dispatcher: executes container commands against local
/// storage. All heavy I/O happens behind this trait; the state machine only
/// coordinates ordering, caching and health.
#[async_trait::async_trait]
pub trait ContainerDispatcher: Send + Sync {
    /// Pre-replication check on the leader. Errors reject the request
    /// without replicating it.
    async fn validate_container_command(
        &self,
        request: &ContainerCommandRequest,
    ) -> Result<(), ValidationError>;

    /// Execute a container command locally. Failures are reported through
    /// the response's result code, not through `Err`.
    async fn dispatch(
        &self,
        request: ContainerCommandRequest,
        context: Option<DispatcherContext>,
    ) -> ContainerCommandResponse;

    /// Open a data sink for the streaming write path.
    async fn get_stream_data_channel(
        &self,
        request: &ContainerCommandRequest,
    ) -> Result<Arc<dyn StreamDataChannel>, ValidationError>;

    /// Reconcile on-disk containers against a restored snapshot index,
    /// recording containers this replica should have but does not.
    async fn build_missing_container_set_and_validate(
        &self,
        container2bcsid: HashMap<i64, i64>,
    ) -> Result<(), ValidationError>;

    /// Finalization ledger: once a block is finalized, later writes to it
    /// are rejected before replication.
    fn is_finalized_block_exist(&self, container_id: i64, local_id: i64) -> bool;
    fn add_finalized_block(&self, container_id: i64, local_id: i64);

    /// Best-effort close path used on group removal.
    async fn mark_container_for_close(&self, container_id: i64) -> Result<(), ValidationError>;
    async fn quasi_close_container(
        &self,
        container_id: i64,
        reason: &str,
    ) -> Result<(), ValidationError>;

    /// Local filesystem location of a container, for diagnostics.
    fn container_location(&self, container_id: i64) -> Option<String>;
}
