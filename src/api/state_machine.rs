use crate::machine::TransactionContext;
use crate::proto::{CmdType, ContainerCommandResponse, ContainerResult};
use bytes::Bytes;
use std::io;
use tokio::sync::oneshot;

/// The result of a start-transaction call.
///
/// The consensus engine replicates `log_data` and attaches
/// `state_machine_data` as the entry's side channel. A transaction that
/// failed pre-replication validation carries a `rejection` instead of being
/// an `Err`: the engine commits it as a no-op and reports the error back to
/// the client, rather than crashing the replica.
pub struct Transaction {
    pub(crate) context: Option<TransactionContext>,
    pub(crate) log_data: Bytes,
    pub(crate) state_machine_data: Option<Bytes>,
    pub(crate) rejection: Option<StateMachineError>,
}

impl Transaction {
    /// The bytes to replicate through the consensus log.
    pub fn log_data(&self) -> &Bytes {
        &self.log_data
    }

    /// The side-channel payload, present only for WriteChunk on the replica
    /// that accepted the client request.
    pub fn state_machine_data(&self) -> Option<&Bytes> {
        self.state_machine_data.as_ref()
    }

    /// The pre-replication failure, if validation rejected this request.
    pub fn rejection(&self) -> Option<&StateMachineError> {
        self.rejection.as_ref()
    }

    pub(crate) fn context(&self) -> Option<&TransactionContext> {
        self.context.as_ref()
    }
}

/// Completion handle for an asynchronously executed container command.
///
/// The sender side lives on one of the state machine's executors; the
/// receiver resolves when the command finishes. If the state machine is
/// closed while the command is in flight, the receiver resolves with a
/// `RecvError`, which callers should treat as `StateMachineError::Shutdown`.
pub type CommandReceipt = oneshot::Receiver<Result<ContainerCommandResponse, StateMachineError>>;

#[derive(Debug, thiserror::Error)]
pub enum StateMachineError {
    /// A dispatcher result outside the tolerated set, or a pre-replication
    /// validation failure. Carries the dispatcher's result code.
    #[error("container command failed with {result:?}: {message}")]
    Storage {
        result: ContainerResult,
        message: String,
    },

    /// The machine has observed a local durability failure and refuses
    /// snapshot and watermark work until the instance is rebuilt.
    #[error("state machine is unhealthy")]
    Unhealthy,

    /// A replicated log body failed to decode. Consensus treats this as a
    /// local fatal.
    #[error("failed to decode replicated request: {0}")]
    Decode(#[from] prost::DecodeError),

    #[error("snapshot io failure")]
    Io(#[from] io::Error),

    /// `write` was invoked for a command kind that never carries
    /// state-machine data.
    #[error("command {0:?} does not carry state machine data")]
    NoStateMachineData(CmdType),

    /// The read path produced a chunk whose length disagrees with the chunk
    /// metadata recorded in the log.
    #[error("read chunk returned {actual} bytes, chunk metadata says {expected}")]
    ChunkLengthMismatch { expected: u64, actual: u64 },

    /// A streaming channel was handed to `link` in an unusable state.
    #[error("stream link failed: {0}")]
    Stream(String),

    /// The instance is closed; executors no longer accept work.
    #[error("state machine is shut down")]
    Shutdown,
}

impl StateMachineError {
    pub(crate) fn from_response(response: &ContainerCommandResponse) -> Self {
        StateMachineError::Storage {
            result: response.result(),
            message: response.message.clone(),
        }
    }
}

impl From<crate::api::ValidationError> for StateMachineError {
    fn from(e: crate::api::ValidationError) -> Self {
        match e {
            crate::api::ValidationError::ContainerNotOpen(container_id) => StateMachineError::Storage {
                result: ContainerResult::ContainerNotOpen,
                message: format!("container {} is not open", container_id),
            },
            crate::api::ValidationError::Storage { result, message } => {
                StateMachineError::Storage { result, message }
            }
        }
    }
}
