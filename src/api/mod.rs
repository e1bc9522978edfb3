//! This mod holds the crate's client-facing API: the contract the consensus
//! engine drives from above and the contracts this crate drives downward
//! (storage dispatcher) and outward (pipeline server).
mod dispatcher;
mod options;
mod server;
mod state_machine;
mod types;

pub use dispatcher::Container2BcsIdHandle;
pub use dispatcher::ContainerDispatcher;
pub use dispatcher::DispatcherContext;
pub use dispatcher::DispatcherOp;
pub use dispatcher::StreamDataChannel;
pub use dispatcher::ValidationError;
pub use dispatcher::WriteChunkStage;
pub use options::StateMachineOptions;
pub(crate) use options::StateMachineOptionsValidated;
pub use server::ConsensusQuery;
pub use server::HostProcess;
pub use server::PipelineObserver;
pub use state_machine::CommandReceipt;
pub use state_machine::StateMachineError;
pub use state_machine::Transaction;
pub use types::Gid;
pub use types::LogEntry;
pub use types::RaftRole;
pub use types::TermIndex;
