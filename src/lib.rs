mod api;
mod machine;
mod proto;

pub use api::CommandReceipt;
pub use api::ConsensusQuery;
pub use api::Container2BcsIdHandle;
pub use api::ContainerDispatcher;
pub use api::DispatcherContext;
pub use api::DispatcherOp;
pub use api::Gid;
pub use api::HostProcess;
pub use api::LogEntry;
pub use api::PipelineObserver;
pub use api::RaftRole;
pub use api::StateMachineError;
pub use api::StateMachineOptions;
pub use api::StreamDataChannel;
pub use api::TermIndex;
pub use api::Transaction;
pub use api::ValidationError;
pub use api::WriteChunkStage;
pub use machine::ContainerStateMachine;
pub use machine::ContainerStateMachineConfig;
pub use machine::CreationError;
pub use machine::CsmMetrics;
pub use machine::ExecutorPool;
pub use machine::LocalStream;
pub use proto::BlockData;
pub use proto::BlockId;
pub use proto::ChunkInfo;
pub use proto::CloseContainerRequest;
pub use proto::CmdType;
pub use proto::Container2BcsIdMap;
pub use proto::ContainerCommandRequest;
pub use proto::ContainerCommandResponse;
pub use proto::ContainerResult;
pub use proto::CreateContainerRequest;
pub use proto::DeleteContainerRequest;
pub use proto::EchoRequest;
pub use proto::FinalizeBlockRequest;
pub use proto::GetSmallFileRequest;
pub use proto::GetSmallFileResponse;
pub use proto::PutBlockRequest;
pub use proto::PutSmallFileRequest;
pub use proto::ReadChunkRequest;
pub use proto::ReadChunkResponse;
pub use proto::ReadContainerRequest;
pub use proto::WriteChunkRequest;

// The root mod holds no code: only `mod` and `pub use` statements. Internal
// organization stays private; everything public is exported here by name.
