mod applied;
mod context;
mod data_cache;
mod executor;
mod machine;
mod metrics;
mod snapshot;
mod task_queue;
mod transaction;

pub use executor::ExecutorPool;
pub use machine::ContainerStateMachine;
pub use machine::ContainerStateMachineConfig;
pub use machine::CreationError;
pub use machine::LocalStream;
pub use metrics::CsmMetrics;

pub(crate) use context::TransactionContext;
