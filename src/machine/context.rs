use crate::proto::ContainerCommandRequest;
use tokio::time::Instant;

/// Two views of one request, carried through a transaction's lifetime.
///
/// The request view is the full command including user data, used for local
/// execution. The log view has the user data stripped; only the log view is
/// replicated through the consensus log. For everything except WriteChunk
/// the two views are identical apart from the token strip.
pub(crate) struct TransactionContext {
    pub(crate) request: ContainerCommandRequest,
    pub(crate) log: ContainerCommandRequest,
    // When the transaction entered the pipeline, for latency accounting.
    pub(crate) start_time: Instant,
}

impl TransactionContext {
    pub(crate) fn new(request: ContainerCommandRequest, log: ContainerCommandRequest) -> Self {
        TransactionContext {
            request,
            log,
            start_time: Instant::now(),
        }
    }
}
