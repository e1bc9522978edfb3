use crate::api::{ContainerDispatcher, Gid, LogEntry, Transaction, ValidationError};
use crate::machine::context::TransactionContext;
use crate::machine::metrics::CsmMetrics;
use crate::proto::{CmdType, ContainerCommandRequest, ContainerResult};
use bytes::Bytes;
use prost::Message;
use std::sync::Arc;
use tokio::time::Instant;

/// Builds transactions out of client requests and replicated log entries.
///
/// The leader path splits the WriteChunk payload away from the metadata that
/// gets replicated; every replica's log-entry path re-joins the two views.
pub(crate) struct TransactionPipeline {
    logger: slog::Logger,
    gid: Gid,
    dispatcher: Arc<dyn ContainerDispatcher>,
    metrics: Arc<CsmMetrics>,
}

impl TransactionPipeline {
    pub(crate) fn new(
        logger: slog::Logger,
        gid: Gid,
        dispatcher: Arc<dyn ContainerDispatcher>,
        metrics: Arc<CsmMetrics>,
    ) -> Self {
        TransactionPipeline {
            logger,
            gid,
            dispatcher,
            metrics,
        }
    }

    /// Leader path: turn a client request into a transaction ready for
    /// replication. Validation failures come back as rejected transactions,
    /// never as panics or `Err`: consensus commits them as no-ops and
    /// reports the error to the client.
    pub(crate) async fn start_transaction_for_client(&self, message: Bytes) -> Transaction {
        let start_time = Instant::now();

        let proto = match decode_request(self.gid, &message) {
            Ok(proto) => proto,
            Err(e) => {
                slog::error!(self.logger, "Failed to decode client request: {}", e);
                return rejected(message, e.into());
            }
        };

        self.metrics.inc_pending_apply_transactions();

        if let Err(e) = self.dispatcher.validate_container_command(&proto).await {
            match &e {
                ValidationError::ContainerNotOpen(_) => {
                    self.metrics.inc_num_container_not_open_verify_failures();
                }
                ValidationError::Storage { .. } => {
                    self.metrics.inc_num_start_transaction_verify_failures();
                    slog::error!(self.logger, "Start-transaction validation failed on leader: {}", e);
                }
            }
            return rejected(message, e.into());
        }

        // The token was verified above; it has no business in the log.
        let mut log_proto = proto.clone();
        log_proto.encoded_token = None;

        let cmd_type = proto.cmd_type();
        if self.block_already_finalized(&proto, cmd_type) {
            return rejected(
                message,
                crate::api::StateMachineError::Storage {
                    result: ContainerResult::BlockAlreadyFinalized,
                    message: "Block already finalized".to_string(),
                },
            );
        }

        let mut state_machine_data = None;
        match cmd_type {
            CmdType::WriteChunk => {
                let Some(write) = proto.write_chunk.as_ref() else {
                    return rejected(message, malformed("WriteChunk request has no chunk body"));
                };
                if write.data.is_empty() {
                    return rejected(message, malformed("WriteChunk request has no data"));
                }

                let mut log_write = write.clone();
                log_write.data = Bytes::new();
                log_proto.write_chunk = Some(log_write);
                log_proto.pipeline_id = self.gid.to_string();

                state_machine_data = Some(write.data.clone());
            }
            CmdType::FinalizeBlock => {
                // Registered synchronously so a write racing this request is
                // already rejected at its own finalized-block check.
                if let Some(block_id) = proto.finalize_block.as_ref().and_then(|f| f.block_id.as_ref()) {
                    self.dispatcher.add_finalized_block(proto.container_id, block_id.local_id);
                }
            }
            _ => {}
        }

        let log_data = Bytes::from(log_proto.encode_to_vec());
        let context = TransactionContext::new(proto, log_proto);
        self.metrics
            .record_start_transaction_ns(start_time.elapsed().as_nanos() as u64);

        Transaction {
            context: Some(context),
            log_data,
            state_machine_data,
            rejection: None,
        }
    }

    /// Any-replica path: reconstruct the request view from a replicated log
    /// entry, merging the side channel back into WriteChunk.
    pub(crate) fn start_transaction_for_log_entry(&self, entry: &LogEntry) -> Transaction {
        let log_proto = match decode_request(self.gid, &entry.log_data) {
            Ok(proto) => proto,
            Err(e) => {
                slog::error!(
                    self.logger,
                    "Failed to decode replicated log entry at {}: {}",
                    entry.term_index(),
                    e
                );
                return Transaction {
                    context: None,
                    log_data: entry.log_data.clone(),
                    state_machine_data: entry.state_machine_data.clone(),
                    rejection: Some(e.into()),
                };
            }
        };

        let request_proto = if log_proto.cmd_type() == CmdType::WriteChunk {
            let mut request = log_proto.clone();
            if let Some(write) = request.write_chunk.as_mut() {
                write.data = entry.state_machine_data.clone().unwrap_or_default();
            }
            request
        } else {
            // Request and log views are the same when there is no state
            // machine data.
            log_proto.clone()
        };

        Transaction {
            context: Some(TransactionContext::new(request_proto, log_proto)),
            log_data: entry.log_data.clone(),
            state_machine_data: entry.state_machine_data.clone(),
            rejection: None,
        }
    }

    fn block_already_finalized(&self, proto: &ContainerCommandRequest, cmd_type: CmdType) -> bool {
        let block_id = match cmd_type {
            CmdType::PutBlock => proto
                .put_block
                .as_ref()
                .and_then(|p| p.block_data.as_ref())
                .and_then(|b| b.block_id.as_ref()),
            CmdType::WriteChunk => proto.write_chunk.as_ref().and_then(|w| w.block_id.as_ref()),
            _ => None,
        };
        match block_id {
            Some(id) => self
                .dispatcher
                .is_finalized_block_exist(id.container_id, id.local_id),
            None => false,
        }
    }

    /// Render a replicated log body for diagnostics. Never fails; decode
    /// problems degrade to a placeholder.
    pub(crate) fn describe_log_entry(&self, entry: &LogEntry) -> String {
        match decode_request(self.gid, &entry.log_data) {
            Ok(request) => {
                let mut out = format!(
                    "{:?} containerID={} pipelineID={}",
                    request.cmd_type(),
                    request.container_id,
                    request.pipeline_id
                );
                if let Some(location) = self.dispatcher.container_location(request.container_id) {
                    out.push_str(", container path=");
                    out.push_str(&location);
                }
                out
            }
            Err(e) => format!("<undecodable log entry: {}>", e),
        }
    }
}

/// Decode a command envelope and stamp it with this group's pipeline id.
pub(crate) fn decode_request(
    gid: Gid,
    data: &Bytes,
) -> Result<ContainerCommandRequest, prost::DecodeError> {
    let mut request = ContainerCommandRequest::decode(data.as_ref())?;
    request.pipeline_id = gid.to_string();
    Ok(request)
}

fn rejected(log_data: Bytes, rejection: crate::api::StateMachineError) -> Transaction {
    Transaction {
        context: None,
        log_data,
        state_machine_data: None,
        rejection: Some(rejection),
    }
}

fn malformed(message: &str) -> crate::api::StateMachineError {
    crate::api::StateMachineError::Storage {
        result: ContainerResult::UnsupportedRequest,
        message: message.to_string(),
    }
}
