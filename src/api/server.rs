use crate::api::types::{Gid, RaftRole, TermIndex};

/// Capability the outer server injects so the state machine can raise
/// pipeline-level events without owning the server. The state machine holds
/// this as an `Arc<dyn PipelineObserver>`, never the concrete server type.
pub trait PipelineObserver: Send + Sync {
    fn notify_group_add(&self, gid: Gid);
    fn notify_group_remove(&self, gid: Gid);

    fn handle_node_slowness(&self, gid: Gid);
    fn handle_no_leader(&self, gid: Gid);

    /// A local apply failed outside the tolerated result set; the pipeline
    /// must be closed.
    fn handle_apply_transaction_failure(&self, gid: Gid, role: RaftRole);

    fn handle_leader_changed(&self, gid: Gid, new_leader_id: String);
    fn handle_node_log_failure(&self, gid: Gid, description: String);
    fn handle_install_snapshot_from_leader(&self, gid: Gid, first_term_index: TermIndex);
}

/// Read-only view of the consensus engine's replica state, injected so the
/// state machine can make leader-only decisions (cache admission, strict
/// retention) and sample group health at shutdown.
pub trait ConsensusQuery: Send + Sync {
    fn is_leader(&self, gid: &Gid) -> bool;

    /// Next log index each follower expects, leader-side only. `None` when
    /// this replica is not the leader.
    fn follower_next_indices(&self, gid: &Gid) -> Option<Vec<u64>>;

    fn group_count(&self) -> usize;
    fn closed_group_count(&self) -> usize;
}

/// Handle on the host process, used only by the shutdown notification path.
pub trait HostProcess: Send + Sync {
    fn is_stopped(&self) -> bool;
    fn terminate(&self);
}
