use std::convert::TryFrom;

/// Tunables for one state machine instance. Every field is optional;
/// defaults match production settings.
#[derive(Clone, Default)]
pub struct StateMachineOptions {
    /// Byte budget for the leader-side payload cache.
    pub leader_pending_bytes_limit: Option<u64>,
    /// Size of the container-op executor pool.
    pub num_container_op_executors: Option<usize>,
    /// Permits for the apply-transaction admission semaphore.
    pub max_pending_apply_txns: Option<usize>,
    /// Cache retention policy: when true, the leader keeps payloads cached
    /// until every follower has advanced past them; when false, entries are
    /// dropped as soon as they are applied.
    pub wait_on_all_followers: Option<bool>,
}

pub(crate) struct StateMachineOptionsValidated {
    pub leader_pending_bytes_limit: u64,
    pub num_container_op_executors: usize,
    pub max_pending_apply_txns: usize,
    pub wait_on_all_followers: bool,
}

impl StateMachineOptionsValidated {
    fn validate(&self) -> Result<(), &'static str> {
        if self.leader_pending_bytes_limit == 0 {
            return Err("Leader pending bytes limit must be non-zero");
        }
        if self.num_container_op_executors == 0 {
            return Err("Container-op executor pool must have at least one executor");
        }
        if self.max_pending_apply_txns == 0 {
            return Err("Apply admission must allow at least one pending transaction");
        }

        Ok(())
    }
}

impl TryFrom<StateMachineOptions> for StateMachineOptionsValidated {
    type Error = &'static str;

    fn try_from(options: StateMachineOptions) -> Result<Self, Self::Error> {
        let values = StateMachineOptionsValidated {
            leader_pending_bytes_limit: options.leader_pending_bytes_limit.unwrap_or(1024 * 1024 * 1024),
            num_container_op_executors: options.num_container_op_executors.unwrap_or(10),
            max_pending_apply_txns: options.max_pending_apply_txns.unwrap_or(10_000),
            wait_on_all_followers: options.wait_on_all_followers.unwrap_or(false),
        };

        values.validate()?;
        Ok(values)
    }
}
