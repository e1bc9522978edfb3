use std::sync::atomic::{AtomicU64, Ordering};

/// Per-instance counters for the container state machine.
///
/// Registration with a metrics registry is the hosting process's concern;
/// this block only owns the values. Every error that crosses a component
/// boundary is recorded here before it propagates.
#[derive(Default)]
pub struct CsmMetrics {
    num_write_state_machine_ops: AtomicU64,
    num_write_state_machine_fails: AtomicU64,
    num_write_data_fails: AtomicU64,
    num_read_state_machine_ops: AtomicU64,
    num_read_state_machine_fails: AtomicU64,
    num_read_state_machine_miss: AtomicU64,
    num_data_cache_hit: AtomicU64,
    num_data_cache_miss: AtomicU64,
    num_evicted_cache_entries: AtomicU64,
    num_apply_transaction_ops: AtomicU64,
    num_apply_transaction_fails: AtomicU64,
    num_query_state_machine_ops: AtomicU64,
    num_query_state_machine_fails: AtomicU64,
    num_container_not_open_verify_failures: AtomicU64,
    num_start_transaction_verify_failures: AtomicU64,
    pending_apply_transactions: AtomicU64,
    bytes_written: AtomicU64,
    bytes_committed: AtomicU64,
    start_transaction_elapsed_ns: AtomicU64,
    apply_transaction_elapsed_ns: AtomicU64,
}

impl CsmMetrics {
    pub fn new() -> Self {
        CsmMetrics::default()
    }

    pub(crate) fn inc_num_write_state_machine_ops(&self) {
        self.num_write_state_machine_ops.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn inc_num_write_state_machine_fails(&self) {
        self.num_write_state_machine_fails.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn inc_num_write_data_fails(&self) {
        self.num_write_data_fails.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn inc_num_read_state_machine_ops(&self) {
        self.num_read_state_machine_ops.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn inc_num_read_state_machine_fails(&self) {
        self.num_read_state_machine_fails.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn inc_num_read_state_machine_miss(&self) {
        self.num_read_state_machine_miss.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn inc_num_data_cache_hit(&self) {
        self.num_data_cache_hit.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn inc_num_data_cache_miss(&self) {
        self.num_data_cache_miss.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn inc_num_evicted_cache_entries(&self) {
        self.num_evicted_cache_entries.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn inc_num_apply_transaction_ops(&self) {
        self.num_apply_transaction_ops.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn inc_num_apply_transaction_fails(&self) {
        self.num_apply_transaction_fails.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn inc_num_query_state_machine_ops(&self) {
        self.num_query_state_machine_ops.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn inc_num_query_state_machine_fails(&self) {
        self.num_query_state_machine_fails.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn inc_num_container_not_open_verify_failures(&self) {
        self.num_container_not_open_verify_failures
            .fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn inc_num_start_transaction_verify_failures(&self) {
        self.num_start_transaction_verify_failures
            .fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn inc_pending_apply_transactions(&self) {
        self.pending_apply_transactions.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn dec_pending_apply_transactions(&self) {
        self.pending_apply_transactions.fetch_sub(1, Ordering::Relaxed);
    }

    pub(crate) fn add_bytes_written(&self, n: u64) {
        self.bytes_written.fetch_add(n, Ordering::Relaxed);
    }

    pub(crate) fn add_bytes_committed(&self, n: u64) {
        self.bytes_committed.fetch_add(n, Ordering::Relaxed);
    }

    pub(crate) fn record_start_transaction_ns(&self, nanos: u64) {
        self.start_transaction_elapsed_ns.fetch_add(nanos, Ordering::Relaxed);
    }

    pub(crate) fn record_apply_transaction_ns(&self, nanos: u64) {
        self.apply_transaction_elapsed_ns.fetch_add(nanos, Ordering::Relaxed);
    }

    pub fn num_write_state_machine_ops(&self) -> u64 {
        self.num_write_state_machine_ops.load(Ordering::Relaxed)
    }

    pub fn num_write_state_machine_fails(&self) -> u64 {
        self.num_write_state_machine_fails.load(Ordering::Relaxed)
    }

    pub fn num_write_data_fails(&self) -> u64 {
        self.num_write_data_fails.load(Ordering::Relaxed)
    }

    pub fn num_read_state_machine_ops(&self) -> u64 {
        self.num_read_state_machine_ops.load(Ordering::Relaxed)
    }

    pub fn num_read_state_machine_fails(&self) -> u64 {
        self.num_read_state_machine_fails.load(Ordering::Relaxed)
    }

    pub fn num_read_state_machine_miss(&self) -> u64 {
        self.num_read_state_machine_miss.load(Ordering::Relaxed)
    }

    pub fn num_data_cache_hit(&self) -> u64 {
        self.num_data_cache_hit.load(Ordering::Relaxed)
    }

    pub fn num_data_cache_miss(&self) -> u64 {
        self.num_data_cache_miss.load(Ordering::Relaxed)
    }

    pub fn num_evicted_cache_entries(&self) -> u64 {
        self.num_evicted_cache_entries.load(Ordering::Relaxed)
    }

    pub fn num_apply_transaction_ops(&self) -> u64 {
        self.num_apply_transaction_ops.load(Ordering::Relaxed)
    }

    pub fn num_apply_transaction_fails(&self) -> u64 {
        self.num_apply_transaction_fails.load(Ordering::Relaxed)
    }

    pub fn num_query_state_machine_ops(&self) -> u64 {
        self.num_query_state_machine_ops.load(Ordering::Relaxed)
    }

    pub fn num_query_state_machine_fails(&self) -> u64 {
        self.num_query_state_machine_fails.load(Ordering::Relaxed)
    }

    pub fn num_container_not_open_verify_failures(&self) -> u64 {
        self.num_container_not_open_verify_failures.load(Ordering::Relaxed)
    }

    pub fn num_start_transaction_verify_failures(&self) -> u64 {
        self.num_start_transaction_verify_failures.load(Ordering::Relaxed)
    }

    pub fn pending_apply_transactions(&self) -> u64 {
        self.pending_apply_transactions.load(Ordering::Relaxed)
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written.load(Ordering::Relaxed)
    }

    pub fn bytes_committed(&self) -> u64 {
        self.bytes_committed.load(Ordering::Relaxed)
    }

    pub fn start_transaction_elapsed_ns(&self) -> u64 {
        self.start_transaction_elapsed_ns.load(Ordering::Relaxed)
    }

    pub fn apply_transaction_elapsed_ns(&self) -> u64 {
        self.apply_transaction_elapsed_ns.load(Ordering::Relaxed)
    }
}
