use bytes::Bytes;
use std::fmt;
use uuid::Uuid;

/// Gid identifies the replication group this state machine instance serves.
/// It is assigned at group-add and never changes for the lifetime of the
/// instance.
#[derive(Clone, Copy, Hash, Eq, PartialEq)]
pub struct Gid(Uuid);

impl Gid {
    pub fn new(id: Uuid) -> Self {
        Gid(id)
    }

    pub fn random() -> Self {
        Gid(Uuid::new_v4())
    }

    pub fn into_inner(self) -> Uuid {
        self.0
    }
}

impl fmt::Debug for Gid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for Gid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The (term, index) coordinate of a log entry.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd)]
pub struct TermIndex {
    pub term: u64,
    pub index: u64,
}

impl TermIndex {
    pub fn new(term: u64, index: u64) -> Self {
        TermIndex { term, index }
    }
}

impl fmt::Display for TermIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(t:{}, i:{})", self.term, self.index)
    }
}

/// Role the local replica held when the consensus engine handed us work.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum RaftRole {
    Leader,
    Candidate,
    Follower,
}

/// A consensus-supplied log entry.
///
/// `log_data` is the replicated log body. `state_machine_data` is the side
/// channel that carries WriteChunk payloads so they never enter the
/// replicated log body; it is populated on the replica that accepted the
/// client request and absent on replicas that received the entry over the
/// wire.
#[derive(Debug, Clone)]
pub struct LogEntry {
    pub term: u64,
    pub index: u64,
    pub log_data: Bytes,
    pub state_machine_data: Option<Bytes>,
}

impl LogEntry {
    pub fn term_index(&self) -> TermIndex {
        TermIndex::new(self.term, self.index)
    }
}
