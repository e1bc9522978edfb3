use crate::api::TermIndex;
use std::collections::HashMap;
use std::sync::Mutex;

struct Inner {
    last_applied: Option<TermIndex>,
    // Indices whose apply has completed but which are not yet contiguous
    // with `last_applied`. Apply completion is reordered by per-container
    // parallelism; this map decouples "this index is done" from "the global
    // watermark has advanced".
    completed: HashMap<u64, u64>,
}

/// Tracks the last-applied watermark. The watermark only ever advances
/// through strictly contiguous indices: a gap blocks advancement until the
/// missing index completes.
pub(crate) struct AppliedTracker {
    inner: Mutex<Inner>,
}

impl AppliedTracker {
    pub(crate) fn new() -> Self {
        AppliedTracker {
            inner: Mutex::new(Inner {
                last_applied: None,
                completed: HashMap::new(),
            }),
        }
    }

    pub(crate) fn last_applied(&self) -> Option<TermIndex> {
        self.lock().last_applied
    }

    /// Set the watermark directly, from a restored snapshot. Never moves
    /// the watermark backwards.
    pub(crate) fn force_set(&self, term_index: TermIndex) {
        let mut inner = self.lock();
        if let Some(current) = inner.last_applied {
            assert!(
                term_index.index >= current.index,
                "Can't move last-applied backwards. Expected [input] {} >= {} [current]",
                term_index,
                current,
            );
        }
        inner.last_applied = Some(term_index);
    }

    /// Record that `index` finished applying, then advance the watermark
    /// across every contiguous completed index.
    pub(crate) fn note_completed(&self, index: u64, term: u64) -> Option<TermIndex> {
        let mut inner = self.lock();
        let previous = inner.completed.insert(index, term);
        debug_assert!(
            previous.is_none(),
            "index {} completed twice (terms {:?} and {})",
            index,
            previous,
            term
        );

        let mut next = match inner.last_applied {
            Some(ti) => ti.index + 1,
            None => 0,
        };
        while let Some(term) = inner.completed.remove(&next) {
            inner.last_applied = Some(TermIndex::new(term, next));
            next += 1;
        }
        inner.last_applied
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().expect("AppliedTracker mutex guard poison")
    }
}
