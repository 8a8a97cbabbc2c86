//! Action-observer protocol for structural graph mutations.
//!
//! Handlers are registered on the graph and invoked in registration order
//! for every structural mutation, before the affected identifiers are
//! invalidated. Composition of removal callbacks is plain list extension:
//! register another handler.

use std::sync::atomic::{AtomicUsize, Ordering};

use tracing::debug;

use super::{EdgeId, VertexId};

/// Observer of structural graph mutations. All methods default to no-ops so
/// a handler implements only the events it cares about.
///
/// `thread_safe` is a static capability declaration: the simplification
/// scheduler takes the parallel presimplification path only when every
/// registered handler reports `true`.
pub trait GraphHandler: Send + Sync {
    fn thread_safe(&self) -> bool {
        false
    }

    fn on_add(&self, _e: EdgeId, _length: usize) {}

    fn on_delete(&self, _e: EdgeId) {}

    /// `old` edges were concatenated into `new` (chain compression).
    fn on_merge(&self, _old: &[EdgeId], _new: EdgeId, _new_length: usize) {}

    /// Two parallel edges `e1`, `e2` were glued into `new`.
    fn on_glue(&self, _new: EdgeId, _e1: EdgeId, _e2: EdgeId) {}

    /// `old` was cut into `n1` followed by `n2`.
    fn on_split(
        &self,
        _old: EdgeId,
        _old_length: usize,
        _n1: EdgeId,
        _n1_length: usize,
        _n2: EdgeId,
        _n2_length: usize,
    ) {
    }

    /// `old_v` was split; `pairs` maps each affected old edge to its copy at
    /// `new_v`, with `coeffs` giving the flow fraction routed to the copy.
    fn on_vertex_split(
        &self,
        _new_v: VertexId,
        _pairs: &[(EdgeId, EdgeId)],
        _coeffs: &[f64],
        _old_v: VertexId,
    ) {
    }
}

/// Counts edge removals; the scheduler registers one around each algorithm
/// family and logs the tally.
#[derive(Default)]
pub struct CountingHandler {
    removed: AtomicUsize,
}

impl CountingHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the count accumulated since the last report and resets it.
    pub fn report(&self, stage: &str) -> usize {
        let n = self.removed.swap(0, Ordering::Relaxed);
        debug!("{stage}: {n} edges removed");
        n
    }
}

impl GraphHandler for CountingHandler {
    fn thread_safe(&self) -> bool {
        true
    }

    fn on_delete(&self, _e: EdgeId) {
        self.removed.fetch_add(1, Ordering::Relaxed);
    }
}
