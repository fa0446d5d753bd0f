//! Analysis observers
//!
//! Hooks called while a query runs. Observers only watch; nothing they do
//! feeds back into the analysis.

use crate::path_edge::PathEdge;
use crate::poi::PoiKind;
use ricochet_core::{AccessPath, StmtId};
use ricochet_program::Direction;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{debug, trace};

pub trait AnalysisObserver: Send + Sync {
    fn query_started(&self, _stmt: StmtId, _fact: &AccessPath) {}

    fn edge_created(&self, _direction: Direction, _edge: &PathEdge) {}

    fn allocation_reached(&self, _stmt: StmtId, _fact: &AccessPath) {}

    fn poi_registered(&self, _kind: PoiKind, _stmt: StmtId, _fact: &AccessPath) {}

    fn query_finished(&self, _timed_out: bool) {}
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl AnalysisObserver for NoopObserver {}

/// Routes every hook into `tracing`
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingObserver;

impl AnalysisObserver for TracingObserver {
    fn query_started(&self, stmt: StmtId, fact: &AccessPath) {
        debug!("Query {} at {}", fact, stmt);
    }

    fn edge_created(&self, direction: Direction, edge: &PathEdge) {
        trace!("{} edge {}", direction, edge);
    }

    fn allocation_reached(&self, stmt: StmtId, fact: &AccessPath) {
        debug!("Allocation of {} at {}", fact, stmt);
    }

    fn poi_registered(&self, kind: PoiKind, stmt: StmtId, fact: &AccessPath) {
        debug!("{:?} POI {} at {}", kind, fact, stmt);
    }

    fn query_finished(&self, timed_out: bool) {
        debug!(timed_out, "Query finished");
    }
}

/// Counts hook calls
#[derive(Debug, Default)]
pub struct RecordingObserver {
    pub queries: AtomicUsize,
    pub forward_edges: AtomicUsize,
    pub backward_edges: AtomicUsize,
    pub allocations: AtomicUsize,
    pub pois: AtomicUsize,
    pub timeouts: AtomicUsize,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::Relaxed)
    }
}

impl AnalysisObserver for RecordingObserver {
    fn query_started(&self, _stmt: StmtId, _fact: &AccessPath) {
        self.queries.fetch_add(1, Ordering::Relaxed);
    }

    fn edge_created(&self, direction: Direction, _edge: &PathEdge) {
        match direction {
            Direction::Forward => self.forward_edges.fetch_add(1, Ordering::Relaxed),
            Direction::Backward => self.backward_edges.fetch_add(1, Ordering::Relaxed),
        };
    }

    fn allocation_reached(&self, _stmt: StmtId, _fact: &AccessPath) {
        self.allocations.fetch_add(1, Ordering::Relaxed);
    }

    fn poi_registered(&self, _kind: PoiKind, _stmt: StmtId, _fact: &AccessPath) {
        self.pois.fetch_add(1, Ordering::Relaxed);
    }

    fn query_finished(&self, timed_out: bool) {
        if timed_out {
            self.timeouts.fetch_add(1, Ordering::Relaxed);
        }
    }
}
