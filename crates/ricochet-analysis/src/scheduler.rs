//! Work scheduling for both solvers
//!
//! Path edges are drained first, in FIFO order and regardless of direction.
//! Only when no edge is pending does the scheduler hand out one POI task;
//! POI tasks are ordered by kind and then by insertion. The time budget is
//! checked every `check_interval` dequeues.

use crate::path_edge::PathEdge;
use crate::poi::PoiKind;
use ricochet_core::{AccessPath, Error, Result, StmtId};
use ricochet_program::Direction;
use rustc_hash::FxHashSet;
use std::collections::{BTreeMap, VecDeque};
use std::time::{Duration, Instant};
use tracing::warn;

/// Deferred work started by a POI
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PoiTask {
    /// Find the allocation sites of `fact` at `stmt`
    SeedBackward { stmt: StmtId, fact: AccessPath },
    /// Propagate `fact`, anchored at `alloc`, forward from `stmt`
    StartForward {
        stmt: StmtId,
        alloc: AccessPath,
        fact: AccessPath,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Task {
    Edge(Direction, PathEdge),
    Poi(PoiTask),
}

#[derive(Debug)]
pub struct Scheduler {
    edges: VecDeque<(Direction, PathEdge)>,
    pois: BTreeMap<(PoiKind, u64), PoiTask>,
    queued_pois: FxHashSet<PoiTask>,
    seq: u64,
    started: Instant,
    budget: Duration,
    check_interval: usize,
    dequeued: usize,
}

impl Scheduler {
    pub fn new(budget: Duration, check_interval: usize) -> Self {
        Self {
            edges: VecDeque::new(),
            pois: BTreeMap::new(),
            queued_pois: FxHashSet::default(),
            seq: 0,
            started: Instant::now(),
            budget,
            check_interval: check_interval.max(1),
            dequeued: 0,
        }
    }

    pub fn push_edge(&mut self, direction: Direction, edge: PathEdge) {
        self.edges.push_back((direction, edge));
    }

    /// Queue a POI task; a task already queued once is dropped
    pub fn push_poi(&mut self, kind: PoiKind, task: PoiTask) -> bool {
        if !self.queued_pois.insert(task.clone()) {
            return false;
        }
        self.pois.insert((kind, self.seq), task);
        self.seq += 1;
        true
    }

    /// Next unit of work, or `Error::Timeout` once the budget is spent
    pub fn next(&mut self) -> Result<Option<Task>> {
        self.dequeued += 1;
        if self.dequeued % self.check_interval == 0 {
            let elapsed = self.started.elapsed();
            if elapsed > self.budget {
                warn!(
                    elapsed_ms = elapsed.as_millis() as u64,
                    budget_ms = self.budget.as_millis() as u64,
                    "Query ran out of time"
                );
                return Err(Error::Timeout {
                    elapsed_ms: elapsed.as_millis() as u64,
                    budget_ms: self.budget.as_millis() as u64,
                });
            }
        }

        if let Some((direction, edge)) = self.edges.pop_front() {
            return Ok(Some(Task::Edge(direction, edge)));
        }
        Ok(self.pois.pop_first().map(|(_, task)| Task::Poi(task)))
    }

    pub fn pending_edges(&self) -> usize {
        self.edges.len()
    }

    pub fn pending_pois(&self) -> usize {
        self.pois.len()
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ricochet_core::Local;
    use std::thread::sleep;

    fn seed(stmt: u32) -> PoiTask {
        PoiTask::SeedBackward {
            stmt: StmtId(stmt),
            fact: AccessPath::local(Local(0)),
        }
    }

    fn edge(stmt: u32) -> PathEdge {
        PathEdge::seed(StmtId(stmt), AccessPath::local(Local(0)))
    }

    #[test]
    fn test_edges_before_pois() {
        let mut scheduler = Scheduler::new(Duration::from_secs(60), 1000);
        scheduler.push_poi(PoiKind::Write, seed(1));
        scheduler.push_edge(Direction::Backward, edge(2));
        scheduler.push_edge(Direction::Forward, edge(3));

        assert_eq!(
            scheduler.next().unwrap(),
            Some(Task::Edge(Direction::Backward, edge(2)))
        );
        assert_eq!(
            scheduler.next().unwrap(),
            Some(Task::Edge(Direction::Forward, edge(3)))
        );
        assert_eq!(scheduler.next().unwrap(), Some(Task::Poi(seed(1))));
        assert_eq!(scheduler.next().unwrap(), None);
    }

    #[test]
    fn test_pois_by_kind_then_insertion() {
        let mut scheduler = Scheduler::new(Duration::from_secs(60), 1000);
        scheduler.push_poi(PoiKind::Unbalanced, seed(1));
        scheduler.push_poi(PoiKind::Write, seed(2));
        scheduler.push_poi(PoiKind::Allocation, seed(3));
        scheduler.push_poi(PoiKind::Write, seed(4));
        assert!(!scheduler.push_poi(PoiKind::Return, seed(4)));
        assert_eq!(scheduler.pending_pois(), 4);

        let order: Vec<PoiTask> = std::iter::from_fn(|| match scheduler.next().unwrap() {
            Some(Task::Poi(task)) => Some(task),
            _ => None,
        })
        .collect();
        assert_eq!(order, vec![seed(3), seed(2), seed(4), seed(1)]);
    }

    #[test]
    fn test_budget_exceeded() {
        let mut scheduler = Scheduler::new(Duration::from_millis(0), 1);
        scheduler.push_edge(Direction::Forward, edge(1));
        sleep(Duration::from_millis(2));
        let err = scheduler.next().unwrap_err();
        assert!(matches!(err, Error::Timeout { budget_ms: 0, .. }));
    }
}
