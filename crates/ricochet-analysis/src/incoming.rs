//! Incoming call edges and method summaries
//!
//! `Incomings` remembers, for every callee start node, the call-site edges
//! that entered it. Returning from a callee is restricted to those call
//! sites, which is what makes the analysis context sensitive without call
//! strings. `Summaries` memoizes the exit nodes reached from a start node so
//! later calls with the same entry fact reuse them.

use crate::path_edge::{Node, PathEdge};
use rustc_hash::{FxHashMap, FxHashSet};

#[derive(Debug, Default)]
pub struct Incomings {
    by_start: FxHashMap<Node, FxHashSet<PathEdge>>,
}

impl Incomings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `call_edge` entered a callee at `callee_start`; false if
    /// already known
    pub fn add(&mut self, callee_start: Node, call_edge: PathEdge) -> bool {
        self.by_start
            .entry(callee_start)
            .or_default()
            .insert(call_edge)
    }

    /// Call-site edges that entered `callee_start`
    pub fn get(&self, callee_start: &Node) -> impl Iterator<Item = &PathEdge> + '_ {
        self.by_start.get(callee_start).into_iter().flatten()
    }

    pub fn has_incoming(&self, callee_start: &Node) -> bool {
        self.by_start
            .get(callee_start)
            .map_or(false, |edges| !edges.is_empty())
    }

    pub fn len(&self) -> usize {
        self.by_start.values().map(FxHashSet::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.by_start.is_empty()
    }
}

#[derive(Debug, Default)]
pub struct Summaries {
    exits: FxHashMap<Node, FxHashSet<Node>>,
}

impl Summaries {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an exit node reached from `start`; false if already known
    pub fn add(&mut self, start: Node, exit: Node) -> bool {
        self.exits.entry(start).or_default().insert(exit)
    }

    pub fn get(&self, start: &Node) -> impl Iterator<Item = &Node> + '_ {
        self.exits.get(start).into_iter().flatten()
    }

    pub fn len(&self) -> usize {
        self.exits.values().map(FxHashSet::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.exits.is_empty()
    }
}
