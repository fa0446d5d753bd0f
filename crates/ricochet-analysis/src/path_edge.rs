//! Path edges of the exploded supergraph

use ricochet_core::{AccessPath, StmtId};
use std::fmt;

/// A `(statement, fact)` pair
///
/// The statement is absent for the start node of a seed edge.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Node {
    pub stmt: Option<StmtId>,
    pub fact: AccessPath,
}

impl Node {
    pub fn new(stmt: Option<StmtId>, fact: AccessPath) -> Self {
        Self { stmt, fact }
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.stmt {
            Some(stmt) => write!(f, "<{}, {}>", stmt, self.fact),
            None => write!(f, "<-, {}>", self.fact),
        }
    }
}

/// `(start, start_fact) -> (target, target_fact)` within one method
///
/// Edges do not carry their direction; every direction owns its own store
/// and the scheduler queues edges together with their direction.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PathEdge {
    pub start: Option<StmtId>,
    pub start_fact: AccessPath,
    pub target: StmtId,
    pub target_fact: AccessPath,
}

impl PathEdge {
    pub fn new(
        start: Option<StmtId>,
        start_fact: AccessPath,
        target: StmtId,
        target_fact: AccessPath,
    ) -> Self {
        Self {
            start,
            start_fact,
            target,
            target_fact,
        }
    }

    /// Seed edge: no start point, the fact starts where it is asked about
    pub fn seed(target: StmtId, fact: AccessPath) -> Self {
        Self::new(None, fact.clone(), target, fact)
    }

    /// Self-loop at a method start point
    pub fn self_loop(start: StmtId, fact: AccessPath) -> Self {
        Self::new(Some(start), fact.clone(), start, fact)
    }

    /// Same start node, new target
    pub fn extend(&self, target: StmtId, target_fact: AccessPath) -> Self {
        Self::new(self.start, self.start_fact.clone(), target, target_fact)
    }

    pub fn start_node(&self) -> Node {
        Node::new(self.start, self.start_fact.clone())
    }

    pub fn target_node(&self) -> Node {
        Node::new(Some(self.target), self.target_fact.clone())
    }

    pub fn is_seed(&self) -> bool {
        self.start.is_none()
    }
}

impl fmt::Display for PathEdge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} -> <{}, {}>",
            self.start_node(),
            self.target,
            self.target_fact
        )
    }
}
