//! Interprocedural control-flow graph
//!
//! `Icfg` is everything the analysis needs to know about a program. The
//! solvers never walk it directly; they go through `Directed`, which
//! presents the graph in forward or backward orientation so that one
//! tabulation loop serves both directions.

use crate::program::{LocalType, Method};
use crate::stmt::Stmt;
use ricochet_core::{Local, MethodId, StmtId, TypeId};
use serde::{Deserialize, Serialize};

/// Propagation direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Direction {
    Forward,
    Backward,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Forward => write!(f, "forward"),
            Direction::Backward => write!(f, "backward"),
        }
    }
}

/// Whole-program interprocedural CFG
pub trait Icfg: Send + Sync {
    fn stmt(&self, stmt: StmtId) -> &Stmt;

    fn method(&self, method: MethodId) -> &Method;

    fn method_of(&self, stmt: StmtId) -> MethodId;

    fn succs_of(&self, stmt: StmtId) -> &[StmtId];

    fn preds_of(&self, stmt: StmtId) -> &[StmtId];

    /// Methods a call site may dispatch to
    fn callees_of_call_at(&self, stmt: StmtId) -> &[MethodId];

    /// Call sites that may dispatch to `method`
    fn callers_of(&self, method: MethodId) -> &[StmtId];

    fn start_points_of(&self, method: MethodId) -> &[StmtId];

    fn end_points_of(&self, method: MethodId) -> &[StmtId];

    /// Methods whose bodies are never entered
    fn is_ignored_method(&self, method: MethodId) -> bool;

    fn local_type(&self, local: Local) -> &LocalType;

    /// Reflexive, transitive subtyping
    fn can_store(&self, child: TypeId, parent: TypeId) -> bool;

    fn entry_points(&self) -> Vec<MethodId>;

    fn is_call_stmt(&self, stmt: StmtId) -> bool {
        self.stmt(stmt).call().is_some()
    }

    fn is_exit_stmt(&self, stmt: StmtId) -> bool {
        self.stmt(stmt).is_return()
    }

    fn is_start_point(&self, stmt: StmtId) -> bool {
        self.start_points_of(self.method_of(stmt)).contains(&stmt)
    }

    fn is_reference_local(&self, local: Local) -> bool {
        self.local_type(local).is_reference()
    }

    /// Static type of a reference local
    fn reference_type(&self, local: Local) -> Option<TypeId> {
        self.local_type(local).reference()
    }

    /// Type allocated at `stmt`, if it is a `new`/`newarray` assignment
    fn allocation_type(&self, stmt: StmtId) -> Option<TypeId> {
        self.stmt(stmt).allocated_type()
    }

    /// Parameter, `this`, or neither
    fn is_parameter_or_this(&self, method: MethodId, local: Local) -> bool {
        let method = self.method(method);
        method.this == Some(local) || method.params.contains(&local)
    }
}

/// An `Icfg` seen in one direction
#[derive(Clone, Copy)]
pub struct Directed<'a> {
    icfg: &'a dyn Icfg,
    direction: Direction,
}

impl<'a> Directed<'a> {
    pub fn new(icfg: &'a dyn Icfg, direction: Direction) -> Self {
        Self { icfg, direction }
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn icfg(&self) -> &'a dyn Icfg {
        self.icfg
    }

    pub fn succs_of(&self, stmt: StmtId) -> &'a [StmtId] {
        match self.direction {
            Direction::Forward => self.icfg.succs_of(stmt),
            Direction::Backward => self.icfg.preds_of(stmt),
        }
    }

    /// Where the analysis enters a callee
    pub fn start_points_of(&self, method: MethodId) -> &'a [StmtId] {
        match self.direction {
            Direction::Forward => self.icfg.start_points_of(method),
            Direction::Backward => self.icfg.end_points_of(method),
        }
    }

    /// Where the analysis leaves a method
    pub fn is_exit_stmt(&self, stmt: StmtId) -> bool {
        match self.direction {
            Direction::Forward => self.icfg.is_exit_stmt(stmt),
            Direction::Backward => self.icfg.is_start_point(stmt),
        }
    }

    /// Statements control reaches after leaving a call site
    pub fn return_sites_of(&self, call_site: StmtId) -> &'a [StmtId] {
        self.succs_of(call_site)
    }

    pub fn is_call_stmt(&self, stmt: StmtId) -> bool {
        self.icfg.is_call_stmt(stmt)
    }
}
