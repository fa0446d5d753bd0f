//! Flow functions
//!
//! A flow function maps the fact at the target of a path edge to the facts
//! that hold after one more step. The four edge classes get one method each.
//! Flow functions never touch solver state: anything beyond the target facts
//! (a POI to register, an allocation that was reached, a backward search to
//! start) is returned as an `Effect` for the engine to apply.

pub mod backward;
pub mod forward;

pub use backward::BackwardFlowFunctions;
pub use forward::ForwardFlowFunctions;

use crate::path_edge::PathEdge;
use crate::poi::{AliasCallback, PoiKind};
use ricochet_core::{AccessPath, AnalysisConfig, Field, FieldId, FieldLimits, Local, MethodId, Result, StmtId};
use ricochet_program::Icfg;

/// Side effect requested by a flow function
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Start a backward search for `fact` at `stmt`
    SeedBackward { stmt: StmtId, fact: AccessPath },
    /// Subscribe `callback` to the aliases of `fact` at `stmt`
    RegisterPoi {
        kind: PoiKind,
        stmt: StmtId,
        fact: AccessPath,
        callback: AliasCallback,
    },
    /// `stmt` allocates the value `fact` refers to
    Allocation {
        stmt: StmtId,
        fact: AccessPath,
        is_null: bool,
    },
}

/// Target facts plus requested effects
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlowOutput {
    pub targets: Vec<AccessPath>,
    pub effects: Vec<Effect>,
}

impl FlowOutput {
    pub fn identity(fact: &AccessPath) -> Self {
        Self {
            targets: vec![fact.clone()],
            effects: Vec::new(),
        }
    }

    pub fn push(&mut self, fact: AccessPath) {
        if !self.targets.contains(&fact) {
            self.targets.push(fact);
        }
    }

    pub fn effect(&mut self, effect: Effect) {
        self.effects.push(effect);
    }

    /// Drop every target, keep the effects
    pub fn kill_all(&mut self) {
        self.targets.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty() && self.effects.is_empty()
    }
}

/// Transfer functions for one direction
pub trait FlowFunctions {
    /// Intraprocedural step from `edge.target` to `succ`
    fn normal(&self, edge: &PathEdge, succ: StmtId) -> Result<FlowOutput>;

    /// From the call site `edge.target` into `callee` at `callee_start`
    fn call(&self, edge: &PathEdge, callee: MethodId, callee_start: StmtId) -> Result<FlowOutput>;

    /// From the exit of `callee` back to `return_site` after `call_site`
    fn return_flow(
        &self,
        exit_edge: &PathEdge,
        call_site: StmtId,
        callee: MethodId,
        return_site: StmtId,
    ) -> Result<FlowOutput>;

    /// Around the call site `edge.target`; `callees` are the analyzed targets
    fn call_to_return(&self, edge: &PathEdge, return_site: StmtId, callees: &[MethodId]) -> Result<FlowOutput>;
}

/// Read-only inputs shared by both directions
#[derive(Clone, Copy)]
pub struct FlowContext<'a> {
    pub icfg: &'a dyn Icfg,
    pub config: &'a AnalysisConfig,
    pub limits: FieldLimits,
}

impl<'a> FlowContext<'a> {
    pub fn new(icfg: &'a dyn Icfg, config: &'a AnalysisConfig) -> Self {
        Self {
            icfg,
            config,
            limits: config.field_limits(),
        }
    }

    /// Field written or read at `stmt`
    pub fn field(&self, id: FieldId, stmt: StmtId) -> Field {
        if self.config.track_statements_in_fields {
            Field::stored_at(id, stmt)
        } else {
            Field::new(id)
        }
    }

    /// `source` with its base replaced by the first-field-popped variants
    pub fn pop_into(&self, source: &AccessPath, local: Local, out: &mut FlowOutput) -> Result<()> {
        for popped in source.pop_first_field()? {
            out.push(popped.with_base(local));
        }
        if source.is_static() && source.has_set_based_fields() {
            out.push(source.drop_tail().with_base(local));
        }
        Ok(())
    }

    /// `source` written to the static field `field`
    pub fn make_static(&self, source: &AccessPath, field: Field) -> Vec<AccessPath> {
        let stored = source.prepend_field(field, self.limits).make_static();
        if stored.has_set_based_fields() {
            let plain = source.drop_tail().prepend_field(field, self.limits).make_static();
            vec![stored, plain]
        } else {
            vec![stored]
        }
    }
}
