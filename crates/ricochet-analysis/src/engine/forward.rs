//! Forward extension hooks
//!
//! - normal: park edges at a cast until an origin's type fits the cast
//! - call: on-the-fly call graph, a callee opens once a receiver allocation
//!   of a fitting type reaches the call
//! - balanced return: Return POIs for fielded results
//! - unbalanced return: only from allocation-anchored starts, and only to
//!   call sites the backward search went through

use super::Solver;
use crate::flow::FlowFunctions;
use crate::listener::OriginAction;
use crate::path_edge::PathEdge;
use crate::poi::{AliasCallback, PoiKind};
use ricochet_core::{AccessPath, FieldSequence, MethodId, Result, StmtId};
use ricochet_program::{Direction, Place, Rvalue, Stmt};

impl<'a> Solver<'a> {
    pub(super) fn forward_normal_extend(&mut self, edge: &PathEdge, next: PathEdge) -> Option<PathEdge> {
        if !self.config.type_check_casts {
            return Some(next);
        }
        let icfg = self.icfg;
        let cast_stmt = edge.target;
        let Stmt::Assign {
            lhs: Place::Local(local),
            rhs: Rvalue::Cast { ty, .. },
        } = icfg.stmt(cast_stmt)
        else {
            return Some(next);
        };
        let fact = &next.target_fact;
        if fact.is_static() || !fact.base_matches(*local) || self.active_casts.contains(&cast_stmt) {
            return Some(next);
        }

        let ty = *ty;
        let listen = !fact.has_fields() && !fact.has_set_based_fields();
        let start = next.clone();
        self.paused_casts.entry(cast_stmt).or_default().push(next);
        if listen {
            self.on_forward_origin(&start, OriginAction::ActivateCast { cast_stmt, ty });
        }
        None
    }

    pub(super) fn forward_call_extend(
        &mut self,
        edge: &PathEdge,
        self_loop: PathEdge,
        callee: MethodId,
    ) -> Option<PathEdge> {
        let icfg = self.icfg;
        let method = icfg.method(callee);
        let fact = &self_loop.start_fact;
        if !self.config.on_the_fly_call_graph {
            self.make_visitable(callee);
        } else if method.is_static {
            if !fact.is_static() {
                self.make_visitable(callee);
            }
        } else if !fact.is_static() && method.this.is_some() && fact.base() == method.this {
            if !fact.has_fields() && !fact.has_set_based_fields() {
                let this_type = method.this.and_then(|this| icfg.reference_type(this));
                self.on_forward_origin(edge, OriginAction::MakeVisitable { callee, this_type });
            }
        } else if !fact.is_static() {
            self.make_visitable(callee);
        }

        if !self.is_visitable(callee) {
            self.pause(callee, Direction::Forward, self_loop);
            return None;
        }
        Some(self_loop)
    }

    pub(super) fn forward_balanced_extend(
        &mut self,
        exit_edge: &PathEdge,
        next: PathEdge,
        call_edge: &PathEdge,
    ) -> Result<Option<PathEdge>> {
        if next.target_fact.has_fields() && !is_identity(exit_edge) {
            self.register_return_pois(
                PoiKind::Return,
                call_edge.target,
                &next.target_fact,
                next.start,
                &next.start_fact,
                next.target,
            )?;
        }
        Ok(Some(next))
    }

    /// An exit edge no call edge led into: the value was allocated inside
    /// this method, so it flows back to the callers the backward search saw
    pub(super) fn forward_unbalanced(&mut self, exit_edge: &PathEdge) -> Result<()> {
        if !exit_edge.start_fact.has_allocation_site() {
            return Ok(());
        }
        let icfg = self.icfg;
        let callee = icfg.method_of(exit_edge.target);
        let mut call_sites: Vec<StmtId> = self
            .backward_call_sites
            .get(&callee)
            .map(|sites| sites.iter().copied().collect())
            .unwrap_or_default();
        call_sites.sort();

        for call_site in call_sites {
            let caller = icfg.method_of(call_site);
            for &return_site in icfg.succs_of(call_site) {
                let out = self
                    .forward_flow
                    .return_flow(exit_edge, call_site, callee, return_site)?;
                self.apply_effects(exit_edge, out.effects);
                for fact in out.targets {
                    self.register_return_pois(
                        PoiKind::Unbalanced,
                        call_site,
                        &fact,
                        Some(call_site),
                        &exit_edge.start_fact,
                        return_site,
                    )?;
                    let next = PathEdge::new(Some(call_site), exit_edge.start_fact.clone(), return_site, fact);
                    if self.is_visitable(caller) {
                        self.propagate(Direction::Forward, next);
                    } else {
                        self.pause(caller, Direction::Forward, next);
                    }
                }
            }
        }
        Ok(())
    }

    /// For every last field of `fact`, ask for the aliases of the prefix at
    /// the call site and append the field to each of them after the call
    fn register_return_pois(
        &mut self,
        kind: PoiKind,
        call_site: StmtId,
        fact: &AccessPath,
        source_stmt: Option<StmtId>,
        source_fact: &AccessPath,
        target_stmt: StmtId,
    ) -> Result<()> {
        if !fact.has_fields() || fact.is_static() || fact.has_set_based_fields() {
            return Ok(());
        }
        // the prefix before the call is a different value
        if fact.base().is_some() && self.icfg.stmt(call_site).call_result() == fact.base() {
            return Ok(());
        }
        let prefixes = fact.pop_last_field()?;
        for field in fact.last_fields() {
            let Some(to_append) = FieldSequence::new(vec![field], self.limits) else {
                continue;
            };
            for prefix in &prefixes {
                let callback =
                    AliasCallback::forward_append(source_stmt, source_fact.clone(), target_stmt, to_append.clone());
                self.register_poi(kind, call_site, prefix.clone(), callback);
            }
        }
        Ok(())
    }
}

/// `x.f...` in, `x.f...` out: the callee did not move the value
fn is_identity(edge: &PathEdge) -> bool {
    let (source, target) = (&edge.start_fact, &edge.target_fact);
    if source.is_static() || target.is_static() {
        return false;
    }
    source.base() == target.base() && source.first_fields() == target.first_fields()
}
