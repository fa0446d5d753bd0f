//! Backward extension hooks

use super::Solver;
use crate::flow::FlowFunctions;
use crate::path_edge::PathEdge;
use crate::poi::PoiKind;
use ricochet_core::{AccessPath, MethodId, Result};
use ricochet_program::Direction;
use tracing::debug;

impl<'a> Solver<'a> {
    pub(super) fn backward_normal_extend(&mut self, next: PathEdge) -> Option<PathEdge> {
        let method = self.icfg.method_of(next.target);
        if !self.is_visitable(method) {
            self.pause(method, Direction::Backward, next);
            return None;
        }
        Some(next)
    }

    /// With the on-the-fly call graph a callee body is only searched once
    /// a receiver allocation opens it, so the receiver is searched as well
    pub(super) fn backward_call_extend(
        &mut self,
        edge: &PathEdge,
        self_loop: PathEdge,
        callee: MethodId,
    ) -> Option<PathEdge> {
        let icfg = self.icfg;
        let method = icfg.method(callee);
        let call_site = edge.target;
        if !self.config.on_the_fly_call_graph {
            self.make_visitable(callee);
        } else if !method.is_static {
            if let Some(receiver) = icfg.stmt(call_site).call().and_then(|call| call.receiver) {
                self.seed_backward(call_site, AccessPath::local(receiver));
                let caller_fact = &edge.target_fact;
                if !caller_fact.has_fields() && !caller_fact.has_set_based_fields() && caller_fact.base_matches(receiver) {
                    return None;
                }
            }
        } else if !self_loop.target_fact.is_static() {
            self.make_visitable(callee);
        }
        Some(self_loop)
    }

    pub(super) fn backward_balanced_extend(&mut self, next: PathEdge, call_edge: &PathEdge) -> Option<PathEdge> {
        let caller = self.icfg.method_of(call_edge.target);
        if !self.is_visitable(caller) {
            self.pause(caller, Direction::Backward, next);
            return None;
        }
        Some(next)
    }

    /// The search reached the start of a method it was not called into
    ///
    /// A parameter, `this` or static value of an entry point is an origin.
    /// Otherwise the context requester decides per call site whether to
    /// continue in the caller or to treat the value as an origin.
    pub(super) fn backward_unbalanced(&mut self, exit_edge: &PathEdge) -> Result<()> {
        let icfg = self.icfg;
        let callee = icfg.method_of(exit_edge.target);
        let method = icfg.method(callee);
        let fact = &exit_edge.target_fact;
        let is_param_or_static =
            fact.is_static() || fact.base().map_or(false, |base| icfg.is_parameter_or_this(callee, base));
        if !is_param_or_static {
            return Ok(());
        }

        let callers = icfg.callers_of(callee);
        if callers.is_empty() {
            if self.requester.is_entry_point_method(method) {
                debug!("{} enters {} from outside", fact, method.name);
                self.allocation_reached(exit_edge, exit_edge.target, fact.clone(), true, PoiKind::ParameterTurn);
            }
            return Ok(());
        }

        for &call_site in callers {
            if !self.requester.continue_at_call_site(call_site, callee) {
                self.allocation_reached(exit_edge, exit_edge.target, fact.clone(), true, PoiKind::ParameterTurn);
                continue;
            }
            let caller = icfg.method_of(call_site);
            self.make_visitable(caller);
            self.backward_call_sites
                .entry(callee)
                .or_default()
                .insert(call_site);
            for &return_site in icfg.preds_of(call_site) {
                let out = self
                    .backward_flow
                    .return_flow(exit_edge, call_site, callee, return_site)?;
                self.apply_effects(exit_edge, out.effects);
                for fact in out.targets {
                    let next = PathEdge::seed(return_site, fact);
                    if self.is_visitable(caller) {
                        self.propagate(Direction::Backward, next);
                    } else {
                        self.pause(caller, Direction::Backward, next);
                    }
                }
            }
        }
        Ok(())
    }
}
