//! Forward flow functions
//!
//! Propagate a value from its allocation site towards its uses. A store
//! `b.f = y` of a tracked `y` generates `b.f` and registers a Write POI on
//! `b`, so that every alias of `b` found later also gets `.f` appended.

use super::{Effect, FlowContext, FlowFunctions, FlowOutput};
use crate::path_edge::PathEdge;
use crate::poi::{AliasCallback, PoiKind};
use ricochet_core::{AccessPath, Field, FieldId, Local, MethodId, Result, StmtId};
use ricochet_program::{Method, Operand, Place, Rvalue, Stmt};

pub struct ForwardFlowFunctions<'a> {
    cx: FlowContext<'a>,
}

impl<'a> ForwardFlowFunctions<'a> {
    pub fn new(cx: FlowContext<'a>) -> Self {
        Self { cx }
    }

    fn is_killed(&self, lhs: &Place, source: &AccessPath) -> bool {
        let strong = self.cx.config.strongly_update_fields;
        match lhs {
            Place::Local(local) => source.base_matches(*local),
            Place::Field { base, field } => strong && source.base_and_first_field_match(*base, *field),
            Place::Static(field) => strong && source.is_static() && source.first_field_must_match(*field),
            Place::Array(_) => false,
        }
    }

    /// `lhs = y` where the fact is based on `y`
    fn store(&self, edge: &PathEdge, succ: StmtId, lhs: &Place, out: &mut FlowOutput) {
        let curr = edge.target;
        match lhs {
            Place::Local(local) => out.push(edge.target_fact.with_base(*local)),
            Place::Field { base, field } => {
                self.write(edge, succ, *base, self.cx.field(*field, curr), out);
            }
            Place::Array(base) if self.cx.config.handle_arrays => {
                self.write(edge, succ, *base, self.cx.field(FieldId::ARRAY, curr), out);
            }
            Place::Static(field) if self.cx.config.track_static_fields => {
                for stored in self.cx.make_static(&edge.target_fact, self.cx.field(*field, curr)) {
                    out.push(stored);
                }
            }
            _ => {}
        }
    }

    /// `base.field = y`: generate the stored path and ask for the aliases
    /// of `base` at this statement
    fn write(&self, edge: &PathEdge, succ: StmtId, base: Local, field: Field, out: &mut FlowOutput) {
        let stored = edge
            .target_fact
            .prepend_field(field, self.cx.limits)
            .with_base(base);
        if let Some(to_append) = stored.fields().cloned() {
            out.effect(Effect::RegisterPoi {
                kind: PoiKind::Write,
                stmt: edge.target,
                fact: AccessPath::local(base),
                callback: AliasCallback::forward_append(edge.start, edge.start_fact.clone(), succ, to_append),
            });
        }
        out.push(stored);
    }

    /// Whether the receiver of a call may be an instance of the callee's
    /// owner, judged from the allocation the edge started at
    fn receiver_fits(&self, edge: &PathEdge, callee: &Method) -> bool {
        if edge.target_fact.has_fields() {
            return true;
        }
        let (Some(site), Some(owner)) = (edge.start_fact.allocation_site(), callee.owner) else {
            return true;
        };
        match self.cx.icfg.allocation_type(site.point) {
            Some(allocated) => self.cx.icfg.can_store(allocated, owner),
            None => true,
        }
    }
}

impl FlowFunctions for ForwardFlowFunctions<'_> {
    fn normal(&self, edge: &PathEdge, succ: StmtId) -> Result<FlowOutput> {
        let source = &edge.target_fact;
        let Stmt::Assign { lhs, rhs } = self.cx.icfg.stmt(edge.target) else {
            return Ok(FlowOutput::identity(source));
        };
        let config = self.cx.config;

        let mut out = FlowOutput::default();
        if !self.is_killed(lhs, source) {
            out.push(source.clone());
        }
        match (lhs, rhs) {
            (_, Rvalue::Local(y)) if source.base_matches(*y) => self.store(edge, succ, lhs, &mut out),
            (Place::Local(local), Rvalue::Cast { local: y, .. }) if source.base_matches(*y) => {
                out.push(source.with_base(*local));
            }
            (Place::Local(local), Rvalue::Field { base, field })
                if source.base_matches(*base) && source.first_field_may_match(*field) =>
            {
                self.cx.pop_into(source, *local, &mut out)?;
            }
            (Place::Local(local), Rvalue::Array(base))
                if config.handle_arrays
                    && source.base_matches(*base)
                    && source.first_field_may_match(FieldId::ARRAY) =>
            {
                self.cx.pop_into(source, *local, &mut out)?;
            }
            (Place::Local(local), Rvalue::Static(field))
                if config.track_static_fields && source.is_static() && source.first_field_must_match(*field) =>
            {
                self.cx.pop_into(source, *local, &mut out)?;
            }
            _ => {}
        }
        Ok(out)
    }

    fn call(&self, edge: &PathEdge, callee: MethodId, _callee_start: StmtId) -> Result<FlowOutput> {
        let source = &edge.target_fact;
        let Some(call) = self.cx.icfg.stmt(edge.target).call() else {
            return Ok(FlowOutput::default());
        };
        if source.is_static() {
            return Ok(if self.cx.config.track_static_fields {
                FlowOutput::identity(source)
            } else {
                FlowOutput::default()
            });
        }
        let Some(base) = source.base() else {
            return Ok(FlowOutput::default());
        };
        let method = self.cx.icfg.method(callee);

        let mut out = FlowOutput::default();
        for position in call.arg_positions(base) {
            if let Some(param) = method.params.get(position) {
                out.push(source.with_base(*param));
            }
        }
        if let (Some(this), Some(receiver)) = (method.this, call.receiver) {
            if receiver == base {
                if !self.receiver_fits(edge, method) {
                    return Ok(FlowOutput::default());
                }
                out.push(source.with_base(this));
            }
        }
        Ok(out)
    }

    fn return_flow(
        &self,
        exit_edge: &PathEdge,
        call_site: StmtId,
        callee: MethodId,
        _return_site: StmtId,
    ) -> Result<FlowOutput> {
        let source = &exit_edge.target_fact;
        let call_stmt = self.cx.icfg.stmt(call_site);
        let Some(call) = call_stmt.call() else {
            return Ok(FlowOutput::default());
        };
        if source.is_static() {
            return Ok(if self.cx.config.track_static_fields {
                FlowOutput::identity(source)
            } else {
                FlowOutput::default()
            });
        }
        let Some(base) = source.base() else {
            return Ok(FlowOutput::default());
        };
        let method = self.cx.icfg.method(callee);

        let mut out = FlowOutput::default();
        for (param, arg) in method.params.iter().zip(&call.args) {
            if let (true, Operand::Local(arg)) = (*param == base, arg) {
                out.push(source.with_base(*arg));
            }
        }
        if method.this == Some(base) {
            if let Some(receiver) = call.receiver {
                out.push(source.with_base(receiver));
            }
        }
        if let (Some(result), Stmt::Return(Some(Operand::Local(returned)))) =
            (call_stmt.call_result(), self.cx.icfg.stmt(exit_edge.target))
        {
            if *returned == base {
                out.push(source.with_base(result));
            }
        }
        Ok(out)
    }

    fn call_to_return(&self, edge: &PathEdge, _return_site: StmtId, callees: &[MethodId]) -> Result<FlowOutput> {
        let source = &edge.target_fact;
        let call_stmt = self.cx.icfg.stmt(edge.target);
        if source.is_static() {
            return Ok(if callees.is_empty() {
                FlowOutput::identity(source)
            } else {
                FlowOutput::default()
            });
        }
        let Some(base) = source.base() else {
            return Ok(FlowOutput::default());
        };
        if call_stmt.call_result() == Some(base) {
            return Ok(FlowOutput::default());
        }
        let flows_into_callee = call_stmt.call().map_or(false, |call| call.uses(base));
        if flows_into_callee && !callees.is_empty() {
            return Ok(FlowOutput::default());
        }
        Ok(FlowOutput::identity(source))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use ricochet_core::{AnalysisConfig, FieldLimits};
    use ricochet_program::{Icfg, MethodSpec, Program, ProgramBuilder};

    fn program() -> Program {
        ProgramBuilder::new()
            .class("A", None)
            .class("B", None)
            .method(
                MethodSpec::new("run")
                    .on("A")
                    .param("p", "Object")
                    .local("r", "Object")
                    .body(&["r = p", "return r"]),
            )
            .method(
                MethodSpec::new("main")
                    .entry()
                    .local("a", "A")
                    .local("b", "A")
                    .local("o", "Object")
                    .local("x", "Object")
                    .body(&[
                        "a = new A",
                        "b = a",
                        "o = new Object",
                        "b.f = o",
                        "x = b.f",
                        "x = call a.run(o)",
                        "A::s = o",
                    ]),
            )
            .build()
            .unwrap()
    }

    fn local(program: &Program, name: &str) -> Local {
        program.method_named("main").unwrap().local_named(name).unwrap()
    }

    fn stmt(program: &Program, pos: usize) -> StmtId {
        program.method_named("main").unwrap().source_stmts[pos]
    }

    fn edge_at(program: &Program, pos: usize, fact: AccessPath) -> PathEdge {
        let alloc = stmt(program, 2);
        PathEdge::new(
            Some(alloc),
            AccessPath::local(local(program, "o")).with_allocation_site(alloc, false),
            stmt(program, pos),
            fact,
        )
    }

    fn field(program: &Program, name: &str) -> Field {
        Field::new(program.field_named(name).unwrap())
    }

    #[test]
    fn test_copy_generates_and_keeps_source() {
        let program = program();
        let config = AnalysisConfig::default();
        let flow = ForwardFlowFunctions::new(FlowContext::new(&program, &config));
        let a = AccessPath::local(local(&program, "a"));

        let out = flow.normal(&edge_at(&program, 1, a.clone()), stmt(&program, 2)).unwrap();
        assert_eq!(out.targets, vec![a.clone(), a.with_base(local(&program, "b"))]);
        assert!(out.effects.is_empty());
    }

    #[test]
    fn test_store_registers_write_poi() {
        let program = program();
        let config = AnalysisConfig::default();
        let limits = FieldLimits::default();
        let flow = ForwardFlowFunctions::new(FlowContext::new(&program, &config));
        let o = AccessPath::local(local(&program, "o"));
        let b = local(&program, "b");
        let edge = edge_at(&program, 3, o.clone());

        let out = flow.normal(&edge, stmt(&program, 4)).unwrap();
        let stored = AccessPath::new(b, vec![field(&program, "f")], limits);
        assert_eq!(out.targets, vec![o, stored.clone()]);
        assert_eq!(
            out.effects,
            vec![Effect::RegisterPoi {
                kind: PoiKind::Write,
                stmt: stmt(&program, 3),
                fact: AccessPath::local(b),
                callback: AliasCallback::forward_append(
                    edge.start,
                    edge.start_fact.clone(),
                    stmt(&program, 4),
                    stored.fields().unwrap().clone(),
                ),
            }]
        );
    }

    #[test]
    fn test_load_pops_and_strong_update_kills() {
        let program = program();
        let config = AnalysisConfig::default();
        let limits = FieldLimits::default();
        let flow = ForwardFlowFunctions::new(FlowContext::new(&program, &config));
        let b_f = AccessPath::new(local(&program, "b"), vec![field(&program, "f")], limits);

        let load = flow.normal(&edge_at(&program, 4, b_f.clone()), stmt(&program, 5)).unwrap();
        assert_eq!(
            load.targets,
            vec![b_f.clone(), AccessPath::local(local(&program, "x"))]
        );

        // b.f = o overwrites b.f
        let store = flow.normal(&edge_at(&program, 3, b_f), stmt(&program, 4)).unwrap();
        assert!(store.targets.is_empty());
    }

    #[test]
    fn test_static_store() {
        let program = program();
        let config = AnalysisConfig::default();
        let flow = ForwardFlowFunctions::new(FlowContext::new(&program, &config));
        let o = AccessPath::local(local(&program, "o"));

        let out = flow.normal(&edge_at(&program, 6, o.clone()), stmt(&program, 6)).unwrap();
        assert_eq!(out.targets.len(), 2);
        assert!(out.targets[1].is_static());
        assert_eq!(program.describe_path(&out.targets[1]), "A::s");
    }

    #[test]
    fn test_call_maps_arguments_and_receiver() {
        let program = program();
        let config = AnalysisConfig::default();
        let flow = ForwardFlowFunctions::new(FlowContext::new(&program, &config));
        let run = program.method_named("A.run").unwrap();
        let call_site = stmt(&program, 5);
        let o = AccessPath::local(local(&program, "o"));

        let out = flow.call(&edge_at(&program, 5, o.clone()), run.id, run.start_points[0]).unwrap();
        assert_eq!(out.targets, vec![o.with_base(run.params[0])]);

        let o_across = flow.call_to_return(&edge_at(&program, 5, o.clone()), stmt(&program, 6), &[run.id]).unwrap();
        assert!(o_across.targets.is_empty());
        let o_library = flow.call_to_return(&edge_at(&program, 5, o.clone()), stmt(&program, 6), &[]).unwrap();
        assert_eq!(o_library.targets, vec![o]);

        // the returned local flows into the call result
        let r = AccessPath::local(run.local_named("r").unwrap());
        let exit = PathEdge::self_loop(run.start_points[0], r.clone()).extend(run.end_points[0], r);
        let back = flow.return_flow(&exit, call_site, run.id, stmt(&program, 6)).unwrap();
        assert_eq!(back.targets, vec![AccessPath::local(local(&program, "x"))]);
    }

    #[test]
    fn test_receiver_type_filter() {
        let program = ProgramBuilder::new()
            .class("A", None)
            .class("B", None)
            .method(MethodSpec::new("run").on("A").body(&["nop"]))
            .method(MethodSpec::new("run").on("B").body(&["nop"]))
            .method(
                MethodSpec::new("main")
                    .entry()
                    .local("x", "Object")
                    .body(&["x = new B", "call x.run()"]),
            )
            .build()
            .unwrap();
        let config = AnalysisConfig::default();
        let flow = ForwardFlowFunctions::new(FlowContext::new(&program, &config));
        let main = program.method_named("main").unwrap();
        let x = AccessPath::local(main.local_named("x").unwrap());
        let alloc = main.source_stmts[0];
        let edge = PathEdge::new(
            Some(alloc),
            x.with_allocation_site(alloc, false),
            main.source_stmts[1],
            x.clone(),
        );

        let a_run = program.method_named("A.run").unwrap();
        let b_run = program.method_named("B.run").unwrap();
        assert!(program.callees_of_call_at(main.source_stmts[1]).contains(&a_run.id));
        assert!(flow.call(&edge, a_run.id, a_run.start_points[0]).unwrap().targets.is_empty());
        assert_eq!(
            flow.call(&edge, b_run.id, b_run.start_points[0]).unwrap().targets,
            vec![x.with_base(b_run.this.unwrap())]
        );
    }
}
