//! Backward flow functions
//!
//! Walk from a use of a value towards the statements that could have
//! created it. Reaching such a statement yields an `Effect::Allocation`
//! instead of a target fact; the engine turns it into forward propagation.

use super::{Effect, FlowContext, FlowFunctions, FlowOutput};
use crate::allocation::AllocationSiteClassifier;
use crate::path_edge::PathEdge;
use ricochet_core::{AccessPath, FieldId, Local, MethodId, Result, StmtId};
use ricochet_program::{Operand, Place, Rvalue, Stmt};

pub struct BackwardFlowFunctions<'a> {
    cx: FlowContext<'a>,
    classifier: &'a dyn AllocationSiteClassifier,
}

impl<'a> BackwardFlowFunctions<'a> {
    pub fn new(cx: FlowContext<'a>, classifier: &'a dyn AllocationSiteClassifier) -> Self {
        Self { cx, classifier }
    }

    /// `x = rhs` where the fact is based on `x`
    fn assigned(&self, curr: StmtId, rhs: &Rvalue, source: &AccessPath, out: &mut FlowOutput) {
        if let Some(allocation) = self.classifier.assign(rhs, source) {
            out.effect(Effect::Allocation {
                stmt: curr,
                fact: source.clone(),
                is_null: allocation.is_null,
            });
            return;
        }
        let config = self.cx.config;
        match rhs {
            Rvalue::Local(y) | Rvalue::Cast { local: y, .. } => out.push(source.with_base(*y)),
            Rvalue::Field { base, field } => {
                let field = self.cx.field(*field, curr);
                out.push(source.with_base(*base).prepend_field(field, self.cx.limits));
            }
            Rvalue::Array(base) if config.handle_arrays => {
                let field = self.cx.field(FieldId::ARRAY, curr);
                out.push(source.prepend_field(field, self.cx.limits).with_base(*base));
            }
            Rvalue::Static(field) if config.track_static_fields => {
                let field = self.cx.field(*field, curr);
                let stored = source.prepend_field(field, self.cx.limits).make_static();
                if stored.has_set_based_fields() {
                    out.push(source.drop_tail().prepend_field(field, self.cx.limits).make_static());
                } else {
                    out.push(stored);
                }
            }
            // overwritten by a value that never carries the fact
            _ => {}
        }
    }

    /// `base.field = rhs` where the fact's first field may be `field`
    fn field_written(
        &self,
        curr: StmtId,
        base: Local,
        field: FieldId,
        rhs: &Rvalue,
        source: &AccessPath,
        out: &mut FlowOutput,
    ) -> Result<()> {
        if !source.base_matches(base) {
            // `base` may alias the fact's base; look for the value written
            out.push(source.clone());
            if let Rvalue::Local(y) = rhs {
                for rest in source.pop_first_field()? {
                    out.effect(Effect::SeedBackward {
                        stmt: curr,
                        fact: rest.with_base(*y).without_allocation_site(),
                    });
                }
            }
            return Ok(());
        }

        if let Some(allocation) = self.classifier.field_store(rhs, source) {
            out.effect(Effect::Allocation {
                stmt: curr,
                fact: source.clone(),
                is_null: allocation.is_null,
            });
        }
        let must = source.first_field_must_match(field);
        match rhs {
            Rvalue::Local(y) => {
                for rest in source.pop_first_field()? {
                    out.push(rest.with_base(*y));
                }
                if !must {
                    out.push(source.clone());
                }
            }
            Rvalue::Null | Rvalue::Constant => {
                if !must {
                    out.push(source.clone());
                }
            }
            _ => out.push(source.clone()),
        }
        Ok(())
    }
}

impl FlowFunctions for BackwardFlowFunctions<'_> {
    fn normal(&self, edge: &PathEdge, _succ: StmtId) -> Result<FlowOutput> {
        let curr = edge.target;
        let source = &edge.target_fact;
        let Stmt::Assign { lhs, rhs } = self.cx.icfg.stmt(curr) else {
            return Ok(FlowOutput::identity(source));
        };
        let config = self.cx.config;

        let mut out = FlowOutput::default();
        match lhs {
            Place::Local(local) if source.base_matches(*local) => {
                self.assigned(curr, rhs, source, &mut out);
            }
            Place::Array(base) if config.handle_arrays && source.base_and_first_field_match(*base, FieldId::ARRAY) => {
                if let Some(allocation) = self.classifier.array_store(rhs, source) {
                    out.effect(Effect::Allocation {
                        stmt: curr,
                        fact: source.clone(),
                        is_null: allocation.is_null,
                    });
                    return Ok(out);
                }
                out.push(source.clone());
                if let Rvalue::Local(y) = rhs {
                    for rest in source.with_base(*y).pop_first_field()? {
                        out.push(rest);
                    }
                }
            }
            Place::Field { base, field } if !source.is_static() && source.first_field_may_match(*field) => {
                self.field_written(curr, *base, *field, rhs, source, &mut out)?;
            }
            Place::Static(field)
                if config.track_static_fields && source.is_static() && source.first_field_must_match(*field) =>
            {
                match rhs {
                    Rvalue::Local(y) => self.cx.pop_into(source, *y, &mut out)?,
                    _ => {
                        if let Some(allocation) = self.classifier.field_store(rhs, source) {
                            out.effect(Effect::Allocation {
                                stmt: curr,
                                fact: source.clone(),
                                is_null: allocation.is_null,
                            });
                        }
                    }
                }
            }
            _ => out.push(source.clone()),
        }
        Ok(out)
    }

    fn call(&self, edge: &PathEdge, callee: MethodId, callee_start: StmtId) -> Result<FlowOutput> {
        let call_site = edge.target;
        let source = &edge.target_fact;
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
        // a bare argument cannot be changed by the callee
        if source.has_fields() {
            for position in call.arg_positions(base) {
                if let Some(param) = method.params.get(position) {
                    out.push(source.with_base(*param));
                }
            }
        }
        if let (Some(this), Some(receiver)) = (method.this, call.receiver) {
            if receiver == base {
                out.push(source.with_base(this));
            }
        }
        if call_stmt.call_result() == Some(base) {
            let returned = match self.cx.icfg.stmt(callee_start) {
                Stmt::Return(operand) => operand.as_ref(),
                _ => None,
            };
            if let Some(Operand::Local(returned)) = returned {
                out.push(source.with_base(*returned));
            }
            if let Some(allocation) = self.classifier.return_via_call(returned, source) {
                out.kill_all();
                out.effect(Effect::Allocation {
                    stmt: call_site,
                    fact: source.clone(),
                    is_null: allocation.is_null,
                });
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
        let Some(call) = self.cx.icfg.stmt(call_site).call() else {
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
                // a field of a fresh object the constructor never wrote
                if method.is_constructor && source.field_count() == 1 {
                    let caller = self.cx.icfg.method(self.cx.icfg.method_of(call_site));
                    if !caller.is_constructor || caller.this != Some(receiver) {
                        out.kill_all();
                        out.effect(Effect::Allocation {
                            stmt: exit_edge.target,
                            fact: source.clone(),
                            is_null: true,
                        });
                    }
                }
            }
        }
        Ok(out)
    }

    fn call_to_return(&self, edge: &PathEdge, _return_site: StmtId, callees: &[MethodId]) -> Result<FlowOutput> {
        let call_site = edge.target;
        let source = &edge.target_fact;
        let call_stmt = self.cx.icfg.stmt(call_site);
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

        let mut out = FlowOutput::default();
        if call_stmt.call_result() == Some(base) {
            // defined by the call; an unanalyzed callee is where it comes from
            if callees.is_empty() && !source.has_fields() {
                out.effect(Effect::Allocation {
                    stmt: call_site,
                    fact: source.clone(),
                    is_null: false,
                });
            }
            return Ok(out);
        }
        let flows_into_callee = source.has_fields() && call_stmt.call().map_or(false, |call| call.uses(base));
        if callees.is_empty() || !flows_into_callee {
            out.push(source.clone());
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocation::ReferenceTypeClassifier;
    use pretty_assertions::assert_eq;
    use ricochet_core::{AnalysisConfig, Field, FieldLimits};
    use ricochet_program::{Icfg, MethodSpec, Program, ProgramBuilder};

    fn program() -> Program {
        ProgramBuilder::new()
            .class("A", None)
            .method(
                MethodSpec::new("init")
                    .on("A")
                    .constructor()
                    .body(&["nop"]),
            )
            .method(
                MethodSpec::new("make")
                    .local("r", "A")
                    .body(&["r = new A", "return r"]),
            )
            .method(
                MethodSpec::new("main")
                    .entry()
                    .local("a", "A")
                    .local("b", "A")
                    .local("t", "Object")
                    .local("u", "Object")
                    .body(&[
                        "a = new A",
                        "b = a",
                        "t = new Object",
                        "b.f = t",
                        "u = a.f",
                        "a = call make()",
                        "u = call lib()",
                        "call a.init()",
                    ]),
            )
            .build()
            .unwrap()
    }

    fn main_local(program: &Program, name: &str) -> Local {
        program.method_named("main").unwrap().local_named(name).unwrap()
    }

    fn stmt(program: &Program, pos: usize) -> StmtId {
        program.method_named("main").unwrap().source_stmts[pos]
    }

    fn seed(program: &Program, pos: usize, fact: AccessPath) -> PathEdge {
        PathEdge::seed(stmt(program, pos), fact)
    }

    fn dot(program: &Program, base: &str, field: &str) -> AccessPath {
        AccessPath::new(
            main_local(program, base),
            vec![Field::new(program.field_named(field).unwrap())],
            FieldLimits::default(),
        )
    }

    #[test]
    fn test_allocation_ends_search() {
        let program = program();
        let config = AnalysisConfig::default();
        let flow = BackwardFlowFunctions::new(FlowContext::new(&program, &config), &ReferenceTypeClassifier);
        let t = AccessPath::local(main_local(&program, "t"));

        let out = flow.normal(&seed(&program, 2, t.clone()), stmt(&program, 1)).unwrap();
        assert!(out.targets.is_empty());
        assert_eq!(
            out.effects,
            vec![Effect::Allocation {
                stmt: stmt(&program, 2),
                fact: t,
                is_null: false,
            }]
        );

        // `a = new A` does not allocate `a.f`
        let a_f = dot(&program, "a", "f");
        let out = flow.normal(&seed(&program, 0, a_f), stmt(&program, 0)).unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn test_copy_and_load() {
        let program = program();
        let config = AnalysisConfig::default();
        let flow = BackwardFlowFunctions::new(FlowContext::new(&program, &config), &ReferenceTypeClassifier);

        let b = AccessPath::local(main_local(&program, "b"));
        let out = flow.normal(&seed(&program, 1, b), stmt(&program, 0)).unwrap();
        assert_eq!(out.targets, vec![AccessPath::local(main_local(&program, "a"))]);

        let u = AccessPath::local(main_local(&program, "u"));
        let out = flow.normal(&seed(&program, 4, u), stmt(&program, 3)).unwrap();
        assert_eq!(out.targets, vec![dot(&program, "a", "f")]);
    }

    #[test]
    fn test_store_through_other_base_seeds_value() {
        let program = program();
        let config = AnalysisConfig::default();
        let flow = BackwardFlowFunctions::new(FlowContext::new(&program, &config), &ReferenceTypeClassifier);
        let a_f = dot(&program, "a", "f");

        let out = flow.normal(&seed(&program, 3, a_f.clone()), stmt(&program, 2)).unwrap();
        assert_eq!(out.targets, vec![a_f]);
        assert_eq!(
            out.effects,
            vec![Effect::SeedBackward {
                stmt: stmt(&program, 3),
                fact: AccessPath::local(main_local(&program, "t")),
            }]
        );

        // through the same base the value written replaces the fact
        let b_f = dot(&program, "b", "f");
        let out = flow.normal(&seed(&program, 3, b_f), stmt(&program, 2)).unwrap();
        assert_eq!(out.targets, vec![AccessPath::local(main_local(&program, "t"))]);
        assert!(out.effects.is_empty());
    }

    #[test]
    fn test_call_result() {
        let program = program();
        let config = AnalysisConfig::default();
        let flow = BackwardFlowFunctions::new(FlowContext::new(&program, &config), &ReferenceTypeClassifier);
        let make = program.method_named("make").unwrap();
        let a = AccessPath::local(main_local(&program, "a"));

        let into = flow
            .call(&seed(&program, 5, a.clone()), make.id, make.end_points[0])
            .unwrap();
        assert_eq!(into.targets, vec![AccessPath::local(make.local_named("r").unwrap())]);

        let around = flow
            .call_to_return(&seed(&program, 5, a), stmt(&program, 4), &[make.id])
            .unwrap();
        assert!(around.is_empty());

        // an unresolved call defines its result
        let u = AccessPath::local(main_local(&program, "u"));
        let library = flow
            .call_to_return(&seed(&program, 6, u.clone()), stmt(&program, 5), &[])
            .unwrap();
        assert!(library.targets.is_empty());
        assert_eq!(
            library.effects,
            vec![Effect::Allocation {
                stmt: stmt(&program, 6),
                fact: u,
                is_null: false,
            }]
        );
    }

    #[test]
    fn test_constructor_turnaround() {
        let program = program();
        let config = AnalysisConfig::default();
        let flow = BackwardFlowFunctions::new(FlowContext::new(&program, &config), &ReferenceTypeClassifier);
        let init = program.method_named("A.init").unwrap();
        let this_f = AccessPath::new(
            init.this.unwrap(),
            vec![Field::new(program.field_named("f").unwrap())],
            FieldLimits::default(),
        );
        let entry = init.start_points[0];
        let exit_edge = PathEdge::new(Some(init.end_points[0]), this_f.clone(), entry, this_f.clone());

        let out = flow
            .return_flow(&exit_edge, stmt(&program, 7), init.id, stmt(&program, 6))
            .unwrap();
        assert!(out.targets.is_empty());
        assert_eq!(
            out.effects,
            vec![Effect::Allocation {
                stmt: entry,
                fact: this_f,
                is_null: true,
            }]
        );
    }
}
