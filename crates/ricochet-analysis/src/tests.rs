use super::*;
use pretty_assertions::assert_eq;
use ricochet_core::{AccessPath, AnalysisConfig, Error, StmtId};
use ricochet_program::{Icfg, MethodSpec, Program, ProgramBuilder};
use std::collections::{BTreeSet, HashSet};

/// `a` and `b` alias; `t` is stored through `b` and read back through `a`
fn aliased_store() -> Program {
    ProgramBuilder::new()
        .class("A", None)
        .method(
            MethodSpec::new("main")
                .entry()
                .local("a", "A")
                .local("b", "A")
                .local("t", "Object")
                .body(&["a = new A", "b = a", "t = new Object", "b.f = t", "q: nop"]),
        )
        .build()
        .unwrap()
}

fn point(program: &Program, method: &str, at: &str) -> StmtId {
    let method = program.method_named(method).unwrap().id;
    program.resolve_point(method, at).unwrap()
}

fn path(program: &Program, method: &str, text: &str, config: &AnalysisConfig) -> AccessPath {
    let method = program.method_named(method).unwrap().id;
    program
        .parse_access_path(method, text, config.field_limits())
        .unwrap()
}

/// Allocation statements whose forward propagation reaches `fact` at `stmt`
fn allocation_points(solver: &Solver<'_>, stmt: StmtId, fact: &AccessPath) -> BTreeSet<StmtId> {
    let mut points = BTreeSet::new();
    let mut seen = HashSet::new();
    let mut stack: Vec<Node> = solver
        .forward_store()
        .origins_of(stmt, &fact.erased())
        .cloned()
        .collect();
    while let Some(node) = stack.pop() {
        if !seen.insert(node.clone()) {
            continue;
        }
        if let Some(site) = node.fact.allocation_site() {
            points.insert(site.point);
            continue;
        }
        stack.extend(solver.forward_incomings().get(&node).map(PathEdge::start_node));
    }
    points
}

/// A store through one alias is seen through the other
#[test]
fn test_store_through_alias() {
    let program = aliased_store();
    let config = AnalysisConfig::default();
    let q = point(&program, "main", "q");
    let fact = path(&program, "main", "a.f", &config);

    let mut solver = Solver::new(&program, &config, &ReferenceTypeClassifier, &AllCallersRequester, &NoopObserver);
    solver.solve(q, fact.clone()).unwrap();

    let t_alloc = point(&program, "main", "2");
    assert_eq!(allocation_points(&solver, q, &fact), BTreeSet::from([t_alloc]));
}

/// The aliases found for `a.f` include the path it was stored through
#[test]
fn test_alias_facts_at_query() {
    let program = aliased_store();
    let config = AnalysisConfig::default();
    let q = point(&program, "main", "q");
    let fact = path(&program, "main", "a.f", &config);

    let mut solver = Solver::new(&program, &config, &ReferenceTypeClassifier, &AllCallersRequester, &NoopObserver);
    solver.solve(q, fact.clone()).unwrap();

    let origin = solver
        .forward_store()
        .origins_of(q, &fact.erased())
        .next()
        .cloned()
        .unwrap();
    let facts: BTreeSet<String> = solver
        .forward_store()
        .targets_of(q, &origin)
        .map(|ap| program.describe_path(ap))
        .collect();
    assert_eq!(
        facts,
        BTreeSet::from(["a.f".to_string(), "b.f".to_string(), "t".to_string()])
    );
}

/// A query on a path nothing writes finds no allocation
#[test]
fn test_unwritten_field_has_no_origin() {
    let program = aliased_store();
    let config = AnalysisConfig::default();
    let q = point(&program, "main", "q");
    let fact = path(&program, "main", "a.g", &config);

    let mut solver = Solver::new(&program, &config, &ReferenceTypeClassifier, &AllCallersRequester, &NoopObserver);
    solver.solve(q, fact.clone()).unwrap();
    assert!(allocation_points(&solver, q, &fact).is_empty());
}

/// An empty budget stops the query at the first check
#[test]
fn test_timeout() {
    let program = aliased_store();
    let config = AnalysisConfig {
        time_budget_ms: 0,
        budget_check_interval: 1,
        ..Default::default()
    };
    let q = point(&program, "main", "q");
    let fact = path(&program, "main", "a.f", &config);
    let observer = RecordingObserver::new();

    let mut solver = Solver::new(&program, &config, &ReferenceTypeClassifier, &AllCallersRequester, &observer);
    let result = solver.solve(q, fact);
    assert!(matches!(result, Err(Error::Timeout { budget_ms: 0, .. })));
    assert_eq!(RecordingObserver::count(&observer.timeouts), 1);
}

/// Observer hooks see the query, both directions and the write POI
#[test]
fn test_recording_observer() {
    let program = aliased_store();
    let config = AnalysisConfig::default();
    let q = point(&program, "main", "q");
    let fact = path(&program, "main", "a.f", &config);
    let observer = RecordingObserver::new();

    let mut solver = Solver::new(&program, &config, &ReferenceTypeClassifier, &AllCallersRequester, &observer);
    solver.solve(q, fact).unwrap();

    let stats = solver.stats();
    assert_eq!(RecordingObserver::count(&observer.queries), 1);
    assert_eq!(RecordingObserver::count(&observer.timeouts), 0);
    assert_eq!(RecordingObserver::count(&observer.forward_edges), stats.forward_edges);
    assert_eq!(RecordingObserver::count(&observer.backward_edges), stats.backward_edges);
    assert!(RecordingObserver::count(&observer.allocations) >= 2);
    assert!(RecordingObserver::count(&observer.pois) >= 1);
    assert_eq!(stats.visitable_methods, 1);
}

/// Two solvers on the same query end in the same state
#[test]
fn test_solving_is_deterministic() {
    let program = aliased_store();
    let config = AnalysisConfig::default();
    let q = point(&program, "main", "q");
    let fact = path(&program, "main", "a.f", &config);

    let mut first = Solver::new(&program, &config, &ReferenceTypeClassifier, &AllCallersRequester, &NoopObserver);
    first.solve(q, fact.clone()).unwrap();
    let mut second = Solver::new(&program, &config, &ReferenceTypeClassifier, &AllCallersRequester, &NoopObserver);
    second.solve(q, fact.clone()).unwrap();

    let edges = |solver: &Solver<'_>| solver.forward_store().edges().cloned().collect::<HashSet<_>>();
    assert_eq!(edges(&first), edges(&second));
    assert_eq!(
        allocation_points(&first, q, &fact),
        allocation_points(&second, q, &fact)
    );
}

/// Backward search into a caller reaches the argument's allocation and the
/// forward pass returns it through the callee's parameter
#[test]
fn test_parameter_reaches_caller_allocation() {
    let program = ProgramBuilder::new()
        .class("A", None)
        .method(
            MethodSpec::new("main")
                .entry()
                .local("a", "A")
                .body(&["a = new A", "call use(a)"]),
        )
        .method(
            MethodSpec::new("use")
                .param("p", "A")
                .body(&["q: nop", "return"]),
        )
        .build()
        .unwrap();
    let config = AnalysisConfig::default();
    let q = point(&program, "use", "q");
    let fact = path(&program, "use", "p", &config);

    let mut solver = Solver::new(&program, &config, &ReferenceTypeClassifier, &AllCallersRequester, &NoopObserver);
    solver.solve(q, fact.clone()).unwrap();

    let main = program.method_named("main").unwrap().id;
    assert!(solver.is_visitable(main));
    assert_eq!(
        allocation_points(&solver, q, &fact),
        BTreeSet::from([point(&program, "main", "0")])
    );
}

/// Without context the parameter is its own origin, marked as null
#[test]
fn test_no_context_stops_at_parameter() {
    let program = ProgramBuilder::new()
        .class("A", None)
        .method(
            MethodSpec::new("main")
                .entry()
                .local("a", "A")
                .body(&["a = new A", "call use(a)"]),
        )
        .method(
            MethodSpec::new("use")
                .param("p", "A")
                .body(&["q: nop", "return"]),
        )
        .build()
        .unwrap();
    let config = AnalysisConfig::default();
    let q = point(&program, "use", "q");
    let fact = path(&program, "use", "p", &config);

    let mut solver = Solver::new(&program, &config, &ReferenceTypeClassifier, &NoContextRequester, &NoopObserver);
    solver.solve(q, fact.clone()).unwrap();

    let main = program.method_named("main").unwrap().id;
    assert!(!solver.is_visitable(main));
    let start = program.start_points_of(program.method_named("use").unwrap().id)[0];
    let origin = solver
        .forward_store()
        .origins_of(q, &fact.erased())
        .next()
        .cloned()
        .unwrap();
    let site = origin.fact.allocation_site().unwrap();
    assert_eq!(site.point, start);
    assert!(site.is_null);
}
