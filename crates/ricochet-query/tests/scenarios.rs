//! End-to-end alias queries over small programs

use pretty_assertions::assert_eq;
use ricochet_analysis::RecordingObserver;
use ricochet_core::config::ContextPolicy;
use ricochet_core::{AnalysisConfig, StmtId};
use ricochet_program::{MethodSpec, Program, ProgramBuilder};
use ricochet_query::{AliasFinder, AliasResults, Query};
use std::collections::BTreeSet;
use std::sync::Arc;

fn site(program: &Program, method: &str, at: &str) -> StmtId {
    let method = program.method_named(method).unwrap().id;
    program.resolve_point(method, at).unwrap()
}

fn run_with(program: &Program, config: AnalysisConfig, method: &str, at: &str, path: &str) -> AliasResults {
    let query = Query::parse(program, method, at, path, config.field_limits()).unwrap();
    AliasFinder::new(program, config).find_aliases(&query).unwrap()
}

fn run(program: &Program, method: &str, at: &str, path: &str) -> AliasResults {
    run_with(program, AnalysisConfig::default(), method, at, path)
}

fn described(program: &Program, results: &AliasResults) -> BTreeSet<String> {
    results
        .may_alias_set()
        .iter()
        .map(|ap| program.describe_path(ap))
        .collect()
}

fn linked_list() -> Program {
    ProgramBuilder::new()
        .class("Node", None)
        .method(
            MethodSpec::new("main")
                .entry()
                .local("n", "Node")
                .local("m", "Node")
                .body(&[
                    "n = new Node",
                    "head: m = new Node",
                    "m.next = n",
                    "n = m",
                    "if goto head",
                    "q: nop",
                ]),
        )
        .build()
        .unwrap()
}

/// A write through `b` is visible through its alias `a`
#[test]
fn test_field_write_through_alias() {
    let program = ProgramBuilder::new()
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
        .unwrap();

    let results = run(&program, "main", "q", "a.f");
    assert!(!results.timed_out());
    assert_eq!(results.allocation_sites(), BTreeSet::from([site(&program, "main", "2")]));
    let aliases = described(&program, &results);
    assert!(aliases.contains("a.f"));
    assert!(aliases.contains("b.f"));
    assert!(aliases.contains("t"));
}

/// A path longer than the field limit collapses to a set and still finds
/// the list nodes
#[test]
fn test_loop_with_deep_path() {
    let program = linked_list();
    let results = run(&program, "main", "q", "n.next.next.next.next.next.next");
    assert!(!results.timed_out());
    assert!(results.path().has_set_based_fields());
    let sites = results.allocation_sites();
    let first = site(&program, "main", "0");
    let looped = site(&program, "main", "head");
    assert!(sites.contains(&first));
    assert!(sites.is_subset(&BTreeSet::from([first, looped])));
}

/// Two parameters bound to the same argument alias inside the callee
#[test]
fn test_parameters_bound_to_one_argument() {
    let program = ProgramBuilder::new()
        .class("A", None)
        .method(
            MethodSpec::new("main")
                .entry()
                .local("a", "A")
                .body(&["a = new A", "call set(a, a)"]),
        )
        .method(
            MethodSpec::new("set")
                .param("p", "A")
                .param("q", "A")
                .local("o", "Object")
                .body(&["o = new Object", "p.f = o", "read: nop", "return"]),
        )
        .build()
        .unwrap();

    let results = run(&program, "set", "read", "q.f");
    assert_eq!(results.allocation_sites(), BTreeSet::from([site(&program, "set", "0")]));
    assert!(described(&program, &results).contains("p.f"));
}

/// A spent budget yields a flagged subset of the full answer
#[test]
fn test_timeout_returns_partial_subset() {
    let program = linked_list();
    let full = run(&program, "main", "q", "n.next");

    let config = AnalysisConfig {
        budget_check_interval: 1,
        ..Default::default()
    };
    let query = Query::parse(&program, "main", "q", "n.next", config.field_limits()).unwrap();
    let partial = AliasFinder::new(&program, config)
        .query(query.path.clone(), query.point, query.method, 0)
        .unwrap();

    assert!(partial.timed_out());
    assert!(!full.timed_out());
    assert!(partial.may_alias_set().is_subset(&full.may_alias_set()));
    assert!(partial.allocation_sites().is_subset(&full.allocation_sites()));
}

/// Results of one call site do not leak into another call of the same method
#[test]
fn test_context_sensitive_return() {
    let program = ProgramBuilder::new()
        .method(
            MethodSpec::new("main")
                .entry()
                .local("a", "Object")
                .local("b", "Object")
                .local("x", "Object")
                .local("y", "Object")
                .body(&[
                    "a = new Object",
                    "b = new Object",
                    "x = call id(a)",
                    "y = call id(b)",
                    "q: nop",
                ]),
        )
        .method(MethodSpec::new("id").param("p", "Object").body(&["return p"]))
        .build()
        .unwrap();

    let x = run(&program, "main", "q", "x");
    assert_eq!(x.allocation_sites(), BTreeSet::from([site(&program, "main", "0")]));
    let y = run(&program, "main", "q", "y");
    assert_eq!(y.allocation_sites(), BTreeSet::from([site(&program, "main", "1")]));
}

/// Without context the parameter itself is reported as a null origin
#[test]
fn test_no_context_reports_conservative_origin() {
    let program = ProgramBuilder::new()
        .method(
            MethodSpec::new("main")
                .entry()
                .local("a", "Object")
                .body(&["a = new Object", "call use(a)"]),
        )
        .method(
            MethodSpec::new("use")
                .param("p", "Object")
                .body(&["q: nop", "return"]),
        )
        .build()
        .unwrap();

    let config = AnalysisConfig {
        context: ContextPolicy::NoContext,
        ..Default::default()
    };
    let results = run_with(&program, config, "use", "q", "p");
    assert_eq!(results.len(), 1);
    assert!(results.iter().all(|(origin, _)| origin.is_null));
    assert!(results.without_null_allocation_sites().is_empty());

    let with_context = run(&program, "use", "q", "p");
    assert_eq!(
        with_context.allocation_sites(),
        BTreeSet::from([site(&program, "main", "0")])
    );
}

/// A value stored in a static field is read back in another method
#[test]
fn test_static_field_across_methods() {
    let program = ProgramBuilder::new()
        .class("A", None)
        .method(
            MethodSpec::new("main")
                .entry()
                .local("o", "Object")
                .body(&["o = new Object", "A::s = o", "call read()"]),
        )
        .method(
            MethodSpec::new("read")
                .local("x", "Object")
                .body(&["x = A::s", "q: nop", "return"]),
        )
        .build()
        .unwrap();

    let results = run(&program, "read", "q", "x");
    assert_eq!(results.allocation_sites(), BTreeSet::from([site(&program, "main", "0")]));
}

/// Array elements are tracked through the element pseudo-field
#[test]
fn test_array_element_round_trip() {
    let program = ProgramBuilder::new()
        .method(
            MethodSpec::new("main")
                .entry()
                .local("arr", "Object")
                .local("o", "Object")
                .local("x", "Object")
                .body(&["arr = newarray Object", "o = new Object", "arr[] = o", "x = arr[]", "q: nop"]),
        )
        .build()
        .unwrap();

    let results = run(&program, "main", "q", "x");
    assert_eq!(results.allocation_sites(), BTreeSet::from([site(&program, "main", "1")]));
    assert!(described(&program, &results).contains("arr[]"));

    let config = AnalysisConfig {
        handle_arrays: false,
        ..Default::default()
    };
    assert!(run_with(&program, config, "main", "q", "x").is_empty());
}

/// A cast passes values whose allocated type fits and holds back the rest
#[test]
fn test_cast_filters_by_allocation_type() {
    let program = ProgramBuilder::new()
        .class("A", None)
        .class("B", None)
        .method(
            MethodSpec::new("fits")
                .entry()
                .local("o", "Object")
                .local("x", "A")
                .body(&["o = new A", "x = (A) o", "q: nop"]),
        )
        .method(
            MethodSpec::new("clashes")
                .entry()
                .local("o", "Object")
                .local("x", "A")
                .body(&["o = new B", "x = (A) o", "q: nop"]),
        )
        .build()
        .unwrap();

    let fits = run(&program, "fits", "q", "x");
    assert_eq!(fits.allocation_sites(), BTreeSet::from([site(&program, "fits", "0")]));
    assert!(run(&program, "clashes", "q", "x").is_empty());
}

/// Observers see the query without changing its answer
#[test]
fn test_observer_does_not_change_results() {
    let program = linked_list();
    let config = AnalysisConfig::default();
    let query = Query::parse(&program, "main", "q", "n.next", config.field_limits()).unwrap();
    let observer = Arc::new(RecordingObserver::new());

    let observed = AliasFinder::new(&program, config.clone())
        .with_observer(observer.clone())
        .find_aliases(&query)
        .unwrap();
    let plain = AliasFinder::new(&program, config).find_aliases(&query).unwrap();

    assert_eq!(observed.may_alias_set(), plain.may_alias_set());
    assert_eq!(RecordingObserver::count(&observer.queries), 1);
    assert!(RecordingObserver::count(&observer.allocations) > 0);
}
