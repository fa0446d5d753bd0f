//! Query facade

use crate::query::Query;
use crate::results::{AliasResults, AllocationOrigin};
use ricochet_analysis::{
    classifier_for, requester_for, AllocationSiteClassifier, AnalysisObserver, ContextRequester, Node, Solver,
    TracingObserver,
};
use ricochet_core::{AccessPath, AnalysisConfig, Error, MethodId, Result, StmtId};
use ricochet_program::Icfg;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Answers alias queries over one program
///
/// Every query runs in a fresh solver; nothing carries over between
/// queries, so one finder can serve queries from several threads.
pub struct AliasFinder<'p> {
    icfg: &'p dyn Icfg,
    config: AnalysisConfig,
    classifier: Box<dyn AllocationSiteClassifier>,
    requester: Box<dyn ContextRequester>,
    observer: Arc<dyn AnalysisObserver>,
}

impl<'p> AliasFinder<'p> {
    pub fn new(icfg: &'p dyn Icfg, config: AnalysisConfig) -> Self {
        Self {
            icfg,
            classifier: classifier_for(config.allocation_sites),
            requester: requester_for(config.context),
            observer: Arc::new(TracingObserver),
            config,
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn AnalysisObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn with_requester(mut self, requester: Box<dyn ContextRequester>) -> Self {
        self.requester = requester;
        self
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    /// Aliases of `path` right before `point`, with a budget of its own
    pub fn query(&self, path: AccessPath, point: StmtId, method: MethodId, budget_ms: u64) -> Result<AliasResults> {
        let config = AnalysisConfig {
            time_budget_ms: budget_ms,
            ..self.config.clone()
        };
        self.run(&Query::new(point, path, method), &config)
    }

    /// Aliases for `query` under the configured budget
    pub fn find_aliases(&self, query: &Query) -> Result<AliasResults> {
        self.run(query, &self.config)
    }

    fn run(&self, query: &Query, config: &AnalysisConfig) -> Result<AliasResults> {
        self.validate(query)?;
        info!("Query {}", query);

        let mut solver = Solver::new(
            self.icfg,
            config,
            self.classifier.as_ref(),
            self.requester.as_ref(),
            self.observer.as_ref(),
        );
        let timed_out = match solver.solve(query.point, query.path.clone()) {
            Ok(()) => false,
            Err(Error::Timeout { elapsed_ms, budget_ms }) => {
                warn!(elapsed_ms, budget_ms, "Query {} timed out, results are partial", query);
                true
            }
            Err(e) => return Err(e),
        };

        let results = collect(&solver, query).finish(timed_out, solver.stats());
        debug!(origins = results.len(), "Query {} done", query);
        Ok(results)
    }

    /// Reject queries the solver cannot answer before anything runs
    fn validate(&self, query: &Query) -> Result<()> {
        let method = self.icfg.method(query.method);
        if self.icfg.method_of(query.point) != query.method {
            return Err(Error::InvalidQuery(format!(
                "statement {} is not in method {}",
                query.point, method.name
            )));
        }
        let Some(base) = query.path.base() else {
            // static field paths are in scope everywhere
            return Ok(());
        };
        if !method.locals.contains(&base) {
            return Err(Error::InvalidQuery(format!(
                "{} is not a local of method {}",
                base, method.name
            )));
        }
        if !self.icfg.is_reference_local(base) {
            return Err(Error::InvalidQuery(format!(
                "{} in method {} has a primitive type",
                base, method.name
            )));
        }
        Ok(())
    }
}

/// Group the aliases at the query point by their allocation origin
///
/// Forward facts at a statement are indexed by the start node of their
/// method; a start node that is a callee entry is followed through its
/// incoming call edges until an allocation-anchored node is reached.
fn collect(solver: &Solver<'_>, query: &Query) -> AliasResults {
    let mut results = AliasResults::new(query.point, query.path.clone());
    let store = solver.forward_store();
    let key = query.path.erased();
    for start in store.origins_of(query.point, &key) {
        let aliases: Vec<&AccessPath> = store.targets_of(query.point, start).collect();
        for origin in allocation_origins(solver, start) {
            for alias in &aliases {
                results.insert(origin.clone(), (*alias).clone());
            }
        }
    }
    results
}

fn allocation_origins(solver: &Solver<'_>, start: &Node) -> Vec<AllocationOrigin> {
    let mut origins = Vec::new();
    let mut seen = HashSet::new();
    let mut stack = vec![start.clone()];
    while let Some(node) = stack.pop() {
        if !seen.insert(node.clone()) {
            continue;
        }
        if let Some(site) = node.fact.allocation_site() {
            origins.push(AllocationOrigin {
                point: site.point,
                is_null: site.is_null,
                fact: node.fact.without_allocation_site(),
            });
            continue;
        }
        stack.extend(solver.forward_incomings().get(&node).map(|edge| edge.start_node()));
    }
    origins
}
