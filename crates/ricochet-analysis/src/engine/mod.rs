//! Tabulation engine
//!
//! One `Solver` runs one query. It owns the state of both directions (path
//! edges, incomings, summaries and origin listeners), the POI callback
//! table, and the scheduler that interleaves the two directions.
//!
//! The worklist loop is shared. Each popped edge is classified by its
//! target (call site, exit, or anything else) and pushed through the flow
//! functions of its direction. Candidate edges then go through the
//! direction's extension hooks in `forward` and `backward`, which may park
//! them (unvisitable method, unresolved cast) instead of propagating.
//! Flow functions report side effects as `Effect`s; the solver applies
//! them here.

mod backward;
mod forward;

use crate::context::ContextRequester;
use crate::flow::{BackwardFlowFunctions, Effect, FlowContext, FlowFunctions, ForwardFlowFunctions};
use crate::incoming::{Incomings, Summaries};
use crate::listener::{Fired, OriginAction, OriginTracker, TrackerKey};
use crate::observer::AnalysisObserver;
use crate::path_edge::{Node, PathEdge};
use crate::poi::{AliasCallback, CallbackTable, PoiKind};
use crate::scheduler::{PoiTask, Scheduler, Task};
use crate::store::PathEdgeStore;
use crate::allocation::AllocationSiteClassifier;
use ricochet_core::{AccessPath, AnalysisConfig, Error, FieldLimits, MethodId, Result, StmtId, TypeId};
use ricochet_program::{Directed, Direction, Icfg};
use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

/// Counters of a finished (or timed out) query
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SolverStats {
    pub forward_edges: usize,
    pub backward_edges: usize,
    pub pois: usize,
    pub callbacks: usize,
    /// Edges still parked when the query ended
    pub paused_edges: usize,
    pub visitable_methods: usize,
    pub elapsed_ms: u64,
}

/// Solver state owned by one direction
#[derive(Debug)]
struct DirectionState {
    store: PathEdgeStore,
    incomings: Incomings,
    summaries: Summaries,
    origins: OriginTracker,
}

impl DirectionState {
    fn new(direction: Direction) -> Self {
        Self {
            store: PathEdgeStore::new(),
            incomings: Incomings::new(),
            summaries: Summaries::new(),
            origins: OriginTracker::new(direction),
        }
    }
}

pub struct Solver<'a> {
    icfg: &'a dyn Icfg,
    config: &'a AnalysisConfig,
    limits: FieldLimits,
    forward_flow: ForwardFlowFunctions<'a>,
    backward_flow: BackwardFlowFunctions<'a>,
    requester: &'a dyn ContextRequester,
    observer: &'a dyn AnalysisObserver,
    scheduler: Scheduler,
    forward: DirectionState,
    backward: DirectionState,
    callbacks: CallbackTable,
    visitable: FxHashSet<MethodId>,
    /// Edges waiting for their method to become visitable
    paused: FxHashMap<MethodId, Vec<(Direction, PathEdge)>>,
    /// Forward edges waiting at a cast
    paused_casts: FxHashMap<StmtId, Vec<PathEdge>>,
    active_casts: FxHashSet<StmtId>,
    /// Call sites the backward search entered a callee from, or expanded
    /// into after an unbalanced return; forward unbalanced returns go
    /// only there
    backward_call_sites: FxHashMap<MethodId, FxHashSet<StmtId>>,
}

impl<'a> Solver<'a> {
    pub fn new(
        icfg: &'a dyn Icfg,
        config: &'a AnalysisConfig,
        classifier: &'a dyn AllocationSiteClassifier,
        requester: &'a dyn ContextRequester,
        observer: &'a dyn AnalysisObserver,
    ) -> Self {
        let cx = FlowContext::new(icfg, config);
        Self {
            icfg,
            config,
            limits: cx.limits,
            forward_flow: ForwardFlowFunctions::new(cx),
            backward_flow: BackwardFlowFunctions::new(cx, classifier),
            requester,
            observer,
            scheduler: Scheduler::new(config.time_budget(), config.budget_check_interval),
            forward: DirectionState::new(Direction::Forward),
            backward: DirectionState::new(Direction::Backward),
            callbacks: CallbackTable::new(),
            visitable: FxHashSet::default(),
            paused: FxHashMap::default(),
            paused_casts: FxHashMap::default(),
            active_casts: FxHashSet::default(),
            backward_call_sites: FxHashMap::default(),
        }
    }

    /// Find the allocation sites of `fact` right before `stmt` executes and
    /// propagate them forward until nothing changes
    ///
    /// Returns `Error::Timeout` when the budget runs out; the state reached
    /// so far stays readable through the accessors.
    pub fn solve(&mut self, stmt: StmtId, fact: AccessPath) -> Result<()> {
        debug!("Solving {} at {}", fact, stmt);
        self.observer.query_started(stmt, &fact);
        self.make_visitable(self.icfg.method_of(stmt));
        self.seed_backward(stmt, fact);

        let result = self.run();
        self.observer
            .query_finished(matches!(result, Err(Error::Timeout { .. })));
        debug!(
            forward_edges = self.forward.store.len(),
            backward_edges = self.backward.store.len(),
            "Query done"
        );
        result
    }

    fn run(&mut self) -> Result<()> {
        while let Some(task) = self.scheduler.next()? {
            match task {
                Task::Edge(direction, edge) => self.process(direction, &edge)?,
                Task::Poi(task) => self.run_poi(task),
            }
        }
        Ok(())
    }

    pub fn forward_store(&self) -> &PathEdgeStore {
        &self.forward.store
    }

    pub fn forward_incomings(&self) -> &Incomings {
        &self.forward.incomings
    }

    pub fn backward_store(&self) -> &PathEdgeStore {
        &self.backward.store
    }

    pub fn is_visitable(&self, method: MethodId) -> bool {
        self.visitable.contains(&method)
    }

    pub fn stats(&self) -> SolverStats {
        SolverStats {
            forward_edges: self.forward.store.len(),
            backward_edges: self.backward.store.len(),
            pois: self.forward.store.poi_count(),
            callbacks: self.callbacks.len(),
            paused_edges: self.paused.values().map(Vec::len).sum::<usize>()
                + self.paused_casts.values().map(Vec::len).sum::<usize>(),
            visitable_methods: self.visitable.len(),
            elapsed_ms: self.scheduler.elapsed().as_millis() as u64,
        }
    }

    fn state(&self, direction: Direction) -> &DirectionState {
        match direction {
            Direction::Forward => &self.forward,
            Direction::Backward => &self.backward,
        }
    }

    fn state_mut(&mut self, direction: Direction) -> &mut DirectionState {
        match direction {
            Direction::Forward => &mut self.forward,
            Direction::Backward => &mut self.backward,
        }
    }

    fn flow(&self, direction: Direction) -> &dyn FlowFunctions {
        match direction {
            Direction::Forward => &self.forward_flow,
            Direction::Backward => &self.backward_flow,
        }
    }

    fn process(&mut self, direction: Direction, edge: &PathEdge) -> Result<()> {
        let directed = Directed::new(self.icfg, direction);
        if directed.is_call_stmt(edge.target) {
            return self.process_call(direction, edge);
        }
        if directed.is_exit_stmt(edge.target) {
            self.process_exit(direction, edge)?;
        }
        self.process_normal(direction, edge)
    }

    fn process_normal(&mut self, direction: Direction, edge: &PathEdge) -> Result<()> {
        let directed = Directed::new(self.icfg, direction);
        for &succ in directed.succs_of(edge.target) {
            let out = self.flow(direction).normal(edge, succ)?;
            self.apply_effects(edge, out.effects);
            for fact in out.targets {
                let next = edge.extend(succ, fact);
                let next = match direction {
                    Direction::Forward => self.forward_normal_extend(edge, next),
                    Direction::Backward => self.backward_normal_extend(next),
                };
                if let Some(next) = next {
                    self.propagate(direction, next);
                }
            }
        }
        Ok(())
    }

    fn process_call(&mut self, direction: Direction, edge: &PathEdge) -> Result<()> {
        let icfg = self.icfg;
        let directed = Directed::new(icfg, direction);
        let call_site = edge.target;
        let caller = icfg.method_of(call_site);
        let callees: Vec<MethodId> = icfg
            .callees_of_call_at(call_site)
            .iter()
            .copied()
            .filter(|callee| !icfg.is_ignored_method(*callee))
            .collect();

        for &callee in &callees {
            for &start in directed.start_points_of(callee) {
                let out = self.flow(direction).call(edge, callee, start)?;
                self.apply_effects(edge, out.effects);
                for fact in out.targets {
                    let entry = Node::new(Some(start), fact.clone());
                    let st = self.state_mut(direction);
                    if st.incomings.add(entry.clone(), edge.clone()) {
                        let fired = st.origins.on_incoming(
                            TrackerKey::new(callee, entry.clone()),
                            TrackerKey::new(caller, edge.start_node()),
                            &st.incomings,
                            icfg,
                        );
                        self.handle_fired(fired);
                        if direction == Direction::Backward {
                            self.backward_call_sites
                                .entry(callee)
                                .or_default()
                                .insert(call_site);
                        }
                    }

                    let self_loop = PathEdge::self_loop(start, fact);
                    let self_loop = match direction {
                        Direction::Forward => self.forward_call_extend(edge, self_loop, callee),
                        Direction::Backward => self.backward_call_extend(edge, self_loop, callee),
                    };
                    if let Some(self_loop) = self_loop {
                        self.propagate(direction, self_loop);
                    }

                    let exits: Vec<Node> = self.state(direction).summaries.get(&entry).cloned().collect();
                    for exit in exits {
                        let Some(exit_stmt) = exit.stmt else {
                            continue;
                        };
                        let exit_edge = PathEdge::new(entry.stmt, entry.fact.clone(), exit_stmt, exit.fact);
                        self.apply_return(direction, &exit_edge, callee, edge)?;
                    }
                }
            }
        }

        for &return_site in directed.return_sites_of(call_site) {
            let out = self.flow(direction).call_to_return(edge, return_site, &callees)?;
            self.apply_effects(edge, out.effects);
            for fact in out.targets {
                self.propagate(direction, edge.extend(return_site, fact));
            }
        }
        Ok(())
    }

    fn process_exit(&mut self, direction: Direction, edge: &PathEdge) -> Result<()> {
        let start = edge.start_node();
        let st = self.state_mut(direction);
        if !st.summaries.add(start.clone(), edge.target_node()) {
            return Ok(());
        }
        let incoming: Vec<PathEdge> = st.incomings.get(&start).cloned().collect();
        if incoming.is_empty() {
            return match direction {
                Direction::Forward => self.forward_unbalanced(edge),
                Direction::Backward => self.backward_unbalanced(edge),
            };
        }
        let callee = self.icfg.method_of(edge.target);
        for call_edge in &incoming {
            self.apply_return(direction, edge, callee, call_edge)?;
        }
        Ok(())
    }

    /// Return `exit_edge` of `callee` to the caller that `call_edge` came from
    fn apply_return(
        &mut self,
        direction: Direction,
        exit_edge: &PathEdge,
        callee: MethodId,
        call_edge: &PathEdge,
    ) -> Result<()> {
        let directed = Directed::new(self.icfg, direction);
        let call_site = call_edge.target;
        for &return_site in directed.return_sites_of(call_site) {
            let out = self
                .flow(direction)
                .return_flow(exit_edge, call_site, callee, return_site)?;
            self.apply_effects(exit_edge, out.effects);
            for fact in out.targets {
                let next = call_edge.extend(return_site, fact);
                let next = match direction {
                    Direction::Forward => self.forward_balanced_extend(exit_edge, next, call_edge)?,
                    Direction::Backward => self.backward_balanced_extend(next, call_edge),
                };
                if let Some(next) = next {
                    self.propagate(direction, next);
                }
            }
        }
        Ok(())
    }

    /// Register an edge and schedule it; alias notifications the edge
    /// triggers are delivered right away
    fn propagate(&mut self, direction: Direction, edge: PathEdge) {
        let icfg = self.icfg;
        let mut pending = vec![(direction, edge)];
        while let Some((direction, edge)) = pending.pop() {
            if let Some(start) = edge.start {
                assert_eq!(
                    icfg.method_of(start),
                    icfg.method_of(edge.target),
                    "path edge {} spans two methods",
                    edge
                );
            }
            let st = self.state_mut(direction);
            let Some(notes) = st.store.register(&edge, &st.incomings) else {
                continue;
            };
            trace!("{} {}", direction, edge);
            self.observer.edge_created(direction, &edge);
            for note in &notes {
                if let Some(injected) = self.callbacks.fire(note, self.limits) {
                    pending.push((Direction::Forward, injected));
                }
            }
            self.scheduler.push_edge(direction, edge);
        }
    }

    fn apply_effects(&mut self, edge: &PathEdge, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::SeedBackward { stmt, fact } => self.seed_backward(stmt, fact),
                Effect::RegisterPoi {
                    kind,
                    stmt,
                    fact,
                    callback,
                } => self.register_poi(kind, stmt, fact, callback),
                Effect::Allocation { stmt, fact, is_null } => {
                    self.allocation_reached(edge, stmt, fact, is_null, PoiKind::Allocation)
                }
            }
        }
    }

    /// Start a backward search for `fact` as it holds right before `stmt`
    fn seed_backward(&mut self, stmt: StmtId, fact: AccessPath) {
        let method = self.icfg.method_of(stmt);
        for &pred in self.icfg.preds_of(stmt) {
            let edge = PathEdge::seed(pred, fact.clone());
            if self.is_visitable(method) {
                self.propagate(Direction::Backward, edge);
            } else {
                self.pause(method, Direction::Backward, edge);
            }
        }
    }

    /// Forward propagation of `fact` from the allocation at `stmt`
    fn start_forward(&mut self, stmt: StmtId, alloc: AccessPath, fact: AccessPath) {
        debug!("Forward from {} at {}", alloc, stmt);
        let method = self.icfg.method_of(stmt);
        for &succ in self.icfg.succs_of(stmt) {
            let edge = PathEdge::new(Some(stmt), alloc.clone(), succ, fact.clone());
            if self.is_visitable(method) {
                self.propagate(Direction::Forward, edge);
            } else {
                self.pause(method, Direction::Forward, edge);
            }
        }
    }

    fn run_poi(&mut self, task: PoiTask) {
        match task {
            PoiTask::SeedBackward { stmt, fact } => self.seed_backward(stmt, fact),
            PoiTask::StartForward { stmt, alloc, fact } => self.start_forward(stmt, alloc, fact),
        }
    }

    /// Subscribe `callback` to the forward aliases of `fact` at `stmt`; the
    /// first registration of a POI also searches for its allocations
    fn register_poi(&mut self, kind: PoiKind, stmt: StmtId, fact: AccessPath, callback: AliasCallback) {
        let id = self.callbacks.intern(callback);
        let st = &mut self.forward;
        let (first, notes) = st
            .store
            .register_poi(stmt, fact.erased(), id, &st.incomings);
        for note in &notes {
            if let Some(injected) = self.callbacks.fire(note, self.limits) {
                self.propagate(Direction::Forward, injected);
            }
        }
        if first {
            debug!("{:?} POI {} at {}", kind, fact, stmt);
            self.observer.poi_registered(kind, stmt, &fact);
            self.scheduler.push_poi(
                kind,
                PoiTask::SeedBackward {
                    stmt,
                    fact: fact.without_allocation_site(),
                },
            );
        }
    }

    /// The backward search found where the value of `fact` is created;
    /// send it forward once `edge` is known to stem from a seed
    fn allocation_reached(&mut self, edge: &PathEdge, stmt: StmtId, fact: AccessPath, is_null: bool, kind: PoiKind) {
        let icfg = self.icfg;
        self.observer.allocation_reached(stmt, &fact);
        let key = TrackerKey::new(icfg.method_of(edge.target), edge.start_node());
        let action = OriginAction::SendForward {
            stmt,
            fact,
            is_null,
            kind,
        };
        let fired = self
            .backward
            .origins
            .attach(key, action, &self.backward.incomings, icfg);
        self.handle_fired(fired);
    }

    /// Attach a forward origin listener to the start node of `edge`
    fn on_forward_origin(&mut self, edge: &PathEdge, action: OriginAction) {
        let icfg = self.icfg;
        let key = TrackerKey::new(icfg.method_of(edge.target), edge.start_node());
        let fired = self
            .forward
            .origins
            .attach(key, action, &self.forward.incomings, icfg);
        self.handle_fired(fired);
    }

    fn handle_fired(&mut self, fired: Vec<Fired>) {
        for Fired { action, origin } in fired {
            match action {
                OriginAction::ActivateCast { cast_stmt, ty } => {
                    if self.origin_type_fits(&origin, ty) {
                        self.activate_cast(cast_stmt);
                    }
                }
                OriginAction::MakeVisitable { callee, this_type } => {
                    if this_type.map_or(true, |ty| self.origin_type_fits(&origin, ty)) {
                        self.make_visitable(callee);
                    }
                }
                OriginAction::SendForward {
                    stmt,
                    fact,
                    is_null,
                    kind,
                } => {
                    if self.allocation_fits(stmt, &fact, &origin) {
                        debug!("Allocation {} at {} reaches seed {}", fact, stmt, origin);
                        self.scheduler.push_poi(
                            kind,
                            PoiTask::StartForward {
                                stmt,
                                alloc: fact.with_allocation_site(stmt, is_null),
                                fact: fact.without_allocation_site(),
                            },
                        );
                    }
                }
                OriginAction::Relay(_) => {}
            }
        }
    }

    /// Whether the object a forward origin allocates may be a `ty`
    fn origin_type_fits(&self, origin: &Node, ty: TypeId) -> bool {
        origin
            .fact
            .allocation_site()
            .and_then(|site| self.icfg.allocation_type(site.point))
            .map_or(true, |allocated| self.icfg.can_store(allocated, ty))
    }

    /// Whether an allocation found backward may be the value of the seed
    /// `origin`; only bare locals are compared
    fn allocation_fits(&self, stmt: StmtId, fact: &AccessPath, origin: &Node) -> bool {
        if fact.has_fields() || origin.fact.has_fields() {
            return true;
        }
        let allocated = self
            .icfg
            .allocation_type(stmt)
            .or_else(|| fact.base().and_then(|base| self.icfg.reference_type(base)));
        let expected = origin.fact.base().and_then(|base| self.icfg.reference_type(base));
        match (allocated, expected) {
            (Some(allocated), Some(expected)) => self.icfg.can_store(allocated, expected),
            _ => true,
        }
    }

    fn make_visitable(&mut self, method: MethodId) {
        if !self.visitable.insert(method) {
            return;
        }
        debug!("Method {} is visitable", method);
        for (direction, edge) in self.paused.remove(&method).unwrap_or_default() {
            self.propagate(direction, edge);
        }
    }

    fn pause(&mut self, method: MethodId, direction: Direction, edge: PathEdge) {
        trace!("Pausing {} edge {} until {} is visitable", direction, edge, method);
        self.paused.entry(method).or_default().push((direction, edge));
    }

    fn activate_cast(&mut self, cast_stmt: StmtId) {
        if !self.active_casts.insert(cast_stmt) {
            return;
        }
        debug!("Cast at {} activated", cast_stmt);
        for edge in self.paused_casts.remove(&cast_stmt).unwrap_or_default() {
            self.propagate(Direction::Forward, edge);
        }
    }
}
