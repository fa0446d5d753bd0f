//! Origin listeners
//!
//! A listener waits until the start node of some path edge is connected to
//! an *origin*: in the forward direction a node whose fact carries an
//! allocation site, in the backward direction the start of a seed edge.
//! Nodes that are not origins themselves (callee entry self-loops) relay
//! the question to the start nodes of the call edges that entered them.
//!
//! The table is keyed by `(method, start node)`. Subscribers are plain
//! `OriginAction` values; when an origin is discovered the tracker hands
//! the action back to the engine as a `Fired` event instead of running it.
//! Discoveries are replayed to late subscribers, and every key remembers
//! which callers it already subscribed to, so cyclic call chains end.

use crate::incoming::Incomings;
use crate::path_edge::Node;
use crate::poi::PoiKind;
use ricochet_core::{AccessPath, MethodId, StmtId, TypeId};
use ricochet_program::{Direction, Icfg};
use rustc_hash::{FxHashMap, FxHashSet};
use std::collections::VecDeque;
use tracing::trace;

/// Listener table key
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TrackerKey {
    pub method: MethodId,
    pub node: Node,
}

impl TrackerKey {
    pub fn new(method: MethodId, node: Node) -> Self {
        Self { method, node }
    }
}

/// What to do once an origin is known
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum OriginAction {
    /// Release the edges parked at a cast to `ty`
    ActivateCast { cast_stmt: StmtId, ty: TypeId },
    /// Open `callee` once the receiver's allocated type fits `this_type`
    MakeVisitable { callee: MethodId, this_type: Option<TypeId> },
    /// Start forward propagation from an allocation reached backward
    SendForward {
        stmt: StmtId,
        fact: AccessPath,
        is_null: bool,
        kind: PoiKind,
    },
    /// Pass the origin on to another key
    Relay(TrackerKey),
}

/// An action whose origin has been discovered
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fired {
    pub action: OriginAction,
    pub origin: Node,
}

#[derive(Debug, Default)]
struct Listener {
    /// Caller keys already subscribed to
    triggered: FxHashSet<TrackerKey>,
    origins: Vec<Node>,
    seen_origins: FxHashSet<Node>,
    actions: Vec<OriginAction>,
}

enum Event {
    Attach(TrackerKey, OriginAction),
    Incoming { callee: TrackerKey, caller: TrackerKey },
    Discover(TrackerKey, Node),
}

/// Listener table of one direction
#[derive(Debug)]
pub struct OriginTracker {
    direction: Direction,
    listeners: FxHashMap<TrackerKey, Listener>,
}

impl OriginTracker {
    pub fn new(direction: Direction) -> Self {
        Self {
            direction,
            listeners: FxHashMap::default(),
        }
    }

    pub fn is_origin(&self, node: &Node) -> bool {
        match self.direction {
            Direction::Forward => node.fact.has_allocation_site(),
            Direction::Backward => node.stmt.is_none(),
        }
    }

    /// Subscribe `action` to the origins of `key`
    pub fn attach(
        &mut self,
        key: TrackerKey,
        action: OriginAction,
        incomings: &Incomings,
        icfg: &dyn Icfg,
    ) -> Vec<Fired> {
        self.drain(VecDeque::from([Event::Attach(key, action)]), incomings, icfg)
    }

    /// A call edge starting at `caller` entered the callee node of `callee`
    pub fn on_incoming(
        &mut self,
        callee: TrackerKey,
        caller: TrackerKey,
        incomings: &Incomings,
        icfg: &dyn Icfg,
    ) -> Vec<Fired> {
        if !self.listeners.contains_key(&callee) {
            return Vec::new();
        }
        self.drain(
            VecDeque::from([Event::Incoming { callee, caller }]),
            incomings,
            icfg,
        )
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    fn drain(&mut self, mut queue: VecDeque<Event>, incomings: &Incomings, icfg: &dyn Icfg) -> Vec<Fired> {
        let mut fired = Vec::new();
        while let Some(event) = queue.pop_front() {
            match event {
                Event::Attach(key, action) => {
                    let is_new = !self.listeners.contains_key(&key);
                    if is_new {
                        if self.is_origin(&key.node) {
                            queue.push_back(Event::Discover(key.clone(), key.node.clone()));
                        } else {
                            for call_edge in incomings.get(&key.node) {
                                queue.push_back(Event::Incoming {
                                    callee: key.clone(),
                                    caller: TrackerKey::new(icfg.method_of(call_edge.target), call_edge.start_node()),
                                });
                            }
                        }
                    }
                    let listener = self.listeners.entry(key).or_default();
                    if listener.actions.contains(&action) {
                        continue;
                    }
                    listener.actions.push(action.clone());
                    for origin in listener.origins.clone() {
                        Self::fire(&action, origin, &mut queue, &mut fired);
                    }
                }
                Event::Incoming { callee, caller } => {
                    let callee_is_origin = self.is_origin(&callee.node);
                    let caller_is_origin = self.is_origin(&caller.node);
                    let Some(listener) = self.listeners.get_mut(&callee) else {
                        continue;
                    };
                    if !listener.triggered.insert(caller.clone()) || callee_is_origin {
                        continue;
                    }
                    trace!("Listener {} relays to {}", callee.node, caller.node);
                    if caller_is_origin {
                        queue.push_back(Event::Discover(callee, caller.node));
                    } else {
                        queue.push_back(Event::Attach(caller, OriginAction::Relay(callee)));
                    }
                }
                Event::Discover(key, origin) => {
                    let Some(listener) = self.listeners.get_mut(&key) else {
                        continue;
                    };
                    if !listener.seen_origins.insert(origin.clone()) {
                        continue;
                    }
                    listener.origins.push(origin.clone());
                    for action in listener.actions.clone() {
                        Self::fire(&action, origin.clone(), &mut queue, &mut fired);
                    }
                }
            }
        }
        fired
    }

    fn fire(action: &OriginAction, origin: Node, queue: &mut VecDeque<Event>, fired: &mut Vec<Fired>) {
        match action {
            OriginAction::Relay(parent) => queue.push_back(Event::Discover(parent.clone(), origin)),
            other => fired.push(Fired {
                action: other.clone(),
                origin,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::path_edge::PathEdge;
    use pretty_assertions::assert_eq;
    use ricochet_core::Local;
    use ricochet_program::{MethodSpec, Program, ProgramBuilder};

    fn program() -> Program {
        ProgramBuilder::new()
            .method(
                MethodSpec::new("id")
                    .param("p", "Object")
                    .body(&["return p"]),
            )
            .method(
                MethodSpec::new("main")
                    .entry()
                    .local("o", "Object")
                    .local("x", "Object")
                    .body(&["o = new Object", "x = call id(o)", "return x"]),
            )
            .build()
            .unwrap()
    }

    fn cast(stmt: u32) -> OriginAction {
        OriginAction::ActivateCast {
            cast_stmt: StmtId(stmt),
            ty: TypeId(0),
        }
    }

    #[test]
    fn test_origin_fires_immediately() {
        let program = program();
        let main = program.method_named("main").unwrap();
        let alloc = main.source_stmts[0];
        let origin = Node::new(
            Some(alloc),
            AccessPath::local(Local(0)).with_allocation_site(alloc, false),
        );
        let mut tracker = OriginTracker::new(Direction::Forward);
        let fired = tracker.attach(
            TrackerKey::new(main.id, origin.clone()),
            cast(7),
            &Incomings::new(),
            &program,
        );
        assert_eq!(
            fired,
            vec![Fired {
                action: cast(7),
                origin,
            }]
        );
        assert_eq!(tracker.len(), 1);
    }

    #[test]
    fn test_relay_through_incoming_and_replay() {
        let program = program();
        let main = program.method_named("main").unwrap();
        let id = program.method_named("id").unwrap();
        let p = id.local_named("p").unwrap();
        let o = main.local_named("o").unwrap();
        let alloc = main.source_stmts[0];
        let call = main.source_stmts[1];
        let entry = id.start_points[0];

        let origin = Node::new(Some(alloc), AccessPath::local(o).with_allocation_site(alloc, false));
        let callee_node = Node::new(Some(entry), AccessPath::local(p));
        let call_edge = PathEdge::new(origin.stmt, origin.fact.clone(), call, AccessPath::local(o));

        let mut tracker = OriginTracker::new(Direction::Forward);
        let mut incomings = Incomings::new();
        let key = TrackerKey::new(id.id, callee_node.clone());

        // nothing known yet
        assert!(tracker.attach(key.clone(), cast(1), &incomings, &program).is_empty());

        incomings.add(callee_node.clone(), call_edge.clone());
        let fired = tracker.on_incoming(
            key.clone(),
            TrackerKey::new(main.id, call_edge.start_node()),
            &incomings,
            &program,
        );
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].origin, origin);

        // a second subscriber sees the earlier discovery
        let late = tracker.attach(key.clone(), cast(2), &incomings, &program);
        assert_eq!(late[0].action, cast(2));

        // the same caller again is absorbed
        let again = tracker.on_incoming(key, TrackerKey::new(main.id, call_edge.start_node()), &incomings, &program);
        assert!(again.is_empty());
    }

    #[test]
    fn test_backward_origin_is_seed() {
        let tracker = OriginTracker::new(Direction::Backward);
        assert!(tracker.is_origin(&Node::new(None, AccessPath::local(Local(0)))));
        assert!(!tracker.is_origin(&Node::new(Some(StmtId(1)), AccessPath::local(Local(0)))));
    }
}
