//! Per-statement path-edge store
//!
//! Every path edge is indexed at its target statement in two ways: origin
//! to facts (`forward`) and erased fact to origins (`reverse`). Two facts
//! at the same statement that share an origin are aliases there.
//!
//! Points of indirection live next to those indexes. Registering an edge or
//! a POI links origins to POIs and returns the alias notifications the
//! caller must deliver; the store itself never runs callbacks.
//!
//! Origins without an allocation site (a parameter entering at a method
//! start) are kept apart in `parameter_origin_to_poi`. Two such origins
//! alias when every caller context that reaches one also reaches the other
//! from a common origin, which `alias_in_context` decides by walking the
//! incoming call edges.

use crate::incoming::Incomings;
use crate::path_edge::{Node, PathEdge};
use crate::poi::{AliasNotification, CallbackId};
use ricochet_core::{AccessPath, StmtId};
use rustc_hash::{FxHashMap, FxHashSet};

#[derive(Debug, Default)]
struct StatementEdges {
    forward: FxHashMap<Node, FxHashSet<AccessPath>>,
    reverse: FxHashMap<AccessPath, FxHashSet<Node>>,
    pois: FxHashMap<AccessPath, Vec<CallbackId>>,
    origin_to_poi: FxHashMap<Node, FxHashSet<AccessPath>>,
    parameter_origin_to_poi: FxHashMap<Node, FxHashSet<AccessPath>>,
}

impl StatementEdges {
    fn notify_all(&self, key: &AccessPath, facts: &FxHashSet<AccessPath>, out: &mut Vec<AliasNotification>) {
        let Some(callbacks) = self.pois.get(key) else {
            return;
        };
        for alias in facts {
            for callback in callbacks {
                out.push(AliasNotification {
                    callback: *callback,
                    alias: alias.clone(),
                });
            }
        }
    }

    /// Facts of every other entry origin that aliases `origin` in context
    fn context_aliases<'a>(
        &'a self,
        origin: &'a Node,
        incomings: &'a Incomings,
    ) -> impl Iterator<Item = &'a FxHashSet<AccessPath>> + 'a {
        self.forward.iter().filter_map(move |(other, facts)| {
            let related = other != origin
                && other.stmt == origin.stmt
                && !other.fact.has_null_allocation_site()
                && alias_in_context(origin.stmt, &origin.fact, &other.fact, incomings);
            related.then_some(facts)
        })
    }

    /// Link `origin` to the POI `key` and notify its facts
    fn link(&mut self, origin: &Node, key: &AccessPath, incomings: &Incomings, out: &mut Vec<AliasNotification>) {
        let linked = self
            .origin_to_poi
            .entry(origin.clone())
            .or_default()
            .insert(key.clone());
        if linked {
            if let Some(facts) = self.forward.get(origin) {
                self.notify_all(key, facts, out);
            }
        }

        if origin.fact.has_allocation_site() {
            return;
        }
        let newly_parameter = self
            .parameter_origin_to_poi
            .entry(origin.clone())
            .or_default()
            .insert(key.clone());
        if newly_parameter {
            let aliased: Vec<FxHashSet<AccessPath>> =
                self.context_aliases(origin, incomings).cloned().collect();
            for facts in &aliased {
                self.notify_all(key, facts, out);
            }
        }
    }
}

/// Path edges of one direction, indexed per target statement
#[derive(Debug, Default)]
pub struct PathEdgeStore {
    edges: FxHashSet<PathEdge>,
    per_stmt: FxHashMap<StmtId, StatementEdges>,
    poi_count: usize,
}

impl PathEdgeStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an edge
    ///
    /// Returns `None` for an edge already present, otherwise the alias
    /// notifications the new fact triggers at its statement.
    pub fn register(&mut self, edge: &PathEdge, incomings: &Incomings) -> Option<Vec<AliasNotification>> {
        if !self.edges.insert(edge.clone()) {
            return None;
        }
        let origin = edge.start_node();
        let key = edge.target_fact.erased();
        let st = self.per_stmt.entry(edge.target).or_default();
        st.forward
            .entry(origin.clone())
            .or_default()
            .insert(edge.target_fact.clone());
        st.reverse.entry(key.clone()).or_default().insert(origin.clone());

        let mut out = Vec::new();

        // POIs the origin is already linked to learn about the new fact
        if let Some(keys) = st.origin_to_poi.get(&origin) {
            for poi in keys {
                if *poi == key {
                    continue;
                }
                for callback in st.pois.get(poi).into_iter().flatten() {
                    out.push(AliasNotification {
                        callback: *callback,
                        alias: edge.target_fact.clone(),
                    });
                }
            }
        }
        if st.pois.contains_key(&key) {
            let already = st
                .origin_to_poi
                .get(&origin)
                .map_or(false, |keys| keys.contains(&key));
            if already {
                let single: FxHashSet<AccessPath> = std::iter::once(edge.target_fact.clone()).collect();
                st.notify_all(&key, &single, &mut out);
            } else {
                st.link(&origin, &key, incomings, &mut out);
            }
        }

        // A fact reaching a statement from an entry origin is an alias of
        // every POI whose entry origin aliases it in context
        if !edge.start_fact.has_allocation_site() {
            let related: Vec<AccessPath> = st
                .parameter_origin_to_poi
                .iter()
                .filter(|(other, _)| {
                    **other != origin
                        && other.stmt == origin.stmt
                        && alias_in_context(origin.stmt, &other.fact, &origin.fact, incomings)
                })
                .flat_map(|(_, keys)| keys.iter().cloned())
                .collect();
            for poi in related {
                for callback in st.pois.get(&poi).into_iter().flatten() {
                    out.push(AliasNotification {
                        callback: *callback,
                        alias: edge.target_fact.clone(),
                    });
                }
            }
        }
        Some(out)
    }

    /// Subscribe `callback` to the aliases of `key` at `stmt`
    ///
    /// Returns whether this is the first registration of the POI, along
    /// with notifications for the aliases known so far.
    pub fn register_poi(
        &mut self,
        stmt: StmtId,
        key: AccessPath,
        callback: CallbackId,
        incomings: &Incomings,
    ) -> (bool, Vec<AliasNotification>) {
        let st = self.per_stmt.entry(stmt).or_default();
        let first = !st.pois.contains_key(&key);
        let callbacks = st.pois.entry(key.clone()).or_default();
        let new_callback = !callbacks.contains(&callback);
        if new_callback {
            callbacks.push(callback);
        }
        if first {
            self.poi_count += 1;
        }

        let mut out = Vec::new();
        let origins: Vec<Node> = st
            .reverse
            .get(&key)
            .map(|origins| origins.iter().cloned().collect())
            .unwrap_or_default();
        if first {
            for origin in &origins {
                st.link(origin, &key, incomings, &mut out);
            }
        } else if new_callback {
            // Replay what the earlier subscribers already saw
            let mut facts: Vec<&AccessPath> = Vec::new();
            for origin in &origins {
                facts.extend(st.forward.get(origin).into_iter().flatten());
                if !origin.fact.has_allocation_site() {
                    for aliased in st.context_aliases(origin, incomings) {
                        facts.extend(aliased);
                    }
                }
            }
            out.extend(facts.into_iter().map(|alias| AliasNotification {
                callback,
                alias: alias.clone(),
            }));
        }
        (first, out)
    }

    pub fn contains(&self, edge: &PathEdge) -> bool {
        self.edges.contains(edge)
    }

    /// Origins of the facts at `stmt` whose erased form is `key`
    pub fn origins_of(&self, stmt: StmtId, key: &AccessPath) -> impl Iterator<Item = &Node> + '_ {
        self.per_stmt
            .get(&stmt)
            .and_then(|st| st.reverse.get(key))
            .into_iter()
            .flatten()
    }

    /// Facts at `stmt` that stem from `origin`
    pub fn targets_of(&self, stmt: StmtId, origin: &Node) -> impl Iterator<Item = &AccessPath> + '_ {
        self.per_stmt
            .get(&stmt)
            .and_then(|st| st.forward.get(origin))
            .into_iter()
            .flatten()
    }

    /// Every edge, in no particular order
    pub fn edges(&self) -> impl Iterator<Item = &PathEdge> + '_ {
        self.edges.iter()
    }

    pub fn len(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    /// Number of distinct POIs registered
    pub fn poi_count(&self) -> usize {
        self.poi_count
    }
}

/// Whether two facts entering a method at `start` alias in every context
/// that reaches them
pub fn alias_in_context(start: Option<StmtId>, a: &AccessPath, b: &AccessPath, incomings: &Incomings) -> bool {
    let mut visited = FxHashSet::default();
    alias_in_context_rec(start, a, b, incomings, &mut visited)
}

fn alias_in_context_rec(
    start: Option<StmtId>,
    a: &AccessPath,
    b: &AccessPath,
    incomings: &Incomings,
    visited: &mut FxHashSet<(StmtId, AccessPath, AccessPath)>,
) -> bool {
    let Some(start) = start else {
        return false;
    };
    if a.has_set_based_fields() || b.has_set_based_fields() {
        return false;
    }
    if !visited.insert((start, a.clone(), b.clone())) {
        return false;
    }
    let node_a = Node::new(Some(start), a.clone());
    let node_b = Node::new(Some(start), b.clone());
    for e1 in incomings.get(&node_a) {
        for e2 in incomings.get(&node_b) {
            if e1.start_node() == e2.start_node() {
                return true;
            }
            if !e1.start_fact.has_allocation_site()
                && !e2.start_fact.has_allocation_site()
                && e1.start == e2.start
                && alias_in_context_rec(e1.start, &e1.start_fact, &e2.start_fact, incomings, visited)
            {
                return true;
            }
        }
    }
    false
}
