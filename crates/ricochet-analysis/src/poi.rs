//! Points of indirection and alias callbacks
//!
//! A point of indirection (POI) is a `(statement, access path)` pair whose
//! aliases some part of the analysis wants to hear about. Callbacks are
//! plain values interned in a `CallbackTable`; the path-edge store only
//! deals in `CallbackId`s and hands back `AliasNotification`s for the
//! engine to deliver.

use crate::path_edge::PathEdge;
use ricochet_core::{AccessPath, FieldLimits, FieldSequence, StmtId};
use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};

/// Why a POI was registered; orders the scheduler's POI queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum PoiKind {
    /// A backward search reached an allocation site
    Allocation,
    /// A parameter of an entry point is treated as an origin
    ParameterTurn,
    /// A value was stored into a field of a possibly aliased base
    Write,
    /// A fielded fact left a callee through a balanced return
    Return,
    /// A fielded fact left a callee through an unbalanced return
    Unbalanced,
}

pub type CallbackId = usize;

/// Continuation run once per newly observed alias of a POI
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum AliasCallback {
    /// Inject `(source) -> (target_stmt, alias + to_append)` into the
    /// forward solver
    ForwardAppend {
        source_stmt: Option<StmtId>,
        source_fact: AccessPath,
        target_stmt: StmtId,
        to_append: FieldSequence,
    },
}

impl AliasCallback {
    pub fn forward_append(
        source_stmt: Option<StmtId>,
        source_fact: AccessPath,
        target_stmt: StmtId,
        to_append: FieldSequence,
    ) -> Self {
        AliasCallback::ForwardAppend {
            source_stmt,
            source_fact,
            target_stmt,
            to_append,
        }
    }

    /// Edge to inject for `alias`; set-based aliases are skipped
    pub fn on_alias(&self, alias: &AccessPath, limits: FieldLimits) -> Option<PathEdge> {
        match self {
            AliasCallback::ForwardAppend {
                source_stmt,
                source_fact,
                target_stmt,
                to_append,
            } => {
                if alias.has_set_based_fields() {
                    return None;
                }
                Some(PathEdge::new(
                    *source_stmt,
                    source_fact.clone(),
                    *target_stmt,
                    alias.without_allocation_site().append_sequence(to_append, limits),
                ))
            }
        }
    }
}

/// `alias` was observed for a POI `callback` subscribed to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AliasNotification {
    pub callback: CallbackId,
    pub alias: AccessPath,
}

/// Interned callbacks and the aliases each one already handled
#[derive(Debug, Default)]
pub struct CallbackTable {
    callbacks: Vec<AliasCallback>,
    ids: FxHashMap<AliasCallback, CallbackId>,
    executed: FxHashSet<(CallbackId, AccessPath)>,
}

impl CallbackTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Id of `callback`, equal callbacks share one id
    pub fn intern(&mut self, callback: AliasCallback) -> CallbackId {
        if let Some(id) = self.ids.get(&callback) {
            return *id;
        }
        let id = self.callbacks.len();
        self.callbacks.push(callback.clone());
        self.ids.insert(callback, id);
        id
    }

    pub fn get(&self, id: CallbackId) -> &AliasCallback {
        &self.callbacks[id]
    }

    /// Run a notification unless its callback already saw that alias
    pub fn fire(&mut self, note: &AliasNotification, limits: FieldLimits) -> Option<PathEdge> {
        if !self.executed.insert((note.callback, note.alias.clone())) {
            return None;
        }
        self.callbacks[note.callback].on_alias(&note.alias, limits)
    }

    pub fn len(&self) -> usize {
        self.callbacks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.callbacks.is_empty()
    }
}
