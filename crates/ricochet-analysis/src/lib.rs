//! Ricochet Analysis Engine
//!
//! Demand-driven alias analysis over an exploded supergraph. A query runs a
//! backward search from the queried access path to the allocation sites
//! that may explain it, then propagates each allocation forward. Heap
//! writes through other variables are found with points of indirection
//! (POIs): alias subscriptions on the path-edge store that start new
//! backward searches and inject forward edges when aliases show up.
//!
//! ## Modules
//!
//! - `path_edge` - Nodes and path edges
//! - `incoming` - Incoming call edges and summaries
//! - `store` - Per-statement path-edge indexes and the POI protocol
//! - `poi` - POI kinds, alias callbacks and the callback table
//! - `flow` - Forward and backward flow functions
//! - `allocation` - Allocation-site classifiers
//! - `listener` - Origin listeners
//! - `context` - Context requesters
//! - `scheduler` - Work queue and time budget
//! - `observer` - Observer hooks
//! - `engine` - The solver

pub mod allocation;
pub mod context;
pub mod engine;
pub mod flow;
pub mod incoming;
pub mod listener;
pub mod observer;
pub mod path_edge;
pub mod poi;
pub mod scheduler;
pub mod store;

pub use allocation::{classifier_for, AllocationSiteClassifier, PrimitiveAndReferenceClassifier, ReferenceTypeClassifier};
pub use context::{requester_for, AllCallersRequester, ContextRequester, NoContextRequester};
pub use engine::{Solver, SolverStats};
pub use flow::{BackwardFlowFunctions, Effect, FlowFunctions, FlowOutput, ForwardFlowFunctions};
pub use incoming::{Incomings, Summaries};
pub use observer::{AnalysisObserver, NoopObserver, RecordingObserver, TracingObserver};
pub use path_edge::{Node, PathEdge};
pub use poi::PoiKind;
pub use store::PathEdgeStore;

#[cfg(test)]
mod tests;
