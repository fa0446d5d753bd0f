//! Ricochet Query
//!
//! High-level query interface: validates a query, runs one solver for it
//! and collects the aliases observed at the query point, grouped by the
//! allocation they stem from.
//!
//! ## Modules
//!
//! - `query` - Queries and their resolution from source names
//! - `results` - Alias results
//! - `finder` - The `AliasFinder` facade

pub mod finder;
pub mod query;
pub mod results;

pub use finder::AliasFinder;
pub use query::Query;
pub use results::{AliasResults, AllocationOrigin};
