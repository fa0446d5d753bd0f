//! Ricochet Core
//!
//! Core types shared by the Ricochet alias analysis engine.
//!
//! ## Modules
//!
//! - `ids` - Compact identifiers for methods, statements, locals, types and fields
//! - `field` - Fields and the finite field-sequence abstraction
//! - `access_path` - Access paths, the dataflow fact of the analysis
//! - `config` - Analysis and output configuration
//! - `error` - Error type

pub mod access_path;
pub mod config;
pub mod error;
pub mod field;
pub mod ids;

pub use access_path::{AccessPath, AllocationSite};
pub use config::{AnalysisConfig, Config};
pub use error::{Error, Result};
pub use field::{Field, FieldLimits, FieldSequence};
pub use ids::{FieldId, Local, MethodId, StmtId, TypeId};
