//! Ricochet Program
//!
//! Program model the alias analysis runs on: a three-address intermediate
//! representation with an interprocedural control-flow graph.
//!
//! ## Modules
//!
//! - `stmt` - Statements, places and call expressions
//! - `parser` - Text syntax for statements
//! - `program` - Whole-program representation
//! - `builder` - Program construction and call resolution
//! - `loader` - YAML/JSON program files
//! - `batch` - Parallel loading of program directories
//! - `icfg` - The `Icfg` trait and its directed view

pub mod batch;
pub mod builder;
pub mod icfg;
pub mod loader;
pub mod parser;
pub mod program;
pub mod stmt;

pub use batch::BatchLoader;
pub use builder::ProgramBuilder;
pub use icfg::{Directed, Direction, Icfg};
pub use loader::{load_program, ClassSpec, MethodSpec, ProgramSpec, QuerySpec};
pub use program::{LocalInfo, LocalType, Method, Program, StmtInfo, TypeInfo};
pub use stmt::{CallExpr, Operand, Place, Rvalue, Stmt};
