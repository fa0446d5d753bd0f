//! Queries

use ricochet_core::{AccessPath, Error, FieldLimits, MethodId, Result, StmtId};
use ricochet_program::{Program, QuerySpec};
use std::fmt;

/// "Which objects may `path` point to right before `point` executes?"
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Query {
    pub point: StmtId,
    pub path: AccessPath,
    pub method: MethodId,
}

impl Query {
    pub fn new(point: StmtId, path: AccessPath, method: MethodId) -> Self {
        Self { point, path, method }
    }

    /// Resolve a query written with source names: a method name, a
    /// statement label or position, and an access path like `a.f.g`
    pub fn parse(program: &Program, method: &str, at: &str, path: &str, limits: FieldLimits) -> Result<Self> {
        let method = program
            .method_named(method)
            .ok_or_else(|| Error::InvalidQuery(format!("unknown method `{}`", method)))?
            .id;
        let point = program.resolve_point(method, at)?;
        let path = program.parse_access_path(method, path, limits)?;
        Ok(Self::new(point, path, method))
    }

    pub fn from_spec(program: &Program, spec: &QuerySpec, limits: FieldLimits) -> Result<Self> {
        Self::parse(program, &spec.method, &spec.at, &spec.path, limits)
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at {}", self.path, self.point)
    }
}
