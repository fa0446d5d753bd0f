//! In-memory program representation
//!
//! A `Program` owns every type, field, local, method and statement of the
//! analyzed code and implements `Icfg` over them. It is immutable once
//! built; use `ProgramBuilder` to construct one.

use crate::icfg::Icfg;
use crate::loader::QuerySpec;
use crate::stmt::Stmt;
use regex::Regex;
use ricochet_core::{
    AccessPath, Error, Field, FieldId, FieldLimits, FieldSequence, Local, MethodId, Result,
    StmtId, TypeId,
};
use std::collections::{HashMap, HashSet, VecDeque};

/// Declared type of a local
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocalType {
    Reference(TypeId),
    Primitive(String),
}

impl LocalType {
    pub fn is_reference(&self) -> bool {
        matches!(self, LocalType::Reference(_))
    }

    pub fn reference(&self) -> Option<TypeId> {
        match self {
            LocalType::Reference(ty) => Some(*ty),
            LocalType::Primitive(_) => None,
        }
    }
}

/// A local variable
#[derive(Debug, Clone)]
pub struct LocalInfo {
    pub name: String,
    pub method: MethodId,
    pub ty: LocalType,
}

/// A reference type and its direct supertypes
#[derive(Debug, Clone)]
pub struct TypeInfo {
    pub name: String,
    pub supertypes: Vec<TypeId>,
}

/// A method and its body
#[derive(Debug, Clone)]
pub struct Method {
    pub id: MethodId,
    pub name: String,
    pub owner: Option<TypeId>,
    pub this: Option<Local>,
    pub params: Vec<Local>,
    pub locals: Vec<Local>,
    pub is_static: bool,
    pub is_constructor: bool,
    pub is_entry_point: bool,
    pub is_ignored: bool,
    /// Synthetic entry `nop`
    pub start_points: Vec<StmtId>,
    /// `return` statements
    pub end_points: Vec<StmtId>,
    /// Every statement, entry first
    pub body: Vec<StmtId>,
    /// Statements written in the source, addressable by position
    pub source_stmts: Vec<StmtId>,
    pub labels: HashMap<String, StmtId>,
    pub(crate) local_names: HashMap<String, Local>,
}

impl Method {
    /// Local declared under `name`
    pub fn local_named(&self, name: &str) -> Option<Local> {
        self.local_names.get(name).copied()
    }
}

/// A statement with its CFG neighbourhood
#[derive(Debug, Clone)]
pub struct StmtInfo {
    pub stmt: Stmt,
    pub method: MethodId,
    pub succs: Vec<StmtId>,
    pub preds: Vec<StmtId>,
    pub label: Option<String>,
    /// Source text, or a marker for synthetic statements
    pub text: String,
}

/// Whole program
#[derive(Debug, Clone)]
pub struct Program {
    pub(crate) types: Vec<TypeInfo>,
    pub(crate) fields: Vec<String>,
    pub(crate) locals: Vec<LocalInfo>,
    pub(crate) methods: Vec<Method>,
    pub(crate) stmts: Vec<StmtInfo>,
    pub(crate) callers: Vec<Vec<StmtId>>,
    pub(crate) queries: Vec<QuerySpec>,
    pub(crate) type_names: HashMap<String, TypeId>,
    pub(crate) field_names: HashMap<String, FieldId>,
}

impl Program {
    pub fn methods(&self) -> &[Method] {
        &self.methods
    }

    pub fn stmt_info(&self, stmt: StmtId) -> &StmtInfo {
        &self.stmts[stmt.index()]
    }

    pub fn stmt_count(&self) -> usize {
        self.stmts.len()
    }

    pub fn local_info(&self, local: Local) -> &LocalInfo {
        &self.locals[local.index()]
    }

    /// Queries embedded in the program file
    pub fn queries(&self) -> &[QuerySpec] {
        &self.queries
    }

    /// First method declared under `name`
    pub fn method_named(&self, name: &str) -> Option<&Method> {
        let (owner, simple) = match name.split_once('.') {
            Some((owner, simple)) => (Some(owner), simple),
            None => (None, name),
        };
        self.methods.iter().find(|m| {
            m.name == simple
                && owner.map_or(true, |owner| m.owner.map(|t| self.type_name(t)) == Some(owner))
        })
    }

    pub fn type_named(&self, name: &str) -> Option<TypeId> {
        self.type_names.get(name).copied()
    }

    pub fn field_named(&self, name: &str) -> Option<FieldId> {
        self.field_names.get(name).copied()
    }

    pub fn type_name(&self, ty: TypeId) -> &str {
        &self.types[ty.index()].name
    }

    pub fn field_name(&self, field: FieldId) -> &str {
        &self.fields[field.index()]
    }

    pub fn local_name(&self, local: Local) -> &str {
        &self.locals[local.index()].name
    }

    /// Qualified method name (`Owner.name` or `name`)
    pub fn method_name(&self, method: MethodId) -> String {
        let method = &self.methods[method.index()];
        match method.owner {
            Some(owner) => format!("{}.{}", self.type_name(owner), method.name),
            None => method.name.clone(),
        }
    }

    /// Resolve a statement label, or a zero-based position among the
    /// source statements of `method`
    pub fn resolve_point(&self, method: MethodId, at: &str) -> Result<StmtId> {
        let method = &self.methods[method.index()];
        if let Some(stmt) = method.labels.get(at) {
            return Ok(*stmt);
        }
        at.parse::<usize>()
            .ok()
            .and_then(|pos| method.source_stmts.get(pos).copied())
            .ok_or_else(|| {
                Error::Program(format!("no statement `{}` in method {}", at, method.name))
            })
    }

    /// Human-readable location of a statement
    pub fn describe_stmt(&self, stmt: StmtId) -> String {
        let info = self.stmt_info(stmt);
        let method = &self.methods[info.method.index()];
        let position = match &info.label {
            Some(label) => label.clone(),
            None => match method.source_stmts.iter().position(|s| *s == stmt) {
                Some(pos) => pos.to_string(),
                None => info.text.clone(),
            },
        };
        format!("{}:{}", self.method_name(info.method), position)
    }

    /// Render an access path with source names
    pub fn describe_path(&self, ap: &AccessPath) -> String {
        let mut out = match ap.base() {
            Some(base) => self.local_name(base).to_string(),
            None => String::new(),
        };
        if let Some(fields) = ap.fields() {
            out.push_str(&self.describe_fields(fields, ap.base().is_none()));
        }
        if let Some(site) = ap.allocation_site() {
            let marker = if site.is_null { "null@" } else { "@" };
            out.push_str(&format!(" {}{}", marker, self.describe_stmt(site.point)));
        }
        out
    }

    fn describe_fields(&self, fields: &FieldSequence, is_static: bool) -> String {
        let name = |field: &Field| self.field_name(field.id).to_string();
        match fields {
            FieldSequence::Set(set) => {
                let names: Vec<String> = set.iter().map(name).collect();
                format!(".{{{}}}", names.join(","))
            }
            FieldSequence::Exact(chain) | FieldSequence::Bounded { fields: chain, .. } => {
                let mut out = String::new();
                for (i, field) in chain.iter().enumerate() {
                    if i == 0 && is_static {
                        out.push_str(&name(field));
                    } else if field.is_array() {
                        out.push_str("[]");
                    } else {
                        out.push('.');
                        out.push_str(&name(field));
                    }
                }
                if fields.is_over_approximated() {
                    out.push_str(".*");
                }
                out
            }
        }
    }

    /// Parse `a.f.g`, `a[].f` or `Owner::f.g` in the scope of `method`
    pub fn parse_access_path(
        &self,
        method: MethodId,
        text: &str,
        limits: FieldLimits,
    ) -> Result<AccessPath> {
        let path_re = Regex::new(r"^(?:(\w+)::(\w+)|(\w+))((?:\.\w+|\[\])*)$").unwrap();
        let segment_re = Regex::new(r"\.(\w+)|\[\]").unwrap();
        let caps = path_re
            .captures(text.trim())
            .ok_or_else(|| Error::InvalidQuery(format!("malformed access path `{}`", text)))?;

        let mut fields = Vec::new();
        for seg in segment_re.captures_iter(&caps[4]) {
            let field = match seg.get(1) {
                Some(name) => self.field_named(name.as_str()).ok_or_else(|| {
                    Error::InvalidQuery(format!("unknown field `{}`", name.as_str()))
                })?,
                None => FieldId::ARRAY,
            };
            fields.push(Field::new(field));
        }

        if let (Some(owner), Some(field)) = (caps.get(1), caps.get(2)) {
            let key = format!("{}::{}", owner.as_str(), field.as_str());
            let field = self
                .field_named(&key)
                .ok_or_else(|| Error::InvalidQuery(format!("unknown static field `{}`", key)))?;
            return Ok(AccessPath::new_static(Field::new(field), fields, limits));
        }

        let name = &caps[3];
        let local = self.methods[method.index()]
            .local_named(name)
            .ok_or_else(|| {
                Error::InvalidQuery(format!(
                    "`{}` is not a local of {}",
                    name,
                    self.method_name(method)
                ))
            })?;
        Ok(AccessPath::new(local, fields, limits))
    }
}

impl Icfg for Program {
    fn stmt(&self, stmt: StmtId) -> &Stmt {
        &self.stmts[stmt.index()].stmt
    }

    fn method(&self, method: MethodId) -> &Method {
        &self.methods[method.index()]
    }

    fn method_of(&self, stmt: StmtId) -> MethodId {
        self.stmts[stmt.index()].method
    }

    fn succs_of(&self, stmt: StmtId) -> &[StmtId] {
        &self.stmts[stmt.index()].succs
    }

    fn preds_of(&self, stmt: StmtId) -> &[StmtId] {
        &self.stmts[stmt.index()].preds
    }

    fn callees_of_call_at(&self, stmt: StmtId) -> &[MethodId] {
        match self.stmt(stmt).call() {
            Some(call) => &call.targets,
            None => &[],
        }
    }

    fn callers_of(&self, method: MethodId) -> &[StmtId] {
        &self.callers[method.index()]
    }

    fn start_points_of(&self, method: MethodId) -> &[StmtId] {
        &self.methods[method.index()].start_points
    }

    fn end_points_of(&self, method: MethodId) -> &[StmtId] {
        &self.methods[method.index()].end_points
    }

    fn is_ignored_method(&self, method: MethodId) -> bool {
        self.methods[method.index()].is_ignored
    }

    fn local_type(&self, local: Local) -> &LocalType {
        &self.locals[local.index()].ty
    }

    fn can_store(&self, child: TypeId, parent: TypeId) -> bool {
        if child == parent {
            return true;
        }
        let mut seen = HashSet::new();
        let mut queue = VecDeque::from([child]);
        while let Some(ty) = queue.pop_front() {
            if ty == parent {
                return true;
            }
            if seen.insert(ty) {
                queue.extend(self.types[ty.index()].supertypes.iter().copied());
            }
        }
        false
    }

    fn entry_points(&self) -> Vec<MethodId> {
        self.methods
            .iter()
            .filter(|m| m.is_entry_point)
            .map(|m| m.id)
            .collect()
    }
}
