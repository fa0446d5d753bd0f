//! Program construction
//!
//! Builds a `Program` from class and method declarations whose bodies are
//! written in the statement syntax of `parser`. Every method gets a
//! synthetic entry `nop` as its single start point and a synthetic
//! `return` if control can fall off the end of the body.

use crate::loader::{ClassSpec, MethodSpec, ProgramSpec, QuerySpec};
use crate::parser::{CallText, OperandText, PlaceText, RvalueText, StatementParser, StmtText};
use crate::program::{LocalInfo, LocalType, Method, Program, StmtInfo, TypeInfo};
use crate::stmt::{CallExpr, Operand, Place, Rvalue, Stmt};
use ricochet_core::{Error, FieldId, Local, MethodId, Result, StmtId, TypeId};
use std::collections::HashMap;
use tracing::debug;

const PRIMITIVES: &[&str] = &[
    "int", "long", "short", "byte", "char", "boolean", "float", "double", "void",
];

/// Methods whose bodies are never entered
const IGNORED_NAMES: &[&str] = &["equals", "hashCode", "toString"];

/// Root of the type hierarchy
pub const OBJECT: &str = "Object";

/// Builder for `Program`
#[derive(Debug, Default)]
pub struct ProgramBuilder {
    spec: ProgramSpec,
}

impl ProgramBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_spec(spec: ProgramSpec) -> Self {
        Self { spec }
    }

    /// Declare a class, optionally extending another
    pub fn class(mut self, name: &str, extends: Option<&str>) -> Self {
        self.spec.classes.push(ClassSpec {
            name: name.to_string(),
            extends: extends.map(str::to_string),
            implements: vec![],
        });
        self
    }

    pub fn method(mut self, method: MethodSpec) -> Self {
        self.spec.methods.push(method);
        self
    }

    pub fn query(mut self, query: QuerySpec) -> Self {
        self.spec.queries.push(query);
        self
    }

    pub fn build(self) -> Result<Program> {
        let mut state = BuildState::new();
        state.declare_types(&self.spec.classes)?;
        for spec in &self.spec.methods {
            state.declare_method(spec)?;
        }
        let parser = StatementParser::new();
        for (index, spec) in self.spec.methods.iter().enumerate() {
            state.lower_body(MethodId::from(index), spec, &parser)?;
        }
        let program = state.finish(self.spec.queries);
        debug!(
            "Built program with {} methods and {} statements",
            program.methods.len(),
            program.stmts.len()
        );
        Ok(program)
    }
}

struct BuildState {
    types: Vec<TypeInfo>,
    type_names: HashMap<String, TypeId>,
    fields: Vec<String>,
    field_names: HashMap<String, FieldId>,
    locals: Vec<LocalInfo>,
    methods: Vec<Method>,
    methods_by_name: HashMap<String, Vec<MethodId>>,
    stmts: Vec<StmtInfo>,
}

impl BuildState {
    fn new() -> Self {
        let mut state = Self {
            types: Vec::new(),
            type_names: HashMap::new(),
            fields: vec!["[]".to_string()],
            field_names: HashMap::from([("[]".to_string(), FieldId::ARRAY)]),
            locals: Vec::new(),
            methods: Vec::new(),
            methods_by_name: HashMap::new(),
            stmts: Vec::new(),
        };
        state.type_id(OBJECT);
        state
    }

    /// Id of a type, declaring it as a subclass of `Object` on first use
    fn type_id(&mut self, name: &str) -> TypeId {
        if let Some(id) = self.type_names.get(name) {
            return *id;
        }
        let id = TypeId::from(self.types.len());
        let supertypes = if name == OBJECT { vec![] } else { vec![TypeId(0)] };
        self.types.push(TypeInfo {
            name: name.to_string(),
            supertypes,
        });
        self.type_names.insert(name.to_string(), id);
        id
    }

    fn field_id(&mut self, name: &str) -> FieldId {
        if let Some(id) = self.field_names.get(name) {
            return *id;
        }
        let id = FieldId::from(self.fields.len());
        self.fields.push(name.to_string());
        self.field_names.insert(name.to_string(), id);
        id
    }

    fn declare_types(&mut self, classes: &[ClassSpec]) -> Result<()> {
        for class in classes {
            if self.type_names.contains_key(&class.name) && class.name != OBJECT {
                return Err(Error::Program(format!("class `{}` declared twice", class.name)));
            }
            self.type_id(&class.name);
        }
        for class in classes {
            let id = self.type_id(&class.name);
            let mut supertypes = Vec::new();
            if let Some(parent) = &class.extends {
                supertypes.push(self.type_id(parent));
            } else if class.name != OBJECT {
                supertypes.push(TypeId(0));
            }
            for interface in &class.implements {
                supertypes.push(self.type_id(interface));
            }
            self.types[id.index()].supertypes = supertypes;
        }
        Ok(())
    }

    fn local_type(&mut self, name: &str) -> LocalType {
        if PRIMITIVES.contains(&name) {
            LocalType::Primitive(name.to_string())
        } else {
            LocalType::Reference(self.type_id(name))
        }
    }

    fn new_local(&mut self, method: MethodId, name: &str, ty: LocalType) -> Local {
        let local = Local::from(self.locals.len());
        self.locals.push(LocalInfo {
            name: name.to_string(),
            method,
            ty,
        });
        local
    }

    fn declare_method(&mut self, spec: &MethodSpec) -> Result<()> {
        let id = MethodId::from(self.methods.len());
        let owner = spec.owner.as_deref().map(|owner| self.type_id(owner));
        let is_static = owner.is_none() || spec.is_static;

        let mut local_names = HashMap::new();
        let mut locals = Vec::new();
        let mut this = None;
        if let (Some(owner), false) = (owner, is_static) {
            let local = self.new_local(id, "this", LocalType::Reference(owner));
            local_names.insert("this".to_string(), local);
            locals.push(local);
            this = Some(local);
        }
        for (name, ty) in &spec.locals {
            let ty = self.local_type(ty);
            let local = self.new_local(id, name, ty);
            local_names.insert(name.clone(), local);
            locals.push(local);
        }
        let params = spec
            .params
            .iter()
            .map(|name| {
                local_names.get(name).copied().ok_or_else(|| {
                    Error::Program(format!(
                        "parameter `{}` of {} has no declared type",
                        name, spec.name
                    ))
                })
            })
            .collect::<Result<Vec<_>>>()?;

        self.methods_by_name
            .entry(spec.name.clone())
            .or_default()
            .push(id);
        self.methods.push(Method {
            id,
            name: spec.name.clone(),
            owner,
            this,
            params,
            locals,
            is_static,
            is_constructor: spec.constructor,
            is_entry_point: spec.entry,
            is_ignored: spec.ignored || IGNORED_NAMES.contains(&spec.name.as_str()),
            start_points: vec![],
            end_points: vec![],
            body: vec![],
            source_stmts: vec![],
            labels: HashMap::new(),
            local_names,
        });
        Ok(())
    }

    fn push_stmt(&mut self, method: MethodId, stmt: Stmt, label: Option<String>, text: &str) -> StmtId {
        let id = StmtId::from(self.stmts.len());
        self.stmts.push(StmtInfo {
            stmt,
            method,
            succs: vec![],
            preds: vec![],
            label,
            text: text.to_string(),
        });
        id
    }

    fn lower_body(&mut self, id: MethodId, spec: &MethodSpec, parser: &StatementParser) -> Result<()> {
        let lines = spec
            .body
            .iter()
            .map(|line| {
                parser
                    .parse_line(line)
                    .map_err(|e| Error::Parse(format!("{} in method {}", e, spec.name)))
            })
            .collect::<Result<Vec<_>>>()?;

        let entry = self.push_stmt(id, Stmt::Nop, None, "<entry>");
        let base = self.stmts.len();
        let mut labels = HashMap::new();
        for (pos, line) in lines.iter().enumerate() {
            if let Some(label) = &line.label {
                let stmt = StmtId::from(base + pos);
                if labels.insert(label.clone(), stmt).is_some() {
                    return Err(Error::Program(format!(
                        "label `{}` defined twice in {}",
                        label, spec.name
                    )));
                }
            }
        }
        let falls_through = lines
            .last()
            .map_or(true, |line| !matches!(line.stmt, StmtText::Return(_) | StmtText::Goto(_)));
        let exit = StmtId::from(base + lines.len());
        let next_of = |pos: usize| StmtId::from(base + pos + 1);
        let target_of = |label: &str| {
            labels.get(label).copied().ok_or_else(|| {
                Error::Program(format!("unknown label `{}` in {}", label, spec.name))
            })
        };

        let mut source_stmts = Vec::with_capacity(lines.len());
        let mut succs = Vec::with_capacity(lines.len());
        for (pos, line) in lines.iter().enumerate() {
            let stmt = self.lower_stmt(id, &line.stmt)?;
            let next = next_of(pos);
            succs.push(match &line.stmt {
                StmtText::Goto(label) => vec![target_of(label)?],
                StmtText::If(label) => {
                    let target = target_of(label)?;
                    if target == next {
                        vec![next]
                    } else {
                        vec![next, target]
                    }
                }
                StmtText::Return(_) => vec![],
                _ => vec![next],
            });
            source_stmts.push(self.push_stmt(id, stmt, line.label.clone(), &spec.body[pos]));
        }
        if falls_through {
            self.push_stmt(id, Stmt::Return(None), None, "<exit>");
        }

        let first = if lines.is_empty() { exit } else { StmtId::from(base) };
        self.stmts[entry.index()].succs = vec![first];
        for (stmt, succ) in source_stmts.iter().zip(succs) {
            self.stmts[stmt.index()].succs = succ;
        }

        let body: Vec<StmtId> = (entry.index()..self.stmts.len()).map(StmtId::from).collect();
        let end_points = body
            .iter()
            .copied()
            .filter(|s| self.stmts[s.index()].stmt.is_return())
            .collect();
        let method = &mut self.methods[id.index()];
        method.start_points = vec![entry];
        method.end_points = end_points;
        method.body = body;
        method.source_stmts = source_stmts;
        method.labels = labels;
        Ok(())
    }

    fn local(&self, method: MethodId, name: &str) -> Result<Local> {
        let method = &self.methods[method.index()];
        method.local_names.get(name).copied().ok_or_else(|| {
            Error::Program(format!("unknown local `{}` in {}", name, method.name))
        })
    }

    fn operand(&self, method: MethodId, operand: &OperandText) -> Result<Operand> {
        Ok(match operand {
            OperandText::Local(name) => Operand::Local(self.local(method, name)?),
            OperandText::Null => Operand::Null,
            OperandText::Constant => Operand::Constant,
        })
    }

    fn place(&mut self, method: MethodId, place: &PlaceText) -> Result<Place> {
        Ok(match place {
            PlaceText::Local(name) => Place::Local(self.local(method, name)?),
            PlaceText::Field { base, field } => Place::Field {
                base: self.local(method, base)?,
                field: self.field_id(field),
            },
            PlaceText::Static { owner, field } => {
                self.type_id(owner);
                Place::Static(self.field_id(&format!("{}::{}", owner, field)))
            }
            PlaceText::Array(base) => Place::Array(self.local(method, base)?),
        })
    }

    fn lower_stmt(&mut self, method: MethodId, stmt: &StmtText) -> Result<Stmt> {
        Ok(match stmt {
            StmtText::Nop => Stmt::Nop,
            StmtText::Goto(_) => Stmt::Goto,
            StmtText::If(_) => Stmt::If,
            StmtText::Return(value) => Stmt::Return(match value {
                Some(value) => Some(self.operand(method, value)?),
                None => None,
            }),
            StmtText::Invoke(call) => Stmt::Invoke(self.call(method, call)?),
            StmtText::Assign { lhs, rhs } => {
                let lhs = self.place(method, lhs)?;
                let rhs = match rhs {
                    RvalueText::Read(place) => match self.place(method, place)? {
                        Place::Local(local) => Rvalue::Local(local),
                        Place::Field { base, field } => Rvalue::Field { base, field },
                        Place::Static(field) => Rvalue::Static(field),
                        Place::Array(base) => Rvalue::Array(base),
                    },
                    RvalueText::New(ty) => Rvalue::New(self.type_id(ty)),
                    RvalueText::NewArray(ty) => Rvalue::NewArray(self.type_id(ty)),
                    RvalueText::Cast { ty, local } => Rvalue::Cast {
                        ty: self.type_id(ty),
                        local: self.local(method, local)?,
                    },
                    RvalueText::Call(call) => Rvalue::Call(self.call(method, call)?),
                    RvalueText::Operand(operand) => self.operand(method, operand)?.into(),
                };
                Stmt::Assign { lhs, rhs }
            }
        })
    }

    fn call(&self, method: MethodId, call: &CallText) -> Result<CallExpr> {
        let receiver = match &call.receiver {
            Some(name) => Some(self.local(method, name)?),
            None => None,
        };
        let args = call
            .args
            .iter()
            .map(|arg| self.operand(method, arg))
            .collect::<Result<Vec<_>>>()?;
        let candidates = self
            .methods_by_name
            .get(&call.name)
            .map(Vec::as_slice)
            .unwrap_or_default();
        let targets = match receiver {
            None => candidates
                .iter()
                .copied()
                .filter(|m| self.methods[m.index()].is_static)
                .collect(),
            Some(receiver) => {
                let static_type = self.locals[receiver.index()].ty.reference();
                candidates
                    .iter()
                    .copied()
                    .filter(|m| {
                        let callee = &self.methods[m.index()];
                        match (callee.is_static, callee.owner, static_type) {
                            (false, Some(owner), Some(ty)) => {
                                self.subtype(owner, ty) || self.subtype(ty, owner)
                            }
                            _ => false,
                        }
                    })
                    .collect()
            }
        };
        Ok(CallExpr {
            name: call.name.clone(),
            receiver,
            args,
            targets,
        })
    }

    fn subtype(&self, child: TypeId, parent: TypeId) -> bool {
        let mut stack = vec![child];
        let mut seen = Vec::new();
        while let Some(ty) = stack.pop() {
            if ty == parent {
                return true;
            }
            if !seen.contains(&ty) {
                seen.push(ty);
                stack.extend(self.types[ty.index()].supertypes.iter().copied());
            }
        }
        false
    }

    fn finish(mut self, queries: Vec<QuerySpec>) -> Program {
        let mut callers = vec![Vec::new(); self.methods.len()];
        for index in 0..self.stmts.len() {
            let stmt = StmtId::from(index);
            for succ in self.stmts[index].succs.clone() {
                self.stmts[succ.index()].preds.push(stmt);
            }
            if let Some(call) = self.stmts[index].stmt.call() {
                for target in &call.targets {
                    callers[target.index()].push(stmt);
                }
            }
        }
        Program {
            types: self.types,
            fields: self.fields,
            locals: self.locals,
            methods: self.methods,
            stmts: self.stmts,
            callers,
            queries,
            type_names: self.type_names,
            field_names: self.field_names,
        }
    }
}
