//! Three-address statements

use ricochet_core::{FieldId, Local, MethodId, TypeId};
use serde::{Deserialize, Serialize};

/// A statement of a method body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Stmt {
    Nop,
    /// Unconditional jump; the target is recorded in the CFG
    Goto,
    /// Nondeterministic branch
    If,
    Assign { lhs: Place, rhs: Rvalue },
    /// Call whose result (if any) is discarded
    Invoke(CallExpr),
    Return(Option<Operand>),
}

/// Left-hand side of an assignment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Place {
    Local(Local),
    Field { base: Local, field: FieldId },
    Static(FieldId),
    /// Any element of an array
    Array(Local),
}

/// Right-hand side of an assignment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Rvalue {
    Local(Local),
    Field { base: Local, field: FieldId },
    Static(FieldId),
    Array(Local),
    New(TypeId),
    NewArray(TypeId),
    Null,
    Constant,
    Cast { ty: TypeId, local: Local },
    Call(CallExpr),
}

/// Call argument or returned value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operand {
    Local(Local),
    Null,
    Constant,
}

impl Operand {
    pub fn local(&self) -> Option<Local> {
        match self {
            Operand::Local(local) => Some(*local),
            _ => None,
        }
    }
}

impl From<Operand> for Rvalue {
    fn from(operand: Operand) -> Self {
        match operand {
            Operand::Local(local) => Rvalue::Local(local),
            Operand::Null => Rvalue::Null,
            Operand::Constant => Rvalue::Constant,
        }
    }
}

/// A call expression with its resolved targets
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallExpr {
    /// Called method name
    pub name: String,
    /// Receiver of an instance call
    pub receiver: Option<Local>,
    pub args: Vec<Operand>,
    /// Methods this call may dispatch to; empty for library calls
    pub targets: Vec<MethodId>,
}

impl CallExpr {
    /// Position of `local` among the arguments
    pub fn arg_positions(&self, local: Local) -> impl Iterator<Item = usize> + '_ {
        self.args
            .iter()
            .enumerate()
            .filter(move |(_, arg)| arg.local() == Some(local))
            .map(|(i, _)| i)
    }

    /// Whether `local` is passed as an argument or receiver
    pub fn uses(&self, local: Local) -> bool {
        self.receiver == Some(local) || self.args.iter().any(|arg| arg.local() == Some(local))
    }
}

impl Stmt {
    /// Call expression of a call statement
    pub fn call(&self) -> Option<&CallExpr> {
        match self {
            Stmt::Invoke(call) => Some(call),
            Stmt::Assign {
                rhs: Rvalue::Call(call),
                ..
            } => Some(call),
            _ => None,
        }
    }

    /// Local receiving the result of a call statement
    pub fn call_result(&self) -> Option<Local> {
        match self {
            Stmt::Assign {
                lhs: Place::Local(local),
                rhs: Rvalue::Call(_),
            } => Some(*local),
            _ => None,
        }
    }

    pub fn is_return(&self) -> bool {
        matches!(self, Stmt::Return(_))
    }

    /// Type allocated by a `new`/`newarray` assignment
    pub fn allocated_type(&self) -> Option<TypeId> {
        match self {
            Stmt::Assign {
                rhs: Rvalue::New(ty) | Rvalue::NewArray(ty),
                ..
            } => Some(*ty),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(receiver: Option<Local>, args: Vec<Operand>) -> CallExpr {
        CallExpr {
            name: "m".to_string(),
            receiver,
            args,
            targets: vec![],
        }
    }

    #[test]
    fn test_call_accessors() {
        let expr = call(Some(Local(1)), vec![Operand::Local(Local(2)), Operand::Null]);
        let stmt = Stmt::Assign {
            lhs: Place::Local(Local(3)),
            rhs: Rvalue::Call(expr.clone()),
        };
        assert_eq!(stmt.call(), Some(&expr));
        assert_eq!(stmt.call_result(), Some(Local(3)));
        assert_eq!(Stmt::Invoke(expr.clone()).call_result(), None);
        assert!(expr.uses(Local(1)));
        assert!(expr.uses(Local(2)));
        assert!(!expr.uses(Local(3)));
    }

    #[test]
    fn test_arg_positions() {
        let a = Local(5);
        let expr = call(None, vec![Operand::Local(a), Operand::Constant, Operand::Local(a)]);
        assert_eq!(expr.arg_positions(a).collect::<Vec<_>>(), vec![0, 2]);
    }

    #[test]
    fn test_allocated_type() {
        let stmt = Stmt::Assign {
            lhs: Place::Local(Local(0)),
            rhs: Rvalue::NewArray(TypeId(2)),
        };
        assert_eq!(stmt.allocated_type(), Some(TypeId(2)));
        assert_eq!(Stmt::Nop.allocated_type(), None);
    }
}
