//! Statement text parser
//!
//! Parses the small three-address syntax used by program files:
//!
//! ```text
//! x = new T          x = newarray T      x = null        x = 42
//! x = y              x = (T) y           x = y.f         x.f = y
//! x = y[]            x[] = y             x = T::f        T::f = y
//! x = call m(a, b)   call y.m(a)         return x        goto L
//! if goto L          nop                 L: <statement>
//! ```
//!
//! Names are kept as strings; `ProgramBuilder` resolves them.

use regex::Regex;
use ricochet_core::{Error, Result};

/// Parsed operand of a call, store or return
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperandText {
    Local(String),
    Null,
    Constant,
}

/// Parsed assignment target
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaceText {
    Local(String),
    Field { base: String, field: String },
    Static { owner: String, field: String },
    Array(String),
}

/// Parsed call expression
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallText {
    pub receiver: Option<String>,
    pub name: String,
    pub args: Vec<OperandText>,
}

/// Parsed right-hand side
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RvalueText {
    Read(PlaceText),
    New(String),
    NewArray(String),
    Cast { ty: String, local: String },
    Call(CallText),
    Operand(OperandText),
}

/// Parsed statement
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StmtText {
    Nop,
    Goto(String),
    If(String),
    Return(Option<OperandText>),
    Invoke(CallText),
    Assign { lhs: PlaceText, rhs: RvalueText },
}

/// A statement with its optional label
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedLine {
    pub label: Option<String>,
    pub stmt: StmtText,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Shape {
    Nop,
    Goto,
    If,
    Return,
    Invoke,
    AssignCall,
    New,
    NewArray,
    Cast,
    FieldLoad,
    ArrayLoad,
    StaticLoad,
    FieldStore,
    ArrayStore,
    StaticStore,
    Operand,
}

/// Pattern for one statement shape
struct StatementPattern {
    shape: Shape,
    regex: Regex,
}

/// Regex-driven statement parser
pub struct StatementParser {
    label: Regex,
    patterns: Vec<StatementPattern>,
}

impl StatementParser {
    /// Create a parser with the built-in statement shapes
    pub fn new() -> Self {
        Self {
            label: Regex::new(r"^([A-Za-z_]\w*):(?:\s+(.*))?$").unwrap(),
            patterns: Self::default_patterns(),
        }
    }

    fn default_patterns() -> Vec<StatementPattern> {
        let pattern = |shape, regex: &str| StatementPattern {
            shape,
            regex: Regex::new(regex).unwrap(),
        };
        // Order matters: constants must be tried before plain copies.
        vec![
            pattern(Shape::Nop, r"^nop$"),
            pattern(Shape::Goto, r"^goto\s+(\w+)$"),
            pattern(Shape::If, r"^if\s+goto\s+(\w+)$"),
            pattern(Shape::Return, r"^return(?:\s+(\S+))?$"),
            pattern(Shape::Invoke, r"^call\s+(?:(\w+)\.)?(\w+)\s*\(([^)]*)\)$"),
            pattern(
                Shape::AssignCall,
                r"^(\w+)\s*=\s*call\s+(?:(\w+)\.)?(\w+)\s*\(([^)]*)\)$",
            ),
            pattern(Shape::New, r"^(\w+)\s*=\s*new\s+(\w+)$"),
            pattern(Shape::NewArray, r"^(\w+)\s*=\s*newarray\s+(\w+)$"),
            pattern(Shape::Cast, r"^(\w+)\s*=\s*\(\s*(\w+)\s*\)\s*(\w+)$"),
            pattern(Shape::FieldLoad, r"^(\w+)\s*=\s*(\w+)\.(\w+)$"),
            pattern(Shape::ArrayLoad, r"^(\w+)\s*=\s*(\w+)\[\]$"),
            pattern(Shape::StaticLoad, r"^(\w+)\s*=\s*(\w+)::(\w+)$"),
            pattern(Shape::FieldStore, r"^(\w+)\.(\w+)\s*=\s*(\S+)$"),
            pattern(Shape::ArrayStore, r"^(\w+)\[\]\s*=\s*(\S+)$"),
            pattern(Shape::StaticStore, r"^(\w+)::(\w+)\s*=\s*(\S+)$"),
            pattern(Shape::Operand, r"^(\w+)\s*=\s*(\S+)$"),
        ]
    }

    /// Parse one line of a method body
    pub fn parse_line(&self, line: &str) -> Result<ParsedLine> {
        let line = line.trim();
        if let Some(caps) = self.label.captures(line) {
            let label = caps[1].to_string();
            let stmt = match caps.get(2).map(|m| m.as_str().trim()) {
                Some(rest) if !rest.is_empty() => self.parse_stmt(rest)?,
                _ => StmtText::Nop,
            };
            return Ok(ParsedLine {
                label: Some(label),
                stmt,
            });
        }
        Ok(ParsedLine {
            label: None,
            stmt: self.parse_stmt(line)?,
        })
    }

    /// Parse a statement without label
    pub fn parse_stmt(&self, text: &str) -> Result<StmtText> {
        for pattern in &self.patterns {
            if let Some(caps) = pattern.regex.captures(text) {
                let cap = |i: usize| caps.get(i).map(|m| m.as_str().to_string());
                let req = |i: usize| cap(i).unwrap_or_default();
                let stmt = match pattern.shape {
                    Shape::Nop => StmtText::Nop,
                    Shape::Goto => StmtText::Goto(req(1)),
                    Shape::If => StmtText::If(req(1)),
                    Shape::Return => StmtText::Return(cap(1).map(|op| parse_operand(&op))),
                    Shape::Invoke => StmtText::Invoke(CallText {
                        receiver: cap(1),
                        name: req(2),
                        args: parse_args(&req(3)),
                    }),
                    Shape::AssignCall => StmtText::Assign {
                        lhs: PlaceText::Local(req(1)),
                        rhs: RvalueText::Call(CallText {
                            receiver: cap(2),
                            name: req(3),
                            args: parse_args(&req(4)),
                        }),
                    },
                    Shape::New => assign_local(req(1), RvalueText::New(req(2))),
                    Shape::NewArray => assign_local(req(1), RvalueText::NewArray(req(2))),
                    Shape::Cast => assign_local(
                        req(1),
                        RvalueText::Cast {
                            ty: req(2),
                            local: req(3),
                        },
                    ),
                    Shape::FieldLoad => assign_local(
                        req(1),
                        RvalueText::Read(PlaceText::Field {
                            base: req(2),
                            field: req(3),
                        }),
                    ),
                    Shape::ArrayLoad => {
                        assign_local(req(1), RvalueText::Read(PlaceText::Array(req(2))))
                    }
                    Shape::StaticLoad => assign_local(
                        req(1),
                        RvalueText::Read(PlaceText::Static {
                            owner: req(2),
                            field: req(3),
                        }),
                    ),
                    Shape::FieldStore => StmtText::Assign {
                        lhs: PlaceText::Field {
                            base: req(1),
                            field: req(2),
                        },
                        rhs: RvalueText::Operand(parse_operand(&req(3))),
                    },
                    Shape::ArrayStore => StmtText::Assign {
                        lhs: PlaceText::Array(req(1)),
                        rhs: RvalueText::Operand(parse_operand(&req(2))),
                    },
                    Shape::StaticStore => StmtText::Assign {
                        lhs: PlaceText::Static {
                            owner: req(1),
                            field: req(2),
                        },
                        rhs: RvalueText::Operand(parse_operand(&req(3))),
                    },
                    Shape::Operand => {
                        assign_local(req(1), RvalueText::Operand(parse_operand(&req(2))))
                    }
                };
                return Ok(stmt);
            }
        }
        Err(Error::Parse(format!("unrecognized statement `{}`", text)))
    }
}

impl Default for StatementParser {
    fn default() -> Self {
        Self::new()
    }
}

fn assign_local(local: String, rhs: RvalueText) -> StmtText {
    StmtText::Assign {
        lhs: PlaceText::Local(local),
        rhs,
    }
}

fn parse_args(text: &str) -> Vec<OperandText> {
    text.split(',')
        .map(str::trim)
        .filter(|arg| !arg.is_empty())
        .map(parse_operand)
        .collect()
}

fn parse_operand(text: &str) -> OperandText {
    let text = text.trim();
    if text == "null" {
        return OperandText::Null;
    }
    let is_literal = text == "true"
        || text == "false"
        || text.starts_with('"')
        || text.starts_with('-')
        || text.chars().next().map_or(false, |c| c.is_ascii_digit());
    if is_literal {
        OperandText::Constant
    } else {
        OperandText::Local(text.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn parse(text: &str) -> StmtText {
        StatementParser::new().parse_stmt(text).unwrap()
    }

    fn local(name: &str) -> OperandText {
        OperandText::Local(name.to_string())
    }

    #[test]
    fn test_allocations_and_copies() {
        assert_eq!(
            parse("a = new A"),
            StmtText::Assign {
                lhs: PlaceText::Local("a".into()),
                rhs: RvalueText::New("A".into()),
            }
        );
        assert_eq!(
            parse("b = a"),
            StmtText::Assign {
                lhs: PlaceText::Local("b".into()),
                rhs: RvalueText::Operand(local("a")),
            }
        );
        assert_eq!(
            parse("x = 42"),
            StmtText::Assign {
                lhs: PlaceText::Local("x".into()),
                rhs: RvalueText::Operand(OperandText::Constant),
            }
        );
        assert_eq!(
            parse("x = null"),
            StmtText::Assign {
                lhs: PlaceText::Local("x".into()),
                rhs: RvalueText::Operand(OperandText::Null),
            }
        );
    }

    #[test]
    fn test_field_array_and_static_accesses() {
        assert_eq!(
            parse("b.f = t"),
            StmtText::Assign {
                lhs: PlaceText::Field {
                    base: "b".into(),
                    field: "f".into()
                },
                rhs: RvalueText::Operand(local("t")),
            }
        );
        assert_eq!(
            parse("x = y[]"),
            StmtText::Assign {
                lhs: PlaceText::Local("x".into()),
                rhs: RvalueText::Read(PlaceText::Array("y".into())),
            }
        );
        assert_eq!(
            parse("Cfg::inst = y"),
            StmtText::Assign {
                lhs: PlaceText::Static {
                    owner: "Cfg".into(),
                    field: "inst".into()
                },
                rhs: RvalueText::Operand(local("y")),
            }
        );
        assert_eq!(
            parse("x = (B) y"),
            StmtText::Assign {
                lhs: PlaceText::Local("x".into()),
                rhs: RvalueText::Cast {
                    ty: "B".into(),
                    local: "y".into()
                },
            }
        );
    }

    #[test]
    fn test_calls() {
        assert_eq!(
            parse("call o.set(a, null, 3)"),
            StmtText::Invoke(CallText {
                receiver: Some("o".into()),
                name: "set".into(),
                args: vec![local("a"), OperandText::Null, OperandText::Constant],
            })
        );
        assert_eq!(
            parse("r = call id()"),
            StmtText::Assign {
                lhs: PlaceText::Local("r".into()),
                rhs: RvalueText::Call(CallText {
                    receiver: None,
                    name: "id".into(),
                    args: vec![],
                }),
            }
        );
    }

    #[test]
    fn test_control_flow_and_labels() {
        let parser = StatementParser::new();
        assert_eq!(
            parser.parse_line("loop: n = n.next").unwrap(),
            ParsedLine {
                label: Some("loop".into()),
                stmt: StmtText::Assign {
                    lhs: PlaceText::Local("n".into()),
                    rhs: RvalueText::Read(PlaceText::Field {
                        base: "n".into(),
                        field: "next".into()
                    }),
                },
            }
        );
        assert_eq!(parser.parse_line("end:").unwrap().stmt, StmtText::Nop);
        assert_eq!(parse("if goto loop"), StmtText::If("loop".into()));
        assert_eq!(parse("return"), StmtText::Return(None));
        assert_eq!(parse("return x"), StmtText::Return(Some(local("x"))));
    }

    #[test]
    fn test_static_store_is_not_a_label() {
        let line = StatementParser::new().parse_line("A::f = y").unwrap();
        assert_eq!(line.label, None);
    }

    #[test]
    fn test_unrecognized_statement() {
        let err = StatementParser::new().parse_stmt("x += 1").unwrap_err();
        assert!(err.to_string().contains("x += 1"));
    }
}
