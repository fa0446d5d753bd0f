//! Program files
//!
//! Programs are described in YAML or JSON:
//!
//! ```yaml
//! classes:
//!   - name: Node
//! methods:
//!   - name: main
//!     entry: true
//!     locals: { a: Node, b: Node, t: Object, x: Object }
//!     body:
//!       - a = new Node
//!       - b = a
//!       - t = new Object
//!       - b.next = t
//!       - "q: x = a.next"
//! queries:
//!   - method: main
//!     at: q
//!     path: a.next
//! ```

use crate::builder::ProgramBuilder;
use crate::program::Program;
use ricochet_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::debug;

/// A declared class
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassSpec {
    pub name: String,
    #[serde(default)]
    pub extends: Option<String>,
    #[serde(default)]
    pub implements: Vec<String>,
}

/// A declared method
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MethodSpec {
    pub name: String,
    /// Declaring class; methods without an owner are static
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(default, rename = "static")]
    pub is_static: bool,
    #[serde(default)]
    pub constructor: bool,
    #[serde(default)]
    pub entry: bool,
    #[serde(default)]
    pub ignored: bool,
    /// Parameter names, in order; each must be declared in `locals`
    #[serde(default)]
    pub params: Vec<String>,
    /// Local name to type name
    #[serde(default)]
    pub locals: BTreeMap<String, String>,
    #[serde(default)]
    pub body: Vec<String>,
}

impl MethodSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Make this an instance method of `owner`
    pub fn on(mut self, owner: impl Into<String>) -> Self {
        self.owner = Some(owner.into());
        self
    }

    pub fn entry(mut self) -> Self {
        self.entry = true;
        self
    }

    pub fn constructor(mut self) -> Self {
        self.constructor = true;
        self
    }

    pub fn ignored(mut self) -> Self {
        self.ignored = true;
        self
    }

    pub fn param(mut self, name: &str, ty: &str) -> Self {
        self.params.push(name.to_string());
        self.locals.insert(name.to_string(), ty.to_string());
        self
    }

    pub fn local(mut self, name: &str, ty: &str) -> Self {
        self.locals.insert(name.to_string(), ty.to_string());
        self
    }

    pub fn body(mut self, lines: &[&str]) -> Self {
        self.body = lines.iter().map(|line| line.to_string()).collect();
        self
    }
}

/// A query embedded in a program file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuerySpec {
    #[serde(default)]
    pub name: Option<String>,
    pub method: String,
    /// Statement label or source position
    pub at: String,
    pub path: String,
    /// Expected allocation sites, as `method:label` strings
    #[serde(default)]
    pub expect: Option<Vec<String>>,
}

/// Contents of a program file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgramSpec {
    #[serde(default)]
    pub classes: Vec<ClassSpec>,
    #[serde(default)]
    pub methods: Vec<MethodSpec>,
    #[serde(default)]
    pub queries: Vec<QuerySpec>,
}

impl ProgramSpec {
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        serde_yaml::from_str(content).map_err(|e| Error::Parse(e.to_string()))
    }

    pub fn from_json_str(content: &str) -> Result<Self> {
        serde_json::from_str(content).map_err(|e| Error::Parse(e.to_string()))
    }

    /// Read a program file; `.json` is JSON, anything else YAML
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        debug!("Loading program {:?}", path);
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => Self::from_json_str(&content),
            _ => Self::from_yaml_str(&content),
        }
    }
}

/// Load and build a program file
pub fn load_program(path: &Path) -> Result<Program> {
    let spec = ProgramSpec::load(path)?;
    ProgramBuilder::from_spec(spec)
        .build()
        .map_err(|e| match e {
            Error::Parse(msg) => Error::Parse(format!("{}: {}", path.display(), msg)),
            Error::Program(msg) => Error::Program(format!("{}: {}", path.display(), msg)),
            other => other,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    const PROGRAM: &str = r#"
classes:
  - name: A
methods:
  - name: main
    entry: true
    locals: { a: A, b: A }
    body:
      - a = new A
      - "q: b = a"
queries:
  - method: main
    at: q
    path: b
    expect: ["main:0"]
"#;

    #[test]
    fn test_parse_yaml_spec() {
        let spec = ProgramSpec::from_yaml_str(PROGRAM).unwrap();
        assert_eq!(spec.classes.len(), 1);
        assert_eq!(spec.methods[0].locals.get("a"), Some(&"A".to_string()));
        assert!(spec.methods[0].entry);
        assert_eq!(spec.queries[0].expect, Some(vec!["main:0".to_string()]));
    }

    #[test]
    fn test_load_program_file() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        file.write_all(PROGRAM.as_bytes()).unwrap();

        let program = load_program(file.path()).unwrap();
        assert_eq!(program.methods().len(), 1);
        assert_eq!(program.queries().len(), 1);
    }

    #[test]
    fn test_errors_name_the_file() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        file.write_all(b"methods:\n  - name: main\n    body: [\"x += 1\"]\n").unwrap();

        let err = load_program(file.path()).unwrap_err();
        assert!(err.to_string().contains(&file.path().display().to_string()));
    }

    #[test]
    fn test_json_spec() {
        let spec = ProgramSpec::from_json_str(
            r#"{"methods": [{"name": "f", "params": ["x"], "locals": {"x": "Object"}}]}"#,
        )
        .unwrap();
        assert_eq!(spec.methods[0].params, vec!["x".to_string()]);
    }
}
