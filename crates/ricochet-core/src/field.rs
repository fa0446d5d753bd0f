//! Fields and field sequences
//!
//! A field sequence is the finite abstraction of a chain of field
//! dereferences such as `.next.next.value`. Three representations exist:
//!
//! - `Exact` - the precise chain
//! - `Bounded` - a precise prefix of at most K fields; `over_approximated`
//!   marks a chain whose tail was cut off
//! - `Set` - an unordered set of the fields the chain may consist of
//!
//! A chain that repeats a field (a cycle through a recursive structure) or,
//! for `Exact`, grows past K is replaced by a `Set`. A `Set` never turns
//! back into an ordered chain, so the field domain of a query stays finite.
//! An empty chain is never represented; callers use `Option<FieldSequence>`.

use crate::config::FieldAbstraction;
use crate::ids::{FieldId, StmtId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// A field dereference, optionally tagged with the statement that stored it
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Field {
    pub id: FieldId,
    pub origin: Option<StmtId>,
}

impl Field {
    pub fn new(id: FieldId) -> Self {
        Self { id, origin: None }
    }

    /// A field carrying the statement that wrote it
    pub fn stored_at(id: FieldId, stmt: StmtId) -> Self {
        Self {
            id,
            origin: Some(stmt),
        }
    }

    pub fn array() -> Self {
        Self::new(FieldId::ARRAY)
    }

    pub fn is_array(&self) -> bool {
        self.id.is_array()
    }

    /// The field without statement provenance
    pub fn erased(self) -> Self {
        Self::new(self.id)
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.origin {
            Some(stmt) => write!(f, "{}@{}", self.id, stmt),
            None => write!(f, "{}", self.id),
        }
    }
}

/// The bound K and the representation used for new sequences
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FieldLimits {
    pub k: usize,
    pub abstraction: FieldAbstraction,
}

impl FieldLimits {
    /// Limits with bound `k` (at least 1)
    pub fn new(k: usize, abstraction: FieldAbstraction) -> Self {
        Self {
            k: k.max(1),
            abstraction,
        }
    }
}

impl Default for FieldLimits {
    fn default() -> Self {
        Self::new(5, FieldAbstraction::Exact)
    }
}

/// Finite abstraction of a non-empty field chain
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum FieldSequence {
    Exact(Vec<Field>),
    Bounded {
        fields: Vec<Field>,
        over_approximated: bool,
    },
    Set(BTreeSet<Field>),
}

impl FieldSequence {
    /// Build a sequence from a chain; `None` for an empty chain
    pub fn new(fields: Vec<Field>, limits: FieldLimits) -> Option<Self> {
        Self::from_chain(fields, false, limits)
    }

    fn from_chain(fields: Vec<Field>, over_approximated: bool, limits: FieldLimits) -> Option<Self> {
        if fields.is_empty() {
            return None;
        }
        let seq = match limits.abstraction {
            FieldAbstraction::Exact if over_approximated => {
                FieldSequence::Set(fields.into_iter().collect())
            }
            FieldAbstraction::Exact => FieldSequence::Exact(fields),
            FieldAbstraction::KLimited => FieldSequence::Bounded {
                fields,
                over_approximated,
            },
        };
        Some(seq.normalized(limits))
    }

    /// Apply the over-approximation rules after a chain grew
    fn normalized(self, limits: FieldLimits) -> Self {
        if self.should_over_approximate(limits) {
            return self.over_approximate();
        }
        match self {
            FieldSequence::Bounded { mut fields, .. } if fields.len() > limits.k => {
                fields.truncate(limits.k);
                FieldSequence::Bounded {
                    fields,
                    over_approximated: true,
                }
            }
            other => other,
        }
    }

    /// Whether this sequence must collapse into a `Set`
    pub fn should_over_approximate(&self, limits: FieldLimits) -> bool {
        match self {
            FieldSequence::Exact(fields) => fields.len() > limits.k || has_repeated_field(fields),
            FieldSequence::Bounded { fields, .. } => has_repeated_field(fields),
            FieldSequence::Set(_) => false,
        }
    }

    /// Collapse into a `Set` holding every field of the chain
    pub fn over_approximate(&self) -> Self {
        match self {
            FieldSequence::Set(_) => self.clone(),
            FieldSequence::Exact(fields) | FieldSequence::Bounded { fields, .. } => {
                FieldSequence::Set(fields.iter().copied().collect())
            }
        }
    }

    pub fn is_set(&self) -> bool {
        matches!(self, FieldSequence::Set(_))
    }

    /// Whether the chain continues past what is represented
    pub fn is_over_approximated(&self) -> bool {
        match self {
            FieldSequence::Exact(_) => false,
            FieldSequence::Bounded {
                over_approximated, ..
            } => *over_approximated,
            FieldSequence::Set(_) => true,
        }
    }

    /// Number of represented fields
    pub fn len(&self) -> usize {
        match self {
            FieldSequence::Exact(fields) | FieldSequence::Bounded { fields, .. } => fields.len(),
            FieldSequence::Set(set) => set.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Represented fields; chain order for ordered variants, sorted for `Set`
    pub fn fields(&self) -> Vec<Field> {
        match self {
            FieldSequence::Exact(fields) | FieldSequence::Bounded { fields, .. } => fields.clone(),
            FieldSequence::Set(set) => set.iter().copied().collect(),
        }
    }

    pub fn contains(&self, id: FieldId) -> bool {
        match self {
            FieldSequence::Exact(fields) | FieldSequence::Bounded { fields, .. } => {
                fields.iter().any(|f| f.id == id)
            }
            FieldSequence::Set(set) => set.iter().any(|f| f.id == id),
        }
    }

    /// Append a chain of fields
    pub fn append(&self, tail: &[Field], limits: FieldLimits) -> Self {
        match self {
            FieldSequence::Exact(fields) => {
                let mut chain = fields.clone();
                chain.extend_from_slice(tail);
                FieldSequence::Exact(chain).normalized(limits)
            }
            // The cut-off tail already stands for anything that follows.
            FieldSequence::Bounded {
                over_approximated: true,
                ..
            } => self.clone(),
            FieldSequence::Bounded { fields, .. } => {
                let mut chain = fields.clone();
                chain.extend_from_slice(tail);
                FieldSequence::Bounded {
                    fields: chain,
                    over_approximated: false,
                }
                .normalized(limits)
            }
            FieldSequence::Set(set) => {
                let mut set = set.clone();
                set.extend(tail.iter().copied());
                FieldSequence::Set(set)
            }
        }
    }

    /// Append another sequence
    pub fn append_sequence(&self, other: &FieldSequence, limits: FieldLimits) -> Self {
        if self.is_set() || other.is_set() {
            let mut set: BTreeSet<Field> = self.fields().into_iter().collect();
            set.extend(other.fields());
            return FieldSequence::Set(set);
        }
        let appended = self.append(&other.fields(), limits);
        if other.is_over_approximated() {
            appended.with_unknown_tail()
        } else {
            appended
        }
    }

    fn with_unknown_tail(self) -> Self {
        match self {
            FieldSequence::Bounded { fields, .. } => FieldSequence::Bounded {
                fields,
                over_approximated: true,
            },
            FieldSequence::Exact(_) => self.over_approximate(),
            set => set,
        }
    }

    /// Prepend a single field
    pub fn prepend(&self, field: Field, limits: FieldLimits) -> Self {
        match self {
            FieldSequence::Exact(fields) => {
                let mut chain = Vec::with_capacity(fields.len() + 1);
                chain.push(field);
                chain.extend_from_slice(fields);
                FieldSequence::Exact(chain).normalized(limits)
            }
            FieldSequence::Bounded {
                fields,
                over_approximated,
            } => {
                let mut chain = Vec::with_capacity(fields.len() + 1);
                chain.push(field);
                chain.extend_from_slice(fields);
                FieldSequence::Bounded {
                    fields: chain,
                    over_approximated: *over_approximated,
                }
                .normalized(limits)
            }
            FieldSequence::Set(set) => {
                let mut set = set.clone();
                set.insert(field);
                FieldSequence::Set(set)
            }
        }
    }

    /// Remove the first field; `None` stands for the empty remainder
    ///
    /// A `Set` cannot shrink and pops to itself.
    pub fn pop_first(&self) -> Vec<Option<FieldSequence>> {
        match self {
            FieldSequence::Exact(fields) => {
                vec![nonempty(fields[1..].to_vec()).map(FieldSequence::Exact)]
            }
            FieldSequence::Bounded {
                fields,
                over_approximated,
            } => {
                let rest = fields[1..].to_vec();
                match (rest.is_empty(), over_approximated) {
                    (true, true) => vec![None, Some(self.clone())],
                    (true, false) => vec![None],
                    (false, _) => vec![Some(FieldSequence::Bounded {
                        fields: rest,
                        over_approximated: *over_approximated,
                    })],
                }
            }
            FieldSequence::Set(_) => vec![Some(self.clone())],
        }
    }

    /// Remove the last field; `None` stands for the empty remainder
    ///
    /// A `Set`, or a chain whose tail was cut off, pops to itself.
    pub fn pop_last(&self) -> Vec<Option<FieldSequence>> {
        match self {
            FieldSequence::Exact(fields) => {
                vec![nonempty(fields[..fields.len() - 1].to_vec()).map(FieldSequence::Exact)]
            }
            FieldSequence::Bounded {
                over_approximated: true,
                ..
            }
            | FieldSequence::Set(_) => vec![Some(self.clone())],
            FieldSequence::Bounded { fields, .. } => {
                vec![nonempty(fields[..fields.len() - 1].to_vec()).map(|fields| {
                    FieldSequence::Bounded {
                        fields,
                        over_approximated: false,
                    }
                })]
            }
        }
    }

    /// Fields that may be dereferenced first
    pub fn entry_fields(&self) -> BTreeSet<Field> {
        match self {
            FieldSequence::Exact(fields) | FieldSequence::Bounded { fields, .. } => {
                fields.first().copied().into_iter().collect()
            }
            FieldSequence::Set(set) => set.clone(),
        }
    }

    /// Fields that may be dereferenced last
    pub fn exit_fields(&self) -> BTreeSet<Field> {
        match self {
            FieldSequence::Exact(fields)
            | FieldSequence::Bounded {
                fields,
                over_approximated: false,
            } => fields.last().copied().into_iter().collect(),
            FieldSequence::Bounded { fields, .. } => fields.iter().copied().collect(),
            FieldSequence::Set(set) => set.clone(),
        }
    }

    /// The first field is definitely `id`; never true for a `Set`
    pub fn first_field_must_match(&self, id: FieldId) -> bool {
        match self {
            FieldSequence::Exact(fields) | FieldSequence::Bounded { fields, .. } => {
                fields.first().map_or(false, |f| f.id == id)
            }
            FieldSequence::Set(_) => false,
        }
    }

    /// The first field may be `id`
    pub fn first_field_may_match(&self, id: FieldId) -> bool {
        match self {
            FieldSequence::Set(_) => self.contains(id),
            _ => self.first_field_must_match(id),
        }
    }

    /// The same sequence without statement provenance
    pub fn erased(&self) -> Self {
        match self {
            FieldSequence::Exact(fields) => {
                FieldSequence::Exact(fields.iter().map(|f| f.erased()).collect())
            }
            FieldSequence::Bounded {
                fields,
                over_approximated,
            } => FieldSequence::Bounded {
                fields: fields.iter().map(|f| f.erased()).collect(),
                over_approximated: *over_approximated,
            },
            FieldSequence::Set(set) => FieldSequence::Set(set.iter().map(|f| f.erased()).collect()),
        }
    }
}

fn nonempty(fields: Vec<Field>) -> Option<Vec<Field>> {
    if fields.is_empty() {
        None
    } else {
        Some(fields)
    }
}

fn has_repeated_field(fields: &[Field]) -> bool {
    let mut seen = BTreeSet::new();
    fields.iter().any(|f| !seen.insert(f.id))
}

impl fmt::Display for FieldSequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldSequence::Exact(fields) => {
                for field in fields {
                    write!(f, ".{}", field)?;
                }
                Ok(())
            }
            FieldSequence::Bounded {
                fields,
                over_approximated,
            } => {
                for field in fields {
                    write!(f, ".{}", field)?;
                }
                if *over_approximated {
                    write!(f, ".*")?;
                }
                Ok(())
            }
            FieldSequence::Set(set) => {
                let names: Vec<String> = set.iter().map(|field| field.to_string()).collect();
                write!(f, ".{{{}}}", names.join(","))
            }
        }
    }
}
