//! Access paths
//!
//! An access path is a local (or nothing, for a static field) followed by
//! an optional field sequence, optionally anchored at the allocation site
//! the analysis traced it to. Access paths are immutable values; every
//! operation derives a new one. Equality and hashing are structural, so
//! they can key the path-edge indexes directly.

use crate::error::{Error, Result};
use crate::field::{Field, FieldLimits, FieldSequence};
use crate::ids::{FieldId, Local, StmtId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// The allocation an access path was traced to
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AllocationSite {
    pub point: StmtId,
    /// `null` assignments and conservative origins (parameters of entry points)
    pub is_null: bool,
}

/// A local or static root followed by a field sequence
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AccessPath {
    base: Option<Local>,
    fields: Option<FieldSequence>,
    allocation: Option<AllocationSite>,
}

impl AccessPath {
    /// A bare local
    pub fn local(base: Local) -> Self {
        Self {
            base: Some(base),
            fields: None,
            allocation: None,
        }
    }

    /// A local followed by a field chain
    pub fn new(base: Local, fields: Vec<Field>, limits: FieldLimits) -> Self {
        Self {
            base: Some(base),
            fields: FieldSequence::new(fields, limits),
            allocation: None,
        }
    }

    /// A static field followed by a field chain
    pub fn new_static(field: Field, tail: Vec<Field>, limits: FieldLimits) -> Self {
        let mut chain = vec![field];
        chain.extend(tail);
        Self {
            base: None,
            fields: FieldSequence::new(chain, limits),
            allocation: None,
        }
    }

    pub fn from_parts(base: Option<Local>, fields: Option<FieldSequence>) -> Self {
        Self {
            base,
            fields,
            allocation: None,
        }
    }

    pub fn base(&self) -> Option<Local> {
        self.base
    }

    pub fn fields(&self) -> Option<&FieldSequence> {
        self.fields.as_ref()
    }

    pub fn allocation_site(&self) -> Option<AllocationSite> {
        self.allocation
    }

    pub fn field_count(&self) -> usize {
        self.fields.as_ref().map_or(0, FieldSequence::len)
    }

    pub fn has_fields(&self) -> bool {
        self.fields.is_some()
    }

    pub fn has_allocation_site(&self) -> bool {
        self.allocation.is_some()
    }

    pub fn has_null_allocation_site(&self) -> bool {
        self.allocation.map_or(false, |site| site.is_null)
    }

    /// Rooted at a static field rather than a local
    pub fn is_static(&self) -> bool {
        self.base.is_none() && self.fields.is_some()
    }

    pub fn has_set_based_fields(&self) -> bool {
        self.fields.as_ref().map_or(false, FieldSequence::is_set)
    }

    pub fn base_matches(&self, local: Local) -> bool {
        self.base == Some(local)
    }

    pub fn first_field_must_match(&self, field: FieldId) -> bool {
        self.fields
            .as_ref()
            .map_or(false, |seq| seq.first_field_must_match(field))
    }

    pub fn first_field_may_match(&self, field: FieldId) -> bool {
        self.fields
            .as_ref()
            .map_or(false, |seq| seq.first_field_may_match(field))
    }

    /// `local.field...` with a definite first field
    pub fn base_and_first_field_match(&self, local: Local, field: FieldId) -> bool {
        self.base_matches(local) && self.first_field_must_match(field)
    }

    /// Fields that may be dereferenced first
    pub fn first_fields(&self) -> BTreeSet<Field> {
        self.fields
            .as_ref()
            .map(FieldSequence::entry_fields)
            .unwrap_or_default()
    }

    /// Fields that may be dereferenced last
    pub fn last_fields(&self) -> BTreeSet<Field> {
        self.fields
            .as_ref()
            .map(FieldSequence::exit_fields)
            .unwrap_or_default()
    }

    pub fn append_fields(&self, tail: &[Field], limits: FieldLimits) -> Self {
        if tail.is_empty() {
            return self.clone();
        }
        let fields = match &self.fields {
            Some(seq) => Some(seq.append(tail, limits)),
            None => FieldSequence::new(tail.to_vec(), limits),
        };
        Self {
            fields,
            ..self.clone()
        }
    }

    pub fn append_sequence(&self, tail: &FieldSequence, limits: FieldLimits) -> Self {
        let fields = match &self.fields {
            Some(seq) => seq.append_sequence(tail, limits),
            None => tail.clone(),
        };
        Self {
            fields: Some(fields),
            ..self.clone()
        }
    }

    pub fn prepend_field(&self, field: Field, limits: FieldLimits) -> Self {
        let fields = match &self.fields {
            Some(seq) => Some(seq.prepend(field, limits)),
            None => FieldSequence::new(vec![field], limits),
        };
        Self {
            fields,
            ..self.clone()
        }
    }

    /// Remove the first field
    ///
    /// A set-based path also yields the path without any field, since a
    /// set cannot tell whether the popped field was the last one.
    pub fn pop_first_field(&self) -> Result<Vec<AccessPath>> {
        let seq = self.require_fields()?;
        Ok(self.with_popped(seq, seq.pop_first()))
    }

    /// Remove the last field; set-based paths behave as in `pop_first_field`
    pub fn pop_last_field(&self) -> Result<Vec<AccessPath>> {
        let seq = self.require_fields()?;
        Ok(self.with_popped(seq, seq.pop_last()))
    }

    fn require_fields(&self) -> Result<&FieldSequence> {
        self.fields
            .as_ref()
            .ok_or_else(|| Error::EmptyFieldSequence(self.to_string()))
    }

    fn with_popped(&self, seq: &FieldSequence, rests: Vec<Option<FieldSequence>>) -> Vec<AccessPath> {
        let mut out: Vec<AccessPath> = rests
            .into_iter()
            .map(|fields| Self {
                fields,
                ..self.clone()
            })
            .collect();
        if seq.is_set() && self.base.is_some() {
            out.push(self.drop_tail());
        }
        out
    }

    pub fn with_base(&self, base: Local) -> Self {
        Self {
            base: Some(base),
            ..self.clone()
        }
    }

    pub fn with_allocation_site(&self, point: StmtId, is_null: bool) -> Self {
        Self {
            allocation: Some(AllocationSite { point, is_null }),
            ..self.clone()
        }
    }

    pub fn without_allocation_site(&self) -> Self {
        Self {
            allocation: None,
            ..self.clone()
        }
    }

    /// Keep only the base; not meaningful for static paths
    pub fn drop_tail(&self) -> Self {
        Self {
            fields: None,
            ..self.clone()
        }
    }

    /// Detach the path from its local, rooting it at its first (static) field
    pub fn make_static(&self) -> Self {
        Self {
            base: None,
            ..self.clone()
        }
    }

    pub fn over_approximate(&self) -> Self {
        Self {
            fields: self.fields.as_ref().map(FieldSequence::over_approximate),
            ..self.clone()
        }
    }

    /// Key used to match paths at the same statement regardless of their
    /// allocation anchor or field provenance
    pub fn erased(&self) -> Self {
        Self {
            base: self.base,
            fields: self.fields.as_ref().map(FieldSequence::erased),
            allocation: None,
        }
    }
}

impl fmt::Display for AccessPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.base {
            Some(base) => write!(f, "{}", base)?,
            None => write!(f, "<static>")?,
        }
        if let Some(fields) = &self.fields {
            write!(f, "{}", fields)?;
        }
        if let Some(site) = self.allocation {
            let marker = if site.is_null { "null@" } else { "@" };
            write!(f, " {}{}", marker, site.point)?;
        }
        Ok(())
    }
}
