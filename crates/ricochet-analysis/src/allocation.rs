//! Allocation-site classifiers
//!
//! The backward flow functions ask a classifier whether the statement they
//! just walked over creates the value a fact refers to. A `Some` answer ends
//! the backward search for that fact and turns the statement into an origin.

use ricochet_core::config::AllocationPolicy;
use ricochet_core::{AccessPath, FieldId};
use ricochet_program::{Operand, Rvalue};

/// A statement classified as the origin of a fact
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Allocation {
    /// `null` (or another value that never carries fields)
    pub is_null: bool,
}

impl Allocation {
    fn of(rhs: &Rvalue) -> Self {
        Self {
            is_null: matches!(rhs, Rvalue::Null),
        }
    }
}

/// Decides which statements allocate the value a fact refers to
pub trait AllocationSiteClassifier: Send + Sync {
    /// `x = rhs` where the fact is based on `x`
    fn assign(&self, rhs: &Rvalue, fact: &AccessPath) -> Option<Allocation>;

    /// `x[] = value` where the fact is `x[]...`
    fn array_store(&self, value: &Rvalue, fact: &AccessPath) -> Option<Allocation>;

    /// `x = call m()` where `m` returns `returned` and the fact is based on `x`
    fn return_via_call(&self, returned: Option<&Operand>, fact: &AccessPath) -> Option<Allocation>;

    /// `x.f = value` where the fact is `x.f...`
    fn field_store(&self, value: &Rvalue, fact: &AccessPath) -> Option<Allocation>;

    fn name(&self) -> &str;
}

/// Classifier for a configured policy
pub fn classifier_for(policy: AllocationPolicy) -> Box<dyn AllocationSiteClassifier> {
    match policy {
        AllocationPolicy::Reference => Box::new(ReferenceTypeClassifier),
        AllocationPolicy::PrimitiveAndReference => Box::new(PrimitiveAndReferenceClassifier),
    }
}

/// A fact the allocated value itself can stand for: the bare local, or
/// the local's array elements
fn is_allocated_shape(fact: &AccessPath) -> bool {
    match fact.field_count() {
        0 => true,
        1 => fact.first_field_must_match(FieldId::ARRAY),
        _ => false,
    }
}

/// `new`, `newarray` and `null` allocate
#[derive(Debug, Clone, Copy, Default)]
pub struct ReferenceTypeClassifier;

impl ReferenceTypeClassifier {
    fn is_allocation_value(rhs: &Rvalue) -> bool {
        matches!(rhs, Rvalue::New(_) | Rvalue::NewArray(_) | Rvalue::Null)
    }
}

impl AllocationSiteClassifier for ReferenceTypeClassifier {
    fn assign(&self, rhs: &Rvalue, fact: &AccessPath) -> Option<Allocation> {
        if !Self::is_allocation_value(rhs) || fact.has_set_based_fields() || !is_allocated_shape(fact) {
            return None;
        }
        Some(Allocation::of(rhs))
    }

    fn array_store(&self, value: &Rvalue, _fact: &AccessPath) -> Option<Allocation> {
        Self::is_allocation_value(value).then(|| Allocation::of(value))
    }

    fn return_via_call(&self, returned: Option<&Operand>, fact: &AccessPath) -> Option<Allocation> {
        match returned {
            Some(Operand::Null) if !fact.has_fields() => Some(Allocation { is_null: true }),
            _ => None,
        }
    }

    fn field_store(&self, value: &Rvalue, fact: &AccessPath) -> Option<Allocation> {
        (matches!(value, Rvalue::Null) && fact.field_count() == 1).then_some(Allocation { is_null: true })
    }

    fn name(&self) -> &str {
        "reference"
    }
}

/// Reference allocations plus constants
#[derive(Debug, Clone, Copy, Default)]
pub struct PrimitiveAndReferenceClassifier;

impl PrimitiveAndReferenceClassifier {
    fn is_allocation_value(rhs: &Rvalue) -> bool {
        ReferenceTypeClassifier::is_allocation_value(rhs) || matches!(rhs, Rvalue::Constant)
    }
}

impl AllocationSiteClassifier for PrimitiveAndReferenceClassifier {
    fn assign(&self, rhs: &Rvalue, fact: &AccessPath) -> Option<Allocation> {
        if !Self::is_allocation_value(rhs) || !is_allocated_shape(fact) {
            return None;
        }
        Some(Allocation::of(rhs))
    }

    fn array_store(&self, value: &Rvalue, _fact: &AccessPath) -> Option<Allocation> {
        Self::is_allocation_value(value).then(|| Allocation::of(value))
    }

    fn return_via_call(&self, returned: Option<&Operand>, fact: &AccessPath) -> Option<Allocation> {
        ReferenceTypeClassifier.return_via_call(returned, fact)
    }

    fn field_store(&self, value: &Rvalue, fact: &AccessPath) -> Option<Allocation> {
        ReferenceTypeClassifier.field_store(value, fact)
    }

    fn name(&self) -> &str {
        "primitive_and_reference"
    }
}
