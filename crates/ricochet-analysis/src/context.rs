//! Context requesters
//!
//! When the backward search leaves a method it was not called into, it asks
//! the requester whether to continue at the method's call sites or to treat
//! the fact as an origin.

use ricochet_core::config::ContextPolicy;
use ricochet_core::{MethodId, StmtId};
use ricochet_program::Method;

pub trait ContextRequester: Send + Sync {
    /// Continue the backward search at `call_site`, a caller of `callee`
    fn continue_at_call_site(&self, call_site: StmtId, callee: MethodId) -> bool;

    /// Whether `method` is where execution starts
    fn is_entry_point_method(&self, method: &Method) -> bool {
        method.is_entry_point
    }
}

/// Requester for a configured policy
pub fn requester_for(policy: ContextPolicy) -> Box<dyn ContextRequester> {
    match policy {
        ContextPolicy::AllCallers => Box::new(AllCallersRequester),
        ContextPolicy::NoContext => Box::new(NoContextRequester),
    }
}

/// Expands into every caller
#[derive(Debug, Clone, Copy, Default)]
pub struct AllCallersRequester;

impl ContextRequester for AllCallersRequester {
    fn continue_at_call_site(&self, _call_site: StmtId, _callee: MethodId) -> bool {
        true
    }
}

/// Never leaves the method the query started in
#[derive(Debug, Clone, Copy, Default)]
pub struct NoContextRequester;

impl ContextRequester for NoContextRequester {
    fn continue_at_call_site(&self, _call_site: StmtId, _callee: MethodId) -> bool {
        false
    }
}
