//! Access filter
//!
//! Turns the caller context into the mandatory tenant + ACL + language
//! filter. Two forms are produced from the same data: a push-down form the
//! store applies server-side and an in-process predicate re-checked at the
//! fusion and guardrail boundaries. They are semantically identical by
//! construction.

use std::collections::HashSet;

use ragline_core::{CallerContext, Error, Payload, QueryOverrides, Result};

use crate::store::StoreFilter;

/// The request's access filter.
#[derive(Debug, Clone)]
pub struct AccessFilter {
    tenant: String,
    principals: HashSet<String>,
    /// Ordered preference; empty admits any language.
    languages: Vec<String>,
}

impl AccessFilter {
    /// Build the filter for a caller.
    ///
    /// A tenant override in `overrides` is only accepted when it names the
    /// caller's own tenant; anything else is refused, not narrowed.
    pub fn from_caller(caller: &CallerContext, overrides: Option<&QueryOverrides>) -> Result<Self> {
        caller.validate()?;

        if let Some(requested) = overrides.and_then(|o| o.tenant.as_deref()) {
            if requested != caller.tenant_id {
                return Err(Error::InvalidCaller(format!(
                    "caller in tenant {} may not query tenant {requested}",
                    caller.tenant_id
                )));
            }
        }

        Ok(Self {
            tenant: caller.tenant_id.clone(),
            principals: caller.principals().map(str::to_string).collect(),
            languages: caller.languages.clone(),
        })
    }

    pub fn tenant(&self) -> &str {
        &self.tenant
    }

    /// Push-down form for the store.
    pub fn to_store(&self) -> StoreFilter {
        let mut principals: Vec<String> = self.principals.iter().cloned().collect();
        principals.sort();
        StoreFilter {
            tenant: self.tenant.clone(),
            principals,
            languages: self.languages.clone(),
        }
    }

    /// In-process form, applied to every candidate that re-enters the
    /// pipeline from any path (search results, sibling fetches).
    pub fn allows(&self, payload: &Payload) -> bool {
        if payload.tenant != self.tenant {
            return false;
        }
        if !payload.acl.iter().any(|p| self.principals.contains(p)) {
            return false;
        }
        if !self.languages.is_empty() && !self.languages.iter().any(|l| *l == payload.lang) {
            return false;
        }
        true
    }

    /// Defense-in-depth check at stage boundaries. A tenant mismatch is an
    /// invariant violation and a potential leak, not a filtering event.
    pub fn verify_candidate(&self, payload: &Payload, chunk_id: &str) -> Result<()> {
        if payload.tenant != self.tenant {
            tracing::error!(
                target: "audit",
                chunk = chunk_id,
                expected_tenant = %self.tenant,
                actual_tenant = %payload.tenant,
                "cross-tenant candidate discarded"
            );
            return Err(Error::InvariantViolation(format!(
                "candidate {chunk_id} carries tenant {}",
                payload.tenant
            )));
        }
        if !self.allows(payload) {
            return Err(Error::InvariantViolation(format!(
                "candidate {chunk_id} fails ACL/language re-check"
            )));
        }
        Ok(())
    }
}
