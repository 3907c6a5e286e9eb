//! Caller identity
//!
//! Immutable per request; every retrieval filter derives from it.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// The authenticated caller of a query.
///
/// `languages` is an ordered preference list; empty means "any language".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallerContext {
    /// User identifier within the tenant.
    #[serde(alias = "id")]
    pub user_id: String,
    /// Tenant identifier. Candidates from any other tenant are a leak.
    pub tenant_id: String,
    /// Group memberships, matched against document ACLs.
    #[serde(default)]
    pub group_ids: Vec<String>,
    /// Ordered language preference (BCP-47 primary subtags, e.g. "en").
    #[serde(default)]
    pub languages: Vec<String>,
}

impl CallerContext {
    /// Validate the context at the pipeline boundary.
    pub fn validate(&self) -> Result<()> {
        if self.tenant_id.trim().is_empty() {
            return Err(Error::InvalidCaller("tenantId is required".into()));
        }
        if self.user_id.trim().is_empty() {
            return Err(Error::InvalidCaller("userId is required".into()));
        }
        Ok(())
    }

    /// All principals this caller acts as: the user id plus group ids.
    pub fn principals(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.user_id.as_str()).chain(self.group_ids.iter().map(String::as_str))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caller() -> CallerContext {
        CallerContext {
            user_id: "u1".into(),
            tenant_id: "tenantA".into(),
            group_ids: vec!["g.readers".into()],
            languages: vec!["en".into()],
        }
    }

    #[test]
    fn test_validate_ok() {
        assert!(caller().validate().is_ok());
    }

    #[test]
    fn test_validate_missing_tenant() {
        let mut c = caller();
        c.tenant_id = "  ".into();
        assert!(matches!(c.validate(), Err(Error::InvalidCaller(_))));
    }

    #[test]
    fn test_principals_includes_user_and_groups() {
        let c = caller();
        let principals: Vec<&str> = c.principals().collect();
        assert_eq!(principals, vec!["u1", "g.readers"]);
    }

    #[test]
    fn test_deserialize_camel_case() {
        let json = r#"{"id":"u1","tenantId":"tenantA","groupIds":["g1"],"languages":[]}"#;
        let c: CallerContext = serde_json::from_str(json).unwrap();
        assert_eq!(c.user_id, "u1");
        assert_eq!(c.tenant_id, "tenantA");
    }
}
