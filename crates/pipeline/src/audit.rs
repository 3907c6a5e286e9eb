//! Guardrail audit log
//!
//! Exactly one structured record per guardrail decision, accepted or
//! refused, on the dedicated `audit` tracing target. Query text is
//! hashed, never stored; document content never enters a record.

use sha2::{Digest, Sha256};

use ragline_core::{CallerContext, Decision, GuardrailReport};

/// Stable, non-reversible digest of the query text.
pub fn query_hash(text: &str) -> String {
    let digest = Sha256::digest(text.as_bytes());
    let hex = format!("{digest:x}");
    hex[..16].to_string()
}

/// Write the audit record for a guardrail decision.
pub fn audit_decision(
    route: &str,
    request_id: &str,
    caller: &CallerContext,
    query_text: &str,
    report: &GuardrailReport,
) {
    let decision = match report.decision {
        Decision::Answerable => "answerable",
        Decision::Refused => "refused",
    };
    tracing::info!(
        target: "audit",
        timestamp = %chrono::Utc::now().to_rfc3339(),
        route,
        request_id,
        user_id = %caller.user_id,
        tenant_id = %caller.tenant_id,
        query_hash = %query_hash(query_text),
        decision,
        confidence = report.confidence,
        reason_code = report.reason_code.map(|r| r.as_str()),
        failed_criteria = ?report.failed_criteria,
        "guardrail decision"
    );
}

/// Security event for invariant violations (e.g. a cross-tenant candidate).
pub fn audit_security_event(request_id: &str, caller: &CallerContext, detail: &str) {
    tracing::error!(
        target: "audit",
        timestamp = %chrono::Utc::now().to_rfc3339(),
        request_id,
        user_id = %caller.user_id,
        tenant_id = %caller.tenant_id,
        detail,
        "security event"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_hash_stable_and_short() {
        let a = query_hash("How long is a day in Isharoth?");
        let b = query_hash("How long is a day in Isharoth?");
        assert_eq!(a, b);
        assert_eq!(a.len(), 16);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_query_hash_differs_per_query() {
        assert_ne!(query_hash("one question"), query_hash("another question"));
    }

    #[test]
    fn test_hash_does_not_contain_query() {
        let hash = query_hash("SecretProjectName");
        assert!(!hash.to_lowercase().contains("secret"));
    }
}
