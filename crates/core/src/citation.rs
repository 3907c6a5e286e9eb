//! Citations and document freshness

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Freshness bucket for a cited document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Freshness {
    Fresh,
    Recent,
    Stale,
}

/// Freshness bucket plus the underlying age.
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FreshnessInfo {
    pub bucket: Freshness,
    pub age_days: i64,
}

impl FreshnessInfo {
    /// Bucket a document timestamp (epoch seconds) against `now`.
    /// Fresh ≤ 30 days, Recent ≤ 180 days, Stale otherwise.
    pub fn from_timestamp(timestamp: i64, now: DateTime<Utc>) -> Option<Self> {
        let ts = DateTime::<Utc>::from_timestamp(timestamp, 0)?;
        let age_days = (now - ts).num_days().max(0);
        let bucket = if age_days <= 30 {
            Freshness::Fresh
        } else if age_days <= 180 {
            Freshness::Recent
        } else {
            Freshness::Stale
        };
        Some(Self { bucket, age_days })
    }
}

/// A source attached to the final answer.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Citation {
    /// 1-based, contiguous after extraction.
    pub number: usize,
    pub doc_id: String,
    pub excerpt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub freshness: Option<FreshnessInfo>,
    pub score: f32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_freshness_buckets() {
        let now = Utc.with_ymd_and_hms(2026, 6, 1, 0, 0, 0).unwrap();
        let day = 86_400i64;

        let fresh = FreshnessInfo::from_timestamp(now.timestamp() - 10 * day, now).unwrap();
        assert_eq!(fresh.bucket, Freshness::Fresh);
        assert_eq!(fresh.age_days, 10);

        let recent = FreshnessInfo::from_timestamp(now.timestamp() - 90 * day, now).unwrap();
        assert_eq!(recent.bucket, Freshness::Recent);

        let stale = FreshnessInfo::from_timestamp(now.timestamp() - 400 * day, now).unwrap();
        assert_eq!(stale.bucket, Freshness::Stale);
    }

    #[test]
    fn test_freshness_future_timestamp_clamps_to_zero() {
        let now = Utc.with_ymd_and_hms(2026, 6, 1, 0, 0, 0).unwrap();
        let f = FreshnessInfo::from_timestamp(now.timestamp() + 86_400, now).unwrap();
        assert_eq!(f.age_days, 0);
        assert_eq!(f.bucket, Freshness::Fresh);
    }
}
