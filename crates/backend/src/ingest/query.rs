//! Provider search queries.

use chrono::{DateTime, Duration, Utc};

/// One sender's slice of the combined sync query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SenderWindow {
    pub sender_email: String,
    /// Latest stored message time for this sender, if any
    pub watermark: Option<DateTime<Utc>>,
}

/// `YYYY/MM/DD`, the date form accepted by `after:`.
pub fn provider_date(ts: DateTime<Utc>) -> String {
    ts.format("%Y/%m/%d").to_string()
}

/// OR-combination of per-sender filters, e.g.
/// `(from:a@x.com after:2024/01/05) OR (from:b@y.com)`.
///
/// A sender without a watermark is unbounded.
pub fn sync_query(windows: &[SenderWindow]) -> String {
    windows
        .iter()
        .map(|window| match window.watermark {
            Some(watermark) => format!(
                "(from:{} after:{})",
                window.sender_email,
                provider_date(watermark)
            ),
            None => format!("(from:{})", window.sender_email),
        })
        .collect::<Vec<_>>()
        .join(" OR ")
}

/// Recent mail for a discovery scan.
pub fn discovery_query(now: DateTime<Utc>, recency_days: i64) -> String {
    format!("after:{}", provider_date(now - Duration::days(recency_days)))
}
