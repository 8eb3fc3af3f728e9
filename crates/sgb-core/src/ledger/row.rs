use chrono::DateTime;

use super::UsageRecord;
use crate::domain::UserId;

/// Sheet range holding the activity table (five columns, one row per user).
pub const LEDGER_RANGE: &str = "Activity!A:E";

pub const LEDGER_COLUMNS: [&str; 5] = [
    "UserID",
    "TotalInteractions",
    "LastUsedAt",
    "TotalTokensUsedAllTime",
    "TokensUsedToday",
];

/// Decode one table row.
///
/// Rows shorter than five cells are not records. Numeric cells that fail to
/// parse read as zero and an unparsable timestamp reads as "never used".
pub fn decode_row(row: &[String]) -> Option<UsageRecord> {
    if row.len() < LEDGER_COLUMNS.len() {
        return None;
    }

    let count = |s: &str| s.trim().parse::<u64>().unwrap_or(0);
    let last_used_at = DateTime::parse_from_rfc3339(row[2].trim()).ok();

    Some(UsageRecord {
        user_id: UserId(row[0].clone()),
        total_interactions: count(&row[1]),
        last_used_at,
        tokens_used_all_time: count(&row[3]),
        tokens_used_today: count(&row[4]),
    })
}

pub fn encode_row(record: &UsageRecord) -> Vec<String> {
    vec![
        record.user_id.0.clone(),
        record.total_interactions.to_string(),
        record
            .last_used_at
            .map(|t| t.to_rfc3339())
            .unwrap_or_default(),
        record.tokens_used_all_time.to_string(),
        record.tokens_used_today.to_string(),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(cells: &[&str]) -> Vec<String> {
        cells.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn decodes_full_row() {
        let r = decode_row(&row(&["U1", "7", "2026-10-18T09:30:00+09:00", "1200", "300"])).unwrap();
        assert_eq!(r.user_id, UserId("U1".to_string()));
        assert_eq!(r.total_interactions, 7);
        assert_eq!(r.tokens_used_all_time, 1200);
        assert_eq!(r.tokens_used_today, 300);
        assert_eq!(r.last_used_at.unwrap().to_rfc3339(), "2026-10-18T09:30:00+09:00");
        assert_eq!(encode_row(&r), row(&["U1", "7", "2026-10-18T09:30:00+09:00", "1200", "300"]));
    }

    #[test]
    fn short_rows_are_skipped() {
        assert!(decode_row(&row(&["U1", "7", "", "1200"])).is_none());
    }

    #[test]
    fn garbage_cells_read_as_defaults() {
        let r = decode_row(&row(&["U1", "x", "not a time", "", "-3"])).unwrap();
        assert_eq!(r.total_interactions, 0);
        assert_eq!(r.tokens_used_all_time, 0);
        assert_eq!(r.tokens_used_today, 0);
        assert!(r.last_used_at.is_none());
    }
}
